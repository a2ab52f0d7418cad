//! Some helper functions for HTTP calls
use std::{fmt, path::Path, time::Duration};

use bytes::Bytes;
use log::{debug, trace};
use reqwest::{
    StatusCode,
    blocking::{Client, ClientBuilder, Response},
    header::{
        ACCEPT, ETAG, HeaderMap, HeaderName, HeaderValue, IF_MODIFIED_SINCE,
        IF_NONE_MATCH, LAST_MODIFIED, USER_AGENT,
    },
};

use crate::{commons::util::file, constants::FEDMETA_VERSION};

const METADATA_CONTENT: &str =
    "application/samlmetadata+xml, application/xml;q=0.9, text/xml;q=0.8";

//------------ HttpClientConfig ----------------------------------------------

/// Settings used to build a client for fetching metadata.
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub allow_redirects: bool,

    /// PEM files with additional root certificates to trust for HTTPS.
    pub root_certs: Vec<String>,

    /// Accept any server certificate. Only meant for test set ups.
    pub accept_invalid_certs: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        HttpClientConfig {
            timeout: Duration::from_secs(
                crate::constants::HTTP_CLIENT_TIMEOUT_SECS,
            ),
            allow_redirects: true,
            root_certs: Vec::new(),
            accept_invalid_certs: false,
        }
    }
}

/// Builds a blocking client with the given tweaks.
///
/// Content encodings `gzip` and `deflate` are negotiated and decoded
/// transparently by the client.
#[allow(clippy::result_large_err)]
pub fn client(uri: &str, config: &HttpClientConfig) -> Result<Client, Error> {
    let mut builder = ClientBuilder::new()
        .timeout(config.timeout)
        .gzip(true)
        .deflate(true);

    if !config.allow_redirects {
        builder = builder.redirect(reqwest::redirect::Policy::none());
    }

    for path in &config.root_certs {
        builder = builder.add_root_certificate(load_root_cert(path)?);
    }

    if config.accept_invalid_certs {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().map_err(|e| Error::request_build(uri, e))
}

#[allow(clippy::result_large_err)]
fn load_root_cert(path_str: &str) -> Result<reqwest::Certificate, Error> {
    let file = file::read(Path::new(path_str))
        .map_err(|e| Error::request_build_https_cert(path_str, e))?;
    reqwest::Certificate::from_pem(file.as_ref())
        .map_err(|e| Error::request_build_https_cert(path_str, e))
}

//------------ CacheValidators -----------------------------------------------

/// The HTTP cache validators returned with a response.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CacheValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl CacheValidators {
    fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string)
        };
        CacheValidators {
            etag: get(ETAG),
            last_modified: get(LAST_MODIFIED),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

//------------ BasicAuth -----------------------------------------------------

#[derive(Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

//------------ ConditionalResponse -------------------------------------------

/// The outcome of a conditional GET.
#[derive(Clone, Debug)]
pub enum ConditionalResponse {
    /// The server sent (new) content.
    Modified {
        content: Bytes,
        validators: CacheValidators,
    },

    /// The server answered 304 Not Modified.
    NotModified,
}

/// Performs a conditional GET using previously captured cache validators.
///
/// A 200 OK yields the body and the new validators, a 304 yields
/// [`ConditionalResponse::NotModified`]. Every other status is an error.
pub fn get_conditional(
    client: &Client,
    uri: &str,
    validators: &CacheValidators,
    auth: Option<&BasicAuth>,
) -> Result<ConditionalResponse, Error> {
    let mut headers = HeaderMap::new();
    let ua_string = format!("fedmeta/{}", FEDMETA_VERSION);
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&ua_string)
            .map_err(|e| Error::request_build(uri, e))?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static(METADATA_CONTENT));

    if let Some(etag) = &validators.etag {
        headers.insert(
            IF_NONE_MATCH,
            HeaderValue::from_str(etag)
                .map_err(|e| Error::request_build(uri, e))?,
        );
    }
    if let Some(last_modified) = &validators.last_modified {
        headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_str(last_modified)
                .map_err(|e| Error::request_build(uri, e))?,
        );
    }

    let mut request = client.get(uri).headers(headers);
    if let Some(auth) = auth {
        request = request.basic_auth(&auth.username, Some(&auth.password));
    }

    trace!("GET {} (validators: {:?})", uri, validators);
    let res = request.send().map_err(|e| Error::execute(uri, e))?;

    match res.status() {
        StatusCode::OK => {
            let validators = CacheValidators::from_headers(res.headers());
            let content = res
                .bytes()
                .map_err(|e| Error::response(uri, format!("cannot get body: {}", e)))?;
            debug!("Fetched {} bytes from {}", content.len(), uri);
            Ok(ConditionalResponse::Modified {
                content,
                validators,
            })
        }
        StatusCode::NOT_MODIFIED => {
            debug!("{} was not modified", uri);
            Ok(ConditionalResponse::NotModified)
        }
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            Err(Error::forbidden(uri, res.status()))
        }
        _ => Err(Error::from_res(uri, res)),
    }
}

//------------ Error ---------------------------------------------------------

type ErrorUri = String;
type RootCertPath = String;
type ErrorMessage = String;

#[derive(Debug)]
pub enum Error {
    RequestBuild(ErrorUri, ErrorMessage),
    RequestBuildHttpsCert(RootCertPath, ErrorMessage),

    RequestExecute(ErrorUri, ErrorMessage),

    Response(ErrorUri, ErrorMessage),
    Forbidden(ErrorUri, StatusCode),
    ErrorResponseWithBody(ErrorUri, StatusCode, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::RequestBuild(uri, msg) => write!(
                f,
                "Issue creating request for URI: {}, error: {}",
                uri, msg
            ),
            Error::RequestBuildHttpsCert(path, msg) => write!(
                f,
                "Cannot use configured HTTPS root cert '{}'. Error: {}",
                path, msg
            ),
            Error::RequestExecute(uri, msg) => {
                write!(f, "Issue accessing URI: {}, error: {}", uri, msg)
            }
            Error::Response(uri, msg) => write!(
                f,
                "Issue processing response from URI: {}, error: {}",
                uri, msg
            ),
            Error::Forbidden(uri, status) => {
                write!(f, "Got '{}' response for URI: {}", status, uri)
            }
            Error::ErrorResponseWithBody(uri, code, e) => write!(
                f,
                "Error response from URI: {}, Status: {}, Error: {}",
                uri, code, e
            ),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn request_build(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestBuild(uri.to_string(), msg.to_string())
    }

    pub fn request_build_https_cert(path: &str, msg: impl fmt::Display) -> Self {
        Error::RequestBuildHttpsCert(path.to_string(), msg.to_string())
    }

    pub fn execute(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestExecute(uri.to_string(), msg.to_string())
    }

    pub fn response(uri: &str, msg: impl fmt::Display) -> Self {
        Error::Response(uri.to_string(), msg.to_string())
    }

    pub fn forbidden(uri: &str, status: StatusCode) -> Self {
        Error::Forbidden(uri.to_string(), status)
    }

    pub fn unexpected_status(status: StatusCode) -> String {
        format!("unexpected status code {}", status)
    }

    pub fn response_unexpected_status(uri: &str, status: StatusCode) -> Self {
        Error::Response(uri.to_string(), Self::unexpected_status(status))
    }

    fn from_res(uri: &str, res: Response) -> Error {
        let status = res.status();
        match res.text() {
            Ok(body) if !body.is_empty() => {
                Error::ErrorResponseWithBody(uri.to_string(), status, body)
            }
            _ => Self::response_unexpected_status(uri, status),
        }
    }
}
