//! Fetching metadata over HTTP.
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use reqwest::blocking::Client;
use url::Url;

use crate::{
    commons::util::httpclient::{
        self, BasicAuth, CacheValidators, ConditionalResponse, HttpClientConfig,
    },
    metadata::error::{ProviderError, ProviderResult, SourceError},
};

use super::{FetchedMetadata, MetadataSource, RefreshingMetadataProvider};

//------------ HttpMetadataSource --------------------------------------------

/// Fetches metadata with conditional GET requests.
///
/// The `ETag` and `Last-Modified` of the last response that was actually
/// installed are sent along with the next request, so an unchanged
/// document costs a `304 Not Modified` only.
pub struct HttpMetadataSource {
    url: Url,
    client: Client,
    auth: Option<BasicAuth>,
    validators: Mutex<CacheValidators>,
}

impl HttpMetadataSource {
    pub fn new(url: &str, config: &HttpClientConfig) -> ProviderResult<Self> {
        let url = Self::parse_url(url)?;
        let client = httpclient::client(url.as_str(), config)
            .map_err(ProviderError::config)?;
        Ok(Self::with_client(url, client))
    }

    /// Creates a source using a client set up by the caller.
    ///
    /// This allows for TLS set ups beyond adding root certificates.
    pub fn with_client(url: Url, client: Client) -> Self {
        HttpMetadataSource {
            url,
            client,
            auth: None,
            validators: Mutex::new(CacheValidators::default()),
        }
    }

    pub fn with_basic_auth(mut self, auth: BasicAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn parse_url(url: &str) -> ProviderResult<Url> {
        let url = Url::parse(url).map_err(|e| {
            ProviderError::config(format!("invalid metadata URL '{}': {}", url, e))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ProviderError::config(format!(
                "unsupported scheme '{}' in metadata URL {}",
                other, url
            ))),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The validators that will be sent with the next request.
    pub fn validators(&self) -> CacheValidators {
        self.validators.lock().clone()
    }
}

impl MetadataSource for HttpMetadataSource {
    fn locator(&self) -> String {
        self.url.to_string()
    }

    fn fetch(
        &self,
        _last_update: Option<DateTime<Utc>>,
    ) -> Result<Option<FetchedMetadata>, SourceError> {
        let validators = self.validators();
        let response = httpclient::get_conditional(
            &self.client,
            self.url.as_str(),
            &validators,
            self.auth.as_ref(),
        )?;

        match response {
            ConditionalResponse::NotModified => Ok(None),
            ConditionalResponse::Modified {
                content,
                validators,
            } => Ok(Some(FetchedMetadata {
                content,
                validators,
                from_fallback: false,
            })),
        }
    }

    fn commit(&self, fetched: &FetchedMetadata) {
        if !fetched.from_fallback {
            debug!("Keeping cache validators {:?}", fetched.validators);
            *self.validators.lock() = fetched.validators.clone();
        }
    }
}

//------------ HttpMetadataProvider ------------------------------------------

pub type HttpMetadataProvider = RefreshingMetadataProvider<HttpMetadataSource>;

impl RefreshingMetadataProvider<HttpMetadataSource> {
    /// Creates a provider for the metadata at `url`.
    pub fn new(
        name: &str,
        url: &str,
        config: &HttpClientConfig,
    ) -> ProviderResult<Self> {
        let source = HttpMetadataSource::new(url, config)?;
        Ok(Self::with_source(name, source))
    }
}

//------------ Tests ---------------------------------------------------------
