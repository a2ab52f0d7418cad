//! Support shared by the integration tests.
#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use flate2::{Compression, write::GzEncoder};
use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, Ia5String,
    IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};

pub const SAML20P_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";

pub fn init_logging() {
    let _ = stderrlog::new().verbosity(4).init();
}

/// A group of entities, each with an SP role.
pub fn group_xml(name: &str, entity_ids: &[&str]) -> String {
    let mut res = format!(
        r#"<?xml version="1.0"?>
<EntitiesDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" Name="{}" validUntil="2099-01-01T00:00:00Z">
"#,
        name
    );
    for entity_id in entity_ids {
        res.push_str(&format!(
            r#"  <EntityDescriptor entityID="{}">
    <SPSSODescriptor protocolSupportEnumeration="{}"/>
  </EntityDescriptor>
"#,
            entity_id, SAML20P_NS
        ));
    }
    res.push_str("</EntitiesDescriptor>\n");
    res
}

//------------ MetadataOrigin ------------------------------------------------

/// A minimal HTTP server handing out a single document.
///
/// The document carries an ETag, or a Last-Modified date once
/// [`MetadataOrigin::use_last_modified`] was called. Requests carrying the
/// current value in `If-None-Match` or `If-Modified-Since` get a 304.
pub struct MetadataOrigin {
    addr: SocketAddr,
    state: Arc<OriginState>,
}

struct OriginState {
    document: Mutex<Document>,
    behaviour: Mutex<Behaviour>,
    authorizations: Mutex<Vec<Option<String>>>,
    requests: AtomicUsize,
    not_modified: AtomicUsize,
    gzipped: AtomicUsize,
}

struct Document {
    etag: String,
    last_modified: String,
    body: String,
}

#[derive(Default)]
struct Behaviour {
    last_modified_only: bool,
    gzip: bool,
    status: Option<u16>,
    authorization: Option<String>,
}

#[derive(Default)]
struct Request {
    if_none_match: Option<String>,
    if_modified_since: Option<String>,
    authorization: Option<String>,
    accepts_gzip: bool,
}

impl MetadataOrigin {
    pub fn start(body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(OriginState {
            document: Mutex::new(Document {
                etag: "\"v1\"".to_string(),
                last_modified: http_date(1),
                body: body.to_string(),
            }),
            behaviour: Mutex::new(Behaviour::default()),
            authorizations: Mutex::new(Vec::new()),
            requests: AtomicUsize::new(0),
            not_modified: AtomicUsize::new(0),
            gzipped: AtomicUsize::new(0),
        });
        let thread_state = state.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => thread_state.serve(stream),
                    Err(_) => break,
                }
            }
        });
        MetadataOrigin { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}/metadata.xml", self.addr)
    }

    /// Replaces the document, which gets a new ETag and a later date.
    pub fn publish(&self, etag: &str, body: &str) {
        let requests = self.requests() as u32;
        *self.state.document.lock() = Document {
            etag: format!("\"{}\"", etag),
            last_modified: http_date(2 + requests),
            body: body.to_string(),
        };
    }

    /// Sends `Last-Modified` instead of an ETag.
    pub fn use_last_modified(&self) {
        self.state.behaviour.lock().last_modified_only = true;
    }

    /// Compresses bodies for clients accepting gzip.
    pub fn use_gzip(&self) {
        self.state.behaviour.lock().gzip = true;
    }

    /// Answers every request with the given status, or normally again.
    pub fn fail_with(&self, status: Option<u16>) {
        self.state.behaviour.lock().status = status;
    }

    /// Answers 401 unless the request has this `Authorization` header.
    pub fn require_authorization(&self, value: &str) {
        self.state.behaviour.lock().authorization = Some(value.to_string());
    }

    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn not_modified(&self) -> usize {
        self.state.not_modified.load(Ordering::SeqCst)
    }

    pub fn gzipped(&self) -> usize {
        self.state.gzipped.load(Ordering::SeqCst)
    }

    /// The `Authorization` header of each request so far.
    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.state.authorizations.lock().clone()
    }
}

impl OriginState {
    fn serve(&self, mut stream: TcpStream) {
        let request = read_request(&stream);
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.authorizations.lock().push(request.authorization.clone());

        let response = self.respond(&request);
        let _ = stream.write_all(&response);
        let _ = stream.flush();
    }

    fn respond(&self, request: &Request) -> Vec<u8> {
        let behaviour = self.behaviour.lock();
        if let Some(status) = behaviour.status {
            return empty_response(status, "Failed", "");
        }
        if let Some(expected) = &behaviour.authorization {
            if request.authorization.as_ref() != Some(expected) {
                return empty_response(
                    401,
                    "Unauthorized",
                    "WWW-Authenticate: Basic realm=\"metadata\"\r\n",
                );
            }
        }

        let document = self.document.lock();
        let (validator, unchanged) = if behaviour.last_modified_only {
            (
                format!("Last-Modified: {}", document.last_modified),
                request.if_modified_since.as_ref() == Some(&document.last_modified),
            )
        } else {
            (
                format!("ETag: {}", document.etag),
                request.if_none_match.as_ref() == Some(&document.etag),
            )
        };
        if unchanged {
            self.not_modified.fetch_add(1, Ordering::SeqCst);
            return empty_response(304, "Not Modified", &format!("{}\r\n", validator));
        }

        let (body, encoding) = if behaviour.gzip && request.accepts_gzip {
            self.gzipped.fetch_add(1, Ordering::SeqCst);
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(document.body.as_bytes()).unwrap();
            (encoder.finish().unwrap(), "Content-Encoding: gzip\r\n")
        } else {
            (document.body.as_bytes().to_vec(), "")
        };
        let mut response = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/samlmetadata+xml\r\n\
             {}\r\n\
             {}\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n",
            validator,
            encoding,
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(&body);
        response
    }
}

fn read_request(stream: &TcpStream) -> Request {
    let mut request = Request::default();
    let mut reader = BufReader::new(stream);
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.to_ascii_lowercase().as_str() {
            "if-none-match" => request.if_none_match = Some(value),
            "if-modified-since" => request.if_modified_since = Some(value),
            "authorization" => request.authorization = Some(value),
            "accept-encoding" => request.accepts_gzip = value.contains("gzip"),
            _ => {}
        }
    }
    request
}

fn empty_response(status: u16, reason: &str, headers: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {} {}\r\n{}Content-Length: 0\r\nConnection: close\r\n\r\n",
        status, reason, headers
    )
    .into_bytes()
}

/// An HTTP date on the given day of January 2024.
fn http_date(day: u32) -> String {
    const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    let day = day.clamp(1, 31);
    format!(
        "{}, {:02} Jan 2024 00:00:00 GMT",
        WEEKDAYS[(day as usize - 1) % 7],
        day
    )
}

//------------ Ca ------------------------------------------------------------

/// A certificate authority for minting test certificates.
pub struct Ca {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl Ca {
    pub fn root(common_name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = ca_params(common_name, 1, None).self_signed(&key).unwrap();
        Ca { cert, key }
    }

    pub fn intermediate(&self, common_name: &str, serial: u8, path_len: Option<u8>) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = ca_params(common_name, serial, path_len)
            .signed_by(&key, &self.cert, &self.key)
            .unwrap();
        Ca { cert, key }
    }

    /// Issues an end-entity certificate, returned as PEM.
    pub fn leaf(&self, common_name: &str, serial: u8, dns_names: &[&str]) -> String {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.serial_number = Some(SerialNumber::from_slice(&[serial]));
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.subject_alt_names = dns_names
            .iter()
            .map(|name| SanType::DnsName(Ia5String::try_from(*name).unwrap()))
            .collect();
        params.signed_by(&key, &self.cert, &self.key).unwrap().pem()
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }
}

fn ca_params(common_name: &str, serial: u8, path_len: Option<u8>) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.serial_number = Some(SerialNumber::from_slice(&[serial]));
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.is_ca = match path_len {
        Some(len) => IsCa::Ca(BasicConstraints::Constrained(len)),
        None => IsCa::Ca(BasicConstraints::Unconstrained),
    };
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params
}
