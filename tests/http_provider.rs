use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use fedmeta::commons::util::httpclient::{BasicAuth, HttpClientConfig};
use fedmeta::metadata::provider::{
    FileBackedHttpMetadataProvider, HttpMetadataProvider, HttpMetadataSource,
    InitializationPolicy, Refreshable, RefreshingMetadataProvider,
};
use fedmeta::metadata::{MetadataProvider, ProviderError};

mod common;

use common::MetadataOrigin;

fn client_config() -> HttpClientConfig {
    HttpClientConfig {
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

#[test]
fn not_modified_keeps_document_and_expiry() {
    common::init_logging();
    let origin = MetadataOrigin::start(&common::group_xml(
        "urn:federation",
        &["https://sp.example.org/sp"],
    ));
    let provider =
        HttpMetadataProvider::new("federation", &origin.url(), &client_config())
            .unwrap();
    provider.initialize().unwrap();

    let document = provider.metadata().unwrap().unwrap();
    let expiration = provider.expiration();
    assert!(expiration.is_some());

    provider.refresh().unwrap();
    assert_eq!(origin.requests(), 2);
    assert_eq!(origin.not_modified(), 1);
    assert_eq!(provider.metadata().unwrap().unwrap(), document);
    assert_eq!(provider.expiration(), expiration);

    // new content under a new ETag replaces the document
    origin.publish(
        "v2",
        &common::group_xml("urn:federation", &["https://other.example.org/sp"]),
    );
    provider.refresh().unwrap();
    assert_eq!(origin.not_modified(), 1);
    assert!(provider
        .entity_descriptor("https://sp.example.org/sp")
        .unwrap()
        .is_none());
    assert!(provider
        .entity_descriptor("https://other.example.org/sp")
        .unwrap()
        .is_some());
}

#[test]
fn backing_file_is_written_and_used_as_fallback() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let backing_file = dir.path().join("cache").join("federation.xml");
    let entity_id = "https://sp.example.org/sp";

    let origin =
        MetadataOrigin::start(&common::group_xml("urn:federation", &[entity_id]));
    let provider = FileBackedHttpMetadataProvider::new(
        "federation",
        &origin.url(),
        backing_file.clone(),
        &client_config(),
    )
    .unwrap();
    provider.initialize().unwrap();
    assert!(backing_file.exists());

    // nothing listens on port 1
    let unreachable = "http://127.0.0.1:1/metadata.xml";
    let provider = FileBackedHttpMetadataProvider::new(
        "fallback",
        unreachable,
        backing_file.clone(),
        &client_config(),
    )
    .unwrap();
    provider.initialize().unwrap();
    assert!(provider.metadata().unwrap().is_some());
    assert!(provider.entity_descriptor(entity_id).unwrap().is_some());

    // without the backing file the failure propagates
    let provider = FileBackedHttpMetadataProvider::new(
        "no-fallback",
        unreachable,
        dir.path().join("absent.xml"),
        &client_config(),
    )
    .unwrap()
    .with_policy(InitializationPolicy::FailFast);
    assert!(provider.initialize().is_err());
    assert!(!provider.is_initialized());
}

#[test]
fn last_modified_is_used_for_revalidation() {
    common::init_logging();
    let origin =
        MetadataOrigin::start(&common::group_xml("urn:federation", &["urn:a"]));
    origin.use_last_modified();
    let provider =
        HttpMetadataProvider::new("federation", &origin.url(), &client_config())
            .unwrap();
    provider.initialize().unwrap();

    let validators = provider.source().validators();
    assert!(validators.etag.is_none());
    assert!(validators.last_modified.is_some());

    provider.refresh().unwrap();
    assert_eq!(origin.not_modified(), 1);
    assert!(provider.entity_descriptor("urn:a").unwrap().is_some());

    origin.publish("v2", &common::group_xml("urn:federation", &["urn:b"]));
    provider.refresh().unwrap();
    assert_eq!(origin.not_modified(), 1);
    assert!(provider.entity_descriptor("urn:b").unwrap().is_some());
    assert_ne!(provider.source().validators(), validators);
}

#[test]
fn gzip_content_is_decoded() {
    common::init_logging();
    let origin =
        MetadataOrigin::start(&common::group_xml("urn:federation", &["urn:a"]));
    origin.use_gzip();
    let provider =
        HttpMetadataProvider::new("federation", &origin.url(), &client_config())
            .unwrap();
    provider.initialize().unwrap();

    assert_eq!(origin.gzipped(), 1);
    assert!(provider.entity_descriptor("urn:a").unwrap().is_some());
}

#[test]
fn error_status_keeps_previous_document() {
    common::init_logging();
    let origin =
        MetadataOrigin::start(&common::group_xml("urn:federation", &["urn:a"]));
    let provider =
        HttpMetadataProvider::new("federation", &origin.url(), &client_config())
            .unwrap();
    provider.initialize().unwrap();
    let document = provider.metadata().unwrap().unwrap();

    origin.fail_with(Some(500));
    assert!(matches!(provider.refresh(), Err(ProviderError::Fetch(..))));
    assert_eq!(provider.metadata().unwrap().unwrap(), document);
    assert!(provider.entity_descriptor("urn:a").unwrap().is_some());

    origin.fail_with(None);
    provider.refresh().unwrap();
    assert_eq!(origin.requests(), 3);
    assert_eq!(origin.not_modified(), 1);
}

#[test]
fn basic_credentials_are_sent() {
    common::init_logging();
    let origin =
        MetadataOrigin::start(&common::group_xml("urn:federation", &["urn:a"]));
    let expected = format!("Basic {}", STANDARD.encode("fedmeta:s3cret"));
    origin.require_authorization(&expected);

    let anonymous =
        HttpMetadataProvider::new("anonymous", &origin.url(), &client_config())
            .unwrap();
    assert!(anonymous.initialize().is_err());

    let source = HttpMetadataSource::new(&origin.url(), &client_config())
        .unwrap()
        .with_basic_auth(BasicAuth {
            username: "fedmeta".into(),
            password: "s3cret".into(),
        });
    let provider = RefreshingMetadataProvider::with_source("secured", source);
    provider.initialize().unwrap();
    assert!(provider.entity_descriptor("urn:a").unwrap().is_some());

    assert_eq!(origin.authorizations(), vec![None, Some(expected)]);
}
