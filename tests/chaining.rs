use std::sync::Arc;

use fedmeta::metadata::parser::{MetadataParser, XmlMetadataParser};
use fedmeta::metadata::provider::{
    ChainingMetadataProvider, FilesystemMetadataProvider,
    StaticMetadataProvider,
};
use fedmeta::metadata::{MetadataDocument, MetadataProvider};

mod common;

fn document(name: &str, entity_ids: &[&str]) -> MetadataDocument {
    XmlMetadataParser
        .parse(common::group_xml(name, entity_ids).as_bytes())
        .unwrap()
}

fn member(name: &str, entity_ids: &[&str]) -> Arc<dyn MetadataProvider> {
    Arc::new(
        StaticMetadataProvider::initialized(name, document(name, entity_ids))
            .unwrap(),
    )
}

#[test]
fn first_provider_with_the_entity_wins() {
    let chain = ChainingMetadataProvider::new("chain");
    chain.add_metadata_provider(member("a", &["urn:other"]));
    chain.add_metadata_provider(member("b", &["urn:x"]));
    chain.add_metadata_provider(member("c", &["urn:x", "urn:only-c"]));
    chain.initialize().unwrap();

    let b = chain.providers()[1].entity_descriptor("urn:x").unwrap().unwrap();
    let c = chain.providers()[2].entity_descriptor("urn:x").unwrap().unwrap();
    let found = chain.entity_descriptor("urn:x").unwrap().unwrap();
    assert!(Arc::ptr_eq(&found, &b));
    assert!(!Arc::ptr_eq(&found, &c));

    assert!(chain.entity_descriptor("urn:only-c").unwrap().is_some());
    assert!(chain.entity_descriptor("urn:nowhere").unwrap().is_none());

    // groups are found the same way
    let group = chain.entities_descriptor("c").unwrap().unwrap();
    assert_eq!(group.name.as_deref(), Some("c"));
}

#[test]
fn chain_over_files() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.xml");
    let second = dir.path().join("second.xml");
    std::fs::write(&first, common::group_xml("first", &["urn:x"])).unwrap();
    std::fs::write(&second, common::group_xml("second", &["urn:y"])).unwrap();

    let chain = ChainingMetadataProvider::new("files");
    for (name, path) in [("first", &first), ("second", &second)] {
        let provider = FilesystemMetadataProvider::new(name, path).unwrap();
        provider.initialize().unwrap();
        chain.add_metadata_provider(Arc::new(provider));
    }
    chain.initialize().unwrap();

    assert!(chain.entity_descriptor("urn:x").unwrap().is_some());
    assert!(chain.entity_descriptor("urn:y").unwrap().is_some());
    match chain.metadata().unwrap().unwrap() {
        MetadataDocument::Entities(group) => {
            assert_eq!(group.entities_descriptors.len(), 2)
        }
        other => panic!("unexpected document {:?}", other),
    }
}
