//! A provider for metadata that is already in memory.
use std::sync::Arc;

use chrono::Utc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::metadata::{
    document::{EntitiesDescriptor, EntityDescriptor, MetadataDocument},
    error::{ProviderError, ProviderResult},
    filter::MetadataFilter,
    observer::{
        MetadataEvent, MetadataObserver, Observable, ObserverList,
        SubscriptionId,
    },
};

use super::{
    Filterable, IndexedMetadata, InitializationPolicy, MetadataProvider,
    ProviderBase,
};

//------------ StaticMetadataProvider ----------------------------------------

/// Serves a document handed to it.
///
/// The document is filtered when the provider is initialized and whenever
/// it is replaced through [`set_metadata`](Self::set_metadata).
pub struct StaticMetadataProvider {
    base: ProviderBase,
    pending: Mutex<Option<MetadataDocument>>,
    metadata: RwLock<Option<Arc<IndexedMetadata>>>,
    filter: RwLock<Option<Arc<dyn MetadataFilter>>>,
    observers: ObserverList,
}

impl StaticMetadataProvider {
    pub fn new(name: &str, document: MetadataDocument) -> Self {
        StaticMetadataProvider {
            base: ProviderBase::new(name),
            pending: Mutex::new(Some(document)),
            metadata: RwLock::new(None),
            filter: RwLock::new(None),
            observers: ObserverList::default(),
        }
    }

    pub fn with_policy(mut self, policy: InitializationPolicy) -> Self {
        self.base = self.base.with_policy(policy);
        self
    }

    /// Creates an initialized provider in one go.
    pub fn initialized(
        name: &str,
        document: MetadataDocument,
    ) -> ProviderResult<Self> {
        let provider = Self::new(name, document);
        provider.initialize()?;
        Ok(provider)
    }

    /// Replaces the document and notifies observers.
    ///
    /// If the filter rejects the document, the current one is kept.
    pub fn set_metadata(&self, document: MetadataDocument) -> ProviderResult<()> {
        self.base.check_initialized()?;
        self.install(document)?;
        self.observers.notify(&MetadataEvent::new(self.base.name()));
        Ok(())
    }

    fn install(&self, mut document: MetadataDocument) -> ProviderResult<()> {
        let filter = self.filter.read().clone();
        if let Some(filter) = filter {
            filter
                .filter(&mut document)
                .map_err(|e| ProviderError::filter(self.base.name(), e))?;
        }
        *self.metadata.write() = Some(Arc::new(IndexedMetadata::new(document)));
        debug!("Provider '{}' installed new metadata", self.base.name());
        Ok(())
    }

    fn current(&self) -> ProviderResult<Option<Arc<IndexedMetadata>>> {
        self.base.check_initialized()?;
        Ok(self.metadata.read().clone())
    }
}

impl MetadataProvider for StaticMetadataProvider {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn initialize(&self) -> ProviderResult<()> {
        self.base.initialize_with(|| match self.pending.lock().take() {
            Some(document) => self.install(document),
            None => Ok(()),
        })
    }

    fn is_initialized(&self) -> bool {
        self.base.is_initialized()
    }

    fn require_valid_metadata(&self) -> bool {
        self.base.require_valid()
    }

    fn set_require_valid_metadata(&self, require: bool) {
        self.base.set_require_valid(require)
    }

    fn metadata(&self) -> ProviderResult<Option<MetadataDocument>> {
        Ok(self
            .current()?
            .map(|metadata| metadata.document().clone()))
    }

    fn entities_descriptor(
        &self,
        name: &str,
    ) -> ProviderResult<Option<Arc<EntitiesDescriptor>>> {
        let require_valid = self.base.require_valid();
        Ok(self.current()?.and_then(|metadata| {
            metadata.entities_descriptor(name, require_valid, Utc::now())
        }))
    }

    fn entity_descriptor(
        &self,
        entity_id: &str,
    ) -> ProviderResult<Option<Arc<EntityDescriptor>>> {
        let require_valid = self.base.require_valid();
        Ok(self.current()?.and_then(|metadata| {
            metadata.entity_descriptor(entity_id, require_valid, Utc::now())
        }))
    }

    fn as_observable(&self) -> Option<&dyn Observable> {
        Some(self)
    }

    fn as_filterable(&self) -> Option<&dyn Filterable> {
        Some(self)
    }
}

impl Observable for StaticMetadataProvider {
    fn subscribe(&self, observer: Arc<dyn MetadataObserver>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }
}

impl Filterable for StaticMetadataProvider {
    fn set_metadata_filter(
        &self,
        filter: Option<Arc<dyn MetadataFilter>>,
    ) -> ProviderResult<()> {
        *self.filter.write() = filter;
        Ok(())
    }

    fn metadata_filter(&self) -> Option<Arc<dyn MetadataFilter>> {
        self.filter.read().clone()
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        document::{QName, RoleDescriptor},
        filter::{EntityRoleFilter, RequiredValidUntilFilter},
        observer::EventCounter,
    };

    fn sp(entity_id: &str) -> MetadataDocument {
        let mut entity = EntityDescriptor::new(entity_id);
        entity.role_descriptors.push(Arc::new(RoleDescriptor::new(
            QName::sp_sso_descriptor(),
            vec![crate::constants::SAML20P_NS.to_string()],
        )));
        entity.into()
    }

    #[test]
    fn serve_and_replace_document() {
        let provider = StaticMetadataProvider::new("static", sp("urn:a"));
        assert!(provider.entity_descriptor("urn:a").is_err());
        provider.initialize().unwrap();

        let role = provider
            .role(
                "urn:a",
                &QName::sp_sso_descriptor(),
                crate::constants::SAML20P_NS,
            )
            .unwrap();
        assert!(role.is_some());
        assert!(
            provider
                .role("urn:a", &QName::sp_sso_descriptor(), "urn:other")
                .unwrap()
                .is_none()
        );

        let counter = Arc::new(EventCounter::default());
        provider.subscribe(counter.clone());
        provider.set_metadata(sp("urn:b")).unwrap();
        assert_eq!(counter.total(), 1);
        assert!(provider.entity_descriptor("urn:a").unwrap().is_none());
        assert!(provider.entity_descriptor("urn:b").unwrap().is_some());
    }

    #[test]
    fn filters_apply_to_initial_and_replaced_documents() {
        let provider = StaticMetadataProvider::new("static", sp("urn:a"));
        provider
            .set_metadata_filter(Some(Arc::new(EntityRoleFilter::new(vec![
                QName::sp_sso_descriptor(),
            ]))))
            .unwrap();
        provider.initialize().unwrap();
        assert!(provider.entity_descriptor("urn:a").unwrap().is_some());

        provider
            .set_metadata_filter(Some(Arc::new(RequiredValidUntilFilter::default())))
            .unwrap();
        assert!(provider.set_metadata(sp("urn:b")).is_err());
        assert!(provider.entity_descriptor("urn:a").unwrap().is_some());
    }
}
