//! Combining several providers into one.
use std::sync::{Arc, Weak};

use log::{debug, warn};
use parking_lot::RwLock;

use crate::metadata::{
    document::{
        EntitiesDescriptor, EntityDescriptor, MetadataDocument, QName,
        RoleDescriptor,
    },
    error::{ProviderError, ProviderResult},
    filter::MetadataFilter,
    observer::{
        MetadataEvent, MetadataObserver, Observable, ObserverList,
        SubscriptionId,
    },
};

use super::{Filterable, MetadataProvider, ProviderBase};

//------------ ChainingMetadataProvider --------------------------------------

/// Asks a list of providers in order and returns the first result.
///
/// The chain does not own its members. It does not initialize them and a
/// member may be part of several chains. Events emitted by observable
/// members are passed on to the observers of the chain. An observer that
/// subscribes to both a member and the chain will be called twice.
///
/// The member list is guarded by a fair reader/writer lock. Lookups only
/// hold it while taking a snapshot of the list and then ask the members
/// without it, so members may notify observers that change the chain.
pub struct ChainingMetadataProvider {
    base: ProviderBase,
    members: RwLock<Vec<Member>>,
    observers: Arc<ObserverList>,
}

struct Member {
    provider: Arc<dyn MetadataProvider>,
    relay: Option<SubscriptionId>,
}

impl ChainingMetadataProvider {
    pub fn new(name: &str) -> Self {
        ChainingMetadataProvider {
            base: ProviderBase::new(name),
            members: RwLock::new(Vec::new()),
            observers: Arc::new(ObserverList::default()),
        }
    }

    /// Returns the current members in lookup order.
    ///
    /// The list is a snapshot. Changes to the chain do not show up in it.
    pub fn providers(&self) -> Vec<Arc<dyn MetadataProvider>> {
        self.members
            .read()
            .iter()
            .map(|member| member.provider.clone())
            .collect()
    }

    /// Replaces all members.
    pub fn set_providers(&self, providers: Vec<Arc<dyn MetadataProvider>>) {
        let added: Vec<_> =
            providers.into_iter().map(|p| self.attach(p)).collect();
        let removed = std::mem::replace(&mut *self.members.write(), added);
        for member in &removed {
            self.detach(member);
        }
    }

    /// Adds a provider at the end of the chain.
    pub fn add_metadata_provider(&self, provider: Arc<dyn MetadataProvider>) {
        let member = self.attach(provider);
        self.members.write().push(member);
    }

    /// Removes a provider from the chain.
    ///
    /// Returns whether it was a member.
    pub fn remove_metadata_provider(
        &self,
        provider: &Arc<dyn MetadataProvider>,
    ) -> bool {
        let removed = {
            let mut members = self.members.write();
            members
                .iter()
                .position(|member| Arc::ptr_eq(&member.provider, provider))
                .map(|pos| members.remove(pos))
        };
        match removed {
            Some(member) => {
                self.detach(&member);
                true
            }
            None => false,
        }
    }

    fn attach(&self, provider: Arc<dyn MetadataProvider>) -> Member {
        provider.set_require_valid_metadata(self.base.require_valid());
        let relay = provider.as_observable().map(|observable| {
            observable.subscribe(Arc::new(ChainRelay {
                chain: self.base.name().to_string(),
                observers: Arc::downgrade(&self.observers),
            }))
        });
        debug!(
            "Added provider '{}' to chain '{}'",
            provider.name(),
            self.base.name()
        );
        Member { provider, relay }
    }

    fn detach(&self, member: &Member) {
        if let (Some(id), Some(observable)) =
            (member.relay, member.provider.as_observable())
        {
            observable.unsubscribe(id);
        }
        debug!(
            "Removed provider '{}' from chain '{}'",
            member.provider.name(),
            self.base.name()
        );
    }

    /// Asks every member in turn until one has a result.
    ///
    /// A failing member is skipped. If no member had a result and some
    /// failed, the first failure is returned.
    fn first_match<T, F>(&self, op: F) -> ProviderResult<Option<T>>
    where
        F: Fn(&dyn MetadataProvider) -> ProviderResult<Option<T>>,
    {
        self.base.check_initialized()?;

        let mut first_err = None;
        for provider in self.providers() {
            match op(provider.as_ref()) {
                Ok(Some(res)) => return Ok(Some(res)),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "Provider '{}' in chain '{}' failed: {}",
                        provider.name(),
                        self.base.name(),
                        e
                    );
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

impl MetadataProvider for ChainingMetadataProvider {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn initialize(&self) -> ProviderResult<()> {
        self.base.initialize_with(|| Ok(()))
    }

    fn is_initialized(&self) -> bool {
        self.base.is_initialized()
    }

    fn require_valid_metadata(&self) -> bool {
        self.base.require_valid()
    }

    /// Sets the flag for the chain and all its current members.
    fn set_require_valid_metadata(&self, require: bool) {
        self.base.set_require_valid(require);
        for provider in self.providers() {
            provider.set_require_valid_metadata(require);
        }
    }

    /// Returns a new group containing the documents of all members.
    ///
    /// This is put together again on every call.
    fn metadata(&self) -> ProviderResult<Option<MetadataDocument>> {
        self.base.check_initialized()?;

        let mut group = EntitiesDescriptor::default();
        for provider in self.providers() {
            match provider.metadata() {
                Ok(Some(MetadataDocument::Entity(entity))) => {
                    group.entity_descriptors.push(entity)
                }
                Ok(Some(MetadataDocument::Entities(child))) => {
                    group.entities_descriptors.push(child)
                }
                Ok(None) => {}
                Err(e) => warn!(
                    "Provider '{}' in chain '{}' failed: {}",
                    provider.name(),
                    self.base.name(),
                    e
                ),
            }
        }
        Ok(Some(group.into()))
    }

    fn entities_descriptor(
        &self,
        name: &str,
    ) -> ProviderResult<Option<Arc<EntitiesDescriptor>>> {
        self.first_match(|provider| provider.entities_descriptor(name))
    }

    fn entity_descriptor(
        &self,
        entity_id: &str,
    ) -> ProviderResult<Option<Arc<EntityDescriptor>>> {
        self.first_match(|provider| provider.entity_descriptor(entity_id))
    }

    fn roles(
        &self,
        entity_id: &str,
        role: &QName,
    ) -> ProviderResult<Vec<Arc<RoleDescriptor>>> {
        let roles = self.first_match(|provider| {
            let roles = provider.roles(entity_id, role)?;
            Ok(if roles.is_empty() { None } else { Some(roles) })
        })?;
        Ok(roles.unwrap_or_default())
    }

    fn role(
        &self,
        entity_id: &str,
        role: &QName,
        protocol: &str,
    ) -> ProviderResult<Option<Arc<RoleDescriptor>>> {
        self.first_match(|provider| provider.role(entity_id, role, protocol))
    }

    fn as_observable(&self) -> Option<&dyn Observable> {
        Some(self)
    }

    fn as_filterable(&self) -> Option<&dyn Filterable> {
        Some(self)
    }
}

impl Observable for ChainingMetadataProvider {
    fn subscribe(&self, observer: Arc<dyn MetadataObserver>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }
}

impl Filterable for ChainingMetadataProvider {
    /// Chains do not filter; set filters on the members instead.
    fn set_metadata_filter(
        &self,
        _filter: Option<Arc<dyn MetadataFilter>>,
    ) -> ProviderResult<()> {
        Err(ProviderError::config(format!(
            "chaining provider '{}' does not support metadata filters",
            self.base.name()
        )))
    }

    fn metadata_filter(&self) -> Option<Arc<dyn MetadataFilter>> {
        None
    }
}

impl Drop for ChainingMetadataProvider {
    fn drop(&mut self) {
        for member in self.members.get_mut().drain(..) {
            if let (Some(id), Some(observable)) =
                (member.relay, member.provider.as_observable())
            {
                observable.unsubscribe(id);
            }
        }
    }
}

//------------ ChainRelay ----------------------------------------------------

/// Passes the events of a member on as events of the chain.
struct ChainRelay {
    chain: String,
    observers: Weak<ObserverList>,
}

impl MetadataObserver for ChainRelay {
    fn on_event(&self, event: &MetadataEvent) {
        if let Some(observers) = self.observers.upgrade() {
            debug!(
                "Chain '{}' relaying change of provider '{}'",
                self.chain,
                event.provider()
            );
            observers.notify(&MetadataEvent::new(&self.chain));
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc,
        },
        thread,
        time::Duration,
    };

    use bytes::Bytes;
    use chrono::{DateTime, TimeDelta, Utc};

    use super::*;
    use crate::{
        metadata::{
            error::SourceError,
            filter::EntityRoleFilter,
            observer::EventCounter,
            provider::{
                FetchedMetadata, MetadataSource, RefreshSettings,
                RefreshingMetadataProvider, StaticMetadataProvider,
            },
        },
        test,
    };

    /// Hands out the same entity on every fetch.
    struct EntitySource(&'static str);

    impl MetadataSource for EntitySource {
        fn locator(&self) -> String {
            self.0.into()
        }

        fn fetch(
            &self,
            _last_update: Option<DateTime<Utc>>,
        ) -> Result<Option<FetchedMetadata>, SourceError> {
            let xml = test::entity_xml(self.0, None);
            Ok(Some(FetchedMetadata::new(Bytes::from(xml))))
        }
    }

    /// Adds a member to the chain whenever the chain changes.
    struct GrowChain {
        chain: Weak<ChainingMetadataProvider>,
        events: AtomicUsize,
    }

    impl MetadataObserver for GrowChain {
        fn on_event(&self, _event: &MetadataEvent) {
            self.events.fetch_add(1, Ordering::SeqCst);
            if let Some(chain) = self.chain.upgrade() {
                let n = chain.providers().len();
                chain.add_metadata_provider(member(
                    &format!("grown-{}", n),
                    test::entity("urn:grown", &[]).into(),
                ));
            }
        }
    }

    fn member(name: &str, doc: MetadataDocument) -> Arc<StaticMetadataProvider> {
        Arc::new(StaticMetadataProvider::initialized(name, doc).unwrap())
    }

    fn chain_of(members: &[Arc<StaticMetadataProvider>]) -> ChainingMetadataProvider {
        let chain = ChainingMetadataProvider::new("chain");
        for member in members {
            chain.add_metadata_provider(member.clone());
        }
        chain.initialize().unwrap();
        chain
    }

    #[test]
    fn first_member_with_a_result_wins() {
        let a = member("a", test::entity("urn:other", &[]).into());
        let b = member("b", test::entity("urn:x", &["SPSSODescriptor"]).into());
        let c = member("c", test::entity("urn:x", &["IDPSSODescriptor"]).into());
        let chain = chain_of(&[a, b, c]);

        let found = chain.entity_descriptor("urn:x").unwrap().unwrap();
        assert_eq!(found.role_descriptors[0].role, QName::sp_sso_descriptor());

        // roles are taken from the first member that has any
        let idp = chain.roles("urn:x", &QName::idp_sso_descriptor()).unwrap();
        assert_eq!(idp.len(), 1);

        assert!(chain.entity_descriptor("urn:none").unwrap().is_none());
        assert!(
            chain
                .roles("urn:none", &QName::idp_sso_descriptor())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn composite_metadata_contains_all_members() {
        let a = member("a", test::entity("urn:a", &[]).into());
        let mut group = EntitiesDescriptor::named("group");
        group.entity_descriptors.push(Arc::new(test::entity("urn:b", &[])));
        let b = member("b", group.into());
        let chain = chain_of(&[a, b.clone()]);

        let Some(MetadataDocument::Entities(all)) = chain.metadata().unwrap()
        else {
            panic!("expected a group");
        };
        assert!(all.name.is_none());
        assert_eq!(all.entity_descriptors.len(), 1);
        assert_eq!(all.entities_descriptors.len(), 1);

        // not cached: a member change shows up right away
        b.set_metadata(test::entity("urn:c", &[]).into()).unwrap();
        let Some(MetadataDocument::Entities(all)) = chain.metadata().unwrap()
        else {
            panic!("expected a group");
        };
        assert_eq!(all.entity_descriptors.len(), 2);
        assert!(all.entities_descriptors.is_empty());
    }

    #[test]
    fn member_events_are_relayed_until_removal() {
        let a = member("a", test::entity("urn:a", &[]).into());
        let chain = chain_of(&[a.clone()]);
        let counter = Arc::new(EventCounter::default());
        chain.subscribe(counter.clone());

        a.set_metadata(test::entity("urn:a2", &[]).into()).unwrap();
        assert_eq!(counter.total(), 1);

        let as_member: Arc<dyn MetadataProvider> = a.clone();
        assert!(chain.remove_metadata_provider(&as_member));
        assert!(!chain.remove_metadata_provider(&as_member));
        a.set_metadata(test::entity("urn:a3", &[]).into()).unwrap();
        assert_eq!(counter.total(), 1);
        assert!(chain.entity_descriptor("urn:a3").unwrap().is_none());
    }

    #[test]
    fn require_valid_metadata_is_propagated() {
        let a = member("a", test::entity("urn:a", &[]).into());
        a.set_require_valid_metadata(false);
        let chain = chain_of(&[a.clone()]);
        assert!(a.require_valid_metadata());

        chain.set_require_valid_metadata(false);
        assert!(!a.require_valid_metadata());

        let b = member("b", test::entity("urn:b", &[]).into());
        chain.set_providers(vec![b.clone() as Arc<dyn MetadataProvider>]);
        assert!(!b.require_valid_metadata());
        assert_eq!(chain.providers().len(), 1);
    }

    #[test]
    fn chains_do_not_filter() {
        let chain = chain_of(&[]);
        let filter = Arc::new(EntityRoleFilter::new(vec![]));
        assert!(matches!(
            chain.set_metadata_filter(Some(filter)),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn observers_may_change_the_chain_during_a_lookup() {
        let refreshing = RefreshingMetadataProvider::with_source(
            "refreshing",
            EntitySource("urn:a"),
        )
        .with_settings(RefreshSettings {
            max_cache_duration: TimeDelta::seconds(1),
            min_refresh_delay: TimeDelta::zero(),
            ..Default::default()
        })
        .unwrap();
        refreshing.initialize().unwrap();

        let chain = Arc::new(ChainingMetadataProvider::new("chain"));
        chain.add_metadata_provider(Arc::new(refreshing));
        chain.initialize().unwrap();
        let observer = Arc::new(GrowChain {
            chain: Arc::downgrade(&chain),
            events: AtomicUsize::new(0),
        });
        chain.subscribe(observer.clone());

        thread::sleep(Duration::from_millis(1100));

        let (tx, rx) = mpsc::channel();
        let lookup = chain.clone();
        thread::spawn(move || {
            let found = lookup.entity_descriptor("urn:a").map(|e| e.is_some());
            let _ = tx.send(found);
        });
        let found = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(found.unwrap());
        assert_eq!(observer.events.load(Ordering::SeqCst), 1);
        assert_eq!(chain.providers().len(), 2);
    }

    #[test]
    fn member_failures_surface_only_without_a_result() {
        let broken = Arc::new(StaticMetadataProvider::new(
            "broken",
            test::entity("urn:broken", &[]).into(),
        ));
        let a = member("a", test::entity("urn:a", &[]).into());
        let chain = ChainingMetadataProvider::new("chain");
        chain.add_metadata_provider(broken);
        chain.add_metadata_provider(a);
        chain.initialize().unwrap();

        assert!(chain.entity_descriptor("urn:a").unwrap().is_some());
        assert!(matches!(
            chain.entity_descriptor("urn:none"),
            Err(ProviderError::NotInitialized(_))
        ));
    }

    #[test]
    fn uninitialized_chain_fails() {
        let chain = ChainingMetadataProvider::new("chain");
        assert!(matches!(
            chain.entity_descriptor("urn:a"),
            Err(ProviderError::NotInitialized(_))
        ));
    }
}
