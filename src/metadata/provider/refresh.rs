//! Providers that fetch their metadata and refresh it when it goes stale.
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::{
    commons::util::httpclient::CacheValidators,
    constants::{
        DEFAULT_MAX_CACHE_DURATION_SECS, DEFAULT_MAX_REFRESH_DELAY_SECS,
        DEFAULT_MIN_REFRESH_DELAY_SECS, DEFAULT_REFRESH_DELAY_FACTOR,
        MAX_REFRESH_INTERVAL_SECS,
    },
    metadata::{
        document::{EntitiesDescriptor, EntityDescriptor, MetadataDocument},
        error::{ProviderError, ProviderResult, SourceError},
        filter::MetadataFilter,
        observer::{
            MetadataEvent, MetadataObserver, Observable, ObserverList,
            SubscriptionId,
        },
        parser::{MetadataParser, XmlMetadataParser},
    },
};

use super::{
    Filterable, IndexedMetadata, InitializationPolicy, MetadataProvider,
    ProviderBase, Refreshable,
};

//------------ MetadataSource ------------------------------------------------

/// Where a refreshing provider gets its bytes from.
pub trait MetadataSource: Send + Sync {
    /// Describes the source for logging.
    fn locator(&self) -> String;

    /// Fetches the document.
    ///
    /// Returns `None` if the source knows that the document has not
    /// changed since `last_update`, the time the provider last installed
    /// a document.
    fn fetch(
        &self,
        last_update: Option<DateTime<Utc>>,
    ) -> Result<Option<FetchedMetadata>, SourceError>;

    /// Called after the fetched document was installed.
    fn commit(&self, _fetched: &FetchedMetadata) {}
}

/// The raw result of a successful fetch.
#[derive(Clone, Debug)]
pub struct FetchedMetadata {
    pub content: Bytes,
    pub validators: CacheValidators,

    /// The content came from a fallback rather than the actual source.
    pub from_fallback: bool,
}

impl FetchedMetadata {
    pub fn new(content: Bytes) -> Self {
        FetchedMetadata {
            content,
            validators: CacheValidators::default(),
            from_fallback: false,
        }
    }
}

//------------ RefreshSettings -----------------------------------------------

/// Bounds on caching and refreshing.
#[derive(Clone, Debug)]
pub struct RefreshSettings {
    /// Metadata is never considered valid for longer than this.
    pub max_cache_duration: TimeDelta,

    pub min_refresh_delay: TimeDelta,
    pub max_refresh_delay: TimeDelta,

    /// The part of the remaining lifetime after which to refresh.
    pub refresh_delay_factor: f64,

    /// Keep serving metadata after it expired if it cannot be refreshed.
    pub maintain_expired_metadata: bool,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        RefreshSettings {
            max_cache_duration: TimeDelta::seconds(
                DEFAULT_MAX_CACHE_DURATION_SECS,
            ),
            min_refresh_delay: TimeDelta::seconds(
                DEFAULT_MIN_REFRESH_DELAY_SECS,
            ),
            max_refresh_delay: TimeDelta::seconds(
                DEFAULT_MAX_REFRESH_DELAY_SECS,
            ),
            refresh_delay_factor: DEFAULT_REFRESH_DELAY_FACTOR,
            maintain_expired_metadata: true,
        }
    }
}

impl RefreshSettings {
    pub fn validate(&self) -> ProviderResult<()> {
        let limit = TimeDelta::seconds(MAX_REFRESH_INTERVAL_SECS);
        if self.max_cache_duration <= TimeDelta::zero() {
            return Err(ProviderError::config(
                "max cache duration must be positive",
            ));
        }
        if self.max_cache_duration > limit {
            return Err(ProviderError::config(format!(
                "max cache duration must not exceed {} seconds",
                MAX_REFRESH_INTERVAL_SECS
            )));
        }
        if self.min_refresh_delay < TimeDelta::zero()
            || self.max_refresh_delay < self.min_refresh_delay
        {
            return Err(ProviderError::config(
                "refresh delays must satisfy 0 <= min <= max",
            ));
        }
        if self.max_refresh_delay > limit {
            return Err(ProviderError::config(format!(
                "max refresh delay must not exceed {} seconds",
                MAX_REFRESH_INTERVAL_SECS
            )));
        }
        if !(self.refresh_delay_factor > 0.0 && self.refresh_delay_factor < 1.0)
        {
            return Err(ProviderError::config(
                "refresh delay factor must be between 0 and 1",
            ));
        }
        Ok(())
    }

    /// Returns the expiry of a document fetched at `now`.
    ///
    /// This is the earliest bound found in the document, but no later
    /// than the maximum cache duration. It may lie in the past.
    pub fn expiration(
        &self,
        document: &MetadataDocument,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let max = now
            .checked_add_signed(self.max_cache_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        match document.earliest_expiration(now) {
            Some(earliest) => earliest.min(max),
            None => max,
        }
    }

    /// Returns when to refresh metadata expiring at `expires`.
    pub fn next_refresh(
        &self,
        now: DateTime<Utc>,
        expires: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let remaining = expires - now;
        if remaining <= TimeDelta::zero() {
            return now + self.min_refresh_delay;
        }
        let scaled = TimeDelta::milliseconds(
            (remaining.num_milliseconds() as f64 * self.refresh_delay_factor)
                as i64,
        );
        let delay = scaled.clamp(self.min_refresh_delay, self.max_refresh_delay);
        (now + delay).min(expires)
    }
}

//------------ CacheState ----------------------------------------------------

/// What a refreshing provider currently serves.
///
/// A state is never changed, it is replaced as a whole.
#[derive(Clone, Debug, Default)]
struct CacheState {
    metadata: Option<Arc<IndexedMetadata>>,
    expires: Option<DateTime<Utc>>,
    next_refresh: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
}

impl CacheState {
    /// A state without metadata is always stale.
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.next_refresh {
            Some(next) => now >= next,
            None => true,
        }
    }
}

//------------ RefreshingMetadataProvider ------------------------------------

/// A provider that fetches metadata from a [`MetadataSource`].
///
/// Lookups that find the metadata stale refresh it synchronously. Only one
/// thread refreshes at a time. Threads that waited for a refresh to finish
/// use its result rather than refreshing again.
///
/// Readers take a snapshot of the current state and never wait for a
/// refresh in progress unless the metadata they would see is stale.
pub struct RefreshingMetadataProvider<S> {
    base: ProviderBase,
    source: S,
    parser: Arc<dyn MetadataParser>,
    filter: RwLock<Option<Arc<dyn MetadataFilter>>>,
    settings: RefreshSettings,
    state: RwLock<Arc<CacheState>>,
    refresh_lock: Mutex<()>,
    observers: ObserverList,
}

impl<S: MetadataSource> RefreshingMetadataProvider<S> {
    pub fn with_source(name: &str, source: S) -> Self {
        RefreshingMetadataProvider {
            base: ProviderBase::new(name),
            source,
            parser: Arc::new(XmlMetadataParser),
            filter: RwLock::new(None),
            settings: RefreshSettings::default(),
            state: RwLock::new(Arc::new(CacheState::default())),
            refresh_lock: Mutex::new(()),
            observers: ObserverList::default(),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn MetadataParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_settings(
        mut self,
        settings: RefreshSettings,
    ) -> ProviderResult<Self> {
        settings.validate()?;
        self.settings = settings;
        Ok(self)
    }

    pub fn with_policy(mut self, policy: InitializationPolicy) -> Self {
        self.base = self.base.with_policy(policy);
        self
    }

    pub fn with_filter(self, filter: Arc<dyn MetadataFilter>) -> Self {
        *self.filter.write() = Some(filter);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    fn snapshot(&self) -> Arc<CacheState> {
        self.state.read().clone()
    }

    /// Returns the metadata to serve, refreshing it first if stale.
    fn current(&self) -> ProviderResult<Option<Arc<IndexedMetadata>>> {
        self.base.check_initialized()?;

        let mut state = self.snapshot();
        let now = Utc::now();
        if state.is_stale(now) {
            self.refresh_metadata(false)?;
            state = self.snapshot();
        }

        if !self.settings.maintain_expired_metadata {
            if let Some(expires) = state.expires {
                if Utc::now() >= expires {
                    debug!(
                        "Metadata of provider '{}' expired at {}",
                        self.base.name(),
                        expires
                    );
                    return Ok(None);
                }
            }
        }
        Ok(state.metadata.clone())
    }

    /// Refreshes the metadata.
    ///
    /// Unless `force` is set, nothing happens if another thread refreshed
    /// while we waited for the lock. Observers are notified after the lock
    /// was released.
    fn refresh_metadata(&self, force: bool) -> ProviderResult<()> {
        let changed = {
            let _lock = self.refresh_lock.lock();
            let current = self.snapshot();
            let now = Utc::now();
            if !force && !current.is_stale(now) {
                debug!(
                    "Metadata of provider '{}' was refreshed by another thread",
                    self.base.name()
                );
                return Ok(());
            }

            match self.fetch_and_install(&current, now) {
                Ok(changed) => changed,
                Err(e) => {
                    let mut retry = current.as_ref().clone();
                    retry.next_refresh = Some(now + self.settings.min_refresh_delay);
                    *self.state.write() = Arc::new(retry);
                    warn!(
                        "Refreshing metadata of provider '{}' from {} failed: {}",
                        self.base.name(),
                        self.source.locator(),
                        e
                    );
                    return Err(e);
                }
            }
        };

        if changed {
            self.observers.notify(&MetadataEvent::new(self.base.name()));
        }
        Ok(())
    }

    /// Runs one refresh. Returns whether the served metadata changed.
    ///
    /// Must be called with the refresh lock held.
    fn fetch_and_install(
        &self,
        current: &CacheState,
        now: DateTime<Utc>,
    ) -> ProviderResult<bool> {
        let name = self.base.name();

        let fetched = self
            .source
            .fetch(current.last_update)
            .map_err(|e| ProviderError::fetch(name, e))?;

        let Some(fetched) = fetched else {
            let mut unchanged = current.clone();
            unchanged.next_refresh = Some(match current.expires {
                Some(expires) => self.settings.next_refresh(now, expires),
                None => now + self.settings.min_refresh_delay,
            });
            *self.state.write() = Arc::new(unchanged);
            info!(
                "Metadata of provider '{}' at {} has not changed",
                name,
                self.source.locator()
            );
            return Ok(false);
        };

        let mut document = self
            .parser
            .parse(&fetched.content)
            .map_err(|e| ProviderError::parse(name, e))?;

        let expires = self.settings.expiration(&document, now);
        if expires < now && !self.settings.maintain_expired_metadata {
            warn!(
                "Metadata fetched by provider '{}' from {} expired at {}, \
                 discarding it",
                name,
                self.source.locator(),
                expires
            );
            *self.state.write() = Arc::new(CacheState {
                metadata: None,
                expires: Some(now),
                next_refresh: Some(now + self.settings.min_refresh_delay),
                last_update: Some(now),
            });
            return Ok(current.metadata.is_some());
        }

        let filter = self.filter.read().clone();
        if let Some(filter) = filter {
            filter
                .filter(&mut document)
                .map_err(|e| ProviderError::filter(name, e))?;
        }

        let expires = expires.max(now);
        let next_refresh = self.settings.next_refresh(now, expires);
        *self.state.write() = Arc::new(CacheState {
            metadata: Some(Arc::new(IndexedMetadata::new(document))),
            expires: Some(expires),
            next_refresh: Some(next_refresh),
            last_update: Some(now),
        });
        self.source.commit(&fetched);

        info!(
            "Provider '{}' installed new metadata from {}, expires {}, \
             next refresh {}",
            name,
            self.source.locator(),
            expires,
            next_refresh
        );
        Ok(true)
    }

    fn require_valid_at(&self) -> (bool, DateTime<Utc>) {
        (self.base.require_valid(), Utc::now())
    }
}

impl<S: MetadataSource> MetadataProvider for RefreshingMetadataProvider<S> {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn initialize(&self) -> ProviderResult<()> {
        self.base.initialize_with(|| self.refresh_metadata(true))
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
        let (require_valid, now) = self.require_valid_at();
        Ok(self.current()?.and_then(|metadata| {
            metadata.entities_descriptor(name, require_valid, now)
        }))
    }

    fn entity_descriptor(
        &self,
        entity_id: &str,
    ) -> ProviderResult<Option<Arc<EntityDescriptor>>> {
        let (require_valid, now) = self.require_valid_at();
        Ok(self.current()?.and_then(|metadata| {
            metadata.entity_descriptor(entity_id, require_valid, now)
        }))
    }

    fn as_observable(&self) -> Option<&dyn Observable> {
        Some(self)
    }

    fn as_refreshable(&self) -> Option<&dyn Refreshable> {
        Some(self)
    }

    fn as_filterable(&self) -> Option<&dyn Filterable> {
        Some(self)
    }
}

impl<S: MetadataSource> Refreshable for RefreshingMetadataProvider<S> {
    fn refresh(&self) -> ProviderResult<()> {
        self.base.check_initialized()?;
        self.refresh_metadata(true)
    }

    fn last_update(&self) -> Option<DateTime<Utc>> {
        self.snapshot().last_update
    }

    fn next_refresh(&self) -> Option<DateTime<Utc>> {
        self.snapshot().next_refresh
    }

    fn expiration(&self) -> Option<DateTime<Utc>> {
        self.snapshot().expires
    }
}

impl<S: MetadataSource> Observable for RefreshingMetadataProvider<S> {
    fn subscribe(&self, observer: Arc<dyn MetadataObserver>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }
}

impl<S: MetadataSource> Filterable for RefreshingMetadataProvider<S> {
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
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    use super::*;
    use crate::{
        metadata::{
            filter::RequiredValidUntilFilter, observer::EventCounter,
        },
        test,
    };

    /// Serves a list of responses, repeating the last one.
    struct ScriptedSource {
        responses: Mutex<Vec<Result<Option<String>, String>>>,
        fetches: AtomicUsize,
        commits: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Option<String>, String>>) -> Self {
            ScriptedSource {
                responses: Mutex::new(responses),
                fetches: AtomicUsize::new(0),
                commits: AtomicUsize::new(0),
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl MetadataSource for ScriptedSource {
        fn locator(&self) -> String {
            "script".into()
        }

        fn fetch(
            &self,
            _last_update: Option<DateTime<Utc>>,
        ) -> Result<Option<FetchedMetadata>, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            // give concurrent callers a chance to pile up
            thread::sleep(Duration::from_millis(50));
            let mut responses = self.responses.lock();
            let response = if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            };
            match response {
                Ok(Some(xml)) => Ok(Some(FetchedMetadata::new(Bytes::from(xml)))),
                Ok(None) => Ok(None),
                Err(msg) => Err(SourceError::other(msg)),
            }
        }

        fn commit(&self, _fetched: &FetchedMetadata) {
            self.commits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn provider(
        responses: Vec<Result<Option<String>, String>>,
    ) -> RefreshingMetadataProvider<ScriptedSource> {
        RefreshingMetadataProvider::with_source(
            "scripted",
            ScriptedSource::new(responses),
        )
    }

    fn ok(xml: String) -> Result<Option<String>, String> {
        Ok(Some(xml))
    }

    #[test]
    fn initialize_fetches_once() {
        let provider = provider(vec![ok(test::entity_xml("urn:a", None))]);
        provider.initialize().unwrap();
        provider.initialize().unwrap();
        assert_eq!(provider.source().fetches(), 1);
        assert!(provider.entity_descriptor("urn:a").unwrap().is_some());
    }

    #[test]
    fn lookups_before_initialize_fail() {
        let provider = provider(vec![ok(test::entity_xml("urn:a", None))]);
        assert!(matches!(
            provider.entity_descriptor("urn:a"),
            Err(ProviderError::NotInitialized(_))
        ));
        assert!(provider.refresh().is_err());
        assert_eq!(provider.source().fetches(), 0);
    }

    #[test]
    fn fail_fast_and_tolerant_initialization() {
        let strict = provider(vec![Err("down".into())]);
        assert!(matches!(strict.initialize(), Err(ProviderError::Fetch(..))));
        assert!(!strict.is_initialized());

        let tolerant = provider(vec![Err("down".into())])
            .with_policy(InitializationPolicy::Tolerant);
        tolerant.initialize().unwrap();
        assert!(tolerant.is_initialized());
        assert!(tolerant.entity_descriptor("urn:a").unwrap().is_none());
        assert!(tolerant.metadata().unwrap().is_none());
    }

    #[test]
    fn expiry_respects_document_and_max_cache_duration() {
        let valid_until = Utc::now() + TimeDelta::hours(1);
        let bounded = provider(vec![ok(test::entity_xml(
            "urn:a",
            Some(valid_until),
        ))]);
        bounded.initialize().unwrap();
        let expires = bounded.expiration().unwrap();
        assert_eq!(expires.timestamp(), valid_until.timestamp());

        let settings = RefreshSettings {
            max_cache_duration: TimeDelta::minutes(30),
            ..Default::default()
        };
        let capped = provider(vec![ok(test::entity_xml(
            "urn:a",
            Some(valid_until),
        ))])
        .with_settings(settings)
        .unwrap();
        let before = Utc::now();
        capped.initialize().unwrap();
        let expires = capped.expiration().unwrap();
        assert!(expires >= before + TimeDelta::minutes(30));
        assert!(expires <= Utc::now() + TimeDelta::minutes(30));

        let unbounded = provider(vec![ok(test::entity_xml("urn:a", None))]);
        let before = Utc::now();
        unbounded.initialize().unwrap();
        let expires = unbounded.expiration().unwrap();
        assert!(expires >= before + TimeDelta::hours(24));
        assert!(expires <= Utc::now() + TimeDelta::hours(24));
        assert!(unbounded.next_refresh().unwrap() < expires);
    }

    #[test]
    fn next_refresh_is_clamped() {
        let settings = RefreshSettings::default();
        let now = Utc::now();

        // 0.75 of 24 hours is more than the 4 hour maximum
        let next = settings.next_refresh(now, now + TimeDelta::hours(24));
        assert_eq!(next, now + TimeDelta::hours(4));

        // 0.75 of 1 hour is more than the 5 minute minimum
        let next = settings.next_refresh(now, now + TimeDelta::hours(1));
        assert_eq!(next, now + TimeDelta::minutes(45));

        // never beyond expiry
        let next = settings.next_refresh(now, now + TimeDelta::minutes(2));
        assert_eq!(next, now + TimeDelta::minutes(2));

        // expired metadata is retried after the minimum delay
        let next = settings.next_refresh(now, now);
        assert_eq!(next, now + TimeDelta::minutes(5));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = RefreshSettings {
            refresh_delay_factor: 1.5,
            ..Default::default()
        };
        assert!(provider(vec![]).with_settings(settings).is_err());

        let settings = RefreshSettings {
            min_refresh_delay: TimeDelta::hours(5),
            ..Default::default()
        };
        assert!(provider(vec![]).with_settings(settings).is_err());

        let settings = RefreshSettings {
            max_cache_duration: TimeDelta::seconds(10_000_000_000_000),
            ..Default::default()
        };
        assert!(provider(vec![]).with_settings(settings).is_err());

        let settings = RefreshSettings {
            max_refresh_delay: TimeDelta::seconds(10_000_000_000_000),
            ..Default::default()
        };
        assert!(provider(vec![]).with_settings(settings).is_err());
    }

    #[test]
    fn expiry_saturates_at_the_end_of_time() {
        let settings = RefreshSettings {
            max_cache_duration: TimeDelta::seconds(MAX_REFRESH_INTERVAL_SECS),
            ..Default::default()
        };
        settings.validate().unwrap();
        let document = XmlMetadataParser
            .parse(test::entity_xml("urn:a", None).as_bytes())
            .unwrap();
        let end = DateTime::<Utc>::MAX_UTC - TimeDelta::days(1);
        assert_eq!(
            settings.expiration(&document, end),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[test]
    fn stale_metadata_is_refreshed_once_under_concurrency() {
        let short = Utc::now() + TimeDelta::milliseconds(1200);
        let provider = Arc::new(provider(vec![
            ok(test::entity_xml("urn:a", Some(short))),
            ok(test::entity_xml_with_role(
                "urn:a",
                None,
                "IDPSSODescriptor",
            )),
        ]));
        provider.initialize().unwrap();
        assert_eq!(provider.source().fetches(), 1);

        thread::sleep(Duration::from_millis(1500));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                thread::spawn(move || {
                    provider.entity_descriptor("urn:a").unwrap().unwrap()
                })
            })
            .collect();

        for handle in handles {
            let entity = handle.join().unwrap();
            assert_eq!(entity.role_descriptors.len(), 1);
        }
        assert_eq!(provider.source().fetches(), 2);
    }

    #[test]
    fn refresh_replaces_document_and_index() {
        let provider = provider(vec![
            ok(test::entity_xml("urn:a", None)),
            ok(test::entity_xml_with_role("urn:a", None, "SPSSODescriptor")),
        ]);
        let counter = Arc::new(EventCounter::default());
        provider.subscribe(counter.clone());

        provider.initialize().unwrap();
        let first = provider.entity_descriptor("urn:a").unwrap().unwrap();
        assert!(first.role_descriptors.is_empty());
        assert_eq!(counter.total(), 1);

        provider.refresh().unwrap();
        let second = provider.entity_descriptor("urn:a").unwrap().unwrap();
        assert_eq!(second.role_descriptors.len(), 1);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(counter.total(), 2);
    }

    #[test]
    fn unchanged_source_keeps_document_and_expiry() {
        let provider = provider(vec![
            ok(test::entity_xml("urn:a", None)),
            Ok(None),
        ]);
        provider.initialize().unwrap();
        let document = provider.current().unwrap().unwrap();
        let expires = provider.expiration();
        let last_update = provider.last_update();

        provider.refresh().unwrap();
        let after = provider.current().unwrap().unwrap();
        assert!(Arc::ptr_eq(&document, &after));
        assert_eq!(provider.expiration(), expires);
        assert_eq!(provider.last_update(), last_update);
        assert_eq!(provider.source().commits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_refresh_keeps_previous_metadata() {
        let provider = provider(vec![
            ok(test::entity_xml("urn:a", None)),
            ok("<broken".into()),
            Err("down".into()),
        ]);
        provider.initialize().unwrap();

        assert!(matches!(provider.refresh(), Err(ProviderError::Parse(..))));
        assert!(matches!(provider.refresh(), Err(ProviderError::Fetch(..))));
        assert!(provider.entity_descriptor("urn:a").unwrap().is_some());

        // a failure schedules a retry after the minimum delay
        let next = provider.next_refresh().unwrap();
        assert!(next > Utc::now() + TimeDelta::minutes(4));
    }

    #[test]
    fn filter_rejection_keeps_previous_metadata() {
        let provider = provider(vec![
            ok(test::entity_xml(
                "urn:a",
                Some(Utc::now() + TimeDelta::hours(2)),
            )),
            ok(test::entity_xml("urn:b", None)),
        ])
        .with_filter(Arc::new(RequiredValidUntilFilter::default()));
        provider.initialize().unwrap();

        let err = provider.refresh().unwrap_err();
        assert!(err.is_filter_rejection());
        assert!(provider.entity_descriptor("urn:a").unwrap().is_some());
        assert!(provider.entity_descriptor("urn:b").unwrap().is_none());
    }

    #[test]
    fn expired_metadata_is_discarded_unless_maintained() {
        let expired = Utc::now() - TimeDelta::hours(1);

        let settings = RefreshSettings {
            maintain_expired_metadata: false,
            ..Default::default()
        };
        let strict = provider(vec![ok(test::entity_xml("urn:a", Some(expired)))])
            .with_settings(settings)
            .unwrap();
        strict.initialize().unwrap();
        assert!(strict.metadata().unwrap().is_none());

        let lenient = provider(vec![ok(test::entity_xml("urn:a", Some(expired)))]);
        lenient.initialize().unwrap();
        assert!(lenient.metadata().unwrap().is_some());

        // the entity itself is not valid, so it is only served on request
        assert!(lenient.entity_descriptor("urn:a").unwrap().is_none());
        lenient.set_require_valid_metadata(false);
        assert!(lenient.entity_descriptor("urn:a").unwrap().is_some());
    }
}
