//! Metadata providers.
//!
//! A provider serves entity, group and role lookups out of a metadata
//! document it obtained somehow. The providers in this module differ in
//! where the document comes from:
//!
//! * [`StaticMetadataProvider`] holds a document handed to it,
//! * [`RefreshingMetadataProvider`] fetches a document from a
//!   [`MetadataSource`] and re-fetches it when it goes stale. The HTTP,
//!   file backed HTTP, filesystem and resource backed providers are
//!   instances of it,
//! * [`ChainingMetadataProvider`] combines other providers.
//!
//! Providers are shared between threads, so all methods take `&self`.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::metadata::{
    document::{
        EntitiesDescriptor, EntityDescriptor, MetadataDocument, QName,
        RoleDescriptor,
    },
    error::ProviderResult,
    filter::MetadataFilter,
    observer::Observable,
};

mod base;
mod chaining;
mod file_backed;
mod filesystem;
mod http;
mod memory;
mod refresh;
mod resource;

pub use self::chaining::ChainingMetadataProvider;
pub use self::base::{IndexedMetadata, InitializationPolicy, ProviderBase};
pub use self::file_backed::{FileBackedHttpMetadataProvider, FileBackedHttpSource};
pub use self::filesystem::{FilesystemMetadataProvider, FilesystemSource};
pub use self::http::{HttpMetadataProvider, HttpMetadataSource};
pub use self::memory::StaticMetadataProvider;
pub use self::refresh::{
    FetchedMetadata, MetadataSource, RefreshSettings, RefreshingMetadataProvider,
};
pub use self::resource::{
    FileResource, MetadataResource, ResourceBackedMetadataProvider,
    ResourceSource,
};

//------------ MetadataProvider ----------------------------------------------

/// Lookups of metadata.
///
/// Lookups never fail because something was not found, they return `None`
/// or an empty list instead. They fail if the provider was not initialized,
/// or if a refresh they triggered failed. A chain fails with the error of
/// one of its members if no member had a result.
pub trait MetadataProvider: Send + Sync {
    /// A name for the provider, used in logging and errors.
    fn name(&self) -> &str;

    /// Initializes the provider.
    ///
    /// Calling this more than once has no further effect.
    fn initialize(&self) -> ProviderResult<()>;

    fn is_initialized(&self) -> bool;

    /// Whether only descriptors that are still valid are returned.
    fn require_valid_metadata(&self) -> bool;

    fn set_require_valid_metadata(&self, require: bool);

    /// Returns the current metadata document, if there is one.
    fn metadata(&self) -> ProviderResult<Option<MetadataDocument>>;

    /// Finds a group by its name.
    fn entities_descriptor(
        &self,
        name: &str,
    ) -> ProviderResult<Option<Arc<EntitiesDescriptor>>>;

    /// Finds an entity by its entity ID.
    fn entity_descriptor(
        &self,
        entity_id: &str,
    ) -> ProviderResult<Option<Arc<EntityDescriptor>>>;

    /// Returns the roles of the given type of an entity.
    fn roles(
        &self,
        entity_id: &str,
        role: &QName,
    ) -> ProviderResult<Vec<Arc<RoleDescriptor>>> {
        Ok(match self.entity_descriptor(entity_id)? {
            Some(entity) => base::valid_roles(
                &entity,
                role,
                self.require_valid_metadata(),
                Utc::now(),
            ),
            None => Vec::new(),
        })
    }

    /// Returns the first role of the given type supporting a protocol.
    fn role(
        &self,
        entity_id: &str,
        role: &QName,
        protocol: &str,
    ) -> ProviderResult<Option<Arc<RoleDescriptor>>> {
        Ok(self
            .roles(entity_id, role)?
            .into_iter()
            .find(|role| role.supports_protocol(protocol)))
    }

    fn as_observable(&self) -> Option<&dyn Observable> {
        None
    }

    fn as_refreshable(&self) -> Option<&dyn Refreshable> {
        None
    }

    fn as_filterable(&self) -> Option<&dyn Filterable> {
        None
    }
}

//------------ Refreshable ---------------------------------------------------

/// A provider that re-fetches its metadata.
pub trait Refreshable {
    /// Refreshes the metadata now, regardless of whether it is stale.
    fn refresh(&self) -> ProviderResult<()>;

    /// When metadata was last successfully fetched.
    fn last_update(&self) -> Option<DateTime<Utc>>;

    /// When the next refresh is due.
    fn next_refresh(&self) -> Option<DateTime<Utc>>;

    /// When the current metadata expires.
    fn expiration(&self) -> Option<DateTime<Utc>>;
}

//------------ Filterable ----------------------------------------------------

/// A provider that runs a filter over the metadata it installs.
pub trait Filterable {
    /// Sets the filter used from the next installed document on.
    ///
    /// Providers that cannot filter return a configuration error.
    fn set_metadata_filter(
        &self,
        filter: Option<Arc<dyn MetadataFilter>>,
    ) -> ProviderResult<()>;

    fn metadata_filter(&self) -> Option<Arc<dyn MetadataFilter>>;
}
