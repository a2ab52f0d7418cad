//! SAML metadata: the document model, parsing, filtering and providers.
pub mod document;
pub mod error;
pub mod filter;
pub mod observer;
pub mod parser;
pub mod provider;

pub use self::document::{
    EntitiesDescriptor, EntityDescriptor, MetadataDocument, QName,
    RoleDescriptor, RoleType,
};
pub use self::error::{ProviderError, ProviderResult};
pub use self::provider::MetadataProvider;
