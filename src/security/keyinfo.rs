//! Where trusted key material comes from and how it is decoded.
use std::sync::Arc;

use log::debug;

use crate::metadata::{
    MetadataProvider, QName,
    document::{KeyInfo, KeyUsage, RoleDescriptor},
};

use super::{
    credential::{Certificate, PublicKey},
    error::SecurityResult,
};

//------------ KeyInfoSource -------------------------------------------------

/// The key information known for a peer.
pub trait KeyInfoSource {
    /// The name of the peer, if known.
    fn name(&self) -> Option<&str>;

    fn key_infos(&self) -> Vec<KeyInfo>;
}

//------------ StaticKeyInfoSource -------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct StaticKeyInfoSource {
    name: Option<String>,
    key_infos: Vec<KeyInfo>,
}

impl StaticKeyInfoSource {
    pub fn new(name: Option<String>, key_infos: Vec<KeyInfo>) -> Self {
        StaticKeyInfoSource { name, key_infos }
    }

    /// A source carrying only the peer's name.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(Some(name.into()), Vec::new())
    }
}

impl KeyInfoSource for StaticKeyInfoSource {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn key_infos(&self) -> Vec<KeyInfo> {
        self.key_infos.clone()
    }
}

//------------ RoleKeyInfoSource ---------------------------------------------

/// The keys a role in metadata declares for a given usage.
///
/// The peer name is the entity ID of the entity holding the role.
#[derive(Clone, Debug)]
pub struct RoleKeyInfoSource {
    entity_id: String,
    role: Arc<RoleDescriptor>,
    usage: KeyUsage,
}

impl RoleKeyInfoSource {
    pub fn new(
        entity_id: impl Into<String>,
        role: Arc<RoleDescriptor>,
        usage: KeyUsage,
    ) -> Self {
        RoleKeyInfoSource {
            entity_id: entity_id.into(),
            role,
            usage,
        }
    }

    /// Looks up the role in a provider.
    ///
    /// Returns `None` if the provider has no such role for the entity.
    pub fn from_provider(
        provider: &dyn MetadataProvider,
        entity_id: &str,
        role: &QName,
        protocol: &str,
        usage: KeyUsage,
    ) -> SecurityResult<Option<Self>> {
        let found = provider.role(entity_id, role, protocol)?;
        if found.is_none() {
            debug!("No {} role for '{}' supporting {}", role, entity_id, protocol);
        }
        Ok(found.map(|found| Self::new(entity_id, found, usage)))
    }
}

impl KeyInfoSource for RoleKeyInfoSource {
    fn name(&self) -> Option<&str> {
        Some(&self.entity_id)
    }

    fn key_infos(&self) -> Vec<KeyInfo> {
        self.role
            .key_descriptors
            .iter()
            .filter(|descriptor| descriptor.usage.allows(self.usage))
            .map(|descriptor| descriptor.key_info.clone())
            .collect()
    }
}

//------------ ResolvedKeys --------------------------------------------------

/// Key material decoded from key information.
#[derive(Clone, Debug, Default)]
pub struct ResolvedKeys {
    pub key_names: Vec<String>,
    pub public_keys: Vec<PublicKey>,
    pub certificates: Vec<Certificate>,
}

impl ResolvedKeys {
    /// Resolves the key information of a source.
    pub fn from_source(
        source: &dyn KeyInfoSource,
        resolver: &dyn KeyResolver,
    ) -> SecurityResult<Self> {
        let mut res = ResolvedKeys::default();
        for key_info in source.key_infos() {
            res.extend(resolver.resolve(&key_info)?);
        }
        Ok(res)
    }

    pub fn extend(&mut self, other: ResolvedKeys) {
        self.key_names.extend(other.key_names);
        self.public_keys.extend(other.public_keys);
        self.certificates.extend(other.certificates);
    }

    /// All public keys, both raw and from certificates.
    pub fn keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.public_keys
            .iter()
            .chain(self.certificates.iter().map(Certificate::public_key))
    }
}

//------------ KeyResolver ---------------------------------------------------

/// Turns key information into usable keys.
pub trait KeyResolver: Send + Sync {
    /// Fails if the key information holds malformed key material.
    fn resolve(&self, key_info: &KeyInfo) -> SecurityResult<ResolvedKeys>;
}

/// Decodes the key names, keys and certificates carried inline.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineKeyResolver;

impl KeyResolver for InlineKeyResolver {
    fn resolve(&self, key_info: &KeyInfo) -> SecurityResult<ResolvedKeys> {
        Ok(ResolvedKeys {
            key_names: key_info.key_names.clone(),
            public_keys: key_info
                .public_keys
                .iter()
                .map(|der| PublicKey::from_der(der.clone()))
                .collect::<SecurityResult<_>>()?,
            certificates: key_info
                .certificates
                .iter()
                .map(|der| Certificate::from_der(der.clone()))
                .collect::<SecurityResult<_>>()?,
        })
    }
}

//------------ Tests ---------------------------------------------------------
