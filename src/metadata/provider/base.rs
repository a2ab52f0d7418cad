//! Lookup and initialization logic shared by the providers.
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use log::{debug, error, trace};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

use crate::metadata::{
    document::{
        EntitiesDescriptor, EntityDescriptor, MetadataDocument, QName,
        RoleDescriptor, TimeBound,
    },
    error::{ProviderError, ProviderResult},
};

//------------ InitializationPolicy ------------------------------------------

/// What to do when a provider fails to initialize.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum InitializationPolicy {
    /// The error is returned and the provider stays uninitialized.
    #[default]
    FailFast,

    /// The error is logged and the provider is usable, but empty.
    Tolerant,
}

impl InitializationPolicy {
    pub fn from_fail_fast(fail_fast: bool) -> Self {
        if fail_fast {
            InitializationPolicy::FailFast
        } else {
            InitializationPolicy::Tolerant
        }
    }
}

//------------ ProviderBase --------------------------------------------------

/// The state every provider has: a name, the initialization flag and policy
/// and whether only valid descriptors are served.
#[derive(Debug)]
pub struct ProviderBase {
    name: String,
    policy: InitializationPolicy,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
    require_valid: AtomicBool,
}

impl ProviderBase {
    pub fn new(name: &str) -> Self {
        ProviderBase {
            name: name.to_string(),
            policy: InitializationPolicy::default(),
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            require_valid: AtomicBool::new(true),
        }
    }

    pub fn with_policy(mut self, policy: InitializationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> InitializationPolicy {
        self.policy
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn check_initialized(&self) -> ProviderResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ProviderError::not_initialized(&self.name))
        }
    }

    pub fn require_valid(&self) -> bool {
        self.require_valid.load(Ordering::Relaxed)
    }

    pub fn set_require_valid(&self, require: bool) {
        self.require_valid.store(require, Ordering::Relaxed)
    }

    /// Runs `op` unless the provider is already initialized.
    ///
    /// Concurrent callers wait for the first one. Whether a failure of `op`
    /// is returned depends on the initialization policy.
    pub fn initialize_with<F>(&self, op: F) -> ProviderResult<()>
    where
        F: FnOnce() -> ProviderResult<()>,
    {
        if self.is_initialized() {
            return Ok(());
        }
        let _lock = self.init_lock.lock();
        if self.is_initialized() {
            return Ok(());
        }

        match op() {
            Ok(()) => {
                debug!("Initialized metadata provider '{}'", self.name);
                self.initialized.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => match self.policy {
                InitializationPolicy::FailFast => {
                    error!(
                        "Metadata provider '{}' failed to initialize: {}",
                        self.name, e
                    );
                    Err(e)
                }
                InitializationPolicy::Tolerant => {
                    error!(
                        "Metadata provider '{}' failed to initialize, \
                         continuing without metadata: {}",
                        self.name, e
                    );
                    self.initialized.store(true, Ordering::Release);
                    Ok(())
                }
            },
        }
    }
}

//------------ IndexedMetadata -----------------------------------------------

/// A metadata document with an index of the entities looked up so far.
///
/// The index lives and dies with the document: installing a new document
/// means creating a new `IndexedMetadata`.
#[derive(Debug)]
pub struct IndexedMetadata {
    document: MetadataDocument,
    index: RwLock<HashMap<String, Arc<EntityDescriptor>>>,
}

impl IndexedMetadata {
    pub fn new(document: MetadataDocument) -> Self {
        IndexedMetadata {
            document,
            index: RwLock::new(HashMap::new()),
        }
    }

    pub fn document(&self) -> &MetadataDocument {
        &self.document
    }

    /// The number of entities currently in the index.
    pub fn indexed(&self) -> usize {
        self.index.read().len()
    }

    pub fn entity_descriptor(
        &self,
        entity_id: &str,
        require_valid: bool,
        now: DateTime<Utc>,
    ) -> Option<Arc<EntityDescriptor>> {
        if entity_id.is_empty() {
            return None;
        }

        let hit = self.index.read().get(entity_id).cloned();
        if let Some(entity) = hit {
            if is_valid(entity.as_ref(), require_valid, now) {
                trace!("Index hit for entity {}", entity_id);
                return Some(entity);
            }
            debug!("Evicting no longer valid entity {} from index", entity_id);
            self.index.write().remove(entity_id);
        }

        let entity = match &self.document {
            MetadataDocument::Entity(entity) => {
                if entity.entity_id == entity_id
                    && is_valid(entity.as_ref(), require_valid, now)
                {
                    Some(entity.clone())
                } else {
                    None
                }
            }
            MetadataDocument::Entities(group) => {
                find_entity(group, entity_id, require_valid, now)
            }
        }?;

        self.index
            .write()
            .insert(entity_id.to_string(), entity.clone());
        Some(entity)
    }

    pub fn entities_descriptor(
        &self,
        name: &str,
        require_valid: bool,
        now: DateTime<Utc>,
    ) -> Option<Arc<EntitiesDescriptor>> {
        if name.is_empty() {
            return None;
        }
        match &self.document {
            MetadataDocument::Entity(_) => None,
            MetadataDocument::Entities(group) => {
                find_group(group, name, require_valid, now)
            }
        }
    }
}

/// Returns whether a descriptor may be served.
pub fn is_valid(
    item: &impl TimeBound,
    require_valid: bool,
    now: DateTime<Utc>,
) -> bool {
    !require_valid || item.is_valid_at(now)
}

/// Searches the group's own entities first, then nested groups in order.
fn find_entity(
    group: &EntitiesDescriptor,
    entity_id: &str,
    require_valid: bool,
    now: DateTime<Utc>,
) -> Option<Arc<EntityDescriptor>> {
    let own = group.entity_descriptors.iter().find(|entity| {
        entity.entity_id == entity_id
            && is_valid(entity.as_ref(), require_valid, now)
    });
    if let Some(entity) = own {
        return Some(entity.clone());
    }
    group
        .entities_descriptors
        .iter()
        .find_map(|child| find_entity(child, entity_id, require_valid, now))
}

/// Depth first search for a group by name.
///
/// A matching group is returned without looking at its descendants.
/// Otherwise all child groups are searched and the match found in the last
/// of them wins.
fn find_group(
    group: &Arc<EntitiesDescriptor>,
    name: &str,
    require_valid: bool,
    now: DateTime<Utc>,
) -> Option<Arc<EntitiesDescriptor>> {
    if group.name.as_deref() == Some(name)
        && is_valid(group.as_ref(), require_valid, now)
    {
        return Some(group.clone());
    }

    let mut found = None;
    for child in &group.entities_descriptors {
        if let Some(descriptor) = find_group(child, name, require_valid, now) {
            found = Some(descriptor);
        }
    }
    found
}

/// Returns the (valid) roles of the given type of an entity.
pub fn valid_roles(
    entity: &EntityDescriptor,
    role: &QName,
    require_valid: bool,
    now: DateTime<Utc>,
) -> Vec<Arc<RoleDescriptor>> {
    entity
        .roles_of(role)
        .filter(|role| is_valid(role.as_ref(), require_valid, now))
        .cloned()
        .collect()
}

//------------ Tests ---------------------------------------------------------
