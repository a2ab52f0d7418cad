//! Post-parse processing of metadata documents.
//!
//! Filters run after a document was parsed and before it is installed in
//! a provider. They may modify the document in place or reject it.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use log::{debug, trace};

use crate::metadata::{
    document::{EntitiesDescriptor, EntityDescriptor, MetadataDocument, QName},
    error::FilterError,
};

//------------ MetadataFilter ------------------------------------------------

pub trait MetadataFilter: Send + Sync {
    fn filter(&self, document: &mut MetadataDocument) -> Result<(), FilterError>;
}

//------------ MetadataFilterChain -------------------------------------------

/// Runs a list of filters in order, stopping at the first rejection.
#[derive(Default)]
pub struct MetadataFilterChain {
    filters: Vec<Box<dyn MetadataFilter>>,
}

impl MetadataFilterChain {
    pub fn new(filters: Vec<Box<dyn MetadataFilter>>) -> Self {
        MetadataFilterChain { filters }
    }

    pub fn push(&mut self, filter: impl MetadataFilter + 'static) {
        self.filters.push(Box::new(filter));
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl MetadataFilter for MetadataFilterChain {
    fn filter(&self, document: &mut MetadataDocument) -> Result<(), FilterError> {
        for filter in &self.filters {
            filter.filter(document)?;
        }
        Ok(())
    }
}

//------------ RequiredValidUntilFilter --------------------------------------

/// Requires the document root to carry a `validUntil`.
///
/// Optionally, the validity may not reach further into the future than a
/// maximum interval.
#[derive(Clone, Debug, Default)]
pub struct RequiredValidUntilFilter {
    max_validity_interval: Option<TimeDelta>,
}

impl RequiredValidUntilFilter {
    pub fn new(max_validity_interval: Option<TimeDelta>) -> Self {
        RequiredValidUntilFilter {
            max_validity_interval,
        }
    }

    pub fn max_validity_interval(&self) -> Option<TimeDelta> {
        self.max_validity_interval
    }
}

impl MetadataFilter for RequiredValidUntilFilter {
    fn filter(&self, document: &mut MetadataDocument) -> Result<(), FilterError> {
        let valid_until = document
            .valid_until()
            .ok_or(FilterError::MissingValidUntil)?;

        if let Some(max) = self.max_validity_interval {
            let validity = valid_until - Utc::now();
            if validity > max {
                return Err(FilterError::ValidityTooLong {
                    allowed_secs: max.num_seconds(),
                    actual_secs: validity.num_seconds(),
                });
            }
        }
        Ok(())
    }
}

//------------ EntityRoleFilter ----------------------------------------------

/// Keeps only the listed roles.
///
/// Entities left without roles and groups left empty can be removed as
/// well. A root entity without any retained role is rejected when role-less
/// entities are removed.
#[derive(Clone, Debug)]
pub struct EntityRoleFilter {
    retained_roles: Vec<QName>,
    remove_roleless_entities: bool,
    remove_empty_groups: bool,
}

impl EntityRoleFilter {
    pub fn new(retained_roles: Vec<QName>) -> Self {
        EntityRoleFilter {
            retained_roles,
            remove_roleless_entities: true,
            remove_empty_groups: true,
        }
    }

    pub fn with_remove_roleless_entities(mut self, remove: bool) -> Self {
        self.remove_roleless_entities = remove;
        self
    }

    pub fn with_remove_empty_groups(mut self, remove: bool) -> Self {
        self.remove_empty_groups = remove;
        self
    }

    fn filter_entity(&self, entity: &mut Arc<EntityDescriptor>) {
        let retained = |role: &QName| self.retained_roles.contains(role);
        if entity.role_descriptors.iter().all(|r| retained(&r.role)) {
            return;
        }
        let entity = Arc::make_mut(entity);
        entity.role_descriptors.retain(|r| {
            let keep = retained(&r.role);
            if !keep {
                trace!("Removing role {} of {}", r.role, entity.entity_id);
            }
            keep
        });
    }

    fn filter_group(&self, group: &mut Arc<EntitiesDescriptor>) {
        let group = Arc::make_mut(group);

        for entity in &mut group.entity_descriptors {
            self.filter_entity(entity);
        }
        if self.remove_roleless_entities {
            group.entity_descriptors.retain(|entity| {
                let keep = !entity.role_descriptors.is_empty();
                if !keep {
                    debug!("Removing role-less entity {}", entity.entity_id);
                }
                keep
            });
        }

        for child in &mut group.entities_descriptors {
            self.filter_group(child);
        }
        if self.remove_empty_groups {
            group.entities_descriptors.retain(|child| !child.is_empty());
        }
    }
}

impl MetadataFilter for EntityRoleFilter {
    fn filter(&self, document: &mut MetadataDocument) -> Result<(), FilterError> {
        match document {
            MetadataDocument::Entity(entity) => {
                self.filter_entity(entity);
                if self.remove_roleless_entities
                    && entity.role_descriptors.is_empty()
                {
                    return Err(FilterError::rejected(format!(
                        "root entity {} has no retained roles",
                        entity.entity_id
                    )));
                }
            }
            MetadataDocument::Entities(group) => self.filter_group(group),
        }
        Ok(())
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::document::RoleDescriptor;

    fn entity(id: &str, roles: &[QName]) -> Arc<EntityDescriptor> {
        let mut entity = EntityDescriptor::new(id);
        for role in roles {
            entity
                .role_descriptors
                .push(Arc::new(RoleDescriptor::new(role.clone(), Vec::new())));
        }
        Arc::new(entity)
    }

    #[test]
    fn required_valid_until() {
        let filter = RequiredValidUntilFilter::new(Some(TimeDelta::days(14)));

        let mut missing = MetadataDocument::from(EntitiesDescriptor::default());
        assert!(matches!(
            filter.filter(&mut missing),
            Err(FilterError::MissingValidUntil)
        ));

        let mut group = EntitiesDescriptor::default();
        group.valid_until = Some(Utc::now() + TimeDelta::days(30));
        let mut too_long = MetadataDocument::from(group.clone());
        assert!(matches!(
            filter.filter(&mut too_long),
            Err(FilterError::ValidityTooLong { .. })
        ));

        // without a maximum any validUntil will do
        let lenient = RequiredValidUntilFilter::default();
        assert!(lenient.filter(&mut too_long).is_ok());

        group.valid_until = Some(Utc::now() + TimeDelta::days(7));
        let mut fine = MetadataDocument::from(group);
        assert!(filter.filter(&mut fine).is_ok());
    }

    #[test]
    fn entity_role_filter_prunes_tree() {
        let idp = QName::idp_sso_descriptor();
        let sp = QName::sp_sso_descriptor();

        let mut nested = EntitiesDescriptor::named("nested");
        nested.entity_descriptors.push(entity("urn:sp-only", &[sp.clone()]));

        let mut root = EntitiesDescriptor::named("root");
        root.entity_descriptors
            .push(entity("urn:both", &[idp.clone(), sp.clone()]));
        root.entity_descriptors.push(entity("urn:sp", &[sp.clone()]));
        root.entities_descriptors.push(Arc::new(nested));

        let original = MetadataDocument::from(root);
        let mut doc = original.clone();
        EntityRoleFilter::new(vec![idp.clone()])
            .filter(&mut doc)
            .unwrap();

        let MetadataDocument::Entities(group) = &doc else {
            panic!("root changed type");
        };
        assert_eq!(group.entity_descriptors.len(), 1);
        assert_eq!(group.entity_descriptors[0].entity_id, "urn:both");
        assert_eq!(group.entity_descriptors[0].role_descriptors.len(), 1);
        assert!(group.entities_descriptors.is_empty());

        // the unfiltered copy shares nothing that was modified
        let MetadataDocument::Entities(untouched) = &original else {
            panic!("root changed type");
        };
        assert_eq!(untouched.entity_descriptors.len(), 2);
        assert_eq!(untouched.entity_descriptors[0].role_descriptors.len(), 2);
    }

    #[test]
    fn entity_role_filter_rejects_empty_root_entity() {
        let filter = EntityRoleFilter::new(vec![QName::pdp_descriptor()]);
        let mut doc = MetadataDocument::Entity(entity(
            "urn:sp",
            &[QName::sp_sso_descriptor()],
        ));
        assert!(filter.filter(&mut doc).is_err());

        let keep = filter.with_remove_roleless_entities(false);
        let mut doc = MetadataDocument::Entity(entity(
            "urn:sp",
            &[QName::sp_sso_descriptor()],
        ));
        assert!(keep.filter(&mut doc).is_ok());
    }
}
