//! The in-memory representation of SAML metadata.
//!
//! Only the parts of the metadata schema that providers and trust engines
//! act on are modelled: the group / entity / role tree, validity bounds,
//! key descriptors and endpoints. Everything else is dropped by the parser.

use std::{fmt, str::FromStr, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::constants::SAML20MD_NS;

//------------ QName ---------------------------------------------------------

/// A namespace qualified XML name.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct QName {
    namespace: Option<String>,
    local_name: String,
}

impl QName {
    pub fn new(namespace: Option<&str>, local_name: &str) -> Self {
        QName {
            namespace: namespace.map(ToString::to_string),
            local_name: local_name.to_string(),
        }
    }

    /// Creates a name in the SAML 2.0 metadata namespace.
    pub fn md(local_name: &str) -> Self {
        Self::new(Some(SAML20MD_NS), local_name)
    }

    pub fn idp_sso_descriptor() -> Self {
        Self::md("IDPSSODescriptor")
    }

    pub fn sp_sso_descriptor() -> Self {
        Self::md("SPSSODescriptor")
    }

    pub fn attribute_authority_descriptor() -> Self {
        Self::md("AttributeAuthorityDescriptor")
    }

    pub fn authn_authority_descriptor() -> Self {
        Self::md("AuthnAuthorityDescriptor")
    }

    pub fn pdp_descriptor() -> Self {
        Self::md("PDPDescriptor")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local_name),
            None => write!(f, "{}", self.local_name),
        }
    }
}

impl Serialize for QName {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(s)
    }
}

//------------ RoleType ------------------------------------------------------

/// The role descriptors defined by the SAML 2.0 metadata schema.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    Idp,
    Sp,
    Aa,
    Authn,
    Pdp,
}

impl RoleType {
    pub fn qname(self) -> QName {
        match self {
            RoleType::Idp => QName::idp_sso_descriptor(),
            RoleType::Sp => QName::sp_sso_descriptor(),
            RoleType::Aa => QName::attribute_authority_descriptor(),
            RoleType::Authn => QName::authn_authority_descriptor(),
            RoleType::Pdp => QName::pdp_descriptor(),
        }
    }
}

impl FromStr for RoleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idp" => Ok(RoleType::Idp),
            "sp" => Ok(RoleType::Sp),
            "aa" => Ok(RoleType::Aa),
            "authn" => Ok(RoleType::Authn),
            "pdp" => Ok(RoleType::Pdp),
            other => Err(format!(
                "unknown role '{}', expected one of idp, sp, aa, authn, pdp",
                other
            )),
        }
    }
}

//------------ TimeBound -----------------------------------------------------

/// Common access to the validity bounds of metadata elements.
pub trait TimeBound {
    fn valid_until(&self) -> Option<DateTime<Utc>>;

    fn cache_duration(&self) -> Option<TimeDelta>;

    /// Returns whether the element is still valid at the given time.
    ///
    /// An element without a `validUntil` never expires on its own.
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until().is_none_or(|until| now < until)
    }

    /// The earliest moment at which this element's own bounds lapse.
    fn own_expiration(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let by_duration = self
            .cache_duration()
            .and_then(|duration| now.checked_add_signed(duration));
        earliest(self.valid_until(), by_duration)
    }
}

fn earliest(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

macro_rules! time_bound {
    ($type:ty) => {
        impl TimeBound for $type {
            fn valid_until(&self) -> Option<DateTime<Utc>> {
                self.valid_until
            }

            fn cache_duration(&self) -> Option<TimeDelta> {
                self.cache_duration
            }
        }
    };
}

//------------ MetadataDocument ----------------------------------------------

/// A parsed metadata document.
///
/// The root is either a single entity or a group of entities.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataDocument {
    Entity(Arc<EntityDescriptor>),
    Entities(Arc<EntitiesDescriptor>),
}

impl MetadataDocument {
    /// Returns the earliest expiration found anywhere in the document.
    ///
    /// Both `validUntil` and `cacheDuration` (relative to `now`) of every
    /// group, entity and role are considered.
    pub fn earliest_expiration(
        &self,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            MetadataDocument::Entity(entity) => {
                entity.earliest_expiration(now)
            }
            MetadataDocument::Entities(group) => group.earliest_expiration(now),
        }
    }

    /// Returns whether the root of the document is valid at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            MetadataDocument::Entity(entity) => entity.is_valid_at(now),
            MetadataDocument::Entities(group) => group.is_valid_at(now),
        }
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        match self {
            MetadataDocument::Entity(entity) => entity.valid_until,
            MetadataDocument::Entities(group) => group.valid_until,
        }
    }

    /// Visits every entity descriptor in document order.
    pub fn for_each_entity(&self, mut op: impl FnMut(&Arc<EntityDescriptor>)) {
        match self {
            MetadataDocument::Entity(entity) => op(entity),
            MetadataDocument::Entities(group) => group.for_each_entity(&mut op),
        }
    }
}

impl From<EntityDescriptor> for MetadataDocument {
    fn from(entity: EntityDescriptor) -> Self {
        MetadataDocument::Entity(Arc::new(entity))
    }
}

impl From<EntitiesDescriptor> for MetadataDocument {
    fn from(group: EntitiesDescriptor) -> Self {
        MetadataDocument::Entities(Arc::new(group))
    }
}

//------------ EntitiesDescriptor --------------------------------------------

/// A named group of entities and nested groups.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EntitiesDescriptor {
    pub id: Option<String>,
    pub name: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(serialize_with = "ser_opt_duration")]
    pub cache_duration: Option<TimeDelta>,
    pub entities_descriptors: Vec<Arc<EntitiesDescriptor>>,
    pub entity_descriptors: Vec<Arc<EntityDescriptor>>,
}

time_bound!(EntitiesDescriptor);

impl EntitiesDescriptor {
    pub fn named(name: &str) -> Self {
        EntitiesDescriptor {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn earliest_expiration(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut res = self.own_expiration(now);
        for entity in &self.entity_descriptors {
            res = earliest(res, entity.earliest_expiration(now));
        }
        for group in &self.entities_descriptors {
            res = earliest(res, group.earliest_expiration(now));
        }
        res
    }

    fn for_each_entity(&self, op: &mut impl FnMut(&Arc<EntityDescriptor>)) {
        for entity in &self.entity_descriptors {
            op(entity)
        }
        for group in &self.entities_descriptors {
            group.for_each_entity(op)
        }
    }

    /// Returns whether the group has neither entities nor nested groups.
    pub fn is_empty(&self) -> bool {
        self.entity_descriptors.is_empty() && self.entities_descriptors.is_empty()
    }
}

//------------ EntityDescriptor ----------------------------------------------

/// A single SAML entity and its roles.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityDescriptor {
    pub entity_id: String,
    pub id: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(serialize_with = "ser_opt_duration")]
    pub cache_duration: Option<TimeDelta>,
    pub role_descriptors: Vec<Arc<RoleDescriptor>>,
}

time_bound!(EntityDescriptor);

impl EntityDescriptor {
    pub fn new(entity_id: &str) -> Self {
        EntityDescriptor {
            entity_id: entity_id.to_string(),
            id: None,
            valid_until: None,
            cache_duration: None,
            role_descriptors: Vec::new(),
        }
    }

    /// Returns the roles of the given type in document order.
    pub fn roles_of<'a>(
        &'a self,
        role: &'a QName,
    ) -> impl Iterator<Item = &'a Arc<RoleDescriptor>> + 'a {
        self.role_descriptors.iter().filter(move |r| &r.role == role)
    }

    fn earliest_expiration(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.role_descriptors
            .iter()
            .fold(self.own_expiration(now), |res, role| {
                earliest(res, role.own_expiration(now))
            })
    }
}

//------------ RoleDescriptor ------------------------------------------------

/// A role an entity plays, such as identity or service provider.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoleDescriptor {
    pub role: QName,
    pub protocols: Vec<String>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(serialize_with = "ser_opt_duration")]
    pub cache_duration: Option<TimeDelta>,
    pub error_url: Option<String>,
    pub key_descriptors: Vec<KeyDescriptor>,
    pub endpoints: Vec<Endpoint>,
}

time_bound!(RoleDescriptor);

impl RoleDescriptor {
    pub fn new(role: QName, protocols: Vec<String>) -> Self {
        RoleDescriptor {
            role,
            protocols,
            valid_until: None,
            cache_duration: None,
            error_url: None,
            key_descriptors: Vec::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn supports_protocol(&self, protocol: &str) -> bool {
        self.protocols.iter().any(|p| p == protocol)
    }

    /// Returns the endpoints with the given element name.
    pub fn endpoints_of<'a>(
        &'a self,
        name: &'a QName,
    ) -> impl Iterator<Item = &'a Endpoint> + 'a {
        self.endpoints.iter().filter(move |e| &e.name == name)
    }
}

//------------ KeyDescriptor -------------------------------------------------

/// What a key in a [`KeyDescriptor`] may be used for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    Signing,
    Encryption,
    Unspecified,
}

impl KeyUsage {
    /// Returns whether a key with this usage may be used for `wanted`.
    ///
    /// Keys without a declared usage may be used for anything.
    pub fn allows(self, wanted: KeyUsage) -> bool {
        self == KeyUsage::Unspecified
            || wanted == KeyUsage::Unspecified
            || self == wanted
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KeyDescriptor {
    pub usage: KeyUsage,
    pub key_info: KeyInfo,
}

/// The parts of a `ds:KeyInfo` that carry key material.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct KeyInfo {
    pub key_names: Vec<String>,

    /// DER encoded X.509 certificates.
    #[serde(serialize_with = "ser_der_list")]
    pub certificates: Vec<Bytes>,

    /// DER encoded SubjectPublicKeyInfo structures.
    #[serde(serialize_with = "ser_der_list")]
    pub public_keys: Vec<Bytes>,
}

impl KeyInfo {
    pub fn is_empty(&self) -> bool {
        self.key_names.is_empty()
            && self.certificates.is_empty()
            && self.public_keys.is_empty()
    }
}

//------------ Endpoint ------------------------------------------------------

/// A protocol endpoint of a role, possibly indexed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Endpoint {
    pub name: QName,
    pub binding: String,
    pub location: String,
    pub response_location: Option<String>,
    pub index: Option<u16>,
    pub is_default: Option<bool>,
}

//------------ Serialization helpers -----------------------------------------

fn ser_opt_duration<S>(
    duration: &Option<TimeDelta>,
    s: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.map(|d| d.num_seconds()).serialize(s)
}

fn ser_der_list<S>(list: &[Bytes], s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    use base64::Engine;
    let encoded: Vec<String> = list
        .iter()
        .map(|der| base64::engine::general_purpose::STANDARD.encode(der))
        .collect();
    encoded.serialize(s)
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn earliest_expiration_walks_the_tree() {
        let now = at(0);

        let mut role =
            RoleDescriptor::new(QName::sp_sso_descriptor(), Vec::new());
        role.cache_duration = Some(TimeDelta::hours(3));

        let mut entity = EntityDescriptor::new("https://sp.example.org");
        entity.valid_until = Some(at(5));
        entity.role_descriptors.push(Arc::new(role));

        let mut inner = EntitiesDescriptor::named("inner");
        inner.entity_descriptors.push(Arc::new(entity));

        let mut outer = EntitiesDescriptor::named("outer");
        outer.valid_until = Some(at(10));
        outer.entities_descriptors.push(Arc::new(inner));

        let doc = MetadataDocument::from(outer);
        assert_eq!(doc.earliest_expiration(now), Some(at(3)));
    }

    #[test]
    fn no_bounds_means_no_expiration() {
        let doc = MetadataDocument::from(EntityDescriptor::new("urn:x"));
        assert_eq!(doc.earliest_expiration(at(0)), None);
        assert!(doc.is_valid_at(at(23)));
    }

    #[test]
    fn validity_is_exclusive_of_valid_until() {
        let mut entity = EntityDescriptor::new("urn:x");
        entity.valid_until = Some(at(2));
        assert!(entity.is_valid_at(at(1)));
        assert!(!entity.is_valid_at(at(2)));
    }

    #[test]
    fn key_usage_matching() {
        assert!(KeyUsage::Unspecified.allows(KeyUsage::Signing));
        assert!(KeyUsage::Signing.allows(KeyUsage::Unspecified));
        assert!(KeyUsage::Signing.allows(KeyUsage::Signing));
        assert!(!KeyUsage::Encryption.allows(KeyUsage::Signing));
    }

    #[test]
    fn qname_display() {
        assert_eq!(
            QName::idp_sso_descriptor().to_string(),
            "{urn:oasis:names:tc:SAML:2.0:metadata}IDPSSODescriptor"
        );
        assert_eq!(QName::new(None, "plain").to_string(), "plain");
    }
}
