//! Parsing SAML 2.0 metadata XML into a [`MetadataDocument`].
use std::{io, sync::Arc};

use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use log::trace;
use openssl::{bn::BigNum, pkey::PKey, rsa::Rsa};

use crate::{
    commons::util::{
        time,
        xml::{Attributes, Tag, XmlReader},
    },
    constants::{SAML20MD_NS, XMLSIG_NS, XMLSIG11_NS, XSI_NS},
    metadata::{
        document::{
            Endpoint, EntitiesDescriptor, EntityDescriptor, KeyDescriptor,
            KeyInfo, KeyUsage, MetadataDocument, QName, RoleDescriptor,
        },
        error::ParseError,
    },
};

//------------ MetadataParser ------------------------------------------------

/// Turns raw bytes into a metadata document.
pub trait MetadataParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<MetadataDocument, ParseError>;
}

//------------ XmlMetadataParser ---------------------------------------------

/// The default parser for SAML 2.0 metadata.
///
/// Signatures, extensions, organization and contact information and any
/// other element that carries nothing providers or trust engines act on
/// is skipped.
#[derive(Clone, Copy, Debug, Default)]
pub struct XmlMetadataParser;

impl MetadataParser for XmlMetadataParser {
    fn parse(&self, bytes: &[u8]) -> Result<MetadataDocument, ParseError> {
        XmlReader::decode(bytes, |r| {
            r.take_element(|tag, attrs, r| {
                if tag.is(SAML20MD_NS, "EntitiesDescriptor") {
                    let group = entities_descriptor(attrs, r)?;
                    Ok(MetadataDocument::Entities(Arc::new(group)))
                } else if tag.is(SAML20MD_NS, "EntityDescriptor") {
                    let entity = entity_descriptor(attrs, r)?;
                    Ok(MetadataDocument::Entity(Arc::new(entity)))
                } else {
                    Err(ParseError::UnexpectedRoot(tag.name.clone()))
                }
            })
        })
    }
}

//------------ Elements ------------------------------------------------------

const ROLE_ELEMENTS: &[&str] = &[
    "IDPSSODescriptor",
    "SPSSODescriptor",
    "AttributeAuthorityDescriptor",
    "AuthnAuthorityDescriptor",
    "PDPDescriptor",
];

fn entities_descriptor<R: io::Read>(
    mut attrs: Attributes,
    r: &mut XmlReader<R>,
) -> Result<EntitiesDescriptor, ParseError> {
    let mut group = EntitiesDescriptor {
        id: attrs.take_opt("ID"),
        name: attrs.take_opt("Name"),
        valid_until: valid_until(&mut attrs)?,
        cache_duration: cache_duration(&mut attrs)?,
        ..Default::default()
    };
    trace!("Parsing EntitiesDescriptor {:?}", group.name);

    while let Some(()) = r.take_opt_element(|tag, attrs, r| {
        if tag.is(SAML20MD_NS, "EntitiesDescriptor") {
            let child = entities_descriptor(attrs, r)?;
            group.entities_descriptors.push(Arc::new(child));
        } else if tag.is(SAML20MD_NS, "EntityDescriptor") {
            let child = entity_descriptor(attrs, r)?;
            group.entity_descriptors.push(Arc::new(child));
        } else {
            r.skip_content()?;
        }
        Ok::<(), ParseError>(())
    })? {}

    Ok(group)
}

fn entity_descriptor<R: io::Read>(
    mut attrs: Attributes,
    r: &mut XmlReader<R>,
) -> Result<EntityDescriptor, ParseError> {
    let mut entity = EntityDescriptor::new(&attrs.take_req("entityID")?);
    if entity.entity_id.trim().is_empty() {
        return Err(ParseError::invalid("empty entityID"));
    }
    entity.id = attrs.take_opt("ID");
    entity.valid_until = valid_until(&mut attrs)?;
    entity.cache_duration = cache_duration(&mut attrs)?;

    while let Some(()) = r.take_opt_element(|tag, mut attrs, r| {
        match role_name(tag, &mut attrs)? {
            Some(role) => {
                let role = role_descriptor(role, attrs, r)?;
                entity.role_descriptors.push(Arc::new(role));
            }
            None => r.skip_content()?,
        }
        Ok::<(), ParseError>(())
    })? {}

    Ok(entity)
}

/// Returns the role type of an element, if it describes a role.
///
/// A generic `md:RoleDescriptor` takes its type from `xsi:type`.
fn role_name(
    tag: &Tag,
    attrs: &mut Attributes,
) -> Result<Option<QName>, ParseError> {
    if tag.namespace.as_deref() != Some(SAML20MD_NS) {
        return Ok(None);
    }
    if ROLE_ELEMENTS.contains(&tag.name.as_str()) {
        return Ok(Some(QName::md(&tag.name)));
    }
    if tag.name == "RoleDescriptor" {
        let xsi_type = attrs.take_opt_ns(XSI_NS, "type").ok_or_else(|| {
            ParseError::invalid("RoleDescriptor without xsi:type")
        })?;
        let (ns, local) = tag.resolve_qname(&xsi_type).ok_or_else(|| {
            ParseError::invalid(format!("unbound prefix in '{}'", xsi_type))
        })?;
        return Ok(Some(QName::new(ns.as_deref(), &local)));
    }
    Ok(None)
}

fn role_descriptor<R: io::Read>(
    role: QName,
    mut attrs: Attributes,
    r: &mut XmlReader<R>,
) -> Result<RoleDescriptor, ParseError> {
    let protocols = attrs
        .take_req("protocolSupportEnumeration")?
        .split_whitespace()
        .map(ToString::to_string)
        .collect();

    let mut role = RoleDescriptor::new(role, protocols);
    role.valid_until = valid_until(&mut attrs)?;
    role.cache_duration = cache_duration(&mut attrs)?;
    role.error_url = attrs.take_opt("errorURL");

    while let Some(()) = r.take_opt_element(|tag, mut attrs, r| {
        if tag.is(SAML20MD_NS, "KeyDescriptor") {
            role.key_descriptors.push(key_descriptor(attrs, r)?);
        } else {
            // Any element with a binding and location is an endpoint.
            if tag.namespace.as_deref() == Some(SAML20MD_NS) {
                let binding = attrs.take_opt("Binding");
                let location = attrs.take_opt("Location");
                if let (Some(binding), Some(location)) = (binding, location) {
                    let endpoint = endpoint(tag, binding, location, attrs)?;
                    role.endpoints.push(endpoint);
                }
            }
            r.skip_content()?;
        }
        Ok::<(), ParseError>(())
    })? {}

    Ok(role)
}

fn endpoint(
    tag: &Tag,
    binding: String,
    location: String,
    mut attrs: Attributes,
) -> Result<Endpoint, ParseError> {
    let index = match attrs.take_opt("index") {
        Some(index) => Some(index.trim().parse::<u16>().map_err(|_| {
            ParseError::invalid(format!("invalid endpoint index '{}'", index))
        })?),
        None => None,
    };
    let is_default = match attrs.take_opt("isDefault") {
        Some(flag) => Some(boolean(&flag)?),
        None => None,
    };
    Ok(Endpoint {
        name: QName::new(tag.namespace.as_deref(), &tag.name),
        binding,
        location,
        response_location: attrs.take_opt("ResponseLocation"),
        index,
        is_default,
    })
}

fn key_descriptor<R: io::Read>(
    mut attrs: Attributes,
    r: &mut XmlReader<R>,
) -> Result<KeyDescriptor, ParseError> {
    let usage = match attrs.take_opt("use").as_deref() {
        None => KeyUsage::Unspecified,
        Some("signing") => KeyUsage::Signing,
        Some("encryption") => KeyUsage::Encryption,
        Some(other) => {
            return Err(ParseError::invalid(format!(
                "unsupported KeyDescriptor use '{}'",
                other
            )));
        }
    };

    let mut key_info = KeyInfo::default();
    while let Some(()) = r.take_opt_element(|tag, _, r| {
        if tag.is(XMLSIG_NS, "KeyInfo") {
            key_info = self::key_info(r)?;
        } else {
            r.skip_content()?;
        }
        Ok::<(), ParseError>(())
    })? {}

    Ok(KeyDescriptor { usage, key_info })
}

fn key_info<R: io::Read>(
    r: &mut XmlReader<R>,
) -> Result<KeyInfo, ParseError> {
    let mut info = KeyInfo::default();

    while let Some(()) = r.take_opt_element(|tag, _, r| {
        if tag.is(XMLSIG_NS, "KeyName") {
            let name = r.take_text()?;
            if !name.is_empty() {
                info.key_names.push(name);
            }
        } else if tag.is(XMLSIG_NS, "X509Data") {
            while let Some(()) = r.take_opt_element(|tag, _, r| {
                if tag.is(XMLSIG_NS, "X509Certificate") {
                    info.certificates.push(base64_content(r)?);
                } else {
                    r.skip_content()?;
                }
                Ok::<(), ParseError>(())
            })? {}
        } else if tag.is(XMLSIG11_NS, "DEREncodedKeyValue") {
            info.public_keys.push(base64_content(r)?);
        } else if tag.is(XMLSIG_NS, "KeyValue") {
            while let Some(()) = r.take_opt_element(|tag, _, r| {
                if tag.is(XMLSIG_NS, "RSAKeyValue") {
                    info.public_keys.push(rsa_key_value(r)?);
                } else {
                    r.skip_content()?;
                }
                Ok::<(), ParseError>(())
            })? {}
        } else {
            r.skip_content()?;
        }
        Ok::<(), ParseError>(())
    })? {}

    Ok(info)
}

/// Converts a `ds:RSAKeyValue` into a DER encoded SubjectPublicKeyInfo.
fn rsa_key_value<R: io::Read>(
    r: &mut XmlReader<R>,
) -> Result<Bytes, ParseError> {
    let mut modulus = None;
    let mut exponent = None;
    while let Some(()) = r.take_opt_element(|tag, _, r| {
        if tag.is(XMLSIG_NS, "Modulus") {
            modulus = Some(base64_content(r)?);
        } else if tag.is(XMLSIG_NS, "Exponent") {
            exponent = Some(base64_content(r)?);
        } else {
            r.skip_content()?;
        }
        Ok::<(), ParseError>(())
    })? {}

    let (Some(modulus), Some(exponent)) = (modulus, exponent) else {
        return Err(ParseError::invalid("incomplete RSAKeyValue"));
    };

    let invalid = |e: openssl::error::ErrorStack| {
        ParseError::invalid(format!("invalid RSAKeyValue: {}", e))
    };
    let n = BigNum::from_slice(&modulus).map_err(invalid)?;
    let e = BigNum::from_slice(&exponent).map_err(invalid)?;
    let rsa = Rsa::from_public_components(n, e).map_err(invalid)?;
    let der = PKey::from_rsa(rsa)
        .and_then(|key| key.public_key_to_der())
        .map_err(invalid)?;
    Ok(Bytes::from(der))
}

//------------ Values --------------------------------------------------------

fn base64_content<R: io::Read>(
    r: &mut XmlReader<R>,
) -> Result<Bytes, ParseError> {
    let text: String = r
        .take_text()?
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map(Bytes::from)
        .map_err(|e| ParseError::invalid(format!("invalid base64: {}", e)))
}

fn valid_until(
    attrs: &mut Attributes,
) -> Result<Option<DateTime<Utc>>, ParseError> {
    attrs
        .take_opt("validUntil")
        .map(|s| time::parse_date_time(&s).map_err(ParseError::invalid))
        .transpose()
}

fn cache_duration(
    attrs: &mut Attributes,
) -> Result<Option<TimeDelta>, ParseError> {
    attrs
        .take_opt("cacheDuration")
        .map(|s| time::parse_duration(&s).map_err(ParseError::invalid))
        .transpose()
}

fn boolean(s: &str) -> Result<bool, ParseError> {
    match s.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(ParseError::invalid(format!(
            "invalid boolean '{}'",
            other
        ))),
    }
}

//------------ Tests ---------------------------------------------------------
