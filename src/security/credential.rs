//! Certificates, CRLs, public keys and the credentials built from them.
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use openssl::{
    pkey::PKey,
    sha::sha256,
    x509::{X509, X509Crl},
};
use x509_parser::{
    certificate::X509Certificate,
    extensions::GeneralName,
    prelude::FromDer,
    revocation_list::CertificateRevocationList,
    time::ASN1Time,
};

use super::error::{SecurityError, SecurityResult};

//------------ PublicKey -----------------------------------------------------

/// A DER encoded SubjectPublicKeyInfo.
///
/// Keys compare equal if their encodings are equal.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct PublicKey(Bytes);

impl PublicKey {
    /// Checks that the bytes hold a public key openssl can use.
    pub fn from_der(der: impl Into<Bytes>) -> SecurityResult<Self> {
        let der = der.into();
        PKey::public_key_from_der(&der)
            .map_err(SecurityError::invalid_key)?;
        Ok(PublicKey(der))
    }

    pub fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// Returns the hex encoded SHA-256 of the encoded key.
    pub fn fingerprint(&self) -> String {
        hex::encode(sha256(self.as_slice()))
    }

    fn to_pkey(&self) -> SecurityResult<PKey<openssl::pkey::Public>> {
        PKey::public_key_from_der(self.as_slice()).map_err(SecurityError::from)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

//------------ Certificate ---------------------------------------------------

/// An X.509 certificate together with the fields path validation needs.
#[derive(Clone, Debug)]
pub struct Certificate {
    der: Bytes,
    subject: Bytes,
    issuer: Bytes,
    subject_name: String,
    serial: Vec<u8>,
    common_name: Option<String>,
    dns_names: Vec<String>,
    uris: Vec<String>,
    public_key: PublicKey,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    ca: Option<CaConstraints>,
    key_usage: Option<KeyUsageBits>,
}

/// The basic constraints of a CA certificate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CaConstraints {
    pub path_len: Option<u32>,
}

#[derive(Clone, Copy, Debug)]
struct KeyUsageBits {
    key_cert_sign: bool,
    crl_sign: bool,
}

impl Certificate {
    pub fn from_der(der: impl Into<Bytes>) -> SecurityResult<Self> {
        let der = der.into();
        let (rest, cert) = X509Certificate::from_der(&der)
            .map_err(SecurityError::invalid_certificate)?;
        if !rest.is_empty() {
            return Err(SecurityError::invalid_certificate(
                "trailing data after certificate",
            ));
        }

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(ToString::to_string);

        let mut dns_names = Vec::new();
        let mut uris = Vec::new();
        let san = cert
            .subject_alternative_name()
            .map_err(SecurityError::invalid_certificate)?;
        if let Some(san) = san {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                    GeneralName::URI(uri) => uris.push(uri.to_string()),
                    _ => {}
                }
            }
        }

        let ca = cert
            .basic_constraints()
            .map_err(SecurityError::invalid_certificate)?
            .filter(|ext| ext.value.ca)
            .map(|ext| CaConstraints {
                path_len: ext.value.path_len_constraint,
            });

        let key_usage = cert
            .key_usage()
            .map_err(SecurityError::invalid_certificate)?
            .map(|ext| KeyUsageBits {
                key_cert_sign: ext.value.key_cert_sign(),
                crl_sign: ext.value.crl_sign(),
            });

        let validity = cert.validity();
        Ok(Certificate {
            subject: Bytes::copy_from_slice(cert.subject().as_raw()),
            issuer: Bytes::copy_from_slice(cert.issuer().as_raw()),
            subject_name: cert.subject().to_string(),
            serial: cert.tbs_certificate.serial.to_bytes_be(),
            common_name,
            dns_names,
            uris,
            public_key: PublicKey::from_der(Bytes::copy_from_slice(
                cert.public_key().raw,
            ))?,
            not_before: time(&validity.not_before)?,
            not_after: time(&validity.not_after)?,
            ca,
            key_usage,
            der: der.clone(),
        })
    }

    /// Reads all certificates from PEM text.
    pub fn list_from_pem(pem: &[u8]) -> SecurityResult<Vec<Self>> {
        X509::stack_from_pem(pem)
            .map_err(SecurityError::invalid_certificate)?
            .into_iter()
            .map(|cert| Certificate::from_der(cert.to_der()?))
            .collect()
    }

    pub fn to_der(&self) -> &[u8] {
        self.der.as_ref()
    }

    /// The DER encoded subject name.
    pub fn subject(&self) -> &[u8] {
        self.subject.as_ref()
    }

    /// The DER encoded issuer name.
    pub fn issuer(&self) -> &[u8] {
        self.issuer.as_ref()
    }

    pub fn subject_name(&self) -> &str {
        &self.subject_name
    }

    /// The serial number as unsigned big-endian bytes.
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// The first common name of the subject.
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    pub fn uris(&self) -> &[String] {
        &self.uris
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn is_valid_at(&self, time: DateTime<Utc>) -> bool {
        self.not_before <= time && time <= self.not_after
    }

    /// Returns the basic constraints if this is a CA certificate.
    pub fn ca_constraints(&self) -> Option<CaConstraints> {
        self.ca
    }

    /// Whether the key may sign certificates.
    ///
    /// Certificates without a key usage extension may be used for
    /// anything.
    pub fn may_sign_certificates(&self) -> bool {
        self.key_usage.is_none_or(|usage| usage.key_cert_sign)
    }

    pub fn may_sign_crls(&self) -> bool {
        self.key_usage.is_none_or(|usage| usage.crl_sign)
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    /// Returns whether `issuer` names and signed this certificate.
    pub fn is_issued_by(&self, issuer: &Certificate) -> SecurityResult<bool> {
        if self.issuer != issuer.subject {
            return Ok(false);
        }
        let cert = X509::from_der(self.to_der())?;
        let key = issuer.public_key.to_pkey()?;
        Ok(cert.verify(&key)?)
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.subject_name)
    }
}

fn time(time: &ASN1Time) -> SecurityResult<DateTime<Utc>> {
    DateTime::from_timestamp(time.timestamp(), 0).ok_or_else(|| {
        SecurityError::invalid_certificate("time out of range")
    })
}

//------------ Crl -----------------------------------------------------------

/// A certificate revocation list.
#[derive(Clone, Debug)]
pub struct Crl {
    der: Bytes,
    issuer: Bytes,
    next_update: Option<DateTime<Utc>>,
    revoked: Vec<Vec<u8>>,
}

impl Crl {
    pub fn from_der(der: impl Into<Bytes>) -> SecurityResult<Self> {
        let der = der.into();
        let (_, crl) = CertificateRevocationList::from_der(&der)
            .map_err(SecurityError::invalid_crl)?;
        let next_update = match crl.next_update() {
            Some(time) => Some(
                DateTime::from_timestamp(time.timestamp(), 0).ok_or_else(
                    || SecurityError::invalid_crl("time out of range"),
                )?,
            ),
            None => None,
        };
        let revoked = crl
            .iter_revoked_certificates()
            .map(|entry| entry.user_certificate.to_bytes_be())
            .collect();
        Ok(Crl {
            issuer: Bytes::copy_from_slice(crl.issuer().as_raw()),
            next_update,
            revoked,
            der: der.clone(),
        })
    }

    pub fn from_pem(pem: &[u8]) -> SecurityResult<Self> {
        let crl = X509Crl::from_pem(pem).map_err(SecurityError::invalid_crl)?;
        Self::from_der(crl.to_der()?)
    }

    /// Reads a CRL in either PEM or DER encoding.
    pub fn from_slice(bytes: &[u8]) -> SecurityResult<Self> {
        if bytes.starts_with(b"-----BEGIN") {
            Self::from_pem(bytes)
        } else {
            Self::from_der(Bytes::copy_from_slice(bytes))
        }
    }

    /// The DER encoded issuer name.
    pub fn issuer(&self) -> &[u8] {
        self.issuer.as_ref()
    }

    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.next_update
    }

    /// A CRL without a next update time never goes stale.
    pub fn is_current_at(&self, time: DateTime<Utc>) -> bool {
        self.next_update.is_none_or(|next| time <= next)
    }

    pub fn is_revoked(&self, cert: &Certificate) -> bool {
        self.revoked.iter().any(|serial| serial.as_slice() == cert.serial())
    }

    /// Returns whether `issuer` names and signed this CRL.
    pub fn is_issued_by(&self, issuer: &Certificate) -> SecurityResult<bool> {
        if self.issuer != issuer.subject {
            return Ok(false);
        }
        let crl = X509Crl::from_der(&self.der)?;
        let key = issuer.public_key.to_pkey()?;
        Ok(crl.verify(&key)?)
    }
}

//------------ X509Credential ------------------------------------------------

/// The credential of a peer presented for validation.
#[derive(Clone, Debug)]
pub struct X509Credential {
    entity_id: Option<String>,
    entity_certificate: Certificate,
    public_key: Option<PublicKey>,
    chain: Vec<Certificate>,
    crls: Vec<Crl>,
}

impl X509Credential {
    pub fn new(entity_certificate: Certificate) -> Self {
        X509Credential {
            entity_id: None,
            chain: vec![entity_certificate.clone()],
            entity_certificate,
            public_key: None,
            crls: Vec::new(),
        }
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Sets the certificates presented along with the entity certificate.
    ///
    /// The entity certificate is always part of the chain.
    pub fn with_chain(mut self, chain: Vec<Certificate>) -> Self {
        self.chain = chain;
        if !self.chain.contains(&self.entity_certificate) {
            self.chain.insert(0, self.entity_certificate.clone());
        }
        self
    }

    pub fn with_crls(mut self, crls: Vec<Crl>) -> Self {
        self.crls = crls;
        self
    }

    /// Sets a public key held in addition to the certificate's.
    pub fn with_public_key(mut self, key: PublicKey) -> Self {
        self.public_key = Some(key);
        self
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn entity_certificate(&self) -> &Certificate {
        &self.entity_certificate
    }

    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    pub fn crls(&self) -> &[Crl] {
        &self.crls
    }

    /// The keys this credential could be trusted through.
    pub fn candidate_keys(&self) -> Vec<&PublicKey> {
        let mut keys: Vec<&PublicKey> = self.public_key.iter().collect();
        let cert_key = self.entity_certificate.public_key();
        if !keys.contains(&cert_key) {
            keys.push(cert_key);
        }
        keys
    }
}

//------------ Tests ---------------------------------------------------------
