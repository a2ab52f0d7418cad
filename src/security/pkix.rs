//! Certification path building and validation.
use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use log::{debug, trace};

use crate::constants::DEFAULT_VERIFY_DEPTH;

use super::{
    credential::{Certificate, Crl, X509Credential},
    error::SecurityResult,
};

//------------ PkixValidationInformation -------------------------------------

/// Trust anchors, CRLs and path limits to validate against.
#[derive(Clone, Debug)]
pub struct PkixValidationInformation {
    anchors: Vec<Certificate>,
    crls: Vec<Crl>,
    verification_depth: usize,
}

impl PkixValidationInformation {
    pub fn new(anchors: Vec<Certificate>) -> Self {
        PkixValidationInformation {
            anchors,
            crls: Vec::new(),
            verification_depth: DEFAULT_VERIFY_DEPTH,
        }
    }

    pub fn with_crls(mut self, crls: Vec<Crl>) -> Self {
        self.crls = crls;
        self
    }

    /// Sets how many intermediate certificates may sit between the end
    /// entity and the trust anchor.
    pub fn with_verification_depth(mut self, depth: usize) -> Self {
        self.verification_depth = depth;
        self
    }

    pub fn anchors(&self) -> &[Certificate] {
        &self.anchors
    }

    pub fn crls(&self) -> &[Crl] {
        &self.crls
    }

    pub fn verification_depth(&self) -> usize {
        self.verification_depth
    }
}

//------------ PkixValidationInformationResolver -----------------------------

/// Provides the validation information to use for a peer.
pub trait PkixValidationInformationResolver: Send + Sync {
    fn resolve(
        &self,
        peer: Option<&str>,
    ) -> SecurityResult<Vec<Arc<PkixValidationInformation>>>;
}

/// Uses the same validation information for every peer.
#[derive(Clone, Debug, Default)]
pub struct StaticPkixValidationInformationResolver {
    infos: Vec<Arc<PkixValidationInformation>>,
}

impl StaticPkixValidationInformationResolver {
    pub fn new(infos: Vec<PkixValidationInformation>) -> Self {
        StaticPkixValidationInformationResolver {
            infos: infos.into_iter().map(Arc::new).collect(),
        }
    }
}

impl PkixValidationInformationResolver for StaticPkixValidationInformationResolver {
    fn resolve(
        &self,
        _peer: Option<&str>,
    ) -> SecurityResult<Vec<Arc<PkixValidationInformation>>> {
        Ok(self.infos.clone())
    }
}

/// Picks validation information by peer name, with a fallback.
#[derive(Clone, Debug, Default)]
pub struct PeerPkixValidationInformationResolver {
    peers: HashMap<String, Vec<Arc<PkixValidationInformation>>>,
    default: Vec<Arc<PkixValidationInformation>>,
}

impl PeerPkixValidationInformationResolver {
    pub fn new(default: Vec<PkixValidationInformation>) -> Self {
        PeerPkixValidationInformationResolver {
            peers: HashMap::new(),
            default: default.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn add_peer(
        &mut self,
        peer: impl Into<String>,
        info: PkixValidationInformation,
    ) {
        self.peers
            .entry(peer.into())
            .or_default()
            .push(Arc::new(info));
    }
}

impl PkixValidationInformationResolver for PeerPkixValidationInformationResolver {
    fn resolve(
        &self,
        peer: Option<&str>,
    ) -> SecurityResult<Vec<Arc<PkixValidationInformation>>> {
        Ok(peer
            .and_then(|peer| self.peers.get(peer))
            .unwrap_or(&self.default)
            .clone())
    }
}

//------------ PathError -----------------------------------------------------

/// Why no valid path to a trust anchor was found.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PathError {
    NoTrustAnchors,
    NoPath,
    DepthExceeded(usize),
    NotValidAt(String),
    NotCa(String),
    PathLength(String),
    KeyUsage(String),
    Revoked(String),
    NoCrl(String),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PathError::NoTrustAnchors => write!(f, "no trust anchors"),
            PathError::NoPath => write!(f, "no path to a trust anchor"),
            PathError::DepthExceeded(depth) => write!(
                f,
                "no path to a trust anchor within {} intermediates",
                depth
            ),
            PathError::NotValidAt(cert) => {
                write!(f, "certificate '{}' is expired or not yet valid", cert)
            }
            PathError::NotCa(cert) => {
                write!(f, "certificate '{}' is not a CA", cert)
            }
            PathError::PathLength(cert) => {
                write!(f, "path length constraint of '{}' exceeded", cert)
            }
            PathError::KeyUsage(cert) => {
                write!(f, "key usage of '{}' does not allow signing", cert)
            }
            PathError::Revoked(cert) => {
                write!(f, "certificate '{}' is revoked", cert)
            }
            PathError::NoCrl(cert) => write!(
                f,
                "no current CRL for the issuer of certificate '{}'",
                cert
            ),
        }
    }
}

//------------ CertPathValidator ---------------------------------------------

/// Builds and validates a path from a credential to a trust anchor.
pub trait CertPathValidator: Send + Sync {
    /// Returns the validated path, starting at the entity certificate and
    /// ending at the trust anchor.
    fn validate(
        &self,
        credential: &X509Credential,
        info: &PkixValidationInformation,
        time: DateTime<Utc>,
    ) -> Result<Vec<Certificate>, PathError>;
}

//------------ BasicCertPathValidator ----------------------------------------

/// Path building over the credential's certificates.
///
/// Every candidate issuer among the credential's chain and the anchors is
/// tried, depth first. Revocation is checked for every certificate in a
/// path if the credential or the validation information has any CRL, in
/// which case a current CRL for each issuer is required.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicCertPathValidator;

struct PathContext<'a> {
    info: &'a PkixValidationInformation,
    pool: Vec<&'a Certificate>,
    crls: Vec<&'a Crl>,
    time: DateTime<Utc>,
}

impl CertPathValidator for BasicCertPathValidator {
    fn validate(
        &self,
        credential: &X509Credential,
        info: &PkixValidationInformation,
        time: DateTime<Utc>,
    ) -> Result<Vec<Certificate>, PathError> {
        if info.anchors.is_empty() {
            return Err(PathError::NoTrustAnchors);
        }

        let target = credential.entity_certificate();
        if !target.is_valid_at(time) {
            return Err(PathError::NotValidAt(target.to_string()));
        }
        if info.anchors.contains(target) {
            debug!("Certificate '{}' is itself a trust anchor", target);
            return Ok(vec![target.clone()]);
        }

        let ctx = PathContext {
            info,
            pool: credential.chain().iter().filter(|c| *c != target).collect(),
            crls: info.crls.iter().chain(credential.crls()).collect(),
            time,
        };
        let mut path = vec![target];
        ctx.extend(&mut path)?;
        Ok(path.into_iter().cloned().collect())
    }
}

impl<'a> PathContext<'a> {
    /// Extends the path until it ends in a trust anchor.
    fn extend(&self, path: &mut Vec<&'a Certificate>) -> Result<(), PathError> {
        let mut last_err = PathError::NoPath;
        let current = match path.last() {
            Some(current) => *current,
            None => return Err(last_err),
        };

        let info: &'a PkixValidationInformation = self.info;
        for anchor in &info.anchors {
            if !signed_by(current, anchor) {
                continue;
            }
            path.push(anchor);
            match self.check(path) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    trace!("Path via anchor '{}' rejected: {}", anchor, err);
                    last_err = err;
                }
            }
            path.pop();
        }

        let intermediates = path.len() - 1;
        for &candidate in &self.pool {
            if path.contains(&candidate) || !signed_by(current, candidate) {
                continue;
            }
            if intermediates >= info.verification_depth {
                if last_err == PathError::NoPath {
                    last_err = PathError::DepthExceeded(info.verification_depth);
                }
                continue;
            }
            path.push(candidate);
            match self.extend(path) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if last_err == PathError::NoPath || err != PathError::NoPath
                    {
                        last_err = err;
                    }
                }
            }
            path.pop();
        }

        Err(last_err)
    }

    /// Checks a complete path, the last element being the anchor.
    fn check(&self, path: &[&Certificate]) -> Result<(), PathError> {
        let anchor_pos = path.len() - 1;

        // non self-issued intermediates between the entity and the
        // certificate being checked
        let mut below = 0;
        for cert in path.iter().take(anchor_pos).skip(1) {
            if !cert.is_valid_at(self.time) {
                return Err(PathError::NotValidAt(cert.to_string()));
            }
            let constraints = cert
                .ca_constraints()
                .ok_or_else(|| PathError::NotCa(cert.to_string()))?;
            if !cert.may_sign_certificates() {
                return Err(PathError::KeyUsage(cert.to_string()));
            }
            if let Some(path_len) = constraints.path_len {
                if below > path_len as usize {
                    return Err(PathError::PathLength(cert.to_string()));
                }
            }
            if !cert.is_self_issued() {
                below += 1;
            }
        }

        if !self.crls.is_empty() {
            for window in path.windows(2) {
                self.check_revocation(window[0], window[1])?;
            }
        }
        Ok(())
    }

    fn check_revocation(
        &self,
        cert: &Certificate,
        issuer: &Certificate,
    ) -> Result<(), PathError> {
        let mut found = false;
        for crl in &self.crls {
            if !crl.is_current_at(self.time)
                || !issuer.may_sign_crls()
                || !crl.is_issued_by(issuer).unwrap_or(false)
            {
                continue;
            }
            found = true;
            if crl.is_revoked(cert) {
                return Err(PathError::Revoked(cert.to_string()));
            }
        }
        if found {
            Ok(())
        } else {
            Err(PathError::NoCrl(cert.to_string()))
        }
    }
}

fn signed_by(cert: &Certificate, issuer: &Certificate) -> bool {
    match cert.is_issued_by(issuer) {
        Ok(res) => res,
        Err(err) => {
            debug!("Cannot check signature on '{}': {}", cert, err);
            false
        }
    }
}

//------------ Tests ---------------------------------------------------------
