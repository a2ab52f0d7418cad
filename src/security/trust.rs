//! Trust engines deciding whether to accept a peer's credential.
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};

use super::{
    credential::{Certificate, X509Credential},
    error::SecurityResult,
    keyinfo::{InlineKeyResolver, KeyInfoSource, KeyResolver, ResolvedKeys},
    pkix::{
        BasicCertPathValidator, CertPathValidator,
        PkixValidationInformationResolver,
    },
};

//------------ TrustEngine ---------------------------------------------------

/// Evaluates a credential against what is known about a peer.
pub trait TrustEngine: Send + Sync {
    /// Returns whether the credential is trusted.
    ///
    /// If no resolver is given, the engine's default resolver is used. An
    /// error means key material could not be decoded, never that the
    /// credential is untrusted.
    fn validate(
        &self,
        credential: &X509Credential,
        source: &dyn KeyInfoSource,
        resolver: Option<&dyn KeyResolver>,
    ) -> SecurityResult<bool>;
}

//------------ BasicX509CredentialTrustEngine --------------------------------

/// Trusts a credential holding one of the keys known for the peer.
pub struct BasicX509CredentialTrustEngine {
    resolver: Arc<dyn KeyResolver>,
}

impl BasicX509CredentialTrustEngine {
    pub fn new(resolver: Arc<dyn KeyResolver>) -> Self {
        BasicX509CredentialTrustEngine { resolver }
    }
}

impl Default for BasicX509CredentialTrustEngine {
    fn default() -> Self {
        Self::new(Arc::new(InlineKeyResolver))
    }
}

impl TrustEngine for BasicX509CredentialTrustEngine {
    fn validate(
        &self,
        credential: &X509Credential,
        source: &dyn KeyInfoSource,
        resolver: Option<&dyn KeyResolver>,
    ) -> SecurityResult<bool> {
        let resolver = resolver.unwrap_or(self.resolver.as_ref());
        let resolved = ResolvedKeys::from_source(source, resolver)?;
        let trusted: Vec<_> = resolved.keys().collect();
        let peer = source.name().unwrap_or("unnamed peer");

        if trusted.is_empty() {
            warn!("No trusted keys known for {}", peer);
            return Ok(false);
        }

        let res = credential
            .candidate_keys()
            .into_iter()
            .any(|key| trusted.contains(&key));
        if res {
            debug!("Credential of {} matches a trusted key", peer);
        } else {
            info!(
                "Credential '{}' of {} matches none of {} trusted keys",
                credential.entity_certificate(),
                peer,
                trusted.len()
            );
        }
        Ok(res)
    }
}

//------------ PkixX509CredentialTrustEngine ---------------------------------

/// Trusts a credential with a valid certification path to an anchor.
pub struct PkixX509CredentialTrustEngine {
    info_resolver: Arc<dyn PkixValidationInformationResolver>,
    resolver: Arc<dyn KeyResolver>,
    validator: Arc<dyn CertPathValidator>,
    check_names: bool,
}

impl PkixX509CredentialTrustEngine {
    pub fn new(info_resolver: Arc<dyn PkixValidationInformationResolver>) -> Self {
        PkixX509CredentialTrustEngine {
            info_resolver,
            resolver: Arc::new(InlineKeyResolver),
            validator: Arc::new(BasicCertPathValidator),
            check_names: true,
        }
    }

    pub fn with_key_resolver(mut self, resolver: Arc<dyn KeyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn CertPathValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Enables or disables matching the certificate against trusted names.
    pub fn with_name_check(mut self, check_names: bool) -> Self {
        self.check_names = check_names;
        self
    }

    pub fn checks_names(&self) -> bool {
        self.check_names
    }

    /// The peer name and all key names of the source.
    fn trusted_names(
        source: &dyn KeyInfoSource,
        resolver: &dyn KeyResolver,
    ) -> SecurityResult<Vec<String>> {
        let mut names: Vec<String> =
            source.name().map(String::from).into_iter().collect();
        for name in ResolvedKeys::from_source(source, resolver)?.key_names {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

/// Returns whether the certificate carries one of the names.
///
/// The first common name of the subject is considered, as are all DNS
/// names and URIs of the subject alternative name.
fn matches_names(cert: &Certificate, names: &[String]) -> bool {
    let trusted = |candidate: &str| names.iter().any(|name| name == candidate);
    cert.common_name().is_some_and(trusted)
        || cert.dns_names().iter().any(|dns| trusted(dns))
        || cert.uris().iter().any(|uri| trusted(uri))
}

impl TrustEngine for PkixX509CredentialTrustEngine {
    fn validate(
        &self,
        credential: &X509Credential,
        source: &dyn KeyInfoSource,
        resolver: Option<&dyn KeyResolver>,
    ) -> SecurityResult<bool> {
        let resolver = resolver.unwrap_or(self.resolver.as_ref());
        let cert = credential.entity_certificate();
        let peer = source.name();

        if self.check_names {
            let names = Self::trusted_names(source, resolver)?;
            if names.is_empty() {
                debug!("No trusted names for '{}', skipping name check", cert);
            } else if !matches_names(cert, &names) {
                warn!(
                    "Certificate '{}' does not match any trusted name of {}",
                    cert,
                    peer.unwrap_or("unnamed peer")
                );
                return Ok(false);
            }
        }

        let now = Utc::now();
        for info in self.info_resolver.resolve(peer)? {
            if info.anchors().is_empty() {
                warn!("Skipping validation information without trust anchors");
                continue;
            }
            match self.validator.validate(credential, &info, now) {
                Ok(path) => {
                    debug!(
                        "Certificate '{}' validated over a path of {} certificates",
                        cert,
                        path.len()
                    );
                    return Ok(true);
                }
                Err(err) => {
                    debug!("Certificate '{}' not validated: {}", cert, err)
                }
            }
        }

        info!("No valid certification path for certificate '{}'", cert);
        Ok(false)
    }
}

//------------ Tests ---------------------------------------------------------
