use std::{fmt, path::Path};

use log::{debug, info};

use crate::{
    cli::{
        options::{Command, Options, Verify},
        report::{ApiResponse, RefreshStatus, ReportError, VerifyOutcome},
    },
    commons::util::file::{self, FileError},
    config::{Config, ConfigError},
    metadata::{
        MetadataProvider, ProviderError, document::KeyUsage,
        provider::ChainingMetadataProvider,
    },
    security::{
        BasicX509CredentialTrustEngine, Certificate, RoleKeyInfoSource,
        SecurityError, StaticKeyInfoSource, TrustEngine, X509Credential,
    },
};

/// Command line tool for looking up metadata.
pub struct FedmetaClient {
    config: Config,
    provider: ChainingMetadataProvider,
}

impl FedmetaClient {
    /// Delegates the options to be processed, and reports the response
    /// back to the user. Note that error reporting is handled by CLI.
    pub fn report(options: Options) -> Result<(), Error> {
        let format = options.general.format;
        let res = Self::process(options)?;
        println!("{}", res.report(format)?);
        Ok(())
    }

    /// Processes the options, and returns a response ready for formatting.
    pub fn process(options: Options) -> Result<ApiResponse, Error> {
        let config = Config::parse(&options.general.config)?;
        config.init_logging()?;
        let client = Self::with_config(config)?;
        client.run(options.command)
    }

    /// Builds and initializes the providers of the config.
    pub fn with_config(config: Config) -> Result<Self, Error> {
        let provider = config.metadata_provider()?;
        Ok(FedmetaClient { config, provider })
    }

    pub fn provider(&self) -> &ChainingMetadataProvider {
        &self.provider
    }

    pub fn run(&self, command: Command) -> Result<ApiResponse, Error> {
        debug!("Running command: {:?}", command);
        match command {
            Command::Entity(entity) => {
                Ok(match self.provider.entity_descriptor(&entity.entity_id)? {
                    Some(found) => ApiResponse::Entity(found),
                    None => ApiResponse::NotFound(entity.entity_id),
                })
            }
            Command::Group(group) => {
                Ok(match self.provider.entities_descriptor(&group.name)? {
                    Some(found) => ApiResponse::Group(found),
                    None => ApiResponse::NotFound(group.name),
                })
            }
            Command::Roles(roles) => {
                let role = roles.role.qname();
                let found = match &roles.protocol {
                    Some(protocol) => self
                        .provider
                        .role(&roles.entity_id, &role, protocol)?
                        .into_iter()
                        .collect(),
                    None => self.provider.roles(&roles.entity_id, &role)?,
                };
                if found.is_empty() {
                    Ok(ApiResponse::NotFound(format!(
                        "{} roles of {}",
                        role.local_name(),
                        roles.entity_id
                    )))
                } else {
                    Ok(ApiResponse::Roles(found))
                }
            }
            Command::Refresh => Ok(ApiResponse::Refreshed(self.refresh())),
            Command::Verify(verify) => self.verify(verify).map(ApiResponse::Verified),
        }
    }

    fn refresh(&self) -> Vec<RefreshStatus> {
        let mut res = Vec::new();
        for member in self.provider.providers() {
            let Some(refreshable) = member.as_refreshable() else {
                continue;
            };
            let error = refreshable.refresh().err().map(|e| e.to_string());
            res.push(RefreshStatus {
                provider: member.name().to_string(),
                error,
                last_update: refreshable.last_update(),
                next_refresh: refreshable.next_refresh(),
            });
        }
        res
    }

    fn verify(&self, verify: Verify) -> Result<VerifyOutcome, Error> {
        let credential = Self::load_credential(&verify)?;
        let subject = credential.entity_certificate().subject_name().to_string();

        let (engine, trusted) = match verify.metadata_role {
            Some(role) => {
                let source = RoleKeyInfoSource::from_provider(
                    &self.provider,
                    &verify.peer,
                    &role.qname(),
                    &verify.protocol,
                    KeyUsage::Signing,
                )?;
                let trusted = match source {
                    Some(source) => BasicX509CredentialTrustEngine::default()
                        .validate(&credential, &source, None)?,
                    None => false,
                };
                ("metadata", trusted)
            }
            None => {
                let engine = self.config.trust_engine()?.ok_or_else(|| {
                    Error::other("no trust section in the configuration")
                })?;
                let source = StaticKeyInfoSource::named(&verify.peer);
                ("pkix", engine.validate(&credential, &source, None)?)
            }
        };
        info!(
            "Certificate '{}' for {}: trusted = {}",
            subject, verify.peer, trusted
        );
        Ok(VerifyOutcome {
            peer: verify.peer,
            subject,
            engine,
            trusted,
        })
    }

    fn load_credential(verify: &Verify) -> Result<X509Credential, Error> {
        let mut certs = Self::load_certs(&verify.cert)?.into_iter();
        let entity = certs.next().ok_or_else(|| {
            Error::Other(format!(
                "no certificate in {}",
                verify.cert.display()
            ))
        })?;
        let mut chain: Vec<Certificate> = certs.collect();
        for path in &verify.chain {
            chain.extend(Self::load_certs(path)?);
        }
        Ok(X509Credential::new(entity)
            .with_entity_id(verify.peer.clone())
            .with_chain(chain))
    }

    fn load_certs(path: &Path) -> Result<Vec<Certificate>, Error> {
        Ok(Certificate::list_from_pem(&file::read(path)?)?)
    }
}

//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    Config(ConfigError),
    Provider(ProviderError),
    Security(SecurityError),
    File(FileError),
    Report(ReportError),
    Other(String),
}

impl Error {
    pub fn other(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Provider(e) => write!(f, "Metadata error: {}", e),
            Error::Security(e) => write!(f, "Trust error: {}", e),
            Error::File(e) => write!(f, "{}", e),
            Error::Report(e) => write!(f, "{}", e),
            Error::Other(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for Error {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<ProviderError> for Error {
    fn from(e: ProviderError) -> Self {
        Error::Provider(e)
    }
}

impl From<SecurityError> for Error {
    fn from(e: SecurityError) -> Self {
        Error::Security(e)
    }
}

impl From<FileError> for Error {
    fn from(e: FileError) -> Self {
        Error::File(e)
    }
}

impl From<ReportError> for Error {
    fn from(e: ReportError) -> Self {
        Error::Report(e)
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::options::{Entity, Group, Roles};
    use crate::metadata::RoleType;
    use crate::test::{self, TestCa};

    fn client(dir: &Path, trust: Option<&Path>) -> FedmetaClient {
        let metadata = dir.join("federation.xml");
        file::save(test::FEDERATION_XML, &metadata).unwrap();
        let mut toml = format!(
            "[[providers]]\nname = \"federation\"\ntype = \"file\"\npath = \"{}\"\n",
            metadata.display()
        );
        if let Some(anchors) = trust {
            toml.push_str(&format!(
                "[trust]\nanchors = [\"{}\"]\ncheck_names = false\n",
                anchors.display()
            ));
        }
        FedmetaClient::with_config(Config::parse_str(&toml).unwrap()).unwrap()
    }

    #[test]
    fn lookups() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path(), None);

        let res = client
            .run(Command::Entity(Entity {
                entity_id: "https://sp.example.org/sp".into(),
            }))
            .unwrap();
        assert!(matches!(res, ApiResponse::Entity(_)));

        let res = client
            .run(Command::Group(Group {
                name: "urn:example:nested".into(),
            }))
            .unwrap();
        assert!(matches!(res, ApiResponse::Group(_)));

        let res = client
            .run(Command::Roles(Roles {
                entity_id: "https://idp.example.org/idp".into(),
                role: RoleType::Sp,
                protocol: None,
            }))
            .unwrap();
        assert!(matches!(res, ApiResponse::NotFound(_)));

        let res = client.run(Command::Refresh).unwrap();
        match res {
            ApiResponse::Refreshed(list) => {
                assert_eq!(list.len(), 1);
                assert!(list[0].error.is_none());
                assert!(list[0].last_update.is_some());
            }
            _ => panic!("expected refresh report"),
        }
    }

    #[test]
    fn verify_with_pkix() {
        let dir = tempfile::tempdir().unwrap();
        let ca = TestCa::root("Client Root");
        let anchors = dir.path().join("anchors.pem");
        file::save(ca.pem().as_bytes(), &anchors).unwrap();
        let cert = dir.path().join("peer.pem");
        let peer = ca.leaf("peer.example.org", &[]);
        file::save(pem_of(&peer).as_bytes(), &cert).unwrap();

        let client = client(dir.path(), Some(&anchors));
        let res = client
            .run(Command::Verify(Verify {
                peer: "urn:peer".into(),
                cert: cert.clone(),
                chain: vec![],
                metadata_role: None,
                protocol: crate::constants::SAML20P_NS.into(),
            }))
            .unwrap();
        match res {
            ApiResponse::Verified(outcome) => {
                assert!(outcome.trusted);
                assert_eq!(outcome.engine, "pkix");
            }
            _ => panic!("expected verify report"),
        }

        // without a trust section pkix verification is not possible
        let client = self::client(dir.path(), None);
        assert!(client
            .run(Command::Verify(Verify {
                peer: "urn:peer".into(),
                cert,
                chain: vec![],
                metadata_role: None,
                protocol: crate::constants::SAML20P_NS.into(),
            }))
            .is_err());
    }

    fn pem_of(cert: &Certificate) -> String {
        openssl::x509::X509::from_der(cert.to_der())
            .and_then(|x509| x509.to_pem())
            .map(|pem| String::from_utf8(pem).unwrap())
            .unwrap()
    }
}
