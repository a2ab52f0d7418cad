//! Configuration of providers, trust and logging.
use std::{
    collections::HashSet,
    env, fmt, io,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use chrono::TimeDelta;
use log::{LevelFilter, error, info};
use serde::{Deserialize, Deserializer, de};

use crate::{
    commons::util::{
        ext_serde,
        file::{self, FileError},
        httpclient::{BasicAuth, HttpClientConfig},
    },
    constants::*,
    metadata::{
        MetadataProvider, ProviderError, RoleType,
        filter::{EntityRoleFilter, MetadataFilterChain, RequiredValidUntilFilter},
        provider::{
            ChainingMetadataProvider, FileBackedHttpSource, FileResource,
            FilesystemSource, HttpMetadataSource, InitializationPolicy,
            MetadataSource, RefreshSettings, RefreshingMetadataProvider,
            ResourceSource,
        },
    },
    security::{
        Certificate, Crl, PkixValidationInformation,
        PkixX509CredentialTrustEngine, SecurityError,
        pkix::StaticPkixValidationInformationResolver,
    },
};

//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn log_level() -> LevelFilter {
        match env::var(FEDMETA_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}",
                        FEDMETA_ENV_LOG_LEVEL
                    );
                    LevelFilter::Warn
                }
            },
            _ => LevelFilter::Warn,
        }
    }

    fn log_type() -> LogType {
        LogType::Stderr
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./fedmeta.log")
    }

    fn syslog_facility() -> String {
        "daemon".to_string()
    }

    fn require_valid_metadata() -> bool {
        true
    }

    fn fail_fast_initialization() -> bool {
        true
    }

    fn timeout_secs() -> u64 {
        HTTP_CLIENT_TIMEOUT_SECS
    }

    fn max_cache_duration_secs() -> i64 {
        DEFAULT_MAX_CACHE_DURATION_SECS
    }

    fn min_refresh_delay_secs() -> i64 {
        DEFAULT_MIN_REFRESH_DELAY_SECS
    }

    fn max_refresh_delay_secs() -> i64 {
        DEFAULT_MAX_REFRESH_DELAY_SECS
    }

    fn refresh_delay_factor() -> f64 {
        DEFAULT_REFRESH_DELAY_FACTOR
    }

    fn maintain_expired_metadata() -> bool {
        true
    }

    fn remove_roleless_entities() -> bool {
        true
    }

    fn remove_empty_groups() -> bool {
        true
    }

    fn verification_depth() -> usize {
        DEFAULT_VERIFY_DEPTH
    }

    fn check_names() -> bool {
        true
    }
}

//------------ Config --------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "ext_serde::de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    #[serde(default = "ConfigDefaults::syslog_facility")]
    pub syslog_facility: String,

    #[serde(default = "ConfigDefaults::require_valid_metadata")]
    pub require_valid_metadata: bool,

    #[serde(default = "ConfigDefaults::fail_fast_initialization")]
    pub fail_fast_initialization: bool,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    pub trust: Option<TrustConfig>,
}

/// # Loading
impl Config {
    /// Reads and verifies the config file at `path`.
    pub fn parse(path: &Path) -> Result<Self, ConfigError> {
        let bytes = file::read(path)?;
        let text = std::str::from_utf8(&bytes).map_err(|e| {
            ConfigError::Other(format!(
                "Config file {} is not UTF-8: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse_str(text)
    }

    pub fn parse_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.verify()?;
        Ok(config)
    }

    /// Checks what can be checked without touching the network.
    pub fn verify(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(ConfigError::other("provider without a name"));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(ConfigError::Other(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
            provider.verify()?;
        }
        if let Some(trust) = &self.trust {
            if trust.anchors.is_empty() {
                return Err(ConfigError::other(
                    "the trust section needs at least one anchor file",
                ));
            }
        }
        Ok(())
    }
}

/// # Building components
impl Config {
    /// Creates and initializes a chain of all configured providers.
    ///
    /// Members are initialized in order, so a member failing under the
    /// fail fast policy stops the whole chain from being built.
    pub fn metadata_provider(
        &self,
    ) -> Result<ChainingMetadataProvider, ConfigError> {
        let chain = ChainingMetadataProvider::new("fedmeta");
        for provider_config in &self.providers {
            let provider = provider_config.build(self)?;
            provider.set_require_valid_metadata(self.require_valid_metadata);
            provider
                .initialize()
                .map_err(|e| ConfigError::provider(&provider_config.name, e))?;
            chain.add_metadata_provider(provider);
        }
        chain.set_require_valid_metadata(self.require_valid_metadata);
        chain
            .initialize()
            .map_err(|e| ConfigError::provider("fedmeta", e))?;
        Ok(chain)
    }

    /// Creates the PKIX trust engine, if trust is configured.
    pub fn trust_engine(
        &self,
    ) -> Result<Option<PkixX509CredentialTrustEngine>, ConfigError> {
        let Some(trust) = &self.trust else {
            return Ok(None);
        };

        let mut anchors = Vec::new();
        for path in &trust.anchors {
            let certs = Certificate::list_from_pem(&file::read(path)?)
                .map_err(|e| ConfigError::security(path, e))?;
            if certs.is_empty() {
                return Err(ConfigError::Other(format!(
                    "no certificates in anchor file {}",
                    path.display()
                )));
            }
            anchors.extend(certs);
        }
        let mut crls = Vec::new();
        for path in &trust.crls {
            crls.push(
                Crl::from_slice(&file::read(path)?)
                    .map_err(|e| ConfigError::security(path, e))?,
            );
        }

        let info = PkixValidationInformation::new(anchors)
            .with_crls(crls)
            .with_verification_depth(trust.verification_depth);
        let resolver = StaticPkixValidationInformationResolver::new(vec![info]);
        Ok(Some(
            PkixX509CredentialTrustEngine::new(Arc::new(resolver))
                .with_name_check(trust.check_names),
        ))
    }
}

/// # Logging
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
            LogType::Syslog => self.syslog_logger(),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger().chain(io::stderr()).apply().map_err(|e| {
            ConfigError::Other(format!("Failed to init stderr logging: {}", e))
        })
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!(
                    "Failed to open log file '{}': {}",
                    path.display(),
                    err
                );
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger().chain(file).apply().map_err(|e| {
            ConfigError::Other(format!("Failed to init file logging: {}", e))
        })
    }

    /// Creates a syslog logger and configures correctly.
    #[cfg(unix)]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        let facility = syslog::Facility::from_str(&self.syslog_facility)
            .map_err(|_| ConfigError::other("Invalid syslog_facility"))?;
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from("fedmeta"));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| {
                syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514))
            });
        match logger {
            Ok(logger) => {
                self.fern_logger().chain(logger).apply().map_err(|e| {
                    ConfigError::Other(format!("Failed to init syslog: {}", e))
                })
            }
            Err(err) => {
                let msg = format!("Cannot connect to syslog: {}", err);
                Err(ConfigError::Other(msg))
            }
        }
    }

    #[cfg(not(unix))]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        Err(ConfigError::other("syslog is only supported on unix"))
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging
        let framework_level = self.log_level.min(LevelFilter::Warn);
        let parser_level = self.log_level.min(LevelFilter::Debug);

        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("rustls", framework_level)
            .level_for("hyper", framework_level)
            .level_for("hyper_util", framework_level)
            .level_for("mio", framework_level)
            .level_for("reqwest", framework_level)
            .level_for("want", framework_level)
            .level_for("h2", framework_level)
            .level_for("fedmeta::metadata::parser", parser_level)
    }
}

//------------ ProviderConfig ------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub provider_type: ProviderType,

    /// The metadata URL of an `http` provider.
    pub url: Option<String>,

    /// The metadata file of a `file` or `resource` provider.
    pub path: Option<PathBuf>,

    /// Where an `http` provider keeps a copy to fall back on.
    pub backing_file: Option<PathBuf>,

    #[serde(default = "ConfigDefaults::timeout_secs")]
    pub timeout_secs: u64,

    pub basic_auth: Option<BasicAuthConfig>,

    /// Additional PEM root certificates for HTTPS.
    #[serde(default)]
    pub root_certs: Vec<String>,

    #[serde(default = "ConfigDefaults::max_cache_duration_secs")]
    pub max_cache_duration_secs: i64,

    #[serde(default = "ConfigDefaults::min_refresh_delay_secs")]
    pub min_refresh_delay_secs: i64,

    #[serde(default = "ConfigDefaults::max_refresh_delay_secs")]
    pub max_refresh_delay_secs: i64,

    #[serde(default = "ConfigDefaults::refresh_delay_factor")]
    pub refresh_delay_factor: f64,

    #[serde(default = "ConfigDefaults::maintain_expired_metadata")]
    pub maintain_expired_metadata: bool,

    /// Overrides the global setting for this provider.
    pub fail_fast_initialization: Option<bool>,

    pub required_valid_until: Option<RequiredValidUntilConfig>,

    pub retain_roles: Option<RetainRolesConfig>,
}

impl ProviderConfig {
    fn verify(&self) -> Result<(), ConfigError> {
        let missing = |what: &str| {
            ConfigError::Other(format!(
                "provider '{}' of type {} needs '{}'",
                self.name, self.provider_type, what
            ))
        };
        match self.provider_type {
            ProviderType::Http => {
                if self.url.is_none() {
                    return Err(missing("url"));
                }
            }
            ProviderType::File | ProviderType::Resource => {
                if self.path.is_none() {
                    return Err(missing("path"));
                }
            }
        }
        self.refresh_settings()
            .validate()
            .map_err(|e| ConfigError::provider(&self.name, e))
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            max_cache_duration: seconds(self.max_cache_duration_secs),
            min_refresh_delay: seconds(self.min_refresh_delay_secs),
            max_refresh_delay: seconds(self.max_refresh_delay_secs),
            refresh_delay_factor: self.refresh_delay_factor,
            maintain_expired_metadata: self.maintain_expired_metadata,
        }
    }

    fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            root_certs: self.root_certs.clone(),
            ..Default::default()
        }
    }

    fn filter(&self) -> MetadataFilterChain {
        let mut chain = MetadataFilterChain::default();
        if let Some(required) = &self.required_valid_until {
            chain.push(RequiredValidUntilFilter::new(
                required.max_validity_interval_secs.map(seconds),
            ));
        }
        if let Some(retain) = &self.retain_roles {
            chain.push(
                EntityRoleFilter::new(
                    retain.roles.iter().map(|role| role.qname()).collect(),
                )
                .with_remove_roleless_entities(retain.remove_roleless_entities)
                .with_remove_empty_groups(retain.remove_empty_groups),
            );
        }
        chain
    }

    /// Creates the provider described by this config.
    pub fn build(
        &self,
        config: &Config,
    ) -> Result<Arc<dyn MetadataProvider>, ConfigError> {
        let err = |e: ProviderError| ConfigError::provider(&self.name, e);
        match self.provider_type {
            ProviderType::Http => {
                let url = self.url.as_deref().unwrap_or_default();
                let mut http =
                    HttpMetadataSource::new(url, &self.http_client_config())
                        .map_err(err)?;
                if let Some(auth) = &self.basic_auth {
                    http = http.with_basic_auth(BasicAuth {
                        username: auth.username.clone(),
                        password: auth.password.clone(),
                    });
                }
                match &self.backing_file {
                    Some(backing_file) => {
                        let source =
                            FileBackedHttpSource::new(http, backing_file.clone())
                                .map_err(err)?;
                        self.finish(config, source)
                    }
                    None => self.finish(config, http),
                }
            }
            ProviderType::File => {
                let path = self.path.clone().unwrap_or_default();
                self.finish(config, FilesystemSource::new(path).map_err(err)?)
            }
            ProviderType::Resource => {
                let path = self.path.clone().unwrap_or_default();
                let resource = Arc::new(FileResource::new(path));
                self.finish(config, ResourceSource::new(resource))
            }
        }
    }

    fn finish<S: MetadataSource + 'static>(
        &self,
        config: &Config,
        source: S,
    ) -> Result<Arc<dyn MetadataProvider>, ConfigError> {
        let policy = InitializationPolicy::from_fail_fast(
            self.fail_fast_initialization
                .unwrap_or(config.fail_fast_initialization),
        );
        let mut provider = RefreshingMetadataProvider::with_source(&self.name, source)
            .with_settings(self.refresh_settings())
            .map_err(|e| ConfigError::provider(&self.name, e))?
            .with_policy(policy);
        let filter = self.filter();
        if !filter.is_empty() {
            provider = provider.with_filter(Arc::new(filter));
        }
        info!(
            "Configured {} provider '{}' for {}",
            self.provider_type,
            self.name,
            provider.source().locator()
        );
        Ok(Arc::new(provider))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderType {
    Http,
    File,
    Resource,
}

impl<'de> Deserialize<'de> for ProviderType {
    fn deserialize<D>(d: D) -> Result<ProviderType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "http" => Ok(ProviderType::Http),
            "file" => Ok(ProviderType::File),
            "resource" => Ok(ProviderType::Resource),
            _ => Err(de::Error::custom(format!(
                "expected \"http\", \"file\" or \"resource\", found: \"{}\"",
                string
            ))),
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProviderType::Http => write!(f, "http"),
            ProviderType::File => write!(f, "file"),
            ProviderType::Resource => write!(f, "resource"),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BasicAuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RequiredValidUntilConfig {
    /// How far `validUntil` may lie in the future, if limited.
    pub max_validity_interval_secs: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RetainRolesConfig {
    pub roles: Vec<RoleType>,

    #[serde(default = "ConfigDefaults::remove_roleless_entities")]
    pub remove_roleless_entities: bool,

    #[serde(default = "ConfigDefaults::remove_empty_groups")]
    pub remove_empty_groups: bool,
}

/// Converts configured seconds, saturating values out of range so that
/// validation rejects them.
fn seconds(secs: i64) -> TimeDelta {
    TimeDelta::try_seconds(secs).unwrap_or(if secs < 0 {
        TimeDelta::MIN
    } else {
        TimeDelta::MAX
    })
}

//------------ TrustConfig ---------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct TrustConfig {
    /// PEM files with trust anchor certificates.
    pub anchors: Vec<PathBuf>,

    /// CRL files, PEM or DER.
    #[serde(default)]
    pub crls: Vec<PathBuf>,

    #[serde(default = "ConfigDefaults::verification_depth")]
    pub verification_depth: usize,

    #[serde(default = "ConfigDefaults::check_names")]
    pub check_names: bool,
}

//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\", \"file\" or \"syslog\", found: \"{}\"",
                string
            ))),
        }
    }
}

//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    FileError(FileError),
    TomlError(toml::de::Error),
    Provider(String, ProviderError),
    Security(String, SecurityError),
    Other(String),
}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }

    fn provider(name: &str, e: ProviderError) -> Self {
        ConfigError::Provider(name.to_string(), e)
    }

    fn security(path: &Path, e: SecurityError) -> Self {
        ConfigError::Security(path.display().to_string(), e)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::FileError(e) => write!(f, "{}", e),
            ConfigError::TomlError(e) => write!(f, "{}", e),
            ConfigError::Provider(name, e) => {
                write!(f, "Provider '{}': {}", name, e)
            }
            ConfigError::Security(path, e) => write!(f, "{}: {}", path, e),
            ConfigError::Other(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<FileError> for ConfigError {
    fn from(e: FileError) -> Self {
        ConfigError::FileError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}

//------------ Tests ---------------------------------------------------------
