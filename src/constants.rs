//! Various crate-wide constants.

//------------ Versions -----------------------------------------------------

/// The full version of this crate.
pub const FEDMETA_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The friendly name of the `fedmeta` binary.
pub const FEDMETA_CLIENT_APP: &str = "Federation Metadata Client";

//------------ Config Files Paths -------------------------------------------

/// The default path to the config file.
pub const FEDMETA_DEFAULT_CONFIG_FILE: &str = "/etc/fedmeta.conf";

//------------ Environment Variables ----------------------------------------

/// The environment variable with the path to the config file.
pub const FEDMETA_ENV_CONFIG: &str = "FEDMETA_CONFIG";

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “warn.”
pub const FEDMETA_ENV_LOG_LEVEL: &str = "FEDMETA_LOG_LEVEL";

//------------ Namespaces ---------------------------------------------------

/// The SAML 2.0 metadata namespace.
pub const SAML20MD_NS: &str = "urn:oasis:names:tc:SAML:2.0:metadata";

/// The SAML 2.0 protocol URI as used in `protocolSupportEnumeration`.
pub const SAML20P_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";

/// The SAML 1.1 protocol URI.
pub const SAML11P_NS: &str = "urn:oasis:names:tc:SAML:1.1:protocol";

/// The XML Signature namespace.
pub const XMLSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// The XML Signature 1.1 namespace.
pub const XMLSIG11_NS: &str = "http://www.w3.org/2009/xmldsig11#";

/// The XML Schema instance namespace.
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

//------------ Timing defaults ----------------------------------------------

/// Timeout for HTTP requests made when fetching metadata.
pub const HTTP_CLIENT_TIMEOUT_SECS: u64 = 60;

/// Upper bound on how long fetched metadata is cached.
pub const DEFAULT_MAX_CACHE_DURATION_SECS: i64 = 24 * 3600;

/// Lower bound on the time between two refreshes of a provider.
pub const DEFAULT_MIN_REFRESH_DELAY_SECS: i64 = 5 * 60;

/// Upper bound on the time between two refreshes of a provider.
pub const DEFAULT_MAX_REFRESH_DELAY_SECS: i64 = 4 * 3600;

/// Longest cache duration or refresh delay a provider accepts.
pub const MAX_REFRESH_INTERVAL_SECS: i64 = 100 * 365 * 86_400;

/// Part of the remaining cache lifetime after which to refresh.
pub const DEFAULT_REFRESH_DELAY_FACTOR: f64 = 0.75;

/// Default maximum number of intermediate certificates in a PKIX path.
pub const DEFAULT_VERIFY_DEPTH: usize = 1;
