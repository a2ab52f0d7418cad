//! Errors raised while obtaining and serving metadata.

use std::fmt;

use crate::commons::util::{file::FileError, httpclient, xml::XmlReaderErr};

//------------ SourceError ---------------------------------------------------

/// The raw bytes of a metadata document could not be obtained.
#[derive(Debug)]
pub enum SourceError {
    Http(httpclient::Error),
    File(FileError),

    /// Both the primary source and its fallback failed.
    Fallback {
        primary: Box<SourceError>,
        fallback: Box<SourceError>,
    },

    Other(String),
}

impl SourceError {
    pub fn other(msg: impl fmt::Display) -> Self {
        SourceError::Other(msg.to_string())
    }

    pub fn fallback(primary: SourceError, fallback: SourceError) -> Self {
        SourceError::Fallback {
            primary: Box::new(primary),
            fallback: Box::new(fallback),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SourceError::Http(e) => write!(f, "{}", e),
            SourceError::File(e) => write!(f, "{}", e),
            SourceError::Fallback { primary, fallback } => write!(
                f,
                "{}, and fallback failed as well: {}",
                primary, fallback
            ),
            SourceError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<httpclient::Error> for SourceError {
    fn from(e: httpclient::Error) -> Self {
        SourceError::Http(e)
    }
}

impl From<FileError> for SourceError {
    fn from(e: FileError) -> Self {
        SourceError::File(e)
    }
}

//------------ ParseError ----------------------------------------------------

/// The bytes obtained were not a usable metadata document.
#[derive(Debug)]
pub enum ParseError {
    Xml(XmlReaderErr),
    UnexpectedRoot(String),
    InvalidValue(String),
}

impl ParseError {
    pub fn invalid(msg: impl fmt::Display) -> Self {
        ParseError::InvalidValue(msg.to_string())
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::Xml(e) => write!(f, "Invalid XML: {}", e),
            ParseError::UnexpectedRoot(name) => write!(
                f,
                "Expected EntityDescriptor or EntitiesDescriptor, found: {}",
                name
            ),
            ParseError::InvalidValue(msg) => {
                write!(f, "Invalid metadata: {}", msg)
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl From<XmlReaderErr> for ParseError {
    fn from(e: XmlReaderErr) -> Self {
        ParseError::Xml(e)
    }
}

impl From<crate::commons::util::xml::AttributesError> for ParseError {
    fn from(e: crate::commons::util::xml::AttributesError) -> Self {
        ParseError::Xml(XmlReaderErr::from(e))
    }
}

//------------ FilterError ---------------------------------------------------

/// A metadata filter rejected a document.
#[derive(Debug)]
pub enum FilterError {
    MissingValidUntil,
    ValidityTooLong { allowed_secs: i64, actual_secs: i64 },
    Rejected(String),
}

impl FilterError {
    pub fn rejected(msg: impl fmt::Display) -> Self {
        FilterError::Rejected(msg.to_string())
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FilterError::MissingValidUntil => {
                write!(f, "Metadata did not include a validUntil attribute")
            }
            FilterError::ValidityTooLong {
                allowed_secs,
                actual_secs,
            } => write!(
                f,
                "Metadata is valid for {} seconds, at most {} are allowed",
                actual_secs, allowed_secs
            ),
            FilterError::Rejected(msg) => {
                write!(f, "Metadata rejected: {}", msg)
            }
        }
    }
}

impl std::error::Error for FilterError {}

//------------ ProviderError -------------------------------------------------

/// Errors about the state of a metadata provider.
///
/// Unknown entities or roles are never errors, they are reported as empty
/// results instead.
#[derive(Debug)]
pub enum ProviderError {
    NotInitialized(String),
    Config(String),
    Fetch(String, SourceError),
    Parse(String, ParseError),
    Filter(String, FilterError),
}

impl ProviderError {
    pub fn not_initialized(provider: &str) -> Self {
        ProviderError::NotInitialized(provider.to_string())
    }

    pub fn config(msg: impl fmt::Display) -> Self {
        ProviderError::Config(msg.to_string())
    }

    pub fn fetch(provider: &str, e: SourceError) -> Self {
        ProviderError::Fetch(provider.to_string(), e)
    }

    pub fn parse(provider: &str, e: ParseError) -> Self {
        ProviderError::Parse(provider.to_string(), e)
    }

    pub fn filter(provider: &str, e: FilterError) -> Self {
        ProviderError::Filter(provider.to_string(), e)
    }

    /// Returns whether the document was rejected by policy.
    pub fn is_filter_rejection(&self) -> bool {
        matches!(self, ProviderError::Filter(..))
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProviderError::NotInitialized(name) => {
                write!(f, "Metadata provider '{}' is not initialized", name)
            }
            ProviderError::Config(msg) => {
                write!(f, "Invalid provider configuration: {}", msg)
            }
            ProviderError::Fetch(name, e) => write!(
                f,
                "Metadata provider '{}' could not fetch metadata: {}",
                name, e
            ),
            ProviderError::Parse(name, e) => write!(
                f,
                "Metadata provider '{}' could not parse metadata: {}",
                name, e
            ),
            ProviderError::Filter(name, e) => write!(
                f,
                "Metadata provider '{}' rejected metadata: {}",
                name, e
            ),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProviderError::Fetch(_, e) => Some(e),
            ProviderError::Parse(_, e) => Some(e),
            ProviderError::Filter(_, e) => Some(e),
            _ => None,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
