//! Errors raised while handling key material.

use std::fmt;

use openssl::error::ErrorStack;

use crate::metadata::error::ProviderError;

//------------ SecurityError -------------------------------------------------

/// Key material or trust configuration could not be used.
///
/// An untrusted credential is not an error: trust engines return `false`
/// for that.
#[derive(Debug)]
pub enum SecurityError {
    InvalidKey(String),
    InvalidCertificate(String),
    InvalidCrl(String),
    Crypto(ErrorStack),
    Resolver(String),
    Metadata(ProviderError),
}

impl SecurityError {
    pub fn invalid_key(msg: impl fmt::Display) -> Self {
        SecurityError::InvalidKey(msg.to_string())
    }

    pub fn invalid_certificate(msg: impl fmt::Display) -> Self {
        SecurityError::InvalidCertificate(msg.to_string())
    }

    pub fn invalid_crl(msg: impl fmt::Display) -> Self {
        SecurityError::InvalidCrl(msg.to_string())
    }

    pub fn resolver(msg: impl fmt::Display) -> Self {
        SecurityError::Resolver(msg.to_string())
    }
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SecurityError::InvalidKey(msg) => {
                write!(f, "Invalid public key: {}", msg)
            }
            SecurityError::InvalidCertificate(msg) => {
                write!(f, "Invalid certificate: {}", msg)
            }
            SecurityError::InvalidCrl(msg) => write!(f, "Invalid CRL: {}", msg),
            SecurityError::Crypto(e) => write!(f, "Crypto error: {}", e),
            SecurityError::Resolver(msg) => {
                write!(f, "Cannot resolve validation information: {}", msg)
            }
            SecurityError::Metadata(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SecurityError {}

impl From<ErrorStack> for SecurityError {
    fn from(e: ErrorStack) -> Self {
        SecurityError::Crypto(e)
    }
}

impl From<ProviderError> for SecurityError {
    fn from(e: ProviderError) -> Self {
        SecurityError::Metadata(e)
    }
}

pub type SecurityResult<T> = Result<T, SecurityError>;
