//! Trust evaluation of X.509 credentials.
pub mod credential;
pub mod error;
pub mod keyinfo;
pub mod pkix;
pub mod trust;

pub use self::credential::{Certificate, Crl, PublicKey, X509Credential};
pub use self::error::{SecurityError, SecurityResult};
pub use self::keyinfo::{
    InlineKeyResolver, KeyInfoSource, KeyResolver, RoleKeyInfoSource,
    StaticKeyInfoSource,
};
pub use self::pkix::{
    BasicCertPathValidator, CertPathValidator, PkixValidationInformation,
    PkixValidationInformationResolver,
};
pub use self::trust::{
    BasicX509CredentialTrustEngine, PkixX509CredentialTrustEngine,
    TrustEngine,
};
