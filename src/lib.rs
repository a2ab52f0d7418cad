//! SAML federation metadata providers and X.509 trust engines.

pub mod cli;
pub mod commons;
pub mod config;
pub mod constants;
pub mod metadata;
pub mod security;
