//! General utility modules for use all over the code base
pub mod ext_serde;
pub mod file;
pub mod httpclient;
pub mod time;
pub mod xml;
