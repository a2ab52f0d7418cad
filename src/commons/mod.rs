//! Common types used by the various fedmeta components.
pub mod util;
