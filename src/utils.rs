//! Utility functions for the manifest proxy
//!
//! - `utils::time` for the injectable wall clock
//! - `utils::url` for resolving manifest-relative URIs

pub mod time;
pub mod url;
