//! Service layer between the web handlers and the filter engines

pub mod manifest;

pub use manifest::{ManifestService, RewrittenManifest};
