//! Centralized error handling for the manifest proxy
//!
//! # Error Categories
//!
//! - **Parse Errors**: malformed filter grammar, always tagged with the offending key
//! - **Fetch Errors**: origin and de-weave probe connectivity
//! - **HLS / DASH Errors**: manifest decode/encode failures and engine-level failures
//!
//! # Usage
//!
//! ```rust
//! use manifest_proxy::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Ok("success".to_string())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for HLS engine Results
pub type HlsResult<T> = Result<T, HlsError>;

/// Convenience type alias for DASH engine Results
pub type DashResult<T> = Result<T, DashError>;

/// Convenience type alias for Fetch Results
pub type FetchResult<T> = Result<T, FetchError>;
