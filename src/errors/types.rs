//! Error type definitions for the manifest proxy
//!
//! Errors are grouped by the layer that produces them. Every core error is a
//! plain value so the web layer can map it to a status code deterministically.

use thiserror::Error;

/// Top-level application error type
///
/// This enum represents all possible errors that can occur while serving a
/// manifest request. It uses `thiserror` to provide automatic error trait
/// implementations and proper error chaining.
#[derive(Error, Debug)]
pub enum AppError {
    /// Filter grammar errors
    #[error("Filter error: {0}")]
    Parse(#[from] ParseError),

    /// Origin or probe fetch errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// HLS engine errors
    #[error("HLS error: {0}")]
    Hls(#[from] HlsError),

    /// DASH engine errors
    #[error("DASH error: {0}")]
    Dash(#[from] DashError),

    /// The origin answered with a non-success status
    #[error("Origin returned status {status} for {url}")]
    Origin { status: u16, url: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// A malformed filter path, always attributed to the key that produced it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{key}: {message}")]
pub struct ParseError {
    /// Originating filter key, e.g. `"Bitrate"` or `"Video"`
    pub key: String,
    pub message: String,
}

/// Fetch errors from the manifest fetch collaborator
#[derive(Error, Debug)]
pub enum FetchError {
    /// Request could not be built or sent
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// Request exceeded the configured timeout
    #[error("Connection timeout: {url}")]
    Timeout { url: String },

    /// Body could not be read
    #[error("Failed reading body from {url}: {message}")]
    Body { url: String, message: String },

    /// Body exceeded the size bound
    #[error("Manifest at {url} exceeded {limit} bytes")]
    TooLarge { url: String, limit: usize },
}

/// HLS engine errors
#[derive(Error, Debug)]
pub enum HlsError {
    /// The playlist could not be decoded
    #[error("Failed to decode playlist: {message}")]
    Decode { message: String },

    /// The playlist could not be written back out
    #[error("Failed to encode playlist: {0}")]
    Encode(#[from] std::io::Error),

    /// A variant, rendition or segment URI could not be resolved
    #[error("Invalid URI '{uri}': {message}")]
    InvalidUri { uri: String, message: String },

    /// Interleaved primary/backup groups are not usable
    #[error("Cannot de-weave master playlist: {message}")]
    Deweave { message: String },

    /// The de-weave probe returned an unparseable Last-Modified header
    #[error("Malformed Last-Modified header '{value}'")]
    LastModified { value: String },

    /// The trim window matched nothing; the empty playlist can still be served
    #[error("no segments found in range; is PDT set?")]
    NoSegmentsInRange { empty_playlist: String },
}

/// DASH engine errors
#[derive(Error, Debug)]
pub enum DashError {
    /// The MPD could not be decoded
    #[error("Failed to decode MPD: {message}")]
    Decode { message: String },

    /// The MPD could not be written back out
    #[error("Failed to encode MPD: {message}")]
    Encode { message: String },

    /// The document is missing its `MPD` root
    #[error("Document has no MPD root element")]
    MissingRoot,

    /// A manifest or BaseURL could not be resolved
    #[error("Invalid URI '{uri}': {message}")]
    InvalidUri { uri: String, message: String },
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an origin status error
    pub fn origin<U: Into<String>>(status: u16, url: U) -> Self {
        Self::Origin {
            status,
            url: url.into(),
        }
    }
}

impl ParseError {
    /// Create a parse error attributed to a filter key
    pub fn new<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl FetchError {
    /// Create a request error
    pub fn request<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self::Request {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<U: Into<String>>(url: U) -> Self {
        Self::Timeout { url: url.into() }
    }
}

impl HlsError {
    /// Create a decode error
    pub fn decode<M: Into<String>>(message: M) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an invalid URI error
    pub fn invalid_uri<U: Into<String>, M: Into<String>>(uri: U, message: M) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            message: message.into(),
        }
    }

    /// Create a de-weave error
    pub fn deweave<M: Into<String>>(message: M) -> Self {
        Self::Deweave {
            message: message.into(),
        }
    }
}

impl DashError {
    /// Create a decode error
    pub fn decode<M: Into<String>>(message: M) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an encode error
    pub fn encode<M: Into<String>>(message: M) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Create an invalid URI error
    pub fn invalid_uri<U: Into<String>, M: Into<String>>(uri: U, message: M) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            message: message.into(),
        }
    }
}
