use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::filters::codec::{AUDIO_TOKENS, CAPTION_TOKENS, HDR10, VIDEO_TOKENS};

/// Environment variable prefix for overrides, e.g. `MANIFEST_PROXY__WEB__PORT=9090`
pub const ENV_PREFIX: &str = "MANIFEST_PROXY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub web: WebConfig,
    pub origin: OriginConfig,
    pub filters: FilterConfig,
    pub hls: HlsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub host: String,
    /// Listen port, also re-appended to trim redirects when `hostname` is localhost
    pub port: u16,
    /// Public hostname used to build self-referential trim redirects
    pub hostname: String,
    /// Public scheme used to build self-referential trim redirects
    pub scheme: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Base URL that stripped manifest paths are joined onto
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Upper bound on manifest body size
    pub max_manifest_bytes: usize,
    /// Hosts a trim redirect may point at besides the base URL's own
    pub allowed_hosts: Vec<String>,
}

/// Token sets accepted by the filter path parser
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub video_codecs: Vec<String>,
    pub audio_codecs: Vec<String>,
    pub caption_codecs: Vec<String>,
    pub content_types: Vec<String>,
    /// Ceiling for bitrate ranges
    pub max_bitrate: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    /// Serve the empty playlist shell (200) instead of an error when a trim window matches nothing
    pub serve_empty_trim_window: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            hostname: "localhost".to_string(),
            scheme: "https".to_string(),
        }
    }
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            timeout_secs: 5,
            user_agent: format!("manifest-proxy/{}", env!("CARGO_PKG_VERSION")),
            max_manifest_bytes: 4 * 1024 * 1024,
            allowed_hosts: Vec::new(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        let mut video_codecs: Vec<String> = VIDEO_TOKENS.iter().map(|s| s.to_string()).collect();
        video_codecs.push(HDR10.to_string());
        Self {
            video_codecs,
            audio_codecs: AUDIO_TOKENS.iter().map(|s| s.to_string()).collect(),
            caption_codecs: CAPTION_TOKENS.iter().map(|s| s.to_string()).collect(),
            content_types: ["video", "audio", "text", "image"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_bitrate: i32::MAX as i64,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the TOML file, then environment overrides.
    ///
    /// A missing file is created with the defaults so operators have something to edit.
    pub fn load(config_file: &str) -> Result<Self> {
        if !Path::new(config_file).exists() {
            let contents = toml::to_string_pretty(&Self::default())?;
            std::fs::write(config_file, contents)?;
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(Path::new(config_file)).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
