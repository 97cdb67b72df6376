//! Request orchestration: parse the filter path, fetch the origin manifest,
//! run the engine for its protocol.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::dash::DashFilter;
use crate::errors::{AppError, AppResult, HlsError};
use crate::filters::{FilterParser, Protocol};
use crate::hls::{HlsFilter, RedirectHost};
use crate::origin::{ManifestFetcher, OriginResolver};
use crate::plugins::PluginRegistry;
use crate::utils::time::Clock;

/// A rewritten manifest ready to be served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenManifest {
    pub body: String,
    pub content_type: &'static str,
    /// `Cache-Control: max-age` in seconds, when the engine produced one
    pub max_age: Option<String>,
}

pub struct ManifestService {
    parser: FilterParser,
    resolver: OriginResolver,
    fetcher: Arc<dyn ManifestFetcher>,
    clock: Arc<dyn Clock>,
    plugins: PluginRegistry,
    host: RedirectHost,
    serve_empty_trim_window: bool,
}

impl ManifestService {
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn ManifestFetcher>,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        Ok(Self {
            parser: FilterParser::new(config.filters.clone(), Arc::clone(&clock)),
            resolver: OriginResolver::from_config(&config.origin)?,
            fetcher,
            clock,
            plugins: PluginRegistry::with_builtins(),
            host: RedirectHost::from_config(&config.web),
            serve_empty_trim_window: config.hls.serve_empty_trim_window,
        })
    }

    /// Replace the plugin registry
    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = plugins;
        self
    }

    pub async fn rewrite(&self, path: &str) -> AppResult<RewrittenManifest> {
        let (manifest_path, filters) = self.parser.parse(path)?;
        let url = self.resolver.resolve(&manifest_path, &filters)?;

        let fetched = self.fetcher.fetch(&url).await?;
        if !fetched.is_success() {
            return Err(AppError::origin(fetched.status, url.as_str()));
        }

        let plugins = self.plugins.resolve(&filters.plugins);
        let rewritten = match filters.protocol {
            Protocol::Hls => {
                let mut engine = HlsFilter::new(
                    self.host.clone(),
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.clock),
                    plugins,
                );
                let body = match engine.filter_manifest(&filters, &url, &fetched.body).await {
                    Ok(body) => body,
                    Err(HlsError::NoSegmentsInRange { empty_playlist })
                        if self.serve_empty_trim_window =>
                    {
                        warn!(url = %url, "trim window matched no segments, serving empty playlist");
                        empty_playlist
                    }
                    Err(e) => return Err(e.into()),
                };
                RewrittenManifest {
                    body,
                    content_type: Protocol::Hls.content_type(),
                    max_age: Some(engine.max_age().to_string()).filter(|m| !m.is_empty()),
                }
            }
            Protocol::Dash => {
                let engine = DashFilter::new(plugins);
                RewrittenManifest {
                    body: engine.filter_manifest(&filters, &url, &fetched.body)?,
                    content_type: Protocol::Dash.content_type(),
                    max_age: Some(engine.max_age().to_string()).filter(|m| !m.is_empty()),
                }
            }
        };

        info!(
            url = %url,
            protocol = ?filters.protocol,
            bytes = rewritten.body.len(),
            "rewrote manifest"
        );
        Ok(rewritten)
    }
}
