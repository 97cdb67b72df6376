//! Origin access: resolving stripped manifest paths and fetching manifests
//!
//! The engines only see [`ManifestFetcher`]; production uses
//! [`HttpManifestFetcher`] on top of `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header::LAST_MODIFIED, Client};
use tracing::{debug, warn};
use url::Url;

use crate::config::OriginConfig;
use crate::errors::{AppError, AppResult, FetchError, FetchResult, ParseError};
use crate::filters::FilterSet;
use crate::hls::redirect::TrimDescriptor;

/// A fetched manifest. Non-success statuses are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedManifest {
    pub url: Url,
    pub status: u16,
    /// Raw `Last-Modified` header value, if present
    pub last_modified: Option<String>,
    pub body: String,
}

impl FetchedManifest {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    /// Fetch a manifest. Cancellation and timeouts surface as [`FetchError`].
    async fn fetch(&self, url: &Url) -> FetchResult<FetchedManifest>;
}

/// `reqwest` backed fetcher with a request timeout and a body size bound
pub struct HttpManifestFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpManifestFetcher {
    pub fn new(config: &OriginConfig) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| FetchError::request(&config.base_url, e.to_string()))?;

        Ok(Self {
            client,
            max_bytes: config.max_manifest_bytes,
        })
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch(&self, url: &Url) -> FetchResult<FetchedManifest> {
        let resp = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url.as_str())
            } else {
                FetchError::request(url.as_str(), e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        let last_modified = resp
            .headers()
            .get(LAST_MODIFIED)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

        // Stream body in chunks, refusing anything over the bound
        let mut body = resp.bytes_stream();
        let mut collected: Vec<u8> = Vec::with_capacity(8192);
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    FetchError::timeout(url.as_str())
                } else {
                    FetchError::Body {
                        url: url.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;
            if collected.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    limit: self.max_bytes,
                });
            }
            collected.extend_from_slice(&chunk);
        }

        debug!(
            target = "manifest.origin",
            url = %url,
            status = status,
            bytes = collected.len(),
            "fetched manifest"
        );

        Ok(FetchedManifest {
            url: url.clone(),
            status,
            last_modified,
            body: String::from_utf8_lossy(&collected).into_owned(),
        })
    }
}

/// Maps stripped manifest paths to origin URLs
#[derive(Debug, Clone)]
pub struct OriginResolver {
    base: Url,
    /// Hosts trim redirects may name, the base URL's host included
    allowed_hosts: Vec<String>,
}

impl OriginResolver {
    pub fn new(base_url: &str) -> AppResult<Self> {
        Self::with_allowed_hosts(base_url, &[])
    }

    pub fn from_config(config: &OriginConfig) -> AppResult<Self> {
        Self::with_allowed_hosts(&config.base_url, &config.allowed_hosts)
    }

    pub fn with_allowed_hosts(base_url: &str, allowed_hosts: &[String]) -> AppResult<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| AppError::configuration(format!("invalid origin base URL '{base_url}': {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let allowed_hosts = base
            .host_str()
            .into_iter()
            .map(str::to_string)
            .chain(allowed_hosts.iter().map(|h| h.to_ascii_lowercase()))
            .collect();
        Ok(Self {
            base,
            allowed_hosts,
        })
    }

    /// Resolve a manifest path onto the base URL.
    ///
    /// Paths filtered with a trim window may instead carry a trim descriptor;
    /// its embedded origin is used when the host is allowed.
    pub fn resolve(&self, manifest_path: &str, filters: &FilterSet) -> AppResult<Url> {
        if filters.trim.is_some() {
            if let Some(origin) = TrimDescriptor::decode_origin(manifest_path) {
                if self.allows(&origin) {
                    return Ok(origin);
                }
                warn!(
                    target = "manifest.origin",
                    origin = %origin,
                    "trim redirect names a host outside the allow list"
                );
                return Err(ParseError::new(
                    "Trim",
                    format!("origin host of '{manifest_path}' is not allowed"),
                )
                .into());
            }
        }
        self.base
            .join(manifest_path.trim_start_matches('/'))
            .map_err(|e| AppError::internal(format!("cannot resolve '{manifest_path}': {e}")))
    }

    fn allows(&self, origin: &Url) -> bool {
        origin
            .host_str()
            .is_some_and(|host| self.allowed_hosts.iter().any(|h| h == host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::Trim;
    use crate::hls::redirect::RedirectHost;

    #[test]
    fn joins_paths_onto_the_base() {
        let resolver = OriginResolver::new("http://origin.test/vod").unwrap();
        assert_eq!(
            resolver
                .resolve("/show/master.m3u8", &FilterSet::default())
                .unwrap()
                .as_str(),
            "http://origin.test/vod/show/master.m3u8"
        );
    }

    fn descriptor_path(origin: &Url) -> String {
        let descriptor = TrimDescriptor {
            trim: window(),
            tags: None,
            origin: origin.clone(),
        };
        let host = RedirectHost::new("https", "gateway.test", 8080);
        let redirect = Url::parse(&descriptor.to_url(&host)).unwrap();
        format!("/{}", redirect.path().rsplit('/').next().unwrap())
    }

    fn window() -> Trim {
        Trim {
            start: 1_000_000,
            end: 2_000_000,
        }
    }

    fn trimmed() -> FilterSet {
        FilterSet {
            trim: Some(window()),
            ..Default::default()
        }
    }

    #[test]
    fn trim_descriptors_resolve_to_their_embedded_origin() {
        let origin = Url::parse("https://cdn.test/live/720p.m3u8").unwrap();
        let resolver =
            OriginResolver::with_allowed_hosts("http://origin.test/", &["CDN.test".to_string()])
                .unwrap();
        assert_eq!(
            resolver.resolve(&descriptor_path(&origin), &trimmed()).unwrap(),
            origin
        );

        let own = Url::parse("http://origin.test/live/720p.m3u8").unwrap();
        let resolver = OriginResolver::new("http://origin.test/").unwrap();
        assert_eq!(resolver.resolve(&descriptor_path(&own), &trimmed()).unwrap(), own);
    }

    #[test]
    fn descriptors_need_a_trim_window() {
        let origin = Url::parse("http://origin.test/live/720p.m3u8").unwrap();
        let path = descriptor_path(&origin);
        let resolver = OriginResolver::new("http://origin.test/vod/").unwrap();

        let url = resolver.resolve(&path, &FilterSet::default()).unwrap();
        assert_eq!(url.as_str(), format!("http://origin.test/vod{path}"));
    }

    #[test]
    fn descriptors_for_other_hosts_are_rejected() {
        let origin = Url::parse("http://internal.test/admin.m3u8").unwrap();
        let resolver = OriginResolver::new("http://origin.test/").unwrap();

        match resolver.resolve(&descriptor_path(&origin), &trimmed()) {
            Err(AppError::Parse(e)) => assert_eq!(e.key, "Trim"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn success_statuses() {
        let manifest = FetchedManifest {
            url: Url::parse("http://origin.test/a.m3u8").unwrap(),
            status: 204,
            last_modified: None,
            body: String::new(),
        };
        assert!(manifest.is_success());
        assert!(!FetchedManifest {
            status: 404,
            ..manifest
        }
        .is_success());
    }
}
