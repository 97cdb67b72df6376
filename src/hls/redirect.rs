//! Self-referential trim redirects
//!
//! A trimmed master playlist points each variant back at this gateway. The
//! variant URL carries the trim window, the tag flags and the variant's
//! absolute origin URL, so the second request needs no shared state.

use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use url::Url;

use crate::config::WebConfig;
use crate::filters::{Tags, Trim};

const MANIFEST_SUFFIX: &str = ".m3u8";

/// Public address of this gateway, used as the redirect prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectHost {
    pub scheme: String,
    pub hostname: String,
    pub port: u16,
}

impl RedirectHost {
    pub fn new<S: Into<String>, H: Into<String>>(scheme: S, hostname: H, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            hostname: hostname.into(),
            port,
        }
    }

    pub fn from_config(config: &WebConfig) -> Self {
        Self::new(config.scheme.as_str(), config.hostname.as_str(), config.port)
    }

    /// `scheme://hostname`, or `http://localhost:port` for local development
    pub fn base(&self) -> String {
        if self.hostname == "localhost" {
            format!("http://localhost:{}", self.port)
        } else {
            format!("{}://{}", self.scheme, self.hostname)
        }
    }
}

/// Everything a trimmed variant request needs to reach its origin again
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimDescriptor {
    pub trim: Trim,
    pub tags: Option<Tags>,
    pub origin: Url,
}

impl TrimDescriptor {
    /// `{base}/t(start,end)[/tags(..)]/{base64url(origin)}.m3u8`, window in seconds
    pub fn to_url(&self, host: &RedirectHost) -> String {
        let mut url = format!(
            "{}/t({},{})",
            host.base(),
            self.trim.start / 1000,
            self.trim.end / 1000
        );

        if let Some(tags) = self.tags {
            let mut names = Vec::new();
            if tags.ads {
                names.push("ads");
            }
            if tags.iframe {
                names.push("iframe");
            }
            if !names.is_empty() {
                url.push_str(&format!("/tags({})", names.join(",")));
            }
        }

        url.push('/');
        url.push_str(&URL_SAFE_NO_PAD.encode(self.origin.as_str()));
        url.push_str(MANIFEST_SUFFIX);
        url
    }

    /// Decode the origin URL carried by a redirect's manifest path, if any
    pub fn decode_origin(manifest_path: &str) -> Option<Url> {
        let name = manifest_path.rsplit('/').next()?;
        let encoded = name.strip_suffix(MANIFEST_SUFFIX)?;
        if encoded.is_empty() {
            return None;
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .or_else(|_| URL_SAFE.decode(encoded))
            .ok()?;
        let text = String::from_utf8(bytes).ok()?;
        let url = Url::parse(&text).ok()?;
        matches!(url.scheme(), "http" | "https").then_some(url)
    }
}
