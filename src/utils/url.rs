//! URL utilities for resolving manifest-relative references
//!
//! Manifests may reference variants, renditions and segments relative to
//! their own location; everything the gateway emits is absolute.

use url::{ParseError, Url};

/// Resolve `reference` against `base`, leaving absolute references untouched
///
/// # Examples
///
/// ```rust
/// use manifest_proxy::utils::url::resolve;
/// use url::Url;
///
/// let base = Url::parse("https://origin.example.com/live/master.m3u8").unwrap();
/// assert_eq!(
///     resolve(&base, "720p/index.m3u8").unwrap().as_str(),
///     "https://origin.example.com/live/720p/index.m3u8"
/// );
/// assert_eq!(
///     resolve(&base, "https://cdn.example.com/a.m3u8").unwrap().as_str(),
///     "https://cdn.example.com/a.m3u8"
/// );
/// ```
pub fn resolve(base: &Url, reference: &str) -> Result<Url, ParseError> {
    match Url::parse(reference) {
        Ok(absolute) => Ok(absolute),
        Err(ParseError::RelativeUrlWithoutBase) => base.join(reference),
        Err(e) => Err(e),
    }
}

/// Whether `reference` already carries a scheme
pub fn is_absolute(reference: &str) -> bool {
    Url::parse(reference).is_ok()
}

/// The directory containing `manifest`, with a trailing slash and no query
pub fn directory_of(manifest: &Url) -> Result<Url, ParseError> {
    manifest.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_root_relative_references() {
        let base = Url::parse("http://origin.test/a/b/master.m3u8?token=1").unwrap();
        assert_eq!(
            resolve(&base, "/c/variant.m3u8").unwrap().as_str(),
            "http://origin.test/c/variant.m3u8"
        );
        assert_eq!(
            resolve(&base, "../variant.m3u8").unwrap().as_str(),
            "http://origin.test/a/variant.m3u8"
        );
    }

    #[test]
    fn directory_drops_file_and_query() {
        let manifest = Url::parse("http://origin.test/a/b/manifest.mpd?x=y").unwrap();
        assert_eq!(
            directory_of(&manifest).unwrap().as_str(),
            "http://origin.test/a/b/"
        );
    }

    #[test]
    fn detects_absolute_references() {
        assert!(is_absolute("https://cdn.test/x.ts"));
        assert!(!is_absolute("x.ts"));
        assert!(!is_absolute("/x.ts"));
    }
}
