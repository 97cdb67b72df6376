//! Filter model shared by the path parser and the manifest engines
//!
//! A [`FilterSet`] is produced once per request by [`parser::FilterParser`]
//! and then only read by the HLS and DASH engines.

pub mod codec;
pub mod parser;

pub use codec::StreamKind;
pub use parser::FilterParser;

/// Manifest protocol, derived from the manifest file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Hls,
    Dash,
}

impl Protocol {
    /// Detect the protocol from a manifest path (`.m3u8` or `.mpd`)
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".m3u8") {
            Some(Self::Hls)
        } else if lower.ends_with(".mpd") {
            Some(Self::Dash)
        } else {
            None
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Hls => "application/vnd.apple.mpegurl",
            Self::Dash => "application/dash+xml",
        }
    }
}

/// Inclusive numeric range. Parsing guarantees `0 <= min < max <= ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub min: i64,
    pub max: i64,
}

impl Range {
    pub fn contains(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Codec, bitrate and language restrictions scoped to one stream kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NestedFilter {
    pub bitrate: Option<Range>,
    /// Codec tokens to remove, in first-seen order
    pub codecs: Vec<String>,
    /// Language tags to remove, in first-seen order
    pub language: Vec<String>,
}

impl NestedFilter {
    pub fn is_empty(&self) -> bool {
        self.bitrate.is_none() && self.codecs.is_empty() && self.language.is_empty()
    }

    /// Case-insensitive language membership
    pub fn excludes_language(&self, lang: &str) -> bool {
        self.language.iter().any(|l| l.eq_ignore_ascii_case(lang))
    }
}

/// Wall-clock window in milliseconds since the epoch, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trim {
    pub start: i64,
    pub end: i64,
}

impl Trim {
    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start && timestamp_ms <= self.end
    }
}

/// Tag suppression flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tags {
    pub ads: bool,
    pub iframe: bool,
}

/// Everything a request asked the engines to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    pub protocol: Protocol,
    pub videos: NestedFilter,
    pub audios: NestedFilter,
    pub captions: NestedFilter,
    /// Stream kinds to remove entirely (`video`, `audio`, `text`, `image`)
    pub content_types: Vec<String>,
    /// Frame rates to exclude, fractions normalised to `N/D`
    pub frame_rates: Vec<String>,
    /// Overall bitrate; folded into the nested filters and cleared after parsing
    pub bitrate: Option<Range>,
    pub trim: Option<Trim>,
    pub tags: Option<Tags>,
    pub plugins: Vec<String>,
    pub deweave: bool,
}

impl FilterSet {
    /// True when no transformation was requested at all
    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
            && self.audios.is_empty()
            && self.captions.is_empty()
            && self.content_types.is_empty()
            && self.frame_rates.is_empty()
            && self.bitrate.is_none()
            && self.trim.is_none()
            && self.tags.is_none()
            && self.plugins.is_empty()
            && !self.deweave
    }

    pub fn suppress_ads(&self) -> bool {
        self.tags.map(|t| t.ads).unwrap_or(false)
    }

    pub fn suppress_iframes(&self) -> bool {
        self.tags.map(|t| t.iframe).unwrap_or(false)
    }

    pub fn excludes_content_type(&self, content_type: &str) -> bool {
        self.content_types
            .iter()
            .any(|ct| ct.eq_ignore_ascii_case(content_type))
    }

    /// Nested filter for a classified stream kind
    pub fn nested(&self, kind: StreamKind) -> Option<&NestedFilter> {
        match kind {
            StreamKind::Video => Some(&self.videos),
            StreamKind::Audio => Some(&self.audios),
            StreamKind::Caption => Some(&self.captions),
            StreamKind::Unknown => None,
        }
    }

    /// Fold the overall bitrate into unset nested bitrates, then clear it
    pub(crate) fn fold_bitrate(&mut self) {
        if let Some(overall) = self.bitrate.take() {
            self.videos.bitrate.get_or_insert(overall);
            self.audios.bitrate.get_or_insert(overall);
        }
    }
}

/// Append a value unless it is already present, keeping first-seen order
pub(crate) fn push_unique(list: &mut Vec<String>, value: impl Into<String>) {
    let value = value.into();
    if !list.contains(&value) {
        list.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_is_detected_from_extension() {
        assert_eq!(Protocol::from_path("/a/b/master.m3u8"), Some(Protocol::Hls));
        assert_eq!(Protocol::from_path("/a/b/manifest.MPD"), Some(Protocol::Dash));
        assert_eq!(Protocol::from_path("/a/b/video.mp4"), None);
    }

    #[test]
    fn overall_bitrate_never_overrides_nested() {
        let mut filters = FilterSet {
            bitrate: Some(Range { min: 100, max: 4000 }),
            ..Default::default()
        };
        filters.audios.bitrate = Some(Range { min: 10, max: 20 });
        filters.fold_bitrate();

        assert_eq!(filters.bitrate, None);
        assert_eq!(filters.videos.bitrate, Some(Range { min: 100, max: 4000 }));
        assert_eq!(filters.audios.bitrate, Some(Range { min: 10, max: 20 }));
    }

    #[test]
    fn trim_window_is_inclusive() {
        let trim = Trim { start: 1000, end: 2000 };
        assert!(trim.contains(1000));
        assert!(trim.contains(2000));
        assert!(!trim.contains(2001));
    }

    #[test]
    fn empty_filter_set_reports_empty() {
        assert!(FilterSet::default().is_empty());
        let filters = FilterSet {
            deweave: true,
            ..Default::default()
        };
        assert!(!filters.is_empty());
    }
}
