//! Media playlist filtering: trim windows and ad marker suppression

use m3u8_rs::{ExtTag, MediaPlaylist, MediaSegment};
use tracing::debug;
use url::Url;

use crate::errors::{HlsError, HlsResult};
use crate::filters::{FilterSet, Trim};
use crate::utils::url::resolve;

/// Ad marker tags, as stored by the playlist parser (without `#EXT-`)
const AD_TAGS: [&str; 6] = [
    "X-CUE-OUT",
    "X-CUE-OUT-CONT",
    "X-CUE-IN",
    "X-ASSET",
    "OATCLS-SCTE35",
    "X-SCTE35",
];

/// Whether the segment walk is currently inside the trim window
///
/// A segment carrying a program date time decides the state; a segment
/// without one inherits it from its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Skipping,
    Appending,
}

impl SegmentState {
    pub fn initial(window: Option<&Trim>) -> Self {
        match window {
            Some(_) => Self::Skipping,
            None => Self::Appending,
        }
    }

    pub fn next(self, window: Option<&Trim>, program_date_time_ms: Option<i64>) -> Self {
        match (window, program_date_time_ms) {
            (None, _) => Self::Appending,
            (Some(_), None) => self,
            (Some(w), Some(ts)) if w.contains(ts) => Self::Appending,
            (Some(_), Some(_)) => Self::Skipping,
        }
    }
}

/// Result of filtering a media playlist
#[derive(Debug)]
pub(crate) struct FilteredMedia {
    pub playlist: MediaPlaylist,
    /// Source positions of the appended segments
    pub kept: Vec<usize>,
    /// Longest appended segment, in seconds
    pub max_segment_duration: f64,
}

pub(crate) fn is_ad_tag(tag: &ExtTag) -> bool {
    is_ad_tag_name(&tag.tag)
}

/// Same check on a tag name as written in the playlist, e.g. `EXT-X-CUE-IN`
pub(crate) fn is_ad_tag_name(name: &str) -> bool {
    let name = name.strip_prefix("EXT-").unwrap_or(name);
    AD_TAGS.contains(&name)
}

fn resolve_segment(manifest_url: &Url, segment: &mut MediaSegment) -> HlsResult<()> {
    segment.uri = absolute(manifest_url, &segment.uri)?;
    if let Some(key) = segment.key.as_mut() {
        if let Some(uri) = key.uri.as_mut() {
            *uri = absolute(manifest_url, uri)?;
        }
    }
    if let Some(map) = segment.map.as_mut() {
        map.uri = absolute(manifest_url, &map.uri)?;
    }
    Ok(())
}

pub(crate) fn absolute(manifest_url: &Url, uri: &str) -> HlsResult<String> {
    resolve(manifest_url, uri)
        .map(|u| u.to_string())
        .map_err(|e| HlsError::invalid_uri(uri, e.to_string()))
}

pub(crate) fn filter_media(
    filters: &FilterSet,
    manifest_url: &Url,
    mut playlist: MediaPlaylist,
) -> HlsResult<FilteredMedia> {
    let window = filters.trim.as_ref();
    let strip_ads = filters.suppress_ads();

    let source = std::mem::take(&mut playlist.segments);
    let total = source.len();
    let mut state = SegmentState::initial(window);
    let mut skipped_before_first = 0u64;
    let mut discontinuities_before_first = 0u64;
    let mut max_segment_duration = 0f64;
    let mut kept = Vec::new();

    for (index, mut segment) in source.into_iter().enumerate() {
        let pdt = segment.program_date_time.map(|p| p.timestamp_millis());
        state = state.next(window, pdt);

        if state == SegmentState::Skipping {
            if playlist.segments.is_empty() {
                skipped_before_first += 1;
                if segment.discontinuity {
                    discontinuities_before_first += 1;
                }
            }
            continue;
        }

        resolve_segment(manifest_url, &mut segment)?;
        if strip_ads {
            segment.unknown_tags.retain(|t| !is_ad_tag(t));
        }
        max_segment_duration = max_segment_duration.max(segment.duration as f64);
        playlist.segments.push(segment);
        kept.push(index);
    }

    if window.is_some() {
        playlist.media_sequence += skipped_before_first;
        playlist.discontinuity_sequence += discontinuities_before_first;
        playlist.end_list = true;
    }
    if strip_ads {
        playlist.unknown_tags.retain(|t| !is_ad_tag(t));
    }

    debug!(
        target = "manifest.hls",
        kept = playlist.segments.len(),
        total = total,
        trimmed = window.is_some(),
        "filtered media playlist"
    );

    Ok(FilteredMedia {
        playlist,
        kept,
        max_segment_duration,
    })
}
