//! Master playlist filtering
//!
//! Rules run per variant in a fixed order; the first rule that rejects a
//! variant removes it. Renditions are pruned by language afterwards, then
//! trimmed requests get their URIs pointed back at the gateway.

use std::collections::HashSet;

use m3u8_rs::{
    AlternativeMedia, AlternativeMediaType, ClosedCaptionGroupId, MasterPlaylist, VariantStream,
};
use tracing::debug;
use url::Url;

use super::deweave::Ladder;
use super::media::absolute;
use super::redirect::{RedirectHost, TrimDescriptor};
use crate::errors::{HlsError, HlsResult};
use crate::filters::codec::{classify, matches_any, split_codecs};
use crate::filters::{FilterSet, StreamKind};

/* --- Source positions --- */

/// Source positions of the variants and renditions still in the playlist
///
/// Kept parallel to `MasterPlaylist::variants` and `alternatives` so the
/// output can be spliced from the original lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Survivors {
    pub variants: Vec<usize>,
    pub alternatives: Vec<usize>,
}

impl Survivors {
    pub fn of(playlist: &MasterPlaylist) -> Self {
        Self {
            variants: (0..playlist.variants.len()).collect(),
            alternatives: (0..playlist.alternatives.len()).collect(),
        }
    }

    /// Mirror a de-weave: primaries sit at even positions, backups at odd
    pub fn keep_ladder(&mut self, ladder: Ladder) {
        let primary = ladder == Ladder::Primary;
        self.variants.retain(|index| (index % 2 == 0) == primary);
    }
}

fn retain_tracked<T>(items: &mut Vec<T>, ids: &mut Vec<usize>, mut keep: impl FnMut(&T) -> bool) {
    let (kept, kept_ids): (Vec<T>, Vec<usize>) = std::mem::take(items)
        .into_iter()
        .zip(ids.iter().copied())
        .filter(|(item, _)| keep(item))
        .unzip();
    *items = kept;
    *ids = kept_ids;
}

/* --- URI handling --- */

fn resolve_uris(playlist: &mut MasterPlaylist, manifest_url: &Url) -> HlsResult<()> {
    for variant in playlist.variants.iter_mut() {
        variant.uri = absolute(manifest_url, &variant.uri)?;
    }
    for alternative in playlist.alternatives.iter_mut() {
        if let Some(uri) = alternative.uri.as_mut() {
            *uri = absolute(manifest_url, uri)?;
        }
    }
    Ok(())
}

fn redirect(uri: &str, filters: &FilterSet, host: &RedirectHost) -> HlsResult<String> {
    let Some(trim) = filters.trim else {
        return Ok(uri.to_string());
    };
    let origin = Url::parse(uri).map_err(|e| HlsError::invalid_uri(uri, e.to_string()))?;
    Ok(TrimDescriptor {
        trim,
        tags: filters.tags,
        origin,
    }
    .to_url(host))
}

fn redirect_uris(
    playlist: &mut MasterPlaylist,
    filters: &FilterSet,
    host: &RedirectHost,
) -> HlsResult<()> {
    for variant in playlist.variants.iter_mut() {
        variant.uri = redirect(&variant.uri, filters, host)?;
    }
    for alternative in playlist.alternatives.iter_mut() {
        if let Some(uri) = alternative.uri.as_mut() {
            *uri = redirect(uri, filters, host)?;
        }
    }
    Ok(())
}

/* --- Variant rules --- */

/// Normalise a frame-rate token to the 3-decimal form HLS writes
pub(crate) fn normalize_frame_rate(token: &str) -> String {
    let value = match token.split_once('/') {
        Some((num, den)) => match (num.trim().parse::<f64>(), den.trim().parse::<f64>()) {
            (Ok(num), Ok(den)) if den != 0.0 => Some(num / den),
            _ => None,
        },
        None => token.trim().parse::<f64>().ok(),
    };
    match value {
        Some(v) => format!("{v:.3}"),
        None => token.to_string(),
    }
}

fn outside_bitrate(filters: &FilterSet, variant: &VariantStream, codecs: &[&str]) -> bool {
    let bandwidth = variant.bandwidth as i64;
    let out_of = |kind: StreamKind| {
        filters
            .nested(kind)
            .and_then(|n| n.bitrate)
            .is_some_and(|range| !range.contains(bandwidth))
    };

    // No codecs means no bucket to check against
    codecs.iter().any(|codec| match classify(codec) {
        kind @ (StreamKind::Video | StreamKind::Audio) => out_of(kind),
        _ => false,
    })
}

fn has_codec(codecs: &[&str], kind: StreamKind, tokens: &[String]) -> bool {
    !tokens.is_empty() && codecs.iter().any(|codec| matches_any(kind, codec, tokens))
}

/// The first rule rejecting `variant`, if any
fn rejection(filters: &FilterSet, variant: &VariantStream) -> Option<&'static str> {
    let codecs: Vec<&str> = variant
        .codecs
        .as_deref()
        .map(|c| split_codecs(c).collect())
        .unwrap_or_default();

    if outside_bitrate(filters, variant, &codecs) {
        return Some("bitrate");
    }
    if has_codec(&codecs, StreamKind::Video, &filters.videos.codecs) {
        return Some("video codec");
    }
    if has_codec(&codecs, StreamKind::Audio, &filters.audios.codecs) {
        return Some("audio codec");
    }
    if has_codec(&codecs, StreamKind::Caption, &filters.captions.codecs) {
        return Some("caption codec");
    }
    if let Some(rate) = variant.frame_rate {
        let rate = format!("{rate:.3}");
        if filters.frame_rates.iter().any(|fr| normalize_frame_rate(fr) == rate) {
            return Some("frame rate");
        }
    }
    None
}

/* --- Rendition language pruning --- */

fn group_kind(media_type: &AlternativeMediaType) -> Option<StreamKind> {
    match media_type {
        AlternativeMediaType::Audio => Some(StreamKind::Audio),
        AlternativeMediaType::Subtitles | AlternativeMediaType::ClosedCaptions => {
            Some(StreamKind::Caption)
        }
        _ => None,
    }
}

fn group_label(media_type: &AlternativeMediaType) -> &'static str {
    match media_type {
        AlternativeMediaType::Audio => "AUDIO",
        AlternativeMediaType::Video => "VIDEO",
        AlternativeMediaType::Subtitles => "SUBTITLES",
        AlternativeMediaType::ClosedCaptions => "CLOSED-CAPTIONS",
        _ => "OTHER",
    }
}

fn group_ids(alternatives: &[AlternativeMedia]) -> HashSet<(&'static str, String)> {
    alternatives
        .iter()
        .map(|a| (group_label(&a.media_type), a.group_id.clone()))
        .collect()
}

fn prune_languages(playlist: &mut MasterPlaylist, survivors: &mut Survivors, filters: &FilterSet) {
    if filters.audios.language.is_empty() && filters.captions.language.is_empty() {
        return;
    }

    let before = group_ids(&playlist.alternatives);
    retain_tracked(&mut playlist.alternatives, &mut survivors.alternatives, |alternative| {
        let kind = group_kind(&alternative.media_type);
        let (Some(kind), Some(lang)) = (kind, alternative.language.as_deref()) else {
            return true;
        };
        let excluded = filters
            .nested(kind)
            .is_some_and(|n| n.excludes_language(lang));
        if excluded {
            debug!(
                target = "manifest.hls",
                group = %alternative.group_id,
                language = lang,
                "dropping rendition"
            );
        }
        !excluded
    });
    let after = group_ids(&playlist.alternatives);

    // A group that lost every rendition must not be referenced any more
    let dangling = |media_type: AlternativeMediaType, group: &str| {
        let key = (group_label(&media_type), group.to_string());
        before.contains(&key) && !after.contains(&key)
    };
    for variant in playlist.variants.iter_mut() {
        if let Some(g) = &variant.audio {
            if dangling(AlternativeMediaType::Audio, g) {
                variant.audio = None;
            }
        }
        if let Some(g) = &variant.subtitles {
            if dangling(AlternativeMediaType::Subtitles, g) {
                variant.subtitles = None;
            }
        }
        if let Some(ClosedCaptionGroupId::GroupId(g)) = &variant.closed_captions {
            if dangling(AlternativeMediaType::ClosedCaptions, g) {
                variant.closed_captions = None;
            }
        }
    }
}

/* --- Pipeline --- */

pub(crate) fn filter_master(
    playlist: &mut MasterPlaylist,
    survivors: &mut Survivors,
    filters: &FilterSet,
    manifest_url: &Url,
    host: &RedirectHost,
) -> HlsResult<()> {
    resolve_uris(playlist, manifest_url)?;

    if filters.suppress_iframes() {
        retain_tracked(&mut playlist.variants, &mut survivors.variants, |v| !v.is_i_frame);
    }

    let total = playlist.variants.len();
    retain_tracked(&mut playlist.variants, &mut survivors.variants, |variant| match rejection(filters, variant) {
        Some(rule) => {
            debug!(
                target = "manifest.hls",
                uri = %variant.uri,
                bandwidth = variant.bandwidth,
                rule = rule,
                "dropping variant"
            );
            false
        }
        None => true,
    });

    prune_languages(playlist, survivors, filters);

    if filters.trim.is_some() {
        redirect_uris(playlist, filters, host)?;
    }

    debug!(
        target = "manifest.hls",
        kept = playlist.variants.len(),
        total = total,
        renditions = playlist.alternatives.len(),
        "filtered master playlist"
    );
    Ok(())
}
