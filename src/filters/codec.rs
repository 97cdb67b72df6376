//! Codec classification and filter-token matching
//!
//! Video and audio tokens match by containment (`avc` matches `avc1.64001f`),
//! captions match by equality because caption codecs carry no profile suffix.

/// Substrings identifying a video codec
pub const VIDEO_TOKENS: [&str; 3] = ["hvc", "avc", "dvh"];
/// Substrings identifying an audio codec
pub const AUDIO_TOKENS: [&str; 3] = ["mp4a", "ec-3", "ac-3"];
/// Caption codecs
pub const CAPTION_TOKENS: [&str; 2] = ["stpp", "wvtt"];

/// Symbolic filter name expanded into literal codec prefixes
pub const HDR10: &str = "hdr10";
pub const HDR10_PREFIXES: [&str; 2] = ["hev1.2", "hvc1.2"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Caption,
    Unknown,
}

/// Classify a single codec string by its token
pub fn classify(codec: &str) -> StreamKind {
    if VIDEO_TOKENS.iter().any(|t| codec.contains(t)) {
        StreamKind::Video
    } else if AUDIO_TOKENS.iter().any(|t| codec.contains(t)) {
        StreamKind::Audio
    } else if CAPTION_TOKENS.iter().any(|t| codec.contains(t)) {
        StreamKind::Caption
    } else {
        StreamKind::Unknown
    }
}

/// Containment match used for video and audio filters
pub fn matches(codec: &str, token: &str) -> bool {
    codec.contains(token)
}

/// Exact match used for caption filters
pub fn caption_matches(codec: &str, token: &str) -> bool {
    codec == token
}

/// Does `codec` match any of `tokens` under the rule for `kind`?
pub fn matches_any(kind: StreamKind, codec: &str, tokens: &[String]) -> bool {
    match kind {
        StreamKind::Caption => tokens.iter().any(|t| caption_matches(codec, t)),
        _ => tokens.iter().any(|t| matches(codec, t)),
    }
}

/// Split a `CODECS`/`codecs` attribute into trimmed, non-empty entries
pub fn split_codecs(codecs: &str) -> impl Iterator<Item = &str> {
    codecs.split(',').map(str::trim).filter(|c| !c.is_empty())
}
