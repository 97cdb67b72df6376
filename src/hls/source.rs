//! Playlist output spliced from the source lines
//!
//! The decoded `m3u8-rs` model decides which variants, renditions and
//! segments survive and which URIs change. The text written back reuses the
//! original lines, so untouched tags keep their attribute order and number
//! formatting (`FRAME-RATE=29.970`, `#EXTINF:6.000,`). When the source layout
//! does not line up with the model the render functions return `None` and
//! the caller falls back to the `m3u8-rs` writer.

use std::collections::HashMap;
use std::ops::Range;

use m3u8_rs::{AlternativeMedia, ClosedCaptionGroupId, MasterPlaylist, MediaPlaylist, MediaSegment, VariantStream};

use super::master::Survivors;
use super::media::is_ad_tag_name;
use crate::errors::HlsResult;

/// Playlist-level tags in a media playlist; everything else belongs to a segment
const PLAYLIST_TAGS: [&str; 13] = [
    "EXTM3U",
    "EXT-X-VERSION",
    "EXT-X-TARGETDURATION",
    "EXT-X-MEDIA-SEQUENCE",
    "EXT-X-DISCONTINUITY-SEQUENCE",
    "EXT-X-PLAYLIST-TYPE",
    "EXT-X-I-FRAMES-ONLY",
    "EXT-X-INDEPENDENT-SEGMENTS",
    "EXT-X-START",
    "EXT-X-ENDLIST",
    "EXT-X-ALLOW-CACHE",
    "EXT-X-SERVER-CONTROL",
    "EXT-X-PART-INF",
];

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    text: &'a str,
    ending: &'a str,
}

fn split_lines(raw: &str) -> Vec<Line<'_>> {
    raw.split_inclusive('\n')
        .map(|line| {
            let text = line.trim_end_matches(|c| c == '\r' || c == '\n');
            Line {
                text,
                ending: &line[text.len()..],
            }
        })
        .collect()
}

fn is_uri(text: &str) -> bool {
    !text.trim().is_empty() && !text.starts_with('#')
}

/// `EXT-X-STREAM-INF` for `#EXT-X-STREAM-INF:BANDWIDTH=...`
fn tag_name(text: &str) -> Option<&str> {
    let tag = text.strip_prefix('#')?;
    if !tag.starts_with("EXT") {
        return None;
    }
    Some(tag.split_once(':').map_or(tag, |(name, _)| name))
}

fn push_line(out: &mut String, text: &str, ending: &str) {
    out.push_str(text);
    out.push_str(ending);
}

fn quote(uri: &str) -> String {
    format!("\"{uri}\"")
}

/// Split an attribute list on commas outside quoted strings
fn split_attributes(list: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in list.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                items.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&list[start..]);
    items
}

/// Rewrite the attribute list of a tag line. `edit` gets each key and raw
/// value and returns the value to write, or `None` to drop the attribute.
/// Attributes `edit` hands back unchanged keep their bytes.
fn rewrite_attributes(text: &str, mut edit: impl FnMut(&str, &str) -> Option<String>) -> String {
    let Some((tag, list)) = text.split_once(':') else {
        return text.to_string();
    };
    let items: Vec<String> = split_attributes(list)
        .into_iter()
        .filter_map(|item| match item.split_once('=') {
            Some((key, value)) => edit(key.trim(), value).map(|value| format!("{key}={value}")),
            None => Some(item.to_string()),
        })
        .collect();
    format!("{tag}:{}", items.join(","))
}

fn replace_uri_attribute(text: &str, uri: &str) -> String {
    rewrite_attributes(text, |key, value| {
        Some(if key == "URI" { quote(uri) } else { value.to_string() })
    })
}

/// Write one element through `m3u8-rs`, without the `#EXTM3U` header
fn encode_single(playlist: MasterPlaylist) -> HlsResult<String> {
    let mut out = Vec::new();
    playlist.write_to(&mut out)?;
    let text = super::into_text(out)?;
    Ok(text
        .strip_prefix("#EXTM3U\n")
        .map(str::to_string)
        .unwrap_or(text))
}

/* --- Master playlists --- */

enum MasterBlock {
    Verbatim(usize),
    /// `EXT-X-STREAM-INF` through its URI line, or a lone `EXT-X-I-FRAME-STREAM-INF`
    Variant(Range<usize>),
    Rendition(usize),
}

fn master_blocks(lines: &[Line<'_>]) -> Option<Vec<MasterBlock>> {
    let mut blocks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        match tag_name(lines[i].text) {
            Some("EXT-X-STREAM-INF") => {
                let end = (i + 1..lines.len()).find(|&j| is_uri(lines[j].text))?;
                blocks.push(MasterBlock::Variant(i..end + 1));
                i = end + 1;
                continue;
            }
            Some("EXT-X-I-FRAME-STREAM-INF") => blocks.push(MasterBlock::Variant(i..i + 1)),
            Some("EXT-X-MEDIA") => blocks.push(MasterBlock::Rendition(i)),
            _ => blocks.push(MasterBlock::Verbatim(i)),
        }
        i += 1;
    }
    Some(blocks)
}

fn write_variant(
    out: &mut String,
    lines: &[Line<'_>],
    old: &VariantStream,
    new: &VariantStream,
) -> HlsResult<()> {
    let mut expected = old.clone();
    expected.uri = new.uri.clone();
    if new.audio.is_none() {
        expected.audio = None;
    }
    if new.subtitles.is_none() {
        expected.subtitles = None;
    }
    if new.closed_captions.is_none() {
        expected.closed_captions = None;
    }
    if &expected != new {
        // A plugin touched attributes the line editor does not know about
        out.push_str(&encode_single(MasterPlaylist {
            variants: vec![new.clone()],
            ..Default::default()
        })?);
        return Ok(());
    }

    let dropped = |key: &str| match key {
        "AUDIO" => old.audio.is_some() && new.audio.is_none(),
        "SUBTITLES" => old.subtitles.is_some() && new.subtitles.is_none(),
        "CLOSED-CAPTIONS" => {
            matches!(old.closed_captions, Some(ClosedCaptionGroupId::GroupId(_)))
                && new.closed_captions.is_none()
        }
        _ => false,
    };
    let uri_changed = old.uri != new.uri;

    let Some((tag, rest)) = lines.split_first() else {
        return Ok(());
    };
    let text = rewrite_attributes(tag.text, |key, value| {
        if dropped(key) {
            None
        } else if new.is_i_frame && uri_changed && key == "URI" {
            Some(quote(&new.uri))
        } else {
            Some(value.to_string())
        }
    });
    push_line(out, &text, tag.ending);

    for line in rest {
        if uri_changed && is_uri(line.text) {
            push_line(out, &new.uri, line.ending);
        } else {
            push_line(out, line.text, line.ending);
        }
    }
    Ok(())
}

fn write_rendition(
    out: &mut String,
    line: Line<'_>,
    old: &AlternativeMedia,
    new: &AlternativeMedia,
) -> HlsResult<()> {
    let mut expected = old.clone();
    expected.uri = new.uri.clone();
    if &expected != new {
        out.push_str(&encode_single(MasterPlaylist {
            alternatives: vec![new.clone()],
            ..Default::default()
        })?);
        return Ok(());
    }

    match new.uri.as_deref() {
        Some(uri) if old.uri != new.uri => {
            push_line(out, &replace_uri_attribute(line.text, uri), line.ending)
        }
        _ => push_line(out, line.text, line.ending),
    }
    Ok(())
}

/// Write the filtered master playlist from the lines of `raw`
pub(crate) fn render_master(
    raw: &str,
    original: &MasterPlaylist,
    filtered: &MasterPlaylist,
    survivors: &Survivors,
) -> HlsResult<Option<String>> {
    let lines = split_lines(raw);
    let Some(blocks) = master_blocks(&lines) else {
        return Ok(None);
    };

    let variant_blocks = blocks
        .iter()
        .filter(|b| matches!(b, MasterBlock::Variant(_)))
        .count();
    let rendition_blocks = blocks
        .iter()
        .filter(|b| matches!(b, MasterBlock::Rendition(_)))
        .count();
    if variant_blocks != original.variants.len()
        || rendition_blocks != original.alternatives.len()
        || survivors.variants.len() != filtered.variants.len()
        || survivors.alternatives.len() != filtered.alternatives.len()
    {
        return Ok(None);
    }

    let variants: HashMap<usize, &VariantStream> = survivors
        .variants
        .iter()
        .copied()
        .zip(filtered.variants.iter())
        .collect();
    let renditions: HashMap<usize, &AlternativeMedia> = survivors
        .alternatives
        .iter()
        .copied()
        .zip(filtered.alternatives.iter())
        .collect();

    let mut out = String::with_capacity(raw.len());
    let (mut next_variant, mut next_rendition) = (0, 0);
    for block in blocks {
        match block {
            MasterBlock::Verbatim(i) => push_line(&mut out, lines[i].text, lines[i].ending),
            MasterBlock::Variant(range) => {
                let index = next_variant;
                next_variant += 1;
                if let (Some(new), Some(old)) = (variants.get(&index), original.variants.get(index)) {
                    write_variant(&mut out, &lines[range], old, new)?;
                }
            }
            MasterBlock::Rendition(i) => {
                let index = next_rendition;
                next_rendition += 1;
                if let (Some(new), Some(old)) = (renditions.get(&index), original.alternatives.get(index)) {
                    write_rendition(&mut out, lines[i], old, new)?;
                }
            }
        }
    }
    Ok(Some(out))
}

/* --- Media playlists --- */

enum MediaBlock {
    Playlist(usize),
    /// Segment tags through the URI line
    Segment(Range<usize>),
}

fn media_blocks(lines: &[Line<'_>]) -> Vec<MediaBlock> {
    let mut blocks = Vec::new();
    let mut pending: Option<usize> = None;
    for (i, line) in lines.iter().enumerate() {
        if is_uri(line.text) {
            blocks.push(MediaBlock::Segment(pending.take().unwrap_or(i)..i + 1));
        } else if pending.is_none() {
            match tag_name(line.text) {
                Some(name) if PLAYLIST_TAGS.contains(&name) => blocks.push(MediaBlock::Playlist(i)),
                _ => pending = Some(i),
            }
        }
    }
    // Trailing lines with no URI after them
    if let Some(start) = pending {
        blocks.extend((start..lines.len()).map(MediaBlock::Playlist));
    }
    blocks
}

fn write_segment(
    out: &mut String,
    lines: &[Line<'_>],
    old: &MediaSegment,
    new: &MediaSegment,
    strip_ads: bool,
) {
    let key_uri = new.key.as_ref().and_then(|k| k.uri.as_deref());
    let key_changed = key_uri != old.key.as_ref().and_then(|k| k.uri.as_deref());
    let map_uri = new.map.as_ref().map(|m| m.uri.as_str());
    let map_changed = map_uri != old.map.as_ref().map(|m| m.uri.as_str());

    for line in lines {
        if is_uri(line.text) {
            let uri = if old.uri != new.uri { new.uri.as_str() } else { line.text };
            push_line(out, uri, line.ending);
            continue;
        }
        match tag_name(line.text) {
            Some(name) if strip_ads && is_ad_tag_name(name) => {}
            Some("EXT-X-KEY") if key_changed => match key_uri {
                Some(uri) => push_line(out, &replace_uri_attribute(line.text, uri), line.ending),
                None => push_line(out, line.text, line.ending),
            },
            Some("EXT-X-MAP") if map_changed => match map_uri {
                Some(uri) => push_line(out, &replace_uri_attribute(line.text, uri), line.ending),
                None => push_line(out, line.text, line.ending),
            },
            _ => push_line(out, line.text, line.ending),
        }
    }
}

/// Write the filtered media playlist from the lines of `raw`
///
/// `kept` lists the source positions of `filtered.segments`.
pub(crate) fn render_media(
    raw: &str,
    original: &MediaPlaylist,
    filtered: &MediaPlaylist,
    kept: &[usize],
    strip_ads: bool,
) -> Option<String> {
    let lines = split_lines(raw);
    let blocks = media_blocks(&lines);

    let segment_blocks = blocks
        .iter()
        .filter(|b| matches!(b, MediaBlock::Segment(_)))
        .count();
    if segment_blocks != original.segments.len() || kept.len() != filtered.segments.len() {
        return None;
    }

    let segments: HashMap<usize, &MediaSegment> =
        kept.iter().copied().zip(filtered.segments.iter()).collect();
    let has_tag = |wanted: &str| lines.iter().any(|l| tag_name(l.text) == Some(wanted));
    let sequence_moved = filtered.media_sequence != original.media_sequence;
    let discontinuity_moved = filtered.discontinuity_sequence != original.discontinuity_sequence;
    let mut missing_sequence = sequence_moved && !has_tag("EXT-X-MEDIA-SEQUENCE");
    let mut missing_discontinuity =
        discontinuity_moved && !has_tag("EXT-X-DISCONTINUITY-SEQUENCE");
    let ending = lines
        .first()
        .map(|l| l.ending)
        .filter(|e| !e.is_empty())
        .unwrap_or("\n");

    let mut out = String::with_capacity(raw.len());
    let mut next_segment = 0;
    for block in blocks {
        match block {
            MediaBlock::Playlist(i) => {
                let line = lines[i];
                match tag_name(line.text) {
                    Some("EXT-X-MEDIA-SEQUENCE") if sequence_moved => push_line(
                        &mut out,
                        &format!("#EXT-X-MEDIA-SEQUENCE:{}", filtered.media_sequence),
                        line.ending,
                    ),
                    Some("EXT-X-DISCONTINUITY-SEQUENCE") if discontinuity_moved => push_line(
                        &mut out,
                        &format!("#EXT-X-DISCONTINUITY-SEQUENCE:{}", filtered.discontinuity_sequence),
                        line.ending,
                    ),
                    Some(name) if strip_ads && is_ad_tag_name(name) => {}
                    Some("EXT-X-TARGETDURATION") => {
                        push_line(&mut out, line.text, line.ending);
                        if std::mem::take(&mut missing_sequence) {
                            push_line(
                                &mut out,
                                &format!("#EXT-X-MEDIA-SEQUENCE:{}", filtered.media_sequence),
                                ending,
                            );
                        }
                        if std::mem::take(&mut missing_discontinuity) {
                            push_line(
                                &mut out,
                                &format!(
                                    "#EXT-X-DISCONTINUITY-SEQUENCE:{}",
                                    filtered.discontinuity_sequence
                                ),
                                ending,
                            );
                        }
                    }
                    _ => push_line(&mut out, line.text, line.ending),
                }
            }
            MediaBlock::Segment(range) => {
                let index = next_segment;
                next_segment += 1;
                if let (Some(new), Some(old)) = (segments.get(&index), original.segments.get(index)) {
                    write_segment(&mut out, &lines[range], old, new, strip_ads);
                }
            }
        }
    }

    if missing_sequence || missing_discontinuity {
        // No target duration line to anchor the sequence tags to
        return None;
    }
    if filtered.end_list && !original.end_list {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push_str(ending);
        }
        push_line(&mut out, "#EXT-X-ENDLIST", ending);
    }
    Some(out)
}
