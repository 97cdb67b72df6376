//! DASH filter engine
//!
//! Works on a lossless [`tree::Document`] so attribute values stay the
//! strings the packager wrote. Passes run per period in a fixed order and
//! only when their filter is set.

pub mod tree;

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::errors::{DashError, DashResult};
use crate::filters::codec::{classify, matches_any, split_codecs};
use crate::filters::{FilterSet, Range, StreamKind};
use crate::plugins::ManifestPlugin;
use crate::utils::url::{directory_of, is_absolute, resolve};

use tree::{Document, Element};

/// Elements allowed in front of an MPD-level `BaseURL`
const BASE_URL_PREDECESSORS: &[&str] = &["ProgramInformation"];

/// One request's worth of DASH filtering
pub struct DashFilter {
    plugins: Vec<Arc<dyn ManifestPlugin>>,
}

impl DashFilter {
    pub fn new(plugins: Vec<Arc<dyn ManifestPlugin>>) -> Self {
        Self { plugins }
    }

    /// Filter `raw`, fetched from `manifest_url`, according to `filters`
    pub fn filter_manifest(
        &self,
        filters: &FilterSet,
        manifest_url: &Url,
        raw: &str,
    ) -> DashResult<String> {
        let mut doc = Document::parse(raw)?;
        let mpd = doc
            .root_mut()
            .filter(|root| root.local_name() == "MPD")
            .ok_or(DashError::MissingRoot)?;

        resolve_base_url(mpd, manifest_url)?;
        filter_periods(mpd, filters);

        for plugin in &self.plugins {
            debug!(target = "manifest.dash", plugin = plugin.name(), "applying plugin");
            plugin.rewrite_dash(mpd);
        }

        doc.to_xml()
    }

    /// DASH has no cache hint
    pub fn max_age(&self) -> &str {
        ""
    }
}

/* --- Base URL --- */

fn resolve_base_url(mpd: &mut Element, manifest_url: &Url) -> DashResult<()> {
    let directory = directory_of(manifest_url)
        .map_err(|e| DashError::invalid_uri(manifest_url.as_str(), e.to_string()))?;

    match mpd.child_mut("BaseURL") {
        Some(base) => {
            let current = base.text()?;
            let reference = current.trim();
            if !is_absolute(reference) {
                let resolved = resolve(&directory, reference)
                    .map_err(|e| DashError::invalid_uri(reference, e.to_string()))?;
                base.set_text(resolved.as_str());
            }
        }
        None => {
            let mut base = Element::new(format!("{}BaseURL", mpd.prefix()));
            base.set_text(directory.as_str());
            mpd.insert_element(base, BASE_URL_PREDECESSORS);
        }
    }
    Ok(())
}

/* --- Classification --- */

/// Stream kind of an adaptation set: `contentType`, else `mimeType`, else codecs
fn content_type(set: &Element) -> Option<String> {
    if let Some(ct) = set.attr("contentType") {
        return Some(ct.to_ascii_lowercase());
    }

    let mime = set
        .attr("mimeType")
        .or_else(|| set.child("Representation").and_then(|r| r.attr("mimeType")));
    if let Some((major, _)) = mime.and_then(|m| m.split_once('/')) {
        if matches!(major, "video" | "audio" | "text" | "image") {
            return Some(major.to_ascii_lowercase());
        }
    }

    let codecs = set
        .attr("codecs")
        .or_else(|| set.child("Representation").and_then(|r| r.attr("codecs")))?;
    split_codecs(codecs).find_map(|codec| match classify(codec) {
        StreamKind::Video => Some("video".to_string()),
        StreamKind::Audio => Some("audio".to_string()),
        StreamKind::Caption => Some("text".to_string()),
        StreamKind::Unknown => None,
    })
}

fn kind_of(set: &Element) -> StreamKind {
    match content_type(set).as_deref() {
        Some("video") => StreamKind::Video,
        Some("audio") => StreamKind::Audio,
        Some("text") => StreamKind::Caption,
        _ => StreamKind::Unknown,
    }
}

/* --- Passes --- */

fn filter_periods(mpd: &mut Element, filters: &FilterSet) {
    let bitrate_set = filters.videos.bitrate.is_some() || filters.audios.bitrate.is_some();
    let codecs_set = [&filters.videos, &filters.audios, &filters.captions]
        .iter()
        .any(|n| !n.codecs.is_empty());
    let language_set = !filters.audios.language.is_empty() || !filters.captions.language.is_empty();

    let mut emptied = Vec::new();
    for period in mpd.children_named_mut("Period") {
        let had_sets = period.child("AdaptationSet").is_some();

        if !filters.content_types.is_empty() {
            period.retain_elements("AdaptationSet", |set| {
                !content_type(set).is_some_and(|ct| filters.excludes_content_type(&ct))
            });
            renumber(period, "AdaptationSet");
        }

        if bitrate_set {
            period.retain_elements("AdaptationSet", |set| filter_bandwidth(set, filters));
            renumber(period, "AdaptationSet");
        }

        if codecs_set {
            period.retain_elements("AdaptationSet", |set| filter_codecs(set, filters));
            renumber(period, "AdaptationSet");
        }

        if !filters.frame_rates.is_empty() {
            period.retain_elements("AdaptationSet", |set| {
                filter_frame_rates(set, &filters.frame_rates)
            });
        }

        if language_set {
            period.retain_elements("AdaptationSet", |set| {
                let lang = set.attr("lang").unwrap_or("");
                let excluded = match kind_of(set) {
                    StreamKind::Audio => filters.audios.excludes_language(lang),
                    StreamKind::Caption => filters.captions.excludes_language(lang),
                    _ => false,
                };
                if excluded {
                    debug!(target = "manifest.dash", lang = lang, "dropping adaptation set");
                }
                !excluded
            });
        }

        emptied.push(had_sets && period.child("AdaptationSet").is_none());
    }

    let mut emptied = emptied.into_iter();
    let removed = mpd.retain_elements("Period", |_| !emptied.next().unwrap_or(false));
    if removed > 0 {
        debug!(target = "manifest.dash", periods = removed, "dropped emptied periods");
    }
    if removed > 0 || !filters.content_types.is_empty() {
        renumber(mpd, "Period");
    }
}

/// Rewrite `id` of every `name` child to `0..n-1` in document order
fn renumber(parent: &mut Element, name: &str) {
    for (index, child) in parent.children_named_mut(name).enumerate() {
        child.set_attr("id", index.to_string());
    }
}

/// Bandwidth pass for one adaptation set; false drops the set
fn filter_bandwidth(set: &mut Element, filters: &FilterSet) -> bool {
    let Some(range) = filters.nested(kind_of(set)).and_then(|n| n.bitrate) else {
        return true;
    };

    set.retain_elements("Representation", |rep| in_range(rep, &range));
    if set.child("Representation").is_none() {
        return false;
    }

    let max_of = |attr: &str| {
        set.children_named("Representation")
            .filter_map(|r| r.attr(attr).and_then(|v| v.parse::<u64>().ok()))
            .max()
    };
    let (max_width, max_height) = (max_of("width"), max_of("height"));
    if let Some(width) = max_width {
        set.set_attr("maxWidth", width.to_string());
    }
    if let Some(height) = max_height {
        set.set_attr("maxHeight", height.to_string());
    }
    true
}

fn in_range(rep: &Element, range: &Range) -> bool {
    match rep.attr("bandwidth").and_then(|b| b.parse::<i64>().ok()) {
        Some(bandwidth) => range.contains(bandwidth),
        None => true,
    }
}

/// Codec pass for one adaptation set; false drops the set
fn filter_codecs(set: &mut Element, filters: &FilterSet) -> bool {
    let set_kind = kind_of(set);
    let set_codecs = set.attr("codecs").map(str::to_string);

    set.retain_elements("Representation", |rep| {
        let codecs = rep.attr("codecs").or(set_codecs.as_deref()).unwrap_or("");
        let excluded = split_codecs(codecs).any(|codec| {
            let kind = match classify(codec) {
                StreamKind::Unknown => set_kind,
                kind => kind,
            };
            filters.nested(kind).is_some_and(|n| matches_any(kind, codec, &n.codecs))
        });
        if excluded {
            debug!(
                target = "manifest.dash",
                representation = rep.attr("id").unwrap_or(""),
                codecs = codecs,
                "dropping representation"
            );
        }
        !excluded
    });
    set.child("Representation").is_some()
}

/// Frame-rate pass for one adaptation set; false drops the set
fn filter_frame_rates(set: &mut Element, frame_rates: &[String]) -> bool {
    let excluded =
        |value: Option<&str>| value.is_some_and(|fr| frame_rates.iter().any(|x| x == fr));
    if excluded(set.attr("frameRate")) {
        return false;
    }
    set.retain_elements("Representation", |rep| !excluded(rep.attr("frameRate")));
    set.child("Representation").is_some()
}
