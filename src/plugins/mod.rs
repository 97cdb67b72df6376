//! Named manifest rewrites applied after filtering
//!
//! A plugin edits attributes of what survived filtering. The HLS hook only
//! receives slices, so it cannot add or remove variants or renditions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use m3u8_rs::{AlternativeMedia, VariantStream};
use tracing::{debug, warn};

use crate::dash::tree::Element;

pub trait ManifestPlugin: Send + Sync {
    /// Name used in the `[name]` path marker
    fn name(&self) -> &'static str;

    fn rewrite_hls(&self, _variants: &mut [VariantStream], _alternatives: &mut [AlternativeMedia]) {}

    fn rewrite_dash(&self, _mpd: &mut Element) {}
}

/// Plugins by name
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<&'static str, Arc<dyn ManifestPlugin>>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.plugins.keys().copied().collect();
        names.sort_unstable();
        f.debug_struct("PluginRegistry").field("plugins", &names).finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in plugin
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DvsRoleOverride));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn ManifestPlugin>) {
        self.plugins.insert(plugin.name(), plugin);
    }

    /// Look up requested plugins in request order; unknown names are skipped
    pub fn resolve(&self, names: &[String]) -> Vec<Arc<dyn ManifestPlugin>> {
        names
            .iter()
            .filter_map(|name| match self.plugins.get(name.as_str()) {
                Some(plugin) => Some(Arc::clone(plugin)),
                None => {
                    warn!(target = "manifest.plugins", plugin = %name, "unknown plugin requested, skipping");
                    None
                }
            })
            .collect()
    }
}

/// Marks described-video audio with the DASH `description` role
///
/// Adaptation sets flagged through TV-Anytime `AudioPurposeCS` value `1`
/// (visually impaired) get their `Role` rewritten, or one added.
#[derive(Debug, Clone, Copy, Default)]
pub struct DvsRoleOverride;

const AUDIO_PURPOSE_SCHEME: &str = "urn:tva:metadata:cs:AudioPurposeCS:2007";
const VISUALLY_IMPAIRED: &str = "1";
const ROLE_SCHEME: &str = "urn:mpeg:dash:role:2011";
const DESCRIPTION_ROLE: &str = "description";
/// Elements that precede `Role` inside an `AdaptationSet`
const ROLE_PREDECESSORS: &[&str] = &[
    "FramePacking",
    "AudioChannelConfiguration",
    "ContentProtection",
    "EssentialProperty",
    "SupplementalProperty",
    "InbandEventStream",
    "Accessibility",
];

impl DvsRoleOverride {
    fn is_described_video(set: &Element) -> bool {
        set.children_named("Accessibility").any(|a| {
            a.attr("schemeIdUri") == Some(AUDIO_PURPOSE_SCHEME)
                && a.attr("value") == Some(VISUALLY_IMPAIRED)
        })
    }

    fn override_role(set: &mut Element) {
        let mut found = false;
        for role in set.children_named_mut("Role") {
            if role.attr("schemeIdUri") == Some(ROLE_SCHEME) {
                role.set_attr("value", DESCRIPTION_ROLE);
                found = true;
            }
        }
        if !found {
            let mut role = Element::new(format!("{}Role", set.prefix()));
            role.set_attr("schemeIdUri", ROLE_SCHEME);
            role.set_attr("value", DESCRIPTION_ROLE);
            set.insert_element(role, ROLE_PREDECESSORS);
        }
    }
}

impl ManifestPlugin for DvsRoleOverride {
    fn name(&self) -> &'static str {
        "dvsRoleOverride"
    }

    fn rewrite_dash(&self, mpd: &mut Element) {
        for period in mpd.children_named_mut("Period") {
            for set in period.children_named_mut("AdaptationSet") {
                if Self::is_described_video(set) {
                    debug!(
                        target = "manifest.plugins",
                        adaptation_set = set.attr("id").unwrap_or(""),
                        "overriding role for described video"
                    );
                    Self::override_role(set);
                }
            }
        }
    }
}
