//! HLS filter engine
//!
//! Decodes a master or media playlist with `m3u8-rs`, runs the requested
//! filters and writes the playlist back out from its source lines. Media
//! playlists also yield a cache hint through [`HlsFilter::max_age`].

pub mod deweave;
pub mod master;
pub mod media;
pub mod redirect;
mod source;

use std::sync::Arc;

use m3u8_rs::{parse_playlist_res, MasterPlaylist, MediaPlaylist, Playlist};
use tracing::debug;
use url::Url;

use crate::errors::{HlsError, HlsResult};
use crate::filters::FilterSet;
use crate::origin::ManifestFetcher;
use crate::plugins::ManifestPlugin;
use crate::utils::time::Clock;
use master::Survivors;

pub use deweave::Ladder;
pub use media::SegmentState;
pub use redirect::{RedirectHost, TrimDescriptor};

/// One request's worth of HLS filtering
pub struct HlsFilter {
    host: RedirectHost,
    fetcher: Arc<dyn ManifestFetcher>,
    clock: Arc<dyn Clock>,
    plugins: Vec<Arc<dyn ManifestPlugin>>,
    max_age: String,
}

impl HlsFilter {
    pub fn new(
        host: RedirectHost,
        fetcher: Arc<dyn ManifestFetcher>,
        clock: Arc<dyn Clock>,
        plugins: Vec<Arc<dyn ManifestPlugin>>,
    ) -> Self {
        Self {
            host,
            fetcher,
            clock,
            plugins,
            max_age: String::new(),
        }
    }

    /// Filter `raw`, fetched from `manifest_url`, according to `filters`
    pub async fn filter_manifest(
        &mut self,
        filters: &FilterSet,
        manifest_url: &Url,
        raw: &str,
    ) -> HlsResult<String> {
        let playlist = parse_playlist_res(raw.as_bytes())
            .map_err(|_| HlsError::decode(format!("{manifest_url} is not a valid HLS playlist")))?;

        match playlist {
            Playlist::MasterPlaylist(master) => {
                self.max_age.clear();
                self.filter_master(filters, manifest_url, raw, master).await
            }
            Playlist::MediaPlaylist(media) => self.filter_media(filters, manifest_url, raw, media),
        }
    }

    /// Cache hint in seconds, set by the last media playlist call
    pub fn max_age(&self) -> &str {
        &self.max_age
    }

    async fn filter_master(
        &self,
        filters: &FilterSet,
        manifest_url: &Url,
        raw: &str,
        mut playlist: MasterPlaylist,
    ) -> HlsResult<String> {
        let original = playlist.clone();
        let mut survivors = Survivors::of(&playlist);

        if filters.deweave {
            let ladder = deweave::deweave(
                &mut playlist,
                manifest_url,
                self.fetcher.as_ref(),
                self.clock.now(),
            )
            .await?;
            survivors.keep_ladder(ladder);
        }

        master::filter_master(&mut playlist, &mut survivors, filters, manifest_url, &self.host)?;

        for plugin in &self.plugins {
            debug!(target = "manifest.hls", plugin = plugin.name(), "applying plugin");
            plugin.rewrite_hls(&mut playlist.variants, &mut playlist.alternatives);
        }

        if let Some(text) = source::render_master(raw, &original, &playlist, &survivors)? {
            return Ok(text);
        }
        debug!(target = "manifest.hls", "source layout differs from the decoded playlist, re-encoding");
        let mut out = Vec::new();
        playlist.write_to(&mut out)?;
        into_text(out)
    }

    fn filter_media(
        &mut self,
        filters: &FilterSet,
        manifest_url: &Url,
        raw: &str,
        playlist: MediaPlaylist,
    ) -> HlsResult<String> {
        let original = playlist.clone();
        let filtered = media::filter_media(filters, manifest_url, playlist)?;

        self.max_age = if filtered.max_segment_duration > 0.0 {
            format!("{}", (filtered.max_segment_duration / 2.0).round() as i64)
        } else {
            String::new()
        };

        let spliced = source::render_media(
            raw,
            &original,
            &filtered.playlist,
            &filtered.kept,
            filters.suppress_ads(),
        );
        let text = match spliced {
            Some(text) => text,
            None => {
                debug!(target = "manifest.hls", "source layout differs from the decoded playlist, re-encoding");
                let mut out = Vec::new();
                filtered.playlist.write_to(&mut out)?;
                into_text(out)?
            }
        };

        if filtered.playlist.segments.is_empty() {
            return Err(HlsError::NoSegmentsInRange {
                empty_playlist: text,
            });
        }
        Ok(text)
    }
}

fn into_text(bytes: Vec<u8>) -> HlsResult<String> {
    String::from_utf8(bytes)
        .map_err(|e| HlsError::Encode(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchResult;
    use crate::filters::{NestedFilter, Tags, Trim};
    use crate::origin::FetchedManifest;
    use crate::plugins::PluginRegistry;
    use crate::utils::time::FixedClock;
    use async_trait::async_trait;
    use chrono::DateTime;

    /// Fetcher for tests that never need the network
    struct Unreachable;

    #[async_trait]
    impl ManifestFetcher for Unreachable {
        async fn fetch(&self, url: &Url) -> FetchResult<FetchedManifest> {
            Err(crate::errors::FetchError::request(url.as_str(), "offline"))
        }
    }

    fn engine() -> HlsFilter {
        HlsFilter::new(
            RedirectHost::new("https", "gateway.test", 8080),
            Arc::new(Unreachable),
            Arc::new(FixedClock::at_timestamp(1_700_000_000)),
            PluginRegistry::with_builtins().resolve(&["dvsRoleOverride".to_string()]),
        )
    }

    fn ms(rfc3339: &str) -> i64 {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().timestamp_millis()
    }

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:100
#EXT-X-PROGRAM-DATE-TIME:2020-01-01T00:51:48.000Z
#EXTINF:6.000,
http://origin.test/live/s100.ts
#EXT-X-PROGRAM-DATE-TIME:2020-01-01T00:52:00.000Z
#EXTINF:6.000,
http://origin.test/live/s101.ts
#EXT-X-PROGRAM-DATE-TIME:2020-01-01T00:52:24.000Z
#EXTINF:6.000,
http://origin.test/live/s102.ts
#EXT-X-PROGRAM-DATE-TIME:2020-01-01T00:52:30.000Z
#EXTINF:6.000,
http://origin.test/live/s103.ts
";

    const MASTER: &str = r#"#EXTM3U
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="aud",LANGUAGE="en",NAME="English",URI="http://origin.test/vod/en.m3u8"
#EXT-X-STREAM-INF:BANDWIDTH=1200000,CODECS="avc1.64001f,mp4a.40.2",RESOLUTION=640x360,AUDIO="aud"
http://origin.test/vod/360.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=5000000,CODECS="hvc1.2.4.L153.b0,mp4a.40.2",RESOLUTION=1920x1080,AUDIO="aud"
http://origin.test/vod/1080.m3u8
"#;

    fn parse_media(text: &str) -> MediaPlaylist {
        match parse_playlist_res(text.as_bytes()) {
            Ok(Playlist::MediaPlaylist(p)) => p,
            _ => panic!("expected a media playlist"),
        }
    }

    fn parse_master(text: &str) -> MasterPlaylist {
        match parse_playlist_res(text.as_bytes()) {
            Ok(Playlist::MasterPlaylist(p)) => p,
            _ => panic!("expected a master playlist"),
        }
    }

    #[tokio::test]
    async fn trims_media_playlist_to_window() {
        let filters = FilterSet {
            trim: Some(Trim {
                start: ms("2020-01-01T00:52:00Z"),
                end: ms("2020-01-01T00:52:24Z"),
            }),
            ..Default::default()
        };
        let url = Url::parse("http://origin.test/live/index.m3u8").unwrap();
        let mut hls = engine();
        let out = hls.filter_manifest(&filters, &url, MEDIA).await.unwrap();

        let playlist = parse_media(&out);
        let uris: Vec<_> = playlist.segments.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec!["http://origin.test/live/s101.ts", "http://origin.test/live/s102.ts"]
        );
        assert!(playlist.end_list);
        assert!(out.contains("#EXT-X-ENDLIST"));
        assert_eq!(hls.max_age(), "3");
    }

    #[tokio::test]
    async fn empty_window_returns_the_shell_with_the_error() {
        let filters = FilterSet {
            trim: Some(Trim {
                start: ms("2021-01-01T00:00:00Z"),
                end: ms("2021-01-01T01:00:00Z"),
            }),
            ..Default::default()
        };
        let url = Url::parse("http://origin.test/live/index.m3u8").unwrap();
        let err = engine()
            .filter_manifest(&filters, &url, MEDIA)
            .await
            .unwrap_err();

        match err {
            HlsError::NoSegmentsInRange { empty_playlist } => {
                let shell = parse_media(&empty_playlist);
                assert!(shell.segments.is_empty());
                assert!(shell.end_list);
                assert_eq!(shell.target_duration, parse_media(MEDIA).target_duration);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_filters_return_the_same_bytes() {
        let url = Url::parse("http://origin.test/vod/master.m3u8").unwrap();
        let filters = FilterSet::default();
        let mut hls = engine();

        let once = hls.filter_manifest(&filters, &url, MASTER).await.unwrap();
        assert_eq!(once, MASTER);
        assert_eq!(hls.max_age(), "");

        let once = hls.filter_manifest(&filters, &url, MEDIA).await.unwrap();
        assert_eq!(once, MEDIA);
    }

    #[tokio::test]
    async fn untouched_tags_keep_attribute_order_and_number_text() {
        let raw = r#"#EXTM3U
#EXT-X-VERSION:6
#EXT-X-MEDIA:NAME="English",TYPE=AUDIO,GROUP-ID="aud",LANGUAGE="en",URI="http://origin.test/vod/en.m3u8"
#EXT-X-STREAM-INF:RESOLUTION=640x360,BANDWIDTH=1000,CODECS="avc1.64001f,mp4a.40.2",FRAME-RATE=29.970,AUDIO="aud"
http://origin.test/vod/360.m3u8
#EXT-X-STREAM-INF:RESOLUTION=1920x1080,BANDWIDTH=6000,CODECS="hvc1.2.4.L153.b0,mp4a.40.2",FRAME-RATE=59.940,AUDIO="aud"
http://origin.test/vod/1080.m3u8
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=500,URI="http://origin.test/vod/iframe.m3u8"
"#;
        let url = Url::parse("http://origin.test/vod/master.m3u8").unwrap();
        let mut hls = engine();
        assert_eq!(
            hls.filter_manifest(&FilterSet::default(), &url, raw).await.unwrap(),
            raw
        );

        // Removing a variant leaves every other line as it was
        let filters = FilterSet {
            videos: NestedFilter {
                codecs: vec!["hvc".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let out = hls.filter_manifest(&filters, &url, raw).await.unwrap();
        let expected = raw
            .replace("#EXT-X-STREAM-INF:RESOLUTION=1920x1080,BANDWIDTH=6000,CODECS=\"hvc1.2.4.L153.b0,mp4a.40.2\",FRAME-RATE=59.940,AUDIO=\"aud\"\n", "")
            .replace("http://origin.test/vod/1080.m3u8\n", "");
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn relative_uris_are_the_only_lines_rewritten() {
        let raw = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-KEY:METHOD=AES-128,URI=\"k1\",IV=0x1\n#EXTINF:6.000,\ns1.ts\n#EXTINF:5.500,\ns2.ts\n#EXT-X-ENDLIST\n";
        let url = Url::parse("http://origin.test/vod/index.m3u8").unwrap();
        let out = engine()
            .filter_manifest(&FilterSet::default(), &url, raw)
            .await
            .unwrap();
        assert_eq!(
            out,
            "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-KEY:METHOD=AES-128,URI=\"http://origin.test/vod/k1\",IV=0x1\n#EXTINF:6.000,\nhttp://origin.test/vod/s1.ts\n#EXTINF:5.500,\nhttp://origin.test/vod/s2.ts\n#EXT-X-ENDLIST\n"
        );
    }

    #[tokio::test]
    async fn trimming_rewrites_only_the_sequence_header() {
        let filters = FilterSet {
            trim: Some(Trim {
                start: ms("2020-01-01T00:52:00Z"),
                end: ms("2020-01-01T00:52:24Z"),
            }),
            ..Default::default()
        };
        let url = Url::parse("http://origin.test/live/index.m3u8").unwrap();
        let out = engine().filter_manifest(&filters, &url, MEDIA).await.unwrap();

        assert_eq!(
            out,
            "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:101
#EXT-X-PROGRAM-DATE-TIME:2020-01-01T00:52:00.000Z
#EXTINF:6.000,
http://origin.test/live/s101.ts
#EXT-X-PROGRAM-DATE-TIME:2020-01-01T00:52:24.000Z
#EXTINF:6.000,
http://origin.test/live/s102.ts
#EXT-X-ENDLIST
"
        );
    }

    #[tokio::test]
    async fn filters_master_playlists() {
        let filters = FilterSet {
            videos: NestedFilter {
                codecs: vec!["hev1.2".to_string(), "hvc1.2".to_string()],
                ..Default::default()
            },
            tags: Some(Tags {
                ads: false,
                iframe: true,
            }),
            ..Default::default()
        };
        let url = Url::parse("http://origin.test/vod/master.m3u8").unwrap();
        let out = engine().filter_manifest(&filters, &url, MASTER).await.unwrap();

        let playlist = parse_master(&out);
        assert_eq!(playlist.variants.len(), 1);
        assert_eq!(playlist.variants[0].uri, "http://origin.test/vod/360.m3u8");
        assert_eq!(playlist.alternatives.len(), 1);
    }

    #[tokio::test]
    async fn rejects_non_playlists() {
        let url = Url::parse("http://origin.test/vod/master.m3u8").unwrap();
        let err = engine()
            .filter_manifest(&FilterSet::default(), &url, "<MPD/>")
            .await
            .unwrap_err();
        assert!(matches!(err, HlsError::Decode { .. }));
    }

    #[tokio::test]
    async fn deweave_falls_back_to_backup_when_probe_fails() {
        let woven = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1000
http://primary.test/low.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1000
http://backup.test/low.m3u8
";
        let filters = FilterSet {
            deweave: true,
            ..Default::default()
        };
        let url = Url::parse("http://origin.test/vod/master.m3u8").unwrap();
        let out = engine().filter_manifest(&filters, &url, woven).await.unwrap();

        let playlist = parse_master(&out);
        assert_eq!(playlist.variants.len(), 1);
        assert_eq!(playlist.variants[0].uri, "http://backup.test/low.m3u8");
    }

    struct DoubleBandwidth;

    impl ManifestPlugin for DoubleBandwidth {
        fn name(&self) -> &'static str {
            "doubleBandwidth"
        }

        fn rewrite_hls(
            &self,
            variants: &mut [m3u8_rs::VariantStream],
            _alternatives: &mut [m3u8_rs::AlternativeMedia],
        ) {
            for variant in variants {
                variant.bandwidth *= 2;
            }
        }
    }

    #[tokio::test]
    async fn plugin_edits_re_encode_only_the_touched_variants() {
        let mut hls = HlsFilter::new(
            RedirectHost::new("https", "gateway.test", 8080),
            Arc::new(Unreachable),
            Arc::new(FixedClock::at_timestamp(1_700_000_000)),
            vec![Arc::new(DoubleBandwidth)],
        );
        let url = Url::parse("http://origin.test/vod/master.m3u8").unwrap();
        let out = hls.filter_manifest(&FilterSet::default(), &url, MASTER).await.unwrap();

        assert!(out.starts_with("#EXTM3U\n#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",LANGUAGE=\"en\""));
        let playlist = parse_master(&out);
        let bandwidths: Vec<_> = playlist.variants.iter().map(|v| v.bandwidth).collect();
        assert_eq!(bandwidths, vec![2_400_000, 10_000_000]);
    }
}
