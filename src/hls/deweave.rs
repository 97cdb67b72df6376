//! Primary/backup de-weaving of interleaved master playlists
//!
//! Some packagers interleave a primary and a backup rendition ladder:
//! variants 1, 3, 5, ... are primary and 2, 4, 6, ... are backup. One probe
//! of the first primary media playlist decides which ladder is served.

use chrono::{DateTime, Utc};
use m3u8_rs::{parse_playlist_res, MasterPlaylist, Playlist, VariantStream};
use tracing::{debug, warn};
use url::Url;

use crate::errors::{FetchError, HlsError, HlsResult};
use crate::origin::{FetchedManifest, ManifestFetcher};
use crate::utils::url::resolve;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ladder {
    Primary,
    Backup,
}

/// Split interleaved variants into `(primary, backup)`
pub(crate) fn split(
    variants: Vec<VariantStream>,
) -> HlsResult<(Vec<VariantStream>, Vec<VariantStream>)> {
    if variants.is_empty() {
        return Err(HlsError::deweave("master playlist has no variants"));
    }
    if variants.len() % 2 != 0 {
        return Err(HlsError::deweave(format!(
            "expected interleaved primary/backup variants, found {} variants",
            variants.len()
        )));
    }

    let (primary, backup): (Vec<_>, Vec<_>) = variants
        .into_iter()
        .enumerate()
        .partition(|(index, _)| index % 2 == 0);
    Ok((
        primary.into_iter().map(|(_, v)| v).collect(),
        backup.into_iter().map(|(_, v)| v).collect(),
    ))
}

/// Decide the ladder from the probe outcome.
///
/// The primary is used only when its media playlist was modified within two
/// target durations of `now`. Any other outcome falls back to the backup,
/// except a `Last-Modified` header that cannot be parsed.
pub(crate) fn choose(
    probe: Result<&FetchedManifest, &FetchError>,
    now: DateTime<Utc>,
) -> HlsResult<Ladder> {
    let manifest = match probe {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(
                target = "manifest.deweave",
                error = %e,
                "primary probe failed, using backup"
            );
            return Ok(Ladder::Backup);
        }
    };

    if !manifest.is_success() {
        debug!(
            target = "manifest.deweave",
            status = manifest.status,
            "primary probe not successful"
        );
        return Ok(Ladder::Backup);
    }

    let Some(header) = manifest.last_modified.as_deref() else {
        debug!(target = "manifest.deweave", url = %manifest.url, "primary has no Last-Modified");
        return Ok(Ladder::Backup);
    };
    let last_modified =
        DateTime::parse_from_rfc2822(header).map_err(|_| HlsError::LastModified {
            value: header.to_string(),
        })?;

    let target_duration = match parse_playlist_res(manifest.body.as_bytes()) {
        Ok(Playlist::MediaPlaylist(media)) => media.target_duration as f64,
        _ => {
            warn!(
                target = "manifest.deweave",
                url = %manifest.url,
                "primary probe is not a media playlist"
            );
            return Ok(Ladder::Backup);
        }
    };

    let age_ms = (now - last_modified.with_timezone(&Utc)).num_milliseconds();
    let threshold_ms = (2.0 * target_duration * 1000.0) as i64;
    if age_ms < threshold_ms {
        Ok(Ladder::Primary)
    } else {
        debug!(
            target = "manifest.deweave",
            age_ms = age_ms,
            threshold_ms = threshold_ms,
            "primary is stale"
        );
        Ok(Ladder::Backup)
    }
}

/// Replace the master's variants with the healthy ladder
pub(crate) async fn deweave(
    playlist: &mut MasterPlaylist,
    manifest_url: &Url,
    fetcher: &dyn ManifestFetcher,
    now: DateTime<Utc>,
) -> HlsResult<Ladder> {
    let (primary, backup) = split(std::mem::take(&mut playlist.variants))?;

    let probe_uri = primary[0].uri.as_str();
    let probe_url = resolve(manifest_url, probe_uri)
        .map_err(|e| HlsError::invalid_uri(probe_uri, e.to_string()))?;
    let probe = fetcher.fetch(&probe_url).await;
    let ladder = choose(probe.as_ref(), now)?;

    debug!(
        target = "manifest.deweave",
        ladder = ?ladder,
        probe = %probe_url,
        "de-weaved master playlist"
    );
    playlist.variants = match ladder {
        Ladder::Primary => primary,
        Ladder::Backup => backup,
    };
    Ok(ladder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchResult;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const MEDIA: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.000,\na.ts\n";

    const WOVEN: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1000
primary/low.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1000
backup/low.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2000
primary/high.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2000
backup/high.m3u8
";

    #[derive(Default)]
    struct Probe {
        last_modified: Option<String>,
        status: u16,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ManifestFetcher for Probe {
        async fn fetch(&self, url: &Url) -> FetchResult<FetchedManifest> {
            self.requested.lock().unwrap().push(url.to_string());
            Ok(FetchedManifest {
                url: url.clone(),
                status: self.status,
                last_modified: self.last_modified.clone(),
                body: MEDIA.to_string(),
            })
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc2822("Wed, 01 Jan 2020 00:10:00 GMT")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn manifest(last_modified: Option<&str>) -> FetchedManifest {
        FetchedManifest {
            url: Url::parse("http://origin.test/primary/low.m3u8").unwrap(),
            status: 200,
            last_modified: last_modified.map(str::to_string),
            body: MEDIA.to_string(),
        }
    }

    fn woven() -> MasterPlaylist {
        match parse_playlist_res(WOVEN.as_bytes()) {
            Ok(Playlist::MasterPlaylist(p)) => p,
            _ => panic!("expected a master playlist"),
        }
    }

    #[test]
    fn splits_alternating_variants() {
        let (primary, backup) = split(woven().variants).unwrap();
        assert_eq!(primary.len(), 2);
        assert!(primary.iter().all(|v| v.uri.starts_with("primary/")));
        assert!(backup.iter().all(|v| v.uri.starts_with("backup/")));
    }

    #[test]
    fn odd_variant_counts_are_rejected() {
        let mut variants = woven().variants;
        variants.pop();
        assert!(matches!(split(variants), Err(HlsError::Deweave { .. })));
    }

    #[test]
    fn fresh_primary_is_kept() {
        // 11s old, threshold 12s
        let fresh = manifest(Some("Wed, 01 Jan 2020 00:09:49 GMT"));
        assert_eq!(choose(Ok(&fresh), now()).unwrap(), Ladder::Primary);
    }

    #[test]
    fn stale_or_missing_primary_uses_backup() {
        let stale = manifest(Some("Wed, 01 Jan 2020 00:09:48 GMT"));
        assert_eq!(choose(Ok(&stale), now()).unwrap(), Ladder::Backup);

        assert_eq!(choose(Ok(&manifest(None)), now()).unwrap(), Ladder::Backup);

        let failed = FetchedManifest {
            status: 503,
            ..manifest(Some("Wed, 01 Jan 2020 00:09:59 GMT"))
        };
        assert_eq!(choose(Ok(&failed), now()).unwrap(), Ladder::Backup);

        let err = FetchError::timeout("http://origin.test/primary/low.m3u8");
        assert_eq!(choose(Err(&err), now()).unwrap(), Ladder::Backup);
    }

    #[test]
    fn malformed_last_modified_is_an_error() {
        let broken = manifest(Some("yesterday-ish"));
        assert!(matches!(
            choose(Ok(&broken), now()),
            Err(HlsError::LastModified { .. })
        ));
    }

    #[tokio::test]
    async fn probes_first_primary_and_is_deterministic() {
        let fetcher = Probe {
            last_modified: Some("Wed, 01 Jan 2020 00:09:59 GMT".to_string()),
            status: 200,
            ..Default::default()
        };
        let url = Url::parse("http://origin.test/show/master.m3u8").unwrap();

        let mut first = woven();
        let mut second = woven();
        let ladder = deweave(&mut first, &url, &fetcher, now()).await.unwrap();
        assert_eq!(ladder, Ladder::Primary);
        let ladder = deweave(&mut second, &url, &fetcher, now()).await.unwrap();
        assert_eq!(ladder, Ladder::Primary);
        assert_eq!(first, second);
        assert_eq!(
            fetcher.requested.lock().unwrap().as_slice(),
            &[
                "http://origin.test/show/primary/low.m3u8".to_string(),
                "http://origin.test/show/primary/low.m3u8".to_string(),
            ]
        );
    }
}
