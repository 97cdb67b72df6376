use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use url::Url;

use manifest_proxy::{
    config::Config,
    errors::FetchResult,
    origin::{FetchedManifest, ManifestFetcher},
    services::ManifestService,
    utils::time::FixedClock,
    web::{AppState, WebServer},
};

const MASTER: &str = r#"#EXTM3U
#EXT-X-INDEPENDENT-SEGMENTS
#EXT-X-STREAM-INF:BANDWIDTH=1200000,CODECS="avc1.64001f,mp4a.40.2",RESOLUTION=1280x720
720p.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=6000000,CODECS="hvc1.2.4.L153.b0,mp4a.40.2",RESOLUTION=3840x2160
2160p.m3u8
"#;

const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:1
#EXT-X-PROGRAM-DATE-TIME:2020-01-01T00:51:54Z
#EXTINF:6.000,
s1.ts
#EXT-X-PROGRAM-DATE-TIME:2020-01-01T00:52:00Z
#EXTINF:6.000,
s2.ts
#EXT-X-PROGRAM-DATE-TIME:2020-01-01T00:52:24Z
#EXTINF:6.000,
s3.ts
#EXT-X-PROGRAM-DATE-TIME:2020-01-01T00:52:30Z
#EXTINF:6.000,
s4.ts
";

const MPD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static">
  <Period id="0">
    <AdaptationSet id="0" contentType="video" maxWidth="1920" maxHeight="1080">
      <Representation id="v1" bandwidth="2048" codecs="avc1.64001f" width="1280" height="720"/>
      <Representation id="v2" bandwidth="4096" codecs="avc1.640028" width="1920" height="1080"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

/// Origin double serving fixed documents; anything else is a 404
struct StaticOrigin {
    documents: HashMap<String, &'static str>,
}

#[async_trait]
impl ManifestFetcher for StaticOrigin {
    async fn fetch(&self, url: &Url) -> FetchResult<FetchedManifest> {
        let (status, body) = match self.documents.get(url.as_str()) {
            Some(body) => (200, body.to_string()),
            None => (404, String::new()),
        };
        Ok(FetchedManifest {
            url: url.clone(),
            status,
            last_modified: None,
            body,
        })
    }
}

fn app() -> Router {
    let mut config = Config::default();
    config.origin.base_url = "http://origin.test/".to_string();
    config.web.hostname = "gateway.test".to_string();
    config.web.scheme = "https".to_string();

    let origin = StaticOrigin {
        documents: HashMap::from([
            ("http://origin.test/live/master.m3u8".to_string(), MASTER),
            ("http://origin.test/live/720p.m3u8".to_string(), MEDIA),
            ("http://origin.test/vod/manifest.mpd".to_string(), MPD),
        ]),
    };
    let service = ManifestService::new(
        &config,
        Arc::new(origin),
        Arc::new(FixedClock::at_timestamp(1_700_000_000)),
    )
    .unwrap();

    WebServer::create_router(AppState {
        manifests: Arc::new(service),
    })
}

// Helper function to send requests to the app
async fn get(app: &Router, uri: &str) -> (StatusCode, HeaderMap, String) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    (status, headers, String::from_utf8(body_bytes.to_vec()).unwrap())
}

fn json(body: &str) -> Value {
    serde_json::from_str(body).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (status, _, body) = get(&app(), "/health").await;

    assert_eq!(status, StatusCode::OK);
    let response = json(&body);
    assert_eq!(response["status"], "healthy");
    assert!(response.get("timestamp").is_some());
}

#[tokio::test]
async fn test_master_playlist_codec_filter() {
    let (status, headers, body) = get(&app(), "/v(hdr10)/live/master.m3u8").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/vnd.apple.mpegurl");
    assert!(headers.get(header::CACHE_CONTROL).is_none());
    assert!(body.contains("http://origin.test/live/720p.m3u8"));
    assert!(!body.contains("2160p"));
}

#[tokio::test]
async fn test_invalid_range_is_a_tagged_bad_request() {
    let (status, _, body) = get(&app(), "/b(30000,3000)/live/master.m3u8").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let response = json(&body);
    assert_eq!(response["success"], false);
    assert_eq!(response["error"], "Bitrate");
}

#[tokio::test]
async fn test_unknown_manifest_type_is_rejected() {
    let (status, _, body) = get(&app(), "/v(avc)/live/video.mp4").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "Protocol");
}

#[tokio::test]
async fn test_missing_origin_manifest_is_bad_gateway() {
    let (status, _, body) = get(&app(), "/live/missing.m3u8").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json(&body)["error"], "Origin");
}

#[tokio::test]
async fn test_dash_bitrate_filter() {
    let (status, headers, body) = get(&app(), "/b(0,4000)/vod/manifest.mpd").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/dash+xml");
    assert!(headers.get(header::CACHE_CONTROL).is_none());
    assert!(body.contains(r#"bandwidth="2048""#));
    assert!(!body.contains(r#"bandwidth="4096""#));
    assert!(body.contains(r#"maxWidth="1280""#));
    assert!(body.contains(r#"maxHeight="720""#));
    assert!(body.contains("<BaseURL>http://origin.test/vod/</BaseURL>"));
}

#[tokio::test]
async fn test_trim_redirects_then_cuts_media_playlist() {
    let app = app();

    // Stage 1: the master points its variants back at the gateway
    let (status, _, master) = get(&app, "/t(1577839920,1577839944)/tags(ads)/live/master.m3u8").await;
    assert_eq!(status, StatusCode::OK);

    let redirect = master
        .lines()
        .find(|line| line.starts_with("https://gateway.test/"))
        .expect("trimmed variant")
        .to_string();
    assert!(redirect.contains("/t(1577839920,1577839944)/tags(ads)/"));

    // Stage 2: the redirect resolves to the origin media playlist and is cut
    let path = Url::parse(&redirect).unwrap().path().to_string();
    let (status, headers, media) = get(&app, &path).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CACHE_CONTROL], "max-age=3");
    assert!(media.contains("http://origin.test/live/s2.ts"));
    assert!(media.contains("http://origin.test/live/s3.ts"));
    assert!(!media.contains("s1.ts"));
    assert!(!media.contains("s4.ts"));
    assert!(media.contains("#EXT-X-ENDLIST"));
}

#[tokio::test]
async fn test_empty_trim_window_is_not_found() {
    let (status, _, body) = get(&app(), "/t(1600000000,1600000600)/live/720p.m3u8").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let response = json(&body);
    assert_eq!(response["error"], "HLS");
    assert_eq!(response["message"], "no segments found in range; is PDT set?");
}

#[tokio::test]
async fn test_encoded_origin_needs_a_trim_window() {
    let encoded = URL_SAFE_NO_PAD.encode("http://origin.test/live/720p.m3u8");

    // Without t(...) the component is an ordinary path under the base URL
    let (status, _, body) = get(&app(), &format!("/{encoded}.m3u8")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json(&body)["error"], "Origin");

    let (status, _, _) = get(&app(), &format!("/t(1577839920,1577839944)/{encoded}.m3u8")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_encoded_origin_on_another_host_is_rejected() {
    let encoded = URL_SAFE_NO_PAD.encode("http://metadata.internal/latest.m3u8");
    let (status, _, body) = get(&app(), &format!("/t(1577839920,1577839944)/{encoded}.m3u8")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "Trim");
}

#[tokio::test]
async fn test_unfiltered_dash_is_returned_unchanged() {
    let (status, _, body) = get(&app(), "/vod/manifest.mpd").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
    assert!(body.contains(r#"<Representation id="v2" bandwidth="4096" codecs="avc1.640028" width="1920" height="1080"/>"#));
}
