pub mod cipher;
pub mod clients;
pub mod download;
pub mod extractor;
pub mod formats;
pub mod hls;
pub mod info;
pub mod manifest;
pub mod pipeline;
pub mod state;
pub mod utils;

use std::sync::Arc;

use tracing::{debug, info, warn};

use cipher::{OperationProgram, SignatureDecipherer};
use clients::{SourceContext, default_sources};
use download::{Download, DownloadOptions, Downloader, SegmentStreamer};
use extractor::{BasicExtractor, InfoExtractor};
use formats::{Format, add_format_meta, sort_formats};
use hls::HlsStreamer;
use info::{VideoDetailsView, VideoInfo};
use pipeline::{Pipeline, RetryPolicy};
use state::ResolutionState;
use utils::{absolute_url, get_html5player};

pub use formats::{ChooseFormatOptions, Filter, Quality, choose_format, filter_formats};
pub use utils::{get_url_video_id, get_video_id, validate_id, validate_url};

use crate::{
    cache::{DEFAULT_TTL, ExpiringCache},
    common::{
        errors::{Error, Result},
        http::{HttpClient, ReqwestClient, RequestHeaders, create_client},
        types::VideoId,
    },
    configs::YouTubeConfig,
};

const EMBED_URL: &str = "https://www.youtube.com/embed/";

/// The caches behind a [`YouTube`] instance. Clones share their entries.
#[derive(Clone)]
pub struct Caches {
    /// Resolved infos, keyed by `getBasicInfo-<id>-<lang>` and
    /// `getInfo-<id>-<lang>`.
    pub info: ExpiringCache<String, Arc<VideoInfo>>,
    /// Watch page bodies by URL.
    pub watch_page: ExpiringCache<String, String>,
    /// Identity tokens by cookie.
    pub cookie: ExpiringCache<String, Option<String>>,
    /// Signature programs by player script URL.
    pub sig: ExpiringCache<String, OperationProgram>,
}

impl Caches {
    pub fn new(config: &YouTubeConfig) -> Self {
        Self {
            info: ExpiringCache::new(config.info_cache_ttl()),
            watch_page: ExpiringCache::new(config.info_cache_ttl()),
            cookie: ExpiringCache::new(config.cookie_cache_ttl()),
            sig: ExpiringCache::new(DEFAULT_TTL),
        }
    }

    pub fn clear(&self) {
        self.info.clear();
        self.watch_page.clear();
        self.cookie.clear();
        self.sig.clear();
    }
}

struct Inner {
    lang: String,
    http: Arc<dyn HttpClient>,
    headers: RequestHeaders,
    caches: Caches,
    ctx: Arc<SourceContext>,
    pipeline: Pipeline,
    decipherer: SignatureDecipherer,
    extractor: Arc<dyn InfoExtractor>,
    downloader: Downloader,
    defaults: DownloadOptions,
}

/// Entry point: resolves videos and downloads their streams.
///
/// Cheap to clone; clones share caches and connections.
#[derive(Clone)]
pub struct YouTube {
    inner: Arc<Inner>,
}

impl YouTube {
    pub fn new(config: YouTubeConfig) -> Result<Self> {
        let client = create_client(&config.user_agent, config.proxy.as_ref())?;
        Ok(Self::with_http(config, Arc::new(ReqwestClient::new(client))))
    }

    pub fn with_http(config: YouTubeConfig, http: Arc<dyn HttpClient>) -> Self {
        let segments = Arc::new(HlsStreamer::new(http.clone()));
        Self::with_parts(config, http, Arc::new(BasicExtractor), segments)
    }

    /// Builds an instance around custom collaborators.
    pub fn with_parts(
        config: YouTubeConfig,
        http: Arc<dyn HttpClient>,
        extractor: Arc<dyn InfoExtractor>,
        segments: Arc<dyn SegmentStreamer>,
    ) -> Self {
        let mut headers: RequestHeaders = config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(cookie) = &config.cookie {
            headers.push(("cookie".into(), cookie.clone()));
        }

        let caches = Caches::new(&config);
        let ctx = Arc::new(SourceContext {
            http: http.clone(),
            watch_pages: caches.watch_page.clone(),
            identity_tokens: caches.cookie.clone(),
            lang: config.lang.clone(),
            headers: headers.clone(),
            cookie: config.cookie.clone(),
        });

        Self {
            inner: Arc::new(Inner {
                pipeline: Pipeline::new(default_sources(ctx.clone()), RetryPolicy::from(config.retry)),
                decipherer: SignatureDecipherer::new(http.clone(), caches.sig.clone(), headers.clone()),
                downloader: Downloader::new(http.clone(), segments),
                defaults: DownloadOptions::from_config(&config),
                lang: config.lang,
                http,
                headers,
                caches,
                ctx,
                extractor,
            }),
        }
    }

    pub fn caches(&self) -> &Caches {
        &self.inner.caches
    }

    /// Download options seeded from the configuration.
    pub fn download_options(&self) -> DownloadOptions {
        self.inner.defaults.clone()
    }

    /// Metadata and raw formats of a video, without deciphering.
    pub async fn get_basic_info(&self, link: &str) -> Result<Arc<VideoInfo>> {
        let id = get_video_id(link)?;
        self.basic_info(&id).await
    }

    /// Metadata plus deciphered, manifest-extended and sorted formats.
    pub async fn get_info(&self, link: &str) -> Result<Arc<VideoInfo>> {
        let id = get_video_id(link)?;
        let key = format!("getInfo-{}-{}", id, self.inner.lang);
        let this = self.clone();
        self.inner
            .caches
            .info
            .get_or_set(key, move || async move { this.full_info(&id).await.map(Arc::new) })
            .await
    }

    /// Resolves `link` and downloads the format `options` select.
    ///
    /// Resolution errors are reported on the returned download. Must be
    /// called within a tokio runtime.
    pub fn download(&self, link: &str, options: DownloadOptions) -> Download {
        let (download, sink) = download::channel(options.buffered_chunks);
        let this = self.clone();
        let link = link.to_string();
        tokio::spawn(async move {
            match this.get_info(&link).await {
                Ok(info) => this.inner.downloader.run(sink, info, options).await,
                Err(e) => {
                    warn!("could not resolve {}: {}", link, e);
                    sink.fail(e).await;
                }
            }
        });
        download
    }

    /// Downloads from an info obtained through [`YouTube::get_info`].
    pub fn download_from_info(&self, info: Arc<VideoInfo>, options: DownloadOptions) -> Result<Download> {
        if !info.full {
            return Err(Error::InvalidInput(
                "Cannot use `download_from_info` with info from `get_basic_info`".into(),
            ));
        }
        Ok(self.inner.downloader.start(info, options))
    }

    async fn basic_info(&self, id: &VideoId) -> Result<Arc<VideoInfo>> {
        let key = format!("getBasicInfo-{}-{}", id, self.inner.lang);
        let this = self.clone();
        let id = id.clone();
        self.inner
            .caches
            .info
            .get_or_set(key, move || async move {
                let state = this.inner.pipeline.resolve(&id).await?;
                Ok(Arc::new(this.assemble(&id, state)))
            })
            .await
    }

    fn assemble(&self, id: &VideoId, state: ResolutionState) -> VideoInfo {
        let extras = self.inner.extractor.extract(&state).unwrap_or_else(|e| {
            warn!("could not extract extras for {}: {}", id, e);
            Default::default()
        });

        VideoInfo {
            video_id: id.to_string(),
            formats: state
                .player_response
                .as_ref()
                .map(|p| p.raw_formats())
                .unwrap_or_default(),
            details: VideoDetailsView::new(id, &state),
            html5player: state.html5player.clone(),
            full: false,
            extras,
            state,
        }
    }

    async fn full_info(&self, id: &VideoId) -> Result<VideoInfo> {
        let mut info = VideoInfo::clone(&*self.basic_info(id).await?);

        let streaming = info
            .player_response()
            .and_then(|p| p.streaming_data.as_ref());
        let dash_url = streaming.and_then(|s| s.dash_manifest_url.clone());
        let hls_url = streaming.and_then(|s| s.hls_manifest_url.clone());

        let script_url = if info.formats.is_empty() {
            None
        } else {
            let html5player = match info.html5player.clone() {
                Some(player) => player,
                None => self.find_html5player(id).await?,
            };
            info.html5player = Some(html5player.clone());
            Some(absolute_url(&html5player))
        };

        let http = &*self.inner.http;
        let headers = &self.inner.headers;
        let raw = std::mem::take(&mut info.formats);
        let deciphered = async {
            match &script_url {
                Some(url) => self.inner.decipherer.decipher_formats(raw, url).await,
                None => Ok(Vec::new()),
            }
        };
        let dash = async {
            match &dash_url {
                Some(url) => manifest::get_dash_manifest(http, url, headers).await,
                None => Ok(Vec::new()),
            }
        };
        let hls = async {
            match &hls_url {
                Some(url) => manifest::get_hls_manifest(http, url, headers).await,
                None => Ok(Vec::new()),
            }
        };
        let (deciphered, dash, hls) = futures::try_join!(deciphered, dash, hls)?;

        let mut formats = merge_formats([deciphered, dash, hls]);
        formats = formats.into_iter().map(add_format_meta).collect();
        sort_formats(&mut formats);

        info!("resolved {} formats for {}", formats.len(), id);
        info.formats = formats;
        info.full = true;
        Ok(info)
    }

    async fn find_html5player(&self, id: &VideoId) -> Result<String> {
        let watch = self.inner.ctx.watch_page_body(id).await?;
        if let Some(player) = get_html5player(&watch) {
            return Ok(player);
        }

        debug!("no player script on the watch page of {}, trying the embed page", id);
        let embed_url = format!("{}{}?hl={}", EMBED_URL, id, urlencoding::encode(&self.inner.lang));
        let embed = self.inner.http.get_text(&embed_url, &self.inner.headers).await?;
        get_html5player(&embed)
            .ok_or_else(|| Error::parse("get_info", "html5player", "unable to find html5player file"))
    }
}

/// Concatenates format lists; an entry with the same itag and URL as an
/// earlier one replaces it in place.
fn merge_formats<const N: usize>(lists: [Vec<Format>; N]) -> Vec<Format> {
    let mut merged: Vec<Format> = Vec::new();
    for format in lists.into_iter().flatten() {
        match merged
            .iter_mut()
            .find(|f| f.itag == format.itag && f.url == format.url)
        {
            Some(existing) => *existing = format,
            None => merged.push(format),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::errors::ErrorKind,
        sources::youtube::{clients::common::testing::PageServer, utils::BASE_URL},
    };

    const SCRIPT_URL: &str = "https://www.youtube.com/s/player/abc/base.js";

    const SCRIPT: &str = r#"var xy={ab:function(a,b){a.splice(0,b)},
cd:function(a){a.reverse()},
ef:function(a,b){var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c}};
var other=1;sig=function(a){a=a.split("");xy.ab(a,2);xy.cd(a,17);xy.ef(a,3);return a.join("")};"#;

    const HLS_URL: &str = "https://manifest.example/api/manifest/hls_variant/id/aaaaaaaaaaa";

    const HLS: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1500000,CODECS=\"mp4a.40.2,avc1.4d401f\"
https://manifest.example/api/manifest/hls_playlist/id/aaaaaaaaaaa/itag/95/index.m3u8
";

    fn page() -> String {
        let player = serde_json::json!({
            "playabilityStatus": { "status": "OK" },
            "streamingData": {
                "formats": [
                    { "itag": 18, "signatureCipher": "s=abcdefg&sp=sig&url=https%3A%2F%2Fr.example%2Fvideoplayback%3Fitag%3D18" }
                ],
                "adaptiveFormats": [
                    { "itag": 140, "url": "https://r.example/videoplayback?itag=140", "contentLength": "1000" }
                ],
                "hlsManifestUrl": HLS_URL
            },
            "videoDetails": { "videoId": "aaaaaaaaaaa", "title": "Title", "lengthSeconds": "10" }
        });
        format!(
            r#"<script>var ytInitialPlayerResponse = {};</script><script>var ytInitialData = {{"contents":{{}}}};</script>"jsUrl":"\/s\/player\/abc\/base.js""#,
            player
        )
    }

    fn youtube(server: Arc<PageServer>) -> YouTube {
        YouTube::with_http(YouTubeConfig::default(), server)
    }

    fn server() -> Arc<PageServer> {
        Arc::new(
            PageServer::default()
                .with(BASE_URL, &page())
                .with(SCRIPT_URL, SCRIPT)
                .with(HLS_URL, HLS),
        )
    }

    #[tokio::test]
    async fn test_get_basic_info() {
        let yt = youtube(server());
        let info = yt.get_basic_info("https://youtu.be/aaaaaaaaaaa").await.unwrap();

        assert!(!info.full);
        assert_eq!(info.video_id, "aaaaaaaaaaa");
        assert_eq!(info.details.title.as_deref(), Some("Title"));
        assert_eq!(info.details.length_seconds, Some(10));
        assert_eq!(info.html5player.as_deref(), Some("/s/player/abc/base.js"));
        assert_eq!(info.formats.len(), 2);
        assert!(info.formats[0].url.is_empty());
        assert!(yt.caches().info.contains_key(&"getBasicInfo-aaaaaaaaaaa-en".to_string()));
    }

    #[tokio::test]
    async fn test_get_info_deciphers_and_extends_formats() {
        let server = server();
        let yt = youtube(server.clone());
        let info = yt.get_info("aaaaaaaaaaa").await.unwrap();

        assert!(info.full);
        let itags: Vec<u32> = info.formats.iter().map(|f| f.itag).collect();
        assert_eq!(itags.len(), 3);
        assert!(itags.contains(&95));

        let muxed = info.formats.iter().find(|f| f.itag == 18).unwrap();
        assert!(muxed.url.contains("sig=dfegc"));
        assert!(muxed.url.contains("ratebypass=yes"));
        assert!(muxed.signature_cipher.is_none());
        assert!(info.formats.iter().find(|f| f.itag == 95).unwrap().is_hls);

        yt.get_info("aaaaaaaaaaa").await.unwrap();
        assert_eq!(server.count(BASE_URL), 1);
        assert_eq!(server.count(SCRIPT_URL), 1);
    }

    #[tokio::test]
    async fn test_invalid_link() {
        let yt = youtube(server());
        let err = yt.get_info("https://example.com/watch?v=aaaaaaaaaaa").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_download_from_basic_info_is_rejected() {
        let yt = youtube(server());
        let info = yt.get_basic_info("aaaaaaaaaaa").await.unwrap();
        let err = yt
            .download_from_info(info, yt.download_options())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_download_reports_resolution_errors() {
        use futures::StreamExt;

        let yt = youtube(Arc::new(PageServer::default()));
        let download = yt.download("aaaaaaaaaaa", yt.download_options());
        let items: Vec<Result<bytes::Bytes>> = download.collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn test_merge_formats() {
        let f = |itag: u32, url: &str, bitrate: u64| Format {
            itag,
            url: url.to_string(),
            bitrate: Some(bitrate),
            ..Format::default()
        };
        let merged = merge_formats([
            vec![f(18, "a", 1), f(140, "b", 1)],
            vec![f(137, "m", 1), f(140, "m", 1)],
            vec![f(18, "a", 2)],
        ]);
        let keys: Vec<(u32, &str, Option<u64>)> = merged
            .iter()
            .map(|f| (f.itag, f.url.as_str(), f.bitrate))
            .collect();
        assert_eq!(
            keys,
            vec![(18, "a", Some(2)), (140, "b", Some(1)), (137, "m", Some(1)), (140, "m", Some(1))]
        );
    }
}
