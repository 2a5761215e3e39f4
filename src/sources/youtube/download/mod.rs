//! Turns one chosen format into a byte stream.
//!
//! Direct formats are fetched with sequential ranged requests; segmented
//! (HLS/DASH) formats are handed to a [`SegmentStreamer`]. Lifecycle and
//! progress are reported through a separate event channel.

pub mod segments;
pub mod session;
pub mod transfer;

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use segments::{Segment, SegmentRequest, SegmentStreamer};
pub use session::{DownloadRange, DownloadSession, SubRange};
use transfer::{Progress, Transfer};

use super::{
    formats::{ChooseFormatOptions, Format, choose_format},
    info::VideoInfo,
    pipeline::RetryPolicy,
    state::ResolutionState,
};
use crate::{
    common::{
        errors::{Error, Result},
        http::{HttpClient, RequestHeaders},
    },
    configs::{DownloadRetryConfig, YouTubeConfig},
};

/// Playability statuses that make a download pointless.
const UNPLAYABLE_STATUSES: &[&str] = &["UNPLAYABLE", "LIVE_STREAM_OFFLINE", "LOGIN_REQUIRED"];

const DEFAULT_LIVE_BUFFER: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// The format about to be downloaded. Sent once, before any request.
    Info {
        info: Arc<VideoInfo>,
        format: Box<Format>,
    },
    Request {
        url: String,
        range: Option<String>,
    },
    Response {
        status: u16,
        content_length: Option<u64>,
    },
    Redirect {
        url: String,
    },
    Retry {
        attempt: u32,
        error: Error,
    },
    Reconnect {
        attempt: u32,
        error: Error,
    },
    /// For direct formats `chunk` and `downloaded` count bytes; for segmented
    /// formats they are the segment size and the segment number, and `total`
    /// is the number of segments.
    Progress {
        chunk: u64,
        downloaded: u64,
        total: Option<u64>,
    },
    Error(Error),
    End,
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub choose: ChooseFormatOptions,
    pub range: Option<DownloadRange>,
    /// Where to start playback-wise. Only honored by unchunked and
    /// segmented formats.
    pub begin: Option<Duration>,
    pub live_buffer: Duration,
    /// Size of each ranged request for single-track formats; `0` disables
    /// chunking.
    pub chunk_size: u64,
    /// Body chunks buffered ahead of the reader.
    pub buffered_chunks: usize,
    pub retry: DownloadRetryConfig,
    pub headers: RequestHeaders,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from_config(&YouTubeConfig::default())
    }
}

impl DownloadOptions {
    pub fn from_config(config: &YouTubeConfig) -> Self {
        Self {
            choose: ChooseFormatOptions::default(),
            range: None,
            begin: None,
            live_buffer: DEFAULT_LIVE_BUFFER,
            chunk_size: config.chunk_size,
            buffered_chunks: config.buffered_chunks,
            retry: config.download_retry,
            headers: RequestHeaders::new(),
        }
    }
}

struct SessionControl {
    destroyed: AtomicBool,
    cancel: CancellationToken,
}

impl SessionControl {
    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
        }
    }
}

/// Cloneable handle that can stop a [`Download`] from elsewhere.
#[derive(Clone)]
pub struct DownloadHandle {
    control: Arc<SessionControl>,
}

impl DownloadHandle {
    /// Stops the download. Idempotent; no request is started afterwards.
    pub fn destroy(&self) {
        self.control.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.control.destroyed.load(Ordering::Acquire)
    }
}

/// A running download: a stream of body chunks plus an event channel.
///
/// The stream ends after the last byte, or after yielding the error that
/// stopped the download. Dropping it destroys the download.
pub struct Download {
    data: mpsc::Receiver<Result<Bytes>>,
    events: flume::Receiver<DownloadEvent>,
    control: Arc<SessionControl>,
}

impl Download {
    pub fn events(&self) -> flume::Receiver<DownloadEvent> {
        self.events.clone()
    }

    pub fn handle(&self) -> DownloadHandle {
        DownloadHandle {
            control: self.control.clone(),
        }
    }

    pub fn destroy(&self) {
        self.control.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.control.destroyed.load(Ordering::Acquire)
    }
}

impl Stream for Download {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().data.poll_recv(cx)
    }
}

impl Drop for Download {
    fn drop(&mut self) {
        self.control.destroy();
    }
}

/// Producer side of a [`Download`].
pub struct Sink {
    data: mpsc::Sender<Result<Bytes>>,
    events: flume::Sender<DownloadEvent>,
    control: Arc<SessionControl>,
}

impl Sink {
    pub fn emit(&self, event: DownloadEvent) {
        let _ = self.events.send(event);
    }

    pub fn is_destroyed(&self) -> bool {
        self.control.destroyed.load(Ordering::Acquire)
    }

    pub async fn cancelled(&self) {
        self.control.cancel.cancelled().await
    }

    pub async fn send(&self, bytes: Bytes) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Error::Cancelled),
            sent = self.data.send(Ok(bytes)) => sent.map_err(|_| Error::Cancelled),
        }
    }

    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Reports `err` on both channels and closes the download.
    pub async fn fail(self, err: Error) {
        self.emit(DownloadEvent::Error(err.clone()));
        tokio::select! {
            biased;
            _ = self.cancelled() => {}
            _ = self.data.send(Err(err)) => {}
        }
    }
}

/// Creates a connected download/sink pair.
pub fn channel(buffered_chunks: usize) -> (Download, Sink) {
    let (data_tx, data_rx) = mpsc::channel(buffered_chunks.max(1));
    let (events_tx, events_rx) = flume::unbounded();
    let control = Arc::new(SessionControl {
        destroyed: AtomicBool::new(false),
        cancel: CancellationToken::new(),
    });

    (
        Download {
            data: data_rx,
            events: events_rx,
            control: control.clone(),
        },
        Sink {
            data: data_tx,
            events: events_tx,
            control,
        },
    )
}

/// Error for a playability status in `statuses`, if the video has one.
pub fn play_error(state: &ResolutionState, statuses: &[&str]) -> Option<Error> {
    let playability = state
        .player_response
        .as_ref()?
        .playability_status
        .as_ref()?;
    if !statuses.contains(&playability.status()) {
        return None;
    }
    let reason = playability
        .reason
        .clone()
        .or_else(|| playability.messages.as_ref().and_then(|m| m.first().cloned()))
        .unwrap_or_else(|| playability.status().to_string());
    Some(Error::Unrecoverable(reason))
}

#[derive(Clone)]
pub struct Downloader {
    http: Arc<dyn HttpClient>,
    segments: Arc<dyn SegmentStreamer>,
}

impl Downloader {
    pub fn new(http: Arc<dyn HttpClient>, segments: Arc<dyn SegmentStreamer>) -> Self {
        Self { http, segments }
    }

    /// Starts downloading the format of `info` selected by `options`.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&self, info: Arc<VideoInfo>, options: DownloadOptions) -> Download {
        let (download, sink) = channel(options.buffered_chunks);
        let downloader = self.clone();
        tokio::spawn(async move {
            downloader.run(sink, info, options).await;
        });
        download
    }

    /// Drives `sink` to completion, reporting the outcome on it.
    pub async fn run(&self, sink: Sink, info: Arc<VideoInfo>, options: DownloadOptions) {
        match self.transfer(&sink, info, &options).await {
            Ok(()) => {
                info!("download finished");
                sink.emit(DownloadEvent::End);
            }
            Err(Error::Cancelled) => debug!("download destroyed"),
            Err(e) => {
                warn!("download failed: {}", e);
                sink.fail(e).await;
            }
        }
    }

    async fn transfer(&self, sink: &Sink, info: Arc<VideoInfo>, options: &DownloadOptions) -> Result<()> {
        if let Some(err) = play_error(&info.state, UNPLAYABLE_STATUSES) {
            return Err(err);
        }
        if info.formats.is_empty() {
            return Err(Error::Unrecoverable("This video is unavailable".into()));
        }

        let format = choose_format(&info.formats, &options.choose)?;
        info!("downloading itag {} of {}", format.itag, info.video_id);
        sink.emit(DownloadEvent::Info {
            info: info.clone(),
            format: Box::new(format.clone()),
        });
        if sink.is_destroyed() {
            return Err(Error::Cancelled);
        }

        if format.is_hls || format.is_dash_mpd {
            return self.stream_segments(sink, &format, options).await;
        }

        let chunked = options.chunk_size > 0 && !format.has_audio_and_video();
        let mut url = format.url.clone();
        // Single-track formats ignore `begin`.
        if let (false, Some(begin)) = (chunked, options.begin) {
            url.push_str(&format!("&begin={}", begin.as_millis()));
        }
        let transfer = Transfer {
            http: &*self.http,
            url: &url,
            headers: &options.headers,
            policy: RetryPolicy::from(options.retry),
            max_reconnects: options.retry.max_reconnects,
            sink,
        };

        if chunked {
            let session = DownloadSession::new(options.range, format.content_length, options.chunk_size);
            let mut progress = Progress {
                downloaded: 0,
                total: session.total(),
            };
            for sub in session {
                if sink.is_destroyed() {
                    return Err(Error::Cancelled);
                }
                debug!("requesting {}", sub.header_value());
                transfer.run(Some(sub), &mut progress).await?;
            }
            return Ok(());
        }

        let range = options
            .range
            .filter(|r| r.start > 0 || r.end.is_some())
            .map(|r| SubRange {
                start: r.start,
                end: r.end,
            });
        transfer.run(range, &mut Progress::default()).await
    }

    async fn stream_segments(&self, sink: &Sink, format: &Format, options: &DownloadOptions) -> Result<()> {
        let mut segments = self.segments.stream(SegmentRequest {
            url: format.url.clone(),
            itag: format.itag,
            is_dash: format.is_dash_mpd,
            begin: options.begin,
            live_buffer: options.live_buffer,
            headers: options.headers.clone(),
        });

        loop {
            let next = tokio::select! {
                biased;
                _ = sink.cancelled() => return Err(Error::Cancelled),
                segment = segments.next() => segment,
            };
            match next {
                Some(Ok(segment)) => {
                    sink.emit(DownloadEvent::Progress {
                        chunk: segment.data.len() as u64,
                        downloaded: segment.num,
                        total: segment.total,
                    });
                    sink.send(segment.data).await?;
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use serde_json::json;

    use super::*;
    use crate::{
        common::{errors::ErrorKind, http::HttpResponse},
        sources::youtube::{formats::add_format_meta, state::PlayerResponse},
    };

    const URL: &str = "https://media.example/videoplayback?itag=140";

    /// Serves `content`, honoring `Range`, in bodies of `piece` bytes.
    struct MediaServer {
        content: Vec<u8>,
        piece: usize,
        fail_first: AtomicU32,
        interrupt_once_after: Mutex<Option<usize>>,
        requests: Mutex<Vec<(String, Option<String>)>>,
    }

    impl MediaServer {
        fn new(len: usize) -> Self {
            Self {
                content: (0..len).map(|i| i as u8).collect(),
                piece: 4,
                fail_first: AtomicU32::new(0),
                interrupt_once_after: Mutex::new(None),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn ranges(&self) -> Vec<Option<String>> {
            self.requests.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
        }
    }

    #[async_trait]
    impl HttpClient for MediaServer {
        async fn get_text(&self, url: &str, _headers: &RequestHeaders) -> Result<String> {
            Err(Error::Unsupported(url.to_string()))
        }

        async fn get_stream(&self, url: &str, headers: &RequestHeaders) -> Result<HttpResponse> {
            let range = headers.iter().find(|(k, _)| k == "Range").map(|(_, v)| v.clone());
            self.requests.lock().unwrap().push((url.to_string(), range.clone()));

            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Status {
                    status: 503,
                    url: url.to_string(),
                });
            }

            let (start, end) = match range.as_deref().and_then(|r| r.strip_prefix("bytes=")) {
                Some(spec) => {
                    let (s, e) = spec.split_once('-').unwrap();
                    let end = if e.is_empty() { self.content.len() - 1 } else { e.parse().unwrap() };
                    (s.parse::<usize>().unwrap(), end)
                }
                None => (0, self.content.len() - 1),
            };
            let body = self.content[start..=end].to_vec();

            let mut pieces: Vec<Result<Bytes>> = body
                .chunks(self.piece)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            if let Some(after) = self.interrupt_once_after.lock().unwrap().take() {
                pieces.truncate(after);
                pieces.push(Err(Error::Network("connection reset".into())));
            }

            Ok(HttpResponse {
                status: if range.is_some() { 206 } else { 200 },
                url: url.to_string(),
                content_length: Some(body.len() as u64),
                body: stream::iter(pieces).boxed(),
            })
        }
    }

    struct FixedSegments(Vec<&'static str>);

    impl SegmentStreamer for FixedSegments {
        fn stream(&self, _request: SegmentRequest) -> BoxStream<'static, Result<Segment>> {
            let total = self.0.len() as u64;
            let segments: Vec<Result<Segment>> = self
                .0
                .iter()
                .enumerate()
                .map(|(i, data)| {
                    Ok(Segment {
                        num: i as u64 + 1,
                        total: Some(total),
                        data: Bytes::from_static(data.as_bytes()),
                    })
                })
                .collect();
            stream::iter(segments).boxed()
        }
    }

    fn audio_format(content_length: u64) -> Format {
        add_format_meta(Format {
            itag: 140,
            url: URL.to_string(),
            mime_type: Some("audio/mp4; codecs=\"mp4a.40.2\"".into()),
            content_length: Some(content_length),
            ..Format::default()
        })
    }

    fn muxed_format() -> Format {
        add_format_meta(Format {
            itag: 18,
            url: URL.to_string(),
            mime_type: Some("video/mp4; codecs=\"avc1.42001E, mp4a.40.2\"".into()),
            ..Format::default()
        })
    }

    fn info(formats: Vec<Format>) -> Arc<VideoInfo> {
        Arc::new(VideoInfo {
            video_id: "aaaaaaaaaaa".into(),
            formats,
            full: true,
            ..VideoInfo::default()
        })
    }

    fn options(chunk_size: u64) -> DownloadOptions {
        DownloadOptions {
            chunk_size,
            ..DownloadOptions::default()
        }
    }

    fn downloader(server: Arc<MediaServer>) -> Downloader {
        Downloader::new(server, Arc::new(FixedSegments(vec![])))
    }

    async fn collect(download: Download) -> (Vec<u8>, Vec<Error>) {
        let items: Vec<Result<Bytes>> = download.collect().await;
        let mut data = Vec::new();
        let mut errors = Vec::new();
        for item in items {
            match item {
                Ok(bytes) => data.extend_from_slice(&bytes),
                Err(e) => errors.push(e),
            }
        }
        (data, errors)
    }

    #[tokio::test]
    async fn test_chunked_download_is_sequential() {
        let server = Arc::new(MediaServer::new(25));
        let download = downloader(server.clone()).start(info(vec![audio_format(25)]), options(10));
        let events = download.events();

        let (data, errors) = collect(download).await;
        assert!(errors.is_empty());
        assert_eq!(data, server.content);
        assert_eq!(
            server.ranges(),
            vec![
                Some("bytes=0-9".to_string()),
                Some("bytes=10-19".to_string()),
                Some("bytes=20-24".to_string()),
            ]
        );

        let events: Vec<DownloadEvent> = events.drain().collect();
        assert!(matches!(events.first(), Some(DownloadEvent::Info { format, .. }) if format.itag == 140));
        assert!(matches!(events.last(), Some(DownloadEvent::End)));
        let progress: Vec<(u64, u64, Option<u64>)> = events
            .iter()
            .filter_map(|e| match e {
                DownloadEvent::Progress {
                    chunk,
                    downloaded,
                    total,
                } => Some((*chunk, *downloaded, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress.first(), Some(&(4, 4, Some(25))));
        assert_eq!(progress.last(), Some(&(1, 25, Some(25))));
    }

    #[tokio::test]
    async fn test_caller_range_limits_chunks() {
        let server = Arc::new(MediaServer::new(25));
        let mut opts = options(10);
        opts.range = Some(DownloadRange {
            start: 12,
            end: Some(100),
        });
        let download = downloader(server.clone()).start(info(vec![audio_format(25)]), opts);

        let (data, _) = collect(download).await;
        assert_eq!(data, server.content[12..]);
        assert_eq!(
            server.ranges(),
            vec![Some("bytes=12-21".to_string()), Some("bytes=22-24".to_string())]
        );
    }

    #[tokio::test]
    async fn test_destroy_stops_further_requests() {
        let server = Arc::new(MediaServer::new(25));
        let mut opts = options(10);
        opts.buffered_chunks = 1;
        let mut download = downloader(server.clone()).start(info(vec![audio_format(25)]), opts);

        let first = download.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 4);
        download.destroy();
        download.destroy();
        assert!(download.is_destroyed());

        let (rest, errors) = collect(download).await;
        assert!(errors.is_empty());
        assert!(rest.len() <= 6);
        assert_eq!(server.ranges().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_before_first_byte() {
        let server = Arc::new(MediaServer::new(8));
        server.fail_first.store(2, Ordering::SeqCst);
        let download = downloader(server.clone()).start(info(vec![audio_format(8)]), options(10));
        let events = download.events();

        let (data, errors) = collect(download).await;
        assert!(errors.is_empty());
        assert_eq!(data, server.content);
        let retries: Vec<u32> = events
            .drain()
            .filter_map(|e| match e {
                DownloadEvent::Retry { attempt, .. } => Some(attempt),
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let server = Arc::new(MediaServer::new(8));
        server.fail_first.store(10, Ordering::SeqCst);
        let download = downloader(server.clone()).start(info(vec![audio_format(8)]), options(10));
        let events = download.events();

        let (data, errors) = collect(download).await;
        assert!(data.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_retryable());
        assert_eq!(server.ranges().len(), 4);
        assert!(events.drain().any(|e| matches!(e, DownloadEvent::Error(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_interrupted_body() {
        let server = Arc::new(MediaServer::new(12));
        *server.interrupt_once_after.lock().unwrap() = Some(1);
        let download = downloader(server.clone()).start(info(vec![muxed_format()]), options(10));
        let events = download.events();

        let (data, errors) = collect(download).await;
        assert!(errors.is_empty());
        assert_eq!(data, server.content);
        assert_eq!(server.ranges(), vec![None, Some("bytes=4-".to_string())]);
        assert!(events.drain().any(|e| matches!(e, DownloadEvent::Reconnect { attempt: 1, .. })));
    }

    #[tokio::test]
    async fn test_single_request_with_begin() {
        let server = Arc::new(MediaServer::new(6));
        let mut opts = options(10);
        opts.begin = Some(Duration::from_millis(1500));
        let download = downloader(server.clone()).start(info(vec![muxed_format()]), opts);

        let (data, _) = collect(download).await;
        assert_eq!(data.len(), 6);
        let requests = server.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].0.ends_with("&begin=1500"));
        assert_eq!(requests[0].1, None);
    }

    #[tokio::test]
    async fn test_segmented_format_relays_segments() {
        let server = Arc::new(MediaServer::new(1));
        let downloader = Downloader::new(server.clone(), Arc::new(FixedSegments(vec!["ab", "cde"])));
        let mut format = muxed_format();
        format.is_hls = true;
        let download = downloader.start(info(vec![format]), options(10));
        let events = download.events();

        let (data, errors) = collect(download).await;
        assert!(errors.is_empty());
        assert_eq!(data, b"abcde");
        assert!(server.ranges().is_empty());
        let progress: Vec<(u64, u64, Option<u64>)> = events
            .drain()
            .filter_map(|e| match e {
                DownloadEvent::Progress {
                    chunk,
                    downloaded,
                    total,
                } => Some((chunk, downloaded, total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(2, 1, Some(2)), (3, 2, Some(2))]);
    }

    #[tokio::test]
    async fn test_unplayable_video() {
        let server = Arc::new(MediaServer::new(1));
        let player = PlayerResponse::from_value(
            "test",
            json!({ "playabilityStatus": { "status": "LOGIN_REQUIRED", "reason": "Sign in to confirm your age" } }),
        )
        .unwrap();
        let mut blocked = VideoInfo::clone(&info(vec![audio_format(1)]));
        blocked.state.player_response = Some(player);
        let download = downloader(server.clone()).start(Arc::new(blocked), options(10));
        let events = download.events();

        let (_, errors) = collect(download).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::Unrecoverable);
        assert_eq!(errors[0].to_string(), "Sign in to confirm your age");
        assert!(events.drain().all(|e| !matches!(e, DownloadEvent::Info { .. })));
        assert!(server.ranges().is_empty());
    }

    #[tokio::test]
    async fn test_no_formats() {
        let download = downloader(Arc::new(MediaServer::new(1))).start(info(vec![]), options(10));
        let (_, errors) = collect(download).await;
        assert_eq!(errors[0].to_string(), "This video is unavailable");
    }

    #[tokio::test]
    async fn test_selection_error_propagates() {
        let mut opts = options(10);
        opts.choose.quality = "999".parse().unwrap();
        let download = downloader(Arc::new(MediaServer::new(1))).start(info(vec![audio_format(1)]), opts);
        let (_, errors) = collect(download).await;
        assert_eq!(errors[0].kind(), ErrorKind::NoMatchingFormat);
    }
}
