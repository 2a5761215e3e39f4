use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::common::{errors::Result, http::RequestHeaders};

/// One media segment delivered by a [`SegmentStreamer`].
#[derive(Debug, Clone)]
pub struct Segment {
    /// 1-based position of the segment in the delivered sequence.
    pub num: u64,
    /// Number of segments once the playlist is known to be complete.
    pub total: Option<u64>,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub url: String,
    pub itag: u32,
    /// The URL is a DASH MPD rather than an HLS playlist.
    pub is_dash: bool,
    /// Offset into the media to start from.
    pub begin: Option<Duration>,
    /// How far behind the live edge to start a live stream.
    pub live_buffer: Duration,
    pub headers: RequestHeaders,
}

/// Delivers a segmented (HLS or DASH) stream as a sequence of segments.
///
/// The stream ends after the last segment of a finished playlist and yields
/// at most one error, after which it ends. Dropping the stream stops any
/// further requests.
pub trait SegmentStreamer: Send + Sync {
    fn stream(&self, request: SegmentRequest) -> BoxStream<'static, Result<Segment>>;
}
