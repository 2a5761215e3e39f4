use std::{collections::VecDeque, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use futures::{
  StreamExt,
  stream::{self, BoxStream},
};

use super::{
  resolver::resolve_playlist,
  types::{MediaPlaylist, Resource},
};
use crate::{
  common::{
    errors::{Error, Result},
    http::{HttpClient, RequestHeaders},
  },
  sources::youtube::download::segments::{Segment, SegmentRequest, SegmentStreamer},
};

const DEFAULT_TARGET_DURATION: Duration = Duration::from_secs(5);

/// [`SegmentStreamer`] for HLS playlists. Live playlists are reloaded every
/// target duration until they end.
#[derive(Clone)]
pub struct HlsStreamer {
  http: Arc<dyn HttpClient>,
}

impl HlsStreamer {
  pub fn new(http: Arc<dyn HttpClient>) -> Self {
    Self { http }
  }
}

impl SegmentStreamer for HlsStreamer {
  fn stream(&self, request: SegmentRequest) -> BoxStream<'static, Result<Segment>> {
    if request.is_dash {
      return stream::once(async { Err(Error::Unsupported("DASH segment streaming".into())) }).boxed();
    }

    let cursor = PlaylistCursor::new(self.http.clone(), request);
    stream::unfold(cursor, |mut cursor| async move {
      if cursor.finished {
        return None;
      }
      match cursor.next_segment().await {
        Ok(Some(segment)) => Some((Ok(segment), cursor)),
        Ok(None) => None,
        Err(e) => {
          cursor.finished = true;
          Some((Err(e), cursor))
        }
      }
    })
    .boxed()
  }
}

struct PlaylistCursor {
  http: Arc<dyn HttpClient>,
  request: SegmentRequest,
  playlist_url: String,
  queue: VecDeque<Resource>,
  /// Media sequence number of the next segment not yet queued.
  next_sequence: Option<u64>,
  delivered: u64,
  total: Option<u64>,
  ended: bool,
  reload_after: Option<Duration>,
  finished: bool,
}

impl PlaylistCursor {
  fn new(http: Arc<dyn HttpClient>, request: SegmentRequest) -> Self {
    Self {
      http,
      playlist_url: request.url.clone(),
      request,
      queue: VecDeque::new(),
      next_sequence: None,
      delivered: 0,
      total: None,
      ended: false,
      reload_after: None,
      finished: false,
    }
  }

  async fn next_segment(&mut self) -> Result<Option<Segment>> {
    loop {
      if let Some(resource) = self.queue.pop_front() {
        let data = fetch_resource(&*self.http, &resource, &self.request.headers).await?;
        self.delivered += 1;
        return Ok(Some(Segment {
          num: self.delivered,
          total: self.total,
          data,
        }));
      }
      if self.ended {
        return Ok(None);
      }
      if let Some(delay) = self.reload_after {
        tokio::time::sleep(delay).await;
      }
      self.reload().await?;
    }
  }

  async fn reload(&mut self) -> Result<()> {
    let (url, playlist) = resolve_playlist(
      &*self.http,
      &self.playlist_url,
      Some(self.request.itag),
      &self.request.headers,
    )
    .await?;
    self.playlist_url = url;

    let MediaPlaylist {
      segments,
      map,
      media_sequence,
      target_duration,
      ended,
    } = playlist;
    let end_sequence = media_sequence + segments.len() as u64;

    match self.next_sequence {
      None => {
        let skip = start_index(&segments, ended, self.request.begin, self.request.live_buffer);
        tracing::debug!("HLS: starting at segment {} of {}", skip, segments.len());
        self.queue.extend(map);
        self.queue.extend(segments.into_iter().skip(skip));
        self.next_sequence = Some(end_sequence);
      }
      Some(next) => {
        let fresh = next.saturating_sub(media_sequence) as usize;
        self.queue.extend(segments.into_iter().skip(fresh));
        self.next_sequence = Some(next.max(end_sequence));
      }
    }

    self.ended = ended;
    if ended {
      self.total = Some(self.delivered + self.queue.len() as u64);
    }
    self.reload_after = Some(
      target_duration
        .filter(|d| *d > 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_TARGET_DURATION),
    );
    Ok(())
  }
}

/// Index of the first segment to deliver on the first load.
///
/// An explicit `begin` skips the segments that end before it. Otherwise a live
/// playlist starts `live_buffer` behind its edge and a finished one at the
/// start.
fn start_index(segments: &[Resource], ended: bool, begin: Option<Duration>, live_buffer: Duration) -> usize {
  let duration = |s: &Resource| s.duration.unwrap_or(0.0);

  if let Some(begin) = begin {
    let begin = begin.as_secs_f64();
    let mut elapsed = 0.0;
    for (i, segment) in segments.iter().enumerate() {
      if elapsed + duration(segment) > begin {
        return i;
      }
      elapsed += duration(segment);
    }
    return segments.len();
  }

  if ended {
    return 0;
  }

  let buffer = live_buffer.as_secs_f64();
  let mut buffered = 0.0;
  for (i, segment) in segments.iter().enumerate().rev() {
    buffered += duration(segment);
    if buffered >= buffer {
      return i;
    }
  }
  0
}

async fn fetch_resource(http: &dyn HttpClient, resource: &Resource, headers: &RequestHeaders) -> Result<Bytes> {
  let mut headers = headers.clone();
  if let Some(range) = &resource.range {
    headers.push(("Range".into(), range.header_value()));
  }

  let mut res = http.get_stream(&resource.url, &headers).await?;
  let mut out = BytesMut::with_capacity(res.content_length.unwrap_or(0) as usize);
  while let Some(chunk) = res.body.next().await {
    out.extend_from_slice(&chunk?);
  }
  Ok(out.freeze())
}
