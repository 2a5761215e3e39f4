use futures::StreamExt;
use tracing::warn;

use super::{DownloadEvent, Sink, session::SubRange};
use crate::{
    common::{
        errors::{Error, Result},
        http::{HttpClient, HttpResponse, RequestHeaders},
    },
    sources::youtube::pipeline::RetryPolicy,
};

/// Running byte count of one download.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    pub downloaded: u64,
    pub total: Option<u64>,
}

/// One ranged GET with request-level resilience.
///
/// Failures before the first byte are retried; a body interrupted midway is
/// resumed from the received offset with a fresh ranged request.
pub struct Transfer<'a> {
    pub http: &'a dyn HttpClient,
    pub url: &'a str,
    pub headers: &'a RequestHeaders,
    pub policy: RetryPolicy,
    pub max_reconnects: u32,
    pub sink: &'a Sink,
}

impl Transfer<'_> {
    /// Streams `range` (or the whole resource) into the sink.
    pub async fn run(&self, range: Option<SubRange>, progress: &mut Progress) -> Result<()> {
        let mut received = 0u64;
        let mut reconnects = 0u32;

        loop {
            let request_range = match range {
                Some(r) => Some(SubRange {
                    start: r.start + received,
                    end: r.end,
                }),
                None if received > 0 => Some(SubRange {
                    start: received,
                    end: None,
                }),
                None => None,
            };

            let mut res = self.open(request_range).await?;
            if progress.total.is_none() && received == 0 {
                progress.total = res.content_length;
            }

            loop {
                let next = tokio::select! {
                    biased;
                    _ = self.sink.cancelled() => return Err(Error::Cancelled),
                    chunk = res.body.next() => chunk,
                };

                match next {
                    Some(Ok(bytes)) => {
                        let len = bytes.len() as u64;
                        received += len;
                        progress.downloaded += len;
                        self.sink.emit(DownloadEvent::Progress {
                            chunk: len,
                            downloaded: progress.downloaded,
                            total: progress.total,
                        });
                        self.sink.send(bytes).await?;
                    }
                    Some(Err(e)) if e.is_retryable() && reconnects < self.max_reconnects => {
                        reconnects += 1;
                        warn!(
                            "stream of {} interrupted after {} bytes, reconnecting ({}/{}): {}",
                            self.url, received, reconnects, self.max_reconnects, e
                        );
                        self.sink.emit(DownloadEvent::Reconnect {
                            attempt: reconnects,
                            error: e,
                        });
                        self.sink.sleep(self.policy.delay(reconnects)).await?;
                        break;
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Ok(()),
                }
            }
        }
    }

    async fn open(&self, range: Option<SubRange>) -> Result<HttpResponse> {
        let mut headers = self.headers.clone();
        if let Some(range) = range {
            headers.push(("Range".into(), range.header_value()));
        }

        let mut attempt = 0;
        loop {
            if self.sink.is_destroyed() {
                return Err(Error::Cancelled);
            }
            self.sink.emit(DownloadEvent::Request {
                url: self.url.to_string(),
                range: range.map(|r| r.header_value()),
            });

            let result = tokio::select! {
                biased;
                _ = self.sink.cancelled() => return Err(Error::Cancelled),
                res = self.http.get_stream(self.url, &headers) => res,
            };

            match result {
                Ok(res) => {
                    if res.url != self.url {
                        self.sink.emit(DownloadEvent::Redirect {
                            url: res.url.clone(),
                        });
                    }
                    self.sink.emit(DownloadEvent::Response {
                        status: res.status,
                        content_length: res.content_length,
                    });
                    return Ok(res);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    warn!(
                        "request for {} failed, retrying ({}/{}): {}",
                        self.url, attempt, self.policy.max_retries, e
                    );
                    self.sink.emit(DownloadEvent::Retry { attempt, error: e });
                    self.sink.sleep(self.policy.delay(attempt)).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
