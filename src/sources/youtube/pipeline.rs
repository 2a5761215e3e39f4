use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::state::ResolutionState;
use crate::{
    common::{
        errors::{Error, ErrorKind, Result},
        types::VideoId,
    },
    configs::{DownloadRetryConfig, RetryConfig},
};

/// One way of obtaining (part of) a video's metadata.
#[async_trait]
pub trait InfoSource: Send + Sync {
    fn name(&self) -> &str;

    /// Produces a partial state. `state` holds what earlier sources found.
    async fn fetch(&self, id: &VideoId, state: &ResolutionState) -> Result<ResolutionState>;
}

/// Linear backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_inc: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_inc
            .saturating_mul(attempt)
            .min(self.backoff_max)
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_inc: Duration::from_millis(config.backoff_inc_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl From<DownloadRetryConfig> for RetryPolicy {
    fn from(config: DownloadRetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_inc: Duration::from_millis(config.backoff_inc_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

/// Failures another attempt cannot fix.
fn is_terminal(err: &Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Unrecoverable
            | ErrorKind::Status
            | ErrorKind::InvalidInput
            | ErrorKind::Cancelled
            | ErrorKind::Config
    )
}

/// Runs `op` until it succeeds, fails terminally, or runs out of retries.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_terminal(&e) || attempt >= policy.max_retries => return Err(e),
            Err(e) => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    what, attempt, policy.max_retries, delay, e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Decides whether the accumulated state is good enough to stop.
pub type Validator = dyn Fn(&ResolutionState) -> Result<bool> + Send + Sync;

const PRIVATE_VIDEO: &str = "This is a private video";
const RENTAL_RENDERER: &str = "playerLegacyDesktopYpcOfferRenderer";

/// Classifies the playability of the accumulated player response.
///
/// Errors for statuses that no other source can fix; otherwise reports
/// whether stream data (or an explanation for its absence) is present.
pub fn validate_player_response(state: &ResolutionState) -> Result<bool> {
    let Some(player) = state.player_response.as_ref() else {
        return Ok(false);
    };

    if let Some(status) = player.playability_status.as_ref() {
        match status.status() {
            "ERROR" => {
                return Err(Error::Unrecoverable(
                    status.reason.clone().unwrap_or_else(|| "Video unavailable".into()),
                ));
            }
            "LOGIN_REQUIRED" => {
                let private = status
                    .messages
                    .iter()
                    .flatten()
                    .any(|m| m.contains(PRIVATE_VIDEO));
                if private {
                    let reason = status
                        .reason
                        .clone()
                        .or_else(|| status.messages.as_ref().and_then(|m| m.first().cloned()))
                        .unwrap_or_else(|| PRIVATE_VIDEO.into());
                    return Err(Error::Unrecoverable(reason));
                }
            }
            _ => {}
        }
    }

    if player.streaming_data.is_some() {
        return Ok(true);
    }

    let rental = player.playability_status.as_ref().is_some_and(|s| {
        s.status() == "UNPLAYABLE"
            && s.error_screen
                .as_ref()
                .is_some_and(|screen| screen.get(RENTAL_RENDERER).is_some())
    });
    Ok(rental || player.status() == "LIVE_STREAM_OFFLINE")
}

/// Ordered list of metadata sources tried until one validates.
pub struct Pipeline {
    sources: Vec<Arc<dyn InfoSource>>,
    retry: RetryPolicy,
    validate: Box<Validator>,
}

impl Pipeline {
    pub fn new(sources: Vec<Arc<dyn InfoSource>>, retry: RetryPolicy) -> Self {
        Self {
            sources,
            retry,
            validate: Box::new(validate_player_response),
        }
    }

    pub fn with_validator(
        mut self,
        validate: impl Fn(&ResolutionState) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Box::new(validate);
        self
    }

    pub async fn resolve(&self, id: &VideoId) -> Result<ResolutionState> {
        let mut state = ResolutionState::default();
        let last = self.sources.len().saturating_sub(1);

        for (i, source) in self.sources.iter().enumerate() {
            let fetched = retry(&self.retry, source.name(), || source.fetch(id, &state)).await;
            let outcome = fetched.and_then(|partial| {
                state.merge(partial);
                (self.validate)(&state)
            });

            match outcome {
                Ok(true) => {
                    debug!("{} resolved {}", source.name(), id);
                    return Ok(state);
                }
                Ok(false) => {
                    debug!("{} returned no usable data for {}", source.name(), id);
                }
                Err(e) if e.is_unrecoverable() || i == last => return Err(e),
                Err(e) => {
                    debug!("{} failed for {}, trying next source: {}", source.name(), id, e);
                }
            }
        }

        Err(Error::ValidationFailed(format!(
            "no source returned playable data for {}",
            id
        )))
    }
}
