use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::formats::Format;
use crate::common::errors::{Error, Result};

/// Overwrites each listed field of `$target` with the one from `$source`
/// unless the source value is absent.
macro_rules! assign_present {
    ($target:expr, $source:expr; $($field:ident),+ $(,)?) => {
        $(
            if $source.$field.is_some() {
                $target.$field = $source.$field;
            }
        )+
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayabilityStatus {
    pub status: Option<String>,
    pub reason: Option<String>,
    pub messages: Option<Vec<String>>,
    pub error_screen: Option<Value>,
    pub playable_in_embed: Option<bool>,
}

impl PlayabilityStatus {
    fn merge(&mut self, other: PlayabilityStatus) {
        assign_present!(self, other; status, reason, messages, error_screen, playable_in_embed);
    }

    pub fn status(&self) -> &str {
        self.status.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingData {
    pub expires_in_seconds: Option<String>,
    pub formats: Option<Vec<Format>>,
    pub adaptive_formats: Option<Vec<Format>>,
    pub dash_manifest_url: Option<String>,
    pub hls_manifest_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    pub video_id: Option<String>,
    pub title: Option<String>,
    pub length_seconds: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub channel_id: Option<String>,
    pub short_description: Option<String>,
    pub thumbnail: Option<Value>,
    pub average_rating: Option<f64>,
    pub view_count: Option<String>,
    pub author: Option<String>,
    pub is_private: Option<bool>,
    pub is_live_content: Option<bool>,
    pub is_crawlable: Option<bool>,
    pub allow_ratings: Option<bool>,
}

impl VideoDetails {
    fn merge(&mut self, other: VideoDetails) {
        assign_present!(self, other;
            video_id,
            title,
            length_seconds,
            keywords,
            channel_id,
            short_description,
            thumbnail,
            average_rating,
            view_count,
            author,
            is_private,
            is_live_content,
            is_crawlable,
            allow_ratings,
        );
    }
}

/// The structured description of a video embedded in its pages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResponse {
    pub playability_status: Option<PlayabilityStatus>,
    pub streaming_data: Option<StreamingData>,
    pub video_details: Option<VideoDetails>,
    pub microformat: Option<Value>,
    pub storyboards: Option<Value>,
    pub captions: Option<Value>,
}

impl PlayerResponse {
    pub fn from_value(source: &str, value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::parse(source, "player_response", e))
    }

    /// Layers `other` over `self`; status and details merge field by field.
    pub fn merge(&mut self, other: PlayerResponse) {
        match (&mut self.playability_status, other.playability_status) {
            (Some(current), Some(next)) => current.merge(next),
            (slot, next @ Some(_)) => *slot = next,
            _ => {}
        }
        match (&mut self.video_details, other.video_details) {
            (Some(current), Some(next)) => current.merge(next),
            (slot, next @ Some(_)) => *slot = next,
            _ => {}
        }
        assign_present!(self, other; streaming_data, microformat, storyboards, captions);
    }

    pub fn status(&self) -> &str {
        self.playability_status
            .as_ref()
            .map(PlayabilityStatus::status)
            .unwrap_or_default()
    }

    /// Every format listed in the streaming data, muxed first.
    pub fn raw_formats(&self) -> Vec<Format> {
        self.streaming_data
            .as_ref()
            .map(|sd| {
                sd.formats
                    .iter()
                    .flatten()
                    .chain(sd.adaptive_formats.iter().flatten())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Which page a source read its metadata from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    Watch,
    Embed,
    VideoInfo,
}

/// Metadata accumulated across sources during one resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionState {
    pub page: Option<Page>,
    pub player_response: Option<PlayerResponse>,
    /// The page's initial data blob (`ytInitialData` or the watch JSON
    /// `response` part).
    pub response: Option<Value>,
    pub html5player: Option<String>,
    /// Top-level fields of a form-encoded page, `player_response` excluded.
    pub page_fields: Option<Map<String, Value>>,
}

impl ResolutionState {
    /// Layers a source's partial result over the accumulated state.
    pub fn merge(&mut self, other: ResolutionState) {
        match (&mut self.player_response, other.player_response) {
            (Some(current), Some(next)) => current.merge(next),
            (slot, next @ Some(_)) => *slot = next,
            _ => {}
        }
        assign_present!(self, other; page, response, html5player, page_fields);
    }

    pub fn status(&self) -> &str {
        self.player_response
            .as_ref()
            .map(PlayerResponse::status)
            .unwrap_or_default()
    }
}
