use serde::Serialize;
use serde_json::Value;

use super::{
    extractor::{InfoExtras, Thumbnail, video_url},
    formats::Format,
    state::{PlayerResponse, ResolutionState},
};

/// Cleaned-up view of the player's video details.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoDetailsView {
    pub video_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Taken from the microformat when present, it is more reliable there.
    pub length_seconds: Option<u64>,
    pub view_count: Option<u64>,
    pub keywords: Vec<String>,
    pub channel_id: Option<String>,
    pub thumbnails: Vec<Thumbnail>,
    pub is_private: bool,
    pub is_live_content: bool,
    pub video_url: String,
}

impl VideoDetailsView {
    pub fn new(video_id: &str, state: &ResolutionState) -> Self {
        let player = state.player_response.as_ref();
        let details = player.and_then(|p| p.video_details.clone()).unwrap_or_default();
        let microformat_length = player
            .and_then(|p| p.microformat.as_ref())
            .and_then(|m| m.pointer("/playerMicroformatRenderer/lengthSeconds"))
            .and_then(|v| match v {
                Value::String(s) => s.parse().ok(),
                other => other.as_u64(),
            });

        Self {
            video_id: details.video_id.unwrap_or_else(|| video_id.to_string()),
            title: details.title,
            description: details.short_description,
            length_seconds: microformat_length
                .or_else(|| details.length_seconds.and_then(|l| l.parse().ok())),
            view_count: details.view_count.and_then(|v| v.parse().ok()),
            keywords: details.keywords.unwrap_or_default(),
            channel_id: details.channel_id,
            thumbnails: details
                .thumbnail
                .and_then(|t| t.get("thumbnails").cloned())
                .and_then(|t| serde_json::from_value(t).ok())
                .unwrap_or_default(),
            is_private: details.is_private.unwrap_or(false),
            is_live_content: details.is_live_content.unwrap_or(false),
            video_url: video_url(video_id),
        }
    }
}

/// Everything known about one video.
///
/// Infos from basic resolution carry the raw formats; `full` infos carry
/// deciphered, manifest-extended and sorted formats ready for download.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoInfo {
    pub video_id: String,
    pub state: ResolutionState,
    pub formats: Vec<Format>,
    pub details: VideoDetailsView,
    pub extras: InfoExtras,
    pub html5player: Option<String>,
    pub full: bool,
}

impl VideoInfo {
    pub fn player_response(&self) -> Option<&PlayerResponse> {
        self.state.player_response.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_details_view() {
        let player = PlayerResponse::from_value(
            "test",
            json!({
                "videoDetails": {
                    "videoId": "aaaaaaaaaaa",
                    "title": "Title",
                    "lengthSeconds": "61",
                    "viewCount": "1000",
                    "shortDescription": "Words",
                    "thumbnail": { "thumbnails": [ { "url": "https://i.example/1.jpg", "width": 120, "height": 90 } ] }
                },
                "microformat": { "playerMicroformatRenderer": { "lengthSeconds": "62" } }
            }),
        )
        .unwrap();
        let state = ResolutionState {
            player_response: Some(player),
            ..Default::default()
        };

        let view = VideoDetailsView::new("aaaaaaaaaaa", &state);
        assert_eq!(view.title.as_deref(), Some("Title"));
        assert_eq!(view.description.as_deref(), Some("Words"));
        assert_eq!(view.length_seconds, Some(62));
        assert_eq!(view.view_count, Some(1000));
        assert_eq!(view.thumbnails[0].width, Some(120));
        assert_eq!(view.video_url, "https://www.youtube.com/watch?v=aaaaaaaaaaa");
    }
}
