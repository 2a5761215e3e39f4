//! Human-facing metadata scraped from the watch page data: author, likes,
//! storyboards, related videos and media rows.
//!
//! Every field is best effort. A page layout the extractor does not recognize
//! yields absent fields, never an error for the whole info.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use url::Url;

use super::{
    state::ResolutionState,
    utils::{BASE_URL, absolute_url, get_text, parse_abbreviated_number},
};
use crate::common::errors::{Error, Result};

const SOURCE_NAME: &str = "info_extras";

const WATCH_CONTENTS: &str = "/contents/twoColumnWatchNextResults/results/results/contents";
const SECONDARY_RESULTS: &str =
    "/contents/twoColumnWatchNextResults/secondaryResults/secondaryResults/results";

const AGE_RESTRICTED_URLS: &[&str] = &[
    "support.google.com/youtube/?p=age_restrictions",
    "youtube.com/t/community_guidelines",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Author {
    pub id: Option<String>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub channel_url: String,
    pub external_channel_url: Option<String>,
    pub user_url: Option<String>,
    pub thumbnails: Vec<Thumbnail>,
    pub verified: bool,
    pub subscriber_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Storyboard {
    pub template_url: String,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub thumbnail_count: u32,
    /// Milliseconds between thumbnails.
    pub interval: u64,
    pub columns: u32,
    pub rows: u32,
    pub storyboard_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelatedVideo {
    pub id: String,
    pub title: Option<String>,
    pub published: Option<String>,
    pub author: Option<String>,
    pub channel_id: Option<String>,
    pub view_count: Option<String>,
    pub length_seconds: Option<u64>,
    pub thumbnails: Vec<Thumbnail>,
    pub is_live: bool,
}

/// Everything an [`InfoExtractor`] adds to a video's info.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InfoExtras {
    pub author: Option<Author>,
    /// Rows of the media section (`song`, `artist`, `category`, ...).
    pub media: BTreeMap<String, String>,
    pub likes: Option<u64>,
    pub dislikes: Option<u64>,
    pub age_restricted: bool,
    pub storyboards: Vec<Storyboard>,
    pub related_videos: Vec<RelatedVideo>,
}

/// Turns resolved page data into [`InfoExtras`].
pub trait InfoExtractor: Send + Sync {
    fn extract(&self, state: &ResolutionState) -> Result<InfoExtras>;
}

/// Reads the extras from the watch page layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicExtractor;

impl InfoExtractor for BasicExtractor {
    fn extract(&self, state: &ResolutionState) -> Result<InfoExtras> {
        let media = get_media(state);
        let age_restricted = media
            .get("notice_url")
            .is_some_and(|url| AGE_RESTRICTED_URLS.iter().any(|r| url.contains(r)));

        let storyboards = match get_storyboards(state) {
            Ok(storyboards) => storyboards,
            Err(e) => {
                warn!("ignoring storyboards: {}", e);
                Vec::new()
            }
        };

        Ok(InfoExtras {
            author: get_author(state),
            likes: get_rating(state, "LIKE"),
            dislikes: get_rating(state, "DISLIKE"),
            related_videos: get_related_videos(state),
            age_restricted,
            media,
            storyboards,
        })
    }
}

fn watch_contents(state: &ResolutionState) -> &[Value] {
    state
        .response
        .as_ref()
        .and_then(|r| r.pointer(WATCH_CONTENTS))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn thumbnails(value: Option<&Value>) -> Vec<Thumbnail> {
    value
        .and_then(|t| t.get("thumbnails"))
        .and_then(|t| serde_json::from_value::<Vec<Thumbnail>>(t.clone()).ok())
        .unwrap_or_default()
}

fn is_verified(badges: Option<&Value>) -> bool {
    badges.and_then(Value::as_array).is_some_and(|badges| {
        badges
            .iter()
            .any(|b| b.pointer("/metadataBadgeRenderer/tooltip").and_then(Value::as_str) == Some("Verified"))
    })
}

fn command_url(endpoint: Option<&Value>) -> Option<String> {
    endpoint
        .and_then(|e| e.pointer("/commandMetadata/webCommandMetadata/url"))
        .and_then(Value::as_str)
        .map(absolute_url)
}

fn get_media(state: &ResolutionState) -> BTreeMap<String, String> {
    let mut media = BTreeMap::new();
    let Some(secondary) = watch_contents(state)
        .iter()
        .find(|c| c.get("videoSecondaryInfoRenderer").is_some())
    else {
        return media;
    };

    let rows = secondary
        .pointer("/metadataRowContainer/metadataRowContainerRenderer/rows")
        .or_else(|| {
            secondary.pointer(
                "/videoSecondaryInfoRenderer/metadataRowContainer/metadataRowContainerRenderer/rows",
            )
        })
        .and_then(Value::as_array);

    for row in rows.into_iter().flatten() {
        if let Some(renderer) = row.get("metadataRowRenderer") {
            let Some(title) = renderer.get("title").and_then(get_text) else {
                continue;
            };
            let title = title.to_lowercase();
            let contents = renderer.pointer("/contents/0");
            if let Some(text) = contents.and_then(get_text) {
                media.insert(title.clone(), text);
            }
            if let Some(url) = command_url(contents.and_then(|c| c.pointer("/runs/0/navigationEndpoint"))) {
                media.insert(format!("{}_url", title), url);
            }
            if title == "song" {
                media.insert("category".into(), "Music".into());
                media.insert("category_url".into(), "https://music.youtube.com/".into());
            }
        } else if let Some(contents) = row
            .pointer("/richMetadataRowRenderer/contents")
            .and_then(Value::as_array)
        {
            for meta in contents.iter().filter_map(|c| c.get("richMetadataRenderer")) {
                let url = command_url(meta.get("endpoint"));
                match meta.get("style").and_then(Value::as_str) {
                    Some("RICH_METADATA_RENDERER_STYLE_BOX_ART") => {
                        if let Some(year) = meta.get("subtitle").and_then(get_text) {
                            media.insert("year".into(), year);
                        }
                        let kind = meta
                            .get("callToAction")
                            .and_then(get_text)
                            .and_then(|t| t.split(' ').nth(1).map(str::to_string));
                        if let (Some(kind), Some(title)) = (kind, meta.get("title").and_then(get_text)) {
                            if let Some(url) = url {
                                media.insert(format!("{}_url", kind), url);
                            }
                            media.insert(kind, title);
                        }
                    }
                    Some("RICH_METADATA_RENDERER_STYLE_TOPIC") => {
                        if let Some(category) = meta.get("title").and_then(get_text) {
                            media.insert("category".into(), category);
                        }
                        if let Some(url) = url {
                            media.insert("category_url".into(), url);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    media
}

fn get_author(state: &ResolutionState) -> Option<Author> {
    let owner = watch_contents(state)
        .iter()
        .find_map(|c| c.pointer("/videoSecondaryInfoRenderer/owner/videoOwnerRenderer"));
    let player = state.player_response.as_ref();
    let microformat = player
        .and_then(|p| p.microformat.as_ref())
        .and_then(|m| m.get("playerMicroformatRenderer"));
    let details = player.and_then(|p| p.video_details.as_ref());

    if owner.is_none() && microformat.is_none() && details.is_none() {
        return None;
    }

    let str_field = |v: Option<&Value>, key: &str| {
        v.and_then(|v| v.get(key)).and_then(Value::as_str).map(str::to_string)
    };

    let id = str_field(microformat, "channelId")
        .or_else(|| {
            owner
                .and_then(|o| o.pointer("/navigationEndpoint/browseEndpoint/browseId"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or_else(|| details.and_then(|d| d.channel_id.clone()));
    let profile_url = str_field(microformat, "ownerProfileUrl");

    Some(Author {
        channel_url: format!(
            "https://www.youtube.com/channel/{}",
            id.as_deref().unwrap_or_default()
        ),
        name: str_field(microformat, "ownerChannelName")
            .or_else(|| details.and_then(|d| d.author.clone())),
        user: profile_url
            .as_deref()
            .and_then(|u| u.rsplit('/').next())
            .map(str::to_string),
        external_channel_url: str_field(microformat, "externalChannelId")
            .map(|ext| format!("https://www.youtube.com/channel/{}", ext)),
        user_url: profile_url.as_deref().map(absolute_url),
        thumbnails: thumbnails(owner.and_then(|o| o.get("thumbnail")))
            .into_iter()
            .map(|t| Thumbnail {
                url: absolute_url(&t.url),
                ..t
            })
            .collect(),
        verified: is_verified(owner.and_then(|o| o.get("badges"))),
        subscriber_count: owner
            .and_then(|o| o.get("subscriberCountText"))
            .and_then(get_text)
            .and_then(|t| parse_abbreviated_number(&t)),
        id,
    })
}

/// Like or dislike count from the toggle button with `icon`.
fn get_rating(state: &ResolutionState, icon: &str) -> Option<u64> {
    let buttons = watch_contents(state)
        .iter()
        .find_map(|c| c.pointer("/videoPrimaryInfoRenderer/videoActions/menuRenderer/topLevelButtons"))?
        .as_array()?;
    let button = buttons.iter().find_map(|b| {
        let toggle = b.get("toggleButtonRenderer")?;
        (toggle.pointer("/defaultIcon/iconType")?.as_str()? == icon).then_some(toggle)
    })?;
    let label = button
        .pointer("/defaultText/accessibility/accessibilityData/label")?
        .as_str()?;
    label
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()
}

fn get_related_videos(state: &ResolutionState) -> Vec<RelatedVideo> {
    let Some(results) = state
        .response
        .as_ref()
        .and_then(|r| r.pointer(SECONDARY_RESULTS))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut videos = Vec::new();
    for result in results {
        if let Some(details) = result.get("compactVideoRenderer") {
            videos.extend(parse_related_video(details));
            continue;
        }
        let autoplay = result
            .get("compactAutoplayRenderer")
            .or_else(|| result.get("itemSectionRenderer"))
            .and_then(|a| a.get("contents"))
            .and_then(Value::as_array);
        for content in autoplay.into_iter().flatten() {
            if let Some(details) = content.get("compactVideoRenderer") {
                videos.extend(parse_related_video(details));
            }
        }
    }
    videos
}

fn parse_related_video(details: &Value) -> Option<RelatedVideo> {
    let id = details.get("videoId")?.as_str()?.to_string();
    let starts_with_digit = |s: &String| s.starts_with(|c: char| c.is_ascii_digit());

    let view_count = details
        .get("viewCountText")
        .and_then(get_text)
        .filter(starts_with_digit)
        .or_else(|| {
            details
                .get("shortViewCountText")
                .and_then(get_text)
                .filter(starts_with_digit)
        })
        .and_then(|v| v.split(' ').next().map(|n| n.replace(',', "")));

    let byline = details.get("shortBylineText");
    Some(RelatedVideo {
        title: details.get("title").and_then(get_text),
        published: details.get("publishedTimeText").and_then(get_text),
        author: byline.and_then(get_text),
        channel_id: byline
            .and_then(|b| b.pointer("/runs/0/navigationEndpoint/browseEndpoint/browseId"))
            .and_then(Value::as_str)
            .map(str::to_string),
        length_seconds: details
            .get("lengthText")
            .and_then(get_text)
            .and_then(|t| parse_timestamp(&t)),
        thumbnails: thumbnails(details.get("thumbnail")),
        is_live: details
            .get("badges")
            .and_then(Value::as_array)
            .is_some_and(|badges| {
                badges.iter().any(|b| {
                    b.pointer("/metadataBadgeRenderer/label").and_then(Value::as_str) == Some("LIVE NOW")
                })
            }),
        view_count,
        id,
    })
}

/// Seconds in a `h:mm:ss` / `m:ss` / `ss` timestamp.
fn parse_timestamp(text: &str) -> Option<u64> {
    text.trim()
        .split(':')
        .try_fold(0u64, |acc, part| Some(acc * 60 + part.trim().parse::<u64>().ok()?))
}

/// Storyboard sheets described by the player's storyboard spec, one per
/// detail level.
fn get_storyboards(state: &ResolutionState) -> Result<Vec<Storyboard>> {
    let Some(spec) = state
        .player_response
        .as_ref()
        .and_then(|p| p.storyboards.as_ref())
        .and_then(|s| s.pointer("/playerStoryboardSpecRenderer/spec"))
        .and_then(Value::as_str)
    else {
        return Ok(Vec::new());
    };

    let mut parts = spec.split('|');
    let base = parts.next().unwrap_or_default();
    let mut url = Url::parse(base).map_err(|e| Error::parse(SOURCE_NAME, "storyboard url", e))?;

    let mut storyboards = Vec::new();
    for (i, part) in parts.enumerate() {
        let fields: Vec<&str> = part.split('#').collect();
        let [width, height, count, columns, rows, interval, name, sigh, ..] = fields.as_slice() else {
            return Err(Error::parse(SOURCE_NAME, "storyboard spec", part));
        };
        let number = |s: &str| {
            s.parse::<u64>()
                .map_err(|e| Error::parse(SOURCE_NAME, "storyboard spec", e))
        };

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "sigh")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs).append_pair("sigh", sigh);

        let thumbnail_count = number(*count)? as u32;
        let columns = number(*columns)? as u32;
        let rows = number(*rows)? as u32;
        let per_sheet = (columns * rows).max(1);

        storyboards.push(Storyboard {
            template_url: url
                .as_str()
                .replacen("$L", &i.to_string(), 1)
                .replacen("$N", name, 1),
            thumbnail_width: number(*width)? as u32,
            thumbnail_height: number(*height)? as u32,
            interval: number(*interval)?,
            storyboard_count: thumbnail_count.div_ceil(per_sheet),
            thumbnail_count,
            columns,
            rows,
        });
    }
    Ok(storyboards)
}

/// Canonical watch URL of a video.
pub fn video_url(id: &str) -> String {
    format!("{}{}", BASE_URL, id)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::sources::youtube::state::PlayerResponse;

    fn state() -> ResolutionState {
        let response = json!({
            "contents": { "twoColumnWatchNextResults": {
                "results": { "results": { "contents": [
                    { "videoPrimaryInfoRenderer": { "videoActions": { "menuRenderer": { "topLevelButtons": [
                        { "toggleButtonRenderer": {
                            "defaultIcon": { "iconType": "LIKE" },
                            "defaultText": { "accessibility": { "accessibilityData": { "label": "12,345 likes" } } }
                        } },
                        { "toggleButtonRenderer": {
                            "defaultIcon": { "iconType": "DISLIKE" },
                            "defaultText": { "accessibility": { "accessibilityData": { "label": "67 dislikes" } } }
                        } }
                    ] } } } },
                    { "videoSecondaryInfoRenderer": {
                        "owner": { "videoOwnerRenderer": {
                            "navigationEndpoint": { "browseEndpoint": { "browseId": "UC123" } },
                            "thumbnail": { "thumbnails": [ { "url": "//yt3.example/a.jpg", "width": 48, "height": 48 } ] },
                            "subscriberCountText": { "simpleText": "1.5M subscribers" },
                            "badges": [ { "metadataBadgeRenderer": { "tooltip": "Verified" } } ]
                        } },
                        "metadataRowContainer": { "metadataRowContainerRenderer": { "rows": [
                            { "metadataRowRenderer": {
                                "title": { "simpleText": "Song" },
                                "contents": [ { "runs": [ { "text": "Tune",
                                    "navigationEndpoint": { "commandMetadata": { "webCommandMetadata": { "url": "/watch?v=tune" } } } } ] } ]
                            } },
                            { "metadataRowRenderer": {
                                "title": { "simpleText": "Notice" },
                                "contents": [ { "runs": [ { "text": "Age-restricted",
                                    "navigationEndpoint": { "commandMetadata": { "webCommandMetadata": {
                                        "url": "https://support.google.com/youtube/?p=age_restrictions" } } } } ] } ]
                            } }
                        ] } }
                    } }
                ] } },
                "secondaryResults": { "secondaryResults": { "results": [
                    { "compactVideoRenderer": {
                        "videoId": "bbbbbbbbbbb",
                        "title": { "simpleText": "Next" },
                        "viewCountText": { "simpleText": "1,234 views" },
                        "lengthText": { "simpleText": "1:02:03" },
                        "shortBylineText": { "runs": [ { "text": "Other",
                            "navigationEndpoint": { "browseEndpoint": { "browseId": "UC999" } } } ] },
                        "badges": [ { "metadataBadgeRenderer": { "label": "LIVE NOW" } } ]
                    } },
                    { "itemSectionRenderer": { "contents": [
                        { "compactVideoRenderer": { "videoId": "ccccccccccc", "shortViewCountText": { "simpleText": "5K views" } } }
                    ] } }
                ] } }
            } }
        });
        let player = PlayerResponse::from_value("test", json!({
            "videoDetails": { "videoId": "aaaaaaaaaaa", "author": "Fallback", "channelId": "UC123" },
            "microformat": { "playerMicroformatRenderer": {
                "ownerChannelName": "Someone",
                "ownerProfileUrl": "http://www.youtube.com/user/someone",
                "externalChannelId": "UC123"
            } },
            "storyboards": { "playerStoryboardSpecRenderer": {
                "spec": "https://i.ytimg.com/sb/aaaaaaaaaaa/storyboard3_L$L/$N.jpg?sqp=x|48#27#100#10#10#0#default#rs$A|80#45#95#10#10#2000#M$M#rs$B"
            } }
        }))
        .unwrap();

        ResolutionState {
            player_response: Some(player),
            response: Some(response),
            ..Default::default()
        }
    }

    #[test]
    fn test_extracts_extras() {
        let extras = BasicExtractor.extract(&state()).unwrap();

        assert_eq!(extras.likes, Some(12_345));
        assert_eq!(extras.dislikes, Some(67));
        assert!(extras.age_restricted);
        assert_eq!(extras.media["song"], "Tune");
        assert_eq!(extras.media["song_url"], "https://www.youtube.com/watch?v=tune");
        assert_eq!(extras.media["category"], "Music");

        let author = extras.author.unwrap();
        assert_eq!(author.id.as_deref(), Some("UC123"));
        assert_eq!(author.name.as_deref(), Some("Someone"));
        assert_eq!(author.user.as_deref(), Some("someone"));
        assert_eq!(author.subscriber_count, Some(1_500_000));
        assert!(author.verified);
        assert_eq!(author.thumbnails[0].url, "https://yt3.example/a.jpg");

        assert_eq!(extras.related_videos.len(), 2);
        let first = &extras.related_videos[0];
        assert_eq!(first.view_count.as_deref(), Some("1234"));
        assert_eq!(first.length_seconds, Some(3723));
        assert_eq!(first.channel_id.as_deref(), Some("UC999"));
        assert!(first.is_live);
        assert_eq!(extras.related_videos[1].view_count.as_deref(), Some("5K"));
    }

    #[test]
    fn test_storyboards() {
        let storyboards = get_storyboards(&state()).unwrap();
        assert_eq!(storyboards.len(), 2);
        assert_eq!(
            storyboards[0].template_url,
            "https://i.ytimg.com/sb/aaaaaaaaaaa/storyboard3_L0/default.jpg?sqp=x&sigh=rs%24A"
        );
        assert_eq!(storyboards[0].storyboard_count, 1);
        assert_eq!(storyboards[1].interval, 2000);
        assert_eq!(storyboards[1].storyboard_count, 1);
        assert!(storyboards[1].template_url.contains("storyboard3_L1/M$M.jpg"));
        assert!(storyboards[1].template_url.ends_with("sigh=rs%24B"));
    }

    #[test]
    fn test_missing_data_degrades() {
        let extras = BasicExtractor.extract(&ResolutionState::default()).unwrap();
        assert_eq!(extras, InfoExtras::default());
    }
}
