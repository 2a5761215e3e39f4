use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use super::common::SourceContext;
use crate::{
    common::{errors::Result, types::VideoId},
    sources::youtube::{
        pipeline::InfoSource,
        state::{Page, PlayerResponse, ResolutionState},
        utils::{find_json, find_player_response, get_html5player},
    },
};

const SOURCE_NAME: &str = "watch.html";

static PLAYER_RESPONSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bytInitialPlayerResponse\s*=\s*\{").unwrap());
static PLAYER_CONFIG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bytplayer\.config\s*=\s*\{").unwrap());
static INITIAL_DATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bytInitialData("\])?\s*=\s*\{"#).unwrap());

/// Reads the player response and initial data embedded in the watch page.
pub struct WatchHtmlSource {
    ctx: Arc<SourceContext>,
}

impl WatchHtmlSource {
    pub fn new(ctx: Arc<SourceContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl InfoSource for WatchHtmlSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, id: &VideoId, _state: &ResolutionState) -> Result<ResolutionState> {
        let body = self.ctx.watch_page_body(id).await?;

        let player = match find_json(SOURCE_NAME, "player_response", &body, &PLAYER_RESPONSE) {
            Ok(player) => Some(player),
            Err(_) => {
                // Older page layout: the response sits inside the player config.
                let args = find_json(SOURCE_NAME, "player_response", &body, &PLAYER_CONFIG)?;
                find_player_response(SOURCE_NAME, &args)?
            }
        };
        let player_response = player
            .map(|p| PlayerResponse::from_value(SOURCE_NAME, p))
            .transpose()?;

        let response = find_json(SOURCE_NAME, "response", &body, &INITIAL_DATA)?;

        Ok(ResolutionState {
            page: Some(Page::Watch),
            player_response,
            response: Some(response),
            html5player: get_html5player(&body),
            page_fields: None,
        })
    }
}
