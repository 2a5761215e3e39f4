use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use url::Url;

use super::common::SourceContext;
use crate::{
    common::{errors::Result, types::VideoId},
    sources::youtube::{
        pipeline::InfoSource,
        state::{Page, PlayerResponse, ResolutionState},
        utils::find_player_response,
    },
};

const SOURCE_NAME: &str = "get_video_info";
const INFO_URL: &str = "https://www.youtube.com/get_video_info";
const VIDEO_EURL: &str = "https://youtube.googleapis.com/v/";

/// Legacy form-encoded metadata endpoint.
pub struct VideoInfoSource {
    ctx: Arc<SourceContext>,
}

impl VideoInfoSource {
    pub fn new(ctx: Arc<SourceContext>) -> Self {
        Self { ctx }
    }

    fn url(&self, id: &VideoId) -> Result<String> {
        let mut url = Url::parse(INFO_URL)?;
        url.query_pairs_mut()
            .append_pair("video_id", id)
            .append_pair("eurl", &format!("{}{}", VIDEO_EURL, id))
            .append_pair("ps", "default")
            .append_pair("gl", "US")
            .append_pair("hl", &self.ctx.lang);
        Ok(url.to_string())
    }
}

#[async_trait]
impl InfoSource for VideoInfoSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, id: &VideoId, _state: &ResolutionState) -> Result<ResolutionState> {
        let url = self.url(id)?;
        let body = self.ctx.http.get_text(&url, &self.ctx.headers).await?;

        let fields: Map<String, Value> = url::form_urlencoded::parse(body.as_bytes())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        let mut fields = Value::Object(fields);
        let player_response = find_player_response(SOURCE_NAME, &fields)?
            .map(|p| PlayerResponse::from_value(SOURCE_NAME, p))
            .transpose()?;

        let page_fields = fields.as_object_mut().map(|map| {
            map.remove("player_response");
            std::mem::take(map)
        });

        Ok(ResolutionState {
            page: Some(Page::VideoInfo),
            player_response,
            page_fields,
            ..Default::default()
        })
    }
}
