use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::common::{BROWSER_KEY, SourceContext};
use crate::{
    common::{
        errors::{Error, Result},
        types::VideoId,
    },
    sources::youtube::{
        pipeline::InfoSource,
        state::{Page, PlayerResponse, ResolutionState},
        utils::{find_player_response, parse_json},
    },
};

const SOURCE_NAME: &str = "watch.json";
const CLIENT_NAME: &str = "1";

/// Reads the JSON variant of the watch page (`&pbj=1`).
pub struct WatchJsonSource {
    ctx: Arc<SourceContext>,
}

impl WatchJsonSource {
    pub fn new(ctx: Arc<SourceContext>) -> Self {
        Self { ctx }
    }

    fn has_header(headers: &[(String, String)], name: &str) -> bool {
        headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// Folds the response parts into one object; earlier parts win.
fn merge_parts(parts: Vec<Value>) -> Map<String, Value> {
    let mut merged = Map::new();
    for part in parts {
        if let Value::Object(fields) = part {
            for (key, value) in fields {
                merged.entry(key).or_insert(value);
            }
        }
    }
    merged
}

#[async_trait]
impl InfoSource for WatchJsonSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, id: &VideoId, _state: &ResolutionState) -> Result<ResolutionState> {
        let ctx = &self.ctx;
        let cookie_key = ctx.cookie.clone().unwrap_or_else(|| BROWSER_KEY.to_string());

        let mut token = ctx.identity_tokens.get(&cookie_key).flatten();
        if token.is_none() {
            if let Some(cookie) = &ctx.cookie {
                token = ctx.identity_token(id, cookie, true).await?;
            }
        }

        let mut headers = ctx.headers.clone();
        let defaults = [
            ("x-youtube-client-name", CLIENT_NAME.to_string()),
            ("x-youtube-client-version", ctx.client_version(id)),
            ("x-youtube-identity-token", token.clone().unwrap_or_default()),
        ];
        for (name, value) in defaults {
            if !Self::has_header(&headers, name) {
                headers.push((name.to_string(), value));
            }
        }

        let url = ctx.watch_json_url(id);
        let body = ctx.http.get_text(&url, &headers).await?;
        let parsed = parse_json(SOURCE_NAME, "body", &body)?;

        let reload = parsed.get("reload").and_then(Value::as_str) == Some("now");
        if reload && token.is_none() {
            // Prime the token so the retry carries it.
            ctx.identity_token(id, BROWSER_KEY, false).await?;
        }
        let parts = match parsed {
            Value::Array(parts) if !reload => parts,
            _ => {
                debug!("{} asked for a reload", SOURCE_NAME);
                return Err(Error::parse(
                    SOURCE_NAME,
                    "body",
                    "Unable to retrieve video metadata in watch.json",
                ));
            }
        };

        let info = Value::Object(merge_parts(parts));
        let player_response = find_player_response(SOURCE_NAME, &info)?
            .map(|p| PlayerResponse::from_value(SOURCE_NAME, p))
            .transpose()?;
        let html5player = info
            .pointer("/player/assets/js")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(ResolutionState {
            page: Some(Page::Watch),
            player_response,
            response: info.get("response").cloned(),
            html5player,
            page_fields: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::sources::youtube::{clients::common::testing::*, utils::BASE_URL};

    fn id() -> VideoId {
        VideoId::new_unchecked("aaaaaaaaaaa")
    }

    #[test]
    fn test_merge_parts_keeps_first() {
        let merged = merge_parts(vec![
            json!({ "page": "watch", "player": { "a": 1 } }),
            json!({ "player": { "a": 2 }, "response": {} }),
            json!("not an object"),
        ]);
        assert_eq!(merged["player"]["a"], 1);
        assert!(merged.contains_key("response"));
    }

    #[tokio::test]
    async fn test_reads_parts() {
        let body = r#")]}'
[{"page":"watch"},{"player":{"assets":{"js":"/s/player/9/base.js"}},"playerResponse":{"playabilityStatus":{"status":"OK"}}},{"response":{"x":1}}]"#;
        let json_url = format!("{}aaaaaaaaaaa&hl=en&pbj=1", BASE_URL);
        let server = Arc::new(PageServer::default().with(&json_url, body));
        let source = WatchJsonSource::new(context(server.clone(), None));

        let state = source.fetch(&id(), &ResolutionState::default()).await.unwrap();
        assert_eq!(state.status(), "OK");
        assert_eq!(state.html5player.as_deref(), Some("/s/player/9/base.js"));
        assert_eq!(state.response.unwrap()["x"], 1);

        let requests = server.requests.lock().unwrap();
        let (_, headers) = &requests[0];
        assert_eq!(headers["x-youtube-client-name"], "1");
        assert_eq!(headers["x-youtube-identity-token"], "");
    }

    #[tokio::test]
    async fn test_reload_primes_identity_token() {
        let json_url = format!("{}aaaaaaaaaaa&hl=en&pbj=1", BASE_URL);
        let server = Arc::new(
            PageServer::default()
                .with(&json_url, r#"{"reload":"now"}"#)
                .with(BASE_URL, r#"{"ID_TOKEN":"abc"}"#),
        );
        let ctx = context(server, None);
        let source = WatchJsonSource::new(ctx.clone());

        let err = source.fetch(&id(), &ResolutionState::default()).await.unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert_eq!(
            ctx.identity_tokens.get(&BROWSER_KEY.to_string()),
            Some(Some("abc".to_string()))
        );
    }

    #[tokio::test]
    async fn test_cookie_requires_identity_token() {
        let server = Arc::new(PageServer::default().with(BASE_URL, "<html></html>"));
        let source = WatchJsonSource::new(context(server, Some("SID=1")));
        let err = source.fetch(&id(), &ResolutionState::default()).await.unwrap_err();
        assert!(err.is_unrecoverable());
    }
}
