use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use crate::{
    cache::ExpiringCache,
    common::{
        errors::{Error, Result},
        http::{HttpClient, RequestHeaders},
        types::VideoId,
    },
    sources::youtube::utils::{BASE_URL, between},
};

/// Web client version sent when the watch page did not reveal one.
pub const DEFAULT_CLIENT_VERSION: &str = "2.20201203.06.00";

/// Key under which the identity token of cookie-less requests is cached.
pub const BROWSER_KEY: &str = "browser";

// Written without a backreference: either quote style around the key.
static ID_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:"ID_TOKEN"|'ID_TOKEN')[:,]\s?"([^"]+)""#).unwrap());

/// Everything the metadata sources share: the network, the page caches and
/// per-request settings.
pub struct SourceContext {
    pub http: Arc<dyn HttpClient>,
    pub watch_pages: ExpiringCache<String, String>,
    pub identity_tokens: ExpiringCache<String, Option<String>>,
    pub lang: String,
    /// Headers sent with every metadata request, cookie included.
    pub headers: RequestHeaders,
    pub cookie: Option<String>,
}

impl SourceContext {
    pub fn watch_html_url(&self, id: &VideoId) -> String {
        format!("{}{}&hl={}", BASE_URL, id, urlencoding::encode(&self.lang))
    }

    pub fn watch_json_url(&self, id: &VideoId) -> String {
        format!("{}&pbj=1", self.watch_html_url(id))
    }

    /// Body of the watch page, shared with every concurrent caller.
    pub async fn watch_page_body(&self, id: &VideoId) -> Result<String> {
        let url = self.watch_html_url(id);
        let http = self.http.clone();
        let headers = self.headers.clone();
        self.watch_pages
            .get_or_set(url.clone(), move || async move {
                debug!("fetching watch page {}", url);
                http.get_text(&url, &headers).await
            })
            .await
    }

    /// Client version advertised by a watch page fetched earlier, if any.
    pub fn client_version(&self, id: &VideoId) -> String {
        self.watch_pages
            .get(&self.watch_html_url(id))
            .and_then(|body| {
                between(&body, r#"{"key":"cver","value":""#, r#""}"#).map(str::to_string)
            })
            .unwrap_or_else(|| DEFAULT_CLIENT_VERSION.to_string())
    }

    /// Identity token for `key` (a cookie, or [`BROWSER_KEY`]), read from the
    /// watch page and cached for a day.
    pub async fn identity_token(
        self: &Arc<Self>,
        id: &VideoId,
        key: &str,
        required: bool,
    ) -> Result<Option<String>> {
        let ctx = self.clone();
        let id = id.clone();
        self.identity_tokens
            .get_or_set(key.to_string(), move || async move {
                let page = ctx.watch_page_body(&id).await?;
                let token = ID_TOKEN.captures(&page).map(|c| c[1].to_string());
                if token.is_none() && required {
                    return Err(Error::Unrecoverable(
                        "Cookie header used in request, but unable to find YouTube identity token"
                            .into(),
                    ));
                }
                Ok(token)
            })
            .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::HashMap,
        sync::Mutex,
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::common::http::HttpResponse;

    /// Serves canned bodies by URL prefix and records every request.
    #[derive(Default)]
    pub struct PageServer {
        pages: Vec<(String, String)>,
        pub requests: Mutex<Vec<(String, HashMap<String, String>)>>,
    }

    impl PageServer {
        pub fn with(mut self, prefix: &str, body: &str) -> Self {
            self.pages.push((prefix.to_string(), body.to_string()));
            self
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(url, _)| url.starts_with(prefix))
                .count()
        }
    }

    #[async_trait]
    impl HttpClient for PageServer {
        async fn get_text(&self, url: &str, headers: &RequestHeaders) -> Result<String> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), headers.iter().cloned().collect()));
            self.pages
                .iter()
                .find(|(prefix, _)| url.starts_with(prefix.as_str()))
                .map(|(_, body)| body.clone())
                .ok_or_else(|| Error::Status {
                    status: 404,
                    url: url.to_string(),
                })
        }

        async fn get_stream(&self, url: &str, _headers: &RequestHeaders) -> Result<HttpResponse> {
            Err(Error::Unsupported(url.to_string()))
        }
    }

    pub fn context(server: Arc<PageServer>, cookie: Option<&str>) -> Arc<SourceContext> {
        let mut headers = RequestHeaders::new();
        if let Some(cookie) = cookie {
            headers.push(("cookie".into(), cookie.into()));
        }
        Arc::new(SourceContext {
            http: server,
            watch_pages: ExpiringCache::new(Duration::from_secs(1)),
            identity_tokens: ExpiringCache::new(Duration::from_secs(60)),
            lang: "en".into(),
            headers,
            cookie: cookie.map(str::to_string),
        })
    }
}
