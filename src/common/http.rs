use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::errors::{Error, Result};
use crate::configs::HttpProxyConfig;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/87.0.4280.101 Safari/537.36";

/// Headers attached to a single request, in insertion order.
pub type RequestHeaders = Vec<(String, String)>;

/// An open response whose body has not been consumed yet.
pub struct HttpResponse {
    pub status: u16,
    pub url: String,
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes>>,
}

/// Network collaborator used by every component that talks to the origin.
///
/// Implementations must map non-success statuses to [`Error::Status`] and
/// redirect exhaustion to [`Error::TooManyRedirects`], so that retry code can
/// classify failures without inspecting messages. Dropping an
/// [`HttpResponse`] body aborts the underlying connection.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get_text(&self, url: &str, headers: &RequestHeaders) -> Result<String>;

    async fn get_stream(&self, url: &str, headers: &RequestHeaders) -> Result<HttpResponse>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn header_map(headers: &RequestHeaders) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (k, v) in headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| Error::InvalidInput(format!("invalid header name {k}: {e}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| Error::InvalidInput(format!("invalid header value for {k}: {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    async fn send(&self, url: &str, headers: &RequestHeaders) -> Result<reqwest::Response> {
        let res = self
            .client
            .get(url)
            .headers(Self::header_map(headers)?)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(res)
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get_text(&self, url: &str, headers: &RequestHeaders) -> Result<String> {
        let res = self.send(url, headers).await?;
        Ok(res.text().await?)
    }

    async fn get_stream(&self, url: &str, headers: &RequestHeaders) -> Result<HttpResponse> {
        let res = self.send(url, headers).await?;
        let status = res.status().as_u16();
        let final_url = res.url().to_string();
        let content_length = res.content_length();
        let body = res.bytes_stream().map(|r| r.map_err(Error::from)).boxed();

        Ok(HttpResponse {
            status,
            url: final_url,
            content_length,
            body,
        })
    }
}

/// Build a `reqwest::Client` for talking to the origin.
///
/// No total request timeout is set: media bodies can legitimately stream for
/// a long time. Only the connect phase is bounded.
pub fn create_client(
    user_agent: &str,
    proxy: Option<&HttpProxyConfig>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .tcp_nodelay(true)
        .tcp_keepalive(Duration::from_secs(25))
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Duration::from_secs(70))
        .redirect(reqwest::redirect::Policy::limited(10));

    if let Some(proxy_config) = proxy {
        if let Some(p_url) = &proxy_config.url {
            match reqwest::Proxy::all(p_url) {
                Ok(mut proxy_obj) => {
                    if let (Some(u), Some(p)) = (&proxy_config.username, &proxy_config.password) {
                        proxy_obj = proxy_obj.basic_auth(u, p);
                    }
                    builder = builder.proxy(proxy_obj);
                }
                Err(e) => {
                    tracing::warn!("Failed to parse proxy URL '{}': {}, proxy will be ignored", p_url, e);
                }
            }
        }
    }

    Ok(builder.build()?)
}
