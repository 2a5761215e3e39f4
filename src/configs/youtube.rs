use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::common::http::DEFAULT_USER_AGENT;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YouTubeConfig {
    /// Interface language requested from the origin (`hl` parameter).
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Size of each ranged sub-request for single-track formats. `0` disables
    /// chunking.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Number of body chunks buffered between the download task and the reader.
    #[serde(default = "default_buffered_chunks")]
    pub buffered_chunks: usize,
    #[serde(default = "default_info_cache_ttl_ms")]
    pub info_cache_ttl_ms: u64,
    #[serde(default = "default_cookie_cache_ttl_ms")]
    pub cookie_cache_ttl_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub download_retry: DownloadRetryConfig,
    /// Extra headers sent with every metadata request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub cookie: Option<String>,
    pub proxy: Option<HttpProxyConfig>,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            lang: default_lang(),
            user_agent: default_user_agent(),
            chunk_size: default_chunk_size(),
            buffered_chunks: default_buffered_chunks(),
            info_cache_ttl_ms: default_info_cache_ttl_ms(),
            cookie_cache_ttl_ms: default_cookie_cache_ttl_ms(),
            retry: RetryConfig::default(),
            download_retry: DownloadRetryConfig::default(),
            headers: HashMap::new(),
            cookie: None,
            proxy: None,
        }
    }
}

impl YouTubeConfig {
    pub fn info_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.info_cache_ttl_ms)
    }

    pub fn cookie_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cookie_cache_ttl_ms)
    }
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_chunk_size() -> u64 {
    10 * 1024 * 1024
}

fn default_buffered_chunks() -> usize {
    32
}

fn default_info_cache_ttl_ms() -> u64 {
    1_000
}

fn default_cookie_cache_ttl_ms() -> u64 {
    24 * 60 * 60 * 1_000
}

/// Retry policy for metadata sources.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_inc_ms")]
    pub backoff_inc_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_inc_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_inc_ms: default_backoff_inc_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// Retry policy for media requests issued by the downloader.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct DownloadRetryConfig {
    /// Attempts to re-issue a request that failed before its first byte.
    #[serde(default = "default_dl_max_retries")]
    pub max_retries: u32,
    /// Attempts to resume a body interrupted mid-transfer.
    #[serde(default = "default_dl_max_reconnects")]
    pub max_reconnects: u32,
    #[serde(default = "default_dl_backoff_inc_ms")]
    pub backoff_inc_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_dl_max_retries() -> u32 {
    3
}

fn default_dl_max_reconnects() -> u32 {
    6
}

fn default_dl_backoff_inc_ms() -> u64 {
    500
}

impl Default for DownloadRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_dl_max_retries(),
            max_reconnects: default_dl_max_reconnects(),
            backoff_inc_ms: default_dl_backoff_inc_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct HttpProxyConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}
