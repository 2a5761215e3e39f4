use super::{
  parser::parse_m3u8,
  types::{M3u8Playlist, MediaPlaylist, Variant},
  utils::itag_from_url,
};
use crate::common::{
  errors::{Error, Result},
  http::{HttpClient, RequestHeaders},
};

// A master playlist may only point at media playlists.
const MAX_DEPTH: usize = 2;

/// Fetches `url` and follows a master playlist down to a media playlist.
///
/// Returns the media playlist together with the URL it was read from, so
/// later reloads skip the master.
pub async fn resolve_playlist(
  http: &dyn HttpClient,
  url: &str,
  itag: Option<u32>,
  headers: &RequestHeaders,
) -> Result<(String, MediaPlaylist)> {
  let mut url = url.to_string();

  for _ in 0..MAX_DEPTH {
    let text = fetch_text(http, &url, headers).await?;
    match parse_m3u8(&text, &url) {
      M3u8Playlist::Media(playlist) => return Ok((url, playlist)),
      M3u8Playlist::Master { variants } => {
        let best = select_variant(&variants, itag)
          .ok_or_else(|| Error::parse("hls", "master playlist", "no variants"))?;
        tracing::debug!(
          "HLS: selected variant bw={} codecs={:?} audio_only={} url={}",
          best.bandwidth,
          best.codecs,
          best.is_audio_only,
          best.url
        );
        url = best.url.clone();
      }
    }
  }

  Err(Error::parse("hls", "master playlist", format!("nested too deeply: {}", url)))
}

/// The variant carrying `itag`, else the one with the highest bandwidth.
fn select_variant(variants: &[Variant], itag: Option<u32>) -> Option<&Variant> {
  itag
    .and_then(|itag| variants.iter().find(|v| itag_from_url(&v.url) == Some(itag)))
    .or_else(|| variants.iter().max_by_key(|v| v.bandwidth))
}

pub async fn fetch_text(http: &dyn HttpClient, url: &str, headers: &RequestHeaders) -> Result<String> {
  let mut headers = headers.clone();
  headers.push(("Accept".into(), "application/x-mpegURL, */*".into()));
  http.get_text(url, &headers).await
}
