//! Extra formats advertised by the DASH and HLS manifests of a video.

use quick_xml::{Reader, events::Event};
use tracing::debug;

use super::{
    formats::Format,
    hls::{
        parser::parse_m3u8,
        types::M3u8Playlist,
        utils::itag_from_url,
    },
    utils::absolute_url,
};
use crate::common::{
    errors::{Error, Result},
    http::{HttpClient, RequestHeaders},
};

const DASH_SOURCE: &str = "dash_manifest";

/// Formats listed by a DASH MPD. Every representation points at the manifest
/// itself; the segment streamer resolves the media from it.
pub fn parse_dash_manifest(xml: &str, manifest_url: &str) -> Result<Vec<Format>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut formats: Vec<Format> = Vec::new();
    let mut set_mime: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = std::str::from_utf8(e.name().as_ref())
                    .unwrap_or("")
                    .to_string();
                let mut attrs: Vec<(String, String)> = Vec::new();
                for attr in e.attributes().flatten() {
                    let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                    let value = std::str::from_utf8(&attr.value).unwrap_or("");
                    attrs.push((key.to_string(), value.to_string()));
                }
                let get = |k: &str| {
                    attrs
                        .iter()
                        .find(|(key, _)| key == k)
                        .map(|(_, v)| v.as_str())
                };

                match name.as_str() {
                    "AdaptationSet" => set_mime = get("mimeType").map(str::to_string),
                    "Representation" => {
                        let Some(itag) = get("id").and_then(|id| id.parse::<u32>().ok()) else {
                            continue;
                        };
                        let mime = get("mimeType").or(set_mime.as_deref()).unwrap_or("");
                        let mut format = Format {
                            itag,
                            url: manifest_url.to_string(),
                            bitrate: get("bandwidth").and_then(|b| b.parse().ok()),
                            mime_type: Some(format!(
                                "{}; codecs=\"{}\"",
                                mime,
                                get("codecs").unwrap_or("")
                            )),
                            ..Format::default()
                        };
                        if let Some(height) = get("height").and_then(|h| h.parse().ok()) {
                            format.height = Some(height);
                            format.width = get("width").and_then(|w| w.parse().ok());
                            format.fps = get("frameRate").and_then(|f| f.parse().ok());
                        } else {
                            format.audio_sample_rate =
                                get("audioSamplingRate").and_then(|r| r.parse().ok());
                        }
                        match formats.iter_mut().find(|f| f.itag == itag) {
                            Some(existing) => *existing = format,
                            None => formats.push(format),
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::parse(
                    DASH_SOURCE,
                    "mpd",
                    format!("at position {}: {}", reader.buffer_position(), e),
                ));
            }
            _ => (),
        }
    }

    Ok(formats)
}

/// Formats listed by an HLS master playlist; variants whose URL carries no
/// itag are skipped.
pub fn parse_hls_manifest(text: &str, manifest_url: &str) -> Vec<Format> {
    let M3u8Playlist::Master { variants, .. } = parse_m3u8(text, manifest_url) else {
        return Vec::new();
    };

    variants
        .into_iter()
        .filter_map(|v| {
            let itag = itag_from_url(&v.url)?;
            Some(Format {
                itag,
                url: v.url,
                ..Format::default()
            })
        })
        .collect()
}

pub async fn get_dash_manifest(
    http: &dyn HttpClient,
    url: &str,
    headers: &RequestHeaders,
) -> Result<Vec<Format>> {
    let url = absolute_url(url);
    debug!("fetching dash manifest {}", url);
    let body = http.get_text(&url, headers).await?;
    parse_dash_manifest(&body, &url)
}

pub async fn get_hls_manifest(
    http: &dyn HttpClient,
    url: &str,
    headers: &RequestHeaders,
) -> Result<Vec<Format>> {
    let url = absolute_url(url);
    debug!("fetching hls manifest {}", url);
    let body = http.get_text(&url, headers).await?;
    Ok(parse_hls_manifest(&body, &url))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MPD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static">
  <Period>
    <AdaptationSet id="0" mimeType="audio/mp4" subsegmentAlignment="true">
      <Representation id="140" codecs="mp4a.40.2" audioSamplingRate="44100" bandwidth="144000">
        <BaseURL>https://r.example/140</BaseURL>
      </Representation>
    </AdaptationSet>
    <AdaptationSet id="1" mimeType="video/mp4">
      <Representation id="137" codecs="avc1.640028" width="1920" height="1080" frameRate="30" bandwidth="4500000"/>
      <Representation id="thumbs" codecs="jpeg" width="64" height="36" bandwidth="1"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn test_parse_dash_manifest() {
        let url = "https://manifest.example/api/manifest/dash/id/1";
        let formats = parse_dash_manifest(MPD, url).unwrap();
        assert_eq!(formats.len(), 2);

        let audio = &formats[0];
        assert_eq!(audio.itag, 140);
        assert_eq!(audio.url, url);
        assert_eq!(audio.bitrate, Some(144_000));
        assert_eq!(audio.mime_type.as_deref(), Some("audio/mp4; codecs=\"mp4a.40.2\""));
        assert_eq!(audio.audio_sample_rate, Some(44_100));
        assert_eq!(audio.height, None);

        let video = &formats[1];
        assert_eq!(video.itag, 137);
        assert_eq!(video.width, Some(1920));
        assert_eq!(video.height, Some(1080));
        assert_eq!(video.fps, Some(30));
    }

    #[test]
    fn test_malformed_dash_manifest() {
        let err = parse_dash_manifest("<MPD><Period></AdaptationSet></MPD>", "u").unwrap_err();
        assert_eq!(err.kind(), crate::common::errors::ErrorKind::Parse);
    }

    #[test]
    fn test_parse_hls_manifest() {
        let text = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=290000,CODECS=\"mp4a.40.5,avc1.42c00b\"
https://manifest.example/api/manifest/hls_playlist/id/x/itag/91/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1000,CODECS=\"mp4a.40.5\"
https://manifest.example/other/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1500000,CODECS=\"mp4a.40.2,avc1.4d401f\"
https://manifest.example/api/manifest/hls_playlist/id/x/itag/95/index.m3u8
";
        let formats = parse_hls_manifest(text, "https://manifest.example/api/manifest/hls_variant/x");
        let itags: Vec<u32> = formats.iter().map(|f| f.itag).collect();
        assert_eq!(itags, vec![91, 95]);
        assert!(formats[1].url.ends_with("/itag/95/index.m3u8"));
    }
}
