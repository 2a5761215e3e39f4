use super::{
    types::{ByteRange, M3u8Playlist, MediaPlaylist, Resource, Variant},
    utils::{extract_attr_str, extract_attr_u64, parse_byte_range, resolve_url},
};

const AUDIO_CODECS: &[&str] = &["mp4a", "opus", "aac"];
const VIDEO_CODECS: &[&str] = &[
    "avc1", "hvc1", "hev1", "dvh1", "vp09", "av01", "vp9", "av1", "vp8", "h264", "h265", "mp4v",
];

/// Small M3U8 parser covering the tags the origin's playlists use.
pub fn parse_m3u8(text: &str, base_url: &str) -> M3u8Playlist {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    // Decide master vs. media by presence of EXT-X-STREAM-INF.
    let is_master = lines.iter().any(|l| l.starts_with("#EXT-X-STREAM-INF"));

    if is_master {
        parse_master(&lines, base_url)
    } else {
        M3u8Playlist::Media(parse_media(&lines, base_url))
    }
}

fn parse_master(lines: &[&str], base_url: &str) -> M3u8Playlist {
    let mut variants = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("#EXT-X-STREAM-INF") {
            let bandwidth = extract_attr_u64(line, "BANDWIDTH").unwrap_or(0);
            let codecs = extract_attr_str(line, "CODECS").unwrap_or_default();

            let has_audio = AUDIO_CODECS.iter().any(|c| codecs.contains(c));
            let has_video = VIDEO_CODECS.iter().any(|c| codecs.contains(c));

            let mut j = i + 1;
            while j < lines.len() && lines[j].starts_with('#') {
                j += 1;
            }
            if j < lines.len() && !lines[j].is_empty() {
                variants.push(Variant {
                    url: resolve_url(base_url, lines[j]),
                    bandwidth,
                    codecs,
                    is_audio_only: has_audio && !has_video,
                });
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }

    M3u8Playlist::Master { variants }
}

fn parse_media(lines: &[&str], base_url: &str) -> MediaPlaylist {
    let mut playlist = MediaPlaylist::default();
    let mut next_offset = 0u64;
    let mut pending_range: Option<ByteRange> = None;
    let mut pending_duration: Option<f64> = None;

    for line in lines {
        if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            playlist.media_sequence = rest.trim().parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            playlist.target_duration = rest.trim().parse().ok();
        } else if line.starts_with("#EXT-X-ENDLIST") {
            playlist.ended = true;
        } else if line.starts_with("#EXT-X-MAP") {
            if let Some(url) = extract_attr_str(line, "URI").map(|u| resolve_url(base_url, &u)) {
                let range = extract_attr_str(line, "BYTERANGE").map(|r| parse_byte_range(&r, 0));
                playlist.map = Some(Resource {
                    url,
                    range,
                    duration: None,
                });
            }
        } else if let Some(rest) = line.strip_prefix("#EXT-X-BYTERANGE:") {
            let r = parse_byte_range(rest, next_offset);
            next_offset = r.offset + r.length;
            pending_range = Some(r);
        } else if let Some(rest) = line.strip_prefix("#EXTINF:") {
            // #EXTINF:<duration>,[title]
            pending_duration = rest.split(',').next().and_then(|d| d.trim().parse().ok());
        } else if !line.is_empty() && !line.starts_with('#') {
            playlist.segments.push(Resource {
                url: resolve_url(base_url, line),
                range: pending_range.take(),
                duration: pending_duration.take(),
            });
        }
    }
    playlist
}
