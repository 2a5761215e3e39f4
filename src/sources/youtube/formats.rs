use std::{
    cmp::Ordering,
    fmt,
    str::FromStr,
    sync::{Arc, LazyLock},
};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use super::utils::between;
use crate::common::{
    errors::{Error, Result},
    types::{Container, Itag},
};

static IS_LIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bsource[/=]yt_live_broadcast\b").unwrap());
static IS_HLS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/manifest/hls_(variant|playlist)/").unwrap());
static IS_DASH_MPD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/manifest/dash/").unwrap());

/// Numbers arrive either as JSON numbers or as decimal strings.
mod lenient {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(u64),
        Float(f64),
        Str(String),
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Ok(match Option::<Number>::deserialize(d)? {
            Some(Number::Int(n)) => Some(n),
            Some(Number::Float(f)) if f >= 0.0 => Some(f as u64),
            Some(Number::Str(s)) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn opt_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        Ok(opt_u64(d)?.and_then(|n| u32::try_from(n).ok()))
    }
}

fn de_itag<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u32, D::Error> {
    Ok(lenient::opt_u32(d)?.unwrap_or_default())
}

/// Describes one retrievable stream of a video.
///
/// Deserialized from the origin's `formats`/`adaptiveFormats` entries; the
/// derived fields are filled in by [`add_format_meta`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Format {
    #[serde(deserialize_with = "de_itag")]
    pub itag: u32,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_cipher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
    pub mime_type: Option<String>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub bitrate: Option<u64>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub audio_bitrate: Option<u64>,
    #[serde(deserialize_with = "lenient::opt_u32")]
    pub width: Option<u32>,
    #[serde(deserialize_with = "lenient::opt_u32")]
    pub height: Option<u32>,
    #[serde(deserialize_with = "lenient::opt_u32")]
    pub fps: Option<u32>,
    pub quality: Option<String>,
    pub quality_label: Option<String>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub content_length: Option<u64>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub approx_duration_ms: Option<u64>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub average_bitrate: Option<u64>,
    pub audio_quality: Option<String>,
    #[serde(deserialize_with = "lenient::opt_u64")]
    pub audio_sample_rate: Option<u64>,
    #[serde(deserialize_with = "lenient::opt_u32")]
    pub audio_channels: Option<u32>,

    pub container: Option<Container>,
    pub codecs: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub has_video: bool,
    pub has_audio: bool,
    pub is_live: bool,
    #[serde(rename = "isHLS")]
    pub is_hls: bool,
    #[serde(rename = "isDashMPD")]
    pub is_dash_mpd: bool,
}

impl Format {
    pub fn itag(&self) -> Itag {
        Itag(self.itag)
    }

    pub fn has_audio_and_video(&self) -> bool {
        self.has_audio && self.has_video
    }

    /// Leading number of the quality label, e.g. `1080` for `1080p60`.
    pub fn quality_number(&self) -> i64 {
        self.quality_label
            .as_deref()
            .map(|l| l.chars().take_while(char::is_ascii_digit).collect::<String>())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }
}

/// Static facts about a known itag, used when the origin omits them.
struct ItagMeta {
    itag: u32,
    mime_type: &'static str,
    quality_label: Option<&'static str>,
    bitrate: Option<u64>,
    audio_bitrate: Option<u64>,
}

const fn meta(
    itag: u32,
    mime_type: &'static str,
    quality_label: Option<&'static str>,
    bitrate: Option<u64>,
    audio_bitrate: Option<u64>,
) -> ItagMeta {
    ItagMeta {
        itag,
        mime_type,
        quality_label,
        bitrate,
        audio_bitrate,
    }
}

#[rustfmt::skip]
static ITAGS: &[ItagMeta] = &[
    meta(5, r#"video/flv; codecs="Sorenson H.283, mp3""#, Some("240p"), Some(250_000), Some(64)),
    meta(6, r#"video/flv; codecs="Sorenson H.263, mp3""#, Some("270p"), Some(800_000), Some(64)),
    meta(13, r#"video/3gp; codecs="MPEG-4 Visual, aac""#, None, Some(500_000), None),
    meta(17, r#"video/3gp; codecs="MPEG-4 Visual, aac""#, Some("144p"), Some(50_000), Some(24)),
    meta(18, r#"video/mp4; codecs="H.264, aac""#, Some("360p"), Some(500_000), Some(96)),
    meta(22, r#"video/mp4; codecs="H.264, aac""#, Some("720p"), Some(2_000_000), Some(192)),
    meta(34, r#"video/flv; codecs="H.264, aac""#, Some("360p"), Some(500_000), Some(128)),
    meta(35, r#"video/flv; codecs="H.264, aac""#, Some("480p"), Some(800_000), Some(128)),
    meta(36, r#"video/3gp; codecs="MPEG-4 Visual, aac""#, Some("240p"), Some(175_000), Some(32)),
    meta(37, r#"video/mp4; codecs="H.264, aac""#, Some("1080p"), Some(3_000_000), Some(192)),
    meta(38, r#"video/mp4; codecs="H.264, aac""#, Some("3072p"), Some(3_500_000), Some(192)),
    meta(43, r#"video/webm; codecs="VP8, vorbis""#, Some("360p"), Some(500_000), Some(128)),
    meta(44, r#"video/webm; codecs="VP8, vorbis""#, Some("480p"), Some(1_000_000), Some(128)),
    meta(45, r#"video/webm; codecs="VP8, vorbis""#, Some("720p"), Some(2_000_000), Some(192)),
    meta(46, r#"video/webm; codecs="vp8, vorbis""#, Some("1080p"), None, Some(192)),
    meta(82, r#"video/mp4; codecs="H.264, aac""#, Some("360p"), Some(500_000), Some(96)),
    meta(83, r#"video/mp4; codecs="H.264, aac""#, Some("240p"), Some(500_000), Some(96)),
    meta(84, r#"video/mp4; codecs="H.264, aac""#, Some("720p"), Some(2_000_000), Some(192)),
    meta(85, r#"video/mp4; codecs="H.264, aac""#, Some("1080p"), Some(3_000_000), Some(192)),
    meta(91, r#"video/ts; codecs="H.264, aac""#, Some("144p"), Some(100_000), Some(48)),
    meta(92, r#"video/ts; codecs="H.264, aac""#, Some("240p"), Some(150_000), Some(48)),
    meta(93, r#"video/ts; codecs="H.264, aac""#, Some("360p"), Some(500_000), Some(128)),
    meta(94, r#"video/ts; codecs="H.264, aac""#, Some("480p"), Some(800_000), Some(128)),
    meta(95, r#"video/ts; codecs="H.264, aac""#, Some("720p"), Some(1_500_000), Some(256)),
    meta(96, r#"video/ts; codecs="H.264, aac""#, Some("1080p"), Some(2_500_000), Some(256)),
    meta(100, r#"video/webm; codecs="VP8, vorbis""#, Some("360p"), None, Some(128)),
    meta(101, r#"video/webm; codecs="VP8, vorbis""#, Some("360p"), None, Some(192)),
    meta(102, r#"video/webm; codecs="VP8, vorbis""#, Some("720p"), None, Some(192)),
    meta(120, r#"video/flv; codecs="H.264, aac""#, Some("720p"), Some(2_000_000), Some(128)),
    meta(127, r#"audio/ts; codecs="aac""#, None, None, Some(96)),
    meta(128, r#"audio/ts; codecs="aac""#, None, None, Some(96)),
    meta(132, r#"video/ts; codecs="H.264, aac""#, Some("240p"), Some(150_000), Some(48)),
    meta(133, r#"video/mp4; codecs="H.264""#, Some("240p"), Some(300_000), None),
    meta(134, r#"video/mp4; codecs="H.264""#, Some("360p"), Some(400_000), None),
    meta(135, r#"video/mp4; codecs="H.264""#, Some("480p"), Some(1_000_000), None),
    meta(136, r#"video/mp4; codecs="H.264""#, Some("720p"), Some(1_000_000), None),
    meta(137, r#"video/mp4; codecs="H.264""#, Some("1080p"), Some(2_500_000), None),
    meta(138, r#"video/mp4; codecs="H.264""#, Some("4320p"), Some(13_500_000), None),
    meta(139, r#"audio/mp4; codecs="aac""#, None, None, Some(48)),
    meta(140, r#"audio/m4a; codecs="aac""#, None, None, Some(128)),
    meta(141, r#"audio/mp4; codecs="aac""#, None, None, Some(256)),
    meta(151, r#"video/ts; codecs="H.264, aac""#, Some("720p"), Some(50_000), Some(24)),
    meta(160, r#"video/mp4; codecs="H.264""#, Some("144p"), Some(100_000), None),
    meta(171, r#"audio/webm; codecs="vorbis""#, None, None, Some(128)),
    meta(172, r#"audio/webm; codecs="vorbis""#, None, None, Some(192)),
    meta(242, r#"video/webm; codecs="VP9""#, Some("240p"), Some(100_000), None),
    meta(243, r#"video/webm; codecs="VP9""#, Some("360p"), Some(250_000), None),
    meta(244, r#"video/webm; codecs="VP9""#, Some("480p"), Some(500_000), None),
    meta(247, r#"video/webm; codecs="VP9""#, Some("720p"), Some(700_000), None),
    meta(248, r#"video/webm; codecs="VP9""#, Some("1080p"), Some(1_500_000), None),
    meta(249, r#"audio/webm; codecs="opus""#, None, None, Some(48)),
    meta(250, r#"audio/webm; codecs="opus""#, None, None, Some(64)),
    meta(251, r#"audio/webm; codecs="opus""#, None, None, Some(160)),
    meta(264, r#"video/mp4; codecs="H.264""#, Some("1440p"), Some(4_000_000), None),
    meta(266, r#"video/mp4; codecs="H.264""#, Some("2160p"), Some(12_500_000), None),
    meta(271, r#"video/webm; codecs="VP9""#, Some("1440p"), Some(9_000_000), None),
    meta(272, r#"video/webm; codecs="VP9""#, Some("4320p"), Some(20_000_000), None),
    meta(278, r#"video/webm; codecs="VP9""#, Some("144p"), Some(80_000), None),
    meta(298, r#"video/mp4; codecs="H.264""#, Some("720p"), Some(3_000_000), None),
    meta(299, r#"video/mp4; codecs="H.264""#, Some("1080p"), Some(5_500_000), None),
    meta(300, r#"video/ts; codecs="H.264, aac""#, Some("720p"), Some(1_318_000), Some(48)),
    meta(301, r#"video/ts; codecs="H.264, aac""#, Some("1080p"), Some(3_000_000), Some(128)),
    meta(302, r#"video/webm; codecs="VP9""#, Some("720p HFR"), Some(2_500_000), None),
    meta(303, r#"video/webm; codecs="VP9""#, Some("1080p HFR"), Some(5_000_000), None),
    meta(308, r#"video/webm; codecs="VP9""#, Some("1440p HFR"), Some(10_000_000), None),
    meta(313, r#"video/webm; codecs="VP9""#, Some("2160p"), Some(13_000_000), None),
    meta(315, r#"video/webm; codecs="VP9""#, Some("2160p HFR"), Some(20_000_000), None),
    meta(330, r#"video/webm; codecs="VP9""#, Some("144p HDR, HFR"), Some(80_000), None),
    meta(331, r#"video/webm; codecs="VP9""#, Some("240p HDR, HFR"), Some(100_000), None),
    meta(332, r#"video/webm; codecs="VP9""#, Some("360p HDR, HFR"), Some(250_000), None),
    meta(333, r#"video/webm; codecs="VP9""#, Some("240p HDR, HFR"), Some(500_000), None),
    meta(334, r#"video/webm; codecs="VP9""#, Some("720p HDR, HFR"), Some(1_000_000), None),
    meta(335, r#"video/webm; codecs="VP9""#, Some("1080p HDR, HFR"), Some(1_500_000), None),
    meta(336, r#"video/webm; codecs="VP9""#, Some("1440p HDR, HFR"), Some(5_000_000), None),
    meta(337, r#"video/webm; codecs="VP9""#, Some("2160p HDR, HFR"), Some(12_000_000), None),
];

fn itag_meta(itag: u32) -> Option<&'static ItagMeta> {
    ITAGS.iter().find(|m| m.itag == itag)
}

/// Fills gaps from the itag table and computes every derived field.
pub fn add_format_meta(mut format: Format) -> Format {
    if let Some(meta) = itag_meta(format.itag) {
        if format.mime_type.is_none() {
            format.mime_type = Some(meta.mime_type.to_string());
        }
        if format.quality_label.is_none() {
            format.quality_label = meta.quality_label.map(str::to_string);
        }
        if format.bitrate.is_none() {
            format.bitrate = meta.bitrate;
        }
        if format.audio_bitrate.is_none() {
            format.audio_bitrate = meta.audio_bitrate;
        }
    }

    format.has_video = format.quality_label.is_some();
    format.has_audio = format.audio_bitrate.is_some();

    if let Some(mime) = format.mime_type.as_deref() {
        format.container = Some(Container::from_mime(mime));
        format.codecs = between(mime, "codecs=\"", "\"").map(str::to_string);
    }

    let codecs: Vec<String> = format
        .codecs
        .as_deref()
        .map(|c| c.split(", ").map(str::to_string).collect())
        .unwrap_or_default();
    format.video_codec = if format.has_video {
        codecs.first().cloned()
    } else {
        None
    };
    format.audio_codec = if format.has_audio {
        codecs.last().cloned()
    } else {
        None
    };

    format.is_live = IS_LIVE.is_match(&format.url);
    format.is_hls = IS_HLS.is_match(&format.url);
    format.is_dash_mpd = IS_DASH_MPD.is_match(&format.url);
    format
}

/// Codec preference, worst first.
const AUDIO_ENCODING_RANKS: &[&str] = &["mp4a", "mp3", "vorbis", "aac", "opus", "flac"];
const VIDEO_ENCODING_RANKS: &[&str] = &[
    "mp4v",
    "avc1",
    "Sorenson H.283",
    "MPEG-4 Visual",
    "VP8",
    "VP9",
    "H.264",
];

fn encoding_rank(codec: Option<&str>, ranks: &[&str]) -> i64 {
    codec
        .and_then(|c| ranks.iter().position(|enc| c.contains(enc)))
        .map(|p| p as i64)
        .unwrap_or(-1)
}

fn video_bitrate(f: &Format) -> i64 {
    if f.has_video {
        f.bitrate.unwrap_or(0) as i64
    } else {
        0
    }
}

fn audio_bitrate(f: &Format) -> i64 {
    f.audio_bitrate.unwrap_or(0) as i64
}

// Both ranks search the whole codecs string, so a muxed format ranks on
// either of its tracks.
fn video_encoding_rank(f: &Format) -> i64 {
    encoding_rank(f.codecs.as_deref(), VIDEO_ENCODING_RANKS)
}

fn audio_encoding_rank(f: &Format) -> i64 {
    encoding_rank(f.codecs.as_deref(), AUDIO_ENCODING_RANKS)
}

type SortKey = fn(&Format) -> i64;

/// Compares with every key in turn, higher values first.
fn compare_by(a: &Format, b: &Format, keys: &[SortKey]) -> Ordering {
    keys.iter()
        .map(|key| key(b).cmp(&key(a)))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

const VIDEO_KEYS: &[SortKey] = &[
    Format::quality_number,
    video_bitrate,
    video_encoding_rank,
];

const AUDIO_KEYS: &[SortKey] = &[audio_bitrate, audio_encoding_rank];

fn is_hls(f: &Format) -> i64 {
    f.is_hls as i64
}

fn is_dash_mpd(f: &Format) -> i64 {
    f.is_dash_mpd as i64
}

fn has_content_length(f: &Format) -> i64 {
    (f.content_length.unwrap_or(0) > 0) as i64
}

fn has_audio_and_video(f: &Format) -> i64 {
    f.has_audio_and_video() as i64
}

fn has_video(f: &Format) -> i64 {
    f.has_video as i64
}

const ALL_KEYS: &[SortKey] = &[
    is_hls,
    is_dash_mpd,
    has_content_length,
    has_audio_and_video,
    has_video,
    Format::quality_number,
    video_bitrate,
    audio_bitrate,
    video_encoding_rank,
    audio_encoding_rank,
];

pub fn compare_formats(a: &Format, b: &Format) -> Ordering {
    compare_by(a, b, ALL_KEYS)
}

/// Sorts best first.
pub fn sort_formats(formats: &mut [Format]) {
    formats.sort_by(compare_formats);
}

fn compare_video(a: &Format, b: &Format) -> Ordering {
    compare_by(a, b, VIDEO_KEYS)
}

fn compare_audio(a: &Format, b: &Format) -> Ordering {
    compare_by(a, b, AUDIO_KEYS)
}

/// Requested stream quality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Quality {
    #[default]
    Highest,
    Lowest,
    HighestAudio,
    LowestAudio,
    HighestVideo,
    LowestVideo,
    Itag(Itag),
    /// First itag of the list that exists.
    Itags(Vec<Itag>),
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Highest => write!(f, "highest"),
            Quality::Lowest => write!(f, "lowest"),
            Quality::HighestAudio => write!(f, "highestaudio"),
            Quality::LowestAudio => write!(f, "lowestaudio"),
            Quality::HighestVideo => write!(f, "highestvideo"),
            Quality::LowestVideo => write!(f, "lowestvideo"),
            Quality::Itag(itag) => write!(f, "{}", itag),
            Quality::Itags(itags) => {
                let list: Vec<String> = itags.iter().map(Itag::to_string).collect();
                write!(f, "{}", list.join(","))
            }
        }
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Ok(match s.to_lowercase().as_str() {
            "highest" => Quality::Highest,
            "lowest" => Quality::Lowest,
            "highestaudio" => Quality::HighestAudio,
            "lowestaudio" => Quality::LowestAudio,
            "highestvideo" => Quality::HighestVideo,
            "lowestvideo" => Quality::LowestVideo,
            other => {
                let itags = other
                    .split(',')
                    .map(|p| p.trim().parse::<u32>().map(Itag))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|_| Error::InvalidInput(format!("unknown quality: {}", s)))?;
                match itags.as_slice() {
                    [single] => Quality::Itag(*single),
                    _ => Quality::Itags(itags),
                }
            }
        })
    }
}

pub type FormatPredicate = Arc<dyn Fn(&Format) -> bool + Send + Sync>;

/// Restricts the candidate set before a quality is chosen.
#[derive(Clone)]
pub enum Filter {
    AudioAndVideo,
    Video,
    VideoOnly,
    Audio,
    AudioOnly,
    Custom(FormatPredicate),
}

impl Filter {
    pub fn custom(f: impl Fn(&Format) -> bool + Send + Sync + 'static) -> Self {
        Filter::Custom(Arc::new(f))
    }

    pub fn matches(&self, f: &Format) -> bool {
        match self {
            Filter::AudioAndVideo => f.has_video && f.has_audio,
            Filter::Video => f.has_video,
            Filter::VideoOnly => f.has_video && !f.has_audio,
            Filter::Audio => f.has_audio,
            Filter::AudioOnly => !f.has_video && f.has_audio,
            Filter::Custom(predicate) => predicate(f),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::AudioAndVideo => write!(f, "AudioAndVideo"),
            Filter::Video => write!(f, "Video"),
            Filter::VideoOnly => write!(f, "VideoOnly"),
            Filter::Audio => write!(f, "Audio"),
            Filter::AudioOnly => write!(f, "AudioOnly"),
            Filter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "audioandvideo" | "videoandaudio" => Ok(Filter::AudioAndVideo),
            "video" => Ok(Filter::Video),
            "videoonly" => Ok(Filter::VideoOnly),
            "audio" => Ok(Filter::Audio),
            "audioonly" => Ok(Filter::AudioOnly),
            _ => Err(Error::InvalidInput(format!(
                "Given filter ({}) is not supported",
                s
            ))),
        }
    }
}

/// Keeps formats that have a URL and pass `filter`.
pub fn filter_formats(formats: &[Format], filter: Option<&Filter>) -> Vec<Format> {
    formats
        .iter()
        .filter(|f| !f.url.is_empty())
        .filter(|f| filter.is_none_or(|flt| flt.matches(f)))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ChooseFormatOptions {
    pub quality: Quality,
    pub filter: Option<Filter>,
    /// A format picked ahead of time; bypasses selection.
    pub format: Option<Format>,
}

/// Picks one format according to `options`.
pub fn choose_format(formats: &[Format], options: &ChooseFormatOptions) -> Result<Format> {
    if let Some(format) = &options.format {
        if format.url.is_empty() {
            return Err(Error::InvalidInput(
                "Invalid format given, did you use `get_info`?".into(),
            ));
        }
        return Ok(format.clone());
    }

    let mut candidates = filter_formats(formats, options.filter.as_ref());
    // Live streams are only downloadable through their HLS playlists.
    if candidates.iter().any(|f| f.is_hls) {
        candidates.retain(|f| f.is_hls || !f.is_live);
    }

    let format = match &options.quality {
        Quality::Highest => candidates.into_iter().min_by(compare_formats),
        Quality::Lowest => candidates.into_iter().max_by(compare_formats),
        Quality::HighestAudio => {
            let mut audio = filter_formats(&candidates, Some(&Filter::Audio));
            audio.sort_by(compare_audio);
            let best = audio.first().cloned();
            // Among equally good audio tracks, take the one with the least video.
            audio
                .into_iter()
                .filter(|f| best.as_ref().is_some_and(|b| compare_audio(b, f).is_eq()))
                .min_by_key(Format::quality_number)
        }
        Quality::LowestAudio => {
            let mut audio = filter_formats(&candidates, Some(&Filter::Audio));
            audio.sort_by(compare_audio);
            audio.pop()
        }
        Quality::HighestVideo => {
            let mut video = filter_formats(&candidates, Some(&Filter::Video));
            video.sort_by(compare_video);
            let best = video.first().cloned();
            video
                .into_iter()
                .filter(|f| best.as_ref().is_some_and(|b| compare_video(b, f).is_eq()))
                .min_by_key(|f| f.audio_bitrate.unwrap_or(0))
        }
        Quality::LowestVideo => {
            let mut video = filter_formats(&candidates, Some(&Filter::Video));
            video.sort_by(compare_video);
            video.pop()
        }
        Quality::Itag(itag) => candidates.into_iter().find(|f| f.itag == itag.0),
        Quality::Itags(itags) => itags
            .iter()
            .find_map(|itag| candidates.iter().find(|f| f.itag == itag.0).cloned()),
    };

    format.ok_or_else(|| Error::NoMatchingFormat(options.quality.to_string()))
}
