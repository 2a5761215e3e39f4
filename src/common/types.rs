/// Validated 11-character video identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Wraps `id` without validation. Callers go through
    /// [`crate::sources::youtube::utils::get_video_id`] for untrusted input.
    pub(crate) fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for VideoId {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for VideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric format identifier assigned by the origin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Itag(pub u32);

impl From<u32> for Itag {
    fn from(u: u32) -> Self {
        Self(u)
    }
}

impl std::fmt::Display for Itag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Container formats a stream can arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Container {
    Mp4,
    Webm,
    Flv,
    ThreeGp,
    Ts,
    Unknown,
}

impl Container {
    pub fn as_ext(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Flv => "flv",
            Self::ThreeGp => "3gp",
            Self::Ts => "ts",
            Self::Unknown => "",
        }
    }

    /// Derives the container from a MIME type such as `video/mp4; codecs="avc1"`.
    pub fn from_mime(mime: &str) -> Self {
        let subtype = mime
            .split(';')
            .next()
            .and_then(|m| m.split('/').nth(1))
            .unwrap_or("")
            .trim();
        match subtype.to_lowercase().as_str() {
            "mp4" | "m4a" => Self::Mp4,
            "webm" => Self::Webm,
            "x-flv" | "flv" => Self::Flv,
            "3gpp" | "3gp" => Self::ThreeGp,
            "ts" | "mp2t" => Self::Ts,
            _ => Self::Unknown,
        }
    }
}
