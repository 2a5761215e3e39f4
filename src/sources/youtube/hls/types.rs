#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub length: u64,
    pub offset: u64,
}

impl ByteRange {
    /// Value for an HTTP `Range` header.
    pub fn header_value(&self) -> String {
        let end = self.offset + self.length.saturating_sub(1);
        format!("bytes={}-{}", self.offset, end)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    pub url: String,
    pub range: Option<ByteRange>,
    /// Segment duration in seconds (from #EXTINF). None for map segments.
    pub duration: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct Variant {
    pub url: String,
    pub bandwidth: u64,
    pub codecs: String,
    /// True when CODECS lists an audio codec but no video codec.
    pub is_audio_only: bool,
}

#[derive(Clone, Debug, Default)]
pub struct MediaPlaylist {
    pub segments: Vec<Resource>,
    pub map: Option<Resource>,
    /// Sequence number of the first listed segment.
    pub media_sequence: u64,
    pub target_duration: Option<f64>,
    /// `#EXT-X-ENDLIST` seen: no segments will be appended.
    pub ended: bool,
}

pub enum M3u8Playlist {
    Master { variants: Vec<Variant> },
    Media(MediaPlaylist),
}
