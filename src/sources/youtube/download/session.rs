/// Byte span requested by the caller. `end` is inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadRange {
    pub start: u64,
    pub end: Option<u64>,
}

/// Span of one request. An absent `end` reads to the end of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl SubRange {
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Cursor over the sequential sub-ranges of one chunked transfer.
///
/// The span runs from the range start (or 0) to the smaller of the range end
/// and the last byte of the content. Without either bound the whole span is a
/// single open-ended request.
#[derive(Debug, Clone)]
pub struct DownloadSession {
    first: u64,
    start: u64,
    /// Last byte of the span, when known.
    last: Option<u64>,
    range_end: Option<u64>,
    chunk_size: u64,
    should_end_output: bool,
}

impl DownloadSession {
    pub fn new(range: Option<DownloadRange>, content_length: Option<u64>, chunk_size: u64) -> Self {
        let start = range.map(|r| r.start).unwrap_or(0);
        let range_end = range.and_then(|r| r.end);
        let length_end = content_length.filter(|l| *l > 0).map(|l| l - 1);
        let last = match (range_end, length_end) {
            (Some(r), Some(l)) => Some(r.min(l)),
            (r, l) => r.or(l),
        };

        Self {
            first: start,
            start,
            last,
            range_end,
            chunk_size: chunk_size.max(1),
            should_end_output: false,
        }
    }

    /// Bytes the whole span covers, when known.
    pub fn total(&self) -> Option<u64> {
        self.last.map(|last| (last + 1).saturating_sub(self.first))
    }

    pub fn range_end(&self) -> Option<u64> {
        self.range_end
    }

    /// Whether the sub-range handed out last completes the output.
    pub fn should_end_output(&self) -> bool {
        self.should_end_output
    }
}

impl Iterator for DownloadSession {
    type Item = SubRange;

    fn next(&mut self) -> Option<SubRange> {
        if self.should_end_output {
            return None;
        }

        match self.last {
            None => {
                self.should_end_output = true;
                Some(SubRange {
                    start: self.start,
                    end: None,
                })
            }
            Some(last) if self.start > last => {
                self.should_end_output = true;
                None
            }
            Some(last) => {
                let end = self.start.saturating_add(self.chunk_size - 1).min(last);
                let sub = SubRange {
                    start: self.start,
                    end: Some(end),
                };
                self.should_end_output = end == last;
                self.start = end + 1;
                Some(sub)
            }
        }
    }
}
