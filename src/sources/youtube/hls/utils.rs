use url::Url;

use super::types::ByteRange;

pub fn extract_attr_u64(line: &str, key: &str) -> Option<u64> {
    extract_attr_str(line, key)?.parse().ok()
}

pub fn extract_attr_str(line: &str, key: &str) -> Option<String> {
    let key_eq = format!("{}=", key);
    // Attributes follow #TAG: or a comma
    let pos = line
        .find(&format!(":{}", key_eq))
        .map(|p| p + 1)
        .or_else(|| line.find(&format!(",{}", key_eq)).map(|p| p + 1))?;

    let rest = &line[pos + key_eq.len()..];

    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        Some(quoted[..end].to_string())
    } else {
        let end = rest.find(',').unwrap_or(rest.len());
        Some(rest[..end].trim().to_string())
    }
}

/// Resolves a playlist entry against the playlist's own URL.
pub fn resolve_url(base: &str, maybe_relative: &str) -> String {
    if maybe_relative.starts_with("http://") || maybe_relative.starts_with("https://") {
        return maybe_relative.to_string();
    }

    Url::parse(base)
        .and_then(|b| b.join(maybe_relative))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| maybe_relative.to_string())
}

pub fn parse_byte_range(attr: &str, last_end_offset: u64) -> ByteRange {
    let attr = attr.trim().trim_matches('"');
    let (length, offset) = match attr.split_once('@') {
        Some((length, offset)) => (length, offset.trim().parse::<u64>().unwrap_or(0)),
        None => (attr, last_end_offset),
    };
    ByteRange {
        length: length.trim().parse::<u64>().unwrap_or(0),
        offset,
    }
}

/// Itag embedded in an origin media URL path (`/itag/<n>/`).
pub fn itag_from_url(url: &str) -> Option<u32> {
    let rest = &url[url.find("/itag/")? + "/itag/".len()..];
    let end = rest.find('/')?;
    rest[..end].parse().ok()
}
