use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::common::{
    errors::{Error, Result},
    types::VideoId,
};

pub const BASE_URL: &str = "https://www.youtube.com/watch?v=";

const VALID_QUERY_DOMAINS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
];

static VALID_PATH_DOMAINS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(youtu\.be/|(www\.)?youtube\.com/(embed|v)/)").unwrap()
});

static ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{11}$").unwrap());

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https?://").unwrap());

static HTML5_PLAYER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"<script\s+src="([^"]+)"(?:\s+type="text/javascript")?\s+name="player_ias/base"\s*>|"jsUrl":"([^"]+)""#,
    )
    .unwrap()
});

/// Leading characters the origin prepends to JSON bodies to defeat naive
/// script inclusion.
static JSON_CLOSING_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[)\]}'\s]+"#).unwrap());

pub fn validate_id(id: &str) -> bool {
    ID_REGEX.is_match(id)
}

/// Whether `link` looks like something [`get_url_video_id`] can handle.
pub fn validate_url(link: &str) -> bool {
    get_url_video_id(link).is_ok()
}

/// Extracts the video id from a watch, embed, or short link.
pub fn get_url_video_id(link: &str) -> Result<VideoId> {
    let parsed = Url::parse(link.trim())
        .map_err(|_| Error::InvalidInput(format!("No video id found: {}", link)))?;

    let mut id = parsed
        .query_pairs()
        .find(|(k, _)| k == "v")
        .map(|(_, v)| v.into_owned());

    if VALID_PATH_DOMAINS.is_match(link.trim()) && id.is_none() {
        id = parsed
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map(str::to_string);
    } else if let Some(host) = parsed.host_str() {
        if !VALID_QUERY_DOMAINS.contains(&host) {
            return Err(Error::InvalidInput("Not a YouTube domain".into()));
        }
    }

    let id = id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("No video id found: {}", link)))?;

    let id: String = id.chars().take(11).collect();
    if !validate_id(&id) {
        return Err(Error::InvalidInput(format!(
            "Video id ({}) does not match expected format ({})",
            id,
            ID_REGEX.as_str()
        )));
    }
    Ok(VideoId::new_unchecked(id))
}

/// Accepts either a bare 11-character id or a recognized URL.
pub fn get_video_id(input: &str) -> Result<VideoId> {
    let input = input.trim();
    if validate_id(input) {
        Ok(VideoId::new_unchecked(input))
    } else if URL_REGEX.is_match(input) {
        get_url_video_id(input)
    } else {
        Err(Error::InvalidInput(format!("No video id found: {}", input)))
    }
}

/// Returns the text between the first `left` and the following `right`.
pub fn between<'a>(haystack: &'a str, left: &str, right: &str) -> Option<&'a str> {
    let start = haystack.find(left)? + left.len();
    let rest = &haystack[start..];
    let end = rest.find(right)?;
    Some(&rest[..end])
}

/// Cuts a JSON object or array off the front of `mixed`, ignoring whatever
/// script text follows it.
pub fn cut_after_json(mixed: &str) -> Result<&str> {
    let (open, close) = match mixed.as_bytes().first() {
        Some(b'[') => (b'[', b']'),
        Some(b'{') => (b'{', b'}'),
        other => {
            return Err(Error::parse(
                "page",
                "json",
                format!(
                    "can't cut unsupported JSON (need to begin with [ or {{) but got: {:?}",
                    other.map(|b| *b as char)
                ),
            ));
        }
    };

    let mut in_string = false;
    let mut escaped = false;
    let mut depth = 0usize;

    for (i, &b) in mixed.as_bytes().iter().enumerate() {
        if b == b'"' && !escaped {
            in_string = !in_string;
            continue;
        }
        escaped = b == b'\\' && !escaped;
        if in_string {
            continue;
        }

        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Ok(&mixed[..=i]);
            }
        }
    }

    Err(Error::parse(
        "page",
        "json",
        "can't cut unsupported JSON (no matching closing bracket found)",
    ))
}

/// Parses a JSON body after stripping anti-inclusion prefixes.
pub fn parse_json(source: &str, what: &str, text: &str) -> Result<Value> {
    let text = JSON_CLOSING_CHARS.replace(text, "");
    serde_json::from_str(&text).map_err(|e| Error::parse(source, what, e))
}

/// Locates the JSON literal that starts right after `left` matches in `body`.
pub fn find_json(source: &str, what: &str, body: &str, left: &Regex) -> Result<Value> {
    let m = left
        .find(body)
        .ok_or_else(|| Error::parse(source, what, "could not find JSON"))?;

    // The pattern consumes the opening brace, put it back before cutting.
    let opener = &body[m.end() - 1..];
    let json = cut_after_json(opener).map_err(|e| Error::parse(source, what, e))?;
    parse_json(source, what, json)
}

/// Reads a player response that a page embedded either as a JSON object or
/// as a JSON-encoded string.
pub fn find_player_response(source: &str, info: &Value) -> Result<Option<Value>> {
    let candidate = info
        .get("args")
        .and_then(|args| args.get("player_response"))
        .or_else(|| info.get("player_response"))
        .or_else(|| info.get("playerResponse"))
        .or_else(|| info.get("embedded_player_response"));

    match candidate {
        Some(Value::String(s)) => parse_json(source, "player_response", s).map(Some),
        Some(Value::Null) | None => Ok(None),
        Some(v) => Ok(Some(v.clone())),
    }
}

/// URL of the player script referenced by a watch or embed page.
pub fn get_html5player(body: &str) -> Option<String> {
    let caps = HTML5_PLAYER_REGEX.captures(body)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().replace("\\/", "/"))
}

/// Resolves a possibly relative origin path against the watch page URL.
pub fn absolute_url(path: &str) -> String {
    Url::parse(BASE_URL)
        .and_then(|base| base.join(path))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| path.to_string())
}

/// Text of a `{ runs: [{ text }] }` or `{ simpleText }` node.
pub fn get_text(value: &Value) -> Option<String> {
    value
        .get("runs")
        .and_then(|r| r.get(0))
        .and_then(|r| r.get("text"))
        .or_else(|| value.get("simpleText"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
}

/// Parses counts such as `1,234` or `1.2M`.
pub fn parse_abbreviated_number(text: &str) -> Option<u64> {
    let cleaned: String = text
        .replace(',', ".")
        .replace(' ', "")
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || "KMB".contains(*c))
        .collect();
    let (number, multiplier) = match cleaned.chars().last()? {
        'K' => (&cleaned[..cleaned.len() - 1], 1e3),
        'M' => (&cleaned[..cleaned.len() - 1], 1e6),
        'B' => (&cleaned[..cleaned.len() - 1], 1e9),
        _ => (cleaned.as_str(), 1.0),
    };
    if multiplier == 1.0 {
        return number.replace('.', "").parse().ok();
    }
    let value: f64 = number.parse().ok()?;
    Some((value * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_video_id_accepts_every_url_shape() {
        let expected = "RAW_VIDEOID";
        let links = [
            "RAW_VIDEOID",
            "https://www.youtube.com/watch?v=RAW_VIDEOID",
            "https://m.youtube.com/watch?v=RAW_VIDEOID&feature=share",
            "https://music.youtube.com/watch?v=RAW_VIDEOID",
            "https://youtu.be/RAW_VIDEOID",
            "https://www.youtube.com/embed/RAW_VIDEOID",
            "https://youtube.com/v/RAW_VIDEOID",
            "https://youtu.be/RAW_VIDEOID/",
            "https://www.youtube.com/embed/RAW_VIDEOID/",
            "https://www.youtube.com/watch?v=RAW_VIDEOIDextra",
        ];
        for link in links {
            assert_eq!(get_video_id(link).unwrap().as_str(), expected, "{link}");
        }
    }

    #[test]
    fn test_get_url_video_id_rejects_bad_input() {
        assert!(matches!(
            get_url_video_id("https://example.com/watch?v=RAW_VIDEOID"),
            Err(Error::InvalidInput(m)) if m == "Not a YouTube domain"
        ));
        assert!(get_url_video_id("https://www.youtube.com/feed").is_err());
        assert!(get_url_video_id("https://www.youtube.com/watch?v=bad!id_____").is_err());
        assert!(get_video_id("not a link").is_err());
        assert!(!validate_url("https://youtu.be/"));
        assert!(validate_url("https://youtu.be/RAW_VIDEOID"));
    }

    #[test]
    fn test_cut_after_json_ignores_brackets_in_strings() {
        let mixed = r#"{"a":"}{","b":[1,{"c":"\"}"}]};var x = {};"#;
        assert_eq!(cut_after_json(mixed).unwrap(), r#"{"a":"}{","b":[1,{"c":"\"}"}]}"#);
        assert!(cut_after_json("nope").is_err());
        assert!(cut_after_json("{\"a\":1").is_err());
    }

    #[test]
    fn test_find_json_and_parse_prefix() {
        let re = Regex::new(r"ytInitialPlayerResponse\s*=\s*\{").unwrap();
        let body = r#"<script>var ytInitialPlayerResponse = {"videoDetails":{"videoId":"x"}};var meta = {};</script>"#;
        let value = find_json("watch.html", "player_response", body, &re).unwrap();
        assert_eq!(value["videoDetails"]["videoId"], "x");

        let value = parse_json("watch.json", "body", ")]}'\n[{\"a\":1}]").unwrap();
        assert_eq!(value[0]["a"], 1);
    }

    #[test]
    fn test_find_player_response_accepts_string_or_object() {
        let as_string = serde_json::json!({ "args": { "player_response": "{\"a\":1}" } });
        assert_eq!(find_player_response("x", &as_string).unwrap().unwrap()["a"], 1);

        let as_object = serde_json::json!({ "playerResponse": { "a": 2 } });
        assert_eq!(find_player_response("x", &as_object).unwrap().unwrap()["a"], 2);

        assert!(find_player_response("x", &serde_json::json!({})).unwrap().is_none());
    }

    #[test]
    fn test_get_html5player() {
        let html = r#"<script src="/s/player/abc/player_ias.vflset/en_US/base.js" name="player_ias/base"></script>"#;
        assert_eq!(
            get_html5player(html).as_deref(),
            Some("/s/player/abc/player_ias.vflset/en_US/base.js")
        );
        let json = r#"{"jsUrl":"\/s\/player\/def\/base.js"}"#;
        assert_eq!(get_html5player(json).as_deref(), Some("/s/player/def/base.js"));
        assert_eq!(
            absolute_url("/s/player/def/base.js"),
            "https://www.youtube.com/s/player/def/base.js"
        );
    }

    #[test]
    fn test_parse_abbreviated_number() {
        assert_eq!(parse_abbreviated_number("1,234 views"), Some(1234));
        assert_eq!(parse_abbreviated_number("1.5M subscribers"), Some(1_500_000));
        assert_eq!(parse_abbreviated_number("12K"), Some(12_000));
        assert_eq!(parse_abbreviated_number("none"), None);
    }
}
