use std::{collections::HashMap, fmt, str::FromStr, sync::{Arc, LazyLock}};

use regex::Regex;
use tracing::{debug, trace};
use url::Url;

use super::formats::Format;
use crate::{
  cache::ExpiringCache,
  common::{
    errors::{Error, Result},
    http::{HttpClient, RequestHeaders},
  },
};

const JS_VAR: &str = r"[a-zA-Z_\$][a-zA-Z_0-9\$]*";
const JS_SINGLE_QUOTE: &str = r"'[^'\\]*(?:\\[\s\S][^'\\]*)*'";
const JS_DOUBLE_QUOTE: &str = r#""[^"\\]*(?:\\[\s\S][^"\\]*)*""#;
const JS_EMPTY_STR: &str = r#"(?:''|"")"#;

const REVERSE_BODY: &str = r":function\(a\)\{(?:return )?a\.reverse\(\)\}";
const SLICE_BODY: &str = r":function\(a,b\)\{return a\.slice\(b\)\}";
const SPLICE_BODY: &str = r":function\(a,b\)\{a\.splice\(0,b\)\}";
const SWAP_BODY: &str = r":function\(a,b\)\{var c=a\[0\];a\[0\]=a\[b(?:%a\.length)?\];a\[b(?:%a\.length)?\]=c(?:;return a)?\}";

fn js_quote() -> String {
  format!("(?:{JS_SINGLE_QUOTE}|{JS_DOUBLE_QUOTE})")
}

fn js_key() -> String {
  format!("(?:{JS_VAR}|{})", js_quote())
}

fn js_prop() -> String {
  format!(r"(?:\.{JS_VAR}|\[{}\])", js_quote())
}

/// Helper object holding the four primitive operations.
static ACTIONS_OBJ: LazyLock<Regex> = LazyLock::new(|| {
  let key = js_key();
  Regex::new(&format!(
    r"var ({JS_VAR})=\{{((?:(?:{key}{REVERSE_BODY}|{key}{SLICE_BODY}|{key}{SPLICE_BODY}|{key}{SWAP_BODY}),?\r?\n?)+)\}};"
  ))
  .unwrap()
});

/// Driver function that splits the signature, calls the helpers and joins.
static ACTIONS_FUNC: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(&format!(
    r"function(?: {JS_VAR})?\(a\)\{{a=a\.split\({JS_EMPTY_STR}\);\s*((?:(?:a=)?{JS_VAR}{}\(a,\d+\);)+)return a\.join\({JS_EMPTY_STR}\)\}}",
    js_prop()
  ))
  .unwrap()
});

static REVERSE_KEY: LazyLock<Regex> = LazyLock::new(|| key_regex(REVERSE_BODY));
static SLICE_KEY: LazyLock<Regex> = LazyLock::new(|| key_regex(SLICE_BODY));
static SPLICE_KEY: LazyLock<Regex> = LazyLock::new(|| key_regex(SPLICE_BODY));
static SWAP_KEY: LazyLock<Regex> = LazyLock::new(|| key_regex(SWAP_BODY));

fn key_regex(body: &str) -> Regex {
  Regex::new(&format!(r"(?m)(?:^|,)({}){body}", js_key())).unwrap()
}

/// One primitive string transform of the signature program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  Reverse,
  /// Drop the first `n` characters.
  Slice(usize),
  /// Remove the first `n` characters in place.
  Splice(usize),
  /// Swap the first character with the one at `n % len`.
  Swap(usize),
}

impl Operation {
  fn apply(&self, chars: &mut Vec<char>) {
    match *self {
      Operation::Reverse => chars.reverse(),
      Operation::Slice(n) | Operation::Splice(n) => {
        let n = n.min(chars.len());
        chars.drain(..n);
      }
      Operation::Swap(n) => {
        if !chars.is_empty() {
          let len = chars.len();
          chars.swap(0, n % len);
        }
      }
    }
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Operation::Reverse => write!(f, "r"),
      Operation::Slice(n) => write!(f, "s{}", n),
      Operation::Splice(n) => write!(f, "p{}", n),
      Operation::Swap(n) => write!(f, "w{}", n),
    }
  }
}

impl FromStr for Operation {
  type Err = Error;

  fn from_str(token: &str) -> Result<Self> {
    let invalid = || Error::InvalidInput(format!("invalid signature operation: {}", token));
    let mut chars = token.chars();
    let code = chars.next().ok_or_else(invalid)?;
    let arg = || chars.as_str().parse::<usize>().map_err(|_| invalid());
    match code {
      'r' if token.len() == 1 => Ok(Operation::Reverse),
      's' => Ok(Operation::Slice(arg()?)),
      'p' => Ok(Operation::Splice(arg()?)),
      'w' => Ok(Operation::Swap(arg()?)),
      _ => Err(invalid()),
    }
  }
}

/// Ordered list of operations recovered from one player script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationProgram(Vec<Operation>);

impl OperationProgram {
  pub fn new(ops: Vec<Operation>) -> Self {
    Self(ops)
  }

  pub fn operations(&self) -> &[Operation] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Runs the program over `signature`.
  pub fn apply(&self, signature: &str) -> String {
    let mut chars: Vec<char> = signature.chars().collect();
    for op in &self.0 {
      op.apply(&mut chars);
    }
    chars.into_iter().collect()
  }
}

impl fmt::Display for OperationProgram {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, op) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, " ")?;
      }
      write!(f, "{}", op)?;
    }
    Ok(())
  }
}

impl FromStr for OperationProgram {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    s.split_whitespace()
      .map(Operation::from_str)
      .collect::<Result<Vec<_>>>()
      .map(Self)
  }
}

impl FromIterator<Operation> for OperationProgram {
  fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

/// Applies `program` to `signature`.
pub fn decipher(program: &OperationProgram, signature: &str) -> String {
  program.apply(signature)
}

fn strip_quotes(key: &str) -> &str {
  key.trim_matches(|c| c == '\'' || c == '"')
}

fn find_key(re: &Regex, obj_body: &str) -> Option<String> {
  re.captures(obj_body)
    .and_then(|c| c.get(1))
    .map(|m| strip_quotes(m.as_str()).to_string())
}

/// Recovers the signature program from the text of a player script.
pub fn extract_program(script: &str) -> Result<OperationProgram> {
  let obj = ACTIONS_OBJ
    .captures(script)
    .ok_or_else(|| Error::ExtractionFailed("helper object not found".into()))?;
  let func = ACTIONS_FUNC
    .captures(script)
    .ok_or_else(|| Error::ExtractionFailed("driver function not found".into()))?;

  let obj_name = &obj[1];
  let obj_body = &obj[2];
  let func_body = &func[1];

  let mut kinds: HashMap<String, char> = HashMap::new();
  for (re, code) in [
    (&*REVERSE_KEY, 'r'),
    (&*SLICE_KEY, 's'),
    (&*SPLICE_KEY, 'p'),
    (&*SWAP_KEY, 'w'),
  ] {
    if let Some(key) = find_key(re, obj_body) {
      kinds.insert(key, code);
    }
  }

  if kinds.is_empty() {
    return Err(Error::ExtractionFailed("no operation keys in helper object".into()));
  }

  let keys = kinds
    .keys()
    .map(|k| regex::escape(k))
    .collect::<Vec<_>>()
    .join("|");
  let tokenizer = Regex::new(&format!(
    r#"(?:a=)?{}(?:\.({keys})|\['({keys})'\]|\["({keys})"\])\(a,(\d+)\)"#,
    regex::escape(obj_name)
  ))?;

  let mut ops = Vec::new();
  for caps in tokenizer.captures_iter(func_body) {
    let key = caps
      .get(1)
      .or_else(|| caps.get(2))
      .or_else(|| caps.get(3))
      .map(|m| m.as_str())
      .unwrap_or_default();
    let n: usize = caps[4]
      .parse()
      .map_err(|_| Error::ExtractionFailed(format!("bad operation argument {}", &caps[4])))?;

    let op = match kinds.get(key) {
      Some('r') => Operation::Reverse,
      Some('s') => Operation::Slice(n),
      Some('p') => Operation::Splice(n),
      Some('w') => Operation::Swap(n),
      _ => continue,
    };
    ops.push(op);
  }

  if ops.is_empty() {
    return Err(Error::ExtractionFailed("driver function calls no known operation".into()));
  }

  let program = OperationProgram(ops);
  trace!("extracted signature program: {}", program);
  Ok(program)
}

/// Parts of a `signatureCipher` (or legacy `cipher`) query string.
#[derive(Debug, Default, PartialEq, Eq)]
struct CipherParams {
  url: Option<String>,
  s: Option<String>,
  sp: Option<String>,
}

fn parse_cipher(cipher: &str) -> CipherParams {
  let mut params = CipherParams::default();
  for (k, v) in url::form_urlencoded::parse(cipher.as_bytes()) {
    match k.as_ref() {
      "url" => params.url = Some(v.into_owned()),
      "s" => params.s = Some(v.into_owned()),
      "sp" => params.sp = Some(v.into_owned()),
      _ => {}
    }
  }
  params
}

fn set_query_param(url: &mut Url, key: &str, value: &str) {
  let pairs: Vec<(String, String)> = url
    .query_pairs()
    .filter(|(k, _)| k != key)
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .collect();
  url
    .query_pairs_mut()
    .clear()
    .extend_pairs(pairs)
    .append_pair(key, value);
}

/// Builds the final stream URL for `format`, deciphering its signature when
/// it came as a cipher string. URLs that fail to parse are left unchanged.
pub fn set_download_url(format: &mut Format, program: Option<&OperationProgram>) {
  let cipher = format
    .signature_cipher
    .take()
    .or_else(|| format.cipher.take());

  let (raw_url, signature) = match cipher {
    Some(cipher) => {
      let params = parse_cipher(&cipher);
      let signature = match (params.s, program) {
        (Some(s), Some(program)) => Some((params.sp.unwrap_or_else(|| "signature".into()), program.apply(&s))),
        _ => None,
      };
      (params.url.unwrap_or_default(), signature)
    }
    None => (std::mem::take(&mut format.url), None),
  };

  if raw_url.is_empty() {
    return;
  }

  match Url::parse(&raw_url) {
    Ok(mut parsed) => {
      set_query_param(&mut parsed, "ratebypass", "yes");
      if let Some((sp, sig)) = signature {
        set_query_param(&mut parsed, &sp, &sig);
      }
      format.url = parsed.to_string();
    }
    Err(e) => {
      debug!("keeping unparsable stream url {}: {}", raw_url, e);
      format.url = raw_url;
    }
  }
}

/// Fetches, caches and applies signature programs keyed by player script URL.
#[derive(Clone)]
pub struct SignatureDecipherer {
  http: Arc<dyn HttpClient>,
  cache: ExpiringCache<String, OperationProgram>,
  headers: RequestHeaders,
}

impl SignatureDecipherer {
  pub fn new(
    http: Arc<dyn HttpClient>,
    cache: ExpiringCache<String, OperationProgram>,
    headers: RequestHeaders,
  ) -> Self {
    Self { http, cache, headers }
  }

  /// Program for the script at `script_url`, fetched at most once while a
  /// fetch is in flight.
  pub async fn program(&self, script_url: &str) -> Result<OperationProgram> {
    let http = self.http.clone();
    let headers = self.headers.clone();
    let url = script_url.to_string();

    self
      .cache
      .get_or_set(url.clone(), move || async move {
        debug!("fetching player script {}", url);
        let body = http.get_text(&url, &headers).await?;
        extract_program(&body)
      })
      .await
  }

  /// Deciphers every format, collapsing entries that end on the same URL.
  pub async fn decipher_formats(&self, formats: Vec<Format>, script_url: &str) -> Result<Vec<Format>> {
    let needs_program = formats
      .iter()
      .any(|f| f.signature_cipher.is_some() || f.cipher.is_some());
    let program = if needs_program {
      Some(self.program(script_url).await?)
    } else {
      None
    };

    let mut out: Vec<Format> = Vec::with_capacity(formats.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for mut format in formats {
      set_download_url(&mut format, program.as_ref());
      match index.get(&format.url) {
        Some(&i) => out[i] = format,
        None => {
          index.insert(format.url.clone(), out.len());
          out.push(format);
        }
      }
    }
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use async_trait::async_trait;
  use std::time::Duration;

  use super::*;
  use crate::common::http::HttpResponse;

  const SCRIPT: &str = r#"var xy={ab:function(a,b){a.splice(0,b)},
cd:function(a){a.reverse()},
ef:function(a,b){var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c}};
var other=1;sig=function(a){a=a.split("");xy.ab(a,2);xy.cd(a,17);xy.ef(a,3);return a.join("")};"#;

  const QUOTED_SCRIPT: &str = r#"var Q$={"gh":function(a,b){return a.slice(b)},'ij':function(a){return a.reverse()},kl:function(a,b){var c=a[0];a[0]=a[b];a[b]=c;return a}};function dec(a){a=a.split('');a=Q$["gh"](a,1);Q$['ij'](a,0);Q$.kl(a,5);return a.join('')}"#;

  fn program(s: &str) -> OperationProgram {
    s.parse().unwrap()
  }

  #[test]
  fn test_primitive_operations() {
    assert_eq!(decipher(&program("r"), "abcde"), "edcba");
    assert_eq!(decipher(&program("s2"), "abcde"), "cde");
    assert_eq!(decipher(&program("p2"), "abcde"), "cde");
    assert_eq!(decipher(&program("w3"), "abcde"), "dbcae");
    assert_eq!(decipher(&program("w7"), "abcde"), "cbade");
  }

  #[test]
  fn test_edge_inputs() {
    assert_eq!(decipher(&program("r s1 w2"), ""), "");
    assert_eq!(decipher(&program("s9"), "abc"), "");
    assert_eq!(decipher(&OperationProgram::default(), "abc"), "abc");
  }

  #[test]
  fn test_program_display_round_trip() {
    let p = OperationProgram::new(vec![
      Operation::Splice(2),
      Operation::Reverse,
      Operation::Swap(3),
    ]);
    assert_eq!(p.to_string(), "p2 r w3");
    assert_eq!(program("p2 r w3"), p);
    assert!("x1".parse::<Operation>().is_err());
    assert!("s".parse::<Operation>().is_err());
  }

  #[test]
  fn test_extract_program_identifier_keys() {
    let p = extract_program(SCRIPT).unwrap();
    assert_eq!(p.to_string(), "p2 r w3");
    assert_eq!(p.apply("abcdefg"), "dfegc");
  }

  #[test]
  fn test_extract_program_quoted_keys_and_bracket_calls() {
    let p = extract_program(QUOTED_SCRIPT).unwrap();
    assert_eq!(p.to_string(), "s1 r w5");
  }

  #[test]
  fn test_extract_program_missing_patterns() {
    let err = extract_program("var nothing=here;").unwrap_err();
    assert!(matches!(err, Error::ExtractionFailed(_)));

    let no_driver = SCRIPT.replace("return a.join(\"\")", "return a");
    assert!(matches!(extract_program(&no_driver), Err(Error::ExtractionFailed(_))));
  }

  #[test]
  fn test_set_download_url_with_cipher() {
    let mut format = Format {
      signature_cipher: Some(
        "s=edcba&sp=sig&url=https%3A%2F%2Fr1.example.com%2Fvideoplayback%3Fitag%3D18".into(),
      ),
      ..Format::default()
    };
    set_download_url(&mut format, Some(&program("r")));
    let url = Url::parse(&format.url).unwrap();
    let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(pairs["itag"], "18");
    assert_eq!(pairs["ratebypass"], "yes");
    assert_eq!(pairs["sig"], "abcde");
    assert!(format.signature_cipher.is_none());
  }

  #[test]
  fn test_set_download_url_keeps_unparsable() {
    let mut format = Format {
      url: "not a url".into(),
      ..Format::default()
    };
    set_download_url(&mut format, None);
    assert_eq!(format.url, "not a url");
  }

  struct ScriptServer {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl HttpClient for ScriptServer {
    async fn get_text(&self, _url: &str, _headers: &RequestHeaders) -> Result<String> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(10)).await;
      Ok(SCRIPT.to_string())
    }

    async fn get_stream(&self, url: &str, _headers: &RequestHeaders) -> Result<HttpResponse> {
      Err(Error::Unsupported(url.to_string()))
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_decipher_formats_fetches_script_once() {
    let server = Arc::new(ScriptServer { calls: AtomicUsize::new(0) });
    let decipherer = SignatureDecipherer::new(
      server.clone(),
      ExpiringCache::new(Duration::from_secs(1)),
      Vec::new(),
    );

    let cipher = |s: &str| Format {
      signature_cipher: Some(format!("s={s}&url=https%3A%2F%2Fexample.com%2Fv%3Fid%3D{s}")),
      ..Format::default()
    };
    let formats = vec![cipher("abcdefg"), cipher("gfedcba")];

    let (a, b) = tokio::join!(
      decipherer.decipher_formats(formats.clone(), "https://www.youtube.com/s/player/x/base.js"),
      decipherer.decipher_formats(formats, "https://www.youtube.com/s/player/x/base.js"),
    );
    let a = a.unwrap();
    assert_eq!(a.len(), 2);
    assert_eq!(a, b.unwrap());
    assert!(a[0].url.contains("signature=dfegc"));
    assert_eq!(server.calls.load(Ordering::SeqCst), 1);
  }
}
