use std::{
  fs::{self, File, OpenOptions},
  io::{self, BufRead, BufReader, Write},
  path::Path,
  sync::Arc,
};

use parking_lot::Mutex;

use tracing_subscriber::{EnvFilter, fmt::{self, time::LocalTime}, prelude::*};

use crate::configs::Config;

/// Builds the `EnvFilter` directive string from the configured level and
/// extra per-target filters.
fn filter_directives(config: &Config) -> String {
  let log_level = config
    .logging
    .as_ref()
    .and_then(|l| l.level.as_deref())
    .unwrap_or("info");

  let filters = config
    .logging
    .as_ref()
    .and_then(|l| l.filters.as_deref())
    .unwrap_or("");

  if filters.is_empty() {
    log_level.to_string()
  } else {
    format!("{},{}", log_level, filters)
  }
}

pub fn init(config: &Config) {
  // RUST_LOG wins over the configuration file
  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

  // Log lines go to stderr so that stdout can carry media bytes.
  let stderr_layer = fmt::layer()
    .with_writer(io::stderr)
    .with_timer(LocalTime::rfc_3339())
    .with_target(true)
    .with_line_number(true)
    .with_file(false);

  let file_layer = config
    .logging
    .as_ref()
    .and_then(|logging| logging.file.as_ref())
    .map(|file_config| {
      if let Some(parent) = Path::new(&file_config.path).parent() {
        if let Err(e) = fs::create_dir_all(parent) {
          eprintln!("Failed to create log directory: {}", e);
        }
      }

      fmt::layer()
        .with_writer(CircularFileWriter::new(file_config.path.clone(), file_config.max_lines))
        .with_timer(LocalTime::rfc_3339())
        .with_target(true)
        .with_line_number(true)
        .with_file(false)
        .with_ansi(false)
    });

  // try_init: a second call (tests, embedding applications) is not an error
  let _ = tracing_subscriber::registry()
    .with(env_filter)
    .with(stderr_layer)
    .with(file_layer)
    .try_init();
}

/// Appends to a file and periodically drops the oldest lines to stay under
/// `max_lines`.
#[derive(Clone)]
pub(crate) struct CircularFileWriter {
  path: String,
  max_lines: u32,
  lines_since_prune: Arc<Mutex<u32>>,
}

impl CircularFileWriter {
  fn new(path: String, max_lines: u32) -> Self {
    Self {
      path,
      max_lines,
      lines_since_prune: Arc::new(Mutex::new(0)),
    }
  }

  fn prune(&self) -> io::Result<()> {
    if !Path::new(&self.path).exists() {
      return Ok(());
    }

    let reader = BufReader::new(File::open(&self.path)?);
    let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;

    if lines.len() > self.max_lines as usize {
      let start = lines.len() - self.max_lines as usize;
      let mut file = File::create(&self.path)?;
      for line in &lines[start..] {
        writeln!(file, "{}", line)?;
      }
    }
    Ok(())
  }
}

impl io::Write for CircularFileWriter {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)?;
    file.write_all(buf)?;

    let mut pending = self.lines_since_prune.lock();
    *pending += buf.iter().filter(|&&b| b == b'\n').count() as u32;

    // Prune after 10% of max_lines (at least 50) new lines
    let prune_threshold = (self.max_lines / 10).max(50);
    if *pending >= prune_threshold {
      if let Err(e) = self.prune() {
        eprintln!("Failed to prune log file: {}", e);
      }
      *pending = 0;
    }

    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl<'a> fmt::MakeWriter<'a> for CircularFileWriter {
  type Writer = Self;

  fn make_writer(&'a self) -> Self::Writer {
    self.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::configs::LoggingConfig;

  #[test]
  fn test_filter_directives() {
    let mut config = Config::default();
    assert_eq!(filter_directives(&config), "info");

    config.logging = Some(LoggingConfig {
      level: Some("debug".into()),
      filters: Some("reqwest=warn,hyper=warn".into()),
      file: None,
    });
    assert_eq!(filter_directives(&config), "debug,reqwest=warn,hyper=warn");
  }
}
