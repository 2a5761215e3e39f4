use serde::{Deserialize, Serialize};

use crate::{
  common::errors::{Error, Result},
  configs::*,
};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
  pub logging: Option<LoggingConfig>,
  #[serde(default)]
  pub youtube: YouTubeConfig,
}

impl Config {
  pub fn load() -> Result<Self> {
    let config_path = if std::path::Path::new("config.toml").exists() {
      "config.toml"
    } else if std::path::Path::new("config.default.toml").exists() {
      "config.default.toml"
    } else {
      return Err(Error::Config(
        "config.toml or config.default.toml not found".into(),
      ));
    };

    let config_str = std::fs::read_to_string(config_path)?;
    if config_str.is_empty() {
      return Err(Error::Config(format!("{} is empty", config_path)));
    }

    Self::from_toml(&config_str)
  }

  pub fn from_toml(config_str: &str) -> Result<Self> {
    Ok(toml::from_str(config_str)?)
  }
}
