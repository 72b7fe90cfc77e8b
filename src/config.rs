//! Configuration loader and validator for the MLS sync service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub bridge: Bridge,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Scheduler tick interval for the `serve` loop.
    pub tick_interval_secs: u64,
}

/// Bridge API credentials. The endpoint URL points at the primary listing
/// resource (`.../Property`); secondary resources are derived from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bridge {
    pub server_token: String,
    pub endpoint_url: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.tick_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.tick_interval_secs must be > 0"));
    }

    if cfg.bridge.server_token.trim().is_empty() {
        return Err(ConfigError::Invalid("bridge.server_token must be non-empty"));
    }
    if cfg.bridge.endpoint_url.trim().is_empty() {
        return Err(ConfigError::Invalid("bridge.endpoint_url must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.bridge.endpoint_url).is_err() {
        return Err(ConfigError::Invalid(
            "bridge.endpoint_url must be an absolute URL",
        ));
    }

    Ok(())
}

/// Returns a canonical example YAML config, used by docs and tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  tick_interval_secs: 60

bridge:
  server_token: "YOUR_BRIDGE_SERVER_TOKEN"
  endpoint_url: "https://api.bridgedataoutput.com/api/v2/OData/demo/Property"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
    }

    #[test]
    fn invalid_server_token() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.bridge.server_token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("server_token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_endpoint_url() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.bridge.endpoint_url = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.bridge.endpoint_url = "not a url".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("absolute URL")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_tick_interval() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.tick_interval_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(example().as_bytes()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.tick_interval_secs, 60);
    }
}
