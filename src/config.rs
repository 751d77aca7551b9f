use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::api::analysis::Language;
use crate::api::polling::PollConfig;

pub const ENV_PREFIX: &str = "DOCSCAN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub auth_api_url: String,
    pub docs_api_url: String,
    pub analysis_api_url: String,
    pub request_timeout_secs: u64,
    pub default_language: Language,
    pub color_output: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_file: Option<PathBuf>,
    pub polling: PollingSettings,
}

/// Interval and attempt cap per polling call site. A cap of `0` means
/// poll until the task finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub upload_interval_secs: u64,
    pub upload_max_attempts: u32,
    pub analysis_interval_secs: u64,
    pub analysis_max_attempts: u32,
}

impl Default for PollingSettings {
    fn default() -> Self {
        let upload = PollConfig::upload();
        let analysis = PollConfig::analysis();

        Self {
            upload_interval_secs: upload.interval.as_secs(),
            upload_max_attempts: upload.max_attempts.unwrap_or(0),
            analysis_interval_secs: analysis.interval.as_secs(),
            analysis_max_attempts: analysis.max_attempts.unwrap_or(0),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_api_url: "http://localhost:8001".to_string(),
            docs_api_url: "http://localhost:8000".to_string(),
            analysis_api_url: "http://localhost:4000".to_string(),
            request_timeout_secs: 30,
            default_language: Language::Ru,
            color_output: true,
            session_file: None,
            polling: PollingSettings::default(),
        }
    }
}

impl Config {
    /// Built-in defaults, then the TOML file, then `DOCSCAN_*` variables
    /// (nested keys joined with `__`, e.g. `DOCSCAN_POLLING__UPLOAD_MAX_ATTEMPTS`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::get_config_path()?,
        };
        Self::layered(&path, None)
    }

    fn layered(path: &Path, env: Option<HashMap<String, String>>) -> Result<Self> {
        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(env);

        let config: Config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validated()
    }

    /// The file alone, without environment overrides. Used when editing.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validated()
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }

    pub fn reset(path: &Path) -> Result<()> {
        Config::default().save_to(path)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "docscan", "docscan")
            .ok_or_else(|| anyhow::anyhow!("Unable to determine config directory"))?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "auth_api_url" => self.auth_api_url = normalize_url(key, value)?,
            "docs_api_url" => self.docs_api_url = normalize_url(key, value)?,
            "analysis_api_url" => self.analysis_api_url = normalize_url(key, value)?,
            "request_timeout_secs" => self.request_timeout_secs = parse(key, value)?,
            "default_language" => {
                self.default_language = value.parse().map_err(anyhow::Error::msg)?
            }
            "color_output" => self.color_output = parse(key, value)?,
            "session_file" => {
                self.session_file = (!value.is_empty()).then(|| PathBuf::from(value))
            }
            "polling.upload_interval_secs" => self.polling.upload_interval_secs = parse(key, value)?,
            "polling.upload_max_attempts" => self.polling.upload_max_attempts = parse(key, value)?,
            "polling.analysis_interval_secs" => {
                self.polling.analysis_interval_secs = parse(key, value)?
            }
            "polling.analysis_max_attempts" => {
                self.polling.analysis_max_attempts = parse(key, value)?
            }
            _ => bail!("Unknown configuration key: {}", key),
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn upload_polling(&self) -> PollConfig {
        poll_config(
            self.polling.upload_interval_secs,
            self.polling.upload_max_attempts,
        )
    }

    pub fn analysis_polling(&self) -> PollConfig {
        poll_config(
            self.polling.analysis_interval_secs,
            self.polling.analysis_max_attempts,
        )
    }

    fn validated(mut self) -> Result<Self> {
        self.auth_api_url = normalize_url("auth_api_url", &self.auth_api_url)?;
        self.docs_api_url = normalize_url("docs_api_url", &self.docs_api_url)?;
        self.analysis_api_url = normalize_url("analysis_api_url", &self.analysis_api_url)?;

        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        if self.polling.upload_interval_secs == 0 || self.polling.analysis_interval_secs == 0 {
            bail!("Polling intervals must be greater than zero");
        }

        Ok(self)
    }
}

fn poll_config(interval_secs: u64, max_attempts: u32) -> PollConfig {
    PollConfig::new(
        Duration::from_secs(interval_secs),
        (max_attempts > 0).then_some(max_attempts),
    )
}

fn normalize_url(key: &str, value: &str) -> Result<String> {
    let url = Url::parse(value).with_context(|| format!("{} is not a valid URL: {}", key, value))?;

    if !matches!(url.scheme(), "http" | "https") {
        bail!("{} must be an http(s) URL, got {}", key, value);
    }

    Ok(value.trim_end_matches('/').to_string())
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::layered(&dir.path().join("config.toml"), env(&[])).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.upload_polling(), PollConfig::upload());
        assert_eq!(config.analysis_polling(), PollConfig::analysis());
    }

    #[test]
    fn file_then_environment_override_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "docs_api_url = \"http://docs.internal:9000/\"\n\
             default_language = \"en\"\n\
             [polling]\n\
             analysis_max_attempts = 0\n",
        )
        .unwrap();

        let config = Config::layered(
            &path,
            env(&[
                ("DOCSCAN_AUTH_API_URL", "https://auth.example.com"),
                ("DOCSCAN_POLLING__UPLOAD_MAX_ATTEMPTS", "10"),
            ]),
        )
        .unwrap();

        assert_eq!(config.docs_api_url, "http://docs.internal:9000");
        assert_eq!(config.auth_api_url, "https://auth.example.com");
        assert_eq!(config.default_language, Language::En);
        assert_eq!(config.polling.upload_max_attempts, 10);
        assert_eq!(config.analysis_polling().max_attempts, None);
        assert_eq!(config.analysis_api_url, "http://localhost:4000");
    }

    #[test]
    fn rejects_invalid_url() {
        let dir = TempDir::new().unwrap();
        let err = Config::layered(
            &dir.path().join("config.toml"),
            env(&[("DOCSCAN_DOCS_API_URL", "not a url")]),
        )
        .unwrap_err();

        assert!(format!("{:#}", err).contains("docs_api_url"));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let dir = TempDir::new().unwrap();
        let err = Config::layered(
            &dir.path().join("config.toml"),
            env(&[("DOCSCAN_POLLING__ANALYSIS_INTERVAL_SECS", "0")]),
        )
        .unwrap_err();

        assert!(err.to_string().contains("Polling intervals"));
    }

    #[test]
    fn set_validates_and_saves() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::load_file(&path).unwrap();
        config.set("analysis_api_url", "http://analysis:4000/").unwrap();
        config.set("polling.upload_interval_secs", "2").unwrap();
        assert!(config.set("color_output", "sometimes").is_err());
        assert!(config.set("api_key", "x").is_err());
        config.save_to(&path).unwrap();

        let reloaded = Config::load_file(&path).unwrap();
        assert_eq!(reloaded.analysis_api_url, "http://analysis:4000");
        assert_eq!(reloaded.upload_polling().interval, Duration::from_secs(2));
    }

    #[test]
    fn reset_restores_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.set("request_timeout_secs", "5").unwrap();
        config.save_to(&path).unwrap();

        Config::reset(&path).unwrap();

        assert_eq!(Config::load_file(&path).unwrap(), Config::default());
    }
}
