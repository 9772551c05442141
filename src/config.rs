use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, de};

use crate::backoff::RetrySchedule;
use crate::constants;
use crate::error::{Error, Result};
use crate::renderer::RendererKind;
use crate::uevent::{ChangePolicy, MatchOptions};

/// The optional YAML configuration file. Every key is optional, and keys
/// that are present override the built-in defaults.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct HotplugConfig {
    pub debug: Option<bool>,
    pub cache_path: Option<PathBuf>,
    pub sys_root: Option<PathBuf>,
    pub target: Option<PathBuf>,
    pub retry_schedule: Option<Vec<u64>>,
    #[serde(default, deserialize_with = "parse_scalar")]
    pub change_policy: Option<ChangePolicy>,
    pub normalize_mac: Option<bool>,
    #[serde(default, deserialize_with = "parse_scalar")]
    pub renderer: Option<RendererKind>,
    pub postcmds: Option<bool>,
    pub imds_timeout: Option<u64>,
    pub reporting: Option<ReportingConfig>,
}

// serde_yaml2 does not read unit enum variants from plain scalars.
fn parse_scalar<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let value = String::deserialize(deserializer)?;
    value.parse().map(Some).map_err(de::Error::custom)
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ReportingConfig {
    pub events_file: Option<PathBuf>,
}

impl HotplugConfig {
    pub fn from_string(value: &str) -> Result<Option<Self>> {
        if value.trim().is_empty() {
            return Ok(None);
        }
        serde_yaml2::from_str::<HotplugConfig>(value).map_or_else(
            |e| Err(Error::Config(format!("unable to parse configuration: {}", e))),
            |config| Ok(Some(config)),
        )
    }

    /// Read the configuration file at `path`. A missing file is not an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let p = path.as_ref();
        match fs::read_to_string(p) {
            Ok(contents) => Self::from_string(&contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Config(format!("unable to read {}: {}", p.display(), e))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub debug: bool,
    pub cache_path: PathBuf,
    pub sys_root: PathBuf,
    pub target: PathBuf,
    pub retry_schedule: RetrySchedule,
    pub match_options: MatchOptions,
    pub renderer: Option<RendererKind>,
    pub postcmds: bool,
    pub imds_timeout: Duration,
    pub events_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            cache_path: PathBuf::from(constants::FILE_INSTANCE_CACHE),
            sys_root: PathBuf::from(constants::DIR_SYS),
            target: PathBuf::from(constants::DIR_ROOT),
            retry_schedule: RetrySchedule::default(),
            match_options: MatchOptions::default(),
            renderer: None,
            postcmds: true,
            imds_timeout: Duration::from_secs(constants::IMDS_TIMEOUT_SECS),
            events_file: None,
        }
    }
}

impl Settings {
    /// Defaults overridden by the configuration file at `path`, if any.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(config) = HotplugConfig::load(path)? {
            settings.merge_config(config)?;
        }
        Ok(settings)
    }

    pub fn merge_config(&mut self, other: HotplugConfig) -> Result<()> {
        if let Some(debug) = other.debug {
            self.debug = debug;
        }
        if let Some(cache_path) = other.cache_path {
            self.cache_path = cache_path;
        }
        if let Some(sys_root) = other.sys_root {
            self.sys_root = sys_root;
        }
        if let Some(target) = other.target {
            self.target = target;
        }
        if let Some(retry_schedule) = other.retry_schedule {
            self.retry_schedule = RetrySchedule::from_secs(&retry_schedule)?;
        }
        if let Some(change_policy) = other.change_policy {
            self.match_options.change_policy = change_policy;
        }
        if let Some(normalize_mac) = other.normalize_mac {
            self.match_options.normalize_mac = normalize_mac;
        }
        if other.renderer.is_some() {
            self.renderer = other.renderer;
        }
        if let Some(postcmds) = other.postcmds {
            self.postcmds = postcmds;
        }
        if let Some(imds_timeout) = other.imds_timeout {
            self.imds_timeout = Duration::from_secs(imds_timeout);
        }
        if let Some(events_file) = other.reporting.and_then(|r| r.events_file) {
            self.events_file = Some(events_file);
        }
        Ok(())
    }
}
