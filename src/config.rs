//! File configuration.
//!
//! `config.toml` is read from `$XDG_CONFIG_HOME/mapcrawl/`, falling back to
//! `$HOME/.config/mapcrawl/`. Every key is optional; CLI flags are merged on
//! top before [`CrawlConfig::validate`] runs.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::classify::DEFAULT_SECONDARY_MARKER;
use crate::crawl::{MAX_WORKERS, PacingPolicy};
use crate::fetch::{BINARY_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS, HttpTimeouts, PAGE_TIMEOUT_SECS};
use crate::session::SettlePolicy;

/// Config directory name under the XDG config home.
pub const APP_DIR: &str = "mapcrawl";

/// Config file name.
pub const CONFIG_FILE: &str = "config.toml";

const MAX_TIMEOUT_SECS: u64 = 3600;
const MAX_DELAY_MS: u64 = 60_000;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("cannot parse config {path}: {source}")]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Parser error with line and column.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range or missing for the chosen strategy.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted key, e.g. `tree.workers`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Discovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Drive the cascading district/upazila form.
    #[default]
    Cascade,
    /// Walk a static directory listing tree.
    Tree,
}

/// Navigation session backend for the cascade strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Replay form postbacks over plain HTTP.
    #[default]
    Postback,
    /// Drive a headless Chromium (requires the `browser` feature).
    Browser,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlConfig {
    /// Discovery strategy.
    pub strategy: Strategy,
    /// Output root.
    pub output_dir: PathBuf,
    /// Default log verbosity (0 = info, 1 = debug, 2+ = trace).
    pub verbosity: u8,
    /// HTTP timeouts.
    pub http: HttpSection,
    /// Pacing delays.
    pub pacing: PacingSection,
    /// Cascade strategy settings.
    pub cascade: CascadeSection,
    /// Tree strategy settings.
    pub tree: TreeSection,
    /// Classification and category directories.
    pub classify: ClassifySection,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            output_dir: PathBuf::from("maps"),
            verbosity: 0,
            http: HttpSection::default(),
            pacing: PacingSection::default(),
            cascade: CascadeSection::default(),
            tree: TreeSection::default(),
            classify: ClassifySection::default(),
        }
    }
}

/// `[http]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    pub connect_timeout_secs: u64,
    pub page_timeout_secs: u64,
    pub binary_timeout_secs: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            page_timeout_secs: PAGE_TIMEOUT_SECS,
            binary_timeout_secs: BINARY_TIMEOUT_SECS,
        }
    }
}

/// `[pacing]`, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PacingSection {
    pub leaf_delay_ms: u64,
    pub district_delay_ms: u64,
    pub request_delay_ms: u64,
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            leaf_delay_ms: 1000,
            district_delay_ms: 2000,
            request_delay_ms: 250,
        }
    }
}

/// `[cascade]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CascadeSection {
    /// Page hosting the form. Required for the cascade strategy.
    pub page_url: Option<String>,
    pub district_field: String,
    pub upazila_field: String,
    /// Regex for resource URLs in rendered markup; derived from
    /// `resource_root` when unset.
    pub link_pattern: Option<String>,
    pub link_element_ids: Vec<String>,
    pub resource_root: String,
    pub session: SessionKind,
    pub settle_timeout_secs: u64,
    pub settle_poll_ms: u64,
}

impl Default for CascadeSection {
    fn default() -> Self {
        Self {
            page_url: None,
            district_field: "ddlDistrict".to_string(),
            upazila_field: "ddlUpazila".to_string(),
            link_pattern: None,
            link_element_ids: Vec::new(),
            resource_root: "UploadedDocument".to_string(),
            session: SessionKind::default(),
            settle_timeout_secs: 20,
            settle_poll_ms: 200,
        }
    }
}

/// `[tree]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TreeSection {
    /// Root of the listing tree. Required for the tree strategy.
    pub root_url: Option<String>,
    pub min_depth: usize,
    pub extensions: Vec<String>,
    pub workers: usize,
}

impl Default for TreeSection {
    fn default() -> Self {
        Self {
            root_url: None,
            min_depth: 4,
            extensions: ["jpg", "jpeg", "png", "gif", "pdf"]
                .map(String::from)
                .to_vec(),
            workers: 1,
        }
    }
}

/// `[classify]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifySection {
    pub secondary_marker: String,
    pub primary_dir: String,
    pub secondary_dir: String,
}

impl Default for ClassifySection {
    fn default() -> Self {
        Self {
            secondary_marker: DEFAULT_SECONDARY_MARKER.to_string(),
            primary_dir: "upazila".to_string(),
            secondary_dir: "road".to_string(),
        }
    }
}

impl CrawlConfig {
    /// Loads the config file.
    ///
    /// With `explicit` set the file must exist. Otherwise the default
    /// location is tried and a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`] for unreadable or
    /// malformed files.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_path() {
                Some(path) if path.is_file() => path,
                Some(path) => {
                    debug!(path = %path.display(), "no config file, using defaults");
                    return Ok(Self::default());
                }
                None => return Ok(Self::default()),
            },
        };
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Parses config text.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input or unknown keys.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Checks ranges and the URL required by the chosen strategy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("http.connect_timeout_secs", self.http.connect_timeout_secs),
            ("http.page_timeout_secs", self.http.page_timeout_secs),
            ("http.binary_timeout_secs", self.http.binary_timeout_secs),
            ("cascade.settle_timeout_secs", self.cascade.settle_timeout_secs),
        ] {
            if !(1..=MAX_TIMEOUT_SECS).contains(&value) {
                return Err(ConfigError::invalid(
                    field,
                    format!("{value} is outside 1..={MAX_TIMEOUT_SECS}"),
                ));
            }
        }
        for (field, value) in [
            ("pacing.leaf_delay_ms", self.pacing.leaf_delay_ms),
            ("pacing.district_delay_ms", self.pacing.district_delay_ms),
            ("pacing.request_delay_ms", self.pacing.request_delay_ms),
            ("cascade.settle_poll_ms", self.cascade.settle_poll_ms),
        ] {
            if value > MAX_DELAY_MS {
                return Err(ConfigError::invalid(
                    field,
                    format!("{value} is outside 0..={MAX_DELAY_MS}"),
                ));
            }
        }
        if self.cascade.settle_poll_ms == 0 {
            return Err(ConfigError::invalid("cascade.settle_poll_ms", "must be positive"));
        }
        if !(1..=MAX_WORKERS).contains(&self.tree.workers) {
            return Err(ConfigError::invalid(
                "tree.workers",
                format!("{} is outside 1..={MAX_WORKERS}", self.tree.workers),
            ));
        }
        if self.tree.extensions.iter().all(|e| e.trim_start_matches('.').is_empty()) {
            return Err(ConfigError::invalid("tree.extensions", "no extension allowed"));
        }
        if self.classify.secondary_marker.trim().is_empty() {
            return Err(ConfigError::invalid("classify.secondary_marker", "must not be empty"));
        }
        if self.classify.primary_dir == self.classify.secondary_dir {
            return Err(ConfigError::invalid(
                "classify.secondary_dir",
                "must differ from classify.primary_dir",
            ));
        }
        if let Some(pattern) = &self.cascade.link_pattern {
            regex::Regex::new(pattern)
                .map_err(|e| ConfigError::invalid("cascade.link_pattern", e.to_string()))?;
        }

        match self.strategy {
            Strategy::Cascade => {
                require_url("cascade.page_url", self.cascade.page_url.as_deref())?;
                if self.cascade.resource_root.trim_matches('/').is_empty() {
                    return Err(ConfigError::invalid("cascade.resource_root", "must not be empty"));
                }
            }
            Strategy::Tree => {
                require_url("tree.root_url", self.tree.root_url.as_deref())?;
            }
        }
        Ok(())
    }

    /// HTTP timeouts.
    #[must_use]
    pub fn timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            connect: Duration::from_secs(self.http.connect_timeout_secs),
            page: Duration::from_secs(self.http.page_timeout_secs),
            binary: Duration::from_secs(self.http.binary_timeout_secs),
        }
    }

    /// Pacing delays.
    #[must_use]
    pub fn pacing(&self) -> PacingPolicy {
        PacingPolicy {
            leaf_delay: Duration::from_millis(self.pacing.leaf_delay_ms),
            district_delay: Duration::from_millis(self.pacing.district_delay_ms),
            request_delay: Duration::from_millis(self.pacing.request_delay_ms),
        }
    }

    /// Browser settle policy.
    #[must_use]
    pub fn settle(&self) -> SettlePolicy {
        SettlePolicy {
            timeout: Duration::from_secs(self.cascade.settle_timeout_secs),
            poll: Duration::from_millis(self.cascade.settle_poll_ms),
        }
    }
}

/// Default config file location, if a config home can be determined.
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    let home = env::var_os("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            env::var_os("HOME")
                .filter(|dir| !dir.is_empty())
                .map(|home| PathBuf::from(home).join(".config"))
        })?;
    Some(home.join(APP_DIR).join(CONFIG_FILE))
}

fn require_url(field: &'static str, value: Option<&str>) -> Result<Url, ConfigError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::invalid(field, "required for this strategy"))?;
    let url = Url::parse(value).map_err(|e| ConfigError::invalid(field, format!("{value}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(field, format!("{value}: not an http(s) URL")));
    }
    Ok(url)
}
