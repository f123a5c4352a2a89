//! Relay configuration.
//!
//! Loaded once at startup from a JSON, TOML or YAML file (chosen by
//! extension), then adjusted by `SHADOWBROKER_*` environment overrides.
//! The result is immutable for the life of the process.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/shadowbroker.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamEntry {
    pub addr: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub suffix: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Label used when no rule matches.
    pub default: String,
    pub rules: Vec<RouteRule>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default: "LOCAL".to_string(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// Directory for daily-rotated log files; stderr when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub addr: String,
    pub port: u16,
    pub upstreams: BTreeMap<String, UpstreamEntry>,
    /// Labels meaning "dial the destination directly".
    pub direct_labels: Vec<String>,
    pub routing: RoutingConfig,

    // Both unset by default: connects and transfers may block indefinitely.
    pub connect_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,

    /// Reject a chaining upstream that selects an auth method or answers
    /// CONNECT with a non-zero status.
    pub strict_upstream: bool,

    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1".to_string(),
            port: 1080,
            upstreams: BTreeMap::new(),
            direct_labels: vec!["LOCAL".to_string(), "DOMESTIC".to_string()],
            routing: RoutingConfig::default(),
            connect_timeout_secs: None,
            idle_timeout_secs: None,
            strict_upstream: false,
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Resolve the config path (first CLI argument, then `SHADOWBROKER_CONFIG`,
    /// then the default path), load it and apply env overrides. Call
    /// [`Config::validate`] once logging is up.
    pub fn load_default() -> Result<Self> {
        let explicit = std::env::args()
            .nth(1)
            .or_else(|| std::env::var("SHADOWBROKER_CONFIG").ok());
        let mut cfg = match explicit {
            Some(p) => Self::from_file(Path::new(&p))?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        Self::from_str_with_format(&text, &ext)
            .with_context(|| format!("parse config {}", path.display()))
    }

    /// Parse config text; `format` is a file extension (`json`, `toml`,
    /// `yaml`/`yml`). Unknown extensions are read as JSON.
    pub fn from_str_with_format(text: &str, format: &str) -> Result<Self> {
        let cfg = match format {
            "toml" => toml::from_str(text)?,
            "yaml" | "yml" => serde_yaml::from_str(text)?,
            _ => serde_json::from_str(text)?,
        };
        Ok(cfg)
    }

    /// Env overrides: SHADOWBROKER_ADDR, SHADOWBROKER_PORT, SHADOWBROKER_LOG_DIR
    pub fn apply_env(&mut self) {
        if let Ok(a) = std::env::var("SHADOWBROKER_ADDR") {
            self.addr = a;
        }
        if let Ok(p) = std::env::var("SHADOWBROKER_PORT") {
            match p.parse::<u16>() {
                Ok(n) => self.port = n,
                Err(_) => warn!(value = %p, "ignoring invalid SHADOWBROKER_PORT"),
            }
        }
        if let Ok(d) = std::env::var("SHADOWBROKER_LOG_DIR") {
            self.log.dir = Some(PathBuf::from(d));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.addr.trim().is_empty() {
            bail!("listen addr must not be empty");
        }
        for (label, up) in &self.upstreams {
            if up.port == 0 {
                bail!("upstream '{label}' has port 0");
            }
            if up.addr.trim().is_empty() {
                bail!("upstream '{label}' has an empty addr");
            }
        }
        // Unknown labels only fail the sessions that hit them.
        let rule_labels = self
            .routing
            .rules
            .iter()
            .map(|r| r.label.as_str())
            .chain(std::iter::once(self.routing.default.as_str()));
        for label in rule_labels {
            if !self.is_direct(label) && !self.upstreams.contains_key(label) {
                warn!(%label, "routing label names no upstream; matching sessions will fail");
            }
        }
        Ok(())
    }

    pub fn is_direct(&self, label: &str) -> bool {
        self.direct_labels.iter().any(|d| d == label)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}
