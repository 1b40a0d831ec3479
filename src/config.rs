//! Configuration for pploy.
//!
//! Settings are layered: `<workdir>/pploy.toml` → `PPLOY_*` environment
//! variables (a `.env` file is honoured) → command line flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 1323
//! path_prefix = "/pploy/"
//! log_dir = "/var/log/pploy"
//!
//! [locks]
//! duration = "10m"
//!
//! [logs]
//! max_generations = 20
//! head_bytes = 10000
//!
//! [runner]
//! max_concurrent = 8
//!
//! [git]
//! clone_depth = 20
//! recent_commits = 20
//!
//! [users]
//! defaults = ["foo", "bar"]
//!
//! [users.ldap]
//! host = "ldap.example.com"
//! base_dn = "ou=people,dc=example,dc=com"
//! cache_ttl = "1h"
//!
//! [slack]
//! webhook_url = "https://hooks.slack.com/services/..."
//! lock_gained = "{{user}} locked {{project}}"
//! deployed = "{{user}} deployed {{project}} to {{env}}"
//!
//! [datadog]
//! api_key = "..."
//! app_key = "..."
//! deployed = "{{project}} deployed to {{env}} by {{user}}"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "pploy.toml";

/// Upper bound for `locks.duration`.
pub const MAX_LOCK_DURATION: HumanDuration = HumanDuration::from_secs(30 * 24 * 60 * 60);

/// A duration written the way operators type it: `90s`, `10m`, `1h` or a
/// bare number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HumanDuration(pub Duration);

impl HumanDuration {
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for HumanDuration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, multiplier) = match s.char_indices().last() {
            Some((idx, 's')) => (&s[..idx], 1),
            Some((idx, 'm')) => (&s[..idx], 60),
            Some((idx, 'h')) => (&s[..idx], 60 * 60),
            Some(_) => (s, 1),
            None => anyhow::bail!("Empty duration"),
        };
        let value: u64 = digits
            .trim()
            .parse()
            .with_context(|| format!("Invalid duration '{}'. Use e.g. 90s, 10m or 1h", s))?;
        let secs = value
            .checked_mul(multiplier)
            .with_context(|| format!("Duration '{}' is too large", s))?;
        Ok(Self(Duration::from_secs(secs)))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs != 0 && secs % 3600 == 0 {
            write!(f, "{}h", secs / 3600)
        } else if secs != 0 && secs % 60 == 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Path prefix when proxied, e.g. `/pploy/`. Must start and end with `/`.
    pub path_prefix: String,
    /// Write the server's own log to daily files in this directory.
    pub log_dir: Option<PathBuf>,
    /// Permissive CORS, for a UI served from another origin during development.
    pub dev: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1323,
            path_prefix: "/".to_string(),
            log_dir: None,
            dev: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocksConfig {
    /// How long a gained lock lasts, and how much an extend adds.
    pub duration: HumanDuration,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            duration: HumanDuration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Number of previous deploy logs kept next to the current one.
    pub max_generations: usize,
    /// Bytes returned when a log is read without `full=1`.
    pub head_bytes: u64,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            max_generations: 20,
            head_bytes: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Upper bound on checkouts and deploys running at the same time.
    pub max_concurrent: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { max_concurrent: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub clone_depth: u32,
    pub recent_commits: usize,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            clone_depth: 20,
            recent_commits: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    pub host: String,
    #[serde(default = "default_ldap_port")]
    pub port: u16,
    pub base_dn: String,
    #[serde(default = "default_ldap_cache_ttl")]
    pub cache_ttl: HumanDuration,
}

fn default_ldap_port() -> u16 {
    389
}

fn default_ldap_cache_ttl() -> HumanDuration {
    HumanDuration::from_secs(60 * 60)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersConfig {
    /// Shown when the directory is not configured or returns nobody.
    pub defaults: Vec<String>,
    pub ldap: Option<LdapConfig>,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            defaults: vec!["foo".to_string(), "bar".to_string()],
            ldap: None,
        }
    }
}

/// Message templates per notification kind. An empty template disables the
/// notification. Placeholders: `{{project}}`, `{{user}}`, `{{env}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplates {
    pub lock_gained: String,
    pub lock_released: String,
    pub lock_extended: String,
    pub deployed: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub webhook_url: Option<String>,
    #[serde(flatten)]
    pub messages: MessageTemplates,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatadogConfig {
    pub api_key: Option<String>,
    pub app_key: Option<String>,
    pub site: String,
    #[serde(flatten)]
    pub messages: MessageTemplates,
}

impl Default for DatadogConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            app_key: None,
            site: "datadoghq.com".to_string(),
            messages: MessageTemplates::default(),
        }
    }
}

/// Root configuration, the parsed form of `pploy.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PployConfig {
    pub server: ServerSection,
    pub locks: LocksConfig,
    pub logs: LogsConfig,
    pub runner: RunnerConfig,
    pub git: GitConfig,
    pub users: UsersConfig,
    pub slack: SlackConfig,
    pub datadog: DatadogConfig,
}

impl PployConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse pploy.toml")
    }

    /// Load `<workdir>/pploy.toml`, or the defaults when it does not exist.
    pub fn load_or_default(workdir: &Path) -> Result<Self> {
        let path = workdir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize pploy.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Apply `PPLOY_*` overrides. `lookup` is `std::env::var(..).ok()` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("PPLOY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PPLOY_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid PPLOY_PORT '{}'", port))?;
        }
        if let Some(prefix) = lookup("PPLOY_PATH_PREFIX") {
            self.server.path_prefix = prefix;
        }
        if let Some(dir) = lookup("PPLOY_LOG_DIR") {
            self.server.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(duration) = lookup("PPLOY_LOCK_DURATION") {
            self.locks.duration = duration.parse()?;
        }
        if let Some(max) = lookup("PPLOY_LOG_MAX") {
            self.logs.max_generations = max
                .parse()
                .with_context(|| format!("Invalid PPLOY_LOG_MAX '{}'", max))?;
        }
        if let Some(url) = lookup("PPLOY_SLACK_WEBHOOK_URL") {
            self.slack.webhook_url = Some(url);
        }
        if let Some(key) = lookup("PPLOY_DATADOG_API_KEY") {
            self.datadog.api_key = Some(key);
        }
        if let Some(key) = lookup("PPLOY_DATADOG_APP_KEY") {
            self.datadog.app_key = Some(key);
        }
        Ok(())
    }

    /// Check invariants the rest of the crate relies on.
    pub fn validate(&self) -> Result<()> {
        let prefix = &self.server.path_prefix;
        if !prefix.starts_with('/') || !prefix.ends_with('/') {
            anyhow::bail!("path_prefix must start and end with '/', got '{}'", prefix);
        }
        if self.locks.duration.as_duration().is_zero() {
            anyhow::bail!("locks.duration must be greater than zero");
        }
        if self.locks.duration > MAX_LOCK_DURATION {
            anyhow::bail!(
                "locks.duration must be at most {}, got {}",
                MAX_LOCK_DURATION,
                self.locks.duration
            );
        }
        if self.runner.max_concurrent == 0 {
            anyhow::bail!("runner.max_concurrent must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let config = PployConfig::default();
        assert_eq!(config.server.port, 1323);
        assert_eq!(config.server.path_prefix, "/");
        assert_eq!(config.locks.duration.as_duration(), Duration::from_secs(600));
        assert_eq!(config.logs.max_generations, 20);
        assert_eq!(config.logs.head_bytes, 10_000);
        assert_eq!(config.users.defaults, vec!["foo", "bar"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn human_duration_parses_units() {
        assert_eq!("90s".parse::<HumanDuration>().unwrap().0.as_secs(), 90);
        assert_eq!("10m".parse::<HumanDuration>().unwrap().0.as_secs(), 600);
        assert_eq!("2h".parse::<HumanDuration>().unwrap().0.as_secs(), 7200);
        assert_eq!("45".parse::<HumanDuration>().unwrap().0.as_secs(), 45);
        assert!("ten minutes".parse::<HumanDuration>().is_err());
        assert!("".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn human_duration_displays_largest_whole_unit() {
        assert_eq!(HumanDuration::from_secs(600).to_string(), "10m");
        assert_eq!(HumanDuration::from_secs(3600).to_string(), "1h");
        assert_eq!(HumanDuration::from_secs(61).to_string(), "61s");
        assert_eq!(HumanDuration::from_secs(0).to_string(), "0s");
    }

    #[test]
    fn parse_partial_file_keeps_other_defaults() {
        let config = PployConfig::parse(
            r#"
[locks]
duration = "20m"

[slack]
webhook_url = "https://hooks.example/abc"
deployed = "{{user}} deployed {{project}}"
"#,
        )
        .unwrap();
        assert_eq!(config.locks.duration.as_duration().as_secs(), 1200);
        assert_eq!(config.slack.webhook_url.as_deref(), Some("https://hooks.example/abc"));
        assert_eq!(config.slack.messages.deployed, "{{user}} deployed {{project}}");
        assert!(config.slack.messages.lock_gained.is_empty());
        assert_eq!(config.server.port, 1323);
        assert_eq!(config.datadog.site, "datadoghq.com");
    }

    #[test]
    fn parse_ldap_section_with_defaults() {
        let config = PployConfig::parse(
            r#"
[users.ldap]
host = "ldap.local"
base_dn = "dc=example,dc=com"
"#,
        )
        .unwrap();
        let ldap = config.users.ldap.unwrap();
        assert_eq!(ldap.port, 389);
        assert_eq!(ldap.cache_ttl.as_duration().as_secs(), 3600);
    }

    #[test]
    fn invalid_duration_is_a_parse_error() {
        let err = PployConfig::parse("[locks]\nduration = \"soon\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("soon"));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = PployConfig::default();
        let env: HashMap<&str, &str> = [
            ("PPLOY_PORT", "8080"),
            ("PPLOY_LOCK_DURATION", "5m"),
            ("PPLOY_PATH_PREFIX", "/pploy/"),
            ("PPLOY_SLACK_WEBHOOK_URL", "https://hooks.example/x"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.locks.duration.as_duration().as_secs(), 300);
        assert_eq!(config.server.path_prefix, "/pploy/");
        assert_eq!(config.slack.webhook_url.as_deref(), Some("https://hooks.example/x"));
    }

    #[test]
    fn env_rejects_bad_port() {
        let mut config = PployConfig::default();
        let result = config.apply_env(|key| (key == "PPLOY_PORT").then(|| "http".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_prefix_without_slashes() {
        let mut config = PployConfig::default();
        config.server.path_prefix = "pploy".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn human_duration_rejects_overflow() {
        let err = "18446744073709551615h".parse::<HumanDuration>().unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert!(format!("{}s", u64::MAX).parse::<HumanDuration>().is_ok());
    }

    #[test]
    fn validate_bounds_lock_duration() {
        let mut config = PployConfig::default();
        config.locks.duration = MAX_LOCK_DURATION;
        assert!(config.validate().is_ok());

        config.locks.duration = "1000000h".parse().unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("locks.duration"));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = PployConfig::default();
        config.runner.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = PployConfig::default();
        config.locks.duration = HumanDuration::from_secs(1800);
        config.logs.max_generations = 5;
        config.save(&path).unwrap();

        let loaded = PployConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.locks.duration.as_duration().as_secs(), 1800);
        assert_eq!(loaded.logs.max_generations, 5);
    }

    #[test]
    fn load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = PployConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.server.port, 1323);
    }
}
