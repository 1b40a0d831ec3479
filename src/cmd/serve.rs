//! HTTP server command: `pploy serve`.

use std::path::Path;

use anyhow::{Context, Result};
use pploy::config::{HumanDuration, PployConfig};
use pploy::workdir::Workdir;

/// Flags that win over both the config file and the environment.
#[derive(Debug, Default, Clone)]
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub prefix: Option<String>,
    pub lock: Option<HumanDuration>,
    pub log_max: Option<usize>,
    pub log_json: bool,
    pub dev: bool,
}

impl ServeOverrides {
    fn apply(&self, config: &mut PployConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(prefix) = &self.prefix {
            config.server.path_prefix = normalize_prefix(prefix);
        }
        if let Some(lock) = self.lock {
            config.locks.duration = lock;
        }
        if let Some(max) = self.log_max {
            config.logs.max_generations = max;
        }
        if self.dev {
            config.server.dev = true;
        }
    }
}

/// `pploy` and `/pploy` both mean `/pploy/`.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

/// Resolve the effective configuration for `workdir`.
pub fn effective_config(workdir: &Path, overrides: &ServeOverrides) -> Result<PployConfig> {
    // A missing .env is the common case
    let _ = dotenvy::dotenv();

    let mut config = PployConfig::load_or_default(workdir)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

pub async fn cmd_serve(workdir: &Path, overrides: ServeOverrides) -> Result<()> {
    let config = effective_config(workdir, &overrides)?;
    let _log_guard = pploy::logging::init_tracing(overrides.log_json, config.server.log_dir.as_deref())?;

    let workdir = Workdir::init(workdir)
        .with_context(|| format!("Failed to prepare work directory {}", workdir.display()))?;
    tracing::info!(
        lock_duration = %config.locks.duration,
        max_generations = config.logs.max_generations,
        max_concurrent = config.runner.max_concurrent,
        "configuration loaded"
    );

    pploy::web::start_server(config, workdir).await
}
