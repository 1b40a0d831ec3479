//! Known user names for the lock form.
//!
//! With `[users.ldap]` configured the names come from `ldapsearch`
//! (`(cn=*)`, attribute `cn`) and are cached for `cache_ttl`. A failed query
//! keeps the previous list until the next attempt. The configured defaults
//! are used whenever the directory yields nobody.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::{LdapConfig, UsersConfig};

/// Somewhere user names can be fetched from.
#[async_trait]
pub trait UserSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<String>>;
}

/// Queries an LDAP server with the OpenLDAP `ldapsearch` client.
pub struct LdapSearch {
    host: String,
    port: u16,
    base_dn: String,
}

impl LdapSearch {
    pub fn new(config: &LdapConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            base_dn: config.base_dn.clone(),
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-x".to_string(),
            "-LLL".to_string(),
            "-H".to_string(),
            format!("ldap://{}:{}", self.host, self.port),
            "-b".to_string(),
            self.base_dn.clone(),
            "(cn=*)".to_string(),
            "cn".to_string(),
        ]
    }
}

#[async_trait]
impl UserSource for LdapSearch {
    async fn fetch(&self) -> Result<Vec<String>> {
        let output = Command::new("ldapsearch")
            .args(self.args())
            .output()
            .await
            .context("Failed to run ldapsearch")?;
        if !output.status.success() {
            anyhow::bail!(
                "ldapsearch exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(parse_ldapsearch_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Collect the `cn` values from LDIF output, unfolding continuation lines.
pub fn parse_ldapsearch_output(ldif: &str) -> Vec<String> {
    let mut logical: Vec<String> = Vec::new();
    for line in ldif.lines() {
        if let Some(continued) = line.strip_prefix(' ')
            && let Some(last) = logical.last_mut()
        {
            last.push_str(continued);
        } else {
            logical.push(line.to_string());
        }
    }

    logical
        .iter()
        .filter_map(|line| line.strip_prefix("cn: "))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

struct Cached {
    users: Vec<String>,
    next_refresh: Option<Instant>,
}

pub struct UserDirectory {
    defaults: Vec<String>,
    source: Option<Box<dyn UserSource>>,
    ttl: Duration,
    cache: Mutex<Cached>,
}

impl UserDirectory {
    pub fn new(defaults: Vec<String>, source: Option<Box<dyn UserSource>>, ttl: Duration) -> Self {
        Self {
            defaults,
            source,
            ttl,
            cache: Mutex::new(Cached {
                users: Vec::new(),
                next_refresh: None,
            }),
        }
    }

    pub fn from_config(config: &UsersConfig) -> Self {
        match &config.ldap {
            Some(ldap) if !ldap.host.is_empty() && !ldap.base_dn.is_empty() => Self::new(
                config.defaults.clone(),
                Some(Box::new(LdapSearch::new(ldap))),
                ldap.cache_ttl.as_duration(),
            ),
            _ => Self::new(config.defaults.clone(), None, Duration::ZERO),
        }
    }

    /// All known users. Never fails; falls back to the configured defaults.
    pub async fn all(&self) -> Vec<String> {
        let Some(source) = &self.source else {
            return self.defaults.clone();
        };

        let mut cache = self.cache.lock().await;
        let stale = cache.next_refresh.is_none_or(|at| Instant::now() >= at);
        if stale {
            match source.fetch().await {
                Ok(users) => {
                    tracing::debug!(count = users.len(), "user directory refreshed");
                    cache.users = users;
                    cache.next_refresh = Some(Instant::now() + self.ttl);
                }
                Err(e) => tracing::warn!("failed to refresh user directory: {:#}", e),
            }
        }

        if cache.users.is_empty() {
            self.defaults.clone()
        } else {
            cache.users.clone()
        }
    }
}
