//! Provider API key resolution.
//!
//! Keys are looked up in priority order: the admin-managed
//! `api_configuration` table, then the `system_settings` table, then the
//! process environment. A key with an invalid format at one tier is skipped
//! and the next tier is tried. A resolved key is cached for five minutes.

use crate::clock::SharedClock;
use crate::db::Database;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

pub const PROVIDER_NAME: &str = "deepl";
pub const SETTINGS_CATEGORY: &str = "Integration";
pub const SETTINGS_KEY: &str = "DEEPL_API_KEY";
pub const CREDENTIAL_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Database,
    Settings,
    Environment,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub key: String,
    pub source: CredentialSource,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &mask(&self.key))
            .field("source", &self.source)
            .finish()
    }
}

fn mask(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    format!("{}…", visible)
}

/// 24 to 128 characters of ASCII letters, digits, `-` or `:`.
pub fn is_valid_key_format(key: &str) -> bool {
    (24..=128).contains(&key.len())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ':')
}

pub struct CredentialResolver {
    db: Database,
    env_key: Option<String>,
    clock: SharedClock,
    cached: Mutex<Option<(Credential, DateTime<Utc>)>>,
}

impl CredentialResolver {
    pub fn new(db: Database, env_key: Option<String>, clock: SharedClock) -> Self {
        Self {
            db,
            env_key,
            clock,
            cached: Mutex::new(None),
        }
    }

    /// Highest-priority valid key, or `None` when no tier has one.
    pub async fn resolve(&self) -> Option<Credential> {
        let now = self.clock.now();
        if let Some((credential, expires_at)) = self.cached.lock().as_ref() {
            if *expires_at > now {
                return Some(credential.clone());
            }
        }

        let credential = self.lookup().await?;
        let ttl = chrono::Duration::from_std(CREDENTIAL_CACHE_TTL).unwrap_or(chrono::Duration::zero());
        *self.cached.lock() = Some((credential.clone(), now + ttl));
        Some(credential)
    }

    async fn lookup(&self) -> Option<Credential> {
        match self.db.active_api_key(PROVIDER_NAME).await {
            Ok(Some(key)) if is_valid_key_format(&key) => {
                debug!("Using provider key from api_configuration");
                return Some(Credential {
                    key,
                    source: CredentialSource::Database,
                });
            }
            Ok(Some(_)) => warn!("Provider key in api_configuration has an invalid format"),
            Ok(None) => {}
            Err(e) => warn!("Failed to read api_configuration: {}", e),
        }

        match self.db.system_setting(SETTINGS_CATEGORY, SETTINGS_KEY).await {
            Ok(Some(key)) if is_valid_key_format(&key) => {
                debug!("Using provider key from system settings");
                return Some(Credential {
                    key,
                    source: CredentialSource::Settings,
                });
            }
            Ok(Some(_)) => warn!("Provider key in system settings has an invalid format"),
            Ok(None) => {}
            Err(e) => warn!("Failed to read system settings: {}", e),
        }

        match &self.env_key {
            Some(key) if is_valid_key_format(key) => Some(Credential {
                key: key.clone(),
                source: CredentialSource::Environment,
            }),
            Some(_) => {
                warn!("DEEPL_API_KEY has an invalid format");
                None
            }
            None => None,
        }
    }

    /// Forget the cached key so the next call re-reads every tier.
    pub fn reset(&self) {
        *self.cached.lock() = None;
    }
}
