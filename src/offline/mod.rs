//! Glossary access for disconnected clients.
//!
//! A snapshot is fetched from a [`SnapshotSource`], written to a primary
//! SQLite store and a JSON fallback, and consulted for offline lookups.
//! A snapshot whose checksum no longer matches its terms is discarded
//! as a whole. Each stored snapshot is verified before its first lookup.

pub mod store;

pub use store::{
    FileOfflineStore, OfflineSnapshot, OfflineStore, SnapshotHeader, SqliteOfflineStore,
    OFFLINE_TTL,
};

use crate::clock::SharedClock;
use crate::error::OfflineError;
use crate::glossary::{GlossaryService, GlossarySnapshot};
use crate::language::Language;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const PRIMARY_STORE_FILE: &str = "glossary_offline.db";
pub const FALLBACK_STORE_FILE: &str = "glossary_offline.json";

/// Where offline snapshots come from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<GlossarySnapshot, OfflineError>;
}

#[async_trait]
impl SnapshotSource for GlossaryService {
    async fn fetch_snapshot(&self) -> Result<GlossarySnapshot, OfflineError> {
        self.export_for_offline_sync()
            .await
            .map_err(|e| OfflineError::Fetch(e.to_string()))
    }
}

/// `GET <base>/api/glossary/export` on a running service.
pub struct HttpSnapshotSource {
    http: reqwest::Client,
    url: String,
}

impl HttpSnapshotSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OfflineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OfflineError::Fetch(e.to_string()))?;
        Ok(Self {
            http,
            url: format!("{}/api/glossary/export", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch_snapshot(&self) -> Result<GlossarySnapshot, OfflineError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| OfflineError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OfflineError::Fetch(format!("{}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| OfflineError::Fetch(format!("invalid snapshot: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub has_data: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub term_count: usize,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreTrust {
    Verified,
    Empty,
    Corrupt,
}

const PRIMARY: usize = 0;
const FALLBACK: usize = 1;

pub struct OfflineSyncAgent {
    source: Arc<dyn SnapshotSource>,
    primary: Box<dyn OfflineStore>,
    fallback: Box<dyn OfflineStore>,
    clock: SharedClock,
    /// Header of the snapshot last verified in each store.
    verified: Mutex<[Option<SnapshotHeader>; 2]>,
}

impl OfflineSyncAgent {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        primary: Box<dyn OfflineStore>,
        fallback: Box<dyn OfflineStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            source,
            primary,
            fallback,
            clock,
            verified: Mutex::new([None, None]),
        }
    }

    /// Agent with both stores under `dir`.
    pub async fn open(
        source: Arc<dyn SnapshotSource>,
        dir: &Path,
        clock: SharedClock,
    ) -> Result<Self, OfflineError> {
        tokio::fs::create_dir_all(dir).await?;
        let primary = SqliteOfflineStore::open(&dir.join(PRIMARY_STORE_FILE)).await?;
        let fallback = FileOfflineStore::new(dir.join(FALLBACK_STORE_FILE));
        Ok(Self::new(source, Box::new(primary), Box::new(fallback), clock))
    }

    /// Fetch a fresh snapshot and replace both local copies. If the fetch
    /// fails, an existing valid fallback copy is returned instead.
    pub async fn download_glossary_for_offline_sync(&self) -> Result<OfflineSnapshot, OfflineError> {
        let export = match self.source.fetch_snapshot().await {
            Ok(export) if export.verify() => export,
            Ok(_) => {
                return self
                    .existing_or(OfflineError::Fetch("downloaded snapshot failed checksum".into()))
                    .await
            }
            Err(e) => return self.existing_or(e).await,
        };

        let snapshot = OfflineSnapshot::from_export(export, self.clock.now_millis());
        let primary = self.primary.save(&snapshot).await;
        let fallback = self.fallback.save(&snapshot).await;
        match (primary, fallback) {
            (Err(e), Err(_)) => return Err(e),
            (Err(e), Ok(())) => warn!("Failed to write primary offline store: {}", e),
            (Ok(()), Err(e)) => warn!("Failed to write fallback offline store: {}", e),
            (Ok(()), Ok(())) => {}
        }

        info!(
            terms = snapshot.terms.len(),
            checksum = %snapshot.checksum,
            "✓ Downloaded glossary for offline use"
        );
        Ok(snapshot)
    }

    async fn existing_or(&self, err: OfflineError) -> Result<OfflineSnapshot, OfflineError> {
        warn!("Glossary download failed: {}", err);
        match self.fallback.load().await {
            Ok(Some(existing)) if existing.verify() => {
                info!("Using previously downloaded glossary");
                Ok(existing)
            }
            _ => Err(err),
        }
    }

    /// Glossary translation of `text`, or `None` when no local snapshot
    /// has it. Nothing is ever fabricated offline.
    pub async fn translate_offline(&self, text: &str, language: Language) -> Option<String> {
        if text.trim().is_empty() {
            return None;
        }
        let now = self.clock.now_millis();
        for (slot, store, name) in [
            (PRIMARY, &self.primary, "primary"),
            (FALLBACK, &self.fallback, "fallback"),
        ] {
            match self.check_store(slot, &**store).await {
                StoreTrust::Verified => {}
                StoreTrust::Empty => continue,
                StoreTrust::Corrupt => {
                    warn!(store = name, "Offline glossary failed integrity check, discarding");
                    if let Err(e) = self.clear_offline_data().await {
                        warn!("Failed to clear offline glossary: {}", e);
                    }
                    return None;
                }
            }
            match store.lookup(text, language, now).await {
                Ok(Some(found)) => return Some(found),
                Ok(None) => {}
                Err(e) => warn!(store = name, "Offline lookup failed: {}", e),
            }
        }
        None
    }

    /// Verify the snapshot in `store` unless this exact snapshot already
    /// passed. Unreadable stores count as corrupt.
    async fn check_store(&self, slot: usize, store: &dyn OfflineStore) -> StoreTrust {
        let header = match store.header().await {
            Ok(Some(header)) => header,
            Ok(None) => return StoreTrust::Empty,
            Err(_) => return StoreTrust::Corrupt,
        };
        let known = self.verified.lock()[slot].as_ref() == Some(&header);
        if known {
            return StoreTrust::Verified;
        }
        match store.load().await {
            Ok(Some(snapshot)) if snapshot.verify() => {
                self.verified.lock()[slot] = Some(snapshot.header());
                StoreTrust::Verified
            }
            Ok(None) => StoreTrust::Empty,
            Ok(Some(_)) | Err(_) => StoreTrust::Corrupt,
        }
    }

    /// True when every stored snapshot matches its checksum. On mismatch all
    /// local data is discarded so the next `initialize` downloads again.
    pub async fn validate_glossary_checksum(&self) -> bool {
        let mut found = false;
        for store in [&self.primary, &self.fallback] {
            match store.load().await {
                Ok(Some(snapshot)) if snapshot.verify() => found = true,
                Ok(None) => {}
                Ok(Some(_)) | Err(_) => {
                    warn!("Offline glossary failed integrity check, discarding");
                    if let Err(e) = self.clear_offline_data().await {
                        warn!("Failed to clear offline glossary: {}", e);
                    }
                    return false;
                }
            }
        }
        found
    }

    pub async fn clear_offline_data(&self) -> Result<(), OfflineError> {
        *self.verified.lock() = [None, None];
        self.primary.clear().await?;
        self.fallback.clear().await?;
        info!("Cleared offline glossary");
        Ok(())
    }

    pub async fn sync_status(&self) -> SyncStatus {
        let snapshot = match self.fallback.load().await {
            Ok(Some(snapshot)) => Some(snapshot),
            _ => self.primary.load().await.ok().flatten(),
        };
        let now = self.clock.now_millis();
        match snapshot {
            Some(s) => SyncStatus {
                has_data: true,
                last_sync: DateTime::from_timestamp_millis(s.last_sync),
                expires_at: DateTime::from_timestamp_millis(s.expires_at),
                expired: s.is_expired(now),
                term_count: s.terms.len(),
                checksum: Some(s.checksum),
            },
            None => SyncStatus {
                has_data: false,
                last_sync: None,
                expires_at: None,
                expired: false,
                term_count: 0,
                checksum: None,
            },
        }
    }

    /// Make sure a usable snapshot is present: download on first run, after
    /// expiry, or when the stored copy fails its integrity check.
    pub async fn initialize(&self) -> Result<SyncStatus, OfflineError> {
        let status = self.sync_status().await;
        if !status.has_data {
            info!("No offline glossary yet, downloading");
            self.download_glossary_for_offline_sync().await?;
        } else if status.expired {
            info!("Offline glossary expired, downloading");
            self.download_glossary_for_offline_sync().await?;
        } else if !self.validate_glossary_checksum().await {
            info!("Offline glossary invalid, downloading");
            self.download_glossary_for_offline_sync().await?;
        } else {
            info!(terms = status.term_count, "Using cached offline glossary");
        }
        Ok(self.sync_status().await)
    }
}
