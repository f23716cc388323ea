//! Two-tier translation cache.
//!
//! The memory tier is a process-local map with per-entry TTL. The durable
//! tier is the `translation_cache` table. Both are keyed by
//! `(fingerprint, language)` where the fingerprint is a BLAKE3 digest of
//! `"<source>:<lang>"`.

use crate::clock::SharedClock;
use crate::db::{CacheRow, CacheTableStats, Database, StoreResult};
use crate::error::StoreError;
use crate::language::Language;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Durable tier lifetime.
pub const DURABLE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
/// Memory tier lifetime for entries written by the translation client.
pub const MEMORY_TTL: Duration = Duration::from_secs(60 * 60);
/// Memory tier lifetime for entries warmed by the predictive pipeline.
pub const WARM_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub fn fingerprint(source_text: &str, language: Language) -> String {
    blake3::hash(format!("{}:{}", source_text, language.code()).as_bytes())
        .to_hex()
        .to_string()
}

/// What kind of content a cached translation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    ProductName,
    ProductDescription,
    CategoryName,
    CategoryDescription,
    UiString,
    #[default]
    General,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::ProductName => "product_name",
            ContentType::ProductDescription => "product_description",
            ContentType::CategoryName => "category_name",
            ContentType::CategoryDescription => "category_description",
            ContentType::UiString => "ui_string",
            ContentType::General => "general",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product_name" => Ok(ContentType::ProductName),
            "product_description" => Ok(ContentType::ProductDescription),
            "category_name" => Ok(ContentType::CategoryName),
            "category_description" => Ok(ContentType::CategoryDescription),
            "ui_string" => Ok(ContentType::UiString),
            "general" => Ok(ContentType::General),
            other => Err(StoreError::InvalidValue(format!(
                "unknown content type '{}'",
                other
            ))),
        }
    }
}

// ==================== Memory tier ====================

struct MemoryEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryCacheStats {
    pub entries: usize,
    pub expired: usize,
}

pub struct MemoryCache {
    entries: Mutex<HashMap<(String, Language), MemoryEntry>>,
    clock: SharedClock,
}

impl MemoryCache {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Returns the value if present and unexpired; expired entries are dropped.
    pub fn get(&self, fingerprint: &str, language: Language) -> Option<String> {
        let now = self.clock.now();
        let key = (fingerprint.to_string(), language);
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, fingerprint: &str, language: Language, value: String, ttl: Duration) {
        let expires_at = self.clock.now()
            + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        self.entries.lock().insert(
            (fingerprint.to_string(), language),
            MemoryEntry { value, expires_at },
        );
    }

    /// Drop expired entries. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn stats(&self) -> MemoryCacheStats {
        let now = self.clock.now();
        let entries = self.entries.lock();
        MemoryCacheStats {
            entries: entries.len(),
            expired: entries.values().filter(|e| e.expires_at <= now).count(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// ==================== Durable tier ====================

/// Result of a durable-tier lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum DurableLookup {
    Fresh(CacheRow),
    /// Expired but not yet swept; usable only as a fallback.
    Stale(CacheRow),
    Miss,
}

#[derive(Clone)]
pub struct DurableCache {
    db: Database,
    clock: SharedClock,
}

impl DurableCache {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    pub async fn lookup(&self, fingerprint: &str, language: Language) -> StoreResult<DurableLookup> {
        let now = self.clock.now_millis();
        Ok(
            match self
                .db
                .get_cached_translation(fingerprint, language.code())
                .await?
            {
                Some(row) if row.expires_at > now => DurableLookup::Fresh(row),
                Some(row) => DurableLookup::Stale(row),
                None => DurableLookup::Miss,
            },
        )
    }

    pub async fn store(
        &self,
        source_text: &str,
        language: Language,
        translated_text: &str,
        content_type: ContentType,
    ) -> StoreResult<()> {
        let now = self.clock.now_millis();
        let row = CacheRow {
            fingerprint: fingerprint(source_text, language),
            target_language: language.code().to_string(),
            source_text: source_text.to_string(),
            translated_text: translated_text.to_string(),
            content_type: content_type.as_str().to_string(),
            created_at: now,
            expires_at: now + DURABLE_TTL.as_millis() as i64,
        };
        self.db.put_cached_translation(&row).await
    }

    /// Delete expired rows. Returns the number removed.
    pub async fn sweep(&self) -> StoreResult<u64> {
        let removed = self.db.delete_expired_cache(self.clock.now_millis()).await?;
        if removed > 0 {
            debug!(removed, "Swept expired durable cache entries");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> StoreResult<CacheTableStats> {
        self.db.cache_table_stats(self.clock.now_millis()).await
    }
}
