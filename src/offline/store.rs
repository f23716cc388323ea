//! Client-side persistence for glossary snapshots.
//!
//! The primary store is a SQLite file with one row per term, indexed for
//! lookup by language. The fallback is a single JSON document. Both hold the
//! checksum from the export so integrity can be re-verified after reading.

use crate::error::{OfflineError, StoreError};
use crate::glossary::{checksum, GlossarySnapshot, GlossaryTerm};
use crate::language::Language;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const OFFLINE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A downloaded glossary export plus its local validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineSnapshot {
    pub version: u32,
    pub checksum: String,
    pub terms: Vec<GlossaryTerm>,
    /// Epoch milliseconds
    pub last_sync: i64,
    /// Epoch milliseconds
    pub expires_at: i64,
}

/// Identifies one stored snapshot without reading its terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub checksum: String,
    pub last_sync: i64,
}

impl OfflineSnapshot {
    pub fn header(&self) -> SnapshotHeader {
        SnapshotHeader {
            checksum: self.checksum.clone(),
            last_sync: self.last_sync,
        }
    }

    pub fn from_export(export: GlossarySnapshot, now_ms: i64) -> Self {
        Self {
            version: export.version,
            checksum: export.checksum,
            terms: export.terms,
            last_sync: now_ms,
            expires_at: now_ms + OFFLINE_TTL.as_millis() as i64,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    /// Recompute the checksum over the stored terms and compare.
    pub fn verify(&self) -> bool {
        checksum::checksum_json(&self.terms)
            .map(|c| c == self.checksum)
            .unwrap_or(false)
    }

    /// Case-insensitive match on the source text.
    pub fn lookup(&self, text: &str, language: Language) -> Option<&GlossaryTerm> {
        let needle = text.trim().to_lowercase();
        self.terms
            .iter()
            .find(|t| t.language == language && t.source_text.to_lowercase() == needle)
    }
}

#[async_trait]
pub trait OfflineStore: Send + Sync {
    /// Replace whatever is stored with `snapshot`.
    async fn save(&self, snapshot: &OfflineSnapshot) -> Result<(), OfflineError>;

    async fn load(&self) -> Result<Option<OfflineSnapshot>, OfflineError>;

    async fn header(&self) -> Result<Option<SnapshotHeader>, OfflineError> {
        Ok(self.load().await?.map(|s| s.header()))
    }

    /// Translation of `text`, ignoring expired snapshots.
    async fn lookup(
        &self,
        text: &str,
        language: Language,
        now_ms: i64,
    ) -> Result<Option<String>, OfflineError>;

    async fn clear(&self) -> Result<(), OfflineError>;
}

// ==================== SQLite store ====================

const OFFLINE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS offline_meta (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        version INTEGER NOT NULL,
        checksum TEXT NOT NULL,
        last_sync INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS offline_terms (
        position INTEGER PRIMARY KEY,
        language TEXT NOT NULL,
        source_text TEXT NOT NULL,
        source_lower TEXT NOT NULL,
        translated_text TEXT NOT NULL,
        priority INTEGER NOT NULL,
        category TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_offline_terms_lookup
        ON offline_terms (language, source_lower)",
];

#[derive(Debug, FromRow)]
struct MetaRow {
    version: i64,
    checksum: String,
    last_sync: i64,
    expires_at: i64,
}

#[derive(Debug, FromRow)]
struct TermRow {
    language: String,
    source_text: String,
    translated_text: String,
    priority: i64,
    category: String,
}

impl TermRow {
    fn into_term(self) -> Result<GlossaryTerm, OfflineError> {
        let invalid = |e: String| OfflineError::Store(StoreError::InvalidValue(e));
        Ok(GlossaryTerm {
            language: Language::from_code(&self.language).map_err(|e| invalid(e.to_string()))?,
            category: self.category.parse().map_err(|e: crate::error::GlossaryError| invalid(e.to_string()))?,
            source_text: self.source_text,
            translated_text: self.translated_text,
            priority: self.priority,
        })
    }
}

pub struct SqliteOfflineStore {
    pool: SqlitePool,
}

impl SqliteOfflineStore {
    pub async fn open(path: &Path) -> Result<Self, OfflineError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn in_memory() -> Result<Self, OfflineError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, OfflineError> {
        for statement in OFFLINE_SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl OfflineStore for SqliteOfflineStore {
    async fn save(&self, snapshot: &OfflineSnapshot) -> Result<(), OfflineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM offline_terms")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM offline_meta")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO offline_meta (id, version, checksum, last_sync, expires_at)
             VALUES (1, ?, ?, ?, ?)",
        )
        .bind(snapshot.version as i64)
        .bind(&snapshot.checksum)
        .bind(snapshot.last_sync)
        .bind(snapshot.expires_at)
        .execute(&mut *tx)
        .await?;

        for (position, term) in snapshot.terms.iter().enumerate() {
            sqlx::query(
                "INSERT INTO offline_terms
                    (position, language, source_text, source_lower, translated_text, priority, category)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(position as i64)
            .bind(term.language.code())
            .bind(&term.source_text)
            .bind(term.source_text.trim().to_lowercase())
            .bind(&term.translated_text)
            .bind(term.priority)
            .bind(term.category.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(terms = snapshot.terms.len(), "Stored offline glossary in SQLite");
        Ok(())
    }

    async fn load(&self) -> Result<Option<OfflineSnapshot>, OfflineError> {
        let Some(meta) = sqlx::query_as::<_, MetaRow>(
            "SELECT version, checksum, last_sync, expires_at FROM offline_meta WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, TermRow>(
            "SELECT language, source_text, translated_text, priority, category
             FROM offline_terms ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await?;
        let terms = rows
            .into_iter()
            .map(TermRow::into_term)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(OfflineSnapshot {
            version: meta.version as u32,
            checksum: meta.checksum,
            terms,
            last_sync: meta.last_sync,
            expires_at: meta.expires_at,
        }))
    }

    async fn header(&self) -> Result<Option<SnapshotHeader>, OfflineError> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT checksum, last_sync FROM offline_meta WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(checksum, last_sync)| SnapshotHeader {
            checksum,
            last_sync,
        }))
    }

    async fn lookup(
        &self,
        text: &str,
        language: Language,
        now_ms: i64,
    ) -> Result<Option<String>, OfflineError> {
        let translated: Option<String> = sqlx::query_scalar(
            "SELECT t.translated_text
             FROM offline_terms t, offline_meta m
             WHERE m.id = 1 AND m.expires_at >= ?
               AND t.language = ? AND t.source_lower = ?
             ORDER BY t.priority, t.position
             LIMIT 1",
        )
        .bind(now_ms)
        .bind(language.code())
        .bind(text.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(translated)
    }

    async fn clear(&self) -> Result<(), OfflineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM offline_terms")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM offline_meta")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

// ==================== JSON file store ====================

pub struct FileOfflineStore {
    path: PathBuf,
}

impl FileOfflineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OfflineStore for FileOfflineStore {
    async fn save(&self, snapshot: &OfflineSnapshot) -> Result<(), OfflineError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(snapshot)?;
        // Write then rename so readers never see a half-written file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "Stored offline glossary fallback");
        Ok(())
    }

    async fn load(&self) -> Result<Option<OfflineSnapshot>, OfflineError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn lookup(
        &self,
        text: &str,
        language: Language,
        now_ms: i64,
    ) -> Result<Option<String>, OfflineError> {
        Ok(self
            .load()
            .await?
            .filter(|s| !s.is_expired(now_ms))
            .and_then(|s| s.lookup(text, language).map(|t| t.translated_text.clone())))
    }

    async fn clear(&self) -> Result<(), OfflineError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glossary::TermCategory;
    use tempfile::TempDir;

    const NOW: i64 = 1_700_000_000_000;

    fn term(source: &str, translated: &str, language: Language) -> GlossaryTerm {
        GlossaryTerm {
            source_text: source.to_string(),
            translated_text: translated.to_string(),
            language,
            priority: 100,
            category: TermCategory::Staging,
        }
    }

    fn snapshot() -> OfflineSnapshot {
        let export = GlossarySnapshot::new(vec![
            term("Stage", "Palco", Language::PORTUGUESE),
            term("Truss", "Treliça", Language::PORTUGUESE),
            term("Stage", "Escenario", Language::SPANISH),
        ])
        .unwrap();
        OfflineSnapshot::from_export(export, NOW)
    }

    // ==================== Snapshot Tests ====================

    #[test]
    fn test_snapshot_expiry_and_verify() {
        let snap = snapshot();
        assert_eq!(snap.expires_at - snap.last_sync, 24 * 60 * 60 * 1000);
        assert!(!snap.is_expired(NOW));
        assert!(snap.is_expired(snap.expires_at + 1));
        assert!(snap.verify());

        let mut tampered = snap.clone();
        tampered.terms[0].translated_text = "Palcx".into();
        assert!(!tampered.verify());
    }

    #[test]
    fn test_snapshot_lookup_case_insensitive() {
        let snap = snapshot();
        assert_eq!(
            snap.lookup("STAGE", Language::SPANISH).unwrap().translated_text,
            "Escenario"
        );
        assert!(snap.lookup("Stage", Language::FRENCH).is_none());
    }

    // ==================== SQLite Store Tests ====================

    #[tokio::test]
    async fn test_sqlite_round_trip_preserves_checksum() {
        let store = SqliteOfflineStore::in_memory().await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        store.save(&snapshot()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot());
        assert!(loaded.verify());
    }

    #[tokio::test]
    async fn test_sqlite_lookup() {
        let store = SqliteOfflineStore::in_memory().await.unwrap();
        store.save(&snapshot()).await.unwrap();

        assert_eq!(
            store
                .lookup(" truss ", Language::PORTUGUESE, NOW)
                .await
                .unwrap()
                .as_deref(),
            Some("Treliça")
        );
        let expired = NOW + OFFLINE_TTL.as_millis() as i64 + 1;
        assert!(store
            .lookup("Truss", Language::PORTUGUESE, expired)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_sqlite_corruption_detected() {
        let store = SqliteOfflineStore::in_memory().await.unwrap();
        store.save(&snapshot()).await.unwrap();
        sqlx::query("UPDATE offline_terms SET translated_text = 'Palcx' WHERE position = 0")
            .execute(store.pool())
            .await
            .unwrap();

        assert!(!store.load().await.unwrap().unwrap().verify());
    }

    #[tokio::test]
    async fn test_sqlite_file_reopen_and_clear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offline.db");
        {
            let store = SqliteOfflineStore::open(&path).await.unwrap();
            store.save(&snapshot()).await.unwrap();
            store.pool().close().await;
        }
        let store = SqliteOfflineStore::open(&path).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().terms.len(), 3);

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    // ==================== File Store Tests ====================

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileOfflineStore::new(dir.path().join("nested").join("glossary.json"));
        assert!(store.load().await.unwrap().is_none());

        store.save(&snapshot()).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap(), snapshot());
        assert_eq!(
            store
                .lookup("stage", Language::PORTUGUESE, NOW)
                .await
                .unwrap()
                .as_deref(),
            Some("Palco")
        );

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(!store.path().exists());
    }
}
