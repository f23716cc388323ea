use crate::error::StoreError;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::str::FromStr;

pub type StoreResult<T> = Result<T, StoreError>;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS translation_cache (
        fingerprint TEXT NOT NULL,
        target_language TEXT NOT NULL,
        source_text TEXT NOT NULL,
        translated_text TEXT NOT NULL,
        content_type TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        PRIMARY KEY (fingerprint, target_language)
    )",
    "CREATE INDEX IF NOT EXISTS idx_translation_cache_expires
        ON translation_cache (expires_at)",
    "CREATE TABLE IF NOT EXISTS glossary_terms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_text TEXT NOT NULL,
        target_language TEXT NOT NULL,
        translated_text TEXT NOT NULL,
        priority INTEGER NOT NULL,
        category TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (source_text, target_language)
    )",
    "CREATE TABLE IF NOT EXISTS glossary_audit (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_text TEXT NOT NULL,
        target_language TEXT NOT NULL,
        old_translation TEXT,
        new_translation TEXT,
        changed_by TEXT NOT NULL,
        reason TEXT,
        changed_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_glossary_audit_source
        ON glossary_audit (source_text)",
    "CREATE TABLE IF NOT EXISTS translation_state (
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        status TEXT NOT NULL,
        translated_languages TEXT NOT NULL DEFAULT '[]',
        failed_languages TEXT NOT NULL DEFAULT '[]',
        cache_warmed INTEGER NOT NULL DEFAULT 0,
        ready_for_print INTEGER NOT NULL DEFAULT 0,
        print_ready_at INTEGER,
        source_name TEXT NOT NULL,
        source_description TEXT,
        last_error TEXT,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (entity_type, entity_id)
    )",
    "CREATE TABLE IF NOT EXISTS entity_translations (
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        language TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (entity_type, entity_id, language)
    )",
    "CREATE TABLE IF NOT EXISTS metrics_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        period_start INTEGER NOT NULL,
        period_end INTEGER NOT NULL,
        cache_hit_rate REAL NOT NULL,
        cache_miss_rate REAL NOT NULL,
        total_requests INTEGER NOT NULL,
        provider_latency_ms REAL NOT NULL,
        db_latency_ms REAL NOT NULL,
        memory_latency_ms REAL NOT NULL,
        failed_translations INTEGER NOT NULL,
        stale_serves INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_metrics_snapshots_period
        ON metrics_snapshots (period_end)",
    "CREATE TABLE IF NOT EXISTS api_configuration (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        provider TEXT NOT NULL,
        api_key TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS system_settings (
        category TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (category, key)
    )",
];

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CacheRow {
    pub fingerprint: String,
    pub target_language: String,
    pub source_text: String,
    pub translated_text: String,
    pub content_type: String,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheTableStats {
    pub total: i64,
    pub valid: i64,
    pub expired: i64,
    /// Valid entries per target language
    pub by_language: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct GlossaryTermRow {
    pub id: i64,
    pub source_text: String,
    pub target_language: String,
    pub translated_text: String,
    pub priority: i64,
    pub category: String,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Values written by a glossary upsert.
#[derive(Debug, Clone)]
pub struct GlossaryTermWrite<'a> {
    pub source_text: &'a str,
    pub target_language: &'a str,
    pub translated_text: &'a str,
    pub priority: i64,
    pub category: &'a str,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct GlossaryAuditRow {
    pub id: i64,
    pub source_text: String,
    pub target_language: String,
    pub old_translation: Option<String>,
    pub new_translation: Option<String>,
    pub changed_by: String,
    pub reason: Option<String>,
    pub changed_at: i64,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TranslationStateRow {
    pub entity_type: String,
    pub entity_id: String,
    pub status: String,
    /// JSON array of language codes
    pub translated_languages: String,
    /// JSON array of language codes
    pub failed_languages: String,
    pub cache_warmed: bool,
    pub ready_for_print: bool,
    pub print_ready_at: Option<i64>,
    pub source_name: String,
    pub source_description: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct EntityTranslationRow {
    pub entity_type: String,
    pub entity_id: String,
    pub language: String,
    pub name: String,
    pub description: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct MetricsSnapshotRow {
    pub id: i64,
    pub period_start: i64,
    pub period_end: i64,
    pub cache_hit_rate: f64,
    pub cache_miss_rate: f64,
    pub total_requests: i64,
    pub provider_latency_ms: f64,
    pub db_latency_ms: f64,
    pub memory_latency_ms: f64,
    pub failed_translations: i64,
    pub stale_serves: i64,
}

/// Handle to the durable store. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `url` and ensure the schema exists.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every connection to an in-memory database gets its own copy, so pin
        // those to a single long-lived connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Fresh private in-memory database.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ==================== Translation cache ====================

    pub async fn get_cached_translation(
        &self,
        fingerprint: &str,
        target_language: &str,
    ) -> StoreResult<Option<CacheRow>> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT fingerprint, target_language, source_text, translated_text,
                    content_type, created_at, expires_at
             FROM translation_cache
             WHERE fingerprint = ? AND target_language = ?",
        )
        .bind(fingerprint)
        .bind(target_language)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn put_cached_translation(&self, row: &CacheRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO translation_cache
                (fingerprint, target_language, source_text, translated_text,
                 content_type, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (fingerprint, target_language) DO UPDATE SET
                source_text = excluded.source_text,
                translated_text = excluded.translated_text,
                content_type = excluded.content_type,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
        )
        .bind(&row.fingerprint)
        .bind(&row.target_language)
        .bind(&row.source_text)
        .bind(&row.translated_text)
        .bind(&row.content_type)
        .bind(row.created_at)
        .bind(row.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove entries whose `expires_at` is at or before `now_ms`. Returns the number removed.
    pub async fn delete_expired_cache(&self, now_ms: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM translation_cache WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn cache_table_stats(&self, now_ms: i64) -> StoreResult<CacheTableStats> {
        let (total, expired): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN expires_at <= ? THEN 1 ELSE 0 END), 0)
             FROM translation_cache",
        )
        .bind(now_ms)
        .fetch_one(&self.pool)
        .await?;

        let per_language: Vec<(String, i64)> = sqlx::query_as(
            "SELECT target_language, COUNT(*) FROM translation_cache
             WHERE expires_at > ?
             GROUP BY target_language",
        )
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;

        Ok(CacheTableStats {
            total,
            valid: total - expired,
            expired,
            by_language: per_language.into_iter().collect(),
        })
    }

    // ==================== Glossary ====================

    pub async fn list_active_glossary_terms(&self) -> StoreResult<Vec<GlossaryTermRow>> {
        let rows = sqlx::query_as::<_, GlossaryTermRow>(
            "SELECT id, source_text, target_language, translated_text, priority,
                    category, is_active, created_at, updated_at
             FROM glossary_terms
             WHERE is_active = 1
             ORDER BY target_language, priority, source_text",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_glossary_term(
        &self,
        source_text: &str,
        target_language: &str,
    ) -> StoreResult<Option<GlossaryTermRow>> {
        let row = sqlx::query_as::<_, GlossaryTermRow>(
            "SELECT id, source_text, target_language, translated_text, priority,
                    category, is_active, created_at, updated_at
             FROM glossary_terms
             WHERE source_text = ? AND target_language = ?",
        )
        .bind(source_text)
        .bind(target_language)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Insert or update a term (reactivating it if soft-deleted) and append the
    /// matching audit record in the same transaction.
    pub async fn upsert_glossary_term(
        &self,
        term: &GlossaryTermWrite<'_>,
        changed_by: &str,
        reason: Option<&str>,
        now_ms: i64,
    ) -> StoreResult<GlossaryTermRow> {
        let mut tx = self.pool.begin().await?;

        let old_translation: Option<String> = sqlx::query_scalar(
            "SELECT translated_text FROM glossary_terms
             WHERE source_text = ? AND target_language = ? AND is_active = 1",
        )
        .bind(term.source_text)
        .bind(term.target_language)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO glossary_terms
                (source_text, target_language, translated_text, priority, category,
                 is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?)
             ON CONFLICT (source_text, target_language) DO UPDATE SET
                translated_text = excluded.translated_text,
                priority = excluded.priority,
                category = excluded.category,
                is_active = 1,
                updated_at = excluded.updated_at",
        )
        .bind(term.source_text)
        .bind(term.target_language)
        .bind(term.translated_text)
        .bind(term.priority)
        .bind(term.category)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;

        insert_audit(
            &mut tx,
            term.source_text,
            term.target_language,
            old_translation.as_deref(),
            Some(term.translated_text),
            changed_by,
            reason,
            now_ms,
        )
        .await?;

        let row = sqlx::query_as::<_, GlossaryTermRow>(
            "SELECT id, source_text, target_language, translated_text, priority,
                    category, is_active, created_at, updated_at
             FROM glossary_terms
             WHERE source_text = ? AND target_language = ?",
        )
        .bind(term.source_text)
        .bind(term.target_language)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    /// Soft-delete an active term. Returns false when no active term matched.
    pub async fn deactivate_glossary_term(
        &self,
        source_text: &str,
        target_language: &str,
        changed_by: &str,
        reason: Option<&str>,
        now_ms: i64,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let old_translation: Option<String> = sqlx::query_scalar(
            "SELECT translated_text FROM glossary_terms
             WHERE source_text = ? AND target_language = ? AND is_active = 1",
        )
        .bind(source_text)
        .bind(target_language)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(old_translation) = old_translation else {
            return Ok(false);
        };

        sqlx::query(
            "UPDATE glossary_terms SET is_active = 0, updated_at = ?
             WHERE source_text = ? AND target_language = ?",
        )
        .bind(now_ms)
        .bind(source_text)
        .bind(target_language)
        .execute(&mut *tx)
        .await?;

        insert_audit(
            &mut tx,
            source_text,
            target_language,
            Some(&old_translation),
            None,
            changed_by,
            reason,
            now_ms,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Audit records for a source term across languages, newest first.
    pub async fn glossary_audit_history(
        &self,
        source_text: &str,
    ) -> StoreResult<Vec<GlossaryAuditRow>> {
        let rows = sqlx::query_as::<_, GlossaryAuditRow>(
            "SELECT id, source_text, target_language, old_translation, new_translation,
                    changed_by, reason, changed_at
             FROM glossary_audit
             WHERE source_text = ?
             ORDER BY changed_at DESC, id DESC",
        )
        .bind(source_text)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ==================== Translation state ====================

    pub async fn get_translation_state(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StoreResult<Option<TranslationStateRow>> {
        let row = sqlx::query_as::<_, TranslationStateRow>(
            "SELECT entity_type, entity_id, status, translated_languages, failed_languages,
                    cache_warmed, ready_for_print, print_ready_at, source_name,
                    source_description, last_error, updated_at
             FROM translation_state
             WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn save_translation_state(&self, row: &TranslationStateRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO translation_state
                (entity_type, entity_id, status, translated_languages, failed_languages,
                 cache_warmed, ready_for_print, print_ready_at, source_name,
                 source_description, last_error, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                status = excluded.status,
                translated_languages = excluded.translated_languages,
                failed_languages = excluded.failed_languages,
                cache_warmed = excluded.cache_warmed,
                ready_for_print = excluded.ready_for_print,
                print_ready_at = excluded.print_ready_at,
                source_name = excluded.source_name,
                source_description = excluded.source_description,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at",
        )
        .bind(&row.entity_type)
        .bind(&row.entity_id)
        .bind(&row.status)
        .bind(&row.translated_languages)
        .bind(&row.failed_languages)
        .bind(row.cache_warmed)
        .bind(row.ready_for_print)
        .bind(row.print_ready_at)
        .bind(&row.source_name)
        .bind(&row.source_description)
        .bind(&row.last_error)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_entity_translation(&self, row: &EntityTranslationRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO entity_translations
                (entity_type, entity_id, language, name, description, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (entity_type, entity_id, language) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                updated_at = excluded.updated_at",
        )
        .bind(&row.entity_type)
        .bind(&row.entity_id)
        .bind(&row.language)
        .bind(&row.name)
        .bind(&row.description)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_entity_translation(
        &self,
        entity_type: &str,
        entity_id: &str,
        language: &str,
    ) -> StoreResult<Option<EntityTranslationRow>> {
        let row = sqlx::query_as::<_, EntityTranslationRow>(
            "SELECT entity_type, entity_id, language, name, description, updated_at
             FROM entity_translations
             WHERE entity_type = ? AND entity_id = ? AND language = ?",
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(language)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ==================== Metrics ====================

    /// Append a snapshot; `row.id` is ignored. Returns the new id.
    pub async fn insert_metrics_snapshot(&self, row: &MetricsSnapshotRow) -> StoreResult<i64> {
        let result = sqlx::query(
            "INSERT INTO metrics_snapshots
                (period_start, period_end, cache_hit_rate, cache_miss_rate, total_requests,
                 provider_latency_ms, db_latency_ms, memory_latency_ms,
                 failed_translations, stale_serves)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.period_start)
        .bind(row.period_end)
        .bind(row.cache_hit_rate)
        .bind(row.cache_miss_rate)
        .bind(row.total_requests)
        .bind(row.provider_latency_ms)
        .bind(row.db_latency_ms)
        .bind(row.memory_latency_ms)
        .bind(row.failed_translations)
        .bind(row.stale_serves)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Snapshots whose period ended at or after `since_ms`, newest first.
    pub async fn metrics_snapshots_since(
        &self,
        since_ms: i64,
        limit: i64,
    ) -> StoreResult<Vec<MetricsSnapshotRow>> {
        let rows = sqlx::query_as::<_, MetricsSnapshotRow>(
            "SELECT id, period_start, period_end, cache_hit_rate, cache_miss_rate,
                    total_requests, provider_latency_ms, db_latency_ms, memory_latency_ms,
                    failed_translations, stale_serves
             FROM metrics_snapshots
             WHERE period_end >= ?
             ORDER BY period_end DESC, id DESC
             LIMIT ?",
        )
        .bind(since_ms)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ==================== Credentials & settings ====================

    /// Most recently updated active key for `provider`, if any.
    pub async fn active_api_key(&self, provider: &str) -> StoreResult<Option<String>> {
        let key = sqlx::query_scalar(
            "SELECT api_key FROM api_configuration
             WHERE provider = ? AND is_active = 1
             ORDER BY updated_at DESC, id DESC
             LIMIT 1",
        )
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    pub async fn add_api_configuration(
        &self,
        provider: &str,
        api_key: &str,
        is_active: bool,
        now_ms: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO api_configuration (provider, api_key, is_active, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(provider)
        .bind(api_key)
        .bind(is_active)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn system_setting(&self, category: &str, key: &str) -> StoreResult<Option<String>> {
        let value = sqlx::query_scalar(
            "SELECT value FROM system_settings WHERE category = ? AND key = ?",
        )
        .bind(category)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    pub async fn set_system_setting(
        &self,
        category: &str,
        key: &str,
        value: &str,
        now_ms: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO system_settings (category, key, value, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (category, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
        )
        .bind(category)
        .bind(key)
        .bind(value)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn insert_audit(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    source_text: &str,
    target_language: &str,
    old_translation: Option<&str>,
    new_translation: Option<&str>,
    changed_by: &str,
    reason: Option<&str>,
    now_ms: i64,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO glossary_audit
            (source_text, target_language, old_translation, new_translation,
             changed_by, reason, changed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(source_text)
    .bind(target_language)
    .bind(old_translation)
    .bind(new_translation)
    .bind(changed_by)
    .bind(reason)
    .bind(now_ms)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
