use super::trie::Trie;
use super::{substitute, CompiledTerm, GlossarySnapshot, GlossaryTerm, TermCategory, TermInput};
use crate::cache::MemoryCache;
use crate::clock::SharedClock;
use crate::db::{Database, GlossaryAuditRow, GlossaryTermRow, GlossaryTermWrite};
use crate::error::{GlossaryError, StoreError};
use crate::language::Language;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum index age before a lookup forces a reload.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Index {
    exact: HashMap<(Language, String), Arc<CompiledTerm>>,
    tries: HashMap<Language, Trie<Arc<CompiledTerm>>>,
    /// Per-language terms in precedence order
    ordered: HashMap<Language, Vec<Arc<CompiledTerm>>>,
}

impl Index {
    fn build(terms: Vec<GlossaryTerm>) -> Self {
        let mut index = Index::default();

        for term in terms {
            let compiled = match CompiledTerm::compile(term) {
                Ok(c) => Arc::new(c),
                Err(e) => {
                    warn!("Skipping glossary term with invalid pattern: {}", e);
                    continue;
                }
            };
            let language = compiled.term.language;

            index
                .tries
                .entry(language)
                .or_default()
                .insert(&compiled.term.source_text, compiled.clone());
            index
                .ordered
                .entry(language)
                .or_default()
                .push(compiled.clone());
            index
                .exact
                .insert((language, compiled.term.source_text.clone()), compiled);
        }

        for terms in index.ordered.values_mut() {
            // Ties: longer terms first so multi-word entries beat their parts
            terms.sort_by(|a, b| {
                a.term
                    .priority
                    .cmp(&b.term.priority)
                    .then_with(|| b.term.source_text.len().cmp(&a.term.source_text.len()))
                    .then_with(|| a.term.source_text.cmp(&b.term.source_text))
            });
        }

        index
    }

    fn len(&self) -> usize {
        self.exact.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GlossaryStatistics {
    pub total_terms: usize,
    pub by_language: BTreeMap<String, usize>,
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlossaryAuditRecord {
    pub source_text: String,
    pub language: String,
    pub old_translation: Option<String>,
    pub new_translation: Option<String>,
    pub changed_by: String,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl From<GlossaryAuditRow> for GlossaryAuditRecord {
    fn from(row: GlossaryAuditRow) -> Self {
        Self {
            source_text: row.source_text,
            language: row.target_language,
            old_translation: row.old_translation,
            new_translation: row.new_translation,
            changed_by: row.changed_by,
            reason: row.reason,
            changed_at: DateTime::from_timestamp_millis(row.changed_at).unwrap_or_default(),
        }
    }
}

/// Owns glossary CRUD and the in-memory lookup structures built from it.
pub struct GlossaryService {
    db: Database,
    clock: SharedClock,
    memory_cache: Arc<MemoryCache>,
    index: RwLock<Index>,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    reload_lock: tokio::sync::Mutex<()>,
}

impl GlossaryService {
    pub fn new(db: Database, clock: SharedClock, memory_cache: Arc<MemoryCache>) -> Self {
        Self {
            db,
            clock,
            memory_cache,
            index: RwLock::new(Index::default()),
            last_sync: Mutex::new(None),
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Reload the index from the store. A caller arriving while a reload is
    /// already running waits for that one instead of starting another.
    pub async fn refresh(&self) -> Result<(), GlossaryError> {
        match self.reload_lock.try_lock() {
            Ok(_guard) => self.reload().await,
            Err(_) => {
                let _guard = self.reload_lock.lock().await;
                Ok(())
            }
        }
    }

    /// Reload unconditionally once any in-flight reload has finished.
    async fn force_reload(&self) -> Result<(), GlossaryError> {
        let _guard = self.reload_lock.lock().await;
        self.reload().await
    }

    async fn reload(&self) -> Result<(), GlossaryError> {
        let rows = self.db.list_active_glossary_terms().await?;
        let terms: Vec<GlossaryTerm> = rows.into_iter().filter_map(term_from_row).collect();
        let index = Index::build(terms);
        let count = index.len();

        *self.index.write() = index;
        *self.last_sync.lock() = Some(self.clock.now());
        debug!(terms = count, "Glossary index reloaded");
        Ok(())
    }

    fn is_stale(&self) -> bool {
        match *self.last_sync.lock() {
            Some(at) => {
                self.clock.now() - at
                    > chrono::Duration::from_std(SYNC_INTERVAL).unwrap_or(chrono::Duration::zero())
            }
            None => true,
        }
    }

    async fn ensure_fresh(&self) {
        if self.is_stale() {
            if let Err(e) = self.refresh().await {
                warn!("Glossary refresh failed, using previous index: {}", e);
            }
        }
    }

    /// Exact (case-sensitive) term lookup.
    pub async fn lookup_term(&self, text: &str, language: Language) -> Option<GlossaryTerm> {
        self.ensure_fresh().await;
        self.index
            .read()
            .exact
            .get(&(language, text.trim().to_string()))
            .map(|c| c.term.clone())
    }

    /// Longest glossary term that prefixes `text` (case-insensitive), with
    /// the number of bytes of `text` it covers.
    pub async fn lookup_longest_prefix(
        &self,
        text: &str,
        language: Language,
    ) -> Option<(usize, GlossaryTerm)> {
        self.ensure_fresh().await;
        let index = self.index.read();
        let found = index
            .tries
            .get(&language)?
            .longest_prefix_match(text)
            .map(|(len, c)| (len, c.term.clone()));
        found
    }

    /// Rewrite every glossary term found in `text`.
    pub async fn apply_glossary(&self, text: &str, language: Language) -> String {
        self.ensure_fresh().await;
        let index = self.index.read();
        let rewritten = match index.ordered.get(&language) {
            Some(terms) if !text.is_empty() => substitute(text, terms.iter().map(Arc::as_ref)),
            _ => text.to_string(),
        };
        rewritten
    }

    pub async fn upsert_term(
        &self,
        input: TermInput,
        changed_by: &str,
        reason: Option<&str>,
    ) -> Result<GlossaryTerm, GlossaryError> {
        input.validate()?;
        let source_text = input.source_text.trim();

        let row = self
            .db
            .upsert_glossary_term(
                &GlossaryTermWrite {
                    source_text,
                    target_language: input.language.code(),
                    translated_text: input.translated_text.trim(),
                    priority: input.priority,
                    category: input.category.as_str(),
                },
                changed_by,
                reason,
                self.clock.now_millis(),
            )
            .await?;

        info!(
            source = source_text,
            language = %input.language,
            changed_by,
            "✓ Glossary term saved"
        );
        self.invalidate_and_refresh().await?;

        term_from_row(row).ok_or_else(|| {
            GlossaryError::Store(StoreError::InvalidValue("stored term is unreadable".into()))
        })
    }

    /// Soft-delete a term.
    pub async fn delete_term(
        &self,
        source_text: &str,
        language: Language,
        changed_by: &str,
        reason: Option<&str>,
    ) -> Result<(), GlossaryError> {
        let source_text = source_text.trim();
        let removed = self
            .db
            .deactivate_glossary_term(
                source_text,
                language.code(),
                changed_by,
                reason,
                self.clock.now_millis(),
            )
            .await?;

        if !removed {
            return Err(GlossaryError::NotFound {
                source_text: source_text.to_string(),
                language: language.code().to_string(),
            });
        }

        info!(source = source_text, language = %language, changed_by, "✓ Glossary term deleted");
        self.invalidate_and_refresh().await
    }

    /// Clear dependent caches, drop the index, then reload it from the store.
    pub async fn invalidate_and_refresh(&self) -> Result<(), GlossaryError> {
        let cleared = self.memory_cache.clear();
        *self.index.write() = Index::default();
        *self.last_sync.lock() = None;
        info!(cleared_entries = cleared, "Glossary changed, caches invalidated");
        self.force_reload().await
    }

    /// Deterministic, checksummed export of all active terms.
    pub async fn export_for_offline_sync(&self) -> Result<GlossarySnapshot, GlossaryError> {
        self.ensure_fresh().await;
        let mut terms: Vec<GlossaryTerm> = self
            .index
            .read()
            .exact
            .values()
            .map(|c| c.term.clone())
            .collect();
        terms.sort_by(|a, b| {
            a.language
                .code()
                .cmp(b.language.code())
                .then_with(|| a.source_text.cmp(&b.source_text))
        });

        GlossarySnapshot::new(terms).map_err(|e| GlossaryError::Store(e.into()))
    }

    pub async fn term_audit_history(
        &self,
        source_text: &str,
    ) -> Result<Vec<GlossaryAuditRecord>, GlossaryError> {
        Ok(self
            .db
            .glossary_audit_history(source_text.trim())
            .await?
            .into_iter()
            .map(GlossaryAuditRecord::from)
            .collect())
    }

    pub fn statistics(&self) -> GlossaryStatistics {
        let index = self.index.read();
        GlossaryStatistics {
            total_terms: index.len(),
            by_language: index
                .ordered
                .iter()
                .map(|(lang, terms)| (lang.code().to_string(), terms.len()))
                .collect(),
            last_sync: *self.last_sync.lock(),
        }
    }
}

fn term_from_row(row: GlossaryTermRow) -> Option<GlossaryTerm> {
    let language = match Language::from_code(&row.target_language) {
        Ok(lang) => lang,
        Err(e) => {
            warn!("Ignoring glossary term '{}': {}", row.source_text, e);
            return None;
        }
    };
    let category = row.category.parse().unwrap_or_else(|e| {
        warn!("Glossary term '{}': {}, using general", row.source_text, e);
        TermCategory::General
    });

    Some(GlossaryTerm {
        source_text: row.source_text,
        translated_text: row.translated_text,
        language,
        priority: row.priority,
        category,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::glossary::checksum;

    struct Fixture {
        service: GlossaryService,
        cache: Arc<MemoryCache>,
        clock: Arc<ManualClock>,
        db: Database,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let db = Database::in_memory().await.unwrap();
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let service = GlossaryService::new(db.clone(), clock.clone(), cache.clone());
        service.refresh().await.unwrap();
        Fixture {
            service,
            cache,
            clock,
            db,
        }
    }

    fn pt(source: &str, translated: &str, priority: i64) -> TermInput {
        TermInput::new(source, translated, Language::PORTUGUESE).with_priority(priority)
    }

    // ==================== Lookup Tests ====================

    #[tokio::test]
    async fn test_lookup_exact_match() {
        let f = fixture().await;
        f.service
            .upsert_term(pt("Truss", "Treliça", 1), "admin", None)
            .await
            .unwrap();

        let term = f.service.lookup_term("Truss", Language::PORTUGUESE).await.unwrap();
        assert_eq!(term.translated_text, "Treliça");
        assert!(f.service.lookup_term("Truss", Language::FRENCH).await.is_none());
        assert!(f.service.lookup_term("Black Truss", Language::PORTUGUESE).await.is_none());
    }

    #[tokio::test]
    async fn test_lookup_longest_prefix() {
        let f = fixture().await;
        f.service
            .upsert_term(pt("Moving Head", "Cabeça Móvel", 1), "admin", None)
            .await
            .unwrap();

        let (len, term) = f
            .service
            .lookup_longest_prefix("moving head beam", Language::PORTUGUESE)
            .await
            .unwrap();
        assert_eq!(len, "moving head".len());
        assert_eq!(term.source_text, "Moving Head");
    }

    #[tokio::test]
    async fn test_stale_index_reloads_external_writes() {
        let f = fixture().await;
        // Written behind the service's back
        f.db.upsert_glossary_term(
            &GlossaryTermWrite {
                source_text: "Dimmer",
                target_language: "pt",
                translated_text: "Regulador",
                priority: 1,
                category: "power",
            },
            "import",
            None,
            0,
        )
        .await
        .unwrap();

        assert!(f.service.lookup_term("Dimmer", Language::PORTUGUESE).await.is_none());
        f.clock.advance(SYNC_INTERVAL + Duration::from_secs(1));
        let term = f.service.lookup_term("Dimmer", Language::PORTUGUESE).await.unwrap();
        assert_eq!(term.category, TermCategory::Power);
    }

    // ==================== Apply Tests ====================

    #[tokio::test]
    async fn test_apply_priority_one_wins() {
        let f = fixture().await;
        f.service
            .upsert_term(pt("Truss", "estrutura truss", 1), "admin", None)
            .await
            .unwrap();
        f.service
            .upsert_term(
                TermInput::new("truss", "treliça", Language::PORTUGUESE).with_priority(5),
                "admin",
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            f.service.apply_glossary("black truss", Language::PORTUGUESE).await,
            "black estrutura truss"
        );
    }

    #[tokio::test]
    async fn test_apply_preserves_capitalization() {
        let f = fixture().await;
        f.service
            .upsert_term(pt("equipment", "equipamento", 1), "admin", None)
            .await
            .unwrap();

        assert_eq!(
            f.service.apply_glossary("Equipment", Language::PORTUGUESE).await,
            "Equipamento"
        );
        assert_eq!(
            f.service.apply_glossary("EQUIPMENT", Language::PORTUGUESE).await,
            "EQUIPAMENTO"
        );
        assert_eq!(
            f.service.apply_glossary("Equipment", Language::FRENCH).await,
            "Equipment"
        );
    }

    // ==================== Mutation Tests ====================

    #[tokio::test]
    async fn test_upsert_clears_memory_cache() {
        let f = fixture().await;
        f.cache.insert(
            "fp",
            Language::PORTUGUESE,
            "old".into(),
            Duration::from_secs(3600),
        );

        f.service
            .upsert_term(pt("Truss", "Treliça", 1), "admin", Some("new term"))
            .await
            .unwrap();

        assert!(f.cache.is_empty());
        let history = f.service.term_audit_history("Truss").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason.as_deref(), Some("new term"));
    }

    #[tokio::test]
    async fn test_delete_is_soft_and_audited() {
        let f = fixture().await;
        f.service
            .upsert_term(pt("Truss", "Treliça", 1), "admin", None)
            .await
            .unwrap();
        f.service
            .delete_term("Truss", Language::PORTUGUESE, "admin", Some("typo"))
            .await
            .unwrap();

        assert!(f.service.lookup_term("Truss", Language::PORTUGUESE).await.is_none());
        assert!(f.db.get_glossary_term("Truss", "pt").await.unwrap().is_some());
        assert_eq!(f.service.term_audit_history("Truss").await.unwrap().len(), 2);

        let err = f
            .service
            .delete_term("Truss", Language::PORTUGUESE, "admin", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GlossaryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_upsert_rejects_invalid_input() {
        let f = fixture().await;
        let err = f
            .service
            .upsert_term(pt("", "x", 1), "admin", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GlossaryError::Validation(_)));
        assert!(f.db.list_active_glossary_terms().await.unwrap().is_empty());
    }

    // ==================== Export & Stats Tests ====================

    #[tokio::test]
    async fn test_export_is_sorted_and_checksummed() {
        let f = fixture().await;
        f.service
            .upsert_term(pt("Truss", "Treliça", 1), "admin", None)
            .await
            .unwrap();
        f.service
            .upsert_term(
                TermInput::new("Dimmer", "Gradateur", Language::FRENCH),
                "admin",
                None,
            )
            .await
            .unwrap();
        f.service
            .upsert_term(pt("Dimmer", "Regulador", 2), "admin", None)
            .await
            .unwrap();

        let snapshot = f.service.export_for_offline_sync().await.unwrap();
        let keys: Vec<(&str, &str)> = snapshot
            .terms
            .iter()
            .map(|t| (t.language.code(), t.source_text.as_str()))
            .collect();
        assert_eq!(keys, vec![("fr", "Dimmer"), ("pt", "Dimmer"), ("pt", "Truss")]);
        assert_eq!(snapshot.version, 1);
        assert_eq!(
            snapshot.checksum,
            checksum::checksum_json(&snapshot.terms).unwrap()
        );

        // Same content, same checksum
        let again = f.service.export_for_offline_sync().await.unwrap();
        assert_eq!(again.checksum, snapshot.checksum);
    }

    #[tokio::test]
    async fn test_statistics() {
        let f = fixture().await;
        f.service
            .upsert_term(pt("Truss", "Treliça", 1), "admin", None)
            .await
            .unwrap();
        f.service
            .upsert_term(pt("Dimmer", "Regulador", 1), "admin", None)
            .await
            .unwrap();

        let stats = f.service.statistics();
        assert_eq!(stats.total_terms, 2);
        assert_eq!(stats.by_language.get("pt"), Some(&2));
        assert!(stats.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_coalesce() {
        let f = fixture().await;
        let (a, b, c) = tokio::join!(
            f.service.refresh(),
            f.service.refresh(),
            f.service.refresh()
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
    }
}
