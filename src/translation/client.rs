//! Cached, rate-limited access to the translation provider.
//!
//! A lookup goes glossary exact match, memory tier, durable tier, then
//! provider. Provider output always passes through the glossary before it
//! is cached or returned, so both tiers hold the same corrected text. Provider
//! calls are gated by a FIFO semaphore (3 permits by default) held for one
//! attempt at a time, so retry cool-downs do not occupy a slot. Only
//! successful results are cached.

use super::circuit::{CircuitBreaker, CircuitStatus};
use super::credentials::CredentialResolver;
use super::provider::TranslationProvider;
use crate::cache::{fingerprint, ContentType, DurableCache, DurableLookup, MemoryCache, MemoryCacheStats, MEMORY_TTL};
use crate::clock::SharedClock;
use crate::db::CacheTableStats;
use crate::error::{StoreError, TranslateError};
use crate::glossary::GlossaryService;
use crate::language::Language;
use crate::metrics::{CacheTier, MetricsEngine};
use crate::retry::{with_retry, RetryPolicy};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_CONCURRENCY: usize = 3;
pub const MAX_TEXT_CHARS: usize = 50_000;
pub const MAX_BATCH_TEXTS: usize = 50;
pub const MAX_BATCH_CHARS: usize = 50_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationOutcome {
    pub translated_text: String,
    pub used_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Fresh provider result.
    Translated,
    Cached,
    /// Provider failed; an expired cache value was served.
    Stale,
    /// Provider failed and nothing was cached; the source text is returned.
    Fallback,
    /// Empty input or target equals source language.
    Unchanged,
    /// Curated glossary term for the whole text.
    Glossary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub translated_text: String,
    pub used_cache: bool,
    pub status: BatchStatus,
}

impl BatchItem {
    fn new(translated_text: String, status: BatchStatus) -> Self {
        Self {
            used_cache: matches!(status, BatchStatus::Cached | BatchStatus::Stale),
            translated_text,
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub provider_calls: u64,
    pub failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub max_concurrency: usize,
    pub available_permits: usize,
    pub circuit: CircuitStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub durable: CacheTableStats,
    pub memory: MemoryCacheStats,
}

#[derive(Default)]
struct Counters {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    provider_calls: AtomicU64,
    failures: AtomicU64,
    last_success: Mutex<Option<DateTime<Utc>>>,
    last_failure: Mutex<Option<DateTime<Utc>>>,
}

enum Probe {
    Hit(String),
    Stale(String),
    Miss,
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

pub struct TranslationClient {
    provider: Arc<dyn TranslationProvider>,
    credentials: CredentialResolver,
    memory: Arc<MemoryCache>,
    durable: DurableCache,
    glossary: Arc<GlossaryService>,
    metrics: Arc<MetricsEngine>,
    clock: SharedClock,
    policy: RetryPolicy,
    source: Language,
    max_concurrency: usize,
    permits: Semaphore,
    breaker: CircuitBreaker,
    counters: Counters,
}

impl TranslationClient {
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        credentials: CredentialResolver,
        memory: Arc<MemoryCache>,
        durable: DurableCache,
        glossary: Arc<GlossaryService>,
        metrics: Arc<MetricsEngine>,
        clock: SharedClock,
    ) -> Self {
        Self {
            provider,
            credentials,
            memory,
            durable,
            glossary,
            metrics,
            breaker: CircuitBreaker::new(clock.clone()),
            clock,
            policy: RetryPolicy::default(),
            source: Language::canonical(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            permits: Semaphore::new(DEFAULT_MAX_CONCURRENCY),
            counters: Counters::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_source_language(mut self, source: Language) -> Self {
        self.source = source;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        self.max_concurrency = max_concurrency;
        self.permits = Semaphore::new(max_concurrency);
        self
    }

    pub fn source_language(&self) -> Language {
        self.source
    }

    pub fn memory_cache(&self) -> &Arc<MemoryCache> {
        &self.memory
    }

    pub fn glossary(&self) -> &Arc<GlossaryService> {
        &self.glossary
    }

    pub async fn translate(
        &self,
        text: &str,
        language: Language,
    ) -> Result<TranslationOutcome, TranslateError> {
        self.translate_as(text, language, ContentType::General).await
    }

    /// Translate one text, tagging the cache entry with `content_type`.
    pub async fn translate_as(
        &self,
        text: &str,
        language: Language,
        content_type: ContentType,
    ) -> Result<TranslationOutcome, TranslateError> {
        if text.trim().is_empty() || language == self.source {
            return Ok(TranslationOutcome {
                translated_text: text.to_string(),
                used_cache: false,
            });
        }
        let chars = text.chars().count();
        if chars > MAX_TEXT_CHARS {
            return Err(TranslateError::Validation(format!(
                "text is {} characters, limit is {}",
                chars, MAX_TEXT_CHARS
            )));
        }

        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        if let Some(term) = self.glossary.lookup_term(text, language).await {
            debug!(language = language.code(), "Glossary exact match");
            return Ok(TranslationOutcome {
                translated_text: term.translated_text,
                used_cache: false,
            });
        }
        if let Probe::Hit(translated_text) = self.probe(text, language).await {
            return Ok(TranslationOutcome {
                translated_text,
                used_cache: true,
            });
        }

        let texts = [text.to_string()];
        match self.call_provider(&texts, language).await {
            Ok(mut translated) => {
                let raw = translated.pop().unwrap_or_default();
                let translated_text = self.glossary.apply_glossary(&raw, language).await;
                self.store(text, language, &translated_text, content_type).await;
                Ok(TranslationOutcome {
                    translated_text,
                    used_cache: false,
                })
            }
            Err(e) => {
                self.metrics.record_failed_translation();
                Err(e)
            }
        }
    }

    /// Translate many texts to one language. Results keep input order and
    /// never fail: items the provider cannot translate fall back to a stale
    /// cache value or to the source text.
    pub async fn translate_batch(&self, texts: &[String], language: Language) -> Vec<BatchItem> {
        let mut results: Vec<Option<BatchItem>> = vec![None; texts.len()];
        let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut unique: Vec<&str> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() || language == self.source {
                results[i] = Some(BatchItem::new(text.clone(), BatchStatus::Unchanged));
                continue;
            }
            let entry = positions.entry(text.as_str()).or_default();
            if entry.is_empty() {
                unique.push(text.as_str());
            }
            entry.push(i);
        }

        let mut resolved: HashMap<&str, BatchItem> = HashMap::new();
        let mut stale: HashMap<&str, String> = HashMap::new();
        let mut misses: Vec<String> = Vec::new();

        for text in unique {
            self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
            if text.chars().count() > MAX_TEXT_CHARS {
                warn!(language = language.code(), "Skipping oversized batch item");
                self.metrics.record_failed_translation();
                resolved.insert(text, BatchItem::new(text.to_string(), BatchStatus::Fallback));
                continue;
            }
            if let Some(term) = self.glossary.lookup_term(text, language).await {
                resolved.insert(text, BatchItem::new(term.translated_text, BatchStatus::Glossary));
                continue;
            }
            match self.probe(text, language).await {
                Probe::Hit(value) => {
                    resolved.insert(text, BatchItem::new(value, BatchStatus::Cached));
                }
                Probe::Stale(value) => {
                    stale.insert(text, value);
                    misses.push(text.to_string());
                }
                Probe::Miss => misses.push(text.to_string()),
            }
        }

        let chunks = split_batches(&misses);
        debug!(
            misses = misses.len(),
            batches = chunks.len(),
            language = language.code(),
            "Dispatching batch translation"
        );
        let outcomes = join_all(
            chunks
                .iter()
                .map(|chunk| self.call_provider(chunk, language)),
        )
        .await;

        let mut translated: Vec<(String, String)> = Vec::new();
        for (chunk, outcome) in chunks.iter().zip(outcomes) {
            match outcome {
                Ok(values) => translated.extend(chunk.iter().cloned().zip(values)),
                Err(e) => {
                    warn!(
                        language = language.code(),
                        count = chunk.len(),
                        "Batch translation failed, serving fallbacks: {}",
                        e
                    );
                    for text in chunk {
                        let item = match stale.get(text.as_str()) {
                            Some(value) => {
                                self.metrics.record_stale_serve();
                                BatchItem::new(value.clone(), BatchStatus::Stale)
                            }
                            None => {
                                self.metrics.record_failed_translation();
                                BatchItem::new(text.clone(), BatchStatus::Fallback)
                            }
                        };
                        if let Some(key) = positions.get_key_value(text.as_str()).map(|(k, _)| *k) {
                            resolved.insert(key, item);
                        }
                    }
                }
            }
        }

        for (source, raw) in translated {
            let value = self.glossary.apply_glossary(&raw, language).await;
            self.store(&source, language, &value, ContentType::General).await;
            if let Some(key) = positions.get_key_value(source.as_str()).map(|(k, _)| *k) {
                resolved.insert(key, BatchItem::new(value, BatchStatus::Translated));
            }
        }

        for (text, indexes) in &positions {
            if let Some(item) = resolved.get(text) {
                for &i in indexes {
                    results[i] = Some(item.clone());
                }
            }
        }

        results
            .into_iter()
            .zip(texts)
            .map(|(item, text)| {
                item.unwrap_or_else(|| BatchItem::new(text.clone(), BatchStatus::Fallback))
            })
            .collect()
    }

    async fn probe(&self, text: &str, language: Language) -> Probe {
        let fp = fingerprint(text, language);

        let started = Instant::now();
        let in_memory = self.memory.get(&fp, language);
        self.metrics
            .record_tier_latency(CacheTier::Memory, elapsed_ms(started));
        if let Some(value) = in_memory {
            self.metrics.record_cache_hit(CacheTier::Memory);
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Probe::Hit(value);
        }

        let started = Instant::now();
        let lookup = self.durable.lookup(&fp, language).await;
        self.metrics
            .record_tier_latency(CacheTier::Durable, elapsed_ms(started));
        match lookup {
            // Entries may predate a glossary edit, so correct them again
            Ok(DurableLookup::Fresh(row)) => {
                let value = self
                    .glossary
                    .apply_glossary(&row.translated_text, language)
                    .await;
                self.memory.insert(&fp, language, value.clone(), MEMORY_TTL);
                self.metrics.record_cache_hit(CacheTier::Durable);
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                Probe::Hit(value)
            }
            Ok(DurableLookup::Stale(row)) => {
                self.metrics.record_cache_miss();
                Probe::Stale(
                    self.glossary
                        .apply_glossary(&row.translated_text, language)
                        .await,
                )
            }
            Ok(DurableLookup::Miss) => {
                self.metrics.record_cache_miss();
                Probe::Miss
            }
            Err(e) => {
                warn!("Durable cache lookup failed, treating as miss: {}", e);
                self.metrics.record_cache_miss();
                Probe::Miss
            }
        }
    }

    async fn store(&self, source: &str, language: Language, translated: &str, content_type: ContentType) {
        if let Err(e) = self
            .durable
            .store(source, language, translated, content_type)
            .await
        {
            warn!(language = language.code(), "Failed to persist translation: {}", e);
        }
        self.memory.insert(
            &fingerprint(source, language),
            language,
            translated.to_string(),
            MEMORY_TTL,
        );
    }

    async fn call_provider(
        &self,
        texts: &[String],
        language: Language,
    ) -> Result<Vec<String>, TranslateError> {
        let credential = self.credentials.resolve().await.ok_or_else(|| {
            TranslateError::Configuration("no valid provider API key configured".to_string())
        })?;
        self.breaker.check()?;

        let key = credential.key.as_str();
        let operation = format!("Translation to {}", language.name());
        let result = with_retry(&self.policy, self.clock.as_ref(), &operation, move || async move {
            let _permit = self.permits.acquire().await.map_err(|_| {
                TranslateError::Configuration("translation client is shut down".to_string())
            })?;
            self.counters.provider_calls.fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();
            let result = self
                .provider
                .translate(key, texts, self.source, language)
                .await;
            self.metrics.record_provider_latency(elapsed_ms(started));
            result
        })
        .await;

        let now = self.clock.now();
        match &result {
            Ok(_) => {
                self.breaker.record_success();
                *self.counters.last_success.lock() = Some(now);
            }
            Err(e) => {
                if e.is_auth() {
                    warn!("Provider rejected credentials, clearing cached key");
                    self.credentials.reset();
                }
                if !matches!(e, TranslateError::Validation(_)) {
                    self.breaker.record_failure();
                }
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                *self.counters.last_failure.lock() = Some(now);
            }
        }
        result
    }

    /// Sweep expired entries from both tiers. Returns the number removed.
    pub async fn clear_expired_cache(&self) -> Result<u64, StoreError> {
        let durable = self.durable.sweep().await?;
        let memory = self.memory.sweep() as u64;
        if durable + memory > 0 {
            info!(durable, memory, "Cleared expired translations");
        }
        Ok(durable + memory)
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, StoreError> {
        Ok(CacheStats {
            durable: self.durable.stats().await?,
            memory: self.memory.stats(),
        })
    }

    pub fn reset_credential_cache(&self) {
        self.credentials.reset();
    }

    pub fn client_status(&self) -> ClientStatus {
        ClientStatus {
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            provider_calls: self.counters.provider_calls.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            last_success: *self.counters.last_success.lock(),
            last_failure: *self.counters.last_failure.lock(),
            max_concurrency: self.max_concurrency,
            available_permits: self.permits.available_permits(),
            circuit: self.breaker.status(),
        }
    }
}

/// Group texts into provider requests of at most `MAX_BATCH_TEXTS` items and
/// `MAX_BATCH_CHARS` characters.
fn split_batches(texts: &[String]) -> Vec<Vec<String>> {
    let mut batches = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_chars = 0;

    for text in texts {
        let chars = text.chars().count();
        if !current.is_empty()
            && (current.len() >= MAX_BATCH_TEXTS || current_chars + chars > MAX_BATCH_CHARS)
        {
            batches.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current_chars += chars;
        current.push(text.clone());
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
