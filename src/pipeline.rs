//! Predictive translation of entities at write time.
//!
//! Write handlers call [`TranslationPipeline::on_entity_written`], which only
//! enqueues a job. A supervised worker drains the queue, running up to
//! [`MAX_CONCURRENT_JOBS`] jobs at once (jobs for the same entity run one
//! after the other), translating the entity into every configured language
//! and recording progress in `translation_state`
//! (`pending → translating → complete | partial | failed`).
//! Failed languages are not retried automatically; use `retrigger`.

use crate::cache::{fingerprint, ContentType, WARM_TTL};
use crate::clock::SharedClock;
use crate::db::{Database, EntityTranslationRow, TranslationStateRow};
use crate::error::{PipelineError, StoreError};
use crate::language::Language;
use crate::translation::TranslationClient;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Entities translated concurrently. Matches the client's provider permits.
pub const MAX_CONCURRENT_JOBS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Equipment,
    Category,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Equipment => "equipment",
            EntityType::Category => "category",
        }
    }

    fn name_content(&self) -> ContentType {
        match self {
            EntityType::Equipment => ContentType::ProductName,
            EntityType::Category => ContentType::CategoryName,
        }
    }

    fn description_content(&self) -> ContentType {
        match self {
            EntityType::Equipment => ContentType::ProductDescription,
            EntityType::Category => ContentType::CategoryDescription,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "equipment" => Ok(EntityType::Equipment),
            "category" => Ok(EntityType::Category),
            other => Err(PipelineError::UnknownEntityType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationStatus {
    Pending,
    Translating,
    Complete,
    /// At least one language succeeded and at least one failed.
    Partial,
    Failed,
}

impl TranslationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationStatus::Pending => "pending",
            TranslationStatus::Translating => "translating",
            TranslationStatus::Complete => "complete",
            TranslationStatus::Partial => "partial",
            TranslationStatus::Failed => "failed",
        }
    }
}

impl FromStr for TranslationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TranslationStatus::Pending),
            "translating" => Ok(TranslationStatus::Translating),
            "complete" => Ok(TranslationStatus::Complete),
            "partial" => Ok(TranslationStatus::Partial),
            "failed" => Ok(TranslationStatus::Failed),
            other => Err(StoreError::InvalidValue(format!(
                "unknown translation status '{}'",
                other
            ))),
        }
    }
}

/// A created or updated entity whose text needs localizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityWrite {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationState {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub status: TranslationStatus,
    pub translated_languages: Vec<Language>,
    pub failed_languages: Vec<Language>,
    pub cache_warmed: bool,
    pub ready_for_print: bool,
    pub print_ready_at: Option<DateTime<Utc>>,
    pub source_name: String,
    pub source_description: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TranslationState {
    fn try_from_row(row: TranslationStateRow) -> Result<Self, PipelineError> {
        Ok(Self {
            entity_type: row.entity_type.parse()?,
            entity_id: row.entity_id,
            status: row.status.parse()?,
            translated_languages: decode_languages(&row.translated_languages)?,
            failed_languages: decode_languages(&row.failed_languages)?,
            cache_warmed: row.cache_warmed,
            ready_for_print: row.ready_for_print,
            print_ready_at: row.print_ready_at.and_then(DateTime::from_timestamp_millis),
            source_name: row.source_name,
            source_description: row.source_description,
            last_error: row.last_error,
            updated_at: DateTime::from_timestamp_millis(row.updated_at).unwrap_or_default(),
        })
    }
}

fn encode_languages(languages: &[Language]) -> Result<String, StoreError> {
    let codes: Vec<&str> = languages.iter().map(|l| l.code()).collect();
    Ok(serde_json::to_string(&codes)?)
}

fn decode_languages(json: &str) -> Result<Vec<Language>, StoreError> {
    let codes: Vec<String> = serde_json::from_str(json)?;
    Ok(codes
        .iter()
        .filter_map(|code| Language::from_code(code).ok())
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub status: TranslationStatus,
    pub translated_languages: Vec<Language>,
    pub failed_languages: Vec<Language>,
    pub duration_ms: u64,
}

/// Text to show for an entity in one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalizedContent {
    pub language: Language,
    pub name: String,
    pub description: Option<String>,
    /// False when the source text is returned as a fallback.
    pub translated: bool,
}

struct Job {
    write: EntityWrite,
    done: Option<oneshot::Sender<JobResult>>,
}

struct Worker {
    client: Arc<TranslationClient>,
    db: Database,
    clock: SharedClock,
    languages: Vec<Language>,
}

pub struct TranslationPipeline {
    worker: Arc<Worker>,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TranslationPipeline {
    /// Start the worker on the current runtime.
    pub fn spawn(
        client: Arc<TranslationClient>,
        db: Database,
        clock: SharedClock,
        languages: Vec<Language>,
    ) -> Self {
        let worker = Arc::new(Worker {
            client,
            db,
            clock,
            languages,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(worker.clone(), rx));
        Self {
            worker,
            sender: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn languages(&self) -> &[Language] {
        &self.worker.languages
    }

    /// Queue translation of an entity and return immediately. Failures are
    /// logged by the worker and never reach the caller.
    pub fn on_entity_written(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        name: &str,
        description: Option<&str>,
    ) {
        let write = EntityWrite {
            entity_type,
            entity_id: entity_id.to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
        };
        if self.enqueue(write, None).is_err() {
            warn!(
                entity_type = %entity_type,
                entity_id,
                "Translation pipeline stopped, skipping predictive translation"
            );
        }
    }

    /// Queue a job and get a receiver that resolves when it finishes.
    pub fn submit(&self, write: EntityWrite) -> Result<oneshot::Receiver<JobResult>, PipelineError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(write, Some(tx))?;
        Ok(rx)
    }

    fn enqueue(
        &self,
        write: EntityWrite,
        done: Option<oneshot::Sender<JobResult>>,
    ) -> Result<(), PipelineError> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(PipelineError::Stopped)?;
        debug!(
            entity_type = %write.entity_type,
            entity_id = %write.entity_id,
            "Queued predictive translation"
        );
        sender
            .send(Job { write, done })
            .map_err(|_| PipelineError::Stopped)
    }

    /// Re-run translation from the stored source text.
    pub async fn retrigger(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<oneshot::Receiver<JobResult>, PipelineError> {
        let state = self
            .get_translation_status(entity_type, entity_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound {
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
            })?;
        info!(entity_type = %entity_type, entity_id, "Manual translation retrigger");
        self.submit(EntityWrite {
            entity_type,
            entity_id: entity_id.to_string(),
            name: state.source_name,
            description: state.source_description,
        })
    }

    pub async fn get_translation_status(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<TranslationState>, PipelineError> {
        match self
            .worker
            .db
            .get_translation_state(entity_type.as_str(), entity_id)
            .await?
        {
            Some(row) => Ok(Some(TranslationState::try_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub async fn is_ready_for_print(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<bool, PipelineError> {
        Ok(self
            .get_translation_status(entity_type, entity_id)
            .await?
            .map(|s| s.ready_for_print)
            .unwrap_or(false))
    }

    /// Translated text when the entity is ready and `language` succeeded,
    /// otherwise the source text. `None` if the entity was never seen.
    pub async fn localized_content(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        language: Language,
    ) -> Result<Option<LocalizedContent>, PipelineError> {
        let Some(state) = self.get_translation_status(entity_type, entity_id).await? else {
            return Ok(None);
        };

        if state.ready_for_print && state.translated_languages.contains(&language) {
            if let Some(row) = self
                .worker
                .db
                .get_entity_translation(entity_type.as_str(), entity_id, language.code())
                .await?
            {
                return Ok(Some(LocalizedContent {
                    language,
                    name: row.name,
                    description: row.description,
                    translated: true,
                }));
            }
        }

        Ok(Some(LocalizedContent {
            language,
            name: state.source_name,
            description: state.source_description,
            translated: false,
        }))
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!("Translation pipeline stopped");
        }
    }
}

type EntityKey = (EntityType, String);

async fn run_worker(worker: Arc<Worker>, mut rx: mpsc::UnboundedReceiver<Job>) {
    let mut running: JoinSet<EntityKey> = JoinSet::new();
    let mut in_flight: HashSet<EntityKey> = HashSet::new();

    while let Some(job) = rx.recv().await {
        let key = (job.write.entity_type, job.write.entity_id.clone());
        while running.len() >= MAX_CONCURRENT_JOBS || in_flight.contains(&key) {
            match running.join_next().await {
                Some(Ok(finished)) => {
                    in_flight.remove(&finished);
                }
                Some(Err(e)) => error!("Translation job supervisor failed: {}", e),
                None => {
                    in_flight.clear();
                    break;
                }
            }
        }
        in_flight.insert(key);
        running.spawn(supervise(worker.clone(), job));
    }

    while let Some(finished) = running.join_next().await {
        if let Err(e) = finished {
            error!("Translation job supervisor failed: {}", e);
        }
    }
}

/// Run one job on its own task so a panic is contained and logged.
async fn supervise(worker: Arc<Worker>, Job { write, done }: Job) -> EntityKey {
    let key = (write.entity_type, write.entity_id.clone());
    match tokio::spawn(async move { worker.process(write).await }).await {
        Ok(result) => {
            if let Some(done) = done {
                let _ = done.send(result);
            }
        }
        Err(e) => error!(
            entity_type = %key.0,
            entity_id = %key.1,
            "Translation job aborted: {}",
            e
        ),
    }
    key
}

impl Worker {
    async fn process(&self, write: EntityWrite) -> JobResult {
        let started = Instant::now();
        info!(
            entity_type = %write.entity_type,
            entity_id = %write.entity_id,
            languages = self.languages.len(),
            "Starting predictive translation"
        );

        self.save_state(&write, TranslationStatus::Pending, &[], &[], None)
            .await;
        self.save_state(&write, TranslationStatus::Translating, &[], &[], None)
            .await;

        let mut translated = Vec::new();
        let mut failed = Vec::new();
        let mut last_error = None;
        for &language in &self.languages {
            match self.translate_entity(&write, language).await {
                Ok(()) => translated.push(language),
                Err(e) => {
                    warn!(
                        entity_type = %write.entity_type,
                        entity_id = %write.entity_id,
                        language = language.code(),
                        "Translation failed: {}",
                        e
                    );
                    last_error = Some(format!("{}: {}", language.code(), e));
                    failed.push(language);
                }
            }
        }

        let status = match (translated.is_empty(), failed.is_empty()) {
            (false, true) => TranslationStatus::Complete,
            (false, false) => TranslationStatus::Partial,
            (true, _) => TranslationStatus::Failed,
        };
        self.save_state(&write, status, &translated, &failed, last_error)
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            entity_type = %write.entity_type,
            entity_id = %write.entity_id,
            status = status.as_str(),
            translated = translated.len(),
            failed = failed.len(),
            duration_ms,
            "✓ Predictive translation finished"
        );

        JobResult {
            entity_type: write.entity_type,
            entity_id: write.entity_id,
            status,
            translated_languages: translated,
            failed_languages: failed,
            duration_ms,
        }
    }

    /// Translate, persist and warm one language.
    async fn translate_entity(&self, write: &EntityWrite, language: Language) -> anyhow::Result<()> {
        let name = self
            .translate_field(&write.name, language, write.entity_type.name_content())
            .await?;
        let description = match write.description.as_deref() {
            Some(text) if !text.trim().is_empty() => Some(
                self.translate_field(text, language, write.entity_type.description_content())
                    .await?,
            ),
            other => other.map(str::to_string),
        };

        self.db
            .save_entity_translation(&EntityTranslationRow {
                entity_type: write.entity_type.as_str().to_string(),
                entity_id: write.entity_id.clone(),
                language: language.code().to_string(),
                name: name.clone(),
                description: description.clone(),
                updated_at: self.clock.now_millis(),
            })
            .await?;

        if language != self.client.source_language() {
            let memory = self.client.memory_cache();
            memory.insert(&fingerprint(&write.name, language), language, name, WARM_TTL);
            if let (Some(source), Some(translated)) = (write.description.as_deref(), description) {
                memory.insert(&fingerprint(source, language), language, translated, WARM_TTL);
            }
        }
        Ok(())
    }

    /// The client resolves glossary matches and corrects provider output,
    /// so the value returned here is the one both cache tiers hold.
    async fn translate_field(
        &self,
        text: &str,
        language: Language,
        content_type: ContentType,
    ) -> anyhow::Result<String> {
        let outcome = self.client.translate_as(text, language, content_type).await?;
        Ok(outcome.translated_text)
    }

    async fn save_state(
        &self,
        write: &EntityWrite,
        status: TranslationStatus,
        translated: &[Language],
        failed: &[Language],
        last_error: Option<String>,
    ) {
        let now = self.clock.now_millis();
        let ready = !translated.is_empty();
        let row = match (encode_languages(translated), encode_languages(failed)) {
            (Ok(translated_languages), Ok(failed_languages)) => TranslationStateRow {
                entity_type: write.entity_type.as_str().to_string(),
                entity_id: write.entity_id.clone(),
                status: status.as_str().to_string(),
                translated_languages,
                failed_languages,
                cache_warmed: ready,
                ready_for_print: ready,
                print_ready_at: ready.then_some(now),
                source_name: write.name.clone(),
                source_description: write.description.clone(),
                last_error,
                updated_at: now,
            },
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to encode translation state: {}", e);
                return;
            }
        };

        if let Err(e) = self.db.save_translation_state(&row).await {
            error!(
                entity_type = %write.entity_type,
                entity_id = %write.entity_id,
                status = status.as_str(),
                "Failed to save translation state: {}",
                e
            );
        }
    }
}
