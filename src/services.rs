//! Construction and teardown of the translation subsystem.

use crate::cache::{DurableCache, MemoryCache};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::db::Database;
use crate::glossary::GlossaryService;
use crate::language::Language;
use crate::metrics::MetricsEngine;
use crate::pipeline::TranslationPipeline;
use crate::translation::batcher::DEFAULT_WINDOW;
use crate::translation::{
    CredentialResolver, DeeplProvider, TranslationBatcher, TranslationClient, TranslationProvider,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Every component, explicitly owned. Cheap to share behind an `Arc`.
pub struct TranslationServices {
    pub db: Database,
    pub clock: SharedClock,
    pub memory: Arc<MemoryCache>,
    pub metrics: Arc<MetricsEngine>,
    pub glossary: Arc<GlossaryService>,
    pub client: Arc<TranslationClient>,
    pub batcher: TranslationBatcher,
    pub pipeline: TranslationPipeline,
    pub target_languages: Vec<Language>,
}

impl TranslationServices {
    /// Build the services against the configured provider endpoint.
    pub async fn init(config: &Config, db: Database, clock: SharedClock) -> Result<Self> {
        let provider = DeeplProvider::new(&config.deepl_api_url, config.provider_timeout)
            .context("Failed to build translation provider")?;
        Self::with_provider(config, db, clock, Arc::new(provider)).await
    }

    pub async fn with_provider(
        config: &Config,
        db: Database,
        clock: SharedClock,
        provider: Arc<dyn TranslationProvider>,
    ) -> Result<Self> {
        let memory = Arc::new(MemoryCache::new(clock.clone()));
        let metrics = Arc::new(MetricsEngine::new(db.clone(), clock.clone()));

        let glossary = Arc::new(GlossaryService::new(
            db.clone(),
            clock.clone(),
            memory.clone(),
        ));
        if let Err(e) = glossary.refresh().await {
            // The periodic resync will retry
            warn!("Initial glossary load failed: {}", e);
        }

        let credentials =
            CredentialResolver::new(db.clone(), config.deepl_api_key.clone(), clock.clone());
        let client = Arc::new(
            TranslationClient::new(
                provider,
                credentials,
                memory.clone(),
                DurableCache::new(db.clone(), clock.clone()),
                glossary.clone(),
                metrics.clone(),
                clock.clone(),
            )
            .with_source_language(config.source_language),
        );

        let batcher = TranslationBatcher::spawn(client.clone(), DEFAULT_WINDOW);
        let pipeline = TranslationPipeline::spawn(
            client.clone(),
            db.clone(),
            clock.clone(),
            config.target_languages.clone(),
        );

        info!(
            source = %config.source_language,
            targets = ?config.target_languages.iter().map(|l| l.code()).collect::<Vec<_>>(),
            glossary_terms = glossary.statistics().total_terms,
            "✓ Translation services initialized"
        );

        Ok(Self {
            db,
            clock,
            memory,
            metrics,
            glossary,
            client,
            batcher,
            pipeline,
            target_languages: config.target_languages.clone(),
        })
    }

    /// Stop background workers and persist the last metrics window.
    pub async fn shutdown(&self) {
        self.batcher.shutdown().await;
        self.pipeline.shutdown().await;
        match self.metrics.flush().await {
            Ok(Some(report)) => info!(
                hit_rate = report.snapshot.cache_hit_rate,
                "Flushed final metrics window"
            ),
            Ok(None) => {}
            Err(e) => error!("Final metrics flush failed: {}", e),
        }
        info!("✓ Translation services stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::glossary::TermInput;
    use crate::pipeline::{EntityType, EntityWrite, TranslationStatus};
    use crate::translation::testing::{EchoProvider, TEST_KEY};
    use std::time::Duration;

    fn config() -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            deepl_api_url: "http://127.0.0.1:9/v2/translate".to_string(),
            deepl_api_key: Some(TEST_KEY.to_string()),
            provider_timeout: Duration::from_secs(5),
            source_language: Language::ENGLISH,
            target_languages: vec![Language::PORTUGUESE, Language::SPANISH],
            admin_api_key: None,
            port: 0,
        }
    }

    #[tokio::test]
    async fn test_services_wire_components_together() {
        let db = Database::in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::default());
        let services = TranslationServices::with_provider(
            &config(),
            db,
            clock,
            Arc::new(EchoProvider::default()),
        )
        .await
        .unwrap();

        services
            .glossary
            .upsert_term(
                TermInput::new("Truss", "Treliça", Language::PORTUGUESE),
                "admin",
                None,
            )
            .await
            .unwrap();

        let result = services
            .pipeline
            .submit(EntityWrite {
                entity_type: EntityType::Equipment,
                entity_id: "1".into(),
                name: "Truss".into(),
                description: None,
            })
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result.status, TranslationStatus::Complete);

        assert_eq!(
            services.batcher.translate("Truss", Language::PORTUGUESE).await,
            // Warmed by the pipeline with the glossary value
            "Treliça"
        );

        services.shutdown().await;
        // Final flush emptied the window
        assert_eq!(services.metrics.live().total_requests, 0);
    }

    #[tokio::test]
    async fn test_init_builds_deepl_provider() {
        let db = Database::in_memory().await.unwrap();
        let services = TranslationServices::init(&config(), db, Arc::new(ManualClock::default()))
            .await
            .unwrap();
        assert_eq!(services.target_languages.len(), 2);
        services.shutdown().await;
    }
}
