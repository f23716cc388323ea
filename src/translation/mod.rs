//! Provider-backed translation: credentials, retry, concurrency limiting,
//! caching and request batching.

pub mod batcher;
pub mod circuit;
pub mod client;
pub mod credentials;
pub mod provider;

pub use batcher::TranslationBatcher;
pub use client::{BatchItem, BatchStatus, TranslationClient, TranslationOutcome};
pub use credentials::CredentialResolver;
pub use provider::{DeeplProvider, TranslationProvider};

#[cfg(test)]
pub(crate) mod testing {
    use super::client::TranslationClient;
    use super::credentials::CredentialResolver;
    use super::provider::TranslationProvider;
    use crate::cache::{DurableCache, MemoryCache};
    use crate::clock::ManualClock;
    use crate::db::Database;
    use crate::error::TranslateError;
    use crate::glossary::GlossaryService;
    use crate::language::Language;
    use crate::metrics::MetricsEngine;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    pub const TEST_KEY: &str = "test0000000000000000000000:fx";

    /// Echoes `"<text> [<lang>]"`, tracks peak concurrency and fails with
    /// `QuotaExceeded` for languages in `fail_for`.
    #[derive(Default)]
    pub struct EchoProvider {
        pub in_flight: AtomicUsize,
        pub peak: AtomicUsize,
        pub calls: AtomicUsize,
        pub delay: Duration,
        pub fail_for: Vec<Language>,
    }

    impl EchoProvider {
        pub fn failing_for(languages: &[Language]) -> Self {
            Self {
                fail_for: languages.to_vec(),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranslationProvider for EchoProvider {
        async fn translate(
            &self,
            _api_key: &str,
            texts: &[String],
            _source: Language,
            target: Language,
        ) -> Result<Vec<String>, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_for.contains(&target) {
                return Err(TranslateError::QuotaExceeded);
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| format!("{} [{}]", t, target.code()))
                .collect())
        }
    }

    /// A client over an in-memory database and a manual clock.
    pub struct TestClient {
        pub client: Arc<TranslationClient>,
        pub db: Database,
        pub clock: Arc<ManualClock>,
        pub memory: Arc<MemoryCache>,
        pub glossary: Arc<GlossaryService>,
        pub metrics: Arc<MetricsEngine>,
    }

    pub async fn test_client(provider: Arc<dyn TranslationProvider>) -> TestClient {
        let db = Database::in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::default());
        let memory = Arc::new(MemoryCache::new(clock.clone()));
        let metrics = Arc::new(MetricsEngine::new(db.clone(), clock.clone()));
        let glossary = Arc::new(GlossaryService::new(db.clone(), clock.clone(), memory.clone()));
        let client = TranslationClient::new(
            provider,
            CredentialResolver::new(db.clone(), Some(TEST_KEY.to_string()), clock.clone()),
            memory.clone(),
            DurableCache::new(db.clone(), clock.clone()),
            glossary.clone(),
            metrics.clone(),
            clock.clone(),
        )
        .with_retry_policy(RetryPolicy::default().with_max_jitter(Duration::ZERO));
        TestClient {
            client: Arc::new(client),
            db,
            clock,
            memory,
            glossary,
            metrics,
        }
    }
}
