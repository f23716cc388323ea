use crate::services::TranslationServices;
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

pub const METRICS_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
pub const GLOSSARY_RESYNC_INTERVAL: Duration = Duration::from_secs(60);
pub const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DURABLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Register the periodic maintenance jobs and start the scheduler
pub async fn start_scheduler(services: Arc<TranslationServices>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    add_repeated(&scheduler, METRICS_FLUSH_INTERVAL, &services, flush_metrics).await?;
    add_repeated(&scheduler, GLOSSARY_RESYNC_INTERVAL, &services, resync_glossary).await?;
    add_repeated(&scheduler, MEMORY_SWEEP_INTERVAL, &services, sweep_memory_cache).await?;
    add_repeated(&scheduler, DURABLE_SWEEP_INTERVAL, &services, sweep_durable_cache).await?;

    scheduler.start().await?;
    info!("✓ Scheduler started");

    Ok(scheduler)
}

async fn add_repeated<F, Fut>(
    scheduler: &JobScheduler,
    every: Duration,
    services: &Arc<TranslationServices>,
    task: F,
) -> Result<()>
where
    F: Fn(Arc<TranslationServices>) -> Fut + Send + Sync + Copy + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let services = Arc::clone(services);
    let job = Job::new_repeated_async(every, move |_uuid, _l| {
        let services = Arc::clone(&services);
        Box::pin(async move { task(services).await })
    })?;
    scheduler.add(job).await?;
    Ok(())
}

pub async fn flush_metrics(services: Arc<TranslationServices>) {
    if let Err(e) = services.metrics.flush().await {
        error!("Metrics flush failed: {}", e);
    }
}

pub async fn resync_glossary(services: Arc<TranslationServices>) {
    if let Err(e) = services.glossary.refresh().await {
        error!("Glossary resync failed: {}", e);
    }
}

pub async fn sweep_memory_cache(services: Arc<TranslationServices>) {
    let removed = services.memory.sweep();
    if removed > 0 {
        debug!(removed, "Swept expired memory cache entries");
    }
}

pub async fn sweep_durable_cache(services: Arc<TranslationServices>) {
    match services.client.clear_expired_cache().await {
        Ok(removed) => debug!(removed, "Durable cache sweep finished"),
        Err(e) => error!("Durable cache sweep failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::db::Database;
    use crate::language::Language;
    use crate::metrics::CacheTier;
    use crate::translation::testing::{EchoProvider, TEST_KEY};

    async fn services() -> (Arc<TranslationServices>, Arc<ManualClock>) {
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            deepl_api_url: "http://127.0.0.1:9/v2/translate".to_string(),
            deepl_api_key: Some(TEST_KEY.to_string()),
            provider_timeout: Duration::from_secs(5),
            source_language: Language::ENGLISH,
            target_languages: vec![Language::PORTUGUESE],
            admin_api_key: None,
            port: 0,
        };
        let clock = Arc::new(ManualClock::default());
        let services = TranslationServices::with_provider(
            &config,
            Database::in_memory().await.unwrap(),
            clock.clone(),
            Arc::new(EchoProvider::default()),
        )
        .await
        .unwrap();
        (Arc::new(services), clock)
    }

    #[tokio::test]
    async fn test_flush_metrics_job_persists_window() {
        let (services, _) = services().await;
        services.metrics.record_cache_hit(CacheTier::Memory);

        flush_metrics(services.clone()).await;

        assert_eq!(services.metrics.live().total_requests, 0);
        let stats = services.metrics.realtime_stats().await.unwrap();
        assert_eq!(stats.snapshots.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_jobs_remove_expired_entries() {
        let (services, clock) = services().await;
        services
            .client
            .translate("Stage", Language::PORTUGUESE)
            .await
            .unwrap();
        assert_eq!(services.memory.len(), 1);

        clock.advance(Duration::from_secs(2 * 60 * 60));
        sweep_memory_cache(services.clone()).await;
        assert!(services.memory.is_empty());

        clock.advance(Duration::from_secs(31 * 24 * 60 * 60));
        sweep_durable_cache(services.clone()).await;
        assert_eq!(services.client.cache_stats().await.unwrap().durable.total, 0);
    }

    #[tokio::test]
    async fn test_scheduler_starts() {
        let (services, _) = services().await;
        let mut scheduler = start_scheduler(services).await.unwrap();
        scheduler.shutdown().await.unwrap();
    }
}
