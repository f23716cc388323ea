//! Translation metrics, SLO monitoring and anomaly detection.
//!
//! Counters accumulate in an in-memory window owned by [`MetricsEngine`].
//! A periodic flush turns the window into a persisted snapshot and starts a
//! fresh one; the take-and-reset happens under a single lock acquisition so
//! no sample is counted twice or lost.

use crate::clock::SharedClock;
use crate::db::{Database, MetricsSnapshotRow, StoreResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Cache hit rate (percent) below which a window breaches the SLO.
pub const HIT_RATE_SLO: f64 = 95.0;

const REALTIME_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;
const REALTIME_MAX_SNAPSHOTS: i64 = 24;
const ANOMALY_WINDOW_MS: i64 = 60 * 60 * 1000;
const ANOMALY_MAX_SNAPSHOTS: i64 = 12;
const HIT_RATE_DROP_POINTS: f64 = 10.0;
const FAILURE_BURST_THRESHOLD: i64 = 5;
const LATENCY_SPIKE_FACTOR: f64 = 1.5;
const TREND_THRESHOLD_POINTS: f64 = 2.0;

/// Where a cache lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Memory,
    Durable,
}

#[derive(Debug, Clone)]
struct Window {
    started_at: DateTime<Utc>,
    cache_hits: u64,
    memory_hits: u64,
    durable_hits: u64,
    cache_misses: u64,
    total_requests: u64,
    provider_latencies: Vec<f64>,
    db_latencies: Vec<f64>,
    memory_latencies: Vec<f64>,
    failed_translations: u64,
    stale_serves: u64,
}

impl Window {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            cache_hits: 0,
            memory_hits: 0,
            durable_hits: 0,
            cache_misses: 0,
            total_requests: 0,
            provider_latencies: Vec::new(),
            db_latencies: Vec::new(),
            memory_latencies: Vec::new(),
            failed_translations: 0,
            stale_serves: 0,
        }
    }

    /// Fold a previously taken window back in (after a failed persist).
    fn merge(&mut self, other: Window) {
        self.started_at = self.started_at.min(other.started_at);
        self.cache_hits += other.cache_hits;
        self.memory_hits += other.memory_hits;
        self.durable_hits += other.durable_hits;
        self.cache_misses += other.cache_misses;
        self.total_requests += other.total_requests;
        self.provider_latencies.extend(other.provider_latencies);
        self.db_latencies.extend(other.db_latencies);
        self.memory_latencies.extend(other.memory_latencies);
        self.failed_translations += other.failed_translations;
        self.stale_serves += other.stale_serves;
    }

    fn summary(&self) -> WindowSummary {
        let hit_rate = if self.total_requests == 0 {
            0.0
        } else {
            round2(self.cache_hits as f64 / self.total_requests as f64 * 100.0)
        };

        WindowSummary {
            started_at: self.started_at,
            cache_hits: self.cache_hits,
            memory_hits: self.memory_hits,
            durable_hits: self.durable_hits,
            cache_misses: self.cache_misses,
            total_requests: self.total_requests,
            cache_hit_rate: hit_rate,
            cache_miss_rate: if self.total_requests == 0 {
                0.0
            } else {
                round2(100.0 - hit_rate)
            },
            provider_latency_ms: average(&self.provider_latencies).round(),
            db_latency_ms: average(&self.db_latencies).round(),
            memory_latency_ms: average(&self.memory_latencies).round(),
            failed_translations: self.failed_translations,
            stale_serves: self.stale_serves,
        }
    }
}

/// Aggregates of the current (unflushed) window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    pub started_at: DateTime<Utc>,
    pub cache_hits: u64,
    pub memory_hits: u64,
    pub durable_hits: u64,
    pub cache_misses: u64,
    pub total_requests: u64,
    pub cache_hit_rate: f64,
    pub cache_miss_rate: f64,
    pub provider_latency_ms: f64,
    pub db_latency_ms: f64,
    pub memory_latency_ms: f64,
    pub failed_translations: u64,
    pub stale_serves: u64,
}

/// A persisted window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub id: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub cache_hit_rate: f64,
    pub cache_miss_rate: f64,
    pub total_requests: i64,
    pub provider_latency_ms: f64,
    pub db_latency_ms: f64,
    pub memory_latency_ms: f64,
    pub failed_translations: i64,
    pub stale_serves: i64,
}

impl From<MetricsSnapshotRow> for MetricsSnapshot {
    fn from(row: MetricsSnapshotRow) -> Self {
        Self {
            id: row.id,
            period_start: from_millis(row.period_start),
            period_end: from_millis(row.period_end),
            cache_hit_rate: row.cache_hit_rate,
            cache_miss_rate: row.cache_miss_rate,
            total_requests: row.total_requests,
            provider_latency_ms: row.provider_latency_ms,
            db_latency_ms: row.db_latency_ms,
            memory_latency_ms: row.memory_latency_ms,
            failed_translations: row.failed_translations,
            stale_serves: row.stale_serves,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FlushReport {
    pub snapshot: MetricsSnapshot,
    pub slo_breached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeStats {
    pub period: &'static str,
    pub snapshots: Vec<MetricsSnapshot>,
    pub average_hit_rate: f64,
    pub average_provider_latency_ms: f64,
    pub total_requests: i64,
    pub total_failed_translations: i64,
    pub total_stale_serves: i64,
    pub warning_flag: Option<&'static str>,
    pub live: WindowSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayStats {
    pub snapshots: usize,
    pub average_hit_rate: f64,
    pub average_provider_latency_ms: f64,
    pub total_requests: i64,
    pub failed_translations: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoricalStats {
    pub days: u32,
    /// Keyed by UTC date (`YYYY-MM-DD`)
    pub by_day: BTreeMap<String, DayStats>,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Anomaly {
    SuddenHitRateDrop {
        from: f64,
        to: f64,
        at: DateTime<Utc>,
    },
    HighFailureRate {
        count: usize,
        affected: Vec<DateTime<Utc>>,
    },
    HighLatencyPeriods {
        normal_latency_ms: f64,
        count: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub period: &'static str,
    pub anomalies: Vec<Anomaly>,
    pub has_anomalies: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStatus {
    pub healthy: bool,
    pub status: &'static str,
    pub cache_hit_rate: f64,
    pub average_provider_latency_ms: f64,
    pub failed_translations: i64,
    pub anomaly_count: usize,
    pub last_updated: DateTime<Utc>,
}

pub struct MetricsEngine {
    db: Database,
    clock: SharedClock,
    window: Mutex<Window>,
}

impl MetricsEngine {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        let window = Window::new(clock.now());
        Self {
            db,
            clock,
            window: Mutex::new(window),
        }
    }

    pub fn record_cache_hit(&self, tier: CacheTier) {
        let mut window = self.window.lock();
        window.cache_hits += 1;
        window.total_requests += 1;
        match tier {
            CacheTier::Memory => window.memory_hits += 1,
            CacheTier::Durable => window.durable_hits += 1,
        }
    }

    pub fn record_cache_miss(&self) {
        let mut window = self.window.lock();
        window.cache_misses += 1;
        window.total_requests += 1;
    }

    /// Time spent consulting a cache tier, hit or miss.
    pub fn record_tier_latency(&self, tier: CacheTier, latency_ms: f64) {
        let mut window = self.window.lock();
        match tier {
            CacheTier::Memory => window.memory_latencies.push(latency_ms),
            CacheTier::Durable => window.db_latencies.push(latency_ms),
        }
    }

    pub fn record_provider_latency(&self, latency_ms: f64) {
        self.window.lock().provider_latencies.push(latency_ms);
    }

    pub fn record_failed_translation(&self) {
        self.window.lock().failed_translations += 1;
    }

    pub fn record_stale_serve(&self) {
        self.window.lock().stale_serves += 1;
    }

    /// Aggregates of the unflushed window.
    pub fn live(&self) -> WindowSummary {
        self.window.lock().summary()
    }

    /// Discard the current window.
    pub fn reset(&self) {
        *self.window.lock() = Window::new(self.clock.now());
    }

    /// Persist the current window as a snapshot and start a new one.
    ///
    /// Returns `Ok(None)` when the window saw no requests. If persisting
    /// fails the taken window is merged back so nothing is lost.
    pub async fn flush(&self) -> StoreResult<Option<FlushReport>> {
        let now = self.clock.now();
        let taken = {
            let mut window = self.window.lock();
            if window.total_requests == 0 {
                return Ok(None);
            }
            std::mem::replace(&mut *window, Window::new(now))
        };

        let summary = taken.summary();
        let mut row = MetricsSnapshotRow {
            id: 0,
            period_start: summary.started_at.timestamp_millis(),
            period_end: now.timestamp_millis(),
            cache_hit_rate: summary.cache_hit_rate,
            cache_miss_rate: summary.cache_miss_rate,
            total_requests: summary.total_requests as i64,
            provider_latency_ms: summary.provider_latency_ms,
            db_latency_ms: summary.db_latency_ms,
            memory_latency_ms: summary.memory_latency_ms,
            failed_translations: summary.failed_translations as i64,
            stale_serves: summary.stale_serves as i64,
        };

        match self.db.insert_metrics_snapshot(&row).await {
            Ok(id) => row.id = id,
            Err(e) => {
                self.window.lock().merge(taken);
                return Err(e);
            }
        }

        let slo_breached = row.cache_hit_rate < HIT_RATE_SLO;
        if slo_breached {
            warn!(
                hit_rate = row.cache_hit_rate,
                target = HIT_RATE_SLO,
                "⚠️ Cache hit rate below target"
            );
        }
        info!(
            hit_rate = row.cache_hit_rate,
            requests = row.total_requests,
            provider_latency_ms = row.provider_latency_ms,
            "📊 Metrics flushed"
        );

        Ok(Some(FlushReport {
            snapshot: row.into(),
            slo_breached,
        }))
    }

    /// Snapshots from the last 24 hours (at most 24) plus the live window.
    pub async fn realtime_stats(&self) -> StoreResult<RealtimeStats> {
        let since = self.clock.now_millis() - REALTIME_WINDOW_MS;
        let snapshots: Vec<MetricsSnapshot> = self
            .db
            .metrics_snapshots_since(since, REALTIME_MAX_SNAPSHOTS)
            .await?
            .into_iter()
            .map(MetricsSnapshot::from)
            .collect();

        let hit_rates: Vec<f64> = snapshots.iter().map(|s| s.cache_hit_rate).collect();
        let latencies: Vec<f64> = snapshots.iter().map(|s| s.provider_latency_ms).collect();
        let average_hit_rate = round2(average(&hit_rates));

        Ok(RealtimeStats {
            period: "last_24h",
            average_hit_rate,
            average_provider_latency_ms: average(&latencies).round(),
            total_requests: snapshots.iter().map(|s| s.total_requests).sum(),
            total_failed_translations: snapshots.iter().map(|s| s.failed_translations).sum(),
            total_stale_serves: snapshots.iter().map(|s| s.stale_serves).sum(),
            warning_flag: (average_hit_rate < HIT_RATE_SLO).then_some("LOW_HIT_RATE"),
            live: self.live(),
            snapshots,
        })
    }

    /// Per-day aggregates over the last `days` days with an overall trend.
    pub async fn historical_stats(&self, days: u32) -> StoreResult<HistoricalStats> {
        let since = self.clock.now_millis() - i64::from(days) * REALTIME_WINDOW_MS;
        let mut rows = self.db.metrics_snapshots_since(since, i64::MAX).await?;
        rows.reverse();
        let snapshots: Vec<MetricsSnapshot> = rows.into_iter().map(MetricsSnapshot::from).collect();

        let mut grouped: BTreeMap<String, Vec<&MetricsSnapshot>> = BTreeMap::new();
        for snapshot in &snapshots {
            grouped
                .entry(snapshot.period_end.format("%Y-%m-%d").to_string())
                .or_default()
                .push(snapshot);
        }

        let by_day = grouped
            .into_iter()
            .map(|(day, group)| {
                let hit_rates: Vec<f64> = group.iter().map(|s| s.cache_hit_rate).collect();
                let latencies: Vec<f64> = group.iter().map(|s| s.provider_latency_ms).collect();
                let stats = DayStats {
                    snapshots: group.len(),
                    average_hit_rate: round2(average(&hit_rates)),
                    average_provider_latency_ms: average(&latencies).round(),
                    total_requests: group.iter().map(|s| s.total_requests).sum(),
                    failed_translations: group.iter().map(|s| s.failed_translations).sum(),
                };
                (day, stats)
            })
            .collect();

        Ok(HistoricalStats {
            days,
            by_day,
            trend: trend(&snapshots),
        })
    }

    /// Scan the last hour of snapshots (at most 12) for anomalies.
    pub async fn detect_anomalies(&self) -> StoreResult<AnomalyReport> {
        let since = self.clock.now_millis() - ANOMALY_WINDOW_MS;
        let recent: Vec<MetricsSnapshot> = self
            .db
            .metrics_snapshots_since(since, ANOMALY_MAX_SNAPSHOTS)
            .await?
            .into_iter()
            .map(MetricsSnapshot::from)
            .collect();

        let anomalies = find_anomalies(&recent);
        Ok(AnomalyReport {
            period: "last_1h",
            has_anomalies: !anomalies.is_empty(),
            anomalies,
        })
    }

    /// Healthy iff the 24 h average hit rate beats the SLO and no anomalies are open.
    pub async fn dashboard_status(&self) -> StoreResult<DashboardStatus> {
        let realtime = self.realtime_stats().await?;
        let anomalies = self.detect_anomalies().await?;
        let healthy = realtime.average_hit_rate > HIT_RATE_SLO && !anomalies.has_anomalies;

        Ok(DashboardStatus {
            healthy,
            status: if healthy { "OK" } else { "WARNING" },
            cache_hit_rate: realtime.average_hit_rate,
            average_provider_latency_ms: realtime.average_provider_latency_ms,
            failed_translations: realtime.total_failed_translations,
            anomaly_count: anomalies.anomalies.len(),
            last_updated: self.clock.now(),
        })
    }
}

/// `recent` is ordered newest first.
fn find_anomalies(recent: &[MetricsSnapshot]) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    if recent.is_empty() {
        return anomalies;
    }

    if let [current, previous, ..] = recent {
        if current.cache_hit_rate < previous.cache_hit_rate - HIT_RATE_DROP_POINTS {
            anomalies.push(Anomaly::SuddenHitRateDrop {
                from: previous.cache_hit_rate,
                to: current.cache_hit_rate,
                at: current.period_end,
            });
        }
    }

    let failing: Vec<DateTime<Utc>> = recent
        .iter()
        .filter(|s| s.failed_translations > FAILURE_BURST_THRESHOLD)
        .map(|s| s.period_end)
        .collect();
    if !failing.is_empty() {
        anomalies.push(Anomaly::HighFailureRate {
            count: failing.len(),
            affected: failing,
        });
    }

    let latencies: Vec<f64> = recent.iter().map(|s| s.provider_latency_ms).collect();
    let normal = average(&latencies);
    let spikes = latencies
        .iter()
        .filter(|&&l| l > normal * LATENCY_SPIKE_FACTOR)
        .count();
    if spikes > 0 {
        anomalies.push(Anomaly::HighLatencyPeriods {
            normal_latency_ms: normal.round(),
            count: spikes,
        });
    }

    anomalies
}

/// `snapshots` is ordered oldest first.
fn trend(snapshots: &[MetricsSnapshot]) -> Trend {
    match (snapshots.first(), snapshots.last()) {
        (Some(first), Some(last)) if snapshots.len() >= 2 => {
            if last.cache_hit_rate > first.cache_hit_rate + TREND_THRESHOLD_POINTS {
                Trend::Improving
            } else if last.cache_hit_rate < first.cache_hit_rate - TREND_THRESHOLD_POINTS {
                Trend::Degrading
            } else {
                Trend::Stable
            }
        }
        _ => Trend::InsufficientData,
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use std::time::Duration;

    async fn create_engine() -> (MetricsEngine, Arc<ManualClock>, Database) {
        let clock = Arc::new(ManualClock::default());
        let db = Database::in_memory().await.unwrap();
        (MetricsEngine::new(db.clone(), clock.clone()), clock, db)
    }

    fn record(engine: &MetricsEngine, hits: u32, misses: u32) {
        for _ in 0..hits {
            engine.record_cache_hit(CacheTier::Memory);
        }
        for _ in 0..misses {
            engine.record_cache_miss();
        }
    }

    fn snapshot(hit_rate: f64, failed: i64, latency: f64, minutes_ago: i64) -> MetricsSnapshot {
        let at = Utc::now() - chrono::Duration::minutes(minutes_ago);
        MetricsSnapshot {
            id: 0,
            period_start: at,
            period_end: at,
            cache_hit_rate: hit_rate,
            cache_miss_rate: 100.0 - hit_rate,
            total_requests: 100,
            provider_latency_ms: latency,
            db_latency_ms: 0.0,
            memory_latency_ms: 0.0,
            failed_translations: failed,
            stale_serves: 0,
        }
    }

    // ==================== Flush Tests ====================

    #[tokio::test]
    async fn test_flush_empty_window_is_noop() {
        let (engine, _, db) = create_engine().await;
        assert!(engine.flush().await.unwrap().is_none());
        assert!(db.metrics_snapshots_since(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_96_of_100_meets_slo() {
        let (engine, clock, _) = create_engine().await;
        record(&engine, 96, 4);
        clock.advance(Duration::from_secs(60));

        let report = engine.flush().await.unwrap().unwrap();
        assert!(report.snapshot.cache_hit_rate >= 95.0);
        assert_eq!(report.snapshot.cache_hit_rate, 96.0);
        assert_eq!(report.snapshot.cache_miss_rate, 4.0);
        assert_eq!(report.snapshot.total_requests, 100);
        assert!(!report.slo_breached);
    }

    #[tokio::test]
    async fn test_flush_50_of_100_breaches_slo() {
        let (engine, _, _) = create_engine().await;
        record(&engine, 50, 50);

        let report = engine.flush().await.unwrap().unwrap();
        assert_eq!(report.snapshot.cache_hit_rate, 50.0);
        assert!(report.slo_breached);
    }

    #[tokio::test]
    async fn test_flush_resets_window() {
        let (engine, _, _) = create_engine().await;
        record(&engine, 3, 1);
        engine.record_failed_translation();
        engine.record_stale_serve();
        engine.flush().await.unwrap();

        let live = engine.live();
        assert_eq!(live.total_requests, 0);
        assert_eq!(live.failed_translations, 0);
        assert_eq!(live.stale_serves, 0);
        assert!(engine.flush().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_persist_merges_window_back() {
        let (engine, _, db) = create_engine().await;
        record(&engine, 2, 2);
        db.close().await;

        assert!(engine.flush().await.is_err());
        assert_eq!(engine.live().total_requests, 4);
        assert_eq!(engine.live().cache_hits, 2);
        assert_eq!(engine.live().memory_hits, 2);
    }

    #[tokio::test]
    async fn test_latency_averages_rounded() {
        let (engine, _, _) = create_engine().await;
        engine.record_cache_miss();
        engine.record_provider_latency(100.0);
        engine.record_provider_latency(201.0);
        engine.record_tier_latency(CacheTier::Durable, 4.0);
        engine.record_tier_latency(CacheTier::Memory, 0.4);

        let report = engine.flush().await.unwrap().unwrap();
        assert_eq!(report.snapshot.provider_latency_ms, 151.0);
        assert_eq!(report.snapshot.db_latency_ms, 4.0);
        assert_eq!(report.snapshot.memory_latency_ms, 0.0);
    }

    #[test]
    fn test_hit_rate_rounding() {
        let mut window = Window::new(Utc::now());
        window.cache_hits = 2;
        window.total_requests = 3;
        let summary = window.summary();
        assert_eq!(summary.cache_hit_rate, 66.67);
        assert_eq!(summary.cache_miss_rate, 33.33);
    }

    // ==================== Realtime / Dashboard Tests ====================

    #[tokio::test]
    async fn test_realtime_stats_and_dashboard() {
        let (engine, clock, _) = create_engine().await;
        record(&engine, 99, 1);
        engine.flush().await.unwrap();
        clock.advance(Duration::from_secs(60));
        record(&engine, 97, 3);
        engine.flush().await.unwrap();
        record(&engine, 1, 0);

        let stats = engine.realtime_stats().await.unwrap();
        assert_eq!(stats.snapshots.len(), 2);
        assert_eq!(stats.average_hit_rate, 98.0);
        assert_eq!(stats.total_requests, 200);
        assert_eq!(stats.warning_flag, None);
        assert_eq!(stats.live.total_requests, 1);

        let dashboard = engine.dashboard_status().await.unwrap();
        assert!(dashboard.healthy);
        assert_eq!(dashboard.status, "OK");
    }

    #[tokio::test]
    async fn test_realtime_low_hit_rate_flag() {
        let (engine, _, _) = create_engine().await;
        record(&engine, 50, 50);
        engine.flush().await.unwrap();

        let stats = engine.realtime_stats().await.unwrap();
        assert_eq!(stats.warning_flag, Some("LOW_HIT_RATE"));
        assert!(!engine.dashboard_status().await.unwrap().healthy);
    }

    #[tokio::test]
    async fn test_realtime_excludes_old_snapshots() {
        let (engine, clock, _) = create_engine().await;
        record(&engine, 10, 0);
        engine.flush().await.unwrap();
        clock.advance(Duration::from_secs(25 * 60 * 60));

        assert!(engine.realtime_stats().await.unwrap().snapshots.is_empty());
    }

    // ==================== Historical Tests ====================

    #[tokio::test]
    async fn test_historical_trend_improving() {
        let (engine, clock, _) = create_engine().await;
        record(&engine, 80, 20);
        engine.flush().await.unwrap();
        clock.advance(Duration::from_secs(24 * 60 * 60));
        record(&engine, 99, 1);
        engine.flush().await.unwrap();

        let stats = engine.historical_stats(7).await.unwrap();
        assert_eq!(stats.trend, Trend::Improving);
        assert_eq!(stats.by_day.len(), 2);
        assert!(stats.by_day.values().all(|d| d.snapshots == 1));
    }

    #[tokio::test]
    async fn test_historical_insufficient_data() {
        let (engine, _, _) = create_engine().await;
        record(&engine, 1, 0);
        engine.flush().await.unwrap();
        assert_eq!(
            engine.historical_stats(7).await.unwrap().trend,
            Trend::InsufficientData
        );
    }

    #[test]
    fn test_trend_thresholds() {
        let older = snapshot(90.0, 0, 0.0, 10);
        assert_eq!(trend(&[older.clone(), snapshot(91.5, 0, 0.0, 0)]), Trend::Stable);
        assert_eq!(trend(&[older.clone(), snapshot(87.0, 0, 0.0, 0)]), Trend::Degrading);
        assert_eq!(trend(&[older, snapshot(92.5, 0, 0.0, 0)]), Trend::Improving);
    }

    // ==================== Anomaly Tests ====================

    #[test]
    fn test_sudden_hit_rate_drop() {
        let anomalies = find_anomalies(&[
            snapshot(80.0, 0, 100.0, 0),
            snapshot(95.0, 0, 100.0, 5),
        ]);
        assert_eq!(anomalies.len(), 1);
        assert!(matches!(
            anomalies[0],
            Anomaly::SuddenHitRateDrop { from, to, .. } if from == 95.0 && to == 80.0
        ));
    }

    #[test]
    fn test_small_drop_not_flagged() {
        let anomalies = find_anomalies(&[
            snapshot(90.0, 0, 100.0, 0),
            snapshot(95.0, 0, 100.0, 5),
        ]);
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_failure_burst() {
        let anomalies = find_anomalies(&[
            snapshot(99.0, 6, 100.0, 0),
            snapshot(99.0, 5, 100.0, 5),
        ]);
        assert_eq!(anomalies.len(), 1);
        assert!(matches!(anomalies[0], Anomaly::HighFailureRate { count: 1, .. }));
    }

    #[test]
    fn test_latency_spike() {
        let anomalies = find_anomalies(&[
            snapshot(99.0, 0, 400.0, 0),
            snapshot(99.0, 0, 100.0, 5),
            snapshot(99.0, 0, 100.0, 10),
            snapshot(99.0, 0, 100.0, 15),
        ]);
        // average = 175, threshold = 262.5
        assert_eq!(
            anomalies,
            vec![Anomaly::HighLatencyPeriods {
                normal_latency_ms: 175.0,
                count: 1
            }]
        );
    }

    #[test]
    fn test_no_snapshots_no_anomalies() {
        assert!(find_anomalies(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_detect_anomalies_reads_last_hour() {
        let (engine, clock, _) = create_engine().await;
        record(&engine, 99, 1);
        engine.flush().await.unwrap();
        clock.advance(Duration::from_secs(60));
        record(&engine, 50, 50);
        engine.flush().await.unwrap();

        let report = engine.detect_anomalies().await.unwrap();
        assert!(report.has_anomalies);
        assert!(matches!(
            report.anomalies[0],
            Anomaly::SuddenHitRateDrop { .. }
        ));
    }
}
