//! Performance metrics and statistics tracking for the scoring gateway.

use crate::error::PipelineError;
use crate::types::result::RiskLevel;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Latency samples kept per stage
const MAX_SAMPLES: usize = 10_000;

/// Request stage a latency sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Alignment, scaling and classification
    Scoring,
    /// Image normalization, OCR and field extraction
    Receipt,
    /// Whole request
    Total,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Scoring, Stage::Receipt, Stage::Total];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scoring => "scoring",
            Stage::Receipt => "receipt",
            Stage::Total => "total",
        }
    }
}

/// Metrics collector for the scoring pipeline
pub struct PipelineMetrics {
    /// Requests that produced a result
    pub requests_processed: AtomicU64,
    /// Requests that ended in an error
    pub requests_failed: AtomicU64,
    failures_by_kind: RwLock<HashMap<&'static str, u64>>,
    results_by_level: RwLock<HashMap<RiskLevel, u64>>,
    /// Stage latencies (in microseconds)
    stage_times: RwLock<HashMap<Stage, Vec<u64>>>,
    /// Fraud score distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            requests_processed: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            failures_by_kind: RwLock::new(HashMap::new()),
            results_by_level: RwLock::new(HashMap::new()),
            stage_times: RwLock::new(HashMap::new()),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a completed request
    pub fn record_result(&self, fraud_score: f64, risk_level: RiskLevel) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut by_level) = self.results_by_level.write() {
            *by_level.entry(risk_level).or_insert(0) += 1;
        }

        let bucket = (fraud_score.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    /// Record a failed request
    pub fn record_failure(&self, error: &PipelineError) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut by_kind) = self.failures_by_kind.write() {
            *by_kind.entry(error.kind()).or_insert(0) += 1;
        }
    }

    /// Record how long a stage took
    pub fn record_stage(&self, stage: Stage, duration: Duration) {
        if let Ok(mut times) = self.stage_times.write() {
            let samples = times.entry(stage).or_default();
            samples.push(duration.as_micros() as u64);
            // Keep only the most recent half once full
            if samples.len() > MAX_SAMPLES {
                samples.drain(0..MAX_SAMPLES / 2);
            }
        }
    }

    /// Latency statistics for one stage
    pub fn get_stage_stats(&self, stage: Stage) -> ProcessingStats {
        let times = match self.stage_times.read() {
            Ok(times) => times,
            Err(_) => return ProcessingStats::default(),
        };
        match times.get(&stage) {
            Some(samples) => ProcessingStats::from_samples(samples),
            None => ProcessingStats::default(),
        }
    }

    /// Get current throughput (requests per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.requests_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get score distribution
    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets
            .read()
            .map(|buckets| *buckets)
            .unwrap_or_default()
    }

    /// Get results by risk level
    pub fn get_results_by_level(&self) -> HashMap<RiskLevel, u64> {
        self.results_by_level
            .read()
            .map(|by_level| by_level.clone())
            .unwrap_or_default()
    }

    /// Get failures by error kind
    pub fn get_failures_by_kind(&self) -> HashMap<&'static str, u64> {
        self.failures_by_kind
            .read()
            .map(|by_kind| by_kind.clone())
            .unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let processed = self.requests_processed.load(Ordering::Relaxed);
        let failed = self.requests_failed.load(Ordering::Relaxed);
        let total = processed + failed;
        let failure_rate = if total > 0 {
            (failed as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        let throughput = self.get_throughput();
        let by_level = self.get_results_by_level();
        let by_kind = self.get_failures_by_kind();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║         FRAUD + RECEIPT GATEWAY - METRICS SUMMARY            ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Requests Scored: {:>8}  │  Throughput: {:>6.1} req/s       ║",
            processed, throughput
        );
        info!(
            "║ Requests Failed: {:>8}  │  Failure Rate: {:>6.1}%          ║",
            failed, failure_rate
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        for stage in Stage::ALL {
            let stats = self.get_stage_stats(stage);
            info!(
                "║ {:<8} (μs): mean={:>7} p50={:>7} p95={:>7} p99={:>7}",
                stage.as_str(),
                stats.mean_us,
                stats.p50_us,
                stats.p95_us,
                stats.p99_us
            );
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Results by Risk Level:                                       ║");
        for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
            let count = by_level.get(&level).copied().unwrap_or(0);
            let pct = if processed > 0 {
                (count as f64 / processed as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:10}: {:>6} ({:>5.1}%)", level.as_str(), count, pct);
        }
        if !by_kind.is_empty() {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Failures by Kind:                                            ║");
            for (kind, count) in &by_kind {
                info!("║   {:10}: {:>6}", kind, count);
            }
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Fraud Score Distribution:                                    ║");
        let scored: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if scored > 0 {
                (count as f64 / scored as f64) * 100.0
            } else {
                0.0
            };
            let bar_len = (pct / 2.0) as usize;
            let bar: String = "█".repeat(bar_len.min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl ProcessingStats {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let percentile = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        Self {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }
}

/// Periodic metrics reporter
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Log a summary every interval, forever
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
