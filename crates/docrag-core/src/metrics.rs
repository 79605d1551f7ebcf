//! Per-stage latency tracking and aggregate query statistics.
//!
//! Timers live in a [`StageTimers`] set. The collector owns one shared set
//! for simple callers, and hands out request-scoped sets through
//! [`MetricsCollector::scope`] so concurrent queries never touch each
//! other's timers. Finished queries are appended to an in-memory log.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::Meta;

/// Characters of the query kept by [`MetricsCollector::recent_queries`].
const RECENT_QUERY_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetric {
    pub stage: String,
    pub latency_ms: f64,
    pub input_count: usize,
    pub output_count: usize,
    #[serde(default)]
    pub metadata: Meta,
}

impl StageMetric {
    pub fn new(stage: impl Into<String>, latency_ms: f64) -> Self {
        Self { stage: stage.into(), latency_ms, input_count: 0, output_count: 0, metadata: Meta::new() }
    }

    pub fn with_counts(mut self, input_count: usize, output_count: usize) -> Self {
        self.input_count = input_count;
        self.output_count = output_count;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetric {
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub total_latency_ms: f64,
    pub stages: Vec<StageMetric>,
    pub chunks_retrieved: usize,
    pub chunks_after_rerank: usize,
    pub answer_length: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Counts reported when a query finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCounts {
    pub chunks_retrieved: usize,
    pub chunks_after_rerank: usize,
    pub answer_length: usize,
    pub success: bool,
    pub error: Option<String>,
}

impl QueryCounts {
    pub fn succeeded(chunks_retrieved: usize, chunks_after_rerank: usize, answer_length: usize) -> Self {
        Self { chunks_retrieved, chunks_after_rerank, answer_length, success: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { chunks_retrieved: 0, chunks_after_rerank: 0, answer_length: 0, success: false, error: Some(error.into()) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLatency {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_queries: usize,
    pub successful_queries: usize,
    pub error_rate: f64,
    pub avg_total_latency_ms: f64,
    pub min_total_latency_ms: f64,
    pub max_total_latency_ms: f64,
    pub avg_chunks_retrieved: f64,
    pub avg_chunks_after_rerank: f64,
    pub avg_answer_length: f64,
    pub stage_latencies: BTreeMap<String, StageLatency>,
}

/// Display row for recent-query listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentQuery {
    pub query: String,
    pub total_ms: f64,
    pub chunks: usize,
    pub reranked: usize,
    pub answer_len: usize,
    pub success: bool,
    pub stages: BTreeMap<String, f64>,
}

/// Running stage timers for one request.
#[derive(Debug, Default)]
pub struct StageTimers {
    enabled: bool,
    started: HashMap<String, Instant>,
}

impl StageTimers {
    pub fn new(enabled: bool) -> Self { Self { enabled, started: HashMap::new() } }

    pub fn start_timer(&mut self, stage: &str) {
        if self.enabled {
            self.started.insert(stage.to_string(), Instant::now());
        }
    }

    /// `None` when disabled or when `stage` was never started.
    pub fn stop_timer(&mut self, stage: &str, input_count: usize, output_count: usize) -> Option<StageMetric> {
        self.stop_timer_with(stage, input_count, output_count, Meta::new())
    }

    pub fn stop_timer_with(
        &mut self,
        stage: &str,
        input_count: usize,
        output_count: usize,
        metadata: Meta,
    ) -> Option<StageMetric> {
        if !self.enabled {
            return None;
        }
        let started = self.started.remove(stage)?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(stage, latency_ms = elapsed_ms, input_count, output_count, "stage finished");
        Some(StageMetric { stage: stage.to_string(), latency_ms: round_to(elapsed_ms, 2), input_count, output_count, metadata })
    }

    pub fn clear(&mut self) { self.started.clear(); }
}

/// Process-wide query metrics.
#[derive(Debug)]
pub struct MetricsCollector {
    enabled: bool,
    timers: Mutex<StageTimers>,
    queries: RwLock<Vec<QueryMetric>>,
}

impl Default for MetricsCollector {
    fn default() -> Self { Self::new(true) }
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, timers: Mutex::new(StageTimers::new(enabled)), queries: RwLock::new(Vec::new()) }
    }

    pub fn is_enabled(&self) -> bool { self.enabled }

    /// Fresh timer set for one request.
    pub fn scope(&self) -> StageTimers { StageTimers::new(self.enabled) }

    pub fn start_timer(&self, stage: &str) { self.timers.lock().start_timer(stage); }

    pub fn stop_timer(&self, stage: &str, input_count: usize, output_count: usize) -> Option<StageMetric> {
        self.timers.lock().stop_timer(stage, input_count, output_count)
    }

    pub fn stop_timer_with(
        &self,
        stage: &str,
        input_count: usize,
        output_count: usize,
        metadata: Meta,
    ) -> Option<StageMetric> {
        self.timers.lock().stop_timer_with(stage, input_count, output_count, metadata)
    }

    /// Append a finished query to the log.
    ///
    /// When disabled the returned record is zeroed and nothing is stored.
    pub fn record_query(&self, query: &str, stages: Vec<StageMetric>, counts: QueryCounts) -> QueryMetric {
        if !self.enabled {
            return QueryMetric {
                query: query.to_string(),
                timestamp: Utc::now(),
                total_latency_ms: 0.0,
                stages: Vec::new(),
                chunks_retrieved: 0,
                chunks_after_rerank: 0,
                answer_length: 0,
                success: counts.success,
                error: counts.error,
            };
        }

        let total_ms: f64 = stages.iter().map(|s| s.latency_ms).sum();
        let metric = QueryMetric {
            query: query.to_string(),
            timestamp: Utc::now(),
            total_latency_ms: round_to(total_ms, 2),
            stages,
            chunks_retrieved: counts.chunks_retrieved,
            chunks_after_rerank: counts.chunks_after_rerank,
            answer_length: counts.answer_length,
            success: counts.success,
            error: counts.error,
        };
        info!(
            total_ms = metric.total_latency_ms,
            retrieved = metric.chunks_retrieved,
            reranked = metric.chunks_after_rerank,
            answer_len = metric.answer_length,
            success = metric.success,
            "query recorded"
        );
        self.queries.write().push(metric.clone());
        metric
    }

    /// Aggregate over every recorded query; `None` until one is recorded.
    pub fn summary(&self) -> Option<MetricsSummary> {
        let queries = self.queries.read();
        if queries.is_empty() {
            return None;
        }

        let total = queries.len();
        let n = total as f64;
        let successful = queries.iter().filter(|q| q.success).count();

        let mut per_stage: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for stage in queries.iter().flat_map(|q| q.stages.iter()) {
            per_stage.entry(stage.stage.clone()).or_default().push(stage.latency_ms);
        }
        let stage_latencies = per_stage
            .into_iter()
            .map(|(stage, times)| {
                let (min, max) = min_max(&times);
                let latency = StageLatency {
                    avg_ms: round_to(times.iter().sum::<f64>() / times.len() as f64, 2),
                    min_ms: round_to(min, 2),
                    max_ms: round_to(max, 2),
                    count: times.len(),
                };
                (stage, latency)
            })
            .collect();

        let totals: Vec<f64> = queries.iter().map(|q| q.total_latency_ms).collect();
        let (min_total, max_total) = min_max(&totals);
        let avg_of = |f: fn(&QueryMetric) -> usize| queries.iter().map(f).sum::<usize>() as f64 / n;

        Some(MetricsSummary {
            total_queries: total,
            successful_queries: successful,
            error_rate: round_to((total - successful) as f64 / n, 4),
            avg_total_latency_ms: round_to(totals.iter().sum::<f64>() / n, 2),
            min_total_latency_ms: round_to(min_total, 2),
            max_total_latency_ms: round_to(max_total, 2),
            avg_chunks_retrieved: round_to(avg_of(|q| q.chunks_retrieved), 1),
            avg_chunks_after_rerank: round_to(avg_of(|q| q.chunks_after_rerank), 1),
            avg_answer_length: round_to(avg_of(|q| q.answer_length), 0),
            stage_latencies,
        })
    }

    /// Last `n` queries, oldest first.
    pub fn recent_queries(&self, n: usize) -> Vec<RecentQuery> {
        let queries = self.queries.read();
        let skip = queries.len().saturating_sub(n);
        queries
            .iter()
            .skip(skip)
            .map(|q| RecentQuery {
                query: q.query.chars().take(RECENT_QUERY_CHARS).collect(),
                total_ms: q.total_latency_ms,
                chunks: q.chunks_retrieved,
                reranked: q.chunks_after_rerank,
                answer_len: q.answer_length,
                success: q.success,
                stages: q.stages.iter().map(|s| (s.stage.clone(), s.latency_ms)).collect(),
            })
            .collect()
    }

    /// Most recently recorded query with its full stage metrics.
    pub fn last_query(&self) -> Option<QueryMetric> { self.queries.read().last().cloned() }

    pub fn total_queries(&self) -> usize { self.queries.read().len() }

    pub fn reset(&self) {
        self.queries.write().clear();
        self.timers.lock().clear();
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}
