//! Outcome observer and per-request accounting backed by the `metrics` facade.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::Serialize;
use time::OffsetDateTime;

use crate::application::observer::{Outcome, OutcomeObserver};
use crate::cache::lock::lock_recovering;
use crate::domain::types::ResourceKey;

use super::telemetry::{OUTCOME_COUNTER, READ_LATENCY_HISTOGRAM};

const TARGET: &str = "infra::metrics";

/// Recent user reads kept for `/metrics/recent`.
pub const DEFAULT_REQUEST_HISTORY: usize = 1_000;

/// Publishes each outcome as a labelled counter and keeps local tallies for
/// the service's own `/metrics` endpoint.
#[derive(Debug, Default)]
pub struct MetricsObserver {
    hit: AtomicU64,
    miss: AtomicU64,
    write_invalidate: AtomicU64,
    degraded_invalidate: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OutcomeTallies {
    pub hit: u64,
    pub miss: u64,
    pub write_invalidate: u64,
    pub degraded_invalidate: u64,
    /// `hit / (hit + miss)`, or 0 before the first read.
    pub hit_rate: f64,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, outcome: Outcome) -> &AtomicU64 {
        match outcome {
            Outcome::Hit => &self.hit,
            Outcome::Miss => &self.miss,
            Outcome::WriteInvalidate => &self.write_invalidate,
            Outcome::DegradedInvalidate => &self.degraded_invalidate,
        }
    }

    pub fn snapshot(&self) -> OutcomeTallies {
        let hit = self.hit.load(Ordering::Relaxed);
        let miss = self.miss.load(Ordering::Relaxed);
        let reads = hit + miss;
        OutcomeTallies {
            hit,
            miss,
            write_invalidate: self.write_invalidate.load(Ordering::Relaxed),
            degraded_invalidate: self.degraded_invalidate.load(Ordering::Relaxed),
            hit_rate: if reads == 0 {
                0.0
            } else {
                hit as f64 / reads as f64
            },
        }
    }

    pub fn reset(&self) {
        for slot in [
            &self.hit,
            &self.miss,
            &self.write_invalidate,
            &self.degraded_invalidate,
        ] {
            slot.store(0, Ordering::Relaxed);
        }
    }
}

impl OutcomeObserver for MetricsObserver {
    fn observe(&self, _key: &ResourceKey, outcome: Outcome) {
        self.slot(outcome).fetch_add(1, Ordering::Relaxed);
        counter!(OUTCOME_COUNTER, "outcome" => outcome.as_str()).increment(1);
    }
}

/// One served user read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSample {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub endpoint: String,
    pub response_time_ms: f64,
    /// Answered from the validator cache without a repository read.
    pub cache_hit: bool,
    pub status: u16,
    pub response_bytes: u64,
}

impl RequestSample {
    pub fn new(
        endpoint: impl Into<String>,
        elapsed: Duration,
        cache_hit: bool,
        status: u16,
        response_bytes: u64,
    ) -> Self {
        Self {
            at: OffsetDateTime::now_utc(),
            endpoint: endpoint.into(),
            response_time_ms: elapsed.as_micros() as f64 / 1_000.0,
            cache_hit,
            status,
            response_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effectiveness {
    Unknown,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl Effectiveness {
    fn from_hit_percent(requests: u64, percent: f64) -> Self {
        match percent {
            _ if requests == 0 => Self::Unknown,
            p if p > 80.0 => Self::Excellent,
            p if p > 60.0 => Self::Good,
            p if p > 40.0 => Self::Fair,
            _ => Self::Poor,
        }
    }
}

/// Aggregates over every recorded read since start or the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RequestSummary {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub status_200: u64,
    pub status_304: u64,
    pub cache_hit_percent: f64,
    pub avg_response_ms: f64,
    pub avg_response_ms_cached: f64,
    pub avg_response_ms_uncached: f64,
    pub avg_response_bytes_200: f64,
    pub total_response_bytes: u64,
    /// Estimated body bytes not sent thanks to 304 answers.
    pub bandwidth_saved_bytes: u64,
    pub bandwidth_saved_percent: f64,
    pub repository_reads_saved: u64,
    pub uptime_secs: u64,
    pub requests_per_second: f64,
    pub effectiveness: Effectiveness,
}

#[derive(Debug, Default)]
struct Totals {
    requests: u64,
    hits: u64,
    misses: u64,
    status_200: u64,
    status_304: u64,
    reads_saved: u64,
    bytes_200: u64,
    total_ms: f64,
    cached_ms: f64,
    uncached_ms: f64,
}

impl Totals {
    fn add(&mut self, sample: &RequestSample) {
        self.requests += 1;
        self.total_ms += sample.response_time_ms;
        if sample.cache_hit {
            self.hits += 1;
            self.cached_ms += sample.response_time_ms;
            if sample.status == 304 {
                self.reads_saved += 1;
            }
        } else {
            self.misses += 1;
            self.uncached_ms += sample.response_time_ms;
        }
        match sample.status {
            304 => self.status_304 += 1,
            200 => {
                self.status_200 += 1;
                self.bytes_200 += sample.response_bytes;
            }
            _ => {}
        }
    }

    fn summarize(&self, uptime: Duration) -> RequestSummary {
        let ratio = |num: f64, den: u64| if den == 0 { 0.0 } else { num / den as f64 };

        let avg_bytes_200 = ratio(self.bytes_200 as f64, self.status_200);
        let saved = (avg_bytes_200 * self.status_304 as f64) as u64;
        let potential = self.bytes_200 + saved;
        let hit_percent = ratio(self.hits as f64 * 100.0, self.requests);

        RequestSummary {
            total_requests: self.requests,
            cache_hits: self.hits,
            cache_misses: self.misses,
            status_200: self.status_200,
            status_304: self.status_304,
            cache_hit_percent: hit_percent,
            avg_response_ms: ratio(self.total_ms, self.requests),
            avg_response_ms_cached: ratio(self.cached_ms, self.hits),
            avg_response_ms_uncached: ratio(self.uncached_ms, self.misses),
            avg_response_bytes_200: avg_bytes_200,
            total_response_bytes: self.bytes_200,
            bandwidth_saved_bytes: saved,
            bandwidth_saved_percent: ratio(saved as f64 * 100.0, potential),
            repository_reads_saved: self.reads_saved,
            uptime_secs: uptime.as_secs(),
            requests_per_second: self.requests as f64 / uptime.as_secs_f64().max(1.0),
            effectiveness: Effectiveness::from_hit_percent(self.requests, hit_percent),
        }
    }
}

struct LogState {
    history: VecDeque<RequestSample>,
    totals: Totals,
    started_at: Instant,
}

/// Bounded history of user reads plus running totals.
pub struct RequestLog {
    capacity: usize,
    state: Mutex<LogState>,
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_HISTORY)
    }
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(LogState {
                history: VecDeque::with_capacity(capacity),
                totals: Totals::default(),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, sample: RequestSample) {
        let outcome = if sample.cache_hit { "hit" } else { "miss" };
        histogram!(READ_LATENCY_HISTOGRAM, "outcome" => outcome).record(sample.response_time_ms);

        let mut state = lock_recovering(&self.state, TARGET, "record");
        state.totals.add(&sample);
        if state.history.len() == self.capacity {
            state.history.pop_front();
        }
        state.history.push_back(sample);
    }

    pub fn summary(&self) -> RequestSummary {
        let state = lock_recovering(&self.state, TARGET, "summary");
        state.totals.summarize(state.started_at.elapsed())
    }

    /// Up to `limit` samples, newest first.
    pub fn recent(&self, limit: usize) -> Vec<RequestSample> {
        lock_recovering(&self.state, TARGET, "recent")
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Clear history and totals, and restart the uptime clock.
    pub fn reset(&self) {
        let mut state = lock_recovering(&self.state, TARGET, "reset");
        state.history.clear();
        state.totals = Totals::default();
        state.started_at = Instant::now();
    }
}
