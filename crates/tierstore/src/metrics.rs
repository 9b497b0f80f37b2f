//! In-memory backend metrics.
//!
//! Counters and rolling averages behind one read-write lock. Rolling
//! averages are EWMAs weighted 0.9 toward history; derived rates are
//! computed from a single locked snapshot so they are internally
//! consistent.

use std::sync::RwLock;
use std::time::{Duration, SystemTime};

fn ewma(current: Option<f64>, sample: f64) -> Option<f64> {
    Some(match current {
        None => sample,
        Some(old) => (old * 9.0 + sample) / 10.0,
    })
}

#[derive(Debug, Default)]
struct MetricsInner {
    requests: u64,
    errors: u64,
    bytes_uploaded: u64,
    bytes_downloaded: u64,
    avg_latency_secs: Option<f64>,
    last_error: Option<String>,
    last_error_at: Option<SystemTime>,

    accelerated_requests: u64,
    accelerated_bytes: u64,
    avg_accelerated_latency_secs: Option<f64>,
    fallback_events: u64,

    multipart_started: u64,
    multipart_parts_uploaded: u64,
    multipart_completed: u64,
    multipart_failed: u64,
    multipart_bytes: u64,
    avg_part_size_bytes: Option<f64>,
    avg_multipart_latency_secs: Option<f64>,
}

/// Aggregates request, transfer, acceleration, and multipart metrics.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    inner: RwLock<MetricsInner>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed top-level request and its latency.
    pub fn record_request(&self, latency: Duration) {
        let mut m = self.inner.write().unwrap();
        m.requests += 1;
        m.avg_latency_secs = ewma(m.avg_latency_secs, latency.as_secs_f64());
    }

    /// Records one failed top-level request.
    pub fn record_error(&self, message: &str) {
        let mut m = self.inner.write().unwrap();
        m.errors += 1;
        m.last_error = Some(message.to_string());
        m.last_error_at = Some(SystemTime::now());
    }

    pub fn add_bytes_uploaded(&self, bytes: u64) {
        self.inner.write().unwrap().bytes_uploaded += bytes;
    }

    pub fn add_bytes_downloaded(&self, bytes: u64) {
        self.inner.write().unwrap().bytes_downloaded += bytes;
    }

    /// Records one request served by the accelerated endpoint.
    pub fn record_accelerated_request(&self, latency: Duration) {
        let mut m = self.inner.write().unwrap();
        m.accelerated_requests += 1;
        m.avg_accelerated_latency_secs =
            ewma(m.avg_accelerated_latency_secs, latency.as_secs_f64());
    }

    pub fn add_accelerated_bytes(&self, bytes: u64) {
        self.inner.write().unwrap().accelerated_bytes += bytes;
    }

    /// Records one accelerated-to-standard fallback event.
    pub fn record_fallback(&self) {
        self.inner.write().unwrap().fallback_events += 1;
    }

    pub fn record_multipart_started(&self) {
        self.inner.write().unwrap().multipart_started += 1;
    }

    pub fn record_part_uploaded(&self, size: u64) {
        let mut m = self.inner.write().unwrap();
        m.multipart_parts_uploaded += 1;
        m.multipart_bytes += size;
        m.avg_part_size_bytes = ewma(m.avg_part_size_bytes, size as f64);
    }

    pub fn record_multipart_completed(&self, latency: Duration) {
        let mut m = self.inner.write().unwrap();
        m.multipart_completed += 1;
        m.avg_multipart_latency_secs =
            ewma(m.avg_multipart_latency_secs, latency.as_secs_f64());
    }

    pub fn record_multipart_failed(&self) {
        self.inner.write().unwrap().multipart_failed += 1;
    }

    /// A consistent snapshot with derived rates.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let m = self.inner.read().unwrap();
        let requests = m.requests;
        let ratio = |num: u64| {
            if requests == 0 {
                0.0
            } else {
                num as f64 / requests as f64
            }
        };
        let throughput = |bytes: u64| match m.avg_latency_secs {
            Some(latency) if requests > 0 && latency > 0.0 => {
                bytes as f64 / (requests as f64 * latency)
            }
            _ => 0.0,
        };
        let multipart_finished = m.multipart_completed + m.multipart_failed;

        MetricsSnapshot {
            requests,
            errors: m.errors,
            bytes_uploaded: m.bytes_uploaded,
            bytes_downloaded: m.bytes_downloaded,
            avg_latency_secs: m.avg_latency_secs,
            last_error: m.last_error.clone(),
            last_error_at: m.last_error_at,
            accelerated_requests: m.accelerated_requests,
            accelerated_bytes: m.accelerated_bytes,
            avg_accelerated_latency_secs: m.avg_accelerated_latency_secs,
            fallback_events: m.fallback_events,
            multipart_started: m.multipart_started,
            multipart_parts_uploaded: m.multipart_parts_uploaded,
            multipart_completed: m.multipart_completed,
            multipart_failed: m.multipart_failed,
            multipart_bytes: m.multipart_bytes,
            avg_part_size_bytes: m.avg_part_size_bytes,
            avg_multipart_latency_secs: m.avg_multipart_latency_secs,
            error_rate: ratio(m.errors),
            acceleration_rate: ratio(m.accelerated_requests),
            fallback_rate: ratio(m.fallback_events),
            multipart_success_rate: if multipart_finished == 0 {
                0.0
            } else {
                m.multipart_completed as f64 / multipart_finished as f64
            },
            multipart_usage_rate: ratio(m.multipart_started),
            avg_parts_per_upload: if m.multipart_started == 0 {
                0.0
            } else {
                m.multipart_parts_uploaded as f64 / m.multipart_started as f64
            },
            upload_throughput_bytes_per_sec: throughput(m.bytes_uploaded),
            download_throughput_bytes_per_sec: throughput(m.bytes_downloaded),
        }
    }
}

/// Point-in-time metrics, raw counters plus derived rates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub avg_latency_secs: Option<f64>,
    pub last_error: Option<String>,
    pub last_error_at: Option<SystemTime>,

    pub accelerated_requests: u64,
    pub accelerated_bytes: u64,
    pub avg_accelerated_latency_secs: Option<f64>,
    pub fallback_events: u64,

    pub multipart_started: u64,
    pub multipart_parts_uploaded: u64,
    pub multipart_completed: u64,
    pub multipart_failed: u64,
    pub multipart_bytes: u64,
    pub avg_part_size_bytes: Option<f64>,
    pub avg_multipart_latency_secs: Option<f64>,

    pub error_rate: f64,
    pub acceleration_rate: f64,
    pub fallback_rate: f64,
    pub multipart_success_rate: f64,
    pub multipart_usage_rate: f64,
    pub avg_parts_per_upload: f64,
    pub upload_throughput_bytes_per_sec: f64,
    pub download_throughput_bytes_per_sec: f64,
}
