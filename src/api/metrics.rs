//! Prometheus metrics for the control APIs
//!
//! Registered once into the default registry and exported by the binary's
//! `/metrics` server.

use crate::error::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

/// Counters and timings for REST operations
pub struct ApiMetrics {
    /// Operations by name and outcome
    pub operations: IntCounterVec,
    /// Operation latency by name
    pub duration: HistogramVec,
    /// 1 while the controller holds an assembled mirror
    pub mirrored: IntGauge,
}

static METRICS: OnceLock<Option<ApiMetrics>> = OnceLock::new();

impl ApiMetrics {
    fn build() -> prometheus::Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new("mirrorvol_operations_total", "Control operations by outcome"),
            &["operation", "outcome"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "mirrorvol_operation_duration_seconds",
                "Duration of control operations",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["operation"],
        )?;
        let mirrored = IntGauge::new("mirrorvol_mirror_assembled", "Whether a mirror is assembled")?;

        let collectors: [Box<dyn prometheus::core::Collector>; 3] = [
            Box::new(operations.clone()),
            Box::new(duration.clone()),
            Box::new(mirrored.clone()),
        ];
        for collector in collectors {
            if let Err(e) = prometheus::register(collector) {
                warn!("Metric registration failed: {}", e);
            }
        }

        Ok(Self {
            operations,
            duration,
            mirrored,
        })
    }
}

/// Process-wide metrics, if they could be created
pub fn metrics() -> Option<&'static ApiMetrics> {
    METRICS
        .get_or_init(|| match ApiMetrics::build() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!("Metrics disabled: {}", e);
                None
            }
        })
        .as_ref()
}

/// Record the outcome and latency of one operation
pub fn observe<T>(operation: &str, started: Instant, result: &Result<T>) {
    if let Some(m) = metrics() {
        let outcome = match result {
            Ok(_) => "success",
            Err(e) => e.code(),
        };
        m.operations.with_label_values(&[operation, outcome]).inc();
        m.duration
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
    }
}

/// Publish whether a mirror is currently assembled
pub fn set_mirrored(mirrored: bool) {
    if let Some(m) = metrics() {
        m.mirrored.set(i64::from(mirrored));
    }
}

/// Render the default registry in text exposition format
pub fn render() -> Vec<u8> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_observe_counts_outcomes() {
        let started = Instant::now();
        observe::<()>("test_op", started, &Ok(()));
        observe::<()>("test_op", started, &Err(Error::PeerCount { count: 1 }));

        let m = metrics().unwrap();
        assert!(
            m.operations
                .with_label_values(&["test_op", "success"])
                .get()
                >= 1
        );
        assert!(
            m.operations
                .with_label_values(&["test_op", "invalid_peer_count"])
                .get()
                >= 1
        );

        let text = String::from_utf8(render()).unwrap();
        assert!(text.contains("mirrorvol_operations_total"));
    }
}
