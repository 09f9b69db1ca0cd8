//! Prometheus counters for credential lifecycle outcomes.
//!
//! Registered once in the global default registry and exposed on `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_counter, register_counter_vec, Counter, CounterVec, Encoder, TextEncoder,
};

pub static METRICS: Lazy<LifecycleMetrics> = Lazy::new(LifecycleMetrics::register);

pub struct LifecycleMetrics {
    issued_total: CounterVec,
    pending_total: Counter,
    rejections_total: CounterVec,
    revocations_total: Counter,
}

impl LifecycleMetrics {
    fn register() -> Self {
        let issued_total = register_counter_vec!(
            opts!(
                "credgate_credentials_issued_total",
                "Secrets minted, by path (direct or approval)"
            ),
            &["path"]
        )
        .expect("failed to register credgate_credentials_issued_total");

        let pending_total = register_counter!(opts!(
            "credgate_requests_pending_total",
            "Creation requests parked for approval"
        ))
        .expect("failed to register credgate_requests_pending_total");

        let rejections_total = register_counter_vec!(
            opts!(
                "credgate_rejections_total",
                "Caller-visible failures by code"
            ),
            &["code"]
        )
        .expect("failed to register credgate_rejections_total");

        let revocations_total = register_counter!(opts!(
            "credgate_revocations_total",
            "Revoke calls that reached storage"
        ))
        .expect("failed to register credgate_revocations_total");

        Self {
            issued_total,
            pending_total,
            rejections_total,
            revocations_total,
        }
    }

    pub fn issued(&self, path: &str) {
        self.issued_total.with_label_values(&[path]).inc();
    }

    pub fn pending(&self) {
        self.pending_total.inc();
    }

    /// `code` comes from a closed set, so label cardinality is bounded.
    pub fn rejected(&self, code: &str) {
        self.rejections_total.with_label_values(&[code]).inc();
    }

    pub fn revoked(&self) {
        self.revocations_total.inc();
    }
}

/// Encode all registered metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    Lazy::force(&METRICS);
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
