//! Per-tenant sliding metrics window
//!
//! Each tenant owns a bounded FIFO of its most recent telemetry samples. The
//! buffer is created lazily on the tenant's first sample and lives for the
//! lifetime of the process. Samples are kept in ingest arrival order, not in
//! embedded timestamp order.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::types::{TelemetrySample, TenantId};

/// Bounded, insertion-ordered sample buffers keyed by tenant
#[derive(Debug)]
pub struct SlidingMetricsWindow {
    /// Maximum samples retained per tenant
    capacity: usize,

    /// Tenant buffers
    tenants: RwLock<HashMap<TenantId, VecDeque<TelemetrySample>>>,
}

impl SlidingMetricsWindow {
    /// Create a window retaining at most `capacity` samples per tenant
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Per-tenant capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample to its tenant's buffer, evicting the oldest on overflow.
    ///
    /// Returns the buffer length after the append.
    pub fn record(&self, sample: TelemetrySample) -> usize {
        let mut tenants = self.tenants.write();
        let buffer = tenants
            .entry(sample.tenant_id.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        while buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(sample);
        buffer.len()
    }

    /// Consistent copy of a tenant's samples, oldest first
    pub fn snapshot(&self, tenant_id: &str) -> Vec<TelemetrySample> {
        self.tenants
            .read()
            .get(tenant_id)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of samples currently held for a tenant
    pub fn len(&self, tenant_id: &str) -> usize {
        self.tenants
            .read()
            .get(tenant_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Tenants that have recorded at least one sample
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut ids: Vec<_> = self.tenants.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisOutcome, TokenUsage};

    fn sample(tenant: &str, content: &str, timestamp: i64) -> TelemetrySample {
        TelemetrySample::from_outcome(
            AnalysisOutcome {
                tenant_id: tenant.to_string(),
                content_id: content.to_string(),
                risk_score: 10,
                flags: vec![],
                latency_ms: 100.0,
                token_usage: TokenUsage::new(),
                provider: "providerA".to_string(),
                fail_safe_triggered: false,
                fail_reason: None,
            },
            timestamp,
        )
    }

    #[test]
    fn test_lazy_creation() {
        let window = SlidingMetricsWindow::new(20);
        assert!(window.tenants().is_empty());
        assert!(window.snapshot("acme").is_empty());
        assert_eq!(window.len("acme"), 0);

        window.record(sample("acme", "c0", 1));
        assert_eq!(window.tenants(), vec!["acme".to_string()]);
    }

    #[test]
    fn test_evicts_oldest_past_capacity() {
        let window = SlidingMetricsWindow::new(20);
        for i in 0..25 {
            let len = window.record(sample("acme", &format!("c{i}"), i));
            assert!(len <= 20);
        }

        let samples = window.snapshot("acme");
        assert_eq!(samples.len(), 20);
        assert_eq!(samples.first().unwrap().content_id, "c5");
        assert_eq!(samples.last().unwrap().content_id, "c24");
    }

    #[test]
    fn test_arrival_order_not_timestamp_order() {
        let window = SlidingMetricsWindow::new(3);
        window.record(sample("acme", "late", 500));
        window.record(sample("acme", "early", 100));

        let order: Vec<_> = window
            .snapshot("acme")
            .into_iter()
            .map(|s| s.content_id)
            .collect();
        assert_eq!(order, vec!["late", "early"]);
    }

    #[test]
    fn test_tenants_are_isolated() {
        let window = SlidingMetricsWindow::new(2);
        window.record(sample("a", "a1", 1));
        window.record(sample("a", "a2", 2));
        window.record(sample("a", "a3", 3));
        window.record(sample("b", "b1", 1));

        assert_eq!(window.len("a"), 2);
        assert_eq!(window.len("b"), 1);
    }
}
