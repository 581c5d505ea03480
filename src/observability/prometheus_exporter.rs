//! Prometheus metrics exporter
//!
//! Formats the pipeline registry in Prometheus text exposition format, plus a
//! few derived gauges computed at scrape time.

use std::fmt::Write;
use std::sync::Arc;

use prometheus::{Encoder, TextEncoder};

use super::TelemetryMetrics;

/// Configuration for Prometheus exporter
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    /// Prefix for derived metric names (default: "riskpulse")
    pub metric_prefix: String,
    /// Include derived ratio gauges
    pub include_derived: bool,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            metric_prefix: super::metrics::DEFAULT_METRIC_PREFIX.to_string(),
            include_derived: true,
        }
    }
}

/// Store errors over store attempts; 0 when the store was never tried
fn store_error_ratio(errors: u64, answered: u64) -> f64 {
    let attempts = errors + answered;
    if attempts == 0 {
        0.0
    } else {
        errors as f64 / attempts as f64
    }
}

/// Prometheus metrics exporter
pub struct PrometheusExporter {
    config: PrometheusConfig,
    metrics: Arc<TelemetryMetrics>,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter
    pub fn new(config: PrometheusConfig, metrics: Arc<TelemetryMetrics>) -> Self {
        Self { config, metrics }
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        let mut output = match self.export_registry() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode pipeline metrics");
                String::new()
            }
        };

        if self.config.include_derived {
            self.export_derived(&mut output);
        }

        output
    }

    fn export_registry(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = self.metrics.registry().gather();
        let mut buffer = vec![];

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("Failed to encode metrics: {}", e))?;

        String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
    }

    /// Ratios that are cheaper to derive at scrape time than to maintain
    fn export_derived(&self, output: &mut String) {
        let prefix = &self.config.metric_prefix;

        let shared = self.metrics.rate_limit_shared_decisions.get();
        let errors = self.metrics.shared_store_errors.get();
        let _ = writeln!(
            output,
            "# HELP {}_rate_limit_store_error_ratio Failed shared-store round trips over all attempts (0.0-1.0)",
            prefix
        );
        let _ = writeln!(output, "# TYPE {}_rate_limit_store_error_ratio gauge", prefix);
        let ratio = store_error_ratio(errors, shared);
        let _ = writeln!(output, "{}_rate_limit_store_error_ratio {:.4}", prefix, ratio);

        let total_connections: i64 = ["public", "tenant", "regulator"]
            .iter()
            .map(|channel| self.metrics.connections.with_label_values(&[channel]).get())
            .sum();
        let _ = writeln!(
            output,
            "# HELP {}_connections_all Registered live connections across channels",
            prefix
        );
        let _ = writeln!(output, "# TYPE {}_connections_all gauge", prefix);
        let _ = writeln!(output, "{}_connections_all {}", prefix, total_connections);
    }

    /// Export metrics as HTTP response body with correct content type
    pub fn export_http(&self) -> (String, &'static str) {
        let body = self.export();
        let content_type = "text/plain; version=0.0.4; charset=utf-8";
        (body, content_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_metrics() -> Arc<TelemetryMetrics> {
        let metrics = Arc::new(TelemetryMetrics::new().unwrap());
        metrics.samples_ingested.inc_by(12);
        metrics
            .rate_limit_rejections
            .with_label_values(&["standalone"])
            .inc();
        metrics.connections.with_label_values(&["public"]).set(2);
        metrics.connections.with_label_values(&["tenant"]).set(1);
        metrics
    }

    #[test]
    fn test_prometheus_export() {
        let exporter = PrometheusExporter::new(PrometheusConfig::default(), create_test_metrics());
        let output = exporter.export();

        assert!(output.contains("riskpulse_samples_ingested_total 12"));
        assert!(output.contains("riskpulse_rate_limit_rejections_total{policy=\"standalone\"} 1"));
        assert!(output.contains("riskpulse_connections_all 3"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_store_error_ratio_ignores_local_only_decisions() {
        let metrics = create_test_metrics();
        metrics.rate_limit_local_decisions.inc_by(50);
        let exporter = PrometheusExporter::new(PrometheusConfig::default(), metrics.clone());
        assert!(exporter
            .export()
            .contains("riskpulse_rate_limit_store_error_ratio 0.0000"));

        metrics.rate_limit_shared_decisions.inc_by(3);
        metrics.shared_store_errors.inc();
        assert!(exporter
            .export()
            .contains("riskpulse_rate_limit_store_error_ratio 0.2500"));
    }

    #[test]
    fn test_derived_can_be_disabled() {
        let config = PrometheusConfig {
            include_derived: false,
            ..Default::default()
        };
        let exporter = PrometheusExporter::new(config, create_test_metrics());
        assert!(!exporter.export().contains("connections_all"));
    }

    #[test]
    fn test_prometheus_export_http() {
        let exporter = PrometheusExporter::new(PrometheusConfig::default(), create_test_metrics());
        let (body, content_type) = exporter.export_http();

        assert!(!body.is_empty());
        assert!(content_type.contains("version=0.0.4"));
    }
}
