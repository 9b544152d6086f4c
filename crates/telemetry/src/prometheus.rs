// Path: crates/telemetry/src/prometheus.rs
//! A concrete implementation of the metrics sinks using the Prometheus crate.

use crate::sinks::*;
use once_cell::sync::OnceCell;
use prometheus::{
    exponential_buckets, register_gauge_vec, register_histogram_vec, register_int_counter_vec,
    GaugeVec, HistogramVec, IntCounterVec,
};

// --- Metric Statics ---
// Collectors are registered exactly once by `install`.

static GAS_PRICE_CHANGE_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static GAS_PRICE: OnceCell<GaugeVec> = OnceCell::new();
static SEND_TO_SETTLEMENT_DURATION_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static TX_TO_SETTLEMENT_SIGNED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static TX_TO_SETTLEMENT_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static BLOCKS_SCANNED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static ERRORS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

/// The Prometheus-backed sink. Calls made before `install` are dropped.
#[derive(Debug, Clone, Copy)]
pub struct PrometheusSink;

macro_rules! with_metric {
    ($metric:ident, |$m:ident| $body:expr) => {
        if let Some($m) = $metric.get() {
            $body;
        }
    };
}

impl ChainClientMetricsSink for PrometheusSink {
    fn inc_gas_price_change(&self, chain: &str) {
        with_metric!(GAS_PRICE_CHANGE_TOTAL, |m| m.with_label_values(&[chain]).inc());
    }
    fn set_gas_price(&self, chain: &str, rate: f64) {
        with_metric!(GAS_PRICE, |m| m.with_label_values(&[chain]).set(rate));
    }
    fn observe_send_to_settlement_duration(&self, chain: &str, duration_secs: f64) {
        with_metric!(SEND_TO_SETTLEMENT_DURATION_SECONDS, |m| m
            .with_label_values(&[chain])
            .observe(duration_secs));
    }
    fn inc_tx_to_settlement_signed(&self, chain: &str) {
        with_metric!(TX_TO_SETTLEMENT_SIGNED_TOTAL, |m| m
            .with_label_values(&[chain])
            .inc());
    }
    fn inc_tx_to_settlement(&self, chain: &str, count: u64) {
        with_metric!(TX_TO_SETTLEMENT_TOTAL, |m| m
            .with_label_values(&[chain])
            .inc_by(count));
    }
    fn inc_blocks_scanned(&self, chain: &str) {
        with_metric!(BLOCKS_SCANNED_TOTAL, |m| m.with_label_values(&[chain]).inc());
    }
}

impl ErrorMetricsSink for PrometheusSink {
    fn inc_error(&self, kind: &'static str, code: &'static str) {
        with_metric!(ERRORS_TOTAL, |m| m.with_label_values(&[kind, code]).inc());
    }
}

fn already() -> prometheus::Error {
    prometheus::Error::Msg("prometheus sink already installed".to_string())
}

/// Registers every collector with the default registry and installs `PrometheusSink`
/// as the global sink. Must be called at most once.
pub fn install() -> Result<&'static dyn MetricsSink, prometheus::Error> {
    GAS_PRICE_CHANGE_TOTAL
        .set(register_int_counter_vec!(
            "ferry_gas_price_change_total",
            "Number of times the reported network fee changed.",
            &["chain"]
        )?)
        .map_err(|_| already())?;
    GAS_PRICE
        .set(register_gauge_vec!(
            "ferry_gas_price",
            "Last network fee rate reported to the settlement chain.",
            &["chain"]
        )?)
        .map_err(|_| already())?;
    SEND_TO_SETTLEMENT_DURATION_SECONDS
        .set(register_histogram_vec!(
            "ferry_send_to_settlement_duration_seconds",
            "Time spent producing an observation batch for the settlement chain.",
            &["chain"],
            exponential_buckets(0.01, 2.0, 15)?
        )?)
        .map_err(|_| already())?;
    TX_TO_SETTLEMENT_SIGNED_TOTAL
        .set(register_int_counter_vec!(
            "ferry_tx_to_settlement_signed_total",
            "Number of outbound transactions signed.",
            &["chain"]
        )?)
        .map_err(|_| already())?;
    TX_TO_SETTLEMENT_TOTAL
        .set(register_int_counter_vec!(
            "ferry_tx_to_settlement_total",
            "Number of observations queued for the settlement chain.",
            &["chain"]
        )?)
        .map_err(|_| already())?;
    BLOCKS_SCANNED_TOTAL
        .set(register_int_counter_vec!(
            "ferry_blocks_scanned_total",
            "Number of external chain blocks processed.",
            &["chain"]
        )?)
        .map_err(|_| already())?;
    ERRORS_TOTAL
        .set(register_int_counter_vec!(
            "ferry_errors_total",
            "Total number of errors, categorized by kind and code.",
            &["kind", "code"]
        )?)
        .map_err(|_| already())?;

    static PROMETHEUS_SINK: PrometheusSink = PrometheusSink;
    SINK.set(&PROMETHEUS_SINK).map_err(|_| already())?;
    Ok(&PROMETHEUS_SINK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_registers_and_routes_global_sink() {
        // Before install the sink silently drops.
        PrometheusSink.inc_blocks_scanned("BTC");

        install().unwrap();
        crate::chain_metrics().inc_blocks_scanned("BTC");
        crate::chain_metrics().set_gas_price("BTC", 12.0);
        crate::error_metrics().inc_error("client", "CLIENT_RPC");

        let families = prometheus::gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"ferry_blocks_scanned_total".to_string()));
        assert!(names.contains(&"ferry_gas_price".to_string()));
        assert!(install().is_err());
    }
}
