// Path: crates/telemetry/src/sinks.rs
//! Abstract metrics traits, decoupling the chain client from the metrics backend.

use once_cell::sync::OnceCell;

// --- Static Sink Access ---

/// A no-op sink for use in tests or when telemetry is disabled.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

/// The global `MetricsSink`, set once by `prometheus::install`.
pub static SINK: OnceCell<&'static dyn MetricsSink> = OnceCell::new();
static NOP_SINK: NopSink = NopSink;

/// Returns the configured chain-client metrics sink, or a no-op sink.
pub fn chain_metrics() -> &'static dyn ChainClientMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns the configured error metrics sink, or a no-op sink.
pub fn error_metrics() -> &'static dyn ErrorMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

// --- Trait Definitions ---

/// Metrics emitted by a UTXO chain client. Every method is labelled by chain.
pub trait ChainClientMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter of network-fee changes reported upstream.
    fn inc_gas_price_change(&self, chain: &str);
    /// Sets the gauge of the last reported fee rate.
    fn set_gas_price(&self, chain: &str, rate: f64);
    /// Observes how long building a batch for the settlement chain took.
    fn observe_send_to_settlement_duration(&self, chain: &str, duration_secs: f64);
    /// Increments the counter of outbounds signed.
    fn inc_tx_to_settlement_signed(&self, chain: &str);
    /// Increments the counter of observations queued for the settlement chain.
    fn inc_tx_to_settlement(&self, chain: &str, count: u64);
    /// Increments the counter of blocks processed by the scanner.
    fn inc_blocks_scanned(&self, chain: &str);
}
impl ChainClientMetricsSink for NopSink {
    fn inc_gas_price_change(&self, _chain: &str) {}
    fn set_gas_price(&self, _chain: &str, _rate: f64) {}
    fn observe_send_to_settlement_duration(&self, _chain: &str, _duration_secs: f64) {}
    fn inc_tx_to_settlement_signed(&self, _chain: &str) {}
    fn inc_tx_to_settlement(&self, _chain: &str, _count: u64) {}
    fn inc_blocks_scanned(&self, _chain: &str) {}
}

/// A sink for recording structured error metrics.
pub trait ErrorMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments a counter for a specific error, categorized by its kind and code.
    fn inc_error(&self, kind: &'static str, code: &'static str);
}
impl ErrorMetricsSink for NopSink {
    fn inc_error(&self, _kind: &'static str, _code: &'static str) {}
}

/// A unified sink implementing every domain trait, so one backend serves all.
pub trait MetricsSink: ChainClientMetricsSink + ErrorMetricsSink {}

impl<T> MetricsSink for T where T: ChainClientMetricsSink + ErrorMetricsSink {}
