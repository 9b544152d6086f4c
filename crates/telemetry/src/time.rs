// Path: crates/telemetry/src/time.rs
use crate::sinks::ChainClientMetricsSink;
use std::time::Instant;

/// Observes the time until drop as a send-to-settlement duration for `chain`.
pub struct Timer<'a> {
    sink: &'a dyn ChainClientMetricsSink,
    chain: &'a str,
    start: Instant,
}

impl<'a> Timer<'a> {
    pub fn new(sink: &'a dyn ChainClientMetricsSink, chain: &'a str) -> Self {
        Self {
            sink,
            chain,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.sink
            .observe_send_to_settlement_duration(self.chain, self.start.elapsed().as_secs_f64());
    }
}
