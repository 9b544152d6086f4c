// Path: crates/telemetry/src/init.rs
use anyhow::Context;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// Directives used when `RUST_LOG` is unset or does not parse. The HTTP client logs
/// every RPC round-trip, so it is held to warnings.
pub const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";

/// `RUST_LOG` if it parses, otherwise [`DEFAULT_FILTER`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// One JSON object per event: level, target, RFC 3339 UTC timestamp and the event's
/// fields. Span context is omitted since events carry `chain` themselves.
pub fn json_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_writer(writer)
        .with_target(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
}

/// Installs the global subscriber, [`json_layer`] on stderr under [`env_filter`], and
/// bridges `log` records into it. Fails if either is already installed.
pub fn init_tracing() -> Result<(), anyhow::Error> {
    let subscriber = Registry::default()
        .with(env_filter())
        .with(json_layer(std::io::stderr));
    tracing::subscriber::set_global_default(subscriber)
        .context("global tracing subscriber already installed")?;
    tracing_log::LogTracer::init().context("log bridge already installed")?;
    tracing::debug!(target: "telemetry", "tracing initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn events_render_as_json_lines() {
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = Registry::default().with(json_layer(move || writer.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "reorg", chain = "BTC", height = 99_i64, "reorg detected");
        });

        let line = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        assert_eq!(line.lines().count(), 1);
        let event: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(event["target"], "reorg");
        assert_eq!(event["level"], "WARN");
        assert_eq!(event["fields"]["message"], "reorg detected");
        assert_eq!(event["fields"]["chain"], "BTC");
        assert_eq!(event["fields"]["height"], 99);
        assert!(event.get("span").is_none());
        assert!(event["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn default_filter_parses() {
        assert!(DEFAULT_FILTER.parse::<EnvFilter>().is_ok());
    }

    #[test]
    fn second_install_is_rejected() {
        init_tracing().unwrap();
        let err = init_tracing().unwrap_err();
        assert!(err.to_string().contains("already installed"));
    }
}
