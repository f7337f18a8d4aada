//! Injectable telemetry sink.
//!
//! The teacher's `telemetry` module (`apps/beach/src/telemetry/mod.rs`) uses
//! a process-wide `Lazy<Mutex<HashMap<...>>>` toggled by an env var — a
//! module-global mutable singleton. This module deliberately does the
//! opposite: components hold a `&dyn TelemetrySink` handed to them at
//! construction, and the sink's lifecycle belongs to the embedding host, not
//! the core.

use std::time::Duration;

pub trait TelemetrySink: Send + Sync {
    fn record_duration(&self, label: &'static str, duration: Duration);
    fn record_gauge(&self, label: &'static str, value: u64);
    fn record_count(&self, label: &'static str, delta: u64);
}

/// Discards everything. The default when a host doesn't care to observe.
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn record_duration(&self, _label: &'static str, _duration: Duration) {}
    fn record_gauge(&self, _label: &'static str, _value: u64) {}
    fn record_count(&self, _label: &'static str, _delta: u64) {}
}

/// Forwards every sample to `tracing` at `debug!`, for hosts that already
/// pipe `tracing` events into their observability stack.
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record_duration(&self, label: &'static str, duration: Duration) {
        tracing::debug!(target: "telemetry", label, micros = duration.as_micros() as u64, "duration");
    }

    fn record_gauge(&self, label: &'static str, value: u64) {
        tracing::debug!(target: "telemetry", label, value, "gauge");
    }

    fn record_count(&self, label: &'static str, delta: u64) {
        tracing::debug!(target: "telemetry", label, delta, "count");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingSink {
        gauges: AtomicU64,
    }

    impl TelemetrySink for CountingSink {
        fn record_duration(&self, _label: &'static str, _duration: Duration) {}
        fn record_gauge(&self, _label: &'static str, _value: u64) {
            self.gauges.fetch_add(1, Ordering::SeqCst);
        }
        fn record_count(&self, _label: &'static str, _delta: u64) {}
    }

    #[test_timeout::timeout]
    fn noop_sink_does_not_panic() {
        let sink = NoopSink;
        sink.record_duration("x", Duration::from_millis(1));
        sink.record_gauge("y", 1);
        sink.record_count("z", 1);
    }

    #[test_timeout::timeout]
    fn sink_is_object_safe_and_injectable() {
        let sink = CountingSink {
            gauges: AtomicU64::new(0),
        };
        let dyn_sink: &dyn TelemetrySink = &sink;
        dyn_sink.record_gauge("rows", 10);
        assert_eq!(sink.gauges.load(Ordering::SeqCst), 1);
    }
}
