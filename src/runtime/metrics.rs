/// Destination for timing events such as `condition.evaluated` and `workflow.run`
///
/// Recording is synchronous and infallible from the caller's point of view: a sink must never
/// block or fail the evaluation or run that reports to it.
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: &str, tags: &[(&str, String)], duration_ms: f64);
}

/// Emits metrics as structured tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, event: &str, tags: &[(&str, String)], duration_ms: f64) {
        let tags = tags
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(",");
        tracing::debug!(target: "flowgate::metrics", event, tags = %tags, duration_ms, "📈 metric");
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _event: &str, _tags: &[(&str, String)], _duration_ms: f64) {}
}
