//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Legs
    pub legs_prepared: IntCounter,
    pub legs_dropped: IntCounter,
    pub simulation_failures: IntCounter,

    // Bundles
    pub bundles_submitted: IntCounter,
    pub bundles_landed: IntCounter,
    pub bundles_exhausted: IntCounter,
    pub submission_failures: IntCounter,
    pub poll_attempts: IntCounter,

    // Recovery
    pub fallback_invocations: IntCounter,
    pub pipeline_restarts: IntCounter,

    // Gauges
    pub last_bundle_size: IntGauge,

    // Histograms
    pub compose_latency: Histogram,
    pub landing_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let legs_prepared = IntCounter::with_opts(Opts::new(
            "legs_prepared_total",
            "Number of legs composed and simulated successfully",
        ))?;

        let legs_dropped = IntCounter::with_opts(Opts::new(
            "legs_dropped_total",
            "Number of trade legs dropped from a bundle",
        ))?;

        let simulation_failures = IntCounter::with_opts(Opts::new(
            "simulation_failures_total",
            "Number of legs rejected by preflight simulation",
        ))?;

        let bundles_submitted = IntCounter::with_opts(Opts::new(
            "bundles_submitted_total",
            "Number of bundles accepted by the relay",
        ))?;

        let bundles_landed =
            IntCounter::with_opts(Opts::new("bundles_landed_total", "Number of bundles landed"))?;

        let bundles_exhausted = IntCounter::with_opts(Opts::new(
            "bundles_exhausted_total",
            "Number of bundles whose status polling ran out of attempts",
        ))?;

        let submission_failures = IntCounter::with_opts(Opts::new(
            "submission_failures_total",
            "Number of bundle submissions refused by the relay",
        ))?;

        let poll_attempts = IntCounter::with_opts(Opts::new(
            "poll_attempts_total",
            "Number of bundle status requests",
        ))?;

        let fallback_invocations = IntCounter::with_opts(Opts::new(
            "fallback_invocations_total",
            "Number of out-of-band recovery invocations",
        ))?;

        let pipeline_restarts = IntCounter::with_opts(Opts::new(
            "pipeline_restarts_total",
            "Number of full pipeline restarts after a status timeout",
        ))?;

        let last_bundle_size = IntGauge::with_opts(Opts::new(
            "last_bundle_size",
            "Transactions in the most recently submitted bundle",
        ))?;

        let compose_latency = Histogram::with_opts(
            HistogramOpts::new(
                "compose_latency_seconds",
                "Time from blockhash fetch to bundle assembly",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]),
        )?;

        let landing_latency = Histogram::with_opts(
            HistogramOpts::new(
                "landing_latency_seconds",
                "Time from submission to landing signal",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(legs_prepared.clone()))?;
        registry.register(Box::new(legs_dropped.clone()))?;
        registry.register(Box::new(simulation_failures.clone()))?;
        registry.register(Box::new(bundles_submitted.clone()))?;
        registry.register(Box::new(bundles_landed.clone()))?;
        registry.register(Box::new(bundles_exhausted.clone()))?;
        registry.register(Box::new(submission_failures.clone()))?;
        registry.register(Box::new(poll_attempts.clone()))?;
        registry.register(Box::new(fallback_invocations.clone()))?;
        registry.register(Box::new(pipeline_restarts.clone()))?;
        registry.register(Box::new(last_bundle_size.clone()))?;
        registry.register(Box::new(compose_latency.clone()))?;
        registry.register(Box::new(landing_latency.clone()))?;

        Ok(Self {
            registry,
            legs_prepared,
            legs_dropped,
            simulation_failures,
            bundles_submitted,
            bundles_landed,
            bundles_exhausted,
            submission_failures,
            poll_attempts,
            fallback_invocations,
            pipeline_restarts,
            last_bundle_size,
            compose_latency,
            landing_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        let metrics = Metrics::new().unwrap();
        metrics.legs_prepared.inc();
        metrics.bundles_submitted.inc_by(2);
        metrics.last_bundle_size.set(5);

        let text = metrics.render().unwrap();
        assert!(text.contains("legs_prepared_total 1"));
        assert!(text.contains("bundles_submitted_total 2"));
        assert!(text.contains("last_bundle_size 5"));
    }

    #[test]
    fn test_timer_observes_histogram() {
        let metrics = Metrics::new().unwrap();
        let timer = Timer::new();
        timer.observe_duration(&metrics.landing_latency);

        assert_eq!(metrics.landing_latency.get_sample_count(), 1);
    }
}
