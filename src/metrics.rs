use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct Metrics {
    registry: Registry,
    render_results: IntCounterVec,
    asset_failures: IntCounterVec,
    render_duration: HistogramVec,
    renders_in_progress: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let render_results = IntCounterVec::new(
            Opts::new(
                "og_render_results_total",
                "Preview requests by outcome (image or fallback)",
            ),
            &["result"],
        )?;
        let asset_failures = IntCounterVec::new(
            Opts::new(
                "og_asset_failures_total",
                "Remote asset failures by asset and kind",
            ),
            &["asset", "kind"],
        )?;
        let render_duration = HistogramVec::new(
            HistogramOpts::new("og_render_duration_seconds", "Preview duration by stage").buckets(
                vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0],
            ),
            &["stage"],
        )?;
        let renders_in_progress =
            IntGauge::new("og_renders_in_progress", "Card renders holding a permit")?;

        registry.register(Box::new(render_results.clone()))?;
        registry.register(Box::new(asset_failures.clone()))?;
        registry.register(Box::new(render_duration.clone()))?;
        registry.register(Box::new(renders_in_progress.clone()))?;

        Ok(Self {
            registry,
            render_results,
            asset_failures,
            render_duration,
            renders_in_progress,
        })
    }

    pub fn gather(&self) -> Result<String> {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }

    pub fn observe_render_result(&self, result: &str) {
        self.render_results.with_label_values(&[result]).inc();
    }

    pub fn observe_asset_failure(&self, asset: &str, kind: &str) {
        self.asset_failures.with_label_values(&[asset, kind]).inc();
    }

    pub fn observe_render_duration(&self, stage: &str, duration: Duration) {
        self.render_duration
            .with_label_values(&[stage])
            .observe(duration.as_secs_f64());
    }

    pub fn render_guard(self: &Arc<Self>) -> RenderGuard {
        self.renders_in_progress.inc();
        RenderGuard {
            metrics: Arc::clone(self),
        }
    }
}

pub struct RenderGuard {
    metrics: Arc<Metrics>,
}

impl Drop for RenderGuard {
    fn drop(&mut self) {
        self.metrics.renders_in_progress.dec();
    }
}
