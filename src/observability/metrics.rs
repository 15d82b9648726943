use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::error::AppError;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub offers_total: IntCounterVec,
    pub acceptances_total: IntCounterVec,
    pub acceptance_latency_seconds: Histogram,
    pub connections_open: IntGaugeVec,
    pub broadcast_dropped_total: IntCounterVec,
    pub background_tasks_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let offers_total = IntCounterVec::new(
            Opts::new("offers_total", "Restaurant acceptances by offer outcome"),
            &["outcome"],
        )
        .expect("valid offers_total metric");

        let acceptances_total = IntCounterVec::new(
            Opts::new("acceptances_total", "Rider acceptance attempts by outcome"),
            &["outcome"],
        )
        .expect("valid acceptances_total metric");

        let acceptance_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "acceptance_latency_seconds",
            "Latency of rider acceptance handling in seconds",
        ))
        .expect("valid acceptance_latency_seconds metric");

        let connections_open = IntGaugeVec::new(
            Opts::new("connections_open", "Currently registered connections"),
            &["kind"],
        )
        .expect("valid connections_open metric");

        let broadcast_dropped_total = IntCounterVec::new(
            Opts::new(
                "broadcast_dropped_total",
                "Messages that could not be queued to a connection",
            ),
            &["kind"],
        )
        .expect("valid broadcast_dropped_total metric");

        let background_tasks_total = IntCounterVec::new(
            Opts::new("background_tasks_total", "Background recomputations by outcome"),
            &["task", "outcome"],
        )
        .expect("valid background_tasks_total metric");

        registry
            .register(Box::new(offers_total.clone()))
            .expect("register offers_total");
        registry
            .register(Box::new(acceptances_total.clone()))
            .expect("register acceptances_total");
        registry
            .register(Box::new(acceptance_latency_seconds.clone()))
            .expect("register acceptance_latency_seconds");
        registry
            .register(Box::new(connections_open.clone()))
            .expect("register connections_open");
        registry
            .register(Box::new(broadcast_dropped_total.clone()))
            .expect("register broadcast_dropped_total");
        registry
            .register(Box::new(background_tasks_total.clone()))
            .expect("register background_tasks_total");

        Self {
            registry,
            offers_total,
            acceptances_total,
            acceptance_latency_seconds,
            connections_open,
            broadcast_dropped_total,
            background_tasks_total,
        }
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, AppError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|err| AppError::Internal(format!("metrics encoding failed: {err}")))?;

        String::from_utf8(buffer)
            .map_err(|err| AppError::Internal(format!("metrics output is not utf8: {err}")))
    }
}
