use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub push_events_total: IntCounterVec,
    pub push_frames_total: IntCounterVec,
    pub active_subscriptions: IntGauge,
    pub snapshot_fetch_seconds: HistogramVec,
    pub push_connections_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let push_events_total = IntCounterVec::new(
            Opts::new("push_events_total", "Location pushes applied or dropped by a view"),
            &["outcome"],
        )
        .expect("valid push_events_total metric");

        let push_frames_total = IntCounterVec::new(
            Opts::new("push_frames_total", "Location frames received by the channel"),
            &["routing"],
        )
        .expect("valid push_frames_total metric");

        let active_subscriptions =
            IntGauge::new("active_subscriptions", "Current number of order subscriptions")
                .expect("valid active_subscriptions metric");

        let snapshot_fetch_seconds = HistogramVec::new(
            HistogramOpts::new(
                "snapshot_fetch_seconds",
                "Latency of the initial tracking fetch in seconds",
            ),
            &["outcome"],
        )
        .expect("valid snapshot_fetch_seconds metric");

        let push_connections_total = IntCounterVec::new(
            Opts::new("push_connections_total", "Push channel connections opened"),
            &["transport"],
        )
        .expect("valid push_connections_total metric");

        registry
            .register(Box::new(push_events_total.clone()))
            .expect("register push_events_total");
        registry
            .register(Box::new(push_frames_total.clone()))
            .expect("register push_frames_total");
        registry
            .register(Box::new(active_subscriptions.clone()))
            .expect("register active_subscriptions");
        registry
            .register(Box::new(snapshot_fetch_seconds.clone()))
            .expect("register snapshot_fetch_seconds");
        registry
            .register(Box::new(push_connections_total.clone()))
            .expect("register push_connections_total");

        Self {
            registry,
            push_events_total,
            push_frames_total,
            active_subscriptions,
            snapshot_fetch_seconds,
            push_connections_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
