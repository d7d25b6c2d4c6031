use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub offers_total: IntCounterVec,
    pub transitions_total: IntCounterVec,
    pub side_effect_tasks_total: IntCounterVec,
    pub tasks_in_queue: IntGauge,
    pub assignment_latency_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let offers_total = IntCounterVec::new(
            Opts::new("offers_total", "Assignment offers by outcome"),
            &["outcome"],
        )
        .expect("valid offers_total metric");

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Committed delivery transitions by target status"),
            &["to"],
        )
        .expect("valid transitions_total metric");

        let side_effect_tasks_total = IntCounterVec::new(
            Opts::new(
                "side_effect_tasks_total",
                "Outbound side-effect task attempts by kind and outcome",
            ),
            &["kind", "outcome"],
        )
        .expect("valid side_effect_tasks_total metric");

        let tasks_in_queue = IntGauge::new("tasks_in_queue", "Side-effect tasks waiting in queue")
            .expect("valid tasks_in_queue metric");

        let assignment_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of automatic driver assignment in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        registry
            .register(Box::new(offers_total.clone()))
            .expect("register offers_total");
        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(side_effect_tasks_total.clone()))
            .expect("register side_effect_tasks_total");
        registry
            .register(Box::new(tasks_in_queue.clone()))
            .expect("register tasks_in_queue");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");

        Self {
            registry,
            offers_total,
            transitions_total,
            side_effect_tasks_total,
            tasks_in_queue,
            assignment_latency_seconds,
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
