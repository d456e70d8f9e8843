use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub reports_total: IntCounterVec,
    pub redemptions_total: IntCounterVec,
    pub points_issued_total: IntCounter,
    pub points_spent_total: IntCounter,
    pub intake_latency_seconds: HistogramVec,
    pub bins_by_status: IntGaugeVec,
    pub bin_transitions_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let reports_total = IntCounterVec::new(
            Opts::new("reports_total", "Collection reports by outcome"),
            &["outcome"],
        )
        .expect("valid reports_total metric");

        let redemptions_total = IntCounterVec::new(
            Opts::new("redemptions_total", "Redemption attempts by outcome"),
            &["outcome"],
        )
        .expect("valid redemptions_total metric");

        let points_issued_total =
            IntCounter::new("points_issued_total", "Total points credited to users")
                .expect("valid points_issued_total metric");

        let points_spent_total =
            IntCounter::new("points_spent_total", "Total points debited from users")
                .expect("valid points_spent_total metric");

        let intake_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "intake_latency_seconds",
                "Latency of report intake processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid intake_latency_seconds metric");

        let bins_by_status = IntGaugeVec::new(
            Opts::new("bins_by_status", "Current number of bins per status"),
            &["status"],
        )
        .expect("valid bins_by_status metric");

        let bin_transitions_total = IntCounterVec::new(
            Opts::new("bin_transitions_total", "Bin state transitions by event"),
            &["event"],
        )
        .expect("valid bin_transitions_total metric");

        registry
            .register(Box::new(reports_total.clone()))
            .expect("register reports_total");
        registry
            .register(Box::new(redemptions_total.clone()))
            .expect("register redemptions_total");
        registry
            .register(Box::new(points_issued_total.clone()))
            .expect("register points_issued_total");
        registry
            .register(Box::new(points_spent_total.clone()))
            .expect("register points_spent_total");
        registry
            .register(Box::new(intake_latency_seconds.clone()))
            .expect("register intake_latency_seconds");
        registry
            .register(Box::new(bins_by_status.clone()))
            .expect("register bins_by_status");
        registry
            .register(Box::new(bin_transitions_total.clone()))
            .expect("register bin_transitions_total");

        Self {
            registry,
            reports_total,
            redemptions_total,
            points_issued_total,
            points_spent_total,
            intake_latency_seconds,
            bins_by_status,
            bin_transitions_total,
        }
    }

    /// Keeps the per-status gauge in step with a transition.
    pub fn bin_status_moved(&self, from: Option<&str>, to: &str) {
        if let Some(from) = from {
            self.bins_by_status.with_label_values(&[from]).dec();
        }
        self.bins_by_status.with_label_values(&[to]).inc();
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
