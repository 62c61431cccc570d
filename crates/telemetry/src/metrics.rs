use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Run lifecycle ====
    pub static ref PEOPLE_RUNS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("people_runs_total", "Video runs by outcome"),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PEOPLE_ACTIVE_RUNS: IntGauge = {
        let metric = IntGauge::new("people_active_runs", "Video runs currently processing")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PEOPLE_RUN_DURATION: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new("people_run_duration_seconds", "Wall-clock time per video run")
                .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Frame processing ====
    pub static ref PEOPLE_FRAMES_PROCESSED: IntCounter = {
        let metric = IntCounter::new("people_frames_processed_total", "Frames run through the tracker")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PEOPLE_FRAME_LATENCY: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new(
                "people_frame_latency_seconds",
                "Detection, tracking and rendering time per frame",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PEOPLE_INFERENCE_TIME: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new("people_inference_seconds", "Model inference time")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]),
            &["model", "execution_provider"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Zone events ====
    pub static ref PEOPLE_ZONE_EVENTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("people_zone_events_total", "Zone transitions by kind"),
            &["event"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PEOPLE_ATTRIBUTE_OUTCOMES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "people_attribute_outcomes_total",
                "Attribute analyses by outcome (measured/degraded)",
            ),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Downstream forwarding ====
    pub static ref PEOPLE_FORWARD_REQUESTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("people_forward_requests_total", "Report forwarding attempts"),
            &["status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PEOPLE_FORWARD_LATENCY: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new("people_forward_latency_seconds", "Downstream forwarding latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_events_are_exported() {
        PEOPLE_ZONE_EVENTS.with_label_values(&["entry"]).inc();
        PEOPLE_FRAMES_PROCESSED.inc_by(3);

        let text = gather_text().unwrap();
        assert!(text.contains("people_zone_events_total"));
        assert!(text.contains("people_frames_processed_total"));
    }
}
