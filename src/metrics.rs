use prometheus::{
    CounterVec, Encoder, HistogramVec, IntGauge, Registry, TextEncoder, histogram_opts, opts,
};
use std::time::Duration;

/// Prometheus metrics registry and collectors for the zone server
pub struct AutoMetrics {
    registry: Registry,

    // Query metrics
    queries_total: CounterVec,
    query_duration: HistogramVec,
    truncated_responses: CounterVec,

    // Loader metrics
    reloads_total: CounterVec,
    zone_builds_total: CounterVec,
    zones_loaded: IntGauge,

    // Transfer metrics
    transfers_total: CounterVec,
    notifies_total: CounterVec,
}

impl AutoMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let queries_total = CounterVec::new(
            opts!(
                "autozone_queries_total",
                "Total number of DNS queries answered, by zone and response code"
            ),
            &["zone", "rcode"],
        )?;

        let query_duration = HistogramVec::new(
            histogram_opts!(
                "autozone_query_duration_seconds",
                "DNS query processing duration in seconds",
                vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]
            ),
            &["protocol"],
        )?;

        let truncated_responses = CounterVec::new(
            opts!(
                "autozone_truncated_responses_total",
                "Total number of responses sent with the TC bit"
            ),
            &["protocol"],
        )?;

        let reloads_total = CounterVec::new(
            opts!(
                "autozone_reloads_total",
                "Total number of zone directory scans, by result"
            ),
            &["result"],
        )?;

        let zone_builds_total = CounterVec::new(
            opts!(
                "autozone_zone_builds_total",
                "Total number of zone builds, by result"
            ),
            &["result"],
        )?;

        let zones_loaded = IntGauge::with_opts(opts!(
            "autozone_zones_loaded",
            "Number of zones currently served"
        ))?;

        let transfers_total = CounterVec::new(
            opts!(
                "autozone_transfers_total",
                "Total number of zone transfers served, by kind"
            ),
            &["kind"],
        )?;

        let notifies_total = CounterVec::new(
            opts!(
                "autozone_notifies_total",
                "Total number of NOTIFY messages sent, by result"
            ),
            &["result"],
        )?;

        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(query_duration.clone()))?;
        registry.register(Box::new(truncated_responses.clone()))?;
        registry.register(Box::new(reloads_total.clone()))?;
        registry.register(Box::new(zone_builds_total.clone()))?;
        registry.register(Box::new(zones_loaded.clone()))?;
        registry.register(Box::new(transfers_total.clone()))?;
        registry.register(Box::new(notifies_total.clone()))?;

        Ok(Self {
            registry,
            queries_total,
            query_duration,
            truncated_responses,
            reloads_total,
            zone_builds_total,
            zones_loaded,
            transfers_total,
            notifies_total,
        })
    }

    /// Record an answered query; `zone` is empty when no zone matched
    pub fn record_query(&self, zone: &str, rcode: &str) {
        self.queries_total.with_label_values(&[zone, rcode]).inc();
    }

    pub fn record_query_duration(&self, protocol: &str, duration: Duration) {
        self.query_duration
            .with_label_values(&[protocol])
            .observe(duration.as_secs_f64());
    }

    pub fn record_truncated_response(&self, protocol: &str) {
        self.truncated_responses.with_label_values(&[protocol]).inc();
    }

    /// Record a directory scan, `result` is "success" or "failure"
    pub fn record_reload(&self, result: &str) {
        self.reloads_total.with_label_values(&[result]).inc();
    }

    pub fn record_zone_build(&self, result: &str) {
        self.zone_builds_total.with_label_values(&[result]).inc();
    }

    pub fn set_zones_loaded(&self, count: usize) {
        self.zones_loaded.set(count as i64);
    }

    /// Record a transfer, `kind` is "axfr" or "ixfr"
    pub fn record_transfer(&self, kind: &str) {
        self.transfers_total.with_label_values(&[kind]).inc();
    }

    pub fn record_notify(&self, result: &str) {
        self.notifies_total.with_label_values(&[result]).inc();
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}
