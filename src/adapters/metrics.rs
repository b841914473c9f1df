//! Metrics emission
//!
//! Telemetry is an explicit handle threaded through construction, with a
//! no-op default. The push implementation serializes the Prometheus text
//! format to a pushgateway; emission is best-effort and never propagates
//! errors into the core.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

/// Shared telemetry handle
pub type Telemetry = Arc<dyn Metrics>;

/// Counters, gauges, and histograms with labels
pub trait Metrics: Send + Sync {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)]);
    fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);
    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// Default telemetry: drops everything
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn incr_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}
    fn record_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
    fn record_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

impl NoopMetrics {
    pub fn handle() -> Telemetry {
        Arc::new(NoopMetrics)
    }
}

/// Create the telemetry handle from the environment: pushgateway when
/// `ENABLE_METRICS` is truthy and `PUSHGATEWAY_URL` resolves, no-op otherwise.
pub fn from_env(service_name: &str, agent_type: &str, project_name: &str) -> Telemetry {
    let enabled = std::env::var("ENABLE_METRICS")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);

    if !enabled {
        return NoopMetrics::handle();
    }

    let gateway = std::env::var("PUSHGATEWAY_URL").unwrap_or_else(|_| "localhost:9091".to_string());
    Arc::new(PushMetrics::new(&gateway, service_name, agent_type, project_name))
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    name: String,
    labels: BTreeMap<String, String>,
}

impl SeriesKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn render(&self) -> String {
        if self.labels.is_empty() {
            return self.name.clone();
        }
        let rendered: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('"', "'")))
            .collect();
        format!("{}{{{}}}", self.name, rendered.join(","))
    }
}

#[derive(Default)]
struct MetricStore {
    counters: BTreeMap<SeriesKey, f64>,
    gauges: BTreeMap<SeriesKey, f64>,
    // Histograms are collapsed to sum/count pairs in the exposition
    histograms: BTreeMap<SeriesKey, (f64, u64)>,
}

/// Pushgateway-backed telemetry
pub struct PushMetrics {
    url: String,
    http: reqwest::Client,
    store: Arc<Mutex<MetricStore>>,
}

impl PushMetrics {
    pub fn new(gateway: &str, job: &str, agent_type: &str, project: &str) -> Self {
        let base = if gateway.starts_with("http") {
            gateway.to_string()
        } else {
            format!("http://{}", gateway)
        };
        let url = format!(
            "{}/metrics/job/{}/agent_type/{}/project/{}",
            base.trim_end_matches('/'),
            job,
            agent_type,
            project
        );
        debug!(%url, "PushMetrics::new: created");

        Self {
            url,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            store: Arc::new(Mutex::new(MetricStore::default())),
        }
    }

    fn render_exposition(&self) -> String {
        let store = match self.store.lock() {
            Ok(s) => s,
            Err(_) => return String::new(),
        };

        let mut out = String::new();
        for (key, value) in &store.counters {
            out.push_str(&format!("{} {}\n", key.render(), value));
        }
        for (key, value) in &store.gauges {
            out.push_str(&format!("{} {}\n", key.render(), value));
        }
        for (key, (sum, count)) in &store.histograms {
            let mut sum_key = key.clone();
            sum_key.name = format!("{}_sum", key.name);
            let mut count_key = key.clone();
            count_key.name = format!("{}_count", key.name);
            out.push_str(&format!("{} {}\n", sum_key.render(), sum));
            out.push_str(&format!("{} {}\n", count_key.render(), count));
        }
        out
    }

    fn push(&self) {
        let body = self.render_exposition();
        if body.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let http = self.http.clone();
        let url = self.url.clone();
        runtime.spawn(async move {
            if let Err(e) = http.post(&url).body(body).send().await {
                debug!(error = %e, "PushMetrics::push: delivery failed");
            }
        });
    }
}

impl Metrics for PushMetrics {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)]) {
        if let Ok(mut store) = self.store.lock() {
            *store.counters.entry(SeriesKey::new(name, labels)).or_insert(0.0) += 1.0;
        }
        self.push();
    }

    fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Ok(mut store) = self.store.lock() {
            store.gauges.insert(SeriesKey::new(name, labels), value);
        }
        self.push();
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Ok(mut store) = self.store.lock() {
            let entry = store.histograms.entry(SeriesKey::new(name, labels)).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
        self.push();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_key_render() {
        let key = SeriesKey::new("tool_execution_total", &[("tool_type", "bash")]);
        assert_eq!(key.render(), "tool_execution_total{tool_type=\"bash\"}");

        let bare = SeriesKey::new("agent_iteration", &[]);
        assert_eq!(bare.render(), "agent_iteration");
    }

    #[tokio::test]
    async fn test_push_metrics_accumulate() {
        let metrics = PushMetrics::new("localhost:9091", "job", "gemini", "demo");

        metrics.incr_counter("iterations_total", &[]);
        metrics.incr_counter("iterations_total", &[]);
        metrics.record_gauge("iteration", 2.0, &[]);
        metrics.record_histogram("duration_seconds", 1.5, &[("status", "ok")]);

        let exposition = metrics.render_exposition();
        assert!(exposition.contains("iterations_total 2"));
        assert!(exposition.contains("iteration 2"));
        assert!(exposition.contains("duration_seconds_sum{status=\"ok\"} 1.5"));
        assert!(exposition.contains("duration_seconds_count{status=\"ok\"} 1"));
    }

    #[test]
    fn test_noop_is_silent() {
        let telemetry = NoopMetrics::handle();
        telemetry.incr_counter("anything", &[]);
        telemetry.record_gauge("anything", 1.0, &[]);
        telemetry.record_histogram("anything", 1.0, &[]);
    }
}
