use std::time::Duration;

use log::debug;
use serde::Deserialize;

use bwgov_hal::{AuxReading, MetricsSource, SourceError};

pub const DEFAULT_METRIC: &str = "hubble_http_request_duration_seconds";
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
struct QueryResponse {
    status: String,
    data: Option<QueryData>,
}

#[derive(Deserialize)]
struct QueryData {
    result: Vec<VectorSample>,
}

#[derive(Deserialize)]
struct VectorSample {
    value: (f64, String),
}

/// Reads the first scalar out of an instant-query response.
pub fn parse_scalar(body: &str) -> Result<f64, SourceError> {
    let resp: QueryResponse =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;
    if resp.status != "success" {
        return Err(SourceError::Unavailable(format!("query status {}", resp.status)));
    }
    let sample = resp
        .data
        .and_then(|d| d.result.into_iter().next())
        .ok_or_else(|| SourceError::Malformed("empty result".to_string()))?;
    let v: f64 = sample
        .value
        .1
        .parse()
        .map_err(|_| SourceError::Malformed(format!("not a number: {}", sample.value.1)))?;
    if !v.is_finite() {
        return Err(SourceError::Malformed(format!("non-finite value {}", v)));
    }
    Ok(v)
}

/// Application latency quantiles from a Prometheus-compatible endpoint.
pub struct PrometheusSource {
    base_url: String,
    target_app: String,
    metric: String,
    agent: ureq::Agent,
}

impl PrometheusSource {
    pub fn new(base_url: &str, target_app: &str) -> Self {
        Self::with_metric(base_url, target_app, DEFAULT_METRIC)
    }

    pub fn with_metric(base_url: &str, target_app: &str, metric: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            target_app: target_app.to_string(),
            metric: metric.to_string(),
            agent: ureq::AgentBuilder::new().timeout(QUERY_TIMEOUT).build(),
        }
    }

    pub fn quantile_query(&self, q: f64) -> String {
        format!(
            "histogram_quantile({}, sum(rate({}_bucket{{destination_app=\"{}\"}}[5m])) by (le))",
            q, self.metric, self.target_app
        )
    }

    /// Quantile in milliseconds.
    fn quantile_ms(&self, q: f64) -> Result<f64, SourceError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let body = self
            .agent
            .get(&url)
            .query("query", &self.quantile_query(q))
            .call()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?
            .into_string()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        Ok(parse_scalar(&body)? * 1000.0)
    }
}

impl MetricsSource for PrometheusSource {
    fn fetch(&mut self) -> Result<AuxReading, SourceError> {
        let q1 = self.quantile_ms(0.25)?;
        let q3 = self.quantile_ms(0.75)?;
        let p95 = self.quantile_ms(0.95)?;
        debug!("prometheus {}: q1={:.3} q3={:.3} p95={:.3}", self.target_app, q1, q3, p95);
        Ok(AuxReading { jitter_ms: (q3 - q1).max(0.0), p_latency_ms: p95 })
    }
}
