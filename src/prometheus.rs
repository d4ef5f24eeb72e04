//! Metric waits against the Prometheus HTTP API
//!
//! Alerts and recording rules take a scrape interval or two to reflect cluster
//! changes, so metric assertions are waits: query until the result satisfies a
//! predicate or the budget runs out.
//!
//! # Example
//!
//! ```ignore
//! use virtwait::prometheus::PrometheusClient;
//!
//! let prom = PrometheusClient::from_config(ctx.config())?;
//! prom.wait_for_non_zero(
//!     r#"kubevirt_vmi_phase_count{phase="running"}"#,
//!     Duration::from_secs(300),
//! )
//! .await?;
//! ```

use crate::config::SuiteConfig;
use crate::sampler::{SamplerError, SuppressRule, TimeoutSampler};
use crate::truthy::Truthy;
use crate::wait::TimeoutExpired;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Errors from querying Prometheus
#[derive(Debug, thiserror::Error)]
pub enum PrometheusError {
    #[error("Prometheus request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Prometheus returned HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("query rejected ({error_type}): {message}")]
    Query { error_type: String, message: String },

    #[error("unexpected Prometheus response: {0}")]
    Decode(String),

    #[error("{0}")]
    Timeout(#[from] TimeoutExpired),

    #[error("Prometheus URL is not configured (set PROMETHEUS_URL)")]
    NotConfigured,
}

impl PrometheusError {
    /// Transport failures and 5xx answers; worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Server { .. })
    }
}

impl From<SamplerError<PrometheusError>> for PrometheusError {
    fn from(err: SamplerError<PrometheusError>) -> Self {
        match err {
            SamplerError::Timeout(t) => Self::Timeout(t),
            SamplerError::Unexpected(e) => e,
        }
    }
}

/// One element of an instant query result
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Series labels; empty for scalar results
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    status: String,
    data: Option<QueryData>,
    error_type: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<VectorSample>),
    Scalar((f64, String)),
    Matrix(serde_json::Value),
    String(serde_json::Value),
}

#[derive(Deserialize)]
struct VectorSample {
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

fn parse_value(raw: &str) -> Result<f64, PrometheusError> {
    raw.parse()
        .map_err(|_| PrometheusError::Decode(format!("invalid sample value '{raw}'")))
}

/// Decode a `/api/v1/query` response body
pub fn parse_query_response(body: &str) -> Result<Vec<Sample>, PrometheusError> {
    let response: QueryResponse =
        serde_json::from_str(body).map_err(|e| PrometheusError::Decode(e.to_string()))?;

    if response.status != "success" {
        return Err(PrometheusError::Query {
            error_type: response.error_type.unwrap_or_else(|| "unknown".to_string()),
            message: response.error.unwrap_or_default(),
        });
    }

    match response.data {
        Some(QueryData::Vector(samples)) => samples
            .into_iter()
            .map(|s| {
                Ok(Sample {
                    labels: s.metric,
                    value: parse_value(&s.value.1)?,
                })
            })
            .collect(),
        Some(QueryData::Scalar((_, raw))) => Ok(vec![Sample {
            labels: BTreeMap::new(),
            value: parse_value(&raw)?,
        }]),
        Some(QueryData::Matrix(_)) => Err(PrometheusError::Decode(
            "range vector results are not supported by instant queries".to_string(),
        )),
        Some(QueryData::String(_)) => Err(PrometheusError::Decode(
            "string results are not supported".to_string(),
        )),
        None => Err(PrometheusError::Decode("missing data".to_string())),
    }
}

/// Result of one query and whether it satisfied the predicate
#[derive(Debug)]
struct Reading {
    samples: Vec<Sample>,
    matched: bool,
}

impl Truthy for Reading {
    fn is_truthy(&self) -> bool {
        self.matched
    }
}

/// Client for Prometheus or a Thanos querier
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    poll_interval: Duration,
}

impl PrometheusClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, PrometheusError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Send `Authorization: Bearer <token>` with every query
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Build from `prometheus_url` / `prometheus_token` of the suite config
    pub fn from_config(config: &SuiteConfig) -> Result<Self, PrometheusError> {
        let url = config
            .prometheus_url
            .as_deref()
            .ok_or(PrometheusError::NotConfigured)?;
        let mut client = Self::new(url)?.poll_interval(config.poll_interval);
        if let Some(token) = &config.prometheus_token {
            client = client.with_token(token.clone());
        }
        Ok(client)
    }

    /// Run an instant query
    pub async fn query(&self, promql: &str) -> Result<Vec<Sample>, PrometheusError> {
        let mut request = self
            .client
            .get(format!("{}/api/v1/query", self.base_url))
            .query(&[("query", promql)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_server_error() {
            return Err(PrometheusError::Server {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let samples = parse_query_response(&body)?;
        debug!(query = %promql, samples = samples.len(), "Prometheus query");
        Ok(samples)
    }

    /// Query until `predicate` accepts the result
    ///
    /// Transport errors and 5xx answers are retried; a rejected query fails
    /// immediately.
    pub async fn wait_for_value<P>(
        &self,
        promql: &str,
        predicate: P,
        timeout: Duration,
    ) -> Result<Vec<Sample>, PrometheusError>
    where
        P: Fn(&[Sample]) -> bool,
    {
        let predicate = &predicate;
        let reading = TimeoutSampler::new(move || async move {
            let samples = self.query(promql).await?;
            let matched = predicate(&samples);
            Ok::<_, PrometheusError>(Reading { samples, matched })
        })
        .timeout(timeout)
        .sleep(self.poll_interval)
        .suppress(SuppressRule::new(PrometheusError::is_transient))
        .label(format!("query {promql}"))
        .wait_truthy()
        .await?;

        Ok(reading.samples)
    }

    /// Wait until some series of `promql` has a non-zero value
    pub async fn wait_for_non_zero(
        &self,
        promql: &str,
        timeout: Duration,
    ) -> Result<Vec<Sample>, PrometheusError> {
        self.wait_for_value(
            promql,
            |samples| samples.iter().any(|s| s.value != 0.0 && !s.value.is_nan()),
            timeout,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const VECTOR: &str = r#"{
        "status": "success",
        "data": {
            "resultType": "vector",
            "result": [
                { "metric": { "__name__": "kubevirt_vmi_phase_count", "phase": "running" }, "value": [1718000000.5, "3"] },
                { "metric": { "__name__": "kubevirt_vmi_phase_count", "phase": "pending" }, "value": [1718000000.5, "0"] }
            ]
        }
    }"#;

    const EMPTY: &str = r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;

    const BAD_QUERY: &str =
        r#"{"status":"error","errorType":"bad_data","error":"parse error at char 5"}"#;

    #[test]
    fn test_parse_vector() {
        let samples = parse_query_response(VECTOR).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].labels["phase"], "running");
        assert_eq!(samples[0].value, 3.0);
        assert_eq!(samples[1].value, 0.0);
    }

    #[test]
    fn test_parse_scalar_and_special_values() {
        let samples = parse_query_response(
            r#"{"status":"success","data":{"resultType":"scalar","result":[1718000000,"NaN"]}}"#,
        )
        .unwrap();
        assert!(samples[0].labels.is_empty());
        assert!(samples[0].value.is_nan());

        let samples = parse_query_response(
            r#"{"status":"success","data":{"resultType":"scalar","result":[1718000000,"+Inf"]}}"#,
        )
        .unwrap();
        assert!(samples[0].value.is_infinite());
    }

    #[test]
    fn test_parse_errors() {
        match parse_query_response(BAD_QUERY).unwrap_err() {
            PrometheusError::Query {
                error_type,
                message,
            } => {
                assert_eq!(error_type, "bad_data");
                assert!(message.contains("parse error"));
            }
            other => panic!("expected Query error, got {other:?}"),
        }

        let matrix = r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#;
        assert!(matches!(
            parse_query_response(matrix),
            Err(PrometheusError::Decode(_))
        ));
        assert!(matches!(
            parse_query_response("<html>"),
            Err(PrometheusError::Decode(_))
        ));
    }

    #[test]
    fn test_error_classification() {
        let server = PrometheusError::Server {
            status: 503,
            body: String::new(),
        };
        assert!(server.is_transient());
        assert!(!PrometheusError::NotConfigured.is_transient());
        assert!(!parse_query_response(BAD_QUERY).unwrap_err().is_transient());
    }

    #[test]
    fn test_from_config() {
        assert!(matches!(
            PrometheusClient::from_config(&SuiteConfig::default()),
            Err(PrometheusError::NotConfigured)
        ));

        let config = SuiteConfig::new().prometheus("https://thanos:9091/", Some("t0k3n".to_string()));
        let client = PrometheusClient::from_config(&config).unwrap();
        assert_eq!(client.base_url, "https://thanos:9091");
        assert_eq!(client.token.as_deref(), Some("t0k3n"));
    }

    /// Serve canned HTTP responses in order, repeating the last one
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses[n.min(responses.len() - 1)];

                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}"), hits)
    }

    #[tokio::test]
    async fn test_wait_retries_server_errors() {
        let (url, hits) = serve(vec![(503, "overloaded"), (200, EMPTY), (200, VECTOR)]).await;
        let client = PrometheusClient::new(url)
            .unwrap()
            .poll_interval(Duration::from_millis(10));

        let samples = client
            .wait_for_non_zero("kubevirt_vmi_phase_count", Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_fails_fast_on_bad_query() {
        let (url, hits) = serve(vec![(400, BAD_QUERY)]).await;
        let client = PrometheusClient::new(url)
            .unwrap()
            .poll_interval(Duration::from_millis(10));

        let err = client
            .wait_for_non_zero("kubevirt_vmi_phase_count{", Duration::from_secs(10))
            .await
            .unwrap_err();

        assert!(matches!(err, PrometheusError::Query { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (url, _) = serve(vec![(200, EMPTY)]).await;
        let client = PrometheusClient::new(url)
            .unwrap()
            .poll_interval(Duration::from_millis(20));

        let err = client
            .wait_for_value("up", |s| !s.is_empty(), Duration::from_millis(100))
            .await
            .unwrap_err();

        match err {
            PrometheusError::Timeout(t) => {
                assert_eq!(t.resource, "query up");
                assert!(t.attempts >= 2);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
