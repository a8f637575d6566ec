//! HTTP client for a Prometheus-compatible metrics backend

use super::query::QueryRange;
use super::{MetricsBackend, RangeResponse};
use crate::error::QueryError;
use crate::models::{Sample, Series};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

const QUERY_RANGE_PATH: &str = "api/v1/query_range";

/// Range-query client for the Prometheus HTTP API
pub struct PrometheusClient {
    client: Client,
    base_url: Url,
}

impl PrometheusClient {
    /// Create a client whose every call is bounded by `timeout`
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self, QueryError> {
        let client = Client::builder().timeout(timeout).build()?;

        let mut base_url = base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl MetricsBackend for PrometheusClient {
    async fn query_range(&self, query: &str, range: &QueryRange) -> Result<RangeResponse, QueryError> {
        let url = self
            .base_url
            .join(QUERY_RANGE_PATH)
            .map_err(|e| QueryError::Decode(e.to_string()))?;

        debug!(query = %query, start = %range.start, end = %range.end, "Issuing range query");

        let response = self
            .client
            .get(url)
            .query(&[
                ("query", query.to_string()),
                ("start", format_timestamp(range.start)),
                ("end", format_timestamp(range.end)),
                ("step", range.step.as_secs_f64().to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        let envelope: ApiResponse = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(QueryError::Backend {
                    error_type: status.to_string(),
                    message: String::from_utf8_lossy(&body).into_owned(),
                })
            }
            Err(e) => return Err(QueryError::Decode(e.to_string())),
        };

        envelope.into_range_response()
    }
}

/// Unix seconds with millisecond precision
fn format_timestamp(ts: DateTime<Utc>) -> String {
    format!("{:.3}", ts.timestamp_millis() as f64 / 1000.0)
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Matrix(Vec<MatrixSeries>),
    Vector(serde_json::Value),
    Scalar(serde_json::Value),
    #[serde(rename = "string")]
    Str(serde_json::Value),
}

impl QueryData {
    fn kind(&self) -> &'static str {
        match self {
            QueryData::Matrix(_) => "matrix",
            QueryData::Vector(_) => "vector",
            QueryData::Scalar(_) => "scalar",
            QueryData::Str(_) => "string",
        }
    }
}

#[derive(Debug, Deserialize)]
struct MatrixSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl ApiResponse {
    fn into_range_response(self) -> Result<RangeResponse, QueryError> {
        if self.status != "success" {
            return Err(QueryError::Backend {
                error_type: self.error_type.unwrap_or_else(|| "unknown".to_string()),
                message: self.error.unwrap_or_default(),
            });
        }

        let series = match self.data {
            Some(QueryData::Matrix(series)) => series,
            Some(other) => return Err(QueryError::UnexpectedResultType(other.kind().to_string())),
            None => return Err(QueryError::Decode("response has no data".to_string())),
        };

        let series = series
            .into_iter()
            .map(MatrixSeries::into_series)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RangeResponse {
            series,
            warnings: self.warnings,
        })
    }
}

impl MatrixSeries {
    fn into_series(self) -> Result<Series, QueryError> {
        let samples = self
            .values
            .into_iter()
            .map(|(ts, value)| {
                let timestamp = DateTime::<Utc>::from_timestamp_millis((ts * 1000.0).round() as i64)
                    .ok_or_else(|| QueryError::Decode(format!("timestamp out of range: {}", ts)))?;
                let value = value
                    .parse::<f64>()
                    .map_err(|_| QueryError::Decode(format!("invalid sample value {:?}", value)))?;
                Ok(Sample { timestamp, value })
            })
            .collect::<Result<Vec<_>, QueryError>>()?;

        Ok(Series {
            labels: self.metric,
            samples,
        })
    }
}
