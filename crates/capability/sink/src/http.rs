use crate::{MetricSink, SinkError, TagDecorator, timestamp_field};
use async_trait::async_trait;
use domain::{Number, Reading, Tags};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// HTTP 写入端参数。
#[derive(Debug, Clone)]
pub struct HttpSinkOptions {
    /// 时序库基础地址，如 `http://127.0.0.1:4242`。
    pub uri: String,
    /// VictoriaMetrics 不返回明细，提交时不带 `?details`。
    pub victoria_metrics: bool,
    pub request_timeout: Duration,
}

impl HttpSinkOptions {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            victoria_metrics: false,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn put_url(&self) -> String {
        let base = self.uri.trim_end_matches('/');
        if self.victoria_metrics {
            format!("{}/api/put", base)
        } else {
            format!("{}/api/put?details", base)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct DataPoint {
    metric: String,
    timestamp: i64,
    value: serde_json::Value,
    tags: Tags,
}

fn json_value(value: Number) -> serde_json::Value {
    match value {
        Number::Int(value) => serde_json::Value::from(value),
        Number::Float(value) => serde_json::Value::from(value),
    }
}

/// OpenTSDB HTTP `/api/put` 写入端。
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    decorator: TagDecorator,
    pending: Mutex<Vec<DataPoint>>,
}

impl HttpSink {
    pub fn new(options: HttpSinkOptions, decorator: TagDecorator) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| SinkError::Connection(err.to_string()))?;
        let url = options.put_url();
        info!("opentsdb http endpoint {}", url);
        Ok(Self {
            client,
            url,
            decorator,
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl MetricSink for HttpSink {
    async fn send(&self, reading: &Reading) -> Result<(), SinkError> {
        let (metric, tags) = self.decorator.decorate(reading)?;
        self.pending.lock().push(DataPoint {
            metric,
            timestamp: timestamp_field(reading.timestamp),
            value: json_value(reading.value),
            tags,
        });
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let points = std::mem::take(&mut *self.pending.lock());
        if points.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(&self.url)
            .json(&points)
            .send()
            .await
            .map_err(|err| {
                if err.is_connect() {
                    SinkError::Connection(err.to_string())
                } else {
                    SinkError::Io(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = %status,
                points = points.len(),
                "opentsdb rejected batch"
            );
            return Err(SinkError::Rejected(format!("{}: {}", status, body)));
        }
        debug!(points = points.len(), "http batch flushed");
        Ok(())
    }
}
