//! 时序数据写入端。
//!
//! - `TelnetSink`：OpenTSDB `put` 行协议（VictoriaMetrics 亦兼容）
//! - `HttpSink`：OpenTSDB HTTP `/api/put`
//! - `LogSink`：仅输出日志，用于试运行
//!
//! 写入端按条缓冲（`send`），每批次结束时统一提交（`flush`）。

mod error;
mod http;
mod log;
mod tags;
mod telnet;

pub use error::SinkError;
pub use http::{HttpSink, HttpSinkOptions};
pub use log::LogSink;
pub use tags::{DEFAULT_MAX_TAGS, TagDecorator, local_hostname, sanitize};
pub use telnet::{TelnetSink, put_line};

use async_trait::async_trait;
use domain::Reading;
use std::sync::Arc;

/// 写入端抽象。
///
/// `send` 的单条错误由调用方记录后跳过；`flush` 返回 `SinkError::Connection` 视为致命。
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn send(&self, reading: &Reading) -> Result<(), SinkError>;

    async fn flush(&self) -> Result<(), SinkError>;
}

#[async_trait]
impl<T: MetricSink + ?Sized> MetricSink for Arc<T> {
    async fn send(&self, reading: &Reading) -> Result<(), SinkError> {
        (**self).send(reading).await
    }

    async fn flush(&self) -> Result<(), SinkError> {
        (**self).flush().await
    }
}

/// 时间戳字段：整数秒原样输出，带小数的秒转为毫秒。
pub fn timestamp_field(timestamp: domain::Number) -> i64 {
    match timestamp {
        domain::Number::Int(seconds) => seconds,
        domain::Number::Float(seconds) if seconds.fract() == 0.0 => seconds as i64,
        domain::Number::Float(seconds) => (seconds * 1000.0).round() as i64,
    }
}
