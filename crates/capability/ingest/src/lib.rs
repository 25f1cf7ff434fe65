mod mqtt;
mod queue;

pub use mqtt::{
    MAX_PACKET_SIZE, MqttSource, MqttSourceConfig, TlsFiles, default_client_id, split_topics,
};
pub use queue::QueueHandler;

use async_trait::async_trait;
use domain::InboundMessage;
use std::sync::Arc;

/// 采集错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("handler error: {0}")]
    Handler(String),
    #[error("source error: {0}")]
    Source(String),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("queue closed")]
    QueueClosed,
}

impl IngestError {
    /// 除单条处理失败外，其余错误都会终止采集。
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IngestError::Handler(_))
    }
}

/// 入站消息处理器。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage) -> Result<(), IngestError>;
}

/// 采集源抽象。
#[async_trait]
pub trait Source: Send + Sync {
    async fn run(&self, handler: Arc<dyn MessageHandler>) -> Result<(), IngestError>;
}

pub(crate) fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}
