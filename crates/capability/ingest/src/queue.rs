use crate::{IngestError, MessageHandler};
use async_trait::async_trait;
use bridge_telemetry::{record_message_dropped, record_message_received};
use domain::InboundMessage;
use tokio::sync::mpsc;
use tracing::debug;

/// 生产者侧：把消息原样放入有界队列，不做任何转换。
///
/// 队列满时挂起（背压）；消费者退出后返回 `QueueClosed`。
#[derive(Clone)]
pub struct QueueHandler {
    tx: mpsc::Sender<InboundMessage>,
}

impl QueueHandler {
    pub fn new(tx: mpsc::Sender<InboundMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl MessageHandler for QueueHandler {
    async fn handle(&self, message: InboundMessage) -> Result<(), IngestError> {
        record_message_received();
        debug!(
            topic = %message.topic,
            payload = %String::from_utf8_lossy(&message.payload),
            "received mqtt message"
        );
        self.tx.send(message).await.map_err(|_| {
            record_message_dropped();
            IngestError::QueueClosed
        })
    }
}
