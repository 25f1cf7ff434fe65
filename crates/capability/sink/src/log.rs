use crate::{MetricSink, SinkError, TagDecorator, put_line};
use async_trait::async_trait;
use domain::Reading;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// 只写日志的写入端（试运行）。
pub struct LogSink {
    decorator: TagDecorator,
    sent: AtomicU64,
}

impl LogSink {
    pub fn new(decorator: TagDecorator) -> Self {
        Self {
            decorator,
            sent: AtomicU64::new(0),
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MetricSink for LogSink {
    async fn send(&self, reading: &Reading) -> Result<(), SinkError> {
        let (metric, tags) = self.decorator.decorate(reading)?;
        let line = put_line(&metric, reading.timestamp, reading.value, &tags);
        info!("{}", line.trim_end());
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
