//! 批处理消费者：按条数或截止时间攒批，规范化后写入时序库。

use bridge_normalize::Normalizer;
use bridge_sink::MetricSink;
use bridge_telemetry::{
    metrics, record_batch_processed, record_flush_failure, record_flush_latency_ms,
    record_flush_timeout, record_reading_emitted, record_send_failure,
};
use domain::InboundMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, error, info, warn};

/// 截止时间剩余不足该值时重新计算窗口。
const DEADLINE_SLACK: Duration = Duration::from_millis(100);

/// Pipeline 处理错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("sink connection lost: {0}")]
    SinkConnection(String),
}

/// Pipeline 参数。
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 单批最大消息数。
    pub batch_size: usize,
    /// 攒批时间窗口。
    pub batch_time: Duration,
    /// 单次 flush 的超时。
    pub flush_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_time: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(10),
        }
    }
}

impl PipelineConfig {
    fn sanitized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = 1;
        }
        if self.batch_time.is_zero() {
            self.batch_time = Duration::from_millis(1);
        }
        if self.flush_timeout.is_zero() {
            self.flush_timeout = Duration::from_millis(1);
        }
        self
    }
}

/// 单批 flush 结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushOutcome {
    /// 本批没有成功缓冲的数据点。
    #[default]
    Skipped,
    Flushed,
    TimedOut,
    Failed,
}

/// 单批处理统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub messages: usize,
    pub readings: usize,
    pub sent: usize,
    pub send_failures: usize,
    pub flush: FlushOutcome,
}

/// 消费者入口。
#[derive(Clone)]
pub struct Pipeline {
    normalizer: Arc<Normalizer>,
    sink: Arc<dyn MetricSink>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(normalizer: Arc<Normalizer>, sink: Arc<dyn MetricSink>) -> Self {
        Self::with_config(normalizer, sink, PipelineConfig::default())
    }

    pub fn with_config(
        normalizer: Arc<Normalizer>,
        sink: Arc<dyn MetricSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            normalizer,
            sink,
            config: config.sanitized(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 持续消费队列，直到生产者关闭队列或写入端连接丢失。
    ///
    /// 每批在条数达到上限或截止时间到达时结束；截止时间仅在已过期（或即将过期）时重算。
    pub async fn run(&self, mut rx: mpsc::Receiver<InboundMessage>) -> Result<(), PipelineError> {
        let mut deadline = Instant::now() + self.config.batch_time;
        let mut batch = Vec::with_capacity(self.config.batch_size);
        loop {
            let mut closed = false;
            while batch.len() < self.config.batch_size {
                match timeout_at(deadline, rx.recv()).await {
                    Ok(Some(message)) => batch.push(message),
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }

            if !batch.is_empty() {
                let messages = std::mem::take(&mut batch);
                self.process_batch(&messages).await?;
            }
            if closed {
                info!("message queue closed");
                return Ok(());
            }
            if deadline.saturating_duration_since(Instant::now()) <= DEADLINE_SLACK {
                deadline = Instant::now() + self.config.batch_time;
            }
        }
    }

    /// 按到达顺序处理一批消息；单条写入失败只记录，不影响其余数据点。
    pub async fn process_batch(
        &self,
        messages: &[InboundMessage],
    ) -> Result<BatchReport, PipelineError> {
        let mut report = BatchReport {
            messages: messages.len(),
            ..BatchReport::default()
        };

        for message in messages {
            for reading in self.normalizer.normalize(message) {
                report.readings += 1;
                match self.sink.send(&reading).await {
                    Ok(()) => {
                        report.sent += 1;
                        record_reading_emitted();
                    }
                    Err(err) if err.is_fatal() => {
                        error!("sink connection lost while sending {}: {}", reading.metric, err);
                        return Err(PipelineError::SinkConnection(err.to_string()));
                    }
                    Err(err) => {
                        report.send_failures += 1;
                        record_send_failure();
                        error!(
                            topic = %message.topic,
                            value = %reading.value,
                            "failed to send {}: {}",
                            reading.metric,
                            err
                        );
                    }
                }
            }
        }

        if report.sent > 0 {
            report.flush = self.flush().await?;
        }
        record_batch_processed();
        debug!(
            messages = report.messages,
            readings = report.readings,
            sent = report.sent,
            send_failures = report.send_failures,
            flush = ?report.flush,
            totals = ?metrics().snapshot(),
            "batch processed"
        );
        Ok(report)
    }

    async fn flush(&self) -> Result<FlushOutcome, PipelineError> {
        let started = Instant::now();
        match timeout(self.config.flush_timeout, self.sink.flush()).await {
            Ok(Ok(())) => {
                record_flush_latency_ms(started.elapsed().as_millis() as u64);
                Ok(FlushOutcome::Flushed)
            }
            Ok(Err(err)) if err.is_fatal() => {
                record_flush_failure();
                error!("sink connection lost during flush: {}", err);
                Err(PipelineError::SinkConnection(err.to_string()))
            }
            Ok(Err(err)) => {
                record_flush_failure();
                error!("batch flush failed: {}", err);
                Ok(FlushOutcome::Failed)
            }
            Err(_) => {
                record_flush_timeout();
                warn!(
                    "batch flush timed out after {:?}",
                    self.config.flush_timeout
                );
                Ok(FlushOutcome::TimedOut)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_normalize::NormalizeOptions;
    use bridge_overrides::{OverrideResolver, OverrideTable};
    use bridge_sink::SinkError;
    use domain::Reading;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        sent: Mutex<Vec<String>>,
        pending: Mutex<usize>,
        flushes: Mutex<Vec<usize>>,
    }

    impl Recorded {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().expect("sent lock").clone()
        }

        fn flushes(&self) -> Vec<usize> {
            self.flushes.lock().expect("flushes lock").clone()
        }
    }

    #[derive(Clone, Copy, Default)]
    enum FlushBehavior {
        #[default]
        Succeed,
        Hang,
        Reject,
        Disconnect,
    }

    #[derive(Default)]
    struct RecordingSink {
        recorded: Recorded,
        flush_behavior: FlushBehavior,
    }

    impl RecordingSink {
        fn with_flush(flush_behavior: FlushBehavior) -> Self {
            Self {
                flush_behavior,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl MetricSink for RecordingSink {
        async fn send(&self, reading: &Reading) -> Result<(), SinkError> {
            if reading.metric.contains("bad") {
                return Err(SinkError::InvalidReading("forced failure".to_string()));
            }
            self.recorded
                .sent
                .lock()
                .expect("sent lock")
                .push(reading.metric.clone());
            *self.recorded.pending.lock().expect("pending lock") += 1;
            Ok(())
        }

        async fn flush(&self) -> Result<(), SinkError> {
            match self.flush_behavior {
                FlushBehavior::Succeed => {}
                FlushBehavior::Hang => tokio::time::sleep(Duration::from_secs(3600)).await,
                FlushBehavior::Reject => {
                    return Err(SinkError::Rejected("400 bad request".to_string()));
                }
                FlushBehavior::Disconnect => {
                    return Err(SinkError::Connection("broken pipe".to_string()));
                }
            }
            let pending = std::mem::take(&mut *self.recorded.pending.lock().expect("pending lock"));
            self.recorded
                .flushes
                .lock()
                .expect("flushes lock")
                .push(pending);
            Ok(())
        }
    }

    fn normalizer() -> Arc<Normalizer> {
        Arc::new(Normalizer::new(
            Arc::new(OverrideResolver::new(OverrideTable::default())),
            NormalizeOptions::default(),
        ))
    }

    fn message(property: &str, payload: &str) -> InboundMessage {
        InboundMessage::new(
            format!("dt/app/room/thing/{}", property),
            payload.as_bytes().to_vec(),
            1_700_000_000_000,
        )
    }

    fn config(batch_size: usize) -> PipelineConfig {
        PipelineConfig {
            batch_size,
            batch_time: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_bounded_by_size() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Pipeline::with_config(normalizer(), sink.clone(), config(2));
        let (tx, rx) = mpsc::channel(16);
        for index in 0..5 {
            tx.send(message(&format!("p{}", index), "1")).await.expect("enqueue");
        }
        drop(tx);

        pipeline.run(rx).await.expect("run");
        assert_eq!(sink.recorded.flushes(), vec![2, 2, 1]);
        assert_eq!(
            sink.recorded.sent(),
            vec!["mqtt__p0", "mqtt__p1", "mqtt__p2", "mqtt__p3", "mqtt__p4"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_flushes_partial_batch() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Pipeline::with_config(normalizer(), sink.clone(), config(100));
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(async move { pipeline.run(rx).await });

        tx.send(message("temperature", "21.5")).await.expect("enqueue");
        tokio::time::sleep(Duration::from_millis(5_050)).await;
        assert_eq!(sink.recorded.flushes(), vec![1]);

        tx.send(message("humidity", "40")).await.expect("enqueue");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.recorded.flushes(), vec![1, 1]);

        drop(tx);
        handle.await.expect("join").expect("run");
    }

    #[tokio::test]
    async fn failed_items_do_not_abort_batch() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Pipeline::with_config(normalizer(), sink.clone(), config(10));
        let report = pipeline
            .process_batch(&[
                message("good", "1"),
                message("bad", "2"),
                message("also_good", r#"{"values": {"a": 1, "bad": 2, "b": 3}}"#),
            ])
            .await
            .expect("batch");
        assert_eq!(
            report,
            BatchReport {
                messages: 3,
                readings: 5,
                sent: 3,
                send_failures: 2,
                flush: FlushOutcome::Flushed,
            }
        );
        assert_eq!(
            sink.recorded.sent(),
            vec!["mqtt__good", "mqtt__also_good_a", "mqtt__also_good_b"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flush_timeout_is_not_fatal() {
        let sink = Arc::new(RecordingSink::with_flush(FlushBehavior::Hang));
        let pipeline = Pipeline::with_config(normalizer(), sink, config(10));
        let report = pipeline
            .process_batch(&[message("t", "1")])
            .await
            .expect("batch");
        assert_eq!(report.flush, FlushOutcome::TimedOut);
    }

    #[tokio::test]
    async fn rejected_flush_is_not_fatal() {
        let sink = Arc::new(RecordingSink::with_flush(FlushBehavior::Reject));
        let pipeline = Pipeline::with_config(normalizer(), sink, config(10));
        let report = pipeline
            .process_batch(&[message("t", "1")])
            .await
            .expect("batch");
        assert_eq!(report.flush, FlushOutcome::Failed);
    }

    #[tokio::test]
    async fn connection_loss_stops_the_loop() {
        let sink = Arc::new(RecordingSink::with_flush(FlushBehavior::Disconnect));
        let pipeline = Pipeline::with_config(normalizer(), sink, config(1));
        let (tx, rx) = mpsc::channel(4);
        tx.send(message("t", "1")).await.expect("enqueue");

        let err = pipeline.run(rx).await.expect_err("fatal");
        assert!(matches!(err, PipelineError::SinkConnection(_)));
        drop(tx);
    }

    #[tokio::test]
    async fn empty_batches_skip_flush() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Pipeline::with_config(normalizer(), sink.clone(), config(10));
        let report = pipeline.process_batch(&[]).await.expect("batch");
        assert_eq!(report.flush, FlushOutcome::Skipped);
        assert!(sink.recorded.flushes().is_empty());
    }
}
