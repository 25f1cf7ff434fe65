//! 桥接链路装配
//!
//! MQTT 采集源（生产者）把消息放入有界队列，批处理流水线（消费者）从队列取出、
//! 规范化后写入时序库。任一端致命失败时显式终止另一端，并把错误向上传递。

use bridge_config::{AppConfig, SinkKind};
use bridge_ingest::{
    MessageHandler, MqttSource, MqttSourceConfig, QueueHandler, Source, TlsFiles,
    default_client_id, split_topics,
};
use bridge_normalize::{NormalizeOptions, Normalizer};
use bridge_overrides::{OverrideResolver, OverrideTable};
use bridge_pipeline::{Pipeline, PipelineConfig};
use bridge_sink::{
    HttpSink, HttpSinkOptions, LogSink, MetricSink, TagDecorator, TelnetSink, local_hostname,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{info, warn};

/// 桥接进程的致命错误。
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("override config error: {0}")]
    Overrides(String),
    #[error("sink error: {0}")]
    Sink(String),
    #[error("ingest error: {0}")]
    Ingest(String),
    #[error("pipeline error: {0}")]
    Pipeline(String),
    #[error("task error: {0}")]
    Task(String),
}

/// 加载覆盖配置；未配置文件时为空表。
pub fn load_resolver(config: &AppConfig) -> Result<OverrideResolver, BridgeError> {
    let table = match &config.override_config {
        Some(path) => OverrideTable::from_file(path)
            .map_err(|err| BridgeError::Overrides(format!("{}: {}", path.display(), err)))?,
        None => OverrideTable::default(),
    };
    info!(
        patterns = table.len(),
        cache_size = config.override_cache_size,
        "override table loaded"
    );
    Ok(OverrideResolver::with_capacity(
        table,
        config.override_cache_size,
    ))
}

pub fn normalize_options(config: &AppConfig) -> NormalizeOptions {
    NormalizeOptions::default()
        .with_metric_prefix(config.metric_prefix.clone())
        .with_max_str_len(config.max_str_len)
        .with_tags_exclude(&config.tags_exclude)
}

pub fn pipeline_config(config: &AppConfig) -> PipelineConfig {
    PipelineConfig {
        batch_size: config.max_send_messages,
        batch_time: config.max_time,
        flush_timeout: config.flush_timeout,
    }
}

pub fn mqtt_source_config(config: &AppConfig) -> MqttSourceConfig {
    let tls = config.mqtt_root_ca.as_ref().map(|root_ca| TlsFiles {
        root_ca: root_ca.clone(),
        client_cert: config.mqtt_client_cert.clone(),
        client_key: config.mqtt_client_key.clone(),
    });
    MqttSourceConfig {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        client_id: config
            .mqtt_client_id
            .clone()
            .unwrap_or_else(default_client_id),
        username: config.mqtt_username.clone(),
        password: config.mqtt_password.clone(),
        topics: split_topics(&config.mqtt_topic),
        keep_alive: config.mqtt_keep_alive,
        max_packet_size: config.mqtt_max_packet_size,
        tls,
    }
}

fn tag_decorator(config: &AppConfig) -> TagDecorator {
    let host = if config.add_host_tag {
        let host = local_hostname();
        if host.is_none() {
            warn!("hostname unavailable, host tag skipped");
        }
        host
    } else {
        None
    };
    TagDecorator::new(config.static_tags.clone(), host, config.sink_max_tags)
}

/// 按配置创建写入端；telnet 写入端在此建立连接，失败即致命。
pub async fn build_sink(config: &AppConfig) -> Result<Arc<dyn MetricSink>, BridgeError> {
    let decorator = tag_decorator(config);
    let sink: Arc<dyn MetricSink> = match config.sink_kind {
        SinkKind::Telnet => Arc::new(
            TelnetSink::connect(&config.tsdb_host, config.tsdb_port, decorator)
                .await
                .map_err(|err| BridgeError::Sink(err.to_string()))?,
        ),
        SinkKind::Http => {
            let uri = config
                .tsdb_uri
                .clone()
                .ok_or_else(|| BridgeError::Sink("OPEN_TSDB_URI is not set".to_string()))?;
            let mut options = HttpSinkOptions::new(uri);
            options.victoria_metrics = config.victoria_metrics;
            Arc::new(
                HttpSink::new(options, decorator)
                    .map_err(|err| BridgeError::Sink(err.to_string()))?,
            )
        }
        SinkKind::Log => Arc::new(LogSink::new(decorator)),
    };
    info!("sink ready: {:?}", config.sink_kind);
    Ok(sink)
}

/// 装配并运行桥接链路，直到致命错误或 Ctrl-C。
pub async fn run(config: &AppConfig) -> Result<(), BridgeError> {
    let resolver = Arc::new(load_resolver(config)?);
    let normalizer = Arc::new(Normalizer::new(resolver, normalize_options(config)));
    let sink = build_sink(config).await?;
    let pipeline = Pipeline::with_config(normalizer, sink, pipeline_config(config));
    let source: Arc<dyn Source> = Arc::new(MqttSource::new(mqtt_source_config(config)));
    info!(
        broker = %config.mqtt_host,
        port = config.mqtt_port,
        topics = %config.mqtt_topic,
        batch_size = config.max_send_messages,
        batch_time_s = config.max_time.as_secs(),
        "bridge started"
    );
    run_tasks(source, pipeline, config.queue_capacity, shutdown_signal()).await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // 无法注册信号时不主动退出
        std::future::pending::<()>().await;
    }
}

/// 生产者与消费者各自运行在独立任务中。
///
/// - 生产者退出（含失败）：终止消费者，返回生产者结果
/// - 消费者退出（含失败）：终止生产者，返回消费者结果
/// - 收到关闭信号：停止生产者，消费者处理完队列中剩余消息后退出
pub async fn run_tasks<S>(
    source: Arc<dyn Source>,
    pipeline: Pipeline,
    queue_capacity: usize,
    shutdown: S,
) -> Result<(), BridgeError>
where
    S: std::future::Future<Output = ()>,
{
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));
    let handler: Arc<dyn MessageHandler> = Arc::new(QueueHandler::new(tx));
    let mut producer = tokio::spawn(async move { source.run(handler).await });
    let mut consumer = tokio::spawn(async move { pipeline.run(rx).await });

    tokio::select! {
        result = &mut producer => {
            consumer.abort();
            warn!("mqtt source stopped");
            producer_outcome(result)
        }
        result = &mut consumer => {
            producer.abort();
            warn!("pipeline stopped");
            consumer_outcome(result)
        }
        _ = shutdown => {
            info!("shutdown requested, draining queue");
            producer.abort();
            // 生产者退出后队列关闭，消费者处理完剩余消息
            let result = consumer.await;
            consumer_outcome(result)
        }
    }
}

fn producer_outcome(
    result: Result<Result<(), bridge_ingest::IngestError>, JoinError>,
) -> Result<(), BridgeError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(BridgeError::Ingest(err.to_string())),
        Err(err) => Err(BridgeError::Task(err.to_string())),
    }
}

fn consumer_outcome(
    result: Result<Result<(), bridge_pipeline::PipelineError>, JoinError>,
) -> Result<(), BridgeError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(BridgeError::Pipeline(err.to_string())),
        Err(err) if err.is_cancelled() => Ok(()),
        Err(err) => Err(BridgeError::Task(err.to_string())),
    }
}
