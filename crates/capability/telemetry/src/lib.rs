//! 追踪初始化与进程内计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub fragments_decoded: u64,
    pub readings_emitted: u64,
    pub info_readings: u64,
    pub coercion_failures: u64,
    pub payload_fallbacks: u64,
    pub send_failures: u64,
    pub batches_processed: u64,
    pub flush_failures: u64,
    pub flush_timeouts: u64,
    pub flush_latency_ms_total: u64,
    pub flush_latency_ms_count: u64,
}

/// 桥接进程的基础计数器。
pub struct TelemetryMetrics {
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    fragments_decoded: AtomicU64,
    readings_emitted: AtomicU64,
    info_readings: AtomicU64,
    coercion_failures: AtomicU64,
    payload_fallbacks: AtomicU64,
    send_failures: AtomicU64,
    batches_processed: AtomicU64,
    flush_failures: AtomicU64,
    flush_timeouts: AtomicU64,
    flush_latency_ms_total: AtomicU64,
    flush_latency_ms_count: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            fragments_decoded: AtomicU64::new(0),
            readings_emitted: AtomicU64::new(0),
            info_readings: AtomicU64::new(0),
            coercion_failures: AtomicU64::new(0),
            payload_fallbacks: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            batches_processed: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            flush_timeouts: AtomicU64::new(0),
            flush_latency_ms_total: AtomicU64::new(0),
            flush_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            fragments_decoded: self.fragments_decoded.load(Ordering::Relaxed),
            readings_emitted: self.readings_emitted.load(Ordering::Relaxed),
            info_readings: self.info_readings.load(Ordering::Relaxed),
            coercion_failures: self.coercion_failures.load(Ordering::Relaxed),
            payload_fallbacks: self.payload_fallbacks.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            flush_timeouts: self.flush_timeouts.load(Ordering::Relaxed),
            flush_latency_ms_total: self.flush_latency_ms_total.load(Ordering::Relaxed),
            flush_latency_ms_count: self.flush_latency_ms_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 日志级别名称 → EnvFilter 指令。
///
/// 兼容 `WARNING` / `CRITICAL` 等写法；无法识别时回落到 info。
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        "off" => "off",
        _ => "info",
    }
}

/// 初始化 tracing：`RUST_LOG` 优先，否则使用给定级别。
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(level)));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录收到的 MQTT 消息数。
pub fn record_message_received() {
    metrics().messages_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录丢弃的消息数（队列关闭或报文无法解码）。
pub fn record_message_dropped() {
    metrics().messages_dropped.fetch_add(1, Ordering::Relaxed);
}

pub fn record_fragment_decoded() {
    metrics().fragments_decoded.fetch_add(1, Ordering::Relaxed);
}

/// 记录成功交给写入端的数据点数。
pub fn record_reading_emitted() {
    metrics().readings_emitted.fetch_add(1, Ordering::Relaxed);
}

pub fn record_info_reading() {
    metrics().info_readings.fetch_add(1, Ordering::Relaxed);
}

/// 记录值无法解析（哨兵 -1）次数。
pub fn record_coercion_failure() {
    metrics().coercion_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录 JSON 解析失败回落为字符串的次数。
pub fn record_payload_fallback() {
    metrics().payload_fallbacks.fetch_add(1, Ordering::Relaxed);
}

pub fn record_send_failure() {
    metrics().send_failures.fetch_add(1, Ordering::Relaxed);
}

pub fn record_batch_processed() {
    metrics().batches_processed.fetch_add(1, Ordering::Relaxed);
}

pub fn record_flush_failure() {
    metrics().flush_failures.fetch_add(1, Ordering::Relaxed);
}

pub fn record_flush_timeout() {
    metrics().flush_timeouts.fetch_add(1, Ordering::Relaxed);
}

/// 记录 flush 耗时（毫秒）。
pub fn record_flush_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .flush_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .flush_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}
