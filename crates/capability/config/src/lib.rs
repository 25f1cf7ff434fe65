//! 桥接进程运行配置加载。

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 写入端类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// OpenTSDB telnet `put` 行协议。
    Telnet,
    /// OpenTSDB HTTP `/api/put`。
    Http,
    /// 仅日志输出。
    Log,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "telnet" | "tcp" => Ok(SinkKind::Telnet),
            "http" | "https" => Ok(SinkKind::Http),
            "log" | "stdout" => Ok(SinkKind::Log),
            other => Err(other.to_string()),
        }
    }
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    /// 未配置时由采集端生成。
    pub mqtt_client_id: Option<String>,
    /// 逗号分隔的订阅过滤器。
    pub mqtt_topic: String,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_root_ca: Option<PathBuf>,
    pub mqtt_client_cert: Option<PathBuf>,
    pub mqtt_client_key: Option<PathBuf>,
    pub mqtt_keep_alive: Duration,
    pub mqtt_max_packet_size: usize,
    pub tsdb_host: String,
    pub tsdb_port: u16,
    pub tsdb_uri: Option<String>,
    pub sink_kind: SinkKind,
    pub victoria_metrics: bool,
    pub add_host_tag: bool,
    pub static_tags: BTreeMap<String, String>,
    pub sink_max_tags: usize,
    pub override_config: Option<PathBuf>,
    pub override_cache_size: usize,
    pub metric_prefix: String,
    pub max_str_len: usize,
    pub tags_exclude: Vec<String>,
    pub max_send_messages: usize,
    pub max_time: Duration,
    pub queue_capacity: usize,
    pub flush_timeout: Duration,
    pub log_level: String,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源读取配置（测试中替代进程环境）。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = &lookup as &dyn Fn(&str) -> Option<String>;

        let mqtt_host = read_optional(lookup, "MQTT_BROKER")
            .ok_or_else(|| ConfigError::Missing("MQTT_BROKER".to_string()))?;
        let mqtt_port = read_with_default(lookup, "MQTT_PORT", 1883u16)?;
        let mqtt_client_id = read_optional(lookup, "MQTT_CLIENT_ID");
        let mqtt_topic = read_optional(lookup, "MQTT_TOPIC").unwrap_or_else(|| "dt/#".to_string());
        if mqtt_topic.split(',').all(|topic| topic.trim().is_empty()) {
            return Err(ConfigError::Invalid("MQTT_TOPIC".to_string(), mqtt_topic));
        }
        let mqtt_username = read_optional(lookup, "MQTT_USERNAME");
        let mqtt_password = read_optional(lookup, "MQTT_PASSWORD");
        let mqtt_root_ca = read_optional(lookup, "MQTT_ROOT_CA").map(PathBuf::from);
        let mqtt_client_cert = read_optional(lookup, "MQTT_CLIENT_CERT").map(PathBuf::from);
        let mqtt_client_key = read_optional(lookup, "MQTT_CLIENT_KEY").map(PathBuf::from);
        let mqtt_keep_alive =
            Duration::from_secs(read_with_default(lookup, "MQTT_KEEP_ALIVE", 30u64)?);
        let mqtt_max_packet_size =
            read_with_default(lookup, "MQTT_MAX_PACKET_SIZE", 268_435_455usize)?;

        let tsdb_host =
            read_optional(lookup, "OPEN_TSDB_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let tsdb_port = read_with_default(lookup, "OPEN_TSDB_PORT", 4242u16)?;
        let tsdb_uri = read_optional(lookup, "OPEN_TSDB_URI");
        let default_sink = if tsdb_uri.is_some() {
            SinkKind::Http
        } else {
            SinkKind::Telnet
        };
        let sink_kind = read_with_default(lookup, "TSDB_SINK", default_sink)?;
        if sink_kind == SinkKind::Http && tsdb_uri.is_none() {
            return Err(ConfigError::Missing("OPEN_TSDB_URI".to_string()));
        }
        let victoria_metrics = read_bool_with_default(lookup, "VICTORIA_METRICS", false);
        let add_host_tag = read_bool_with_default(lookup, "ADD_HOST_TAG", false);
        let static_tags = read_static_tags(lookup, "STATIC_TAGS")?;
        let sink_max_tags = read_with_default(lookup, "SINK_MAX_TAGS", 8usize)?;

        let override_config = read_optional(lookup, "OVERRIDE_CONFIG").map(PathBuf::from);
        let override_cache_size = read_with_default(lookup, "OVERRIDE_CACHE_SIZE", 10_240usize)?;
        let metric_prefix =
            read_optional(lookup, "METRIC_PREFIX").unwrap_or_else(|| "mqtt__".to_string());
        let max_str_len = read_with_default(lookup, "MAX_STR_LEN", 128usize)?;
        let tags_exclude = read_optional(lookup, "TAGS_EXCLUDE")
            .unwrap_or_else(|| "metric_prefix".to_string())
            .split(',')
            .map(|key| key.trim().to_lowercase())
            .filter(|key| !key.is_empty())
            .collect();

        let max_send_messages = read_with_default(lookup, "MAX_SEND_MESSAGES", 100usize)?;
        let max_time = Duration::from_secs(read_with_default(lookup, "MAX_TIME", 5u64)?);
        let queue_capacity = read_with_default(lookup, "QUEUE_CAPACITY", 10_000usize)?.max(1);
        let flush_timeout = Duration::from_secs(read_with_default(lookup, "FLUSH_TIMEOUT", 10u64)?);
        let log_level = read_optional(lookup, "LOG_LEVEL").unwrap_or_else(|| "INFO".to_string());

        Ok(Self {
            mqtt_host,
            mqtt_port,
            mqtt_client_id,
            mqtt_topic,
            mqtt_username,
            mqtt_password,
            mqtt_root_ca,
            mqtt_client_cert,
            mqtt_client_key,
            mqtt_keep_alive,
            mqtt_max_packet_size,
            tsdb_host,
            tsdb_port,
            tsdb_uri,
            sink_kind,
            victoria_metrics,
            add_host_tag,
            static_tags,
            sink_max_tags,
            override_config,
            override_cache_size,
            metric_prefix,
            max_str_len,
            tags_exclude,
            max_send_messages,
            max_time,
            queue_capacity,
            flush_timeout,
            log_level,
        })
    }
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn read_optional(lookup: Lookup<'_>, key: &str) -> Option<String> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn read_with_default<T: FromStr>(lookup: Lookup<'_>, key: &str, default: T) -> Result<T, ConfigError> {
    let value = match read_optional(lookup, key) {
        Some(value) => value,
        None => return Ok(default),
    };
    value
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_bool_with_default(lookup: Lookup<'_>, key: &str, default: bool) -> bool {
    match read_optional(lookup, key) {
        Some(value) => matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        ),
        None => default,
    }
}

/// JSON 对象；字符串与数值均接受，统一转为字符串。
fn read_static_tags(lookup: Lookup<'_>, key: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let Some(raw) = read_optional(lookup, key) else {
        return Ok(BTreeMap::new());
    };
    let parsed: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| ConfigError::Invalid(key.to_string(), err.to_string()))?;
    let serde_json::Value::Object(object) = parsed else {
        return Err(ConfigError::Invalid(key.to_string(), raw));
    };
    object
        .into_iter()
        .map(|(tag, value)| match value {
            serde_json::Value::String(text) => Ok((tag, text)),
            serde_json::Value::Number(number) => Ok((tag, number.to_string())),
            serde_json::Value::Bool(flag) => Ok((tag, flag.to_string())),
            other => Err(ConfigError::Invalid(
                key.to_string(),
                format!("{}: {}", tag, other),
            )),
        })
        .collect()
}
