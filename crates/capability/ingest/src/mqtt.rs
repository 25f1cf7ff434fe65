use crate::{IngestError, MessageHandler, Source, now_epoch_ms};
use async_trait::async_trait;
use bridge_telemetry::record_message_dropped;
use domain::InboundMessage;
use rumqttc::{AsyncClient, ConnectionError, Event, MqttOptions, Packet, QoS, StateError, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// TLS 材料路径。客户端证书与私钥同时提供时才启用双向认证。
#[derive(Debug, Clone, Default)]
pub struct TlsFiles {
    pub root_ca: PathBuf,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

/// MQTT 采集源配置。
#[derive(Debug, Clone)]
pub struct MqttSourceConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 订阅过滤器，可含 `+` / `#`。
    pub topics: Vec<String>,
    pub keep_alive: Duration,
    /// 单个报文的最大长度（收发一致）。
    pub max_packet_size: usize,
    pub tls: Option<TlsFiles>,
}

/// MQTT 协议允许的最大剩余长度（约 256 MiB）。
pub const MAX_PACKET_SIZE: usize = 268_435_455;

/// `mqtt-tsdb-bridge-<uuid>`
pub fn default_client_id() -> String {
    format!("mqtt-tsdb-bridge-{}", uuid::Uuid::new_v4())
}

/// 逗号分隔的订阅列表；空项忽略。
pub fn split_topics(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|topic| !topic.is_empty())
        .map(str::to_string)
        .collect()
}

/// MQTT 采集源。
#[derive(Debug, Clone)]
pub struct MqttSource {
    config: MqttSourceConfig,
}

impl MqttSource {
    pub fn new(config: MqttSourceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MqttSourceConfig {
        &self.config
    }

    fn options(&self) -> Result<MqttOptions, IngestError> {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(self.config.keep_alive.max(Duration::from_secs(5)));
        let max_packet_size = self.config.max_packet_size.clamp(1024, MAX_PACKET_SIZE);
        options.set_max_packet_size(max_packet_size, max_packet_size);
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }
        if let Some(tls) = &self.config.tls {
            options.set_transport(tls_transport(tls)?);
        }
        Ok(options)
    }
}

fn read_file(path: &PathBuf) -> Result<Vec<u8>, IngestError> {
    std::fs::read(path).map_err(|err| IngestError::Tls(format!("{}: {}", path.display(), err)))
}

fn tls_transport(tls: &TlsFiles) -> Result<Transport, IngestError> {
    let ca = read_file(&tls.root_ca)?;
    let client_auth = match (&tls.client_cert, &tls.client_key) {
        (Some(cert), Some(key)) => Some((read_file(cert)?, read_file(key)?)),
        _ => None,
    };
    Ok(Transport::tls(ca, client_auth, None))
}

/// 报文解码失败（超长、格式错误）：丢弃当前连接后重连，不终止采集。
fn is_decode_error(err: &ConnectionError) -> bool {
    matches!(err, ConnectionError::MqttState(StateError::Deserialization(_)))
}

#[async_trait]
impl Source for MqttSource {
    async fn run(&self, handler: Arc<dyn MessageHandler>) -> Result<(), IngestError> {
        if self.config.topics.is_empty() {
            return Err(IngestError::Source("no topics to subscribe".to_string()));
        }
        let options = self.options()?;

        // 请求通道需容纳每次连接后的全部订阅请求
        let capacity = self.config.topics.len().max(10);
        let (client, mut eventloop) = AsyncClient::new(options, capacity);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage::new(
                        publish.topic.clone(),
                        publish.payload.to_vec(),
                        now_epoch_ms(),
                    );
                    if let Err(err) = handler.handle(message).await {
                        if err.is_fatal() {
                            return Err(err);
                        }
                        warn!("message handler failed for {}: {}", publish.topic, err);
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(
                        host = %self.config.host,
                        port = self.config.port,
                        topics = ?self.config.topics,
                        "connected to mqtt broker"
                    );
                    // 每次（重新）连接后都订阅一次，clean session 不保留订阅
                    for topic in &self.config.topics {
                        client
                            .subscribe(topic.clone(), QoS::AtMostOnce)
                            .await
                            .map_err(|err| IngestError::Source(err.to_string()))?;
                    }
                }
                Ok(_) => {}
                Err(err) if is_decode_error(&err) => {
                    record_message_dropped();
                    warn!("mqtt packet dropped, reconnecting: {}", err);
                }
                Err(err) => {
                    error!("mqtt connection to {} lost: {}", self.config.host, err);
                    return Err(IngestError::Source(err.to_string()));
                }
            }
        }
    }
}
