use async_trait::async_trait;
use bridge_ingest::{
    IngestError, MAX_PACKET_SIZE, MessageHandler, MqttSource, MqttSourceConfig, Source,
};
use domain::InboundMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const TOPIC: &str = "dt/app/room/thing/temperature";

/// 把收到的载荷转发给测试。
struct Forward(mpsc::UnboundedSender<String>);

#[async_trait]
impl MessageHandler for Forward {
    async fn handle(&self, message: InboundMessage) -> Result<(), IngestError> {
        let _ = self
            .0
            .send(String::from_utf8_lossy(&message.payload).into_owned());
        Ok(())
    }
}

fn config(port: u16, max_packet_size: usize) -> MqttSourceConfig {
    MqttSourceConfig {
        host: "127.0.0.1".to_string(),
        port,
        client_id: "bridge-test".to_string(),
        username: None,
        password: None,
        topics: vec!["dt/#".to_string()],
        keep_alive: Duration::from_secs(30),
        max_packet_size,
        tls: None,
    }
}

fn publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x30];
    let mut remaining = 2 + topic.len() + payload.len();
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if remaining == 0 {
            break;
        }
    }
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// 接受一次连接：读取 CONNECT 后回复 CONNACK。
async fn accept(listener: &TcpListener) -> TcpStream {
    let (mut socket, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client connects")
        .expect("accept");
    let mut buf = [0u8; 512];
    socket.read(&mut buf).await.expect("read connect");
    socket
        .write_all(&[0x20, 0x02, 0x00, 0x00])
        .await
        .expect("connack");
    socket
}

async fn next_payload(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("payload arrives")
        .expect("handler alive")
}

#[tokio::test]
async fn payloads_above_the_default_client_limit_are_delivered() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let source = MqttSource::new(config(port, MAX_PACKET_SIZE));
    let client = tokio::spawn(async move { source.run(Arc::new(Forward(tx))).await });

    let mut socket = accept(&listener).await;
    let large = vec![b'x'; 20_000];
    for payload in [b"25".as_slice(), large.as_slice(), b"26".as_slice()] {
        socket.write_all(&publish(TOPIC, payload)).await.expect("publish");
    }
    assert_eq!(next_payload(&mut rx).await, "25");
    assert_eq!(next_payload(&mut rx).await.len(), 20_000);
    assert_eq!(next_payload(&mut rx).await, "26");

    drop(socket);
    drop(listener);
    let err = tokio::time::timeout(Duration::from_secs(5), client)
        .await
        .expect("run ends")
        .expect("join")
        .expect_err("closed connection is fatal");
    assert!(matches!(err, IngestError::Source(_)));
}

#[tokio::test]
async fn undecodable_packets_reconnect_instead_of_stopping() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let source = MqttSource::new(config(port, 1024));
    let client = tokio::spawn(async move { source.run(Arc::new(Forward(tx))).await });

    // 超过上限的报文
    let mut socket = accept(&listener).await;
    socket.write_all(&publish(TOPIC, b"25")).await.expect("publish");
    assert_eq!(next_payload(&mut rx).await, "25");
    socket
        .write_all(&publish(TOPIC, &vec![b'9'; 2048]))
        .await
        .expect("publish");

    // 非法报文类型
    let mut socket_2 = accept(&listener).await;
    drop(socket);
    socket_2.write_all(&publish(TOPIC, b"26")).await.expect("publish");
    assert_eq!(next_payload(&mut rx).await, "26");
    socket_2.write_all(&[0x00, 0x00]).await.expect("garbage");

    let mut socket_3 = accept(&listener).await;
    drop(socket_2);
    socket_3.write_all(&publish(TOPIC, b"27")).await.expect("publish");
    assert_eq!(next_payload(&mut rx).await, "27");

    drop(socket_3);
    drop(listener);
    let err = tokio::time::timeout(Duration::from_secs(5), client)
        .await
        .expect("run ends")
        .expect("join")
        .expect_err("closed connection is fatal");
    assert!(matches!(err, IngestError::Source(_)));
}
