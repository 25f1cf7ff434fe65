use crate::{MetricSink, SinkError, TagDecorator, timestamp_field};
use async_trait::async_trait;
use domain::{Number, Reading, Tags};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// `put <metric> <timestamp> <value> <k=v> ...`
pub fn put_line(metric: &str, timestamp: Number, value: Number, tags: &Tags) -> String {
    let mut line = format!("put {} {} {}", metric, timestamp_field(timestamp), value);
    for (key, value) in tags {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(value);
    }
    line.push('\n');
    line
}

/// OpenTSDB telnet 行协议写入端。
///
/// 每次提交在独立任务中写完整批数据，调用方超时放弃等待时写入仍会完成，
/// 下一批在其后写入，行边界不会被截断。写入失败后连接标记为不可用。
pub struct TelnetSink {
    address: String,
    decorator: TagDecorator,
    pending: Mutex<Vec<String>>,
    stream: Arc<tokio::sync::Mutex<TcpStream>>,
    broken: Arc<AtomicBool>,
}

impl TelnetSink {
    pub async fn connect(
        host: &str,
        port: u16,
        decorator: TagDecorator,
    ) -> Result<Self, SinkError> {
        let address = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|err| SinkError::Connection(format!("{}: {}", address, err)))?;
        let _ = stream.set_nodelay(true);
        info!("connected to opentsdb at {}", address);
        Ok(Self {
            address,
            decorator,
            pending: Mutex::new(Vec::new()),
            stream: Arc::new(tokio::sync::Mutex::new(stream)),
            broken: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    fn connection_error(&self, reason: impl std::fmt::Display) -> SinkError {
        SinkError::Connection(format!("{}: {}", self.address, reason))
    }
}

#[async_trait]
impl MetricSink for TelnetSink {
    async fn send(&self, reading: &Reading) -> Result<(), SinkError> {
        let (metric, tags) = self.decorator.decorate(reading)?;
        let line = put_line(&metric, reading.timestamp, reading.value, &tags);
        self.pending.lock().push(line);
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        if self.broken.load(Ordering::Acquire) {
            return Err(self.connection_error("previous write failed"));
        }
        let lines = std::mem::take(&mut *self.pending.lock());
        if lines.is_empty() {
            return Ok(());
        }
        let count = lines.len();
        let body = lines.concat();
        let stream = Arc::clone(&self.stream);
        let broken = Arc::clone(&self.broken);
        let write = tokio::spawn(async move {
            let mut stream = stream.lock_owned().await;
            if broken.load(Ordering::Acquire) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "previous write failed",
                ));
            }
            let result = async {
                stream.write_all(body.as_bytes()).await?;
                stream.flush().await
            }
            .await;
            if result.is_err() {
                broken.store(true, Ordering::Release);
            }
            result
        });
        match write.await {
            Ok(Ok(())) => {
                debug!(lines = count, "telnet batch flushed");
                Ok(())
            }
            Ok(Err(err)) => Err(self.connection_error(err)),
            Err(err) => Err(self.connection_error(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_line_lists_tags_in_key_order() {
        let tags: Tags = [
            ("topic".to_string(), "dt/a/b/c/d".to_string()),
            ("app".to_string(), "a".to_string()),
        ]
        .into();
        assert_eq!(
            put_line("mqtt__d", Number::Int(1700000000), Number::Float(25.5), &tags),
            "put mqtt__d 1700000000 25.5 app=a topic=dt/a/b/c/d\n"
        );
    }

    #[test]
    fn fractional_timestamps_become_milliseconds() {
        assert_eq!(
            put_line("m", Number::Float(1.5), Number::Int(1), &Tags::new()),
            "put m 1500 1\n"
        );
    }
}
