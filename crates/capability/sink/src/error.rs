/// 写入端错误。
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// 与时序库的连接不可用（致命）。
    #[error("sink connection error: {0}")]
    Connection(String),
    /// 单条数据点不满足写入约束。
    #[error("invalid reading: {0}")]
    InvalidReading(String),
    /// 时序库拒绝了提交的数据。
    #[error("sink rejected data: {0}")]
    Rejected(String),
    #[error("sink io error: {0}")]
    Io(String),
}

impl SinkError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::Connection(_))
    }
}
