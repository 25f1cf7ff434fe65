use std::collections::BTreeMap;
use std::fmt;

/// 数据点标签集合（按键排序，输出稳定）。
pub type Tags = BTreeMap<String, String>;

/// 传输层投递的原始消息。
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at_ms: i64,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, received_at_ms: i64) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at_ms,
        }
    }

    /// 到达时间（整秒），作为缺省时间戳。
    pub fn received_at_secs(&self) -> i64 {
        self.received_at_ms.div_euclid(1000)
    }
}

/// 数值：整型优先，浮点兜底。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(v) => *v as f64,
            Number::Float(v) => *v,
        }
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number::Float(value)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(v) => write!(f, "{}", v),
            Number::Float(v) => write!(f, "{}", v),
        }
    }
}

/// 规范化后的单个数据点。
///
/// `tags` 始终包含 `topic` 与 `property`；时间戳单独存放，不进入标签集合。
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub metric: String,
    pub value: Number,
    pub tags: Tags,
    pub timestamp: Number,
}
