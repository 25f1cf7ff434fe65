//! 载荷拆分：一条消息 → 有序的 (有效 topic, 片段) 序列。

use bridge_telemetry::record_payload_fallback;
use domain::EffectiveTopic;
use serde_json::{Map, Value};
use tracing::debug;

pub const VALUES_KEY: &str = "values";
pub const VALUE_KEY: &str = "value";

/// 去掉首尾空白与 NUL 填充。
pub fn clean_text(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || c == '\0')
}

/// UTF-8 解码，丢弃无效字节。
pub fn decode_utf8(payload: &[u8]) -> String {
    payload.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// 单个片段：有效 topic 与其载荷。
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub topic: EffectiveTopic,
    pub body: Value,
}

impl Fragment {
    fn new(topic: EffectiveTopic, body: Value) -> Self {
        Self { topic, body }
    }
}

/// 载荷形态，每条消息判定一次。
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadShape {
    /// 非 JSON（或 JSON 解析失败）的整段文本。
    Opaque(String),
    /// 普通对象，整体作为一个片段。
    Object(Map<String, Value>),
    /// `values` 为对象：每个键一个子值片段，其余顶层键为共享默认值。
    ValuesMap {
        shared: Map<String, Value>,
        values: Map<String, Value>,
    },
    /// `values` 为数组：每个元素一个片段，topic 不变。
    ValuesList {
        shared: Map<String, Value>,
        values: Vec<Value>,
    },
    /// json_multi_value 模式下的对象：每个顶层键一个子值片段。
    MultiValueObject(Map<String, Value>),
    /// 顶层数组：每个元素一个片段。
    Array(Vec<Value>),
    /// json_multi_value 模式下的顶层数组：对象元素的每个键一个子值片段。
    MultiValueArray(Vec<Value>),
}

impl PayloadShape {
    pub fn classify(payload: &[u8], multi_value: bool) -> Self {
        let decoded = decode_utf8(payload);
        let text = clean_text(&decoded);
        let looks_like_json = (text.starts_with('{') && text.ends_with('}'))
            || (text.starts_with('[') && text.ends_with(']'));
        if !looks_like_json {
            return PayloadShape::Opaque(text.to_string());
        }

        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => classify_object(object, multi_value),
            Ok(Value::Array(items)) if multi_value => PayloadShape::MultiValueArray(items),
            Ok(Value::Array(items)) => PayloadShape::Array(items),
            Ok(_) => PayloadShape::Opaque(text.to_string()),
            Err(err) => {
                record_payload_fallback();
                debug!(payload = %text, "payload is not json, kept as text: {}", err);
                PayloadShape::Opaque(text.to_string())
            }
        }
    }

    /// 展开为片段序列（单次遍历）。
    pub fn into_fragments(self, topic: &str) -> std::vec::IntoIter<Fragment> {
        let base = || EffectiveTopic::new(topic);
        let sub = |key: &str| EffectiveTopic::with_sub(topic, key);

        let fragments: Vec<Fragment> = match self {
            PayloadShape::Opaque(text) => vec![Fragment::new(base(), Value::String(text))],
            PayloadShape::Object(object) => vec![Fragment::new(base(), Value::Object(object))],
            PayloadShape::ValuesMap { shared, values } => values
                .into_iter()
                .map(|(key, value)| Fragment::new(sub(&key), merge_shared(&shared, value)))
                .collect(),
            PayloadShape::ValuesList { shared, values } => values
                .into_iter()
                .map(|value| Fragment::new(base(), merge_shared(&shared, value)))
                .collect(),
            PayloadShape::MultiValueObject(object) => {
                let mut fragments = Vec::with_capacity(object.len());
                for (key, value) in object {
                    match value {
                        Value::Array(items) => fragments
                            .extend(items.into_iter().map(|item| Fragment::new(sub(&key), item))),
                        value => fragments.push(Fragment::new(sub(&key), value)),
                    }
                }
                fragments
            }
            PayloadShape::Array(items) => items
                .into_iter()
                .map(|item| Fragment::new(base(), item))
                .collect(),
            PayloadShape::MultiValueArray(items) => {
                let mut fragments = Vec::new();
                for item in items {
                    match item {
                        Value::Object(object) => fragments.extend(
                            object
                                .into_iter()
                                .map(|(key, value)| Fragment::new(sub(&key), value)),
                        ),
                        item => fragments.push(Fragment::new(base(), item)),
                    }
                }
                fragments
            }
        };
        fragments.into_iter()
    }
}

fn classify_object(object: Map<String, Value>, multi_value: bool) -> PayloadShape {
    let has_container = matches!(
        object.get(VALUES_KEY),
        Some(Value::Object(_)) | Some(Value::Array(_))
    );
    if !has_container {
        return if multi_value {
            PayloadShape::MultiValueObject(object)
        } else {
            PayloadShape::Object(object)
        };
    }

    let mut shared = Map::new();
    let mut container = Value::Null;
    for (key, value) in object {
        if key == VALUES_KEY {
            container = value;
        } else {
            shared.insert(key, value);
        }
    }
    match container {
        Value::Object(values) => PayloadShape::ValuesMap { shared, values },
        Value::Array(values) => PayloadShape::ValuesList { shared, values },
        _ => PayloadShape::Object(shared),
    }
}

/// 条目覆盖共享键；标量条目视为 `{"value": v}`。
fn merge_shared(shared: &Map<String, Value>, entry: Value) -> Value {
    let mut merged = shared.clone();
    match entry {
        Value::Object(entry) => {
            for (key, value) in entry {
                merged.insert(key, value);
            }
        }
        value => {
            merged.insert(VALUE_KEY.to_string(), value);
        }
    }
    Value::Object(merged)
}
