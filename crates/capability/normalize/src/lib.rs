//! MQTT 消息 → 时序数据点。
//!
//! 载荷拆分为片段，每个片段按有效 topic 解析覆盖配置，再推导标签与数值。

pub mod extract;
pub mod payload;
pub mod topic;
pub mod value;

pub use extract::{INFO_SUFFIX, INFO_VALUE_TAG, extract_reading};
pub use payload::{Fragment, PayloadShape, clean_text, decode_utf8};
pub use topic::{TopicParts, context_tags, parse_topic};
pub use value::{Normalized, SENTINEL, normalize_value, parse_number, parse_timestamp};

use bridge_overrides::{CacheMode, OverrideResolver};
use bridge_telemetry::record_fragment_decoded;
use domain::{EffectiveTopic, InboundMessage, Reading};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

pub const DEFAULT_METRIC_PREFIX: &str = "mqtt__";
pub const DEFAULT_MAX_STR_LEN: usize = 128;

/// 规范化参数。
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub metric_prefix: String,
    pub max_str_len: usize,
    /// 小写存放，比较时键名同样转小写。
    pub tags_exclude: HashSet<String>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            metric_prefix: DEFAULT_METRIC_PREFIX.to_string(),
            max_str_len: DEFAULT_MAX_STR_LEN,
            tags_exclude: HashSet::from([extract::METRIC_PREFIX_TAG.to_string()]),
        }
    }
}

impl NormalizeOptions {
    pub fn with_metric_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metric_prefix = prefix.into();
        self
    }

    pub fn with_max_str_len(mut self, max_str_len: usize) -> Self {
        self.max_str_len = max_str_len;
        self
    }

    /// 替换排除集合。
    pub fn with_tags_exclude<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags_exclude = keys
            .into_iter()
            .map(|key| key.as_ref().trim().to_lowercase())
            .filter(|key| !key.is_empty())
            .collect();
        self
    }

    pub fn is_excluded(&self, key: &str) -> bool {
        self.tags_exclude.contains(&key.to_lowercase())
    }
}

/// 消息规范化器（同步、无 I/O）。
pub struct Normalizer {
    resolver: Arc<OverrideResolver>,
    options: NormalizeOptions,
}

impl Normalizer {
    pub fn new(resolver: Arc<OverrideResolver>, options: NormalizeOptions) -> Self {
        Self { resolver, options }
    }

    pub fn options(&self) -> &NormalizeOptions {
        &self.options
    }

    pub fn resolver(&self) -> &Arc<OverrideResolver> {
        &self.resolver
    }

    pub fn normalize(&self, message: &InboundMessage) -> Vec<Reading> {
        self.normalize_with(message, CacheMode::Use)
    }

    /// 按片段顺序输出数据点。
    pub fn normalize_with(&self, message: &InboundMessage, mode: CacheMode) -> Vec<Reading> {
        let topic = clean_text(&message.topic);
        let base = self.resolver.resolve_with(&EffectiveTopic::new(topic), mode);
        let shape = PayloadShape::classify(&message.payload, base.is_json_multi_value());
        let received_at = message.received_at_secs();

        shape
            .into_fragments(topic)
            .map(|fragment| {
                record_fragment_decoded();
                let resolved = if fragment.topic.sub().is_some() {
                    self.resolver.resolve_with(&fragment.topic, mode)
                } else {
                    base.clone()
                };
                let reading = extract_reading(&fragment, &resolved, &self.options, received_at);
                trace!(
                    topic = %fragment.topic,
                    value = %reading.value,
                    "reading extracted: {}",
                    reading.metric
                );
                reading
            })
            .collect()
    }
}
