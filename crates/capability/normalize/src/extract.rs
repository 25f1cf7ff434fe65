//! 片段 → 数据点：标签推导、值规整、指标命名。

use crate::payload::{Fragment, VALUE_KEY};
use crate::topic::{TopicParts, context_tags, parse_topic};
use crate::value::{
    Normalized, json_number, normalize_value, parse_number, parse_timestamp, truncate,
};
use crate::NormalizeOptions;
use bridge_overrides::{ResolvedOverride, float_text};
use bridge_telemetry::record_info_reading;
use domain::{Number, Reading, Tags};
use serde_json::Value;

pub const TOPIC_TAG: &str = "topic";
pub const PROPERTY_TAG: &str = "property";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const METRIC_PREFIX_TAG: &str = "metric_prefix";
/// `_info` 指标上承载字符串值的标签。
pub const INFO_VALUE_TAG: &str = "val";
pub const INFO_SUFFIX: &str = "_info";

/// 载荷部分：附带标签、时间戳、候选值。
struct PayloadPart<'a> {
    tags: Tags,
    timestamp: Option<Number>,
    /// `None`：映射片段缺少 `value` 键。
    value: Option<&'a Value>,
}

fn split_payload<'a>(body: &'a Value, options: &NormalizeOptions) -> PayloadPart<'a> {
    let Value::Object(object) = body else {
        return PayloadPart {
            tags: Tags::new(),
            timestamp: None,
            value: Some(body),
        };
    };

    let mut part = PayloadPart {
        tags: Tags::new(),
        timestamp: None,
        value: None,
    };
    for (key, value) in object {
        if key == VALUE_KEY {
            part.value = Some(value);
            continue;
        }
        if options.is_excluded(key) {
            continue;
        }
        if key == TIMESTAMP_KEY {
            if matches!(value, Value::String(_) | Value::Number(_)) {
                part.timestamp = parse_timestamp(value);
            }
            continue;
        }
        match value {
            Value::String(text) => {
                part.tags.insert(key.clone(), text.clone());
            }
            Value::Number(number) => {
                let text = match json_number(number) {
                    Number::Int(value) => value.to_string(),
                    Number::Float(value) => float_text(value),
                };
                part.tags.insert(key.clone(), text);
            }
            _ => {}
        }
    }
    part
}

fn underscored(text: &str) -> String {
    text.replace(' ', "_")
}

/// topic 结构与覆盖配置推导出的标签（覆盖优先）。
fn structural_tags(fragment: &Fragment, resolved: &ResolvedOverride) -> Tags {
    let base = fragment.topic.base();
    let parts: Option<TopicParts<'_>> = parse_topic(base);

    let mut tags = Tags::new();
    tags.insert(TOPIC_TAG.to_string(), fragment.topic.to_string());

    let property = match (&resolved.property, parts, fragment.topic.sub()) {
        (Some(property), _, _) => property.clone(),
        (None, Some(parts), Some(sub)) => format!("{}_{}", parts.property, sub),
        (None, Some(parts), None) => parts.property.to_string(),
        (None, None, _) => base.rsplit('/').next().unwrap_or(base).to_string(),
    };
    tags.insert(PROPERTY_TAG.to_string(), underscored(&property));

    let fields = [
        ("app", resolved.app.as_deref(), parts.map(|parts| parts.app)),
        ("thing", resolved.thing.as_deref(), parts.map(|parts| parts.thing)),
        (
            "context",
            resolved.context.as_deref(),
            parts.map(|parts| parts.context),
        ),
    ];
    for (key, overridden, captured) in fields {
        if let Some(value) = overridden.or(captured) {
            tags.insert(key.to_string(), underscored(value));
        }
    }
    if let Some(context) = tags.get("context").cloned() {
        tags.extend(context_tags(&context));
    }

    tags.extend(
        resolved
            .extra_tags
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
    if let Some(prefix) = &resolved.metric_prefix {
        tags.insert(METRIC_PREFIX_TAG.to_string(), prefix.clone());
    }
    tags
}

/// 单个片段生成一个数据点。
pub fn extract_reading(
    fragment: &Fragment,
    resolved: &ResolvedOverride,
    options: &NormalizeOptions,
    received_at_secs: i64,
) -> Reading {
    let payload = split_payload(&fragment.body, options);

    let mut tags = payload.tags;
    tags.extend(structural_tags(fragment, resolved));

    // 覆盖配置中的 timestamp 标签优先于载荷
    let timestamp = tags
        .remove(TIMESTAMP_KEY)
        .and_then(|text| parse_number(&text))
        .or(payload.timestamp)
        .unwrap_or(Number::Int(received_at_secs));
    let prefix = tags
        .remove(METRIC_PREFIX_TAG)
        .unwrap_or_else(|| options.metric_prefix.clone());

    let normalized = match payload.value {
        Some(value) => normalize_value(value, &resolved.value_replacement, options.max_str_len),
        None => Normalized::Text(truncate(&fragment.body.to_string(), options.max_str_len)),
    };

    let property = tags.get(PROPERTY_TAG).cloned().unwrap_or_default();
    match normalized {
        Normalized::Number(value) => Reading {
            metric: format!("{}{}", prefix, property),
            value,
            tags,
            timestamp,
        },
        Normalized::Text(text) => {
            record_info_reading();
            tags.insert(INFO_VALUE_TAG.to_string(), text);
            Reading {
                metric: format!("{}{}{}", prefix, property, INFO_SUFFIX),
                value: Number::Int(1),
                tags,
                timestamp,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::EffectiveTopic;
    use serde_json::json;

    fn fragment(topic: EffectiveTopic, body: Value) -> Fragment {
        Fragment { topic, body }
    }

    #[test]
    fn payload_tags_skip_excluded_and_non_scalar_keys() {
        let options = NormalizeOptions::default().with_tags_exclude(["Secret"]);
        let body = json!({"value": 1, "secret": "x", "nested": {"a": 1}, "flag": true, "n": 2.5, "s": "a", "tiny": 0.00001});
        let part = split_payload(&body, &options);
        assert_eq!(part.value, Some(&json!(1)));
        assert_eq!(
            part.tags.into_iter().collect::<Vec<_>>(),
            vec![
                ("n".to_string(), "2.5".to_string()),
                ("s".to_string(), "a".to_string()),
                ("tiny".to_string(), "1e-05".to_string()),
            ]
        );
    }

    #[test]
    fn degraded_topic_uses_last_segment() {
        let tags = structural_tags(
            &fragment(EffectiveTopic::with_sub("plain/some value", "x"), json!(1)),
            &ResolvedOverride::default(),
        );
        assert_eq!(tags.get(PROPERTY_TAG).map(String::as_str), Some("some_value"));
        assert_eq!(tags.get(TOPIC_TAG).map(String::as_str), Some("plain/some value:x"));
        assert!(!tags.contains_key("app"));
        assert!(!tags.contains_key("context_0"));
    }

    #[test]
    fn override_context_without_structure_yields_context_tags() {
        let resolved = ResolvedOverride {
            context: Some("hall/north".to_string()),
            ..ResolvedOverride::default()
        };
        let tags = structural_tags(&fragment(EffectiveTopic::new("x"), json!(1)), &resolved);
        assert_eq!(tags.get("context_0").map(String::as_str), Some("hall"));
        assert_eq!(tags.get("context_1").map(String::as_str), Some("north"));
    }

    #[test]
    fn extra_tag_timestamp_wins() {
        let resolved = ResolvedOverride {
            extra_tags: [(TIMESTAMP_KEY.to_string(), "42".to_string())].into(),
            ..ResolvedOverride::default()
        };
        let reading = extract_reading(
            &fragment(
                EffectiveTopic::new("dt/a/b/c/d"),
                json!({"value": 1, "timestamp": 7}),
            ),
            &resolved,
            &NormalizeOptions::default(),
            100,
        );
        assert_eq!(reading.timestamp, Number::Int(42));
        assert!(!reading.tags.contains_key(TIMESTAMP_KEY));
    }

    #[test]
    fn unparseable_timestamp_defaults_to_arrival() {
        let reading = extract_reading(
            &fragment(
                EffectiveTopic::new("dt/a/b/c/d"),
                json!({"value": 1, "timestamp": "later"}),
            ),
            &ResolvedOverride::default(),
            &NormalizeOptions::default(),
            100,
        );
        assert_eq!(reading.timestamp, Number::Int(100));
    }
}
