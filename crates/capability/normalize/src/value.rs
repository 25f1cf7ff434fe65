//! 值规整：替换表查找、数值解析、字符串截断。

use bridge_overrides::{ReplacementKey, Scalar, float_text};
use bridge_telemetry::record_coercion_failure;
use domain::Number;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{error, warn};

/// 数值解析失败时的哨兵值。
pub const SENTINEL: Number = Number::Int(-1);

/// 规整结果：数值直接写入，字符串走 `_info` 指标。
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Number(Number),
    Text(String),
}

/// 按字符数截断。
pub fn truncate(text: &str, max_len: usize) -> String {
    text.chars().take(max_len).collect()
}

/// 文本解析为数值：整型优先，浮点兜底。
pub fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if let Ok(value) = text.parse::<i64>() {
        return Some(Number::Int(value));
    }
    text.parse::<f64>().ok().map(Number::Float)
}

pub fn json_number(number: &serde_json::Number) -> Number {
    match number.as_i64() {
        Some(value) => Number::Int(value),
        None => Number::Float(number.as_f64().unwrap_or(f64::NAN)),
    }
}

/// 载荷中的 `timestamp` 字段；无法解析时返回 `None`（回落到到达时间）。
pub fn parse_timestamp(value: &Value) -> Option<Number> {
    let parsed = match value {
        Value::Number(number) => Some(json_number(number)),
        Value::String(text) => parse_number(text),
        _ => None,
    };
    if parsed.is_none() {
        warn!("timestamp not parseable, using arrival time: {}", value);
    }
    parsed
}

/// 规整单个值。
///
/// 先查替换表（原值、字符串形式、整型/浮点对应形式）；命中后不再二次查表。
/// 未命中时：数值原样通过，字符串尝试整型再浮点解析（解析成功后以数值形式再查一次表），
/// 都失败则保留截断后的字符串；其他类型返回哨兵值 `-1`。
pub fn normalize_value(
    value: &Value,
    replacements: &HashMap<ReplacementKey, Scalar>,
    max_len: usize,
) -> Normalized {
    match value {
        Value::Number(number) => {
            let number = json_number(number);
            lookup(replacements, &number_candidates(number))
                .map(|hit| apply_replacement(hit, max_len))
                .unwrap_or(Normalized::Number(number))
        }
        Value::Bool(flag) => {
            let candidates = [
                ReplacementKey::Bool(*flag),
                ReplacementKey::Int(i64::from(*flag)),
                ReplacementKey::text(if *flag { "True" } else { "False" }),
            ];
            lookup(replacements, &candidates)
                .map(|hit| apply_replacement(hit, max_len))
                .unwrap_or(Normalized::Number(Number::Int(i64::from(*flag))))
        }
        Value::String(text) => {
            let truncated = truncate(text, max_len);
            if let Some(hit) = lookup(replacements, &[ReplacementKey::Text(truncated.clone())]) {
                return apply_replacement(hit, max_len);
            }
            match parse_number(text) {
                Some(number) => lookup(replacements, &number_candidates(number))
                    .map(|hit| apply_replacement(hit, max_len))
                    .unwrap_or(Normalized::Number(number)),
                None => Normalized::Text(truncated),
            }
        }
        other => {
            record_coercion_failure();
            error!("value cannot be converted to a number: {}", other);
            Normalized::Number(SENTINEL)
        }
    }
}

fn number_candidates(number: Number) -> Vec<ReplacementKey> {
    match number {
        Number::Int(value) => vec![
            ReplacementKey::Int(value),
            ReplacementKey::text(value.to_string()),
            ReplacementKey::float(value as f64),
            ReplacementKey::text(float_text(value as f64)),
        ],
        Number::Float(value) => {
            let mut candidates = vec![
                ReplacementKey::float(value),
                ReplacementKey::text(float_text(value)),
            ];
            if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
                let integral = value as i64;
                candidates.push(ReplacementKey::Int(integral));
                candidates.push(ReplacementKey::text(integral.to_string()));
            }
            candidates
        }
    }
}

fn lookup<'a>(
    replacements: &'a HashMap<ReplacementKey, Scalar>,
    candidates: &[ReplacementKey],
) -> Option<&'a Scalar> {
    if replacements.is_empty() {
        return None;
    }
    candidates.iter().find_map(|candidate| replacements.get(candidate))
}

fn apply_replacement(replacement: &Scalar, max_len: usize) -> Normalized {
    match replacement {
        Scalar::Int(value) => Normalized::Number(Number::Int(*value)),
        Scalar::Float(value) => Normalized::Number(Number::Float(*value)),
        Scalar::Bool(flag) => Normalized::Number(Number::Int(i64::from(*flag))),
        Scalar::Text(text) => match parse_number(text) {
            Some(number) => Normalized::Number(number),
            None => Normalized::Text(truncate(text, max_len)),
        },
    }
}
