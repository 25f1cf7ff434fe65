use crate::OverrideError;
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

/// 配置中的标量值。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => f.write_str(&float_text(*v)),
            Scalar::Text(v) => f.write_str(v),
        }
    }
}

/// 浮点数的文本形式：最短往返表示，整数值保留一位小数（`25.0`）；
/// 十进制指数小于 -4 或不小于 16 时用科学计数法（`1e-05`、`1.5e+20`）。
pub fn float_text(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let scientific = format!("{:e}", value);
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if value != 0.0 && !(-4..16).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", mantissa, sign, exponent.abs());
    }
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

/// 值替换表的键。
///
/// 浮点键按位保存以支持哈希；`-0.0` 归一为 `0.0`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "Scalar")]
pub enum ReplacementKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
}

impl ReplacementKey {
    pub fn float(value: f64) -> Self {
        let value = if value == 0.0 { 0.0 } else { value };
        ReplacementKey::Float(value.to_bits())
    }

    pub fn text(value: impl Into<String>) -> Self {
        ReplacementKey::Text(value.into())
    }
}

impl From<Scalar> for ReplacementKey {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Bool(v) => ReplacementKey::Bool(v),
            Scalar::Int(v) => ReplacementKey::Int(v),
            Scalar::Float(v) => ReplacementKey::float(v),
            Scalar::Text(v) => ReplacementKey::Text(v),
        }
    }
}

/// 单个字段的级联操作：缺省继承、显式 null 清空、或覆盖赋值。
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Keep,
    Reset,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

impl<'de, T> Deserialize<'de> for Patch<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Patch::Set(value),
            None => Patch::Reset,
        })
    }
}

/// 单条覆盖配置。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct OverrideSpec {
    pub app: Patch<Scalar>,
    pub context: Patch<Scalar>,
    pub thing: Patch<Scalar>,
    pub property: Patch<Scalar>,
    pub metric_prefix: Patch<Scalar>,
    pub json_multi_value: Patch<bool>,
    pub extra_tags: Patch<BTreeMap<String, Option<Scalar>>>,
    pub value_replacement: Patch<HashMap<ReplacementKey, Option<Scalar>>>,
}

/// 覆盖模式表：模式字符串 → 覆盖配置（`None` 表示在此处重置）。
///
/// 保留声明顺序；重复的键原位替换。
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: Vec<(String, Option<OverrideSpec>)>,
    index: HashMap<String, usize>,
}

impl OverrideTable {
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<OverrideSpec>)>,
        K: Into<String>,
    {
        let mut table = Self::default();
        for (pattern, spec) in entries {
            table.insert(pattern.into(), spec);
        }
        table
    }

    /// 从 YAML 文本解析；空文档为空表。
    pub fn from_yaml_str(text: &str) -> Result<Self, OverrideError> {
        let document: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|err| OverrideError::Parse(err.to_string()))?;
        let mapping = match document {
            serde_yaml::Value::Null => return Ok(Self::default()),
            serde_yaml::Value::Mapping(mapping) => mapping,
            other => {
                return Err(OverrideError::Parse(format!(
                    "expected a mapping at top level, found {}",
                    yaml_kind(&other)
                )));
            }
        };

        let mut table = Self::default();
        for (key, value) in mapping {
            let pattern = match key {
                serde_yaml::Value::String(pattern) => pattern,
                serde_yaml::Value::Number(number) => number.to_string(),
                serde_yaml::Value::Bool(flag) => flag.to_string(),
                other => {
                    return Err(OverrideError::Parse(format!(
                        "pattern key must be a scalar, found {}",
                        yaml_kind(&other)
                    )));
                }
            };
            let spec = match value {
                serde_yaml::Value::Null => None,
                value => Some(serde_yaml::from_value::<OverrideSpec>(value).map_err(|err| {
                    OverrideError::Parse(format!("pattern {}: {}", pattern, err))
                })?),
            };
            table.insert(pattern, spec);
        }
        Ok(table)
    }

    pub fn from_file(path: &Path) -> Result<Self, OverrideError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按声明顺序遍历。
    pub fn entries(&self) -> impl Iterator<Item = (&str, Option<&OverrideSpec>)> {
        self.entries
            .iter()
            .map(|(pattern, spec)| (pattern.as_str(), spec.as_ref()))
    }

    /// 精确查找（不做通配匹配）。外层 `None` 表示无此键。
    pub fn get_exact(&self, pattern: &str) -> Option<Option<&OverrideSpec>> {
        self.index
            .get(pattern)
            .map(|position| self.entries[*position].1.as_ref())
    }

    fn insert(&mut self, pattern: String, spec: Option<OverrideSpec>) {
        match self.index.get(&pattern) {
            Some(position) => self.entries[*position].1 = spec,
            None => {
                self.index.insert(pattern.clone(), self.entries.len());
                self.entries.push((pattern, spec));
            }
        }
    }
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "bool",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reset_and_absent_fields() {
        let table = OverrideTable::from_yaml_str(
            r#"
"dt/#":
  app: building
  thing: null
  extra_tags:
    floor: 1
    room: null
"dt/a/b": null
"#,
        )
        .expect("parse");

        assert_eq!(table.len(), 2);
        let spec = table.get_exact("dt/#").expect("entry").expect("spec");
        assert_eq!(spec.app, Patch::Set(Scalar::Text("building".to_string())));
        assert_eq!(spec.thing, Patch::Reset);
        assert_eq!(spec.context, Patch::Keep);
        let Patch::Set(extra_tags) = &spec.extra_tags else {
            panic!("extra_tags should be set");
        };
        assert_eq!(extra_tags.get("floor"), Some(&Some(Scalar::Int(1))));
        assert_eq!(extra_tags.get("room"), Some(&None));
        assert!(table.get_exact("dt/a/b").expect("entry").is_none());
        assert!(table.get_exact("dt/a/c").is_none());
    }

    #[test]
    fn parses_typed_replacement_keys() {
        let table = OverrideTable::from_yaml_str(
            r#"
"t":
  value_replacement:
    "on": 1
    2: "two"
    2.5: 3
    true: "yes"
"#,
        )
        .expect("parse");
        let spec = table.get_exact("t").expect("entry").expect("spec");
        let Patch::Set(replacements) = &spec.value_replacement else {
            panic!("value_replacement should be set");
        };
        assert_eq!(
            replacements.get(&ReplacementKey::text("on")),
            Some(&Some(Scalar::Int(1)))
        );
        assert_eq!(
            replacements.get(&ReplacementKey::Int(2)),
            Some(&Some(Scalar::Text("two".to_string())))
        );
        assert_eq!(
            replacements.get(&ReplacementKey::float(2.5)),
            Some(&Some(Scalar::Int(3)))
        );
        assert!(replacements.contains_key(&ReplacementKey::Bool(true)));
    }

    #[test]
    fn keeps_declaration_order() {
        let table = OverrideTable::from_yaml_str("b: {}\na: {}\nc: null\n").expect("parse");
        let patterns: Vec<_> = table.entries().map(|(pattern, _)| pattern).collect();
        assert_eq!(patterns, vec!["b", "a", "c"]);
    }

    #[test]
    fn empty_document_is_empty_table() {
        assert!(OverrideTable::from_yaml_str("").expect("parse").is_empty());
    }

    #[test]
    fn rejects_non_mapping_document() {
        let err = OverrideTable::from_yaml_str("- a\n- b\n").expect_err("sequence");
        assert!(err.to_string().contains("sequence"));
    }

    #[test]
    fn float_text_matches_json_numbers() {
        assert_eq!(float_text(25.0), "25.0");
        assert_eq!(float_text(25.5), "25.5");
        assert_eq!(Scalar::Float(1.0).to_string(), "1.0");
    }

    #[test]
    fn float_text_uses_exponent_outside_plain_range() {
        assert_eq!(float_text(0.0001), "0.0001");
        assert_eq!(float_text(0.00001), "1e-05");
        assert_eq!(float_text(-2.5e-7), "-2.5e-07");
        assert_eq!(float_text(9_999_999_999_999_998.0), "9999999999999998.0");
        assert_eq!(float_text(1e16), "1e+16");
        assert_eq!(float_text(1.5e300), "1.5e+300");
        assert_eq!(float_text(0.0), "0.0");
        assert_eq!(float_text(f64::NAN), "nan");
        assert_eq!(float_text(f64::NEG_INFINITY), "-inf");
    }
}
