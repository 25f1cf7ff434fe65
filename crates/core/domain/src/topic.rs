use std::fmt;

/// 有效 topic：原始 topic，可选附带 `:<sub-value>` 子值后缀。
///
/// 子值以独立字段保存，不会与 topic 中本身出现的 `:` 混淆。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EffectiveTopic {
    base: String,
    sub: Option<String>,
}

impl EffectiveTopic {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            sub: None,
        }
    }

    pub fn with_sub(base: impl Into<String>, sub: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            sub: Some(sub.into()),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn sub(&self) -> Option<&str> {
        self.sub.as_deref()
    }

    /// 去掉子值后缀的基础 topic。
    pub fn to_base(&self) -> EffectiveTopic {
        EffectiveTopic::new(self.base.clone())
    }
}

impl fmt::Display for EffectiveTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub {
            Some(sub) => write!(f, "{}:{}", self.base, sub),
            None => f.write_str(&self.base),
        }
    }
}
