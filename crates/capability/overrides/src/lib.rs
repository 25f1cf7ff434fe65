//! topic 覆盖配置：模式表加载、特异度排序与级联合并。

mod matcher;
mod resolver;
mod spec;

pub use matcher::{rank_matches, specificity, topic_matches_filter};
pub use resolver::{CacheMode, OverrideResolver, ResolvedOverride};
pub use spec::{OverrideSpec, OverrideTable, Patch, ReplacementKey, Scalar, float_text};

/// 覆盖配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
}
