use crate::matcher::rank_matches;
use crate::spec::{OverrideSpec, OverrideTable, Patch, ReplacementKey, Scalar};
use domain::EffectiveTopic;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// 单个有效 topic 的最终合并结果（不可变）。空子表等价于未设置。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedOverride {
    pub app: Option<String>,
    pub context: Option<String>,
    pub thing: Option<String>,
    pub property: Option<String>,
    pub metric_prefix: Option<String>,
    pub json_multi_value: Option<bool>,
    pub extra_tags: BTreeMap<String, String>,
    pub value_replacement: HashMap<ReplacementKey, Scalar>,
}

impl ResolvedOverride {
    pub fn is_json_multi_value(&self) -> bool {
        self.json_multi_value == Some(true)
    }

    /// 折叠一步：标量覆盖，子表按键合并；null 清空对应状态。
    fn apply(&mut self, spec: &OverrideSpec) {
        apply_text(&mut self.app, &spec.app);
        apply_text(&mut self.context, &spec.context);
        apply_text(&mut self.thing, &spec.thing);
        apply_text(&mut self.property, &spec.property);
        apply_text(&mut self.metric_prefix, &spec.metric_prefix);
        match &spec.json_multi_value {
            Patch::Keep => {}
            Patch::Reset => self.json_multi_value = None,
            Patch::Set(flag) => self.json_multi_value = Some(*flag),
        }

        match &spec.extra_tags {
            Patch::Keep => {}
            Patch::Reset => self.extra_tags.clear(),
            Patch::Set(tags) => {
                for (key, value) in tags {
                    match value {
                        Some(value) => {
                            self.extra_tags.insert(key.clone(), value.to_string());
                        }
                        None => {
                            self.extra_tags.remove(key);
                        }
                    }
                }
            }
        }

        match &spec.value_replacement {
            Patch::Keep => {}
            Patch::Reset => self.value_replacement.clear(),
            Patch::Set(replacements) => {
                for (key, value) in replacements {
                    match value {
                        Some(value) => {
                            self.value_replacement.insert(key.clone(), value.clone());
                        }
                        None => {
                            self.value_replacement.remove(key);
                        }
                    }
                }
            }
        }
    }
}

fn apply_text(slot: &mut Option<String>, patch: &Patch<Scalar>) {
    match patch {
        Patch::Keep => {}
        Patch::Reset => *slot = None,
        Patch::Set(value) => *slot = Some(value.to_string()),
    }
}

/// 缓存策略（逐次调用传入）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Use,
    Bypass,
}

/// 覆盖配置解析器：持有只读模式表与有界 LRU 缓存。
///
/// 模式表在进程生命周期内不变，缓存条目不单独失效。
pub struct OverrideResolver {
    table: OverrideTable,
    cache: Mutex<LruCache<EffectiveTopic, Arc<ResolvedOverride>>>,
}

impl OverrideResolver {
    pub const DEFAULT_CACHE_SIZE: usize = 10_240;

    pub fn new(table: OverrideTable) -> Self {
        Self::with_capacity(table, Self::DEFAULT_CACHE_SIZE)
    }

    pub fn with_capacity(table: OverrideTable, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            table,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn table(&self) -> &OverrideTable {
        &self.table
    }

    pub fn resolve(&self, topic: &EffectiveTopic) -> Arc<ResolvedOverride> {
        self.resolve_with(topic, CacheMode::Use)
    }

    pub fn resolve_with(&self, topic: &EffectiveTopic, mode: CacheMode) -> Arc<ResolvedOverride> {
        if mode == CacheMode::Bypass {
            return Arc::new(self.compute(topic, mode));
        }
        if let Some(hit) = self.cache.lock().get(topic) {
            return hit.clone();
        }
        let resolved = Arc::new(self.compute(topic, mode));
        self.cache.lock().put(topic.clone(), resolved.clone());
        resolved
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    fn compute(&self, topic: &EffectiveTopic, mode: CacheMode) -> ResolvedOverride {
        let Some(sub) = topic.sub() else {
            return self.fold_base(topic.base());
        };

        // 子值：先取基础 topic 的结果，再按 `topic:sub` 精确键折叠一步
        let mut resolved = (*self.resolve_with(&topic.to_base(), mode)).clone();
        let exact_key = format!("{}:{}", topic.base(), sub);
        match self.table.get_exact(&exact_key) {
            None => {}
            Some(None) => return ResolvedOverride::default(),
            Some(Some(spec)) => resolved.apply(spec),
        }
        resolved
    }

    fn fold_base(&self, topic: &str) -> ResolvedOverride {
        let ranked = rank_matches(topic, &self.table);
        debug!(
            topic = %topic,
            patterns = ?ranked.iter().map(|(pattern, _)| *pattern).collect::<Vec<_>>(),
            "override patterns ranked"
        );

        let mut resolved = ResolvedOverride::default();
        for (_, spec) in ranked {
            match spec {
                None => resolved = ResolvedOverride::default(),
                Some(spec) => resolved.apply(spec),
            }
        }
        resolved
    }
}
