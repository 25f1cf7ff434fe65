use crate::spec::{OverrideSpec, OverrideTable};

/// MQTT 订阅过滤器匹配：`+` 匹配恰好一层，`#` 仅在末尾出现并匹配剩余所有层（含零层）。
pub fn topic_matches_filter(filter: &str, topic: &str) -> bool {
    if filter.is_empty() || topic.is_empty() {
        return false;
    }
    // `$` 开头的系统 topic 不参与首层通配
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/').peekable();
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.peek().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// 模式特异度：按字符位置加权求和，字面字符权重 1.0，`+` 为 0.6，`#` 为 0.5。
///
/// 这是启发式排序，不是逐层语义比较。
pub fn specificity(pattern: &str) -> f64 {
    pattern
        .chars()
        .enumerate()
        .map(|(index, c)| {
            let weight = match c {
                '+' => 0.6,
                '#' => 0.5,
                _ => 1.0,
            };
            weight * (index + 1) as f64
        })
        .sum()
}

/// 返回与 topic 匹配的模式，按特异度从低到高排序；得分相同时保持声明顺序。
pub fn rank_matches<'a>(
    topic: &str,
    table: &'a OverrideTable,
) -> Vec<(&'a str, Option<&'a OverrideSpec>)> {
    let mut matches: Vec<(f64, &str, Option<&OverrideSpec>)> = table
        .entries()
        .filter(|(pattern, _)| topic_matches_filter(pattern, topic))
        .map(|(pattern, spec)| (specificity(pattern), pattern, spec))
        .collect();
    matches.sort_by(|left, right| left.0.total_cmp(&right.0));
    matches
        .into_iter()
        .map(|(_, pattern, spec)| (pattern, spec))
        .collect()
}
