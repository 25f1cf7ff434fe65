use regex::Regex;
use std::sync::LazyLock;

/// `dt/<app>/<context>/<thing>/<property>`，context 可包含多段。
static TOPIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^dt/(?P<app>[ \w-]+)/(?P<context>[ \w\-/]+)/(?P<thing>[ \w-]+)/(?P<property>[ \w-]+)$",
    )
    .expect("topic pattern is valid")
});

/// 结构化 topic 的各段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicParts<'a> {
    pub app: &'a str,
    pub context: &'a str,
    pub thing: &'a str,
    pub property: &'a str,
}

/// 按结构模式解析 topic；不匹配时返回 `None`（降级模式）。
pub fn parse_topic(topic: &str) -> Option<TopicParts<'_>> {
    let captures = TOPIC_PATTERN.captures(topic)?;
    Some(TopicParts {
        app: captures.name("app")?.as_str(),
        context: captures.name("context")?.as_str(),
        thing: captures.name("thing")?.as_str(),
        property: captures.name("property")?.as_str(),
    })
}

/// context 按 `/` 拆分为 `context_0, context_1, …`。
pub fn context_tags(context: &str) -> impl Iterator<Item = (String, String)> + '_ {
    context
        .split('/')
        .enumerate()
        .map(|(index, part)| (format!("context_{}", index), part.to_string()))
}
