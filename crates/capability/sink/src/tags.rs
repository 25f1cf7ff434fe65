use crate::SinkError;
use domain::{Reading, Tags};

/// OpenTSDB 默认每个数据点最多 8 个标签。
pub const DEFAULT_MAX_TAGS: usize = 8;

/// 写入前的标签装饰：静态标签、主机标签、数量校验。
#[derive(Debug, Clone)]
pub struct TagDecorator {
    static_tags: Tags,
    host: Option<String>,
    max_tags: usize,
}

impl Default for TagDecorator {
    fn default() -> Self {
        Self {
            static_tags: Tags::new(),
            host: None,
            max_tags: DEFAULT_MAX_TAGS,
        }
    }
}

impl TagDecorator {
    pub fn new(static_tags: Tags, host: Option<String>, max_tags: usize) -> Self {
        Self {
            static_tags,
            host,
            max_tags,
        }
    }

    pub fn max_tags(&self) -> usize {
        self.max_tags
    }

    /// 数据点自身标签优先于静态标签；`host` 仅在缺失时补充。
    pub fn decorate(&self, reading: &Reading) -> Result<(String, Tags), SinkError> {
        let metric = sanitize(&reading.metric);
        if metric.is_empty() {
            return Err(SinkError::InvalidReading("empty metric name".to_string()));
        }
        if !reading.value.as_f64().is_finite() {
            return Err(SinkError::InvalidReading(format!(
                "non-finite value for {}",
                metric
            )));
        }

        let mut tags = Tags::new();
        for (key, value) in self.static_tags.iter().chain(reading.tags.iter()) {
            tags.insert(sanitize(key), sanitize(value));
        }
        if let Some(host) = &self.host {
            tags.entry("host".to_string()).or_insert_with(|| sanitize(host));
        }

        if let Some((key, _)) = tags.iter().find(|(key, value)| key.is_empty() || value.is_empty()) {
            return Err(SinkError::InvalidReading(format!(
                "empty tag {:?} on {}",
                key, metric
            )));
        }
        if tags.len() > self.max_tags {
            return Err(SinkError::InvalidReading(format!(
                "{} has {} tags, limit is {}",
                metric,
                tags.len(),
                self.max_tags
            )));
        }
        Ok((metric, tags))
    }
}

/// OpenTSDB 仅接受字母、数字与 `-_./`；其他字符替换为 `_`。
pub fn sanitize(text: &str) -> String {
    text.trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// 本机主机名：`HOSTNAME` 环境变量，其次 `/etc/hostname`。
pub fn local_hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}
