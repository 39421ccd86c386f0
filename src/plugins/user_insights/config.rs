use super::store::Gender;
use serde::{Deserialize, Serialize};

/// 用户画像插件配置
///
/// 字段在启动时整体反序列化校验一次，运行期不再做逐项兜底。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightsConfig {
    pub enabled: bool,

    /// 每个用户最多缓存的称呼数量
    #[serde(default = "default_max_labels")]
    pub max_labels: usize,

    /// 候选称呼的长度下限/上限（按字符计）
    #[serde(default = "default_label_min_chars")]
    pub label_min_chars: usize,
    #[serde(default = "default_label_max_chars")]
    pub label_max_chars: usize,

    /// 明确性别结果的缓存天数
    #[serde(default = "default_gender_ttl_days")]
    pub gender_ttl_days: i64,

    /// unknown 哨兵值的重试间隔（小时），比正常 TTL 短，
    /// 外部源恢复后能较快重新探测
    #[serde(default = "default_unknown_retry_hours")]
    pub unknown_retry_hours: i64,

    /// 记录保留期（天），超期未活跃的记录被 GC
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// 周期落盘间隔（秒）
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// 单次外部属性查询的超时（秒）
    #[serde(default = "default_lookup_timeout_secs")]
    pub lookup_timeout_secs: u64,

    /// 是否从聊天内容中自动学习称呼
    #[serde(default = "default_true")]
    pub auto_detect: bool,

    // === 每日批量刷新 ===
    #[serde(default)]
    pub daily_scan_enabled: bool,
    #[serde(default = "default_daily_scan_time")]
    pub daily_scan_time: String, // "HH:MM:SS"
    /// 批量刷新时相邻群之间的等待（毫秒），避免触发平台限流
    #[serde(default = "default_scan_group_delay_ms")]
    pub scan_group_delay_ms: u64,

    // === 按性别兜底的默认称呼 ===
    #[serde(default = "default_male_address")]
    pub male_default_address: String,
    #[serde(default = "default_female_address")]
    pub female_default_address: String,
    #[serde(default = "default_unknown_address")]
    pub unknown_default_address: String,
}

fn default_max_labels() -> usize {
    5
}

fn default_label_min_chars() -> usize {
    1
}

fn default_label_max_chars() -> usize {
    10
}

fn default_gender_ttl_days() -> i64 {
    30
}

fn default_unknown_retry_hours() -> i64 {
    6
}

fn default_retention_days() -> i64 {
    90
}

fn default_flush_interval_secs() -> u64 {
    300
}

fn default_lookup_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_daily_scan_time() -> String {
    "04:30:00".to_string()
}

fn default_scan_group_delay_ms() -> u64 {
    1500
}

fn default_male_address() -> String {
    "先生".to_string()
}

fn default_female_address() -> String {
    "女士".to_string()
}

fn default_unknown_address() -> String {
    "朋友".to_string()
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_labels: default_max_labels(),
            label_min_chars: default_label_min_chars(),
            label_max_chars: default_label_max_chars(),
            gender_ttl_days: default_gender_ttl_days(),
            unknown_retry_hours: default_unknown_retry_hours(),
            retention_days: default_retention_days(),
            flush_interval_secs: default_flush_interval_secs(),
            lookup_timeout_secs: default_lookup_timeout_secs(),
            auto_detect: default_true(),
            daily_scan_enabled: false,
            daily_scan_time: default_daily_scan_time(),
            scan_group_delay_ms: default_scan_group_delay_ms(),
            male_default_address: default_male_address(),
            female_default_address: default_female_address(),
            unknown_default_address: default_unknown_address(),
        }
    }
}

impl InsightsConfig {
    pub fn gender_ttl_secs(&self) -> i64 {
        self.gender_ttl_days * 24 * 3600
    }

    pub fn unknown_ttl_secs(&self) -> i64 {
        self.unknown_retry_hours * 3600
    }

    pub fn retention_secs(&self) -> i64 {
        self.retention_days * 24 * 3600
    }

    /// 按性别取兜底称呼
    pub fn default_address(&self, gender: Gender) -> &str {
        match gender {
            Gender::Male => &self.male_default_address,
            Gender::Female => &self.female_default_address,
            Gender::Unknown => &self.unknown_default_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = InsightsConfig::default();
        assert_eq!(cfg.max_labels, 5);
        assert_eq!(cfg.gender_ttl_days, 30);
        assert!(cfg.unknown_ttl_secs() < cfg.gender_ttl_secs());
        assert_eq!(cfg.default_address(Gender::Male), "先生");
        assert_eq!(cfg.default_address(Gender::Female), "女士");
        assert_eq!(cfg.default_address(Gender::Unknown), "朋友");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: InsightsConfig = toml::from_str("enabled = true\nmax_labels = 3\n").unwrap();
        assert_eq!(cfg.max_labels, 3);
        assert_eq!(cfg.label_max_chars, 10);
        assert_eq!(cfg.daily_scan_time, "04:30:00");
    }
}
