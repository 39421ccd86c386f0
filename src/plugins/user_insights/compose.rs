use super::config::InsightsConfig;
use super::store::{Gender, ProfileStore};

/// 拼接注入到提示词头部的用户信息标注
pub fn annotation(display_name: &str, address: &str, gender: Gender) -> String {
    format!(
        "[用户信息: {}({}), {}]",
        display_name,
        address,
        gender.label_cn()
    )
}

/// 取用户当前称呼：优先缓存中选中的条目，否则按性别兜底
pub fn address_for(store: &ProfileStore, user_id: &str, gender: Gender, cfg: &InsightsConfig) -> String {
    store
        .selected_label(user_id)
        .unwrap_or_else(|| cfg.default_address(gender).to_string())
}

/// 为某个用户组装完整标注
///
/// 只读操作，任何字段缺失都退化为配置中的默认值，绝不失败。
/// 把标注插入出站请求是调用方的事。
pub fn annotate(
    store: &ProfileStore,
    user_id: &str,
    display_name: &str,
    gender: Gender,
    cfg: &InsightsConfig,
) -> String {
    let name = if display_name.is_empty() {
        user_id
    } else {
        display_name
    };
    let address = address_for(store, user_id, gender, cfg);
    annotation(name, &address, gender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::user_insights::labels::{LabelSource, PRIORITY_SELF};

    fn empty_store() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path().join("profiles.json"));
        (dir, store)
    }

    #[test]
    fn annotation_format_is_stable() {
        assert_eq!(
            annotation("小明", "Max", Gender::Male),
            "[用户信息: 小明(Max), 男性]"
        );
        assert_eq!(
            annotation("someone", "朋友", Gender::Unknown),
            "[用户信息: someone(朋友), 性别未知]"
        );
    }

    #[test]
    fn unknown_user_degrades_to_gender_default() {
        let (_dir, store) = empty_store();
        let cfg = InsightsConfig::default();
        assert_eq!(
            annotate(&store, "42", "小红", Gender::Female, &cfg),
            "[用户信息: 小红(女士), 女性]"
        );
    }

    #[test]
    fn cached_label_wins_over_default() {
        let (_dir, store) = empty_store();
        let cfg = InsightsConfig::default();
        store.add_label("42", "Max", PRIORITY_SELF, LabelSource::SelfDeclared, 100, 5);
        assert_eq!(
            annotate(&store, "42", "小明", Gender::Male, &cfg),
            "[用户信息: 小明(Max), 男性]"
        );
    }

    #[test]
    fn empty_display_name_falls_back_to_id() {
        let (_dir, store) = empty_store();
        let cfg = InsightsConfig::default();
        assert_eq!(
            annotate(&store, "42", "", Gender::Unknown, &cfg),
            "[用户信息: 42(朋友), 性别未知]"
        );
    }
}
