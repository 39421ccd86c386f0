use serde::{Deserialize, Serialize};

/// 称呼条目的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    /// 本人强调 ("叫我xx")
    SelfDeclared,
    /// 他人在定向提及时使用的称呼
    Observed,
    /// 按性别兜底的默认称呼
    Default,
}

/// 优先级约定：本人强调 > 他人称呼 > 默认称呼
pub const PRIORITY_SELF: u8 = 3;
pub const PRIORITY_OBSERVED: u8 = 2;
pub const PRIORITY_DEFAULT: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelEntry {
    pub text: String,
    pub priority: u8,
    pub source: LabelSource,
    pub last_seen_at: i64,
}

/// 添加或晋升一个称呼
///
/// 同名条目合并：优先级取历史最大值，刷新 last_seen_at；
/// 新条目追加。随后按 (优先级降序, 最近出现降序) 稳定排序并
/// 截断到容量上限，溢出永远从尾部（最低优先级、最旧）淘汰。
pub fn add_or_promote(
    labels: &mut Vec<LabelEntry>,
    text: &str,
    priority: u8,
    source: LabelSource,
    now: i64,
    capacity: usize,
) {
    if let Some(existing) = labels.iter_mut().find(|l| l.text == text) {
        if priority > existing.priority {
            existing.priority = priority;
            existing.source = source;
        }
        existing.last_seen_at = now;
    } else {
        labels.push(LabelEntry {
            text: text.to_string(),
            priority,
            source,
            last_seen_at: now,
        });
    }

    // 稳定排序：完全相同的 (priority, last_seen_at) 保持插入顺序
    labels.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.last_seen_at.cmp(&a.last_seen_at))
    });

    if capacity > 0 && labels.len() > capacity {
        labels.truncate(capacity);
    }
}

/// 当前选中的称呼：最高优先级，平手时取最近出现者，
/// 仍平手时取插入较早者。
pub fn selected(labels: &[LabelEntry]) -> Option<&LabelEntry> {
    let mut best: Option<&LabelEntry> = None;
    for entry in labels {
        match best {
            None => best = Some(entry),
            Some(cur) => {
                if entry.priority > cur.priority
                    || (entry.priority == cur.priority && entry.last_seen_at > cur.last_seen_at)
                {
                    best = Some(entry);
                }
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(labels: &[LabelEntry]) -> Vec<&str> {
        labels.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let mut labels = Vec::new();
        for i in 0..20 {
            add_or_promote(
                &mut labels,
                &format!("n{}", i),
                PRIORITY_OBSERVED,
                LabelSource::Observed,
                1000 + i,
                5,
            );
            assert!(labels.len() <= 5);
        }
        assert_eq!(labels.len(), 5);
    }

    #[test]
    fn equal_priority_selects_most_recent() {
        let mut labels = Vec::new();
        add_or_promote(&mut labels, "老的", 2, LabelSource::Observed, 100, 5);
        add_or_promote(&mut labels, "新的", 2, LabelSource::Observed, 200, 5);
        assert_eq!(selected(&labels).unwrap().text, "新的");
    }

    #[test]
    fn full_tie_keeps_insertion_order() {
        let mut labels = Vec::new();
        add_or_promote(&mut labels, "甲", 2, LabelSource::Observed, 100, 5);
        add_or_promote(&mut labels, "乙", 2, LabelSource::Observed, 100, 5);
        assert_eq!(selected(&labels).unwrap().text, "甲");
    }

    #[test]
    fn add_or_promote_is_idempotent() {
        let mut labels = Vec::new();
        add_or_promote(&mut labels, "X", 2, LabelSource::Observed, 100, 5);
        add_or_promote(&mut labels, "X", 2, LabelSource::Observed, 101, 5);
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].priority, 2);
        assert_eq!(labels[0].last_seen_at, 101);
    }

    #[test]
    fn duplicate_keeps_max_priority() {
        let mut labels = Vec::new();
        add_or_promote(
            &mut labels,
            "X",
            PRIORITY_SELF,
            LabelSource::SelfDeclared,
            100,
            5,
        );
        // 低优先级再次出现不得降级
        add_or_promote(&mut labels, "X", PRIORITY_OBSERVED, LabelSource::Observed, 200, 5);
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].priority, PRIORITY_SELF);
        assert_eq!(labels[0].source, LabelSource::SelfDeclared);
        assert_eq!(labels[0].last_seen_at, 200);
    }

    #[test]
    fn overflow_evicts_lowest_priority_tail() {
        // 已有 [("Max",3), ("default",1)]，容量 2
        let mut labels = Vec::new();
        add_or_promote(&mut labels, "Max", 3, LabelSource::SelfDeclared, 100, 2);
        add_or_promote(&mut labels, "default", 1, LabelSource::Default, 100, 2);

        // 加入 ("Buddy",2) 后应淘汰 "default"
        add_or_promote(&mut labels, "Buddy", 2, LabelSource::Observed, 200, 2);
        assert_eq!(texts(&labels), vec!["Max", "Buddy"]);
    }

    #[test]
    fn selected_is_none_for_empty_list() {
        assert!(selected(&[]).is_none());
    }
}
