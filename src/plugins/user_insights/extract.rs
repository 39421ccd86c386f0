use super::labels::{LabelSource, PRIORITY_OBSERVED, PRIORITY_SELF};
use super::store::Gender;
use regex::Regex;
use std::sync::OnceLock;

/// 启发式扫描得到的候选称呼
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub text: String,
    pub priority: u8,
    pub source: LabelSource,
}

// ================= 正则匹配 =================

static RE_SELF: OnceLock<Vec<Regex>> = OnceLock::new();
static RE_ADDRESSED: OnceLock<Regex> = OnceLock::new();

fn self_patterns() -> &'static [Regex] {
    RE_SELF.get_or_init(|| {
        vec![
            // 长前缀在前，避免 "叫我" 抢占 "请叫我" 的匹配位置
            Regex::new(r"(?:请叫我|称呼我|喊我|我叫|叫我)\s*([^\s，,。.！!？?、:：]{1,16})").unwrap(),
            Regex::new(r"我是([^\s，,。.！!？?、:：]{1,16})[，,。.！!]").unwrap(),
            Regex::new(r"本([^\s，,。.！!？?、:：]{1,16})在此").unwrap(),
            Regex::new(r"(?i)call me ([A-Za-z][A-Za-z0-9_-]{0,15})").unwrap(),
        ]
    })
}

fn addressed_pattern() -> &'static Regex {
    RE_ADDRESSED.get_or_init(|| {
        // 紧跟在 at 段之后的第一个词，后面必须是分隔符或行尾
        Regex::new(r"^\s*[，,]?\s*([^\s，,。.！!？?、:：@]{1,16})([\s，,。.！!？?、]|$)").unwrap()
    })
}

/// 去掉候选词首尾的标点/空白，并做长度（字符数）校验
fn clean_candidate(raw: &str, min_chars: usize, max_chars: usize) -> Option<String> {
    let trimmed = raw
        .trim_matches(|c: char| {
            c.is_whitespace()
                || matches!(
                    c,
                    '，' | '。' | '！' | '？' | ',' | '.' | '!' | '?' | '~' | '、' | '"' | '\''
                        | '“' | '”' | '‘' | '’' | '@'
                )
        })
        .to_string();

    let chars = trimmed.chars().count();
    if chars < min_chars || chars > max_chars {
        return None;
    }
    Some(trimmed)
}

/// 扫描消息文本中本人强调的称呼（"叫我X" / "我是X。" / "call me X"）
///
/// 同一条消息可能命中多个模式，重复由称呼列表的合并逻辑处理。
pub fn extract_self_claims(text: &str, min_chars: usize, max_chars: usize) -> Vec<Candidate> {
    let mut out = Vec::new();
    for re in self_patterns() {
        for caps in re.captures_iter(text) {
            if let Some(m) = caps.get(1)
                && let Some(cleaned) = clean_candidate(m.as_str(), min_chars, max_chars)
            {
                out.push(Candidate {
                    text: cleaned,
                    priority: PRIORITY_SELF,
                    source: LabelSource::SelfDeclared,
                });
            }
        }
    }
    out
}

/// 提取他人对被提及用户的称呼
///
/// 只接受紧跟在结构化 at 段之后的文本。没有定向提及标记的消息
/// 不会走到这里，调用方负责保证这一前提。
pub fn extract_addressed(
    text_after_at: &str,
    min_chars: usize,
    max_chars: usize,
) -> Option<Candidate> {
    let caps = addressed_pattern().captures(text_after_at)?;
    let cleaned = clean_candidate(caps.get(1)?.as_str(), min_chars, max_chars)?;
    Some(Candidate {
        text: cleaned,
        priority: PRIORITY_OBSERVED,
        source: LabelSource::Observed,
    })
}

// ================= 昵称性别推测 =================

const FEMALE_HINTS: &[&str] = &[
    "女", "姐", "妹", "娘", "媛", "婷", "莉", "丽", "美", "芳", "花", "萌", "小仙女",
];

const MALE_HINTS: &[&str] = &[
    "男", "哥", "弟", "爷", "帅", "强", "刚", "勇", "威", "龙", "虎", "少爷",
];

/// 从显示名称中的常见用字推测性别，无把握时返回 None
pub fn guess_gender_from_name(name: &str) -> Option<Gender> {
    if name.is_empty() {
        return None;
    }
    for hint in FEMALE_HINTS {
        if name.contains(hint) {
            return Some(Gender::Female);
        }
    }
    for hint in MALE_HINTS {
        if name.contains(hint) {
            return Some(Gender::Male);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_me_yields_self_priority_candidate() {
        let found = extract_self_claims("call me Max", 1, 10);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "Max");
        assert_eq!(found[0].priority, PRIORITY_SELF);
        assert_eq!(found[0].source, LabelSource::SelfDeclared);
    }

    #[test]
    fn chinese_self_declarations_match() {
        let found = extract_self_claims("以后请叫我老大", 1, 10);
        assert_eq!(found[0].text, "老大");

        let found = extract_self_claims("我是小明。", 1, 10);
        assert_eq!(found[0].text, "小明");

        let found = extract_self_claims("本大侠在此", 1, 10);
        assert_eq!(found[0].text, "大侠");
    }

    #[test]
    fn plain_chatter_yields_no_candidates() {
        assert!(extract_self_claims("今天天气不错", 1, 10).is_empty());
        assert!(extract_self_claims("", 1, 10).is_empty());
    }

    #[test]
    fn over_long_candidates_are_rejected() {
        let found = extract_self_claims("叫我一二三四五六七八九十十一", 1, 10);
        assert!(found.is_empty());
    }

    #[test]
    fn candidates_are_trimmed_of_punctuation() {
        let found = extract_self_claims("叫我Max~", 1, 10);
        assert_eq!(found[0].text, "Max");
    }

    #[test]
    fn addressed_takes_leading_token_after_mention() {
        let c = extract_addressed(" 小美，今天在吗", 1, 10).unwrap();
        assert_eq!(c.text, "小美");
        assert_eq!(c.priority, PRIORITY_OBSERVED);
        assert_eq!(c.source, LabelSource::Observed);
    }

    #[test]
    fn addressed_accepts_end_of_text() {
        let c = extract_addressed(" 老板", 1, 10).unwrap();
        assert_eq!(c.text, "老板");
    }

    #[test]
    fn addressed_rejects_empty_followup() {
        assert!(extract_addressed("   ", 1, 10).is_none());
        assert!(extract_addressed("", 1, 10).is_none());
    }

    #[test]
    fn name_gender_heuristic_matches_hint_chars() {
        assert_eq!(guess_gender_from_name("萌萌"), Some(Gender::Female));
        assert_eq!(guess_gender_from_name("龙哥"), Some(Gender::Male));
        assert_eq!(guess_gender_from_name("路人甲"), None);
        assert_eq!(guess_gender_from_name(""), None);
    }

    #[test]
    fn female_hints_win_over_male_hints() {
        // 同时包含两类用字时沿用原始优先顺序（女性在前）
        assert_eq!(guess_gender_from_name("姐的虎"), Some(Gender::Female));
    }
}
