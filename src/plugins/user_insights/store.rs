use super::extract::guess_gender_from_name;
use super::labels::{LabelEntry, LabelSource, add_or_promote, selected};
use crate::{error, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;

/// 用户性别属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Gender {
    /// OneBot 的 sex 字段取值为 "male" / "female" / "unknown"
    pub fn from_onebot(s: &str) -> Self {
        match s {
            "male" => Gender::Male,
            "female" => Gender::Female,
            _ => Gender::Unknown,
        }
    }

    pub fn label_cn(&self) -> &'static str {
        match self {
            Gender::Male => "男性",
            Gender::Female => "女性",
            Gender::Unknown => "性别未知",
        }
    }
}

/// 外部属性探测的结果
///
/// 用显式三态（支持/不支持/瞬时失败）取代"平台不支持就抛异常"
/// 的控制流，调用方据此决定降级路径。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupResult {
    /// 外部来源给出了明确信号
    Found(Gender),
    /// 外部来源可用但没有信号（平台侧记录为 unknown）
    NoSignal,
    /// 当前上下文不支持该属性来源（如控制台适配器）
    Unsupported,
    /// 瞬时失败（超时、调用错误）
    Failed,
}

/// 带写入时间戳的性别缓存条目
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenderCache {
    pub value: Gender,
    pub updated_at: i64,
}

impl GenderCache {
    /// TTL 检查。unknown 哨兵值使用更短的 TTL，
    /// 避免一次外部故障被当成永久结论缓存。
    pub fn is_fresh(&self, now: i64, ttl_known_secs: i64, ttl_unknown_secs: i64) -> bool {
        let ttl = if self.value == Gender::Unknown {
            ttl_unknown_secs
        } else {
            ttl_known_secs
        };
        now - self.updated_at < ttl
    }
}

/// 单个用户的画像记录
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<GenderCache>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<LabelEntry>,
    /// 最近一次被读写的时间，驱动保留期 GC
    #[serde(default)]
    pub last_seen_at: i64,
}

type RecordMap = HashMap<String, UserRecord>;

/// 画像存储
///
/// 内存映射由一把读写锁保护（绝不跨 await 持有），
/// 文件写入由独立的异步锁串行化。
pub struct ProfileStore {
    records: RwLock<RecordMap>,
    path: PathBuf,
    file_lock: AsyncMutex<()>,
    dirty: AtomicBool,
    /// 已注册的后台任务 ID。重连会再次触发连接钩子，
    /// 旧任务先撤销再用新连接重建。
    pub task_ids: Mutex<Vec<u64>>,
}

impl ProfileStore {
    /// 加载存储。文件缺失或损坏时告警并以空映射启动，绝不让
    /// 插件初始化失败。
    pub fn load(path: PathBuf) -> Self {
        let records = if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(s) => match serde_json::from_str::<RecordMap>(&s) {
                    Ok(map) => map,
                    Err(e) => {
                        warn!(target: "Insight", "画像文件损坏，已重置为空: {}", e);
                        RecordMap::new()
                    }
                },
                Err(e) => {
                    warn!(target: "Insight", "画像文件读取失败，已重置为空: {}", e);
                    RecordMap::new()
                }
            }
        } else {
            RecordMap::new()
        };

        Self {
            records: RwLock::new(records),
            path,
            file_lock: AsyncMutex::new(()),
            dirty: AtomicBool::new(false),
            task_ids: Mutex::new(Vec::new()),
        }
    }

    /// 落盘：锁内快照、锁外序列化，先写临时文件再原子改名
    pub async fn save(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let snapshot = {
            let guard = self.records.read().unwrap();
            guard.clone()
        };

        let json = serde_json::to_string_pretty(&snapshot)?;

        let _fs_guard = self.file_lock.lock().await;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &self.path).await?;

        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// 周期性落盘入口：无变更则跳过
    pub async fn flush_if_dirty(&self) {
        if !self.dirty.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.save().await {
            error!(target: "Insight", "画像落盘失败: {}", e);
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 读取未过期的缓存性别
    pub fn cached_gender(
        &self,
        user_id: &str,
        now: i64,
        ttl_known_secs: i64,
        ttl_unknown_secs: i64,
    ) -> Option<Gender> {
        let guard = self.records.read().unwrap();
        guard
            .get(user_id)
            .and_then(|r| r.gender)
            .filter(|c| c.is_fresh(now, ttl_known_secs, ttl_unknown_secs))
            .map(|c| c.value)
    }

    /// 写入性别（记录不存在则惰性创建）
    pub fn set_gender(&self, user_id: &str, gender: Gender, now: i64) {
        let mut guard = self.records.write().unwrap();
        let record = guard.entry(user_id.to_string()).or_default();
        record.gender = Some(GenderCache {
            value: gender,
            updated_at: now,
        });
        record.last_seen_at = now;
        drop(guard);
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// 添加/晋升一个称呼（记录不存在则惰性创建）
    pub fn add_label(
        &self,
        user_id: &str,
        text: &str,
        priority: u8,
        source: LabelSource,
        now: i64,
        capacity: usize,
    ) {
        let mut guard = self.records.write().unwrap();
        let record = guard.entry(user_id.to_string()).or_default();
        add_or_promote(&mut record.labels, text, priority, source, now, capacity);
        record.last_seen_at = now;
        drop(guard);
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// 当前选中的称呼文本
    pub fn selected_label(&self, user_id: &str) -> Option<String> {
        let guard = self.records.read().unwrap();
        guard
            .get(user_id)
            .and_then(|r| selected(&r.labels))
            .map(|l| l.text.clone())
    }

    /// 取记录快照（用于指令查询展示）
    pub fn snapshot(&self, user_id: &str) -> Option<UserRecord> {
        self.records.read().unwrap().get(user_id).cloned()
    }

    /// 清理超出保留期的记录，返回清理数量
    pub fn gc_expired(&self, now: i64, retention_secs: i64) -> usize {
        let mut guard = self.records.write().unwrap();
        let before = guard.len();
        guard.retain(|_, r| now - r.last_seen_at < retention_secs);
        let removed = before - guard.len();
        drop(guard);
        if removed > 0 {
            self.dirty.store(true, Ordering::SeqCst);
        }
        removed
    }

    /// 清空全部画像，返回清理数量
    pub fn purge_all(&self) -> usize {
        let mut guard = self.records.write().unwrap();
        let removed = guard.len();
        guard.clear();
        drop(guard);
        self.dirty.store(true, Ordering::SeqCst);
        removed
    }
}

/// 带 TTL 的读取或刷新
///
/// 缓存命中且未过期直接返回；否则执行外部探测。探测没有给出
/// 明确信号时退回昵称用字推测，再退回 unknown。无论哪条路径，
/// 结果都会带新时间戳写回缓存，保证外部源不会被每条消息反复
/// 敲打。过期值永远不会被静默返回。
pub async fn get_or_refresh<F, Fut>(
    store: &ProfileStore,
    user_id: &str,
    display_name: &str,
    ttl_known_secs: i64,
    ttl_unknown_secs: i64,
    probe: F,
) -> Gender
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = LookupResult>,
{
    let now = chrono::Local::now().timestamp();

    if let Some(g) = store.cached_gender(user_id, now, ttl_known_secs, ttl_unknown_secs) {
        return g;
    }

    let resolved = match probe().await {
        LookupResult::Found(g) => g,
        LookupResult::NoSignal | LookupResult::Unsupported | LookupResult::Failed => {
            guess_gender_from_name(display_name).unwrap_or(Gender::Unknown)
        }
    };

    store.set_gender(user_id, resolved, now);
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::user_insights::labels::{PRIORITY_DEFAULT, PRIORITY_SELF};

    const TTL_KNOWN: i64 = 3600;
    const TTL_UNKNOWN: i64 = 600;

    fn temp_store() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path().join("profiles.json"));
        (dir, store)
    }

    #[test]
    fn ttl_boundary_one_second_past_is_stale() {
        let cache = GenderCache {
            value: Gender::Male,
            updated_at: 10_000 - TTL_KNOWN - 1,
        };
        assert!(!cache.is_fresh(10_000, TTL_KNOWN, TTL_UNKNOWN));
    }

    #[test]
    fn ttl_boundary_one_second_before_is_fresh() {
        let cache = GenderCache {
            value: Gender::Male,
            updated_at: 10_000 - TTL_KNOWN + 1,
        };
        assert!(cache.is_fresh(10_000, TTL_KNOWN, TTL_UNKNOWN));
    }

    #[test]
    fn unknown_sentinel_uses_shorter_ttl() {
        let cache = GenderCache {
            value: Gender::Unknown,
            updated_at: 10_000 - TTL_UNKNOWN - 1,
        };
        // 按 unknown TTL 已过期，按 known TTL 还没有
        assert!(!cache.is_fresh(10_000, TTL_KNOWN, TTL_UNKNOWN));
        assert!(cache.is_fresh(10_000 - TTL_UNKNOWN + 2, TTL_KNOWN, TTL_UNKNOWN));
    }

    #[tokio::test]
    async fn failed_probe_caches_unknown_with_fresh_timestamp() {
        let (_dir, store) = temp_store();

        let g = get_or_refresh(&store, "u2", "路人甲", TTL_KNOWN, TTL_UNKNOWN, || async {
            LookupResult::Failed
        })
        .await;
        assert_eq!(g, Gender::Unknown);

        // 哨兵值已带新时间戳写入，unknown TTL 内不再重复探测
        let record = store.snapshot("u2").unwrap();
        let cached = record.gender.unwrap();
        assert_eq!(cached.value, Gender::Unknown);
        let now = chrono::Local::now().timestamp();
        assert!(now - cached.updated_at < 5);
    }

    #[tokio::test]
    async fn fresh_cache_short_circuits_probe() {
        let (_dir, store) = temp_store();
        let now = chrono::Local::now().timestamp();
        store.set_gender("u1", Gender::Female, now);

        let g = get_or_refresh(&store, "u1", "", TTL_KNOWN, TTL_UNKNOWN, || async {
            panic!("缓存未过期时不应触发探测");
        })
        .await;
        assert_eq!(g, Gender::Female);
    }

    #[tokio::test]
    async fn name_heuristic_fills_in_when_probe_has_no_signal() {
        let (_dir, store) = temp_store();
        let g = get_or_refresh(&store, "u3", "龙哥", TTL_KNOWN, TTL_UNKNOWN, || async {
            LookupResult::NoSignal
        })
        .await;
        assert_eq!(g, Gender::Male);
        assert_eq!(store.snapshot("u3").unwrap().gender.unwrap().value, Gender::Male);
    }

    #[tokio::test]
    async fn save_then_load_round_trips_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");

        let store = ProfileStore::load(path.clone());
        let now = chrono::Local::now().timestamp();
        store.set_gender("u1", Gender::Male, now);
        store.add_label("u1", "Max", PRIORITY_SELF, LabelSource::SelfDeclared, now, 5);
        store.add_label("u1", "朋友", PRIORITY_DEFAULT, LabelSource::Default, now, 5);
        store.save().await.unwrap();

        let reloaded = ProfileStore::load(path);
        assert_eq!(reloaded.len(), 1);
        let record = reloaded.snapshot("u1").unwrap();
        assert_eq!(record.gender.unwrap().value, Gender::Male);
        assert_eq!(record.labels.len(), 2);
        assert_eq!(reloaded.selected_label("u1").as_deref(), Some("Max"));
    }

    #[test]
    fn corrupt_file_loads_as_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        std::fs::write(&path, "{ not valid json !!!").unwrap();

        let store = ProfileStore::load(path);
        assert!(store.is_empty());
    }

    #[test]
    fn gc_drops_only_records_past_retention() {
        let (_dir, store) = temp_store();
        let now = 1_000_000;
        store.set_gender("old", Gender::Male, now - 100);
        store.set_gender("new", Gender::Female, now - 10);

        let removed = store.gc_expired(now, 50);
        assert_eq!(removed, 1);
        assert!(store.snapshot("old").is_none());
        assert!(store.snapshot("new").is_some());
    }

    #[test]
    fn purge_all_empties_the_store() {
        let (_dir, store) = temp_store();
        let now = 1_000_000;
        store.set_gender("a", Gender::Male, now);
        store.set_gender("b", Gender::Female, now);
        assert_eq!(store.purge_all(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn selected_label_tracks_priority_list() {
        let (_dir, store) = temp_store();
        let now = 1_000_000;
        store.add_label("u1", "朋友", PRIORITY_DEFAULT, LabelSource::Default, now, 5);
        assert_eq!(store.selected_label("u1").as_deref(), Some("朋友"));

        store.add_label("u1", "Max", PRIORITY_SELF, LabelSource::SelfDeclared, now + 1, 5);
        assert_eq!(store.selected_label("u1").as_deref(), Some("Max"));
    }
}
