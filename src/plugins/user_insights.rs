use crate::adapters::onebot::{LockedWriter, api, send_msg};
use crate::command::{CommandMatch, match_command};
use crate::config::build_config;
use crate::event::{Context, MessageEvent};
use crate::message::Message;
use crate::plugins::{PluginError, get_config, get_data_dir};
use crate::scheduler::parse_hms;
use crate::{debug, error, info, warn};
use futures_util::future::BoxFuture;
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsScalar};
use std::sync::Arc;
use std::time::Duration;
use toml::Value;

pub mod compose;
pub mod config;
pub mod extract;
pub mod labels;
pub mod scan;
pub mod store;

use config::InsightsConfig;
use store::{Gender, LookupResult, ProfileStore};

pub fn default_config() -> Value {
    build_config(InsightsConfig::default())
}

/// 初始化：加载画像文件并注册到共享状态
pub fn init(ctx: Context) -> BoxFuture<'static, Result<(), PluginError>> {
    Box::pin(async move {
        let dir = get_data_dir("user_insights").await?;
        let store = Arc::new(ProfileStore::load(dir.join("profiles.json")));
        info!(target: "Insight", "已加载 {} 条用户画像", store.len());
        ctx.states.set(store);
        Ok(())
    })
}

/// 连接钩子：注册周期落盘与每日批量刷新任务
pub fn on_connected(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let cfg: InsightsConfig = get_config(&ctx, "user_insights").unwrap_or_default();
        let store = match ctx.states.get::<ProfileStore>() {
            Some(s) => s,
            None => return Ok(Some(ctx)),
        };

        // 断线重连会再次触发连接钩子：先撤销旧任务，
        // 再用当前连接重建，避免后台扫描拿着失效的 writer
        {
            let mut ids = store.task_ids.lock().unwrap();
            for id in ids.drain(..) {
                ctx.scheduler.remove(id);
            }
        }
        let mut new_ids = Vec::new();

        // 周期落盘（防御性持久化，正常路径在变更处标脏）
        {
            let store = store.clone();
            new_ids.push(ctx.scheduler.add_interval(
                Duration::from_secs(cfg.flush_interval_secs.max(10)),
                move || {
                    let store = store.clone();
                    async move {
                        store.flush_if_dirty().await;
                    }
                },
            ));
        }

        // 每日批量刷新 + 保留期 GC
        if cfg.daily_scan_enabled && ctx.bot.adapter == "onebot" {
            match parse_hms(&cfg.daily_scan_time) {
                Some((h, m, s)) => {
                    let store = store.clone();
                    let cfg_task = cfg.clone();
                    let task_ctx = ctx.clone();
                    let writer = writer.clone();
                    new_ids.push(ctx.scheduler.add_daily_at(h, m, s, move || {
                        let store = store.clone();
                        let cfg = cfg_task.clone();
                        let ctx = task_ctx.clone();
                        let writer = writer.clone();
                        async move {
                            scan::rescan_all(&ctx, writer, &store, &cfg).await;

                            let now = chrono::Local::now().timestamp();
                            let removed = store.gc_expired(now, cfg.retention_secs());
                            if removed > 0 {
                                info!(target: "Insight", "保留期清理 {} 条记录", removed);
                            }
                            store.flush_if_dirty().await;
                        }
                    }));
                    info!(
                        target: "Insight",
                        "每日画像扫描已注册 ({})",
                        cfg.daily_scan_time
                    );
                }
                None => {
                    warn!(
                        target: "Insight",
                        "daily_scan_time 格式无效，已跳过扫描注册: {}",
                        cfg.daily_scan_time
                    );
                }
            }
        }

        store.task_ids.lock().unwrap().extend(new_ids);

        Ok(Some(ctx))
    })
}

/// 收尾钩子：退出前做最终落盘
pub fn shutdown(ctx: Context) -> BoxFuture<'static, Result<(), PluginError>> {
    Box::pin(async move {
        if let Some(store) = ctx.states.get::<ProfileStore>() {
            store.save().await?;
        }
        Ok(())
    })
}

pub fn handle(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let store = match ctx.states.get::<ProfileStore>() {
            Some(s) => s,
            None => return Ok(Some(ctx)),
        };
        let cfg: InsightsConfig = get_config(&ctx, "user_insights").unwrap_or_default();

        if ctx.as_message().is_some() {
            // === 指令面 ===
            if let Some(cmd) = match_command(&ctx, "用户信息") {
                handle_query(&ctx, &writer, &store, &cfg, &cmd).await;
                return Ok(None);
            }
            if match_command(&ctx, "刷新画像").is_some() {
                handle_rescan(&ctx, &writer, &store, &cfg).await;
                return Ok(None);
            }
            if let Some(cmd) = match_command(&ctx, "设置性别") {
                handle_set(&ctx, &writer, &store, &cfg, &cmd).await;
                return Ok(None);
            }
            if match_command(&ctx, "清空画像").is_some() {
                handle_purge(&ctx, &writer, &store).await;
                return Ok(None);
            }

            // === 被动学习 ===
            if cfg.auto_detect {
                learn_from_message(&ctx, &store, &cfg);
            }
        }

        Ok(Some(ctx))
    })
}

// ================= 属性解析 =================

/// 读取或刷新用户性别
///
/// 探测前先做能力检查：只有 OneBot 适配器具备属性来源，其他
/// 平台直接按"不支持"降级到昵称推测。群上下文查成员信息，
/// 私聊查陌生人信息，均受配置的超时约束。
pub async fn resolve_gender(
    ctx: &Context,
    writer: LockedWriter,
    store: &ProfileStore,
    cfg: &InsightsConfig,
    user_id: i64,
    group_id: Option<i64>,
    display_name: &str,
) -> Gender {
    let uid = user_id.to_string();

    store::get_or_refresh(
        store,
        &uid,
        display_name,
        cfg.gender_ttl_secs(),
        cfg.unknown_ttl_secs(),
        || async move {
            if ctx.bot.adapter != "onebot" {
                return LookupResult::Unsupported;
            }

            let timeout = Duration::from_secs(cfg.lookup_timeout_secs);
            let sex = if let Some(gid) = group_id {
                match tokio::time::timeout(
                    timeout,
                    api::get_group_member_info(ctx, writer, gid, user_id, false),
                )
                .await
                {
                    Ok(Ok(member)) => member.sex,
                    Ok(Err(e)) => {
                        debug!(target: "Insight", "成员信息查询失败: {}", e);
                        return LookupResult::Failed;
                    }
                    Err(_) => {
                        debug!(target: "Insight", "成员信息查询超时 (User {})", user_id);
                        return LookupResult::Failed;
                    }
                }
            } else {
                match tokio::time::timeout(
                    timeout,
                    api::get_stranger_info(ctx, writer, user_id, false),
                )
                .await
                {
                    Ok(Ok(stranger)) => stranger.sex,
                    Ok(Err(e)) => {
                        debug!(target: "Insight", "陌生人信息查询失败: {}", e);
                        return LookupResult::Failed;
                    }
                    Err(_) => {
                        debug!(target: "Insight", "陌生人信息查询超时 (User {})", user_id);
                        return LookupResult::Failed;
                    }
                }
            };

            match Gender::from_onebot(&sex) {
                Gender::Unknown => LookupResult::NoSignal,
                found => LookupResult::Found(found),
            }
        },
    )
    .await
}

// ================= 被动学习 =================

/// 从一条消息中学习称呼
///
/// 发送者的自我声明全文扫描；他人称呼只在存在定向提及标记
/// （结构化 at 段）时提取，取紧随 at 之后的文本开头。
fn learn_from_message(ctx: &Context, store: &ProfileStore, cfg: &InsightsConfig) {
    let msg = match ctx.as_message() {
        Some(m) => m,
        None => return,
    };
    let segments = match msg.segments() {
        Some(s) => s,
        None => return,
    };

    let now = chrono::Local::now().timestamp();
    let sender_id = msg.user_id().to_string();

    // 自我称呼声明
    let mut full_text = String::new();
    for seg in segments {
        if seg.get_str("type") == Some("text")
            && let Some(t) = seg.get("data").and_then(|d| d.get_str("text"))
        {
            full_text.push_str(t);
        }
    }
    for cand in extract::extract_self_claims(&full_text, cfg.label_min_chars, cfg.label_max_chars)
    {
        debug!(
            target: "Insight",
            "检测到用户 {} 的自我称呼: {}",
            sender_id, cand.text
        );
        store.add_label(
            &sender_id,
            &cand.text,
            cand.priority,
            cand.source,
            now,
            cfg.max_labels,
        );
    }

    // 他人对被提及用户的称呼
    for (i, seg) in segments.iter().enumerate() {
        if seg.get_str("type") != Some("at") {
            continue;
        }
        let target = seg.get("data").and_then(|d| {
            d.get_str("qq")
                .map(String::from)
                .or_else(|| d.get_i64("qq").map(|v| v.to_string()))
                .or_else(|| d.get_u64("qq").map(|v| v.to_string()))
        });
        let target = match target {
            Some(t) if t != "all" => t,
            _ => continue,
        };

        let Some(next) = segments.get(i + 1) else {
            continue;
        };
        if next.get_str("type") != Some("text") {
            continue;
        }
        let Some(text) = next.get("data").and_then(|d| d.get_str("text")) else {
            continue;
        };

        if let Some(cand) =
            extract::extract_addressed(text, cfg.label_min_chars, cfg.label_max_chars)
        {
            debug!(
                target: "Insight",
                "检测到他人对 {} 的称呼: {}",
                target, cand.text
            );
            store.add_label(
                &target,
                &cand.text,
                cand.priority,
                cand.source,
                now,
                cfg.max_labels,
            );
        }
    }
}

// ================= 指令实现 =================

async fn reply_text(ctx: &Context, writer: &LockedWriter, msg: &MessageEvent<'_>, text: String) {
    let out = Message::new().reply(msg.message_id()).text(text);
    let _ = send_msg(ctx, writer.clone(), msg.group_id(), Some(msg.user_id()), out).await;
}

/// 查询用户画像（@某人查对方，否则查自己）
async fn handle_query(
    ctx: &Context,
    writer: &LockedWriter,
    store: &ProfileStore,
    cfg: &InsightsConfig,
    cmd: &CommandMatch,
) {
    let msg = match ctx.as_message() {
        Some(m) => m,
        None => return,
    };

    let (target_id, target_name) = match cmd.at_ids.first() {
        Some(id) => (id.clone(), format!("用户{}", id)),
        None => (msg.user_id().to_string(), msg.sender_name().to_string()),
    };
    let target_num: i64 = target_id.parse().unwrap_or(0);

    let gender = resolve_gender(
        ctx,
        writer.clone(),
        store,
        cfg,
        target_num,
        msg.group_id(),
        &target_name,
    )
    .await;
    let address = compose::address_for(store, &target_id, gender, cfg);

    let mut reply = String::from("👤 用户信息\n");
    reply.push_str(&format!("昵称: {}\n", target_name));
    reply.push_str(&format!("ID: {}\n", target_id));
    reply.push_str(&format!("性别: {}\n", gender.label_cn()));
    reply.push_str(&format!("当前称呼: {}\n", address));

    if let Some(record) = store.snapshot(&target_id)
        && !record.labels.is_empty()
    {
        reply.push_str("\n📝 称呼记录:\n");
        for label in &record.labels {
            let tag = match label.priority {
                labels::PRIORITY_SELF => "本人强调",
                labels::PRIORITY_OBSERVED => "他人称呼",
                labels::PRIORITY_DEFAULT => "默认称呼",
                _ => "其他",
            };
            reply.push_str(&format!("  • {} ({})\n", label.text, tag));
        }
    }

    reply_text(ctx, writer, &msg, reply).await;
}

/// 手动刷新本群成员属性（仅群管理员）
async fn handle_rescan(
    ctx: &Context,
    writer: &LockedWriter,
    store: &ProfileStore,
    cfg: &InsightsConfig,
) {
    let msg = match ctx.as_message() {
        Some(m) => m,
        None => return,
    };

    let group_id = match msg.group_id() {
        Some(g) => g,
        None => {
            reply_text(ctx, writer, &msg, "请在群聊中使用该指令。".to_string()).await;
            return;
        }
    };

    if !msg.sender_is_admin() {
        reply_text(ctx, writer, &msg, "该指令仅群管理员可用。".to_string()).await;
        return;
    }

    let mut report = scan::ScanReport::default();
    match scan::rescan_group(ctx, writer.clone(), store, cfg, group_id, &mut report).await {
        Ok(()) => {
            store.flush_if_dirty().await;
            reply_text(ctx, writer, &msg, report.summary()).await;
        }
        Err(e) => {
            error!(target: "Insight", "[Group({})] 手动刷新失败: {}", group_id, e);
            reply_text(ctx, writer, &msg, "刷新失败，请稍后重试。".to_string()).await;
        }
    }
}

/// 手动覆盖性别记录：自己随意，改别人需要群管理员
async fn handle_set(
    ctx: &Context,
    writer: &LockedWriter,
    store: &ProfileStore,
    cfg: &InsightsConfig,
    cmd: &CommandMatch,
) {
    let msg = match ctx.as_message() {
        Some(m) => m,
        None => return,
    };

    let gender = match cmd.args_text().as_str() {
        "男" | "male" => Gender::Male,
        "女" | "female" => Gender::Female,
        "未知" | "unknown" => Gender::Unknown,
        _ => {
            reply_text(
                ctx,
                writer,
                &msg,
                "用法: 设置性别 <男|女|未知> [@某人]".to_string(),
            )
            .await;
            return;
        }
    };

    let target_id = match cmd.at_ids.first() {
        Some(id) => {
            if !msg.sender_is_admin() {
                reply_text(ctx, writer, &msg, "修改他人记录需要群管理员权限。".to_string())
                    .await;
                return;
            }
            id.clone()
        }
        None => msg.user_id().to_string(),
    };

    let now = chrono::Local::now().timestamp();
    store.set_gender(&target_id, gender, now);
    store.flush_if_dirty().await;

    // 覆盖值与普通缓存走同一条 TTL 通道，到期自然失效
    let ttl_hint = if gender == Gender::Unknown {
        format!("{} 小时", cfg.unknown_retry_hours)
    } else {
        format!("{} 天", cfg.gender_ttl_days)
    };
    reply_text(
        ctx,
        writer,
        &msg,
        format!(
            "已将 {} 记录为 {}（{} 后自动重新探测）",
            target_id,
            gender.label_cn(),
            ttl_hint
        ),
    )
    .await;
}

/// 清空全部画像（仅群管理员）
async fn handle_purge(ctx: &Context, writer: &LockedWriter, store: &ProfileStore) {
    let msg = match ctx.as_message() {
        Some(m) => m,
        None => return,
    };

    if !(msg.is_group() && msg.sender_is_admin()) {
        reply_text(ctx, writer, &msg, "该指令仅群管理员可用。".to_string()).await;
        return;
    }

    let removed = store.purge_all();
    if let Err(e) = store.save().await {
        error!(target: "Insight", "清空后落盘失败: {}", e);
    }
    reply_text(ctx, writer, &msg, format!("已清空 {} 条用户画像。", removed)).await;
}

#[cfg(test)]
mod tests {
    use super::labels::PRIORITY_DEFAULT;
    use super::*;

    #[test]
    fn self_claim_flows_into_selected_label() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path().join("profiles.json"));
        let cfg = InsightsConfig::default();
        let now = 1_000_000;

        // 先有一个低优先级默认称呼
        store.add_label(
            "u1",
            &cfg.unknown_default_address,
            PRIORITY_DEFAULT,
            labels::LabelSource::Default,
            now,
            cfg.max_labels,
        );

        // "call me Max" 提升为本人强调
        for cand in extract::extract_self_claims("call me Max", cfg.label_min_chars, cfg.label_max_chars) {
            store.add_label("u1", &cand.text, cand.priority, cand.source, now + 1, cfg.max_labels);
        }

        assert_eq!(store.selected_label("u1").as_deref(), Some("Max"));
    }

    #[tokio::test]
    async fn unsupported_probe_degrades_to_name_guess_then_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path().join("profiles.json"));
        let cfg = InsightsConfig::default();

        // 名字无线索 → unknown
        let g = store::get_or_refresh(
            &store,
            "9",
            "路人",
            cfg.gender_ttl_secs(),
            cfg.unknown_ttl_secs(),
            || async { LookupResult::Unsupported },
        )
        .await;
        assert_eq!(g, Gender::Unknown);

        // 名字有线索 → 推测结果
        let g = store::get_or_refresh(
            &store,
            "10",
            "丽丽",
            cfg.gender_ttl_secs(),
            cfg.unknown_ttl_secs(),
            || async { LookupResult::Unsupported },
        )
        .await;
        assert_eq!(g, Gender::Female);
    }
}
