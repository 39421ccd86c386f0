use super::config::InsightsConfig;
use super::store::{Gender, ProfileStore};
use crate::adapters::onebot::{LockedWriter, api};
use crate::event::Context;
use crate::{info, warn};
use std::time::Duration;

/// 批量刷新的统计结果
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanReport {
    pub groups: usize,
    pub members: usize,
    pub male: usize,
    pub female: usize,
    pub unknown: usize,
    pub failed_groups: usize,
}

impl ScanReport {
    pub fn summary(&self) -> String {
        format!(
            "已刷新 {} 个群 / {} 名成员：男性 {}，女性 {}，未知 {}{}",
            self.groups,
            self.members,
            self.male,
            self.female,
            self.unknown,
            if self.failed_groups > 0 {
                format!("（{} 个群拉取失败）", self.failed_groups)
            } else {
                String::new()
            }
        )
    }
}

/// 刷新单个群的全部成员属性
///
/// 一次成员列表调用覆盖全群，结果按成员写回缓存。
pub async fn rescan_group(
    ctx: &Context,
    writer: LockedWriter,
    store: &ProfileStore,
    cfg: &InsightsConfig,
    group_id: i64,
    report: &mut ScanReport,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let members = tokio::time::timeout(
        Duration::from_secs(cfg.lookup_timeout_secs),
        api::get_group_member_list(ctx, writer, group_id),
    )
    .await
    .map_err(|_| "成员列表查询超时")??;

    let now = chrono::Local::now().timestamp();
    for member in &members {
        let gender = Gender::from_onebot(&member.sex);
        store.set_gender(&member.user_id.to_string(), gender, now);
        match gender {
            Gender::Male => report.male += 1,
            Gender::Female => report.female += 1,
            Gender::Unknown => report.unknown += 1,
        }
    }

    report.groups += 1;
    report.members += members.len();
    Ok(())
}

/// 刷新 Bot 所在的所有群
///
/// 相邻群之间等待一段时间以尊重平台限流；单个群失败只计数，
/// 不会中断整轮扫描。
pub async fn rescan_all(
    ctx: &Context,
    writer: LockedWriter,
    store: &ProfileStore,
    cfg: &InsightsConfig,
) -> ScanReport {
    let mut report = ScanReport::default();

    let groups = match tokio::time::timeout(
        Duration::from_secs(cfg.lookup_timeout_secs),
        api::get_group_list(ctx, writer.clone(), false),
    )
    .await
    {
        Ok(Ok(list)) => list,
        Ok(Err(e)) => {
            warn!(target: "Insight", "群列表拉取失败，跳过本轮扫描: {}", e);
            return report;
        }
        Err(_) => {
            warn!(target: "Insight", "群列表拉取超时，跳过本轮扫描");
            return report;
        }
    };

    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(cfg.scan_group_delay_ms)).await;
        }

        if let Err(e) =
            rescan_group(ctx, writer.clone(), store, cfg, group.group_id, &mut report).await
        {
            report.failed_groups += 1;
            warn!(
                target: "Insight",
                "[Group({})] 成员刷新失败: {}",
                group.group_id, e
            );
        }
    }

    info!(target: "Insight", "{}", report.summary());
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_mentions_failures_only_when_present() {
        let mut report = ScanReport {
            groups: 2,
            members: 10,
            male: 4,
            female: 3,
            unknown: 3,
            failed_groups: 0,
        };
        assert!(!report.summary().contains("失败"));

        report.failed_groups = 1;
        assert!(report.summary().contains("1 个群拉取失败"));
    }
}
