use chrono::{DateTime, Local, TimeZone};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;

/// 全局定时任务管理器
///
/// 所有后台任务的句柄都登记在此，shutdown 时统一撤销，
/// 避免游离任务在进程退出阶段继续触碰共享状态。
pub struct Scheduler {
    tasks: Mutex<HashMap<u64, AbortHandle>>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 添加一个灵活调度任务
    ///
    /// `next_run_calculator` 接收当前时间，返回下一次执行时间；
    /// 返回 None 时任务结束。
    pub fn add_schedule<C, F, Fut>(&self, mut next_run_calculator: C, mut task_gen: F) -> u64
    where
        C: FnMut(DateTime<Local>) -> Option<DateTime<Local>> + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // 首次计算执行时间
        let mut next_time = next_run_calculator(Local::now());

        let handle = tokio::spawn(async move {
            while let Some(target_time) = next_time {
                let now = Local::now();

                if target_time > now {
                    let duration = (target_time - now)
                        .to_std()
                        .unwrap_or(Duration::from_millis(0));
                    tokio::time::sleep(duration).await;
                }

                task_gen().await;

                next_time = next_run_calculator(Local::now());
            }
        });

        let abort_handle = handle.abort_handle();
        self.tasks.lock().unwrap().insert(id, abort_handle);
        id
    }

    /// 固定间隔执行
    pub fn add_interval<F, Fut>(&self, duration: Duration, task_gen: F) -> u64
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_schedule(
            move |now| Some(now + chrono::Duration::from_std(duration).unwrap()),
            task_gen,
        )
    }

    /// 每天特定时间执行 (HH:MM:SS)
    pub fn add_daily_at<F, Fut>(&self, hour: u32, minute: u32, second: u32, task_gen: F) -> u64
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_schedule(
            move |now| {
                let today = now.date_naive();
                let target_today = today
                    .and_hms_opt(hour, minute, second)
                    .and_then(|t| Local.from_local_datetime(&t).single());

                if let Some(target) = target_today
                    && target > now
                {
                    return Some(target);
                }

                // 今天已经过了，或是无效时间（如夏令时跳变），定在明天
                let tomorrow = today.succ_opt()?;
                tomorrow
                    .and_hms_opt(hour, minute, second)
                    .and_then(|t| Local.from_local_datetime(&t).single())
            },
            task_gen,
        )
    }

    pub fn remove(&self, id: u64) {
        if let Some(handle) = self.tasks.lock().unwrap().remove(&id) {
            handle.abort();
        }
    }

    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }
}

/// 解析 "HH:MM:SS" 形式的时间串
pub fn parse_hms(s: &str) -> Option<(u32, u32, u32)> {
    let mut parts = s.split(':');
    let h: u32 = parts.next()?.trim().parse().ok()?;
    let m: u32 = parts.next()?.trim().parse().ok()?;
    let sec: u32 = parts.next().unwrap_or("0").trim().parse().ok()?;
    if parts.next().is_some() || h > 23 || m > 59 || sec > 59 {
        return None;
    }
    Some((h, m, sec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn parse_hms_accepts_valid_times() {
        assert_eq!(parse_hms("04:30:00"), Some((4, 30, 0)));
        assert_eq!(parse_hms("23:59:59"), Some((23, 59, 59)));
        assert_eq!(parse_hms("12:00"), Some((12, 0, 0)));
    }

    #[test]
    fn parse_hms_rejects_garbage() {
        assert_eq!(parse_hms("24:00:00"), None);
        assert_eq!(parse_hms("aa:bb:cc"), None);
        assert_eq!(parse_hms(""), None);
        assert_eq!(parse_hms("1:2:3:4"), None);
    }

    #[tokio::test]
    async fn interval_task_runs_and_stops_on_remove() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        let id = scheduler.add_interval(Duration::from_millis(20), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(90)).await;
        scheduler.remove(id);
        let seen = counter.load(Ordering::SeqCst);
        assert!(seen >= 2, "任务应当至少触发两次, 实际 {}", seen);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn shutdown_aborts_all_tasks() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let c = counter.clone();
            scheduler.add_interval(Duration::from_millis(15), move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown();
        let seen = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }
}
