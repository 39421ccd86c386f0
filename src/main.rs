mod adapters;
mod command;
mod config;
mod event;
#[macro_use]
mod log;
mod matcher;
mod message;
mod plugins;
mod scheduler;
mod state;

use config::AppConfig;
use event::{BotStatus, Context, EventType};
use matcher::Matcher;
use scheduler::Scheduler;
use state::StateRegistry;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex as AsyncMutex;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // 1. 加载配置（缺失则生成默认文件）
    let mut app_config = match tokio::fs::read_to_string(CONFIG_PATH).await {
        Ok(content) => match toml::from_str::<AppConfig>(&content) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!(target: "System", "config.toml 解析失败，使用默认配置: {}", e);
                AppConfig::default()
            }
        },
        Err(_) => {
            info!(target: "System", "未找到 config.toml，生成默认配置");
            AppConfig::default()
        }
    };

    // 补齐缺失的插件默认配置项（新插件首次运行时落入文件）
    for plugin in plugins::get_plugins() {
        app_config
            .plugins
            .entry(plugin.name.to_string())
            .or_insert_with(plugin.default_config);
    }
    app_config.save(CONFIG_PATH).await?;

    // 2. 构造共享运行环境
    let config = Arc::new(RwLock::new(app_config));
    let save_lock = Arc::new(AsyncMutex::new(()));
    let states = Arc::new(StateRegistry::new());
    let scheduler = Arc::new(Scheduler::new());

    let init_ctx = Context {
        event: EventType::Init,
        config: config.clone(),
        config_save_lock: save_lock.clone(),
        states: states.clone(),
        scheduler: scheduler.clone(),
        matcher: Arc::new(Matcher::new()),
        config_path: CONFIG_PATH.to_string(),
        bot: BotStatus::default(),
    };

    // 3. 插件初始化
    plugins::do_init(init_ctx.clone()).await?;

    // 4. 启动启用的 Bot 适配器
    let bots = { config.read().unwrap().bots.clone() };
    let mut spawned = 0;
    for bot in bots.into_iter().filter(|b| b.enabled) {
        match adapters::find_adapter(&bot.protocol) {
            Some(adapter) => {
                info!(target: "System", "启动适配器: {}", bot.protocol);
                tokio::spawn((adapter.handler)(
                    bot,
                    config.clone(),
                    states.clone(),
                    scheduler.clone(),
                    save_lock.clone(),
                    CONFIG_PATH.to_string(),
                ));
                spawned += 1;
            }
            None => warn!(target: "System", "未知协议，已跳过: {}", bot.protocol),
        }
    }

    if spawned == 0 {
        warn!(target: "System", "没有启用任何 Bot，请检查 config.toml 的 [[bots]] 配置");
    }

    // 5. 等待退出信号，按序收尾：先插件落盘，再撤销后台任务
    tokio::signal::ctrl_c().await?;
    info!(target: "System", "收到退出信号，正在收尾...");
    plugins::do_shutdown(init_ctx).await;
    scheduler.shutdown();
    info!(target: "System", "已退出");
    Ok(())
}
