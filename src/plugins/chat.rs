use crate::adapters::onebot::{LockedWriter, send_msg};
use crate::command::match_command;
use crate::config::build_config;
use crate::event::Context;
use crate::message::Message;
use crate::plugins::user_insights::{self, compose, config::InsightsConfig, store::ProfileStore};
use crate::plugins::{PluginError, get_config};
use crate::{error, warn};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use toml::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub enabled: bool,
    /// 触发指令名（配合全局前缀使用，如 /chat 你好）
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default)]
    pub api_base: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_command() -> String {
    "chat".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_system_prompt() -> String {
    "你是一个乐于助人的群聊助手，回答保持简短。".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_command(),
            api_base: String::new(),
            api_key: String::new(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

pub fn default_config() -> Value {
    build_config(ChatConfig::default())
}

pub fn handle(
    ctx: Context,
    writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let cfg: ChatConfig = get_config(&ctx, "chat").unwrap_or_default();

        let cmd = match match_command(&ctx, &cfg.command) {
            Some(c) => c,
            None => return Ok(Some(ctx)),
        };
        let msg = match ctx.as_message() {
            Some(m) => m,
            None => return Ok(Some(ctx)),
        };

        let group_id = msg.group_id();
        let user_id = msg.user_id();
        let message_id = msg.message_id();
        let sender_name = msg.sender_name().to_string();

        let reply = |text: String| {
            let ctx = ctx.clone();
            let writer = writer.clone();
            async move {
                let out = Message::new().reply(message_id).text(text);
                let _ = send_msg(&ctx, writer, group_id, Some(user_id), out).await;
            }
        };

        let prompt = cmd.args_text();
        if prompt.is_empty() {
            reply("💬 请输入内容".to_string()).await;
            return Ok(None);
        }

        if cfg.api_base.is_empty() || cfg.api_key.is_empty() {
            reply("❌ API 未配置".to_string()).await;
            return Ok(None);
        }

        // 出站请求注入用户标注（画像插件未启用时退化为纯系统提示词）
        let annotation = match ctx.states.get::<ProfileStore>() {
            Some(store) => {
                let insights_cfg: InsightsConfig =
                    get_config(&ctx, "user_insights").unwrap_or_default();
                let gender = user_insights::resolve_gender(
                    &ctx,
                    writer.clone(),
                    &store,
                    &insights_cfg,
                    user_id,
                    group_id,
                    &sender_name,
                )
                .await;
                compose::annotate(
                    &store,
                    &user_id.to_string(),
                    &sender_name,
                    gender,
                    &insights_cfg,
                )
            }
            None => String::new(),
        };

        let system_prompt = if annotation.is_empty() {
            cfg.system_prompt.clone()
        } else {
            format!("{}\n\n{}", annotation, cfg.system_prompt)
        };

        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_base(cfg.api_base.clone())
                .with_api_key(cfg.api_key.clone()),
        );

        let msgs: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .unwrap()
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .unwrap()
                .into(),
        ];

        let req = match CreateChatCompletionRequestArgs::default()
            .model(&cfg.model)
            .messages(msgs)
            .build()
        {
            Ok(r) => r,
            Err(e) => {
                error!(target: "Chat", "请求构建失败: {}", e);
                reply("❌ 请求构建失败".to_string()).await;
                return Ok(None);
            }
        };

        match tokio::time::timeout(
            Duration::from_secs(cfg.request_timeout_secs),
            client.chat().create(req),
        )
        .await
        {
            Ok(Ok(resp)) => {
                let content = resp
                    .choices
                    .first()
                    .and_then(|c| c.message.content.clone())
                    .unwrap_or_else(|| "[空回复]".to_string());
                reply(content).await;
            }
            Ok(Err(e)) => {
                error!(target: "Chat", "模型调用失败: {}", e);
                reply("❌ 模型调用失败，请稍后重试".to_string()).await;
            }
            Err(_) => {
                warn!(target: "Chat", "模型响应超时 ({}s)", cfg.request_timeout_secs);
                reply("⏳ 请求超时，已停止等待".to_string()).await;
            }
        }

        Ok(None)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ChatConfig::default();
        assert_eq!(cfg.command, "chat");
        assert!(cfg.api_base.is_empty());
        assert_eq!(cfg.request_timeout_secs, 120);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: ChatConfig =
            toml::from_str("enabled = true\napi_base = \"https://example.com/v1\"\n").unwrap();
        assert_eq!(cfg.api_base, "https://example.com/v1");
        assert_eq!(cfg.model, "gpt-4o");
    }
}
