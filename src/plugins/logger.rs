use crate::adapters::onebot::LockedWriter;
use crate::config::build_config;
use crate::event::{Context, EventType};
use crate::plugins::{PluginError, get_config};
use crate::{debug, info};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use simd_json::OwnedValue;
use simd_json::base::{ValueAsArray, ValueAsScalar};
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsScalar};
use toml::Value;

#[derive(Serialize, Deserialize)]
struct LoggerConfig {
    enabled: bool,
    #[serde(default)]
    debug: bool,
}

pub fn default_config() -> Value {
    build_config(LoggerConfig {
        enabled: true,
        debug: false,
    })
}

pub fn handle(
    ctx: Context,
    _writer: LockedWriter,
) -> BoxFuture<'static, Result<Option<Context>, PluginError>> {
    Box::pin(async move {
        let config: LoggerConfig = get_config(&ctx, "logger").unwrap_or(LoggerConfig {
            enabled: true,
            debug: false,
        });

        match &ctx.event {
            EventType::Onebot(ev) => {
                if config.debug {
                    debug!(target: "Logger", "ev: {:?}", ev);
                }

                if let Some(msg) = ctx.as_message() {
                    let content = format_message(ev.get("message"));
                    let sender = format!("{}({})", msg.sender_name(), msg.user_id());

                    if let Some(gid) = msg.group_id() {
                        info!(
                            target: "Chat",
                            "接收 <- 群聊 [Group({})] [{}] {}",
                            gid, sender, content
                        );
                    } else {
                        info!(
                            target: "Chat",
                            "接收 <- 私聊 [{}] {}",
                            sender, content
                        );
                    }
                } else if let Some(post_type) = ctx.post_type() {
                    debug!(target: "Event", "Type: {}", post_type);
                }
            }
            EventType::BeforeSend(packet) => {
                if packet.action == "send_msg" {
                    let params = &packet.params;
                    let content = format_message(params.get("message"));

                    match packet.message_type() {
                        Some("group") => {
                            let gid = packet.group_id().unwrap_or(0);
                            info!(
                                target: "Chat",
                                "发送 -> 群聊 [Group({})] {}",
                                gid, content
                            );
                        }
                        Some("private") => {
                            let uid = params
                                .get_i64("user_id")
                                .or_else(|| params.get_u64("user_id").map(|v| v as i64))
                                .unwrap_or(0);
                            info!(
                                target: "Chat",
                                "发送 -> 私聊 [User({})] {}",
                                uid, content
                            );
                        }
                        other => {
                            info!(
                                target: "Chat",
                                "发送 -> 未知 [{}] {}",
                                other.unwrap_or("?"), content
                            );
                        }
                    }
                } else {
                    debug!(target: "Bot", "Action: {}", packet.action);
                }
            }
            EventType::Init => {}
        }

        Ok(Some(ctx))
    })
}

/// 将 OneBot 消息链转换为人类可读的字符串
fn format_message(msg_val: Option<&OwnedValue>) -> String {
    let val = match msg_val {
        Some(v) => v,
        None => return String::new(),
    };

    // 纯字符串消息
    if let Some(s) = val.as_str() {
        return s.to_string();
    }

    // 消息段数组
    if let Some(arr) = val.as_array() {
        let mut result = String::new();
        for seg in arr {
            let type_ = seg.get_str("type").unwrap_or("unknown");
            let data = seg.get("data");

            match type_ {
                "text" => {
                    if let Some(t) = data.and_then(|d| d.get_str("text")) {
                        result.push_str(t);
                    }
                }
                "at" => {
                    let qq = data
                        .and_then(|d| {
                            d.get_str("qq")
                                .map(|s| s.to_string())
                                .or_else(|| d.get_i64("qq").map(|i| i.to_string()))
                                .or_else(|| d.get_u64("qq").map(|i| i.to_string()))
                        })
                        .unwrap_or_else(|| "Unknown".to_string());
                    result.push_str(&format!(" [@{}] ", qq));
                }
                "face" => result.push_str(" [表情] "),
                "image" => result.push_str(" [图片] "),
                "record" => result.push_str(" [语音] "),
                "reply" => result.push_str(" [回复] "),
                other => result.push_str(&format!(" [{}] ", other)),
            }
        }
        return result;
    }

    "[复杂消息]".to_string()
}
