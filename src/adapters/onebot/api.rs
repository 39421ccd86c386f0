#![allow(dead_code)]

// 引用同模块下的工具函数
use super::{LockedWriter, send_frame_raw};
use crate::event::Context;
use serde::{Deserialize, Serialize};
use simd_json::OwnedValue;
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsScalar};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub type ApiError = Box<dyn std::error::Error + Send + Sync>;

static ECHO_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_echo() -> String {
    let count = ECHO_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("api-req-{}", count)
}

#[derive(Serialize)]
struct ApiRequest<T> {
    action: String,
    params: T,
    echo: String,
}

/// 通用 API 调用函数
pub async fn call_action<P, R>(
    ctx: &Context,
    writer: LockedWriter,
    action: &str,
    params: P,
) -> Result<R, ApiError>
where
    P: Serialize,
    R: serde::de::DeserializeOwned,
{
    let echo = next_echo();
    let req = ApiRequest {
        action: action.to_string(),
        params,
        echo: echo.clone(),
    };

    let json_str = simd_json::to_string(&req)?;

    // 先注册监听再发请求，避免响应先于等待者到达
    let wait_future = ctx.matcher.wait_resp(echo, Duration::from_secs(30));

    send_frame_raw(writer, json_str).await?;

    let resp_event = wait_future.await.ok_or("API 请求超时")?;

    // 响应格式: { status, retcode, data, echo }
    let retcode = resp_event
        .get_i64("retcode")
        .or_else(|| resp_event.get_u64("retcode").map(|v| v as i64))
        .unwrap_or(-1);

    if retcode != 0 {
        let msg = resp_event.get_str("msg").unwrap_or("Unknown Error");
        return Err(format!("API 调用失败 (retcode={}): {}", retcode, msg).into());
    }

    let data_val = resp_event
        .get("data")
        .cloned()
        .unwrap_or(OwnedValue::from(()));

    let data: R = simd_json::serde::from_owned_value(data_val)?;

    Ok(data)
}

// ================= API 定义 =================

// --- get_login_info ---

#[derive(Serialize)]
struct GetLoginInfoParams {}

#[derive(Debug, Deserialize)]
pub struct LoginInfo {
    pub user_id: i64,
    pub nickname: String,
}

pub async fn get_login_info(ctx: &Context, writer: LockedWriter) -> Result<LoginInfo, ApiError> {
    call_action(ctx, writer, "get_login_info", GetLoginInfoParams {}).await
}

// --- get_group_member_info ---

#[derive(Serialize)]
struct GetGroupMemberInfoParams {
    group_id: i64,
    user_id: i64,
    #[serde(default)]
    no_cache: bool,
}

#[derive(Debug, Deserialize)]
pub struct GroupMemberInfo {
    pub group_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub card: String,
    /// "male", "female", or "unknown"
    #[serde(default)]
    pub sex: String,
    /// "owner", "admin", or "member"
    #[serde(default)]
    pub role: String,
}

pub async fn get_group_member_info(
    ctx: &Context,
    writer: LockedWriter,
    group_id: i64,
    user_id: i64,
    no_cache: bool,
) -> Result<GroupMemberInfo, ApiError> {
    let params = GetGroupMemberInfoParams {
        group_id,
        user_id,
        no_cache,
    };
    call_action(ctx, writer, "get_group_member_info", params).await
}

// --- get_group_member_list ---

#[derive(Serialize)]
struct GetGroupMemberListParams {
    group_id: i64,
}

pub async fn get_group_member_list(
    ctx: &Context,
    writer: LockedWriter,
    group_id: i64,
) -> Result<Vec<GroupMemberInfo>, ApiError> {
    call_action(
        ctx,
        writer,
        "get_group_member_list",
        GetGroupMemberListParams { group_id },
    )
    .await
}

// --- get_stranger_info ---

#[derive(Serialize)]
struct GetStrangerInfoParams {
    user_id: i64,
    #[serde(default)]
    no_cache: bool,
}

#[derive(Debug, Deserialize)]
pub struct StrangerInfo {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    /// "male", "female", or "unknown"
    #[serde(default)]
    pub sex: String,
}

pub async fn get_stranger_info(
    ctx: &Context,
    writer: LockedWriter,
    user_id: i64,
    no_cache: bool,
) -> Result<StrangerInfo, ApiError> {
    let params = GetStrangerInfoParams { user_id, no_cache };
    call_action(ctx, writer, "get_stranger_info", params).await
}

// --- get_group_list ---

#[derive(Serialize)]
struct GetGroupListParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    no_cache: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct GroupInfo {
    pub group_id: i64,
    #[serde(default)]
    pub group_name: String,
    pub member_count: Option<i32>,
    pub max_member_count: Option<i32>,
}

pub async fn get_group_list(
    ctx: &Context,
    writer: LockedWriter,
    no_cache: bool,
) -> Result<Vec<GroupInfo>, ApiError> {
    call_action(
        ctx,
        writer,
        "get_group_list",
        GetGroupListParams {
            no_cache: Some(no_cache),
        },
    )
    .await
}
