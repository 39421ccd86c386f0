use crate::event::Event;
use simd_json::derived::ValueObjectAccessAsScalar;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, oneshot};

/// API 响应匹配器
///
/// OneBot 的 API 调用与响应共用同一条 WebSocket 连接，请求方通过
/// echo 字段关联响应帧。调用方先注册等待者再发请求，响应到达时由
/// dispatch 唤醒对应的 oneshot。
pub struct Matcher {
    waiters: AsyncMutex<Vec<Waiter>>,
}

struct Waiter {
    echo: String,
    sender: oneshot::Sender<Event>,
}

impl Matcher {
    pub fn new() -> Self {
        Self {
            waiters: AsyncMutex::new(Vec::new()),
        }
    }

    /// 注册一个响应等待者，超时返回 None
    pub async fn wait_resp(&self, echo: String, timeout_duration: Duration) -> Option<Event> {
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.waiters.lock().await;
            guard.push(Waiter { echo, sender: tx });
        }

        match tokio::time::timeout(timeout_duration, rx).await {
            Ok(Ok(event)) => Some(event),
            _ => None,
        }
    }

    /// 尝试把事件分发给等待者。若被消费返回 None，否则返还原事件。
    pub async fn dispatch(&self, event: Event) -> Option<Event> {
        let echo = match event.get_str("echo") {
            Some(e) => e.to_string(),
            // 普通事件没有 echo 字段，直接放行进入插件流水线
            None => return Some(event),
        };

        let mut guard = self.waiters.lock().await;
        let index = guard.iter().position(|w| w.echo == echo);

        if let Some(idx) = index {
            let waiter = guard.remove(idx);
            // 等待者可能已超时退出，发送失败可忽略
            let _ = waiter.sender.send(event);
            None
        } else {
            Some(event)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_event(json: &str) -> Event {
        let mut bytes = json.as_bytes().to_vec();
        simd_json::to_owned_value(&mut bytes).unwrap()
    }

    #[tokio::test]
    async fn dispatch_passes_through_plain_events() {
        let matcher = Matcher::new();
        let ev = make_event(r#"{"post_type":"message","user_id":1}"#);
        assert!(matcher.dispatch(ev).await.is_some());
    }

    #[tokio::test]
    async fn response_wakes_matching_waiter() {
        let matcher = std::sync::Arc::new(Matcher::new());

        let m = matcher.clone();
        let waiting =
            tokio::spawn(
                async move { m.wait_resp("req-1".to_string(), Duration::from_secs(2)).await },
            );

        // 等待者注册完毕后再分发
        tokio::time::sleep(Duration::from_millis(50)).await;
        let resp = make_event(r#"{"retcode":0,"echo":"req-1"}"#);
        assert!(matcher.dispatch(resp).await.is_none());

        let got = waiting.await.unwrap().unwrap();
        assert_eq!(got.get_str("echo"), Some("req-1"));
    }

    #[tokio::test]
    async fn unmatched_echo_is_returned() {
        let matcher = Matcher::new();
        let resp = make_event(r#"{"retcode":0,"echo":"nobody-waiting"}"#);
        assert!(matcher.dispatch(resp).await.is_some());
    }
}
