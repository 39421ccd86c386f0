use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// 类型化共享状态注册表
///
/// 插件在 on_init 阶段将自己的状态对象注册进来，之后的事件处理
/// 通过 Context 按类型取回。整个进程只有一个实例，由 main 构造并
/// 随 Context 传递，插件之间不再依赖任何全局单例。
#[derive(Default)]
pub struct StateRegistry {
    inner: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册（或替换）一个状态对象
    pub fn set<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        self.inner
            .write()
            .unwrap()
            .insert(TypeId::of::<T>(), value);
    }

    /// 按类型取回状态对象
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner
            .read()
            .unwrap()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(i64);

    #[test]
    fn set_then_get_returns_same_value() {
        let reg = StateRegistry::new();
        reg.set(Arc::new(Counter(42)));
        let got = reg.get::<Counter>().unwrap();
        assert_eq!(got.0, 42);
    }

    #[test]
    fn get_unregistered_type_is_none() {
        let reg = StateRegistry::new();
        assert!(reg.get::<Counter>().is_none());
    }

    #[test]
    fn set_replaces_previous_value() {
        let reg = StateRegistry::new();
        reg.set(Arc::new(Counter(1)));
        reg.set(Arc::new(Counter(2)));
        assert_eq!(reg.get::<Counter>().unwrap().0, 2);
    }
}
