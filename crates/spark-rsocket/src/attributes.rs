//! 单次交互的属性袋与对端信息。
//!
//! # 教案式概览
//! - **意图（Why）**：拦截器之间需要在 Before 与 After 之间传递状态（计时起点、鉴权主体、路由），
//!   又不能让应用层感知，因此每次交互创建一个以字符串为键的属性袋；
//! - **结构（How）**：[`Attributes`] 是 `Arc<Mutex<HashMap>>` 的薄句柄，同一交互的各个 Exchange 共享同一实例；
//! - **契约（What）**：属性袋由一次进行中的交互独占，交互释放后会被清空，不会泄露到下一次调用。

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

/// 框架保留的属性键。
pub mod keys {
    /// 已解析的对端信息，值类型为 [`PeerInfo`](super::PeerInfo)。
    pub const PEER_INFO: &str = "spark.rsocket.peer";
    /// 交互目标路由，值类型为 `String`。
    pub const ROUTE: &str = "spark.rsocket.route";
}

type AttributeValue = Arc<dyn Any + Send + Sync>;

/// 每次交互独立创建的可变属性袋。
#[derive(Clone, Default)]
pub struct Attributes {
    entries: Arc<Mutex<HashMap<Cow<'static, str>, AttributeValue>>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入属性，返回是否覆盖了旧值。
    pub fn insert<T>(&self, key: impl Into<Cow<'static, str>>, value: T) -> bool
    where
        T: Any + Send + Sync,
    {
        self.insert_shared(key, Arc::new(value))
    }

    /// 写入已共享的值，避免重复分配。
    pub fn insert_shared<T>(&self, key: impl Into<Cow<'static, str>>, value: Arc<T>) -> bool
    where
        T: Any + Send + Sync,
    {
        self.entries
            .lock()
            .insert(key.into(), value as AttributeValue)
            .is_some()
    }

    /// 按键读取并向下转型；类型不匹配时视为不存在。
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = self.entries.lock().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// 当前键集合（无序）。
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .keys()
            .map(|key| key.clone().into_owned())
            .collect()
    }

    /// 丢弃全部属性，交互释放时调用。
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attributes")
            .field("keys", &self.keys())
            .finish()
    }
}

/// 已解析的远端端点。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerInfo {
    pub host: String,
    pub port: u16,
}

impl PeerInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<SocketAddr> for PeerInfo {
    fn from(addr: SocketAddr) -> Self {
        PeerInfo::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_lookup_rejects_mismatched_types() {
        let attributes = Attributes::new();
        attributes.insert(keys::ROUTE, String::from("user.find"));
        assert_eq!(
            attributes.get::<String>(keys::ROUTE).as_deref().map(String::as_str),
            Some("user.find")
        );
        assert!(attributes.get::<u64>(keys::ROUTE).is_none());
    }

    #[test]
    fn clones_share_the_same_bag() {
        let attributes = Attributes::new();
        let view = attributes.clone();
        assert!(!view.insert("tenant", 7_u32));
        assert!(attributes.insert("tenant", 8_u32));
        assert_eq!(attributes.get::<u32>("tenant").as_deref(), Some(&8));
        view.clear();
        assert!(attributes.is_empty());
    }

    #[test]
    fn peer_info_from_socket_addr() {
        let addr: SocketAddr = "10.0.0.7:7000".parse().expect("literal socket address");
        let peer = PeerInfo::from(addr);
        assert_eq!(peer.to_string(), "10.0.0.7:7000");
    }
}
