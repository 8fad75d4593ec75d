//! 负载均衡目标、目标列表与差分发射规则。
//!
//! # 教案式概览
//! - **意图（Why）**：刷新周期只在成员集合真正变化时通知订阅者，避免下游无谓地重建连接；
//! - **结构（How）**：目标以规范化的 `host:port` 为键；无实例时以单个哨兵目标表示，
//!   哨兵建立的连接在每次交互时都以 [`RSocketError::InstanceNotFound`] 失败；
//! - **契约（What）**：见 [`diff`]。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{
    StreamExt,
    future,
    stream::{self, BoxStream},
};
use spark_rsocket::{ConnectionId, Payload, PayloadStream, RSocket, RSocketError};

use crate::address::TransportAddress;

/// 哨兵目标键的前缀。
pub const NOT_FOUND_KEY_PREFIX: &str = "instance-not-found:";

/// 目标指向的端点。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetEndpoint {
    Address(TransportAddress),
    /// 逻辑服务当前没有实例。
    InstanceNotFound { service: String },
}

/// 负载均衡目标：规范化键加端点。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadBalanceTarget {
    key: String,
    endpoint: TargetEndpoint,
}

impl LoadBalanceTarget {
    pub fn new(key: impl Into<String>, address: TransportAddress) -> Self {
        Self {
            key: key.into(),
            endpoint: TargetEndpoint::Address(address),
        }
    }

    pub fn not_found(service: impl Into<String>) -> Self {
        let service = service.into();
        Self {
            key: format!("{NOT_FOUND_KEY_PREFIX}{service}"),
            endpoint: TargetEndpoint::InstanceNotFound { service },
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn endpoint(&self) -> &TargetEndpoint {
        &self.endpoint
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.endpoint, TargetEndpoint::InstanceNotFound { .. })
    }
}

/// 一次发射的目标列表，克隆为引用计数开销。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetList {
    targets: Arc<[LoadBalanceTarget]>,
}

impl TargetList {
    pub fn new(targets: Vec<LoadBalanceTarget>) -> Self {
        Self {
            targets: targets.into(),
        }
    }

    /// 仅含哨兵目标的列表。
    pub fn not_found(service: impl Into<String>) -> Self {
        Self::new(vec![LoadBalanceTarget::not_found(service)])
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_not_found(&self) -> bool {
        matches!(&*self.targets, [only] if only.is_not_found())
    }

    pub fn keys(&self) -> BTreeSet<&str> {
        self.targets.iter().map(LoadBalanceTarget::key).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LoadBalanceTarget> {
        self.targets.iter()
    }

    pub fn as_slice(&self) -> &[LoadBalanceTarget] {
        &self.targets
    }
}

impl<'a> IntoIterator for &'a TargetList {
    type Item = &'a LoadBalanceTarget;
    type IntoIter = std::slice::Iter<'a, LoadBalanceTarget>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// 差分结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diff {
    Emit(TargetList),
    Unchanged,
}

/// 比较新一轮发现结果与上一次发射。
///
/// - 新结果为空：上一次已是哨兵则不发射，否则发射单个哨兵；
/// - 键集合与上一次相同：不发射；
/// - 其余情况发射新列表（按键排序）。
pub fn diff(service: &str, previous: &TargetList, next: BTreeMap<String, LoadBalanceTarget>) -> Diff {
    if next.is_empty() {
        return if previous.is_not_found() {
            Diff::Unchanged
        } else {
            Diff::Emit(TargetList::not_found(service))
        };
    }

    let unchanged = previous.len() == next.len()
        && previous.iter().all(|target| next.contains_key(target.key()));
    if unchanged {
        Diff::Unchanged
    } else {
        Diff::Emit(TargetList::new(next.into_values().collect()))
    }
}

/// 哨兵目标建立的连接：每次交互都以“实例不存在”失败。
pub struct InstanceNotFoundRSocket {
    id: ConnectionId,
    service: String,
    disposed: AtomicBool,
}

impl InstanceNotFoundRSocket {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            id: ConnectionId::next(),
            service: service.into(),
            disposed: AtomicBool::new(false),
        }
    }

    fn error(&self) -> RSocketError {
        RSocketError::InstanceNotFound {
            address: self.service.clone(),
        }
    }
}

impl fmt::Debug for InstanceNotFoundRSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceNotFoundRSocket")
            .field("id", &self.id)
            .field("service", &self.service)
            .finish()
    }
}

#[async_trait]
impl RSocket for InstanceNotFoundRSocket {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn fire_and_forget(&self, _payload: Payload) -> Result<(), RSocketError> {
        Err(self.error())
    }

    async fn request_response(&self, _payload: Payload) -> Result<Payload, RSocketError> {
        Err(self.error())
    }

    fn request_stream(&self, _payload: Payload) -> PayloadStream {
        stream::once(future::ready(Err(self.error()))).boxed()
    }

    fn request_channel(&self, _payloads: BoxStream<'static, Payload>) -> PayloadStream {
        stream::once(future::ready(Err(self.error()))).boxed()
    }

    async fn metadata_push(&self, _payload: Payload) -> Result<(), RSocketError> {
        Err(self.error())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(keys: &[&str]) -> BTreeMap<String, LoadBalanceTarget> {
        keys.iter()
            .map(|key| {
                let address = TransportAddress::parse(&format!("tcp://{key}")).expect("address");
                (key.to_string(), LoadBalanceTarget::new(*key, address))
            })
            .collect()
    }

    #[test]
    fn identical_key_sets_do_not_emit() {
        let Diff::Emit(first) = diff("svc", &TargetList::default(), targets(&["a:1", "b:1"])) else {
            panic!("首次非空结果必须发射");
        };
        assert_eq!(diff("svc", &first, targets(&["b:1", "a:1"])), Diff::Unchanged);
    }

    #[test]
    fn empty_result_emits_sentinel_once() {
        let Diff::Emit(members) = diff("svc", &TargetList::default(), targets(&["a:1"])) else {
            panic!("expected emission");
        };
        let Diff::Emit(sentinel) = diff("svc", &members, BTreeMap::new()) else {
            panic!("非空到空必须发射哨兵");
        };
        assert!(sentinel.is_not_found());
        assert_eq!(sentinel.keys().into_iter().collect::<Vec<_>>(), ["instance-not-found:svc"]);
        assert_eq!(diff("svc", &sentinel, BTreeMap::new()), Diff::Unchanged);
    }

    #[test]
    fn initial_empty_result_emits_sentinel() {
        assert!(matches!(
            diff("svc", &TargetList::default(), BTreeMap::new()),
            Diff::Emit(list) if list.is_not_found()
        ));
    }

    #[tokio::test]
    async fn sentinel_connection_always_fails_with_logical_address() {
        let rsocket = InstanceNotFoundRSocket::new("user-service");
        let err = rsocket
            .request_response(Payload::from_data("ping"))
            .await
            .expect_err("哨兵连接必须失败");
        assert_eq!(
            err,
            RSocketError::InstanceNotFound {
                address: "user-service".to_owned()
            }
        );
        let streamed: Vec<_> = rsocket.request_stream(Payload::from_data("ping")).collect().await;
        assert_eq!(streamed, [Err(err)]);
    }
}
