//! 连接级对端信息缓存。
//!
//! # 教案式概览
//! - **意图（Why）**：解析远端端点往往需要系统调用或握手内省，每次交互都解析代价过高；
//! - **结构（How）**：以 [`ConnectionId`] 为键的 `DashMap`，值为 `tokio::sync::OnceCell`，
//!   并发的首次访问只会触发一次解析，其余调用等待同一结果；
//! - **契约（What）**：
//!   - 缓存不持有连接本身，条目生命周期由连接释放时的 [`PeerInfoCache::evict`] 显式结束；
//!   - 解析失败记录告警并缓存为“无”，不会在后续调用中重试，也不会让调用失败。

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::{
    attributes::PeerInfo,
    rsocket::{ConnectionId, RSocket},
};

type PeerSlot = Arc<OnceCell<Option<Arc<PeerInfo>>>>;

#[derive(Debug, Default)]
pub struct PeerInfoCache {
    entries: DashMap<ConnectionId, PeerSlot>,
}

impl PeerInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取缓存；首次访问时通过 [`RSocket::resolve_peer`] 解析并写入。
    pub async fn get_or_resolve(&self, rsocket: &dyn RSocket) -> Option<Arc<PeerInfo>> {
        let id = rsocket.id();
        let slot = Arc::clone(&self.entries.entry(id).or_default());
        slot.get_or_init(|| async move {
            match rsocket.resolve_peer().await {
                Ok(peer) => {
                    debug!(target: "spark.rsocket.peer", connection = %id, resolved = peer.is_some(), "peer info cached");
                    peer.map(Arc::new)
                }
                Err(err) => {
                    warn!(
                        target: "spark.rsocket.peer",
                        connection = %id,
                        code = err.code(),
                        error = %err,
                        "peer info unavailable, caching empty result"
                    );
                    None
                }
            }
        })
        .await
        .clone()
    }

    /// 仅查看已解析的结果，不触发解析。
    pub fn get(&self, id: ConnectionId) -> Option<Arc<PeerInfo>> {
        self.entries
            .get(&id)
            .and_then(|slot| slot.get().cloned().flatten())
    }

    /// 连接释放时移除条目，返回是否存在。
    pub fn evict(&self, id: ConnectionId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::RSocketError, test_stubs::StubRSocket};
    use tracing_test::traced_test;

    #[tokio::test]
    async fn resolves_at_most_once_per_connection() {
        let cache = PeerInfoCache::new();
        let rsocket = StubRSocket::new().with_peer(PeerInfo::new("10.1.0.3", 7000));

        let first = cache.get_or_resolve(&rsocket).await;
        let second = cache.get_or_resolve(&rsocket).await;

        assert_eq!(first.as_deref(), Some(&PeerInfo::new("10.1.0.3", 7000)));
        assert_eq!(first, second);
        assert_eq!(rsocket.peer_resolutions(), 1, "第二次访问必须命中缓存");
    }

    #[tokio::test]
    #[traced_test]
    async fn failure_is_cached_as_none() {
        let cache = PeerInfoCache::new();
        let rsocket = StubRSocket::new()
            .with_peer_error(RSocketError::transport("resolve_peer", "socket closed"));

        assert!(cache.get_or_resolve(&rsocket).await.is_none());
        assert!(cache.get_or_resolve(&rsocket).await.is_none());
        assert_eq!(rsocket.peer_resolutions(), 1);
        assert_eq!(cache.len(), 1);
        assert!(logs_contain("peer info unavailable"));
    }

    #[tokio::test]
    async fn evict_forgets_the_connection() {
        let cache = PeerInfoCache::new();
        let rsocket = StubRSocket::new().with_peer(PeerInfo::new("host-a", 9000));
        cache.get_or_resolve(&rsocket).await;
        assert!(cache.get(rsocket.id()).is_some());

        assert!(cache.evict(rsocket.id()));
        assert!(!cache.evict(rsocket.id()));
        assert!(cache.is_empty());
    }
}
