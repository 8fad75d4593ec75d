use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    attributes::PeerInfo,
    error::RSocketError,
    payload::{MimeType, Payload},
};

/// 响应流：逐条产出载荷或以错误终止。
pub type PayloadStream = BoxStream<'static, Result<Payload, RSocketError>>;

/// 进程内唯一的连接标识，用作对端信息缓存的键。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// 分配新的连接标识。
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        ConnectionId(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// RSocket 请求端合约。
///
/// # 教案式说明
/// - **意图（Why）**：拦截包装、连接注册表与负载均衡器都以同一抽象组合，
///   调用方拿到的永远是 `Arc<dyn RSocket>`，无需知道背后是直连、拦截还是均衡；
/// - **契约（What）**：
///   - `fire_and_forget` / `request_response` / `metadata_push` 为单值交互；
///   - `request_stream` / `request_channel` 返回惰性流，订阅（首次轮询）之前不产生任何副作用；
///   - `resolve_peer` 由具体传输实现，默认不可解析；
///   - `dispose` 幂等，之后 `is_disposed` 返回 `true`。
/// - **风险提示（Trade-offs）**：流式方法为同步签名，订阅时机完全由调用方掌控。
#[async_trait]
pub trait RSocket: Send + Sync + 'static {
    fn id(&self) -> ConnectionId;

    fn data_mime_type(&self) -> MimeType {
        MimeType::APPLICATION_JSON
    }

    fn metadata_mime_type(&self) -> MimeType {
        MimeType::COMPOSITE_METADATA
    }

    /// 解析远端端点；失败或不可知时返回 `Ok(None)` 或错误，由调用方决定是否缓存。
    async fn resolve_peer(&self) -> Result<Option<PeerInfo>, RSocketError> {
        Ok(None)
    }

    async fn fire_and_forget(&self, payload: Payload) -> Result<(), RSocketError>;

    async fn request_response(&self, payload: Payload) -> Result<Payload, RSocketError>;

    fn request_stream(&self, payload: Payload) -> PayloadStream;

    fn request_channel(&self, payloads: BoxStream<'static, Payload>) -> PayloadStream;

    async fn metadata_push(&self, payload: Payload) -> Result<(), RSocketError>;

    fn is_disposed(&self) -> bool;

    fn dispose(&self);
}
