//! # intercepted：为单个物理连接织入拦截链
//!
//! ## 核心意图（Why）
//! - 五种交互与 SETUP 在形状上完全一致：获取属性袋、执行 Before 链、委托底层、按结果释放；
//! - 释放阶段必须覆盖完成、失败与取消三种终态，并且每次交互至多执行一次。
//!
//! ## 流程（How）
//! 1. **获取**：新建属性袋，经 [`PeerInfoCache`] 写入对端信息，按需抽取路由；
//! 2. **使用**：构造 Exchange 并运行 Before 链，成功后才调用底层连接；Before 失败时底层不会被调用；
//! 3. **释放**：由 [`Release`] 守卫负责：
//!    - 完成 → 完成态 Exchange 走 After 链；
//!    - 失败 → 携带失败原因的 Exchange 依次走 After 链与 Unexpected 链；
//!    - 取消（Future 或流在终态前被丢弃）→ 守卫在 `Drop` 中把完成态 Exchange 交给 After 链，
//!      再以 [`RSocketError::Cancelled`] 走 Unexpected 链，由当前 Tokio 运行时异步执行。
//!
//! ## 契约（What）
//! - After 钩子的错误不会被吞掉：它会替换交互结果返回给调用方，原始失败记录为告警；
//! - Unexpected 钩子的错误只记录告警，不改变交互结果；
//! - 流式交互在首次轮询前没有任何副作用；请求通道的 Before 链由首条上行消息触发，且只触发一次；
//! - 释放后属性袋被清空。
//!
//! ## 风险提示（Trade-offs）
//! - 取消路径依赖 `tokio::runtime::Handle::try_current`；若丢弃发生在运行时之外，只能记录告警并跳过钩子。

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{
    StreamExt,
    future,
    stream::{self, BoxStream},
};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::{
    attributes::{Attributes, PeerInfo, keys},
    error::RSocketError,
    exchange::Exchange,
    kind::InteractionKind,
    payload::{MimeType, Payload},
    peer::PeerInfoCache,
    pipeline::{InterceptorChains, RouteExtractor},
    rsocket::{ConnectionId, PayloadStream, RSocket},
};

const TARGET: &str = "spark.rsocket.intercepted";

/// 被拦截链包装的连接，自身也实现 [`RSocket`]。
#[derive(Clone)]
pub struct InterceptedRSocket {
    shared: Arc<Shared>,
}

struct Shared {
    delegate: Arc<dyn RSocket>,
    chains: InterceptorChains,
    peers: Arc<PeerInfoCache>,
    route_extractor: Option<Arc<dyn RouteExtractor>>,
}

impl InterceptedRSocket {
    pub fn new(
        delegate: Arc<dyn RSocket>,
        chains: InterceptorChains,
        peers: Arc<PeerInfoCache>,
    ) -> Self {
        Self::with_route_extractor(delegate, chains, peers, None)
    }

    pub fn with_route_extractor(
        delegate: Arc<dyn RSocket>,
        chains: InterceptorChains,
        peers: Arc<PeerInfoCache>,
        route_extractor: Option<Arc<dyn RouteExtractor>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                delegate,
                chains,
                peers,
                route_extractor,
            }),
        }
    }

    /// 被包装的底层连接。
    pub fn delegate(&self) -> &Arc<dyn RSocket> {
        &self.shared.delegate
    }

    pub fn chains(&self) -> &InterceptorChains {
        &self.shared.chains
    }

    async fn intercept<T, F, Fut>(
        &self,
        kind: InteractionKind,
        payload: Payload,
        call: F,
    ) -> Result<T, RSocketError>
    where
        F: FnOnce(Arc<dyn RSocket>, Payload) -> Fut + Send,
        Fut: Future<Output = Result<T, RSocketError>> + Send,
        T: Send,
    {
        let shared = &self.shared;
        let exchange = shared.acquire(kind, Some(payload.clone())).await;
        let release = Release::arm(shared.chains.clone(), exchange.clone());

        if let Err(err) = shared.chains.before().next(&exchange).await {
            return Err(release.fail(err).await);
        }
        match call(Arc::clone(&shared.delegate), payload).await {
            Ok(value) => release.succeed().await.map(|()| value),
            Err(err) => Err(release.fail(err).await),
        }
    }

    fn intercept_stream(&self, request: StreamRequest) -> PayloadStream {
        let start = StreamState::Pending(Arc::clone(&self.shared), request);
        stream::unfold(start, |state| async move {
            match state {
                StreamState::Pending(shared, request) => shared.subscribe(request).await,
                StreamState::Streaming(inner, release) => advance(inner, release).await,
                StreamState::Done => None,
            }
        })
        .boxed()
    }
}

impl fmt::Debug for InterceptedRSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptedRSocket")
            .field("connection", &self.shared.delegate.id())
            .field("chains", &self.shared.chains)
            .finish()
    }
}

impl Shared {
    /// 获取阶段：新建属性袋并写入对端信息与路由。
    async fn acquire(&self, kind: InteractionKind, message: Option<Payload>) -> Exchange {
        let attributes = Attributes::new();
        if let Some(peer) = self.peers.get_or_resolve(self.delegate.as_ref()).await {
            attributes.insert_shared::<PeerInfo>(keys::PEER_INFO, peer);
        }
        if let (Some(extractor), Some(payload)) = (&self.route_extractor, &message)
            && let Some(route) = extractor.extract(kind, payload)
        {
            attributes.insert(keys::ROUTE, route);
        }
        Exchange::new(
            kind,
            message,
            self.delegate.data_mime_type(),
            self.delegate.metadata_mime_type(),
            attributes,
        )
    }

    /// 流被首次轮询：执行获取与 Before 链，然后订阅底层流并产出第一条结果。
    async fn subscribe(
        self: Arc<Self>,
        request: StreamRequest,
    ) -> Option<(Result<Payload, RSocketError>, StreamState)> {
        let (kind, first, upstream) = match request {
            StreamRequest::Stream(payload) => (InteractionKind::RequestStream, payload, None),
            StreamRequest::Channel(mut upstream) => match upstream.next().await {
                Some(first) => (InteractionKind::RequestChannel, first, Some(upstream)),
                None => {
                    let err = RSocketError::invalid_argument(
                        "request channel completed before sending its first payload",
                    );
                    return Some((Err(err), StreamState::Done));
                }
            },
        };

        let exchange = self.acquire(kind, Some(first.clone())).await;
        let release = Release::arm(self.chains.clone(), exchange.clone());
        if let Err(err) = self.chains.before().next(&exchange).await {
            return Some((Err(release.fail(err).await), StreamState::Done));
        }

        let inner = match upstream {
            None => self.delegate.request_stream(first),
            Some(rest) => self
                .delegate
                .request_channel(stream::once(future::ready(first)).chain(rest).boxed()),
        };
        advance(inner, release).await
    }
}

enum StreamRequest {
    Stream(Payload),
    Channel(BoxStream<'static, Payload>),
}

enum StreamState {
    Pending(Arc<Shared>, StreamRequest),
    Streaming(PayloadStream, Release),
    Done,
}

async fn advance(
    mut inner: PayloadStream,
    release: Release,
) -> Option<(Result<Payload, RSocketError>, StreamState)> {
    match inner.next().await {
        Some(Ok(payload)) => Some((Ok(payload), StreamState::Streaming(inner, release))),
        Some(Err(err)) => Some((Err(release.fail(err).await), StreamState::Done)),
        None => match release.succeed().await {
            Ok(()) => None,
            Err(err) => Some((Err(err), StreamState::Done)),
        },
    }
}

/// 释放守卫：保证每次交互的释放阶段恰好执行一次。
///
/// - 正常终态通过 [`Self::succeed`] / [`Self::fail`] 消费守卫；
/// - 守卫在终态之前被丢弃即视为取消，由 `Drop` 把取消路径派发到当前运行时。
pub(crate) struct Release {
    parts: Option<ReleaseParts>,
}

struct ReleaseParts {
    chains: InterceptorChains,
    exchange: Exchange,
}

impl Release {
    pub(crate) fn arm(chains: InterceptorChains, exchange: Exchange) -> Self {
        Self {
            parts: Some(ReleaseParts { chains, exchange }),
        }
    }

    /// 完成路径；After 钩子的错误原样返回。
    pub(crate) async fn succeed(mut self) -> Result<(), RSocketError> {
        let Some(parts) = self.parts.take() else {
            return Ok(());
        };
        let completion = parts.exchange.completion();
        let result = parts.chains.after().next(&completion).await;
        parts.exchange.attributes().clear();
        result
    }

    /// 失败路径，返回应交给调用方的错误。
    pub(crate) async fn fail(mut self, failure: RSocketError) -> RSocketError {
        let Some(parts) = self.parts.take() else {
            return failure;
        };
        let failed = parts.exchange.completion().with_failure(failure.clone());
        let after = parts.chains.after().next(&failed).await;
        if let Err(err) = parts.chains.unexpected().next(&failed).await {
            warn!(
                target: TARGET,
                kind = %failed.kind(),
                code = err.code(),
                error = %err,
                "unexpected hook failed"
            );
        }
        parts.exchange.attributes().clear();

        match after {
            Ok(()) => failure,
            Err(err) => {
                warn!(
                    target: TARGET,
                    kind = %failed.kind(),
                    code = failure.code(),
                    error = %failure,
                    "interaction failure superseded by after hook error"
                );
                err
            }
        }
    }
}

impl ReleaseParts {
    async fn cancel(self) {
        let completion = self.exchange.completion();
        if let Err(err) = self.chains.after().next(&completion).await {
            warn!(target: TARGET, kind = %completion.kind(), code = err.code(), error = %err, "after hook failed on cancellation");
        }
        let cancelled = completion.with_failure(RSocketError::Cancelled);
        if let Err(err) = self.chains.unexpected().next(&cancelled).await {
            warn!(target: TARGET, kind = %cancelled.kind(), code = err.code(), error = %err, "unexpected hook failed on cancellation");
        }
        self.exchange.attributes().clear();
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        let Some(parts) = self.parts.take() else {
            return;
        };
        let kind = parts.exchange.kind();
        if parts.chains.after().is_empty() && parts.chains.unexpected().is_empty() {
            parts.exchange.attributes().clear();
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                debug!(target: TARGET, %kind, "interaction cancelled, scheduling release hooks");
                handle.spawn(parts.cancel());
            }
            Err(err) => {
                warn!(
                    target: TARGET,
                    %kind,
                    error = %err,
                    "interaction cancelled outside a tokio runtime, release hooks skipped"
                );
                parts.exchange.attributes().clear();
            }
        }
    }
}

#[async_trait]
impl RSocket for InterceptedRSocket {
    fn id(&self) -> ConnectionId {
        self.shared.delegate.id()
    }

    fn data_mime_type(&self) -> MimeType {
        self.shared.delegate.data_mime_type()
    }

    fn metadata_mime_type(&self) -> MimeType {
        self.shared.delegate.metadata_mime_type()
    }

    async fn resolve_peer(&self) -> Result<Option<PeerInfo>, RSocketError> {
        self.shared.delegate.resolve_peer().await
    }

    async fn fire_and_forget(&self, payload: Payload) -> Result<(), RSocketError> {
        self.intercept(InteractionKind::FireAndForget, payload, |delegate, payload| async move {
            delegate.fire_and_forget(payload).await
        })
        .await
    }

    async fn request_response(&self, payload: Payload) -> Result<Payload, RSocketError> {
        self.intercept(InteractionKind::RequestResponse, payload, |delegate, payload| async move {
            delegate.request_response(payload).await
        })
        .await
    }

    fn request_stream(&self, payload: Payload) -> PayloadStream {
        self.intercept_stream(StreamRequest::Stream(payload))
    }

    fn request_channel(&self, payloads: BoxStream<'static, Payload>) -> PayloadStream {
        self.intercept_stream(StreamRequest::Channel(payloads))
    }

    async fn metadata_push(&self, payload: Payload) -> Result<(), RSocketError> {
        self.intercept(InteractionKind::MetadataPush, payload, |delegate, payload| async move {
            delegate.metadata_push(payload).await
        })
        .await
    }

    fn is_disposed(&self) -> bool {
        self.shared.delegate.is_disposed()
    }

    fn dispose(&self) {
        let id = self.shared.delegate.id();
        self.shared.peers.evict(id);
        self.shared.delegate.dispose();
    }
}
