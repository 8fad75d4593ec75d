//! 测试桩集合：记录型拦截器与可编程的 RSocket 桩。
//!
//! # 设计定位（Why）
//! - 链顺序、释放路径与注册表的测试都需要“能记录钩子触发顺序的拦截器”和“可控结果的连接”，
//!   集中在此处供本 crate 与下游 crate 的测试复用，避免各测试文件重复定义；
//!
//! # 使用方式（How）
//! - `use spark_rsocket::test_stubs::{HookLog, RecordingInterceptor, StubRSocket};`
//! - [`HookLog`] 是共享句柄，多个拦截器写入同一份日志，断言时按阶段读取；
//! - [`StubRSocket`] 以构建器方式配置对端信息、失败或挂起行为。
//!
//! # 风险与权衡（Trade-offs）
//! - 模块随库公开，仅应在测试或示例中使用。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::{
    StreamExt,
    future,
    stream::{self, BoxStream},
};
use parking_lot::Mutex;

use crate::{
    attributes::PeerInfo,
    chain::{AfterChain, BeforeChain, UnexpectedChain},
    error::RSocketError,
    exchange::Exchange,
    interceptor::{Interceptor, InterceptorDescriptor},
    kind::InteractionKind,
    payload::Payload,
    rsocket::{ConnectionId, PayloadStream, RSocket},
};

/// 一次钩子触发的记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HookEvent {
    pub stage: &'static str,
    pub interceptor: String,
    pub kind: InteractionKind,
    pub failure: Option<RSocketError>,
    pub has_message: bool,
}

/// 多个拦截器共享的触发日志。
#[derive(Clone, Debug, Default)]
pub struct HookLog {
    events: Arc<Mutex<Vec<HookEvent>>>,
}

impl HookLog {
    pub fn record(&self, stage: &'static str, interceptor: &str, exchange: &Exchange) {
        self.events.lock().push(HookEvent {
            stage,
            interceptor: interceptor.to_owned(),
            kind: exchange.kind(),
            failure: exchange.failure().cloned(),
            has_message: exchange.message().is_some(),
        });
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().clone()
    }

    /// 指定阶段的拦截器名称，按触发顺序。
    pub fn stage(&self, stage: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.stage == stage)
            .map(|event| event.interceptor.clone())
            .collect()
    }

    /// 全部记录，格式为 `stage:name`。
    pub fn sequence(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|event| format!("{}:{}", event.stage, event.interceptor))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// 把每个钩子写入 [`HookLog`] 的拦截器。
pub struct RecordingInterceptor {
    name: String,
    log: HookLog,
    order: i32,
    halt_before: bool,
    fail_before: Option<RSocketError>,
    fail_after: Option<RSocketError>,
}

impl RecordingInterceptor {
    pub fn new(name: impl Into<String>, log: HookLog) -> Self {
        Self {
            name: name.into(),
            log,
            order: 0,
            halt_before: false,
            fail_before: None,
            fail_after: None,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Before 钩子记录后不再调用子链。
    pub fn halting(mut self) -> Self {
        self.halt_before = true;
        self
    }

    pub fn failing_before(mut self, err: RSocketError) -> Self {
        self.fail_before = Some(err);
        self
    }

    pub fn failing_after(mut self, err: RSocketError) -> Self {
        self.fail_after = Some(err);
        self
    }
}

#[async_trait]
impl Interceptor for RecordingInterceptor {
    fn descriptor(&self) -> InterceptorDescriptor {
        InterceptorDescriptor::new(self.name.clone(), "test", "records hook invocations")
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn intercept_before(
        &self,
        exchange: &Exchange,
        chain: &BeforeChain,
    ) -> Result<(), RSocketError> {
        self.log.record("before", &self.name, exchange);
        if let Some(err) = &self.fail_before {
            return Err(err.clone());
        }
        if self.halt_before {
            return Ok(());
        }
        chain.next(exchange).await
    }

    async fn intercept_after(
        &self,
        exchange: &Exchange,
        chain: &AfterChain,
    ) -> Result<(), RSocketError> {
        self.log.record("after", &self.name, exchange);
        chain.next(exchange).await?;
        match &self.fail_after {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn intercept_unexpected(
        &self,
        exchange: &Exchange,
        chain: &UnexpectedChain,
    ) -> Result<(), RSocketError> {
        self.log.record("unexpected", &self.name, exchange);
        chain.next(exchange).await
    }
}

#[derive(Clone, Debug)]
enum Behavior {
    Echo,
    Fail(RSocketError),
    Pending,
}

/// 可编程的 RSocket 桩。
///
/// - 默认行为为回显：单值交互返回请求载荷，`request_stream` 回显若干次，`request_channel` 逐条回显；
/// - [`Self::failing`] 让所有交互以给定错误失败，[`Self::pending`] 让交互永不完成，用于取消测试。
pub struct StubRSocket {
    id: ConnectionId,
    behavior: Behavior,
    stream_len: usize,
    peer: Result<Option<PeerInfo>, RSocketError>,
    peer_resolutions: AtomicUsize,
    calls: Mutex<Vec<InteractionKind>>,
    disposed: AtomicBool,
    dispose_calls: AtomicUsize,
}

impl Default for StubRSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl StubRSocket {
    pub fn new() -> Self {
        Self {
            id: ConnectionId::next(),
            behavior: Behavior::Echo,
            stream_len: 3,
            peer: Ok(None),
            peer_resolutions: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            dispose_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_peer(mut self, peer: PeerInfo) -> Self {
        self.peer = Ok(Some(peer));
        self
    }

    pub fn with_peer_error(mut self, err: RSocketError) -> Self {
        self.peer = Err(err);
        self
    }

    pub fn with_stream_len(mut self, len: usize) -> Self {
        self.stream_len = len;
        self
    }

    pub fn failing(mut self, err: RSocketError) -> Self {
        self.behavior = Behavior::Fail(err);
        self
    }

    pub fn pending(mut self) -> Self {
        self.behavior = Behavior::Pending;
        self
    }

    pub fn peer_resolutions(&self) -> usize {
        self.peer_resolutions.load(Ordering::SeqCst)
    }

    /// 已到达底层的交互类型，按调用顺序。
    pub fn calls(&self) -> Vec<InteractionKind> {
        self.calls.lock().clone()
    }

    pub fn dispose_calls(&self) -> usize {
        self.dispose_calls.load(Ordering::SeqCst)
    }

    fn record(&self, kind: InteractionKind) {
        self.calls.lock().push(kind);
    }

    async fn respond<T>(&self, value: T) -> Result<T, RSocketError> {
        match &self.behavior {
            Behavior::Echo => Ok(value),
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::Pending => future::pending().await,
        }
    }
}

#[async_trait]
impl RSocket for StubRSocket {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn resolve_peer(&self) -> Result<Option<PeerInfo>, RSocketError> {
        self.peer_resolutions.fetch_add(1, Ordering::SeqCst);
        self.peer.clone()
    }

    async fn fire_and_forget(&self, _payload: Payload) -> Result<(), RSocketError> {
        self.record(InteractionKind::FireAndForget);
        self.respond(()).await
    }

    async fn request_response(&self, payload: Payload) -> Result<Payload, RSocketError> {
        self.record(InteractionKind::RequestResponse);
        self.respond(payload).await
    }

    fn request_stream(&self, payload: Payload) -> PayloadStream {
        self.record(InteractionKind::RequestStream);
        match &self.behavior {
            Behavior::Echo => stream::iter(vec![Ok(payload); self.stream_len]).boxed(),
            Behavior::Fail(err) => stream::once(future::ready(Err(err.clone()))).boxed(),
            Behavior::Pending => stream::pending().boxed(),
        }
    }

    fn request_channel(&self, payloads: BoxStream<'static, Payload>) -> PayloadStream {
        self.record(InteractionKind::RequestChannel);
        match &self.behavior {
            Behavior::Echo => payloads.map(Ok).boxed(),
            Behavior::Fail(err) => stream::once(future::ready(Err(err.clone()))).boxed(),
            Behavior::Pending => stream::pending().boxed(),
        }
    }

    async fn metadata_push(&self, _payload: Payload) -> Result<(), RSocketError> {
        self.record(InteractionKind::MetadataPush);
        self.respond(()).await
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        self.dispose_calls.fetch_add(1, Ordering::SeqCst);
        self.disposed.store(true, Ordering::SeqCst);
    }
}
