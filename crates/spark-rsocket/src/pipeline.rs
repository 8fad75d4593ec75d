//! # pipeline：拦截器注册与链装配
//!
//! ## 核心意图（Why）
//! - 拦截器以数值排序键声明全局顺序，排序只在装配时解析一次，调用路径上不再比较；
//! - 同一组拦截器装配出的三条链不可变，可被该管线包装的所有连接共享。
//!
//! ## 契约（What）
//! - 排序为稳定排序：键小者在外层（Before 先触发、After 后触发），键相同者保持注册顺序；
//! - [`InterceptorPipeline::wrap`] 产出的连接共享同一个 [`PeerInfoCache`]；
//! - [`InterceptorPipeline::intercept_setup`] 供服务端在接受 SETUP 帧时运行钩子，
//!   `Exchange::is_request_kind` 为 `false`。

use std::fmt;
use std::sync::Arc;

use crate::{
    attributes::Attributes,
    chain::{AfterChain, BeforeChain, UnexpectedChain},
    error::RSocketError,
    exchange::Exchange,
    intercepted::{InterceptedRSocket, Release},
    interceptor::{Interceptor, InterceptorDescriptor},
    kind::InteractionKind,
    payload::{MimeType, Payload},
    peer::PeerInfoCache,
    rsocket::RSocket,
};

/// 从请求载荷中抽取路由，结果写入 [`keys::ROUTE`](crate::attributes::keys::ROUTE)。
pub trait RouteExtractor: Send + Sync + 'static {
    fn extract(&self, kind: InteractionKind, payload: &Payload) -> Option<String>;
}

impl<F> RouteExtractor for F
where
    F: Fn(InteractionKind, &Payload) -> Option<String> + Send + Sync + 'static,
{
    fn extract(&self, kind: InteractionKind, payload: &Payload) -> Option<String> {
        self(kind, payload)
    }
}

/// 由同一有序列表装配出的三条链。
#[derive(Clone, Debug, Default)]
pub struct InterceptorChains {
    before: BeforeChain,
    after: AfterChain,
    unexpected: UnexpectedChain,
}

impl InterceptorChains {
    pub fn new(interceptors: &[Arc<dyn Interceptor>]) -> Self {
        Self {
            before: BeforeChain::new(Some(interceptors)),
            after: AfterChain::new(Some(interceptors)),
            unexpected: UnexpectedChain::new(Some(interceptors)),
        }
    }

    pub fn before(&self) -> &BeforeChain {
        &self.before
    }

    pub fn after(&self) -> &AfterChain {
        &self.after
    }

    pub fn unexpected(&self) -> &UnexpectedChain {
        &self.unexpected
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
    }
}

/// 拦截器管线构建器。
#[derive(Default)]
pub struct InterceptorPipelineBuilder {
    entries: Vec<(i32, Arc<dyn Interceptor>)>,
    route_extractor: Option<Arc<dyn RouteExtractor>>,
}

impl InterceptorPipelineBuilder {
    /// 注册拦截器，排序键取自 [`Interceptor::order`]。
    pub fn register<I>(self, interceptor: I) -> Self
    where
        I: Interceptor,
    {
        self.register_shared(Arc::new(interceptor))
    }

    pub fn register_shared(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        let order = interceptor.order();
        self.entries.push((order, interceptor));
        self
    }

    /// 注册拦截器并显式指定排序键，覆盖其自身声明。
    pub fn register_with_order<I>(mut self, interceptor: I, order: i32) -> Self
    where
        I: Interceptor,
    {
        self.entries.push((order, Arc::new(interceptor)));
        self
    }

    pub fn route_extractor<R>(mut self, extractor: R) -> Self
    where
        R: RouteExtractor,
    {
        self.route_extractor = Some(Arc::new(extractor));
        self
    }

    pub fn build(self) -> InterceptorPipeline {
        let mut entries = self.entries;
        entries.sort_by_key(|(order, _)| *order);
        let interceptors: Vec<Arc<dyn Interceptor>> =
            entries.into_iter().map(|(_, interceptor)| interceptor).collect();
        let chains = InterceptorChains::new(&interceptors);

        InterceptorPipeline {
            interceptors: interceptors.into(),
            chains,
            peers: Arc::new(PeerInfoCache::new()),
            route_extractor: self.route_extractor,
        }
    }
}

/// 已装配完成的拦截器管线。
#[derive(Clone)]
pub struct InterceptorPipeline {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    chains: InterceptorChains,
    peers: Arc<PeerInfoCache>,
    route_extractor: Option<Arc<dyn RouteExtractor>>,
}

impl InterceptorPipeline {
    pub fn builder() -> InterceptorPipelineBuilder {
        InterceptorPipelineBuilder::default()
    }

    /// 不含任何拦截器的管线。
    pub fn empty() -> Self {
        Self::builder().build()
    }

    /// 以本管线的共享链包装连接。
    pub fn wrap(&self, delegate: Arc<dyn RSocket>) -> Arc<InterceptedRSocket> {
        Arc::new(InterceptedRSocket::with_route_extractor(
            delegate,
            self.chains.clone(),
            Arc::clone(&self.peers),
            self.route_extractor.clone(),
        ))
    }

    /// 对 SETUP 帧运行 Before 与释放钩子。
    pub async fn intercept_setup(
        &self,
        payload: Payload,
        data_mime_type: MimeType,
        metadata_mime_type: MimeType,
    ) -> Result<(), RSocketError> {
        let exchange = Exchange::new(
            InteractionKind::Setup,
            Some(payload),
            data_mime_type,
            metadata_mime_type,
            Attributes::new(),
        );
        let release = Release::arm(self.chains.clone(), exchange.clone());
        match self.chains.before().next(&exchange).await {
            Ok(()) => release.succeed().await,
            Err(err) => Err(release.fail(err).await),
        }
    }

    /// 装配后的拦截器，按生效顺序排列。
    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    pub fn descriptors(&self) -> Vec<InterceptorDescriptor> {
        self.interceptors
            .iter()
            .map(|interceptor| interceptor.descriptor())
            .collect()
    }

    pub fn chains(&self) -> &InterceptorChains {
        &self.chains
    }

    pub fn peers(&self) -> &Arc<PeerInfoCache> {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl fmt::Debug for InterceptorPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .descriptors()
            .iter()
            .map(|descriptor| descriptor.name().to_owned())
            .collect();
        f.debug_struct("InterceptorPipeline")
            .field("interceptors", &names)
            .field("peers", &self.peers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::{HookLog, RecordingInterceptor};

    #[test]
    fn build_sorts_by_order_and_keeps_ties_stable() {
        let log = HookLog::default();
        let pipeline = InterceptorPipeline::builder()
            .register(RecordingInterceptor::new("late", log.clone()).with_order(10))
            .register(RecordingInterceptor::new("first-tie", log.clone()))
            .register(RecordingInterceptor::new("second-tie", log.clone()))
            .register_with_order(RecordingInterceptor::new("early", log.clone()).with_order(99), -5)
            .build();

        let names: Vec<String> = pipeline
            .descriptors()
            .iter()
            .map(|d| d.name().to_owned())
            .collect();
        assert_eq!(names, ["early", "first-tie", "second-tie", "late"]);
        assert_eq!(pipeline.chains().before().len(), 4);
    }

    #[tokio::test]
    async fn setup_runs_before_then_after_with_non_request_kind() {
        let log = HookLog::default();
        let pipeline = InterceptorPipeline::builder()
            .register(RecordingInterceptor::new("audit", log.clone()))
            .build();

        pipeline
            .intercept_setup(
                Payload::from_data("setup"),
                MimeType::APPLICATION_JSON,
                MimeType::COMPOSITE_METADATA,
            )
            .await
            .expect("setup hooks succeed");

        let events = log.events();
        assert_eq!(log.sequence(), ["before:audit", "after:audit"]);
        assert!(events.iter().all(|event| event.kind == InteractionKind::Setup));
        assert!(!InteractionKind::Setup.is_request_kind());
    }

    #[test]
    fn empty_pipeline_builds_empty_chains() {
        let pipeline = InterceptorPipeline::empty();
        assert!(pipeline.is_empty());
        assert!(pipeline.chains().is_empty());
    }
}
