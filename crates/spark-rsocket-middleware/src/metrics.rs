use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use spark_rsocket::{
    AfterChain, BeforeChain, Exchange, InteractionKind, Interceptor, InterceptorDescriptor,
    RSocketError, UnexpectedChain,
};

/// 记录交互起点的属性键，值类型为 [`Instant`]。
pub const STARTED_AT_KEY: &str = "spark.rsocket.metrics.started_at";

/// 指标拦截器配置。
///
/// # 教案式说明
/// - **意图（Why）**：同一进程内可能为多条管线各装配一份指标拦截器，描述符与排序需可调整；
/// - **契约（What）**：`descriptor` 供控制面识别组件，`order` 为管线排序键。
#[derive(Clone, Debug)]
pub struct MetricsInterceptorConfig {
    pub descriptor: InterceptorDescriptor,
    pub order: i32,
}

impl Default for MetricsInterceptorConfig {
    fn default() -> Self {
        Self {
            descriptor: InterceptorDescriptor::new(
                "spark.rsocket.metrics",
                "observability",
                "按交互类型统计开始、成功、失败与取消次数及累计耗时",
            ),
            order: -90,
        }
    }
}

/// 按交互类型分桶的计数器。
///
/// # 教案式说明
/// - **意图（Why）**：以原子计数器聚合交互结果，读路径无锁，适合高频打点；
/// - **结构（How）**：`InteractionKind::ALL` 中每个交互类型一组原子计数，以
///   [`InteractionKind::index`] 定位；
/// - **契约（What）**：
///   - Before 计入 `started` 并写入计时起点；
///   - After 无失败时计入 `finished`，有失败时计入 `failed`，两者都累计耗时；
///   - Unexpected 收到 [`RSocketError::Cancelled`] 时计入 `cancelled`；取消在 After 中表现为无失败的完成，
///     因此快照中的 `succeeded` 为 `finished - cancelled`。
/// - **风险提示（Trade-offs）**：After 与 Unexpected 之间读取快照，刚取消的交互会短暂计入 `succeeded`。
#[derive(Clone, Default)]
pub struct MetricsInterceptor {
    config: MetricsInterceptorConfig,
    counters: Arc<[KindCounters; InteractionKind::ALL.len()]>,
}

#[derive(Default)]
struct KindCounters {
    started: AtomicU64,
    finished: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    latency_nanos: AtomicU64,
}

impl KindCounters {
    fn record_latency(&self, exchange: &Exchange) {
        if let Some(started) = exchange.attributes().get::<Instant>(STARTED_AT_KEY) {
            let nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
            self.latency_nanos.fetch_add(nanos, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> KindSnapshot {
        let finished = self.finished.load(Ordering::Acquire);
        let cancelled = self.cancelled.load(Ordering::Acquire);
        KindSnapshot {
            started: self.started.load(Ordering::Acquire),
            succeeded: finished.saturating_sub(cancelled),
            failed: self.failed.load(Ordering::Acquire),
            cancelled,
            total_latency: Duration::from_nanos(self.latency_nanos.load(Ordering::Acquire)),
        }
    }
}

impl MetricsInterceptor {
    pub fn new(config: MetricsInterceptorConfig) -> Self {
        Self {
            config,
            counters: Arc::default(),
        }
    }

    fn counters(&self, kind: InteractionKind) -> &KindCounters {
        &self.counters[kind.index()]
    }

    /// 当前计数的快照；逐字段读取，不保证跨字段一致。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            kinds: InteractionKind::ALL
                .into_iter()
                .filter(|kind| kind.is_request_kind())
                .map(|kind| (kind, self.counters(kind).snapshot()))
                .collect(),
        }
    }
}

impl fmt::Debug for MetricsInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsInterceptor")
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// 单个交互类型的计数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KindSnapshot {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_latency: Duration,
}

impl KindSnapshot {
    /// 已进入释放阶段的交互数。
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn in_flight(&self) -> u64 {
        self.started.saturating_sub(self.completed())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    kinds: Vec<(InteractionKind, KindSnapshot)>,
}

impl MetricsSnapshot {
    /// 指定类型的计数；SETUP 不参与统计，返回全零。
    pub fn kind(&self, kind: InteractionKind) -> KindSnapshot {
        self.kinds
            .iter()
            .find(|(candidate, _)| *candidate == kind)
            .map(|(_, snapshot)| *snapshot)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(InteractionKind, KindSnapshot)> {
        self.kinds.iter()
    }

    pub fn total_started(&self) -> u64 {
        self.kinds.iter().map(|(_, snapshot)| snapshot.started).sum()
    }
}

#[async_trait]
impl Interceptor for MetricsInterceptor {
    fn descriptor(&self) -> InterceptorDescriptor {
        self.config.descriptor.clone()
    }

    fn order(&self) -> i32 {
        self.config.order
    }

    async fn intercept_before(
        &self,
        exchange: &Exchange,
        chain: &BeforeChain,
    ) -> Result<(), RSocketError> {
        if exchange.is_request_kind() {
            self.counters(exchange.kind())
                .started
                .fetch_add(1, Ordering::AcqRel);
            exchange.attributes().insert(STARTED_AT_KEY, Instant::now());
        }
        chain.next(exchange).await
    }

    async fn intercept_after(
        &self,
        exchange: &Exchange,
        chain: &AfterChain,
    ) -> Result<(), RSocketError> {
        if exchange.is_request_kind() {
            let counters = self.counters(exchange.kind());
            counters.record_latency(exchange);
            if exchange.is_failed() {
                counters.failed.fetch_add(1, Ordering::AcqRel);
            } else {
                counters.finished.fetch_add(1, Ordering::AcqRel);
            }
        }
        chain.next(exchange).await
    }

    async fn intercept_unexpected(
        &self,
        exchange: &Exchange,
        chain: &UnexpectedChain,
    ) -> Result<(), RSocketError> {
        if exchange.is_request_kind() && matches!(exchange.failure(), Some(RSocketError::Cancelled)) {
            self.counters(exchange.kind())
                .cancelled
                .fetch_add(1, Ordering::AcqRel);
        }
        chain.next(exchange).await
    }
}
