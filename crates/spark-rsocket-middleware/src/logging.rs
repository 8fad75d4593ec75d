use std::time::Instant;

use async_trait::async_trait;
use spark_rsocket::{
    AfterChain, BeforeChain, Exchange, Interceptor, InterceptorDescriptor, RSocketError,
    UnexpectedChain,
};
use tracing::Level;

const TARGET: &str = "spark.rsocket.logging";

/// 记录交互起点的属性键，值类型为 [`Instant`]。
pub const STARTED_AT_KEY: &str = "spark.rsocket.logging.started_at";

/// 以运行时给定的级别输出事件；`tracing` 宏要求级别为常量，因此逐级展开。
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {{
        let level = $level;
        if level == Level::ERROR {
            tracing::error!(target: TARGET, $($arg)+);
        } else if level == Level::WARN {
            tracing::warn!(target: TARGET, $($arg)+);
        } else if level == Level::INFO {
            tracing::info!(target: TARGET, $($arg)+);
        } else if level == Level::DEBUG {
            tracing::debug!(target: TARGET, $($arg)+);
        } else {
            tracing::trace!(target: TARGET, $($arg)+);
        }
    }};
}

/// 日志拦截器配置。
///
/// # 教案式说明
/// - **意图（Why）**：不同服务对日志量的容忍度不同，级别与排序外部化后拦截器本身保持无状态；
/// - **契约（What）**：
///   - `descriptor`：遵循 `vendor.component` 命名惯例；
///   - `order`：管线排序键，默认较小以便位于外层，观察到完整的耗时；
///   - `level`：开始、完成与取消事件的级别；失败固定以 `WARN` 输出；
///   - `log_payload_sizes`：是否记录请求消息的数据与元数据字节数。
/// - **风险提示（Trade-offs）**：高频链路使用 `INFO` 可能造成日志风暴。
#[derive(Clone, Debug)]
pub struct LoggingInterceptorConfig {
    pub descriptor: InterceptorDescriptor,
    pub order: i32,
    pub level: Level,
    pub log_payload_sizes: bool,
}

impl Default for LoggingInterceptorConfig {
    fn default() -> Self {
        Self {
            descriptor: InterceptorDescriptor::new(
                "spark.rsocket.logging",
                "observability",
                "记录 RSocket 交互开始、完成、失败与取消的结构化日志",
            ),
            order: -100,
            level: Level::INFO,
            log_payload_sizes: true,
        }
    }
}

/// 以 `tracing` 记录每次请求类交互的生命周期。
///
/// - Before：记录交互类型、路由、对端与消息大小，并写入计时起点；
/// - After：成功以配置级别记录耗时，失败以 `WARN` 记录错误码；
/// - Unexpected：仅记录取消，失败已在 After 中输出。
#[derive(Clone, Debug, Default)]
pub struct LoggingInterceptor {
    config: LoggingInterceptorConfig,
}

impl LoggingInterceptor {
    pub fn new(config: LoggingInterceptorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoggingInterceptorConfig {
        &self.config
    }
}

fn elapsed_ms(exchange: &Exchange) -> Option<u64> {
    exchange
        .attributes()
        .get::<Instant>(STARTED_AT_KEY)
        .map(|started| u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
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
        if !exchange.is_request_kind() {
            return chain.next(exchange).await;
        }
        exchange.attributes().insert(STARTED_AT_KEY, Instant::now());

        let route = exchange.route();
        let route = route.as_deref().map(String::as_str).unwrap_or("-");
        let peer = exchange
            .peer()
            .map(|peer| peer.to_string())
            .unwrap_or_else(|| "-".to_owned());
        match exchange.message().filter(|_| self.config.log_payload_sizes) {
            Some(message) => event_at!(
                self.config.level,
                kind = %exchange.kind(),
                route,
                peer = %peer,
                data_bytes = message.data().len(),
                metadata_bytes = message.metadata().map_or(0, |metadata| metadata.len()),
                "rsocket exchange started"
            ),
            None => event_at!(
                self.config.level,
                kind = %exchange.kind(),
                route,
                peer = %peer,
                "rsocket exchange started"
            ),
        }
        chain.next(exchange).await
    }

    async fn intercept_after(
        &self,
        exchange: &Exchange,
        chain: &AfterChain,
    ) -> Result<(), RSocketError> {
        if exchange.is_request_kind() {
            let elapsed_ms = elapsed_ms(exchange).unwrap_or_default();
            match exchange.failure() {
                Some(failure) => tracing::warn!(
                    target: TARGET,
                    kind = %exchange.kind(),
                    elapsed_ms,
                    code = failure.code(),
                    error = %failure,
                    "rsocket exchange failed"
                ),
                None => event_at!(
                    self.config.level,
                    kind = %exchange.kind(),
                    elapsed_ms,
                    "rsocket exchange completed"
                ),
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
            event_at!(
                self.config.level,
                kind = %exchange.kind(),
                elapsed_ms = elapsed_ms(exchange).unwrap_or_default(),
                "rsocket exchange cancelled"
            );
        }
        chain.next(exchange).await
    }
}
