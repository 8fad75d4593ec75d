//! spark-rsocket-middleware: 面向 `spark-rsocket` 拦截管线的可复用拦截器。
//!
//! # 教案式概览
//! - **意图（Why）**：为接入方提供现成的日志与指标拦截器，避免在每个服务重复编写钩子样板代码；
//! - **结构（How）**：按关注点拆分为 [`logging`] 与 [`metrics`] 两个模块，均实现
//!   [`spark_rsocket::Interceptor`]，经 [`spark_rsocket::InterceptorPipeline::builder`] 注册即可生效；
//! - **契约（What）**：
//!   - 两个拦截器都只观察请求类交互，SETUP 直接交给子链；
//!   - 拦截器不修改消息，也不短路子链；计时起点写入各自专属的属性键，互不干扰。
//! - **风险提示（Trade-offs）**：日志拦截器不做采样，高 QPS 场景请调低级别或在订阅端过滤。

pub mod logging;
pub mod metrics;

pub use logging::{LoggingInterceptor, LoggingInterceptorConfig};
pub use metrics::{KindSnapshot, MetricsInterceptor, MetricsInterceptorConfig, MetricsSnapshot};
