//! spark-rsocket: RSocket 交互拦截链、Exchange 模型与对端信息缓存。
//!
//! # 教案式概览
//! - **意图（Why）**：让日志、鉴权、指标、追踪等横切关注点以拦截器形式观察每一次 RSocket 交互，
//!   应用代码与传输实现均无需感知；
//! - **结构（How）**：
//!   - [`exchange`] / [`attributes`] / [`payload`] / [`kind`] 描述一次交互；
//!   - [`interceptor`] 定义三类钩子，[`chain`] 以不可变单链表把它们串成洋葱模型；
//!   - [`intercepted`] 把链织入单个连接，[`peer`] 缓存连接的对端信息；
//!   - [`pipeline`] 负责注册、排序与装配，是上层（连接注册表、中间件）的唯一入口；
//! - **契约（What）**：
//!   - Before 链按注册顺序触发，After/Unexpected 链按注册逆序触发；
//!   - 每次交互的释放阶段（完成、失败、取消）恰好执行一次，属性袋不跨交互泄露；
//!   - 所有失败以 [`RSocketError`] 表达，并携带稳定错误码。
//! - **风险提示（Trade-offs）**：取消路径在当前 Tokio 运行时上异步补跑钩子，脱离运行时丢弃交互时钩子会被跳过。

pub mod attributes;
pub mod chain;
pub mod error;
pub mod exchange;
pub mod intercepted;
pub mod interceptor;
pub mod kind;
pub mod payload;
pub mod peer;
pub mod pipeline;
pub mod rsocket;

/// 测试桩集合，供本 crate 与下游 crate 的测试复用。
///
/// - 通过 `use spark_rsocket::test_stubs::*;` 引入记录型拦截器与可编程连接；
/// - 生产代码不应依赖这些类型。
pub mod test_stubs;

pub use attributes::{Attributes, PeerInfo, keys};
pub use chain::{AfterChain, BeforeChain, Chain, ChainKind, UnexpectedChain};
pub use error::RSocketError;
pub use exchange::Exchange;
pub use intercepted::InterceptedRSocket;
pub use interceptor::{Interceptor, InterceptorDescriptor};
pub use kind::InteractionKind;
pub use payload::{MimeType, Payload};
pub use peer::PeerInfoCache;
pub use pipeline::{InterceptorChains, InterceptorPipeline, InterceptorPipelineBuilder, RouteExtractor};
pub use rsocket::{ConnectionId, PayloadStream, RSocket};
