use std::borrow::Cow;

use async_trait::async_trait;

use crate::{
    chain::{AfterChain, BeforeChain, UnexpectedChain},
    error::RSocketError,
    exchange::Exchange,
};

/// 描述拦截器的元数据，辅助链路编排与可观测性。
///
/// # 契约说明（What）
/// - `name`：组件的稳定标识，建议使用 `vendor.component` 命名；
/// - `category`：可选分类（如 `security`、`observability`）；
/// - `summary`：人类可读描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterceptorDescriptor {
    name: Cow<'static, str>,
    category: Cow<'static, str>,
    summary: Cow<'static, str>,
}

impl InterceptorDescriptor {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        category: impl Into<Cow<'static, str>>,
        summary: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            summary: summary.into(),
        }
    }

    /// 构造匿名描述，常用于测试或快速原型。
    pub fn anonymous(stage: impl Into<Cow<'static, str>>) -> Self {
        let stage = stage.into();
        Self {
            name: Cow::Owned(format!("anonymous.{stage}")),
            category: Cow::Borrowed("unspecified"),
            summary: Cow::Owned(format!("auto-generated descriptor for {stage}")),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }
}

/// 拦截器合约：围绕每次交互的 Before / After / Unexpected 三类钩子。
///
/// # 设计背景（Why）
/// - 模仿 gRPC Interceptor 与 Express/Koa 的“下一步”模式：钩子拿到子链，
///   由实现自行决定何时调用 `chain.next(exchange)` 继续遍历，从而形成洋葱模型；
/// - 日志、鉴权、指标、追踪等横切关注点借此观察并标注每一次交互，应用层无感知。
///
/// # 契约说明（What）
/// - `intercept_before`：调用底层操作之前，按注册顺序执行；
/// - `intercept_after`：交互以完成、失败或取消终止后，按注册逆序执行；
///   失败时 `exchange.failure()` 携带原因，取消时视为无失败的完成；
/// - `intercept_unexpected`：失败或取消之后、After 链结束时按注册逆序执行，取消以
///   [`RSocketError::Cancelled`] 呈现；成功路径不会触发；
/// - `order`：全局排序键，数值越小越靠外层，仅在构建链时读取一次；
/// - 默认实现直接调用子链，使实现者只需覆盖关心的钩子。
///
/// # 风险提示（Trade-offs）
/// - 若实现不调用 `chain.next`，后续拦截器将被短路，这是有意提供的能力（例如拒绝请求），
///   但在 After 链中短路会让外层拦截器错过收尾；
/// - Before 钩子返回错误会阻止底层操作执行，并以失败结果进入释放阶段。
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    fn descriptor(&self) -> InterceptorDescriptor {
        InterceptorDescriptor::anonymous("interceptor")
    }

    fn order(&self) -> i32 {
        0
    }

    async fn intercept_before(
        &self,
        exchange: &Exchange,
        chain: &BeforeChain,
    ) -> Result<(), RSocketError> {
        chain.next(exchange).await
    }

    async fn intercept_after(
        &self,
        exchange: &Exchange,
        chain: &AfterChain,
    ) -> Result<(), RSocketError> {
        chain.next(exchange).await
    }

    async fn intercept_unexpected(
        &self,
        exchange: &Exchange,
        chain: &UnexpectedChain,
    ) -> Result<(), RSocketError> {
        chain.next(exchange).await
    }
}
