//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为拦截链、传输包装与连接注册表提供统一的错误语义；
//! - Exchange 需要携带失败原因交给 After/Unexpected 钩子，因此错误必须可克隆、可比较。
//!
//! ## 设计要求（What）
//! - 所有变体派生 `thiserror::Error`，并通过 [`RSocketError::code`] 暴露稳定的点分错误码；
//! - 配置类错误（地址 scheme、缺失路由）在调用边界快速失败，不参与重试；
//! - “实例不存在”只在真正使用哨兵目标时出现，且必须携带逻辑地址。

use thiserror::Error;

use crate::kind::InteractionKind;

/// RSocket 拦截与路由层的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：聚合调用边界、拦截钩子、服务发现与连接生命周期的失败，
///   使上层按错误码而非字符串做告警与重试决策。
/// - **契约 (What)**：
///   - 所有变体 `Clone + Send + Sync + 'static`，可放入 [`Exchange`](crate::Exchange) 并跨任务传播；
///   - [`Self::code`] 返回值在版本间保持稳定；
///   - [`Self::is_invalid_argument`] 标识“不可重试”的配置类错误。
/// - **设计权衡 (Trade-offs)**：上下文以 `String` 保存，牺牲少量分配换取可读性。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RSocketError {
    /// 参数非法，例如地址无法解析、请求通道缺少首条消息。
    #[error("invalid argument: {detail}")]
    InvalidArgument { detail: String },

    /// 地址 scheme 不被连接器支持。
    #[error("unsupported transport scheme `{scheme}` in address `{address}`")]
    UnsupportedScheme { scheme: String, address: String },

    /// 交互需要路由但调用方未提供。
    #[error("a route is required for {kind} but none was supplied")]
    MissingRoute { kind: InteractionKind },

    /// 逻辑地址当前没有任何可用实例。
    ///
    /// - **契约 (What)**：`address` 为逻辑服务名，调用方据此判断是否降级。
    #[error("no available instance for `{address}`")]
    InstanceNotFound { address: String },

    /// 连接或注册表已经释放。
    #[error("`{resource}` has been disposed")]
    Disposed { resource: String },

    /// 调用方取消了交互；仅作为 Unexpected 钩子观察到的失败原因出现。
    #[error("interaction was cancelled")]
    Cancelled,

    /// 拦截器钩子主动失败，例如鉴权拒绝。
    #[error("interceptor `{interceptor}` rejected the exchange: {detail}")]
    Interceptor { interceptor: String, detail: String },

    /// 对端返回的应用层错误。
    #[error("application error: {detail}")]
    Application { detail: String },

    /// 底层传输失败。
    #[error("transport failure during `{context}`: {detail}")]
    Transport { context: String, detail: String },

    /// 服务发现源查询失败。
    #[error("discovery failure for `{service}`: {detail}")]
    Discovery { service: String, detail: String },

    /// 缺少异步运行时等宿主能力。
    #[error("runtime unavailable: {detail}")]
    Runtime { detail: String },
}

impl RSocketError {
    /// 构造参数错误的便捷入口。
    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        RSocketError::InvalidArgument {
            detail: detail.into(),
        }
    }

    /// 构造拦截器拒绝错误。
    pub fn interceptor(interceptor: impl Into<String>, detail: impl Into<String>) -> Self {
        RSocketError::Interceptor {
            interceptor: interceptor.into(),
            detail: detail.into(),
        }
    }

    /// 构造传输失败。
    pub fn transport(context: impl Into<String>, detail: impl Into<String>) -> Self {
        RSocketError::Transport {
            context: context.into(),
            detail: detail.into(),
        }
    }

    /// 稳定错误码。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：观测平台按错误码聚合，避免依赖易变的自然语言描述；
    /// - **契约 (What)**：返回 `rsocket.*` 前缀的静态字符串。
    pub fn code(&self) -> &'static str {
        match self {
            RSocketError::InvalidArgument { .. } => "rsocket.argument.invalid",
            RSocketError::UnsupportedScheme { .. } => "rsocket.argument.unsupported_scheme",
            RSocketError::MissingRoute { .. } => "rsocket.argument.missing_route",
            RSocketError::InstanceNotFound { .. } => "rsocket.instance.not_found",
            RSocketError::Disposed { .. } => "rsocket.connection.disposed",
            RSocketError::Cancelled => "rsocket.interaction.cancelled",
            RSocketError::Interceptor { .. } => "rsocket.interceptor.rejected",
            RSocketError::Application { .. } => "rsocket.application",
            RSocketError::Transport { .. } => "rsocket.transport",
            RSocketError::Discovery { .. } => "rsocket.discovery",
            RSocketError::Runtime { .. } => "rsocket.runtime.unavailable",
        }
    }

    /// 是否属于调用边界的配置类错误。
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            RSocketError::InvalidArgument { .. }
                | RSocketError::UnsupportedScheme { .. }
                | RSocketError::MissingRoute { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_invalid_arguments() {
        let scheme = RSocketError::UnsupportedScheme {
            scheme: "http".to_owned(),
            address: "http://svc".to_owned(),
        };
        assert!(scheme.is_invalid_argument());
        assert_eq!(scheme.code(), "rsocket.argument.unsupported_scheme");

        let route = RSocketError::MissingRoute {
            kind: InteractionKind::RequestResponse,
        };
        assert!(route.is_invalid_argument());
        assert!(!RSocketError::Cancelled.is_invalid_argument());
    }

    #[test]
    fn instance_not_found_names_logical_address() {
        let err = RSocketError::InstanceNotFound {
            address: "user-service".to_owned(),
        };
        assert_eq!(err.to_string(), "no available instance for `user-service`");
        assert_eq!(err.code(), "rsocket.instance.not_found");
    }
}
