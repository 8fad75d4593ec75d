use std::sync::Arc;

use crate::{
    attributes::{Attributes, PeerInfo, keys},
    error::RSocketError,
    kind::InteractionKind,
    payload::{MimeType, Payload},
};

/// 一次交互单元的不可变描述。
///
/// # 教案式说明
/// - **意图（Why）**：拦截器以统一视角观察五种交互与 SETUP，无需关心底层是单值 Future 还是流；
/// - **结构（How）**：除属性袋外所有字段均不可变；属性袋是同一交互内各阶段共享的句柄，
///   因此 Before 阶段写入的属性在 After 阶段可见；
/// - **契约（What）**：
///   - 释放阶段的 Exchange 不携带消息；
///   - `failure` 仅在失败或取消路径上出现；
///   - [`Self::is_request_kind`] 对 SETUP 返回 `false`，高层拦截器通常据此跳过。
#[derive(Clone, Debug)]
pub struct Exchange {
    kind: InteractionKind,
    message: Option<Payload>,
    data_mime_type: MimeType,
    metadata_mime_type: MimeType,
    attributes: Attributes,
    failure: Option<RSocketError>,
}

impl Exchange {
    pub fn new(
        kind: InteractionKind,
        message: Option<Payload>,
        data_mime_type: MimeType,
        metadata_mime_type: MimeType,
        attributes: Attributes,
    ) -> Self {
        Self {
            kind,
            message,
            data_mime_type,
            metadata_mime_type,
            attributes,
            failure: None,
        }
    }

    /// 附带失败原因，供释放阶段使用。
    pub fn with_failure(mut self, failure: RSocketError) -> Self {
        self.failure = Some(failure);
        self
    }

    /// 派生同一交互的完成态视图：保留类型、MIME 与属性袋，去掉消息与失败。
    pub fn completion(&self) -> Self {
        Self {
            kind: self.kind,
            message: None,
            data_mime_type: self.data_mime_type.clone(),
            metadata_mime_type: self.metadata_mime_type.clone(),
            attributes: self.attributes.clone(),
            failure: None,
        }
    }

    pub fn kind(&self) -> InteractionKind {
        self.kind
    }

    pub fn is_request_kind(&self) -> bool {
        self.kind.is_request_kind()
    }

    pub fn message(&self) -> Option<&Payload> {
        self.message.as_ref()
    }

    pub fn data_mime_type(&self) -> &MimeType {
        &self.data_mime_type
    }

    pub fn metadata_mime_type(&self) -> &MimeType {
        &self.metadata_mime_type
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn failure(&self) -> Option<&RSocketError> {
        self.failure.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// 路由目标，来自 [`keys::ROUTE`] 属性。
    pub fn route(&self) -> Option<Arc<String>> {
        self.attributes.get::<String>(keys::ROUTE)
    }

    /// 读取路由，缺失时返回 [`RSocketError::MissingRoute`]。
    pub fn require_route(&self) -> Result<Arc<String>, RSocketError> {
        self.route()
            .ok_or(RSocketError::MissingRoute { kind: self.kind })
    }

    /// 对端信息，由传输包装在获取阶段写入。
    pub fn peer(&self) -> Option<Arc<PeerInfo>> {
        self.attributes.get::<PeerInfo>(keys::PEER_INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(kind: InteractionKind) -> Exchange {
        Exchange::new(
            kind,
            Some(Payload::from_data("hello")),
            MimeType::APPLICATION_JSON,
            MimeType::COMPOSITE_METADATA,
            Attributes::new(),
        )
    }

    #[test]
    fn completion_drops_message_but_shares_attributes() {
        let exchange = exchange(InteractionKind::RequestResponse)
            .with_failure(RSocketError::Cancelled);
        exchange.attributes().insert("trace", 42_u64);

        let completion = exchange.completion();
        assert!(completion.message().is_none());
        assert!(!completion.is_failed());
        assert_eq!(completion.attributes().get::<u64>("trace").as_deref(), Some(&42));
    }

    #[test]
    fn missing_route_names_interaction_kind() {
        let exchange = exchange(InteractionKind::RequestStream);
        assert_eq!(
            exchange.require_route().unwrap_err(),
            RSocketError::MissingRoute {
                kind: InteractionKind::RequestStream
            }
        );

        exchange
            .attributes()
            .insert(keys::ROUTE, String::from("orders.watch"));
        assert_eq!(
            exchange.require_route().expect("route present").as_str(),
            "orders.watch"
        );
    }
}
