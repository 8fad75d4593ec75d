use std::fmt;
use std::sync::Arc;

use spark_rsocket::{InterceptorPipeline, RSocket, RSocketError};

use crate::address::TransportAddress;

/// 外部提供的连接器：把传输地址变为连接句柄。
///
/// # 契约说明（What）
/// - `supports`：声明可处理的 scheme，默认 `tcp`、`ws`、`wss`；
/// - `connect`：同步返回惰性句柄，真实握手由句柄在首次交互时完成；失败以 [`RSocketError`] 返回。
pub trait Connector: Send + Sync + 'static {
    fn supports(&self, scheme: &str) -> bool {
        matches!(scheme, "tcp" | "ws" | "wss")
    }

    fn connect(&self, address: &TransportAddress) -> Result<Arc<dyn RSocket>, RSocketError>;
}

impl<F> Connector for F
where
    F: Fn(&TransportAddress) -> Result<Arc<dyn RSocket>, RSocketError> + Send + Sync + 'static,
{
    fn connect(&self, address: &TransportAddress) -> Result<Arc<dyn RSocket>, RSocketError> {
        self(address)
    }
}

/// 连接器与可选拦截管线的组合，注册表与负载均衡成员共用。
#[derive(Clone)]
pub struct ConnectionFactory {
    connector: Arc<dyn Connector>,
    pipeline: Option<InterceptorPipeline>,
}

impl ConnectionFactory {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            pipeline: None,
        }
    }

    /// 新建的每个句柄都经由该管线包装。
    pub fn with_pipeline(mut self, pipeline: InterceptorPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn pipeline(&self) -> Option<&InterceptorPipeline> {
        self.pipeline.as_ref()
    }

    /// 校验 scheme，不支持时快速失败。
    pub fn check(&self, address: &TransportAddress) -> Result<(), RSocketError> {
        if self.connector.supports(address.scheme()) {
            Ok(())
        } else {
            Err(RSocketError::UnsupportedScheme {
                scheme: address.scheme().to_owned(),
                address: address.to_string(),
            })
        }
    }

    pub fn create(&self, address: &TransportAddress) -> Result<Arc<dyn RSocket>, RSocketError> {
        self.check(address)?;
        let rsocket = self.connector.connect(address)?;
        Ok(self.wrap(rsocket))
    }

    pub fn wrap(&self, rsocket: Arc<dyn RSocket>) -> Arc<dyn RSocket> {
        match &self.pipeline {
            Some(pipeline) => pipeline.wrap(rsocket) as Arc<dyn RSocket>,
            None => rsocket,
        }
    }
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}
