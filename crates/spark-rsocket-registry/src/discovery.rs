use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use spark_rsocket::RSocketError;

/// 服务发现返回的一个实例。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceInstance {
    pub host: String,
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// 服务发现源：逻辑服务名到实例列表。
///
/// - 返回空列表表示当前无可用实例，与查询失败（`Err`）语义不同；
/// - 实现应自行处理超时，刷新周期不会为单次查询设置截止时间。
#[async_trait]
pub trait DiscoverySource: Send + Sync + 'static {
    async fn instances(&self, service: &str) -> Result<Vec<ServiceInstance>, RSocketError>;
}

/// 内存中的静态发现源，适合固定拓扑与测试。
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    services: DashMap<String, Vec<ServiceInstance>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(
        self,
        service: impl Into<String>,
        instances: impl IntoIterator<Item = ServiceInstance>,
    ) -> Self {
        self.set(service, instances);
        self
    }

    /// 替换服务的实例列表。
    pub fn set(
        &self,
        service: impl Into<String>,
        instances: impl IntoIterator<Item = ServiceInstance>,
    ) {
        self.services
            .insert(service.into(), instances.into_iter().collect());
    }

    pub fn remove(&self, service: &str) {
        self.services.remove(service);
    }
}

#[async_trait]
impl DiscoverySource for StaticDiscovery {
    async fn instances(&self, service: &str) -> Result<Vec<ServiceInstance>, RSocketError> {
        Ok(self
            .services
            .get(service)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}
