//! # DiscoveryRegistry：服务发现驱动的动态连接注册表
//!
//! ## 核心意图（Why）
//! - IP 字面量地址直接交给基础注册表；逻辑服务名经服务发现展开为一组实例，并随实例变化自动更新；
//! - 调用方始终只拿到一个负载均衡句柄，成员增减与“无实例”都在句柄内部处理。
//!
//! ## 结构（How）
//! - 每个逻辑地址一份 [`ServiceInstanceData`]（首次访问时创建，通道以空列表起步）与一个周期刷新任务；
//! - 刷新任务以 `interval` 驱动（首个 tick 立即触发），每个 tick 在 `JoinSet` 中启动一个刷新周期，
//!   周期通过 [`RefreshPermit`](crate::RefreshPermit) 保证单飞；任务被中止时 `JoinSet` 连带中止在途周期，
//!   许可随之释放；
//! - 刷新周期并发执行两件事：查询发现源（过滤停用实例、应用端口覆盖）与读取上一次发射的列表，
//!   然后按 [`diff`] 决定是否发射。
//!
//! ## 契约（What）
//! - 发现源失败只影响当前周期：记录告警、放弃本周期，下一个 tick 重试；
//! - `destroy`：中止刷新任务并关闭通道，释放负载均衡句柄，最后销毁基础注册表；可重复调用。
//!
//! ## 风险提示（Trade-offs）
//! - 刷新任务需要 Tokio 运行时；在运行时之外首次访问逻辑地址会返回 [`RSocketError::Runtime`]。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::{DashMap, mapref::entry::Entry};
use spark_rsocket::{InterceptorPipeline, RSocket, RSocketError};
use tokio::{
    runtime::Handle,
    sync::watch,
    task::JoinSet,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    address::TransportAddress,
    balanced::LoadBalancedRSocket,
    config::{ConfigError, DiscoveryConfig},
    connector::{ConnectionFactory, Connector},
    discovery::{DiscoverySource, ServiceInstance},
    instance::ServiceInstanceData,
    registry::{ConnectionRegistry, Registry},
    strategy::StrategySelector,
    target::{Diff, LoadBalanceTarget, TargetList, diff},
};

const TARGET: &str = "spark.rsocket.discovery";

/// 单次刷新周期的结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// 已有周期在运行，或通道已关闭。
    Skipped,
    /// 成员集合与上一次发射相同。
    Unchanged,
    /// 发射了新的目标列表。
    Emitted(TargetList),
    /// 发射了“无实例”哨兵。
    NotFound,
    /// 发现源失败，本周期放弃。
    Failed(RSocketError),
}

pub struct DiscoveryRegistryBuilder {
    connector: Arc<dyn Connector>,
    discovery: Arc<dyn DiscoverySource>,
    config: DiscoveryConfig,
    selector: Option<Arc<dyn StrategySelector>>,
    pipeline: Option<InterceptorPipeline>,
}

impl DiscoveryRegistryBuilder {
    pub fn config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// 按地址挑选负载均衡策略；缺省使用配置中的 `strategy`。
    pub fn strategy_selector<S>(mut self, selector: S) -> Self
    where
        S: StrategySelector,
    {
        self.selector = Some(Arc::new(selector));
        self
    }

    /// 注册表新建的每个连接都经由该管线包装。
    pub fn pipeline(mut self, pipeline: InterceptorPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn build(self) -> Result<DiscoveryRegistry, ConfigError> {
        self.config.validate()?;
        let mut factory = ConnectionFactory::new(self.connector);
        if let Some(pipeline) = self.pipeline {
            factory = factory.with_pipeline(pipeline);
        }
        let strategy = self.config.strategy;
        let selector = self
            .selector
            .unwrap_or_else(|| Arc::new(strategy) as Arc<dyn StrategySelector>);

        Ok(DiscoveryRegistry {
            base: ConnectionRegistry::new(factory),
            discovery: self.discovery,
            config: Arc::new(self.config),
            selector,
            services: DashMap::new(),
            balancers: DashMap::new(),
            destroyed: AtomicBool::new(false),
        })
    }
}

pub struct DiscoveryRegistry {
    base: ConnectionRegistry,
    discovery: Arc<dyn DiscoverySource>,
    config: Arc<DiscoveryConfig>,
    selector: Arc<dyn StrategySelector>,
    services: DashMap<TransportAddress, Arc<ServiceInstanceData>>,
    balancers: DashMap<TransportAddress, Arc<LoadBalancedRSocket>>,
    destroyed: AtomicBool,
}

impl DiscoveryRegistry {
    pub fn builder(
        connector: Arc<dyn Connector>,
        discovery: Arc<dyn DiscoverySource>,
    ) -> DiscoveryRegistryBuilder {
        DiscoveryRegistryBuilder {
            connector,
            discovery,
            config: DiscoveryConfig::default(),
            selector: None,
            pipeline: None,
        }
    }

    pub fn get(&self, address: &TransportAddress) -> Result<Arc<dyn RSocket>, RSocketError> {
        if self.is_destroyed() {
            return Err(self.disposed_error());
        }
        if address.is_ip_literal() {
            return self.base.get(address);
        }
        self.base.factory().check(address)?;
        let data = self.service(address)?;

        let balancer = match self.balancers.entry(address.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_disposed() {
                    let fresh = self.balancer(address, &data);
                    occupied.insert(Arc::clone(&fresh));
                    fresh
                } else {
                    Arc::clone(occupied.get())
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = self.balancer(address, &data);
                vacant.insert(Arc::clone(&fresh));
                fresh
            }
        };

        // destroy 可能在插入前完成了清空，插入的句柄只能在这里回收。
        if self.is_destroyed() {
            self.balancers
                .remove_if(address, |_, cached| Arc::ptr_eq(cached, &balancer));
            balancer.dispose();
            return Err(self.disposed_error());
        }
        Ok(balancer as Arc<dyn RSocket>)
    }

    /// 立即对逻辑地址执行一次刷新周期。
    pub async fn refresh(&self, address: &TransportAddress) -> Result<RefreshOutcome, RSocketError> {
        if self.is_destroyed() {
            return Err(self.disposed_error());
        }
        if address.is_ip_literal() {
            return Err(RSocketError::invalid_argument(format!(
                "`{address}` is an IP literal and is not resolved through discovery"
            )));
        }
        let data = self.service(address)?;
        Ok(self.refresher(data).refresh().await)
    }

    /// 最近一次发射的目标列表；地址从未被访问时返回 `None`。
    pub fn targets(&self, address: &TransportAddress) -> Option<TargetList> {
        self.services.get(address).map(|data| data.latest())
    }

    pub fn subscribe(&self, address: &TransportAddress) -> Option<watch::Receiver<TargetList>> {
        self.services.get(address).map(|data| data.subscribe())
    }

    pub fn base(&self) -> &ConnectionRegistry {
        &self.base
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// 中止刷新、关闭通道、释放负载均衡句柄，最后销毁基础注册表。
    pub fn destroy(&self) {
        let first = !self.destroyed.swap(true, Ordering::AcqRel);
        for entry in self.services.iter() {
            entry.value().close();
        }
        self.services.clear();
        for entry in self.balancers.iter() {
            entry.value().dispose();
        }
        self.balancers.clear();
        self.base.destroy();
        if first {
            info!(target: TARGET, "discovery registry destroyed");
        }
    }

    fn service(&self, address: &TransportAddress) -> Result<Arc<ServiceInstanceData>, RSocketError> {
        if let Some(existing) = self.services.get(address) {
            return Ok(Arc::clone(existing.value()));
        }
        let handle = Handle::try_current().map_err(|err| RSocketError::Runtime {
            detail: format!("discovery refresh for `{address}` needs a tokio runtime: {err}"),
        })?;

        match self.services.entry(address.clone()) {
            Entry::Occupied(occupied) => Ok(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                let data = Arc::new(ServiceInstanceData::new(address.clone()));
                let task = handle.spawn(self.refresher(Arc::clone(&data)).run(self.config.refresh_interval()));
                data.attach_refresher(task.abort_handle());
                vacant.insert(Arc::clone(&data));
                if self.is_destroyed() {
                    self.services
                        .remove_if(address, |_, cached| Arc::ptr_eq(cached, &data));
                    data.close();
                    return Err(self.disposed_error());
                }
                info!(
                    target: TARGET,
                    %address,
                    interval_ms = self.config.refresh_interval_ms,
                    "service discovery refresher started"
                );
                Ok(data)
            }
        }
    }

    fn refresher(&self, data: Arc<ServiceInstanceData>) -> Refresher {
        Refresher {
            data,
            discovery: Arc::clone(&self.discovery),
            config: Arc::clone(&self.config),
        }
    }

    fn balancer(
        &self,
        address: &TransportAddress,
        data: &ServiceInstanceData,
    ) -> Arc<LoadBalancedRSocket> {
        let strategy = self.selector.select(address);
        debug!(target: TARGET, %address, strategy = strategy.name(), "load balancer created");
        Arc::new(LoadBalancedRSocket::new(
            address.service_name(),
            data.subscribe(),
            self.base.factory().clone(),
            strategy,
        ))
    }

    fn disposed_error(&self) -> RSocketError {
        RSocketError::Disposed {
            resource: "discovery registry".to_owned(),
        }
    }
}

impl Registry for DiscoveryRegistry {
    fn get(&self, address: &TransportAddress) -> Result<Arc<dyn RSocket>, RSocketError> {
        DiscoveryRegistry::get(self, address)
    }

    fn destroy(&self) {
        DiscoveryRegistry::destroy(self);
    }
}

impl Drop for DiscoveryRegistry {
    fn drop(&mut self) {
        for entry in self.services.iter() {
            entry.value().close();
        }
    }
}

impl fmt::Debug for DiscoveryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryRegistry")
            .field("services", &self.services.len())
            .field("balancers", &self.balancers.len())
            .field("base", &self.base)
            .field("config", &self.config)
            .finish()
    }
}

/// 单个逻辑地址的刷新执行者。
#[derive(Clone)]
struct Refresher {
    data: Arc<ServiceInstanceData>,
    discovery: Arc<dyn DiscoverySource>,
    config: Arc<DiscoveryConfig>,
}

impl Refresher {
    async fn run(self, period: Duration) {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = JoinSet::new();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cycle = self.clone();
                    cycles.spawn(async move { cycle.refresh().await });
                }
                Some(_) = cycles.join_next(), if !cycles.is_empty() => {}
            }
        }
    }

    async fn refresh(&self) -> RefreshOutcome {
        let address = self.data.address();
        let Some(_permit) = self.data.try_begin_refresh() else {
            debug!(target: TARGET, %address, "refresh already running, tick skipped");
            return RefreshOutcome::Skipped;
        };
        let service = address.service_name();

        let (found, previous) =
            tokio::join!(self.discovery.instances(service), async { self.data.latest() });
        let instances = match found {
            Ok(instances) => instances,
            Err(err) => {
                warn!(
                    target: TARGET,
                    %address,
                    code = err.code(),
                    error = %err,
                    "discovery query failed, cycle abandoned"
                );
                return RefreshOutcome::Failed(err);
            }
        };

        match diff(service, &previous, self.targets(&instances)) {
            Diff::Unchanged => {
                debug!(target: TARGET, %address, "membership unchanged");
                RefreshOutcome::Unchanged
            }
            Diff::Emit(targets) => {
                let not_found = targets.is_not_found();
                if !self.data.emit(targets.clone()) {
                    debug!(target: TARGET, %address, "channel closed, emission dropped");
                    return RefreshOutcome::Skipped;
                }
                if not_found {
                    warn!(target: TARGET, %address, "no available instance, sentinel target emitted");
                    RefreshOutcome::NotFound
                } else {
                    info!(target: TARGET, %address, targets = targets.len(), "load balance targets updated");
                    RefreshOutcome::Emitted(targets)
                }
            }
        }
    }

    /// 过滤停用实例并应用端口覆盖，以 `host:port` 为键。
    fn targets(&self, instances: &[ServiceInstance]) -> BTreeMap<String, LoadBalanceTarget> {
        let address = self.data.address();
        let fallback_port = address.port().unwrap_or(self.config.default_port);
        let mut targets = BTreeMap::new();

        for instance in instances {
            let opted_out = instance
                .metadata(&self.config.enabled_metadata_key)
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("false"));
            if opted_out {
                debug!(target: TARGET, %address, host = %instance.host, "instance opted out");
                continue;
            }

            let port = match instance.metadata(&self.config.port_metadata_key) {
                Some(raw) => raw.trim().parse::<u16>().unwrap_or_else(|_| {
                    warn!(
                        target: TARGET,
                        %address,
                        host = %instance.host,
                        value = raw,
                        "invalid port override, using fallback port"
                    );
                    fallback_port
                }),
                None => fallback_port,
            };

            match address.with_endpoint(&instance.host, port) {
                Ok(endpoint) => {
                    let key = endpoint.authority();
                    targets.insert(key.clone(), LoadBalanceTarget::new(key, endpoint));
                }
                Err(err) => {
                    warn!(target: TARGET, %address, host = %instance.host, error = %err, "instance skipped");
                }
            }
        }
        targets
    }
}
