//! spark-rsocket-registry: 基于服务发现的 RSocket 动态连接注册表。
//!
//! # 教案式概览
//! - **意图（Why）**：调用方以传输地址获取连接；IP 字面量地址直连并缓存，逻辑服务名经服务发现展开为
//!   一组实例并在其上做负载均衡，实例增减对调用方透明；
//! - **结构（How）**：
//!   - [`registry`]：基础注册表，地址到连接的“计算或复用”缓存；
//!   - [`discovery_registry`]：为逻辑地址维护目标广播通道与单飞周期刷新；
//!   - [`target`] / [`instance`]：目标列表、差分规则、哨兵与单飞许可；
//!   - [`balanced`] / [`strategy`]：负载均衡句柄与可插拔策略；
//!   - [`config`]：可由 TOML 加载的刷新配置；
//! - **契约（What）**：
//!   - scheme 不受支持的地址在调用边界以 `rsocket.argument.unsupported_scheme` 快速失败；
//!   - 逻辑地址无实例时，交互以 `rsocket.instance.not_found` 失败并携带逻辑服务名；
//!   - `destroy` 可重复调用。
//! - **风险提示（Trade-offs）**：逻辑地址的刷新任务运行在调用方所在的 Tokio 运行时上。

pub mod address;
pub mod balanced;
pub mod config;
pub mod connector;
pub mod discovery;
pub mod discovery_registry;
pub mod instance;
pub mod registry;
pub mod strategy;
pub mod target;

pub use address::TransportAddress;
pub use balanced::LoadBalancedRSocket;
pub use config::{ConfigError, DiscoveryConfig};
pub use connector::{ConnectionFactory, Connector};
pub use discovery::{DiscoverySource, ServiceInstance, StaticDiscovery};
pub use discovery_registry::{DiscoveryRegistry, DiscoveryRegistryBuilder, RefreshOutcome};
pub use instance::{RefreshPermit, ServiceInstanceData};
pub use registry::{ConnectionRegistry, Registry};
pub use strategy::{
    LoadBalanceStrategy, RandomStrategy, RoundRobinStrategy, StrategyKind, StrategySelector,
};
pub use target::{
    Diff, InstanceNotFoundRSocket, LoadBalanceTarget, NOT_FOUND_KEY_PREFIX, TargetEndpoint,
    TargetList, diff,
};
