//! # ConnectionRegistry：按传输地址缓存连接句柄
//!
//! ## 核心意图（Why）
//! - 同一地址的交互复用同一个连接，首次访问时才创建；
//! - 缓存的句柄被对端或调用方释放后，下一次访问透明地重建。
//!
//! ## 行为契约（What）
//! - `get`：基于 `DashMap::entry` 原子地“计算或复用”，条目缺失或已释放时经 [`ConnectionFactory`] 新建；
//!   scheme 不受支持时返回 [`RSocketError::UnsupportedScheme`]；
//! - `destroy`：释放所有缓存句柄后清空缓存，可重复调用；销毁后的 `get` 返回 [`RSocketError::Disposed`]，
//!   与销毁并发插入的句柄由 `get` 自行移除并释放。
//!
//! ## 风险提示（Trade-offs）
//! - 新建发生在分片写锁内，连接器必须是同步且廉价的（返回惰性句柄），否则会阻塞同分片的其他地址。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::{DashMap, mapref::entry::Entry};
use spark_rsocket::{RSocket, RSocketError};
use tracing::{debug, info};

use crate::{address::TransportAddress, connector::ConnectionFactory};

const TARGET: &str = "spark.rsocket.registry";

/// 注册表的对外合约。
pub trait Registry: Send + Sync {
    fn get(&self, address: &TransportAddress) -> Result<Arc<dyn RSocket>, RSocketError>;

    fn destroy(&self);
}

pub struct ConnectionRegistry {
    factory: ConnectionFactory,
    connections: DashMap<TransportAddress, Arc<dyn RSocket>>,
    destroyed: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new(factory: ConnectionFactory) -> Self {
        Self {
            factory,
            connections: DashMap::new(),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    pub fn get(&self, address: &TransportAddress) -> Result<Arc<dyn RSocket>, RSocketError> {
        if self.is_destroyed() {
            return Err(Self::disposed_error());
        }
        self.factory.check(address)?;

        let connection = match self.connections.entry(address.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_disposed() {
                    let fresh = self.factory.create(address)?;
                    let stale = occupied.insert(Arc::clone(&fresh));
                    // 包装层在 dispose 中回收对端信息缓存条目。
                    stale.dispose();
                    debug!(target: TARGET, %address, connection = %fresh.id(), "replaced disposed connection");
                    fresh
                } else {
                    Arc::clone(occupied.get())
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = self.factory.create(address)?;
                vacant.insert(Arc::clone(&fresh));
                debug!(target: TARGET, %address, connection = %fresh.id(), "connection created");
                fresh
            }
        };

        // 与 destroy 并发时，插入可能晚于其清空；此时由 get 负责回收。
        if self.is_destroyed() {
            self.connections
                .remove_if(address, |_, cached| Arc::ptr_eq(cached, &connection));
            connection.dispose();
            return Err(Self::disposed_error());
        }
        Ok(connection)
    }

    /// 释放全部缓存连接并清空，可重复调用。
    ///
    /// 已自行关闭的句柄同样调用 `dispose`，以便包装层回收对端信息缓存条目。
    pub fn destroy(&self) {
        let first = !self.destroyed.swap(true, Ordering::AcqRel);
        let mut disposed = 0_usize;
        for entry in self.connections.iter() {
            entry.value().dispose();
            disposed += 1;
        }
        self.connections.clear();
        if first {
            info!(target: TARGET, disposed, "connection registry destroyed");
        }
    }

    fn disposed_error() -> RSocketError {
        RSocketError::Disposed {
            resource: "connection registry".to_owned(),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// 查看缓存的句柄，不触发创建。
    pub fn cached(&self, address: &TransportAddress) -> Option<Arc<dyn RSocket>> {
        self.connections
            .get(address)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Registry for ConnectionRegistry {
    fn get(&self, address: &TransportAddress) -> Result<Arc<dyn RSocket>, RSocketError> {
        ConnectionRegistry::get(self, address)
    }

    fn destroy(&self) {
        ConnectionRegistry::destroy(self);
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
