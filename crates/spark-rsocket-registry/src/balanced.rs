//! # LoadBalancedRSocket：在目标通道之上做负载均衡的连接
//!
//! ## 核心意图（Why）
//! - 逻辑地址的调用方只拿到一个句柄，成员变化对其透明；
//! - 每次交互读取通道的最新内容，首次交互会等待第一份非空目标列表。
//!
//! ## 结构（How）
//! - 成员表以 [`ArcSwap`] 持有，读路径只做 `load`；目标列表变化时在互斥锁内整表替换，
//!   沿用键相同的旧成员，释放被移除的成员；
//! - 成员连接惰性建立，已释放的连接在下一次选中时重建；
//! - 哨兵目标建立的连接总是以 [`RSocketError::InstanceNotFound`] 失败。
//!
//! ## 契约（What）
//! - 通道在产生任何非空列表之前就已关闭（注册表销毁）时，交互以 `InstanceNotFound` 失败；
//! - `dispose` 释放全部成员连接，之后的交互返回 [`RSocketError::Disposed`]。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::{
    StreamExt,
    future,
    stream::{self, BoxStream},
};
use parking_lot::Mutex;
use spark_rsocket::{ConnectionId, Payload, PayloadStream, RSocket, RSocketError};
use tokio::sync::watch;
use tracing::debug;

use crate::{
    connector::ConnectionFactory,
    strategy::LoadBalanceStrategy,
    target::{InstanceNotFoundRSocket, LoadBalanceTarget, TargetEndpoint, TargetList},
};

const TARGET: &str = "spark.rsocket.balancer";

#[derive(Clone)]
pub struct LoadBalancedRSocket {
    inner: Arc<Balancer>,
}

struct Balancer {
    id: ConnectionId,
    service: String,
    targets: watch::Receiver<TargetList>,
    factory: ConnectionFactory,
    strategy: Arc<dyn LoadBalanceStrategy>,
    members: ArcSwap<MemberTable>,
    reconcile_lock: Mutex<()>,
    disposed: AtomicBool,
}

#[derive(Default)]
struct MemberTable {
    members: Vec<Arc<Member>>,
}

impl MemberTable {
    fn matches(&self, targets: &TargetList) -> bool {
        self.members.len() == targets.len()
            && self
                .members
                .iter()
                .zip(targets.iter())
                .all(|(member, target)| member.target.key() == target.key())
    }
}

struct Member {
    target: LoadBalanceTarget,
    connection: Mutex<Option<Arc<dyn RSocket>>>,
}

impl Member {
    fn new(target: LoadBalanceTarget) -> Self {
        Self {
            target,
            connection: Mutex::new(None),
        }
    }

    fn connect(&self, factory: &ConnectionFactory) -> Result<Arc<dyn RSocket>, RSocketError> {
        let mut slot = self.connection.lock();
        if let Some(existing) = slot.as_ref()
            && !existing.is_disposed()
        {
            return Ok(Arc::clone(existing));
        }
        let fresh = match self.target.endpoint() {
            TargetEndpoint::Address(address) => factory.create(address)?,
            TargetEndpoint::InstanceNotFound { service } => {
                factory.wrap(Arc::new(InstanceNotFoundRSocket::new(service.clone())))
            }
        };
        if let Some(stale) = slot.replace(Arc::clone(&fresh)) {
            // 底层已自行关闭，仍需经包装层回收对端信息缓存条目。
            stale.dispose();
            debug!(target: TARGET, key = self.target.key(), connection = %fresh.id(), "replaced disposed member connection");
        }
        Ok(fresh)
    }

    fn dispose(&self) {
        if let Some(connection) = self.connection.lock().take() {
            connection.dispose();
        }
    }
}

impl LoadBalancedRSocket {
    pub fn new(
        service: impl Into<String>,
        targets: watch::Receiver<TargetList>,
        factory: ConnectionFactory,
        strategy: Arc<dyn LoadBalanceStrategy>,
    ) -> Self {
        Self {
            inner: Arc::new(Balancer {
                id: ConnectionId::next(),
                service: service.into(),
                targets,
                factory,
                strategy,
                members: ArcSwap::from_pointee(MemberTable::default()),
                reconcile_lock: Mutex::new(()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn strategy_name(&self) -> &'static str {
        self.inner.strategy.name()
    }

    /// 当前成员的目标键，按成员表顺序。
    pub fn member_keys(&self) -> Vec<String> {
        self.inner
            .members
            .load()
            .members
            .iter()
            .map(|member| member.target.key().to_owned())
            .collect()
    }

    /// 按策略选出一个成员连接。
    pub async fn select(&self) -> Result<Arc<dyn RSocket>, RSocketError> {
        self.inner.select().await
    }
}

impl Balancer {
    async fn current_targets(&self) -> Result<TargetList, RSocketError> {
        let mut targets = self.targets.clone();
        match targets.wait_for(|list| !list.is_empty()).await {
            Ok(list) => Ok(list.clone()),
            Err(_) => Err(RSocketError::InstanceNotFound {
                address: self.service.clone(),
            }),
        }
    }

    async fn select(&self) -> Result<Arc<dyn RSocket>, RSocketError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(self.disposed_error());
        }
        let targets = self.current_targets().await?;
        let table = self.reconcile(&targets);
        let index = self
            .strategy
            .select(targets.as_slice())
            .ok_or_else(|| RSocketError::InstanceNotFound {
                address: self.service.clone(),
            })?;
        let member = table
            .members
            .get(index)
            .ok_or_else(|| RSocketError::InstanceNotFound {
                address: self.service.clone(),
            })?;
        member.connect(&self.factory)
    }

    /// 让成员表与目标列表一致，返回一致后的成员表。
    fn reconcile(&self, targets: &TargetList) -> Arc<MemberTable> {
        let current = self.members.load_full();
        if current.matches(targets) {
            return current;
        }

        let _guard = self.reconcile_lock.lock();
        let current = self.members.load_full();
        if current.matches(targets) {
            return current;
        }

        let members: Vec<Arc<Member>> = targets
            .iter()
            .map(|target| {
                current
                    .members
                    .iter()
                    .find(|member| member.target.key() == target.key())
                    .cloned()
                    .unwrap_or_else(|| Arc::new(Member::new(target.clone())))
            })
            .collect();
        let removed: Vec<&Arc<Member>> = current
            .members
            .iter()
            .filter(|old| !members.iter().any(|kept| Arc::ptr_eq(kept, old)))
            .collect();
        for member in &removed {
            member.dispose();
        }
        debug!(
            target: TARGET,
            service = %self.service,
            members = members.len(),
            removed = removed.len(),
            "load balancer members reconciled"
        );

        let table = Arc::new(MemberTable { members });
        self.members.store(Arc::clone(&table));
        table
    }

    fn disposed_error(&self) -> RSocketError {
        RSocketError::Disposed {
            resource: format!("load balancer for `{}`", self.service),
        }
    }
}

#[async_trait]
impl RSocket for LoadBalancedRSocket {
    fn id(&self) -> ConnectionId {
        self.inner.id
    }

    async fn fire_and_forget(&self, payload: Payload) -> Result<(), RSocketError> {
        self.inner.select().await?.fire_and_forget(payload).await
    }

    async fn request_response(&self, payload: Payload) -> Result<Payload, RSocketError> {
        self.inner.select().await?.request_response(payload).await
    }

    fn request_stream(&self, payload: Payload) -> PayloadStream {
        let inner = Arc::clone(&self.inner);
        stream::once(async move {
            inner
                .select()
                .await
                .map(|rsocket| rsocket.request_stream(payload))
        })
        .flat_map(flatten_selected)
        .boxed()
    }

    fn request_channel(&self, payloads: BoxStream<'static, Payload>) -> PayloadStream {
        let inner = Arc::clone(&self.inner);
        stream::once(async move {
            inner
                .select()
                .await
                .map(|rsocket| rsocket.request_channel(payloads))
        })
        .flat_map(flatten_selected)
        .boxed()
    }

    async fn metadata_push(&self, payload: Payload) -> Result<(), RSocketError> {
        self.inner.select().await?.metadata_push(payload).await
    }

    fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = self.inner.reconcile_lock.lock();
        for member in &self.inner.members.load().members {
            member.dispose();
        }
        self.inner.members.store(Arc::new(MemberTable::default()));
        debug!(target: TARGET, service = %self.inner.service, "load balancer disposed");
    }
}

fn flatten_selected(selected: Result<PayloadStream, RSocketError>) -> PayloadStream {
    match selected {
        Ok(responses) => responses,
        Err(err) => stream::once(future::ready(Err(err))).boxed(),
    }
}

impl fmt::Debug for LoadBalancedRSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancedRSocket")
            .field("id", &self.inner.id)
            .field("service", &self.inner.service)
            .field("strategy", &self.inner.strategy.name())
            .field("members", &self.member_keys())
            .finish()
    }
}
