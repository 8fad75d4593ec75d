//! 负载均衡策略。
//!
//! 策略只负责从当前目标中选出一个下标；成员连接的建立与回收由
//! [`LoadBalancedRSocket`](crate::LoadBalancedRSocket) 负责。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use crate::{address::TransportAddress, target::LoadBalanceTarget};

pub trait LoadBalanceStrategy: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// 选出目标下标；目标为空时返回 `None`。
    fn select(&self, targets: &[LoadBalanceTarget]) -> Option<usize>;
}

/// 按顺序轮转。
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalanceStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, targets: &[LoadBalanceTarget]) -> Option<usize> {
        match targets.len() {
            0 => None,
            1 => Some(0),
            len => Some(self.counter.fetch_add(1, Ordering::Relaxed) % len),
        }
    }
}

/// 基于 xorshift 的伪随机选择，种子取自系统时间。
#[derive(Debug)]
pub struct RandomStrategy {
    state: AtomicU64,
}

impl RandomStrategy {
    pub fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(0);
        Self::with_seed(nanos)
    }

    pub fn with_seed(seed: u64) -> Self {
        // xorshift 的状态不能为 0。
        Self {
            state: AtomicU64::new(seed | 1),
        }
    }

    fn next_u64(&self) -> u64 {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            let mut next = current;
            next ^= next << 13;
            next ^= next >> 7;
            next ^= next << 17;
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalanceStrategy for RandomStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&self, targets: &[LoadBalanceTarget]) -> Option<usize> {
        match targets.len() {
            0 => None,
            1 => Some(0),
            len => Some((self.next_u64() % len as u64) as usize),
        }
    }
}

/// 可配置的内建策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    Random,
}

impl StrategyKind {
    pub fn build(self) -> Arc<dyn LoadBalanceStrategy> {
        match self {
            StrategyKind::RoundRobin => Arc::new(RoundRobinStrategy::new()),
            StrategyKind::Random => Arc::new(RandomStrategy::new()),
        }
    }
}

/// 按逻辑地址挑选策略，每个地址的负载均衡连接创建时调用一次。
pub trait StrategySelector: Send + Sync + 'static {
    fn select(&self, address: &TransportAddress) -> Arc<dyn LoadBalanceStrategy>;
}

impl StrategySelector for StrategyKind {
    fn select(&self, _address: &TransportAddress) -> Arc<dyn LoadBalanceStrategy> {
        self.build()
    }
}

impl<F> StrategySelector for F
where
    F: Fn(&TransportAddress) -> Arc<dyn LoadBalanceStrategy> + Send + Sync + 'static,
{
    fn select(&self, address: &TransportAddress) -> Arc<dyn LoadBalanceStrategy> {
        self(address)
    }
}
