//! 逻辑地址的服务实例状态：广播通道与单飞刷新标记。
//!
//! # 教案式概览
//! - **意图（Why）**：同一逻辑地址任意时刻至多一个刷新周期在运行，且标记在每条退出路径上都被释放；
//! - **结构（How）**：`refreshing` 是唯一的持久原子标记，CAS 成功后交给 [`RefreshPermit`]，
//!   许可在 `Drop` 时复位标记，因此成功、失败与取消（刷新任务被中止）都走同一条释放路径；
//! - **契约（What）**：通道初始值为空列表；注册表销毁时发送端被丢弃，订阅者观察到通道关闭。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::{sync::watch, task::AbortHandle};

use crate::{address::TransportAddress, target::TargetList};

pub struct ServiceInstanceData {
    address: TransportAddress,
    refreshing: AtomicBool,
    sender: Mutex<Option<watch::Sender<TargetList>>>,
    receiver: watch::Receiver<TargetList>,
    refresher: Mutex<Option<AbortHandle>>,
}

impl ServiceInstanceData {
    pub fn new(address: TransportAddress) -> Self {
        let (sender, receiver) = watch::channel(TargetList::default());
        Self {
            address,
            refreshing: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            receiver,
            refresher: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &TransportAddress {
        &self.address
    }

    /// 尝试开始一个刷新周期；已有周期在运行时返回 `None`。
    pub fn try_begin_refresh(self: &Arc<Self>) -> Option<RefreshPermit> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshPermit {
                data: Arc::clone(self),
            })
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// 最近一次发射的目标列表。
    pub fn latest(&self) -> TargetList {
        self.receiver.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TargetList> {
        self.receiver.clone()
    }

    /// 发射新列表；通道已关闭时返回 `false`。
    pub fn emit(&self, targets: TargetList) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => {
                sender.send_replace(targets);
                true
            }
            None => false,
        }
    }

    pub(crate) fn attach_refresher(&self, handle: AbortHandle) {
        if let Some(previous) = self.refresher.lock().replace(handle) {
            previous.abort();
        }
    }

    /// 中止刷新任务并关闭通道。
    pub fn close(&self) {
        if let Some(refresher) = self.refresher.lock().take() {
            refresher.abort();
        }
        self.sender.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl fmt::Debug for ServiceInstanceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInstanceData")
            .field("address", &self.address.as_str())
            .field("refreshing", &self.is_refreshing())
            .field("targets", &self.latest().len())
            .finish()
    }
}

/// 单飞刷新许可，`Drop` 时释放标记。
pub struct RefreshPermit {
    data: Arc<ServiceInstanceData>,
}

impl RefreshPermit {
    pub fn data(&self) -> &Arc<ServiceInstanceData> {
        &self.data
    }
}

impl Drop for RefreshPermit {
    fn drop(&mut self) {
        self.data.refreshing.store(false, Ordering::Release);
    }
}

impl fmt::Debug for RefreshPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshPermit")
            .field("address", &self.data.address.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> Arc<ServiceInstanceData> {
        Arc::new(ServiceInstanceData::new(
            TransportAddress::parse("tcp://user-service:7000").expect("address"),
        ))
    }

    #[test]
    fn only_one_permit_at_a_time() {
        let data = data();
        let permit = data.try_begin_refresh().expect("first attempt acquires");
        assert!(data.try_begin_refresh().is_none(), "第二次尝试必须被跳过");
        drop(permit);
        assert!(!data.is_refreshing());
        assert!(data.try_begin_refresh().is_some());
    }

    #[test]
    fn close_completes_subscribers() {
        let data = data();
        let receiver = data.subscribe();
        assert!(data.emit(TargetList::not_found("user-service")));
        assert!(receiver.borrow().is_not_found());

        data.close();
        assert!(data.is_closed());
        assert!(!data.emit(TargetList::default()));
        assert!(receiver.has_changed().is_err(), "发送端丢弃后通道应关闭");
    }
}
