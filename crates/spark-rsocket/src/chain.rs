//! # chain：拦截器链的持久化单链表
//!
//! ## 核心意图（Why）
//! - 以同一份有序拦截器列表构建三条互相独立的链：Before、After、Unexpected；
//! - Before 按注册顺序触发（进入嵌套作用域），After/Unexpected 按注册逆序触发（栈展开），
//!   两者合起来就是中间件的“洋葱”模型。
//!
//! ## 结构（How）
//! - 链节点 `{interceptor?, next?}` 以 `Arc` 串联，构建后不可变，尾部统一指向进程内共享的哨兵节点；
//! - Before 链从列表末尾向前折叠，After/Unexpected 链从列表头部向后折叠，每次折叠把上一次结果作为 `next`；
//! - 构建 O(n)，每跳 O(1)，无下标、无环。
//!
//! ## 契约（What）
//! - `next(exchange)`：链为空时立即完成；当前节点拦截器与子链均存在时调用对应钩子，
//!   由拦截器负责继续调用 `sub_chain.next`；抵达哨兵时立即完成；
//! - `is_empty` 在构建时确定，是“什么都不做”的快速判断依据，调用方不应假设任何拦截器已执行。

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use futures::future::{self, BoxFuture};

use crate::{error::RSocketError, exchange::Exchange, interceptor::Interceptor};

mod sealed {
    pub trait Sealed {}
}

/// 链类型标记：决定调用哪个钩子以及构建方向。
pub trait ChainKind: sealed::Sealed + Sized + Send + Sync + 'static {
    /// 阶段名，用于日志。
    const STAGE: &'static str;
    /// 为 `true` 时调用顺序与注册顺序相反。
    const REVERSED: bool;

    fn invoke<'a>(
        interceptor: &'a dyn Interceptor,
        exchange: &'a Exchange,
        chain: &'a Chain<Self>,
    ) -> BoxFuture<'a, Result<(), RSocketError>>;
}

/// Before 链标记。
#[derive(Debug)]
pub enum Before {}

/// After 链标记。
#[derive(Debug)]
pub enum After {}

/// Unexpected 链标记。
#[derive(Debug)]
pub enum Unexpected {}

impl sealed::Sealed for Before {}
impl sealed::Sealed for After {}
impl sealed::Sealed for Unexpected {}

impl ChainKind for Before {
    const STAGE: &'static str = "before";
    const REVERSED: bool = false;

    fn invoke<'a>(
        interceptor: &'a dyn Interceptor,
        exchange: &'a Exchange,
        chain: &'a Chain<Self>,
    ) -> BoxFuture<'a, Result<(), RSocketError>> {
        interceptor.intercept_before(exchange, chain)
    }
}

impl ChainKind for After {
    const STAGE: &'static str = "after";
    const REVERSED: bool = true;

    fn invoke<'a>(
        interceptor: &'a dyn Interceptor,
        exchange: &'a Exchange,
        chain: &'a Chain<Self>,
    ) -> BoxFuture<'a, Result<(), RSocketError>> {
        interceptor.intercept_after(exchange, chain)
    }
}

impl ChainKind for Unexpected {
    const STAGE: &'static str = "unexpected";
    const REVERSED: bool = true;

    fn invoke<'a>(
        interceptor: &'a dyn Interceptor,
        exchange: &'a Exchange,
        chain: &'a Chain<Self>,
    ) -> BoxFuture<'a, Result<(), RSocketError>> {
        interceptor.intercept_unexpected(exchange, chain)
    }
}

pub type BeforeChain = Chain<Before>;
pub type AfterChain = Chain<After>;
pub type UnexpectedChain = Chain<Unexpected>;

struct Link {
    interceptor: Option<Arc<dyn Interceptor>>,
    next: Option<Arc<Link>>,
}

/// 进程内共享的哨兵节点。
fn sentinel() -> Arc<Link> {
    static SENTINEL: OnceLock<Arc<Link>> = OnceLock::new();
    Arc::clone(SENTINEL.get_or_init(|| {
        Arc::new(Link {
            interceptor: None,
            next: None,
        })
    }))
}

/// 不可变的拦截器链。
pub struct Chain<K: ChainKind> {
    head: Arc<Link>,
    empty: bool,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ChainKind> Chain<K> {
    /// 由有序拦截器列表构建链；`None` 与空切片等价。
    pub fn new(interceptors: Option<&[Arc<dyn Interceptor>]>) -> Self {
        let interceptors = interceptors.unwrap_or_default();
        if interceptors.is_empty() {
            return Self::empty();
        }

        let fold = |next: Arc<Link>, interceptor: &Arc<dyn Interceptor>| {
            Arc::new(Link {
                interceptor: Some(Arc::clone(interceptor)),
                next: Some(next),
            })
        };
        let head = if K::REVERSED {
            interceptors.iter().fold(sentinel(), fold)
        } else {
            interceptors.iter().rev().fold(sentinel(), fold)
        };

        Self {
            head,
            empty: false,
            _kind: PhantomData,
        }
    }

    /// 不含任何拦截器的链。
    pub fn empty() -> Self {
        Self {
            head: sentinel(),
            empty: true,
            _kind: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// 从当前节点到哨兵之间的拦截器数量。
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut cursor = Some(&self.head);
        while let Some(link) = cursor {
            if link.interceptor.is_some() {
                count += 1;
            }
            cursor = link.next.as_ref();
        }
        count
    }

    /// 继续遍历链。
    pub fn next<'a>(&'a self, exchange: &'a Exchange) -> BoxFuture<'a, Result<(), RSocketError>> {
        if self.empty {
            return Box::pin(future::ready(Ok(())));
        }

        match (&self.head.interceptor, &self.head.next) {
            (Some(interceptor), Some(next)) => {
                let interceptor = Arc::clone(interceptor);
                let sub_chain = Chain::<K> {
                    head: Arc::clone(next),
                    empty: false,
                    _kind: PhantomData,
                };
                Box::pin(async move { K::invoke(interceptor.as_ref(), exchange, &sub_chain).await })
            }
            _ => Box::pin(future::ready(Ok(()))),
        }
    }
}

impl<K: ChainKind> Clone for Chain<K> {
    fn clone(&self) -> Self {
        Self {
            head: Arc::clone(&self.head),
            empty: self.empty,
            _kind: PhantomData,
        }
    }
}

impl<K: ChainKind> Default for Chain<K> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K: ChainKind> fmt::Debug for Chain<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("stage", &K::STAGE)
            .field("len", &self.len())
            .field("empty", &self.empty)
            .finish()
    }
}
