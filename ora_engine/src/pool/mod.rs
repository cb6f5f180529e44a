pub mod session_pool;

pub use session_pool::{PoolState, PooledSession, SessionPool};

use crate::engine::core::bind_descriptor::{BindDescriptor, BindKind};
use crate::engine::environment::EnvBody;
use crate::engine::result_set::RsetBody;
use crate::engine::server::SrvBody;
use crate::engine::session::SesBody;
use crate::engine::statement::StmtBody;
use crate::engine::transaction::TxBody;
use crate::error::OraError;
use lazy_static::lazy_static;
use std::sync::{Mutex, PoisonError};

/// Unbounded recycler of same-kind objects. Instances handed back must
/// already be reset by their owner; the pool never touches their state.
pub struct ResourcePool<T> {
    free: Mutex<Vec<T>>,
    make: fn() -> T,
}

impl<T> ResourcePool<T> {
    pub fn new(make: fn() -> T) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            make,
        }
    }

    pub fn acquire(&self) -> T {
        let recycled = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        recycled.unwrap_or_else(self.make)
    }

    pub fn release(&self, item: T) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item);
    }

    pub fn idle(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// One free list per bind descriptor kind, indexed by the kind's discriminant.
pub struct BindPools {
    pools: [ResourcePool<BindDescriptor>; BindKind::COUNT],
}

impl BindPools {
    fn new() -> Self {
        Self {
            pools: std::array::from_fn(|_| ResourcePool::new(BindDescriptor::default)),
        }
    }

    pub fn acquire(&self, kind: BindKind) -> BindDescriptor {
        let mut desc = self.pools[kind.index()].acquire();
        desc.kind = kind;
        desc
    }

    pub fn release(&self, mut desc: BindDescriptor) {
        let kind = desc.kind;
        desc.reset();
        self.pools[kind.index()].release(desc);
    }

    pub fn idle(&self, kind: BindKind) -> usize {
        self.pools[kind.index()].idle()
    }
}

pub(crate) struct Pools {
    pub env: ResourcePool<Box<EnvBody>>,
    pub srv: ResourcePool<Box<SrvBody>>,
    pub ses: ResourcePool<Box<SesBody>>,
    pub stmt: ResourcePool<Box<StmtBody>>,
    pub tx: ResourcePool<Box<TxBody>>,
    pub rset: ResourcePool<Box<RsetBody>>,
    pub errors: ResourcePool<Vec<OraError>>,
    pub binds: BindPools,
}

impl Pools {
    fn new() -> Self {
        Self {
            env: ResourcePool::new(Box::default),
            srv: ResourcePool::new(Box::default),
            ses: ResourcePool::new(Box::default),
            stmt: ResourcePool::new(Box::default),
            tx: ResourcePool::new(Box::default),
            rset: ResourcePool::new(Box::default),
            errors: ResourcePool::new(Vec::new),
            binds: BindPools::new(),
        }
    }
}

lazy_static! {
    pub(crate) static ref POOLS: Pools = Pools::new();
}
