//! Plumbing shared by every node of the Environment > Server > Session >
//! Statement > ResultSet tree: id generators, swappable config cells and
//! the hierarchical system names used in log lines.

use crate::error::{ErrorList, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

pub(crate) struct IdGen(AtomicU64);

impl IdGen {
    pub(crate) const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub(crate) static ENV_IDS: IdGen = IdGen::new();
pub(crate) static SRV_IDS: IdGen = IdGen::new();
pub(crate) static SES_IDS: IdGen = IdGen::new();
pub(crate) static STMT_IDS: IdGen = IdGen::new();
pub(crate) static TX_IDS: IdGen = IdGen::new();
pub(crate) static RSET_IDS: IdGen = IdGen::new();

/// Gives a pooled body its id the first time it is used; a recycled body
/// keeps the id it already has.
pub(crate) fn ensure_id(id: &mut u64, gen: &IdGen) -> u64 {
    if *id == 0 {
        *id = gen.next();
    }
    *id
}

pub(crate) fn sys_name(parent: &str, tag: char, id: u64) -> String {
    format!("{}{}{}", parent, tag, id)
}

/// Configuration replaced whole on write; readers clone the `Arc` and never
/// wait on a writer for longer than the swap.
pub struct ConfigCell<T> {
    inner: RwLock<Arc<T>>,
}

impl<T: Default> ConfigCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    pub fn get(&self) -> Arc<T> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn set(&self, value: T) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(value);
    }

    pub fn clear(&self) {
        self.set(T::default());
    }
}

impl<T: Default> Default for ConfigCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Closes every child taken out of a closing parent. A child already closed
/// by a concurrent caller is skipped silently.
pub(crate) fn close_children<C>(
    children: &mut HashMap<u64, Arc<C>>,
    errs: &mut ErrorList,
    step: &str,
    close: impl Fn(&C) -> Result<()>,
) {
    for (_, child) in children.drain() {
        errs.guard(step, || match close(&*child) {
            Err(e) if e.is_already_closed() => Ok(()),
            other => other,
        });
    }
}
