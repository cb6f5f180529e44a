use crate::error::{OraError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct Inner {
    cancelled: Mutex<bool>,
    signal: Condvar,
    deadline: Option<Instant>,
}

/// Cancellation signal with an optional deadline. Clones share the signal,
/// so one thread can cancel a call another thread is blocked in.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    pub fn background() -> Self {
        Self::build(None)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: Mutex::new(false),
                signal: Condvar::new(),
                deadline,
            }),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn cancel(&self) {
        let mut cancelled = self.lock();
        *cancelled = true;
        self.inner.signal.notify_all();
    }

    /// `Cancelled` or `DeadlineExceeded` once the context is done.
    pub fn err(&self) -> Option<OraError> {
        if *self.lock() {
            return Some(OraError::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(OraError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `work` on the calling thread while a scoped watcher calls
    /// `interrupt` if the context is cancelled or expires before `work` ends.
    pub(crate) fn watch<T, W, I>(&self, work: W, interrupt: I) -> T
    where
        W: FnOnce() -> T,
        I: Fn() + Sync,
    {
        let done = AtomicBool::new(false);
        std::thread::scope(|s| {
            s.spawn(|| self.wait_for_interrupt(&done, &interrupt));
            let _finish = Finish {
                inner: &self.inner,
                done: &done,
            };
            work()
        })
    }

    fn wait_for_interrupt(&self, done: &AtomicBool, interrupt: &(dyn Fn() + Sync)) {
        let mut cancelled = self.lock();
        loop {
            if done.load(Ordering::SeqCst) {
                return;
            }
            let expired = matches!(self.inner.deadline, Some(d) if Instant::now() >= d);
            if *cancelled || expired {
                drop(cancelled);
                interrupt();
                return;
            }
            cancelled = match self.inner.deadline {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    self.inner
                        .signal
                        .wait_timeout(cancelled, wait)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .inner
                    .signal
                    .wait(cancelled)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

/// Marks the watched work finished even if it unwinds, so the watcher
/// thread always exits and the scope can join it.
struct Finish<'a> {
    inner: &'a Inner,
    done: &'a AtomicBool,
}

impl Drop for Finish<'_> {
    fn drop(&mut self) {
        let _guard = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.done.store(true, Ordering::SeqCst);
        self.inner.signal.notify_all();
    }
}
