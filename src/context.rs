//! Caller-supplied cancellation and deadline for a migration run.
//!
//! The engine has no timeouts of its own. A `Context` carries the caller's
//! cancellation flag and optional deadline; the migrator checks it before every
//! database call and rolls back the in-flight transaction when it fires.
//!
//! A statement that is already running on the server is only reachable through
//! the connection's out-of-band cancel request. While a transaction is open the
//! migrator registers that request with [`Context::watch`]; cancelling the
//! context or reaching its deadline then fires it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Aborts whatever statement a connection is currently running.
///
/// Called from the thread that cancels the context or from the deadline
/// timer, never from the thread blocked on the statement.
pub type CancelHook = Arc<dyn Fn() + Send + Sync>;

/// Why a run stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CancelReason {
    #[error("cancelled by caller")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Default)]
struct Shared {
    cancelled: AtomicBool,
    next_watch: AtomicU64,
    hooks: Mutex<Vec<(u64, CancelHook)>>,
}

impl Shared {
    fn hooks(&self) -> std::sync::MutexGuard<'_, Vec<(u64, CancelHook)>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Fired under the lock so a hook never runs after its Watch is gone
        for (_, hook) in self.hooks().iter() {
            hook();
        }
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("cancelled", &self.cancelled.load(Ordering::SeqCst))
            .field("watches", &self.hooks().len())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    shared: Arc<Shared>,
    deadline: Option<Instant>,
}

/// Cloneable handle that cancels the [`Context`] it was taken from.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// Mark the context cancelled and abort any statement running under a [`Watch`].
    pub fn cancel(&self) {
        self.shared.cancel();
    }
}

/// Keeps a [`CancelHook`] armed; disarmed on drop.
#[must_use = "the hook is disarmed as soon as the watch is dropped"]
pub struct Watch {
    shared: Arc<Shared>,
    id: u64,
    timer: Option<DeadlineTimer>,
}

impl Drop for Watch {
    fn drop(&mut self) {
        // Stop the timer first: it may be firing the hook right now
        drop(self.timer.take());
        self.shared.hooks().retain(|(id, _)| *id != self.id);
    }
}

/// Fires a hook once `deadline` passes, unless dropped first.
struct DeadlineTimer {
    done: Arc<(Mutex<bool>, Condvar)>,
}

impl DeadlineTimer {
    fn start(deadline: Instant, hook: CancelHook) -> Option<Self> {
        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&done);

        let spawned = thread::Builder::new()
            .name("sqlshift-deadline".to_string())
            .spawn(move || {
                let (lock, cvar) = &*signal;
                let mut finished = lock.lock().unwrap_or_else(PoisonError::into_inner);
                while !*finished {
                    let now = Instant::now();
                    if now >= deadline {
                        log::debug!("deadline passed, cancelling the running statement");
                        hook();
                        return;
                    }
                    finished = cvar
                        .wait_timeout(finished, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            });

        match spawned {
            Ok(_) => Some(Self { done }),
            Err(e) => {
                log::warn!("failed to start deadline timer, the deadline is only checked between statements: {e}");
                None
            }
        }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.done;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Keeps the earlier of the existing and the new deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Arm `hook` until the returned [`Watch`] is dropped
    ///
    /// The hook fires when the context is cancelled or its deadline passes,
    /// and right away when the context is already cancelled.
    pub fn watch(&self, hook: CancelHook) -> Watch {
        let id = self.shared.next_watch.fetch_add(1, Ordering::SeqCst);
        {
            let mut hooks = self.shared.hooks();
            hooks.push((id, Arc::clone(&hook)));
            if self.is_cancelled() {
                hook();
            }
        }

        Watch {
            shared: Arc::clone(&self.shared),
            id,
            timer: self.deadline.and_then(|deadline| DeadlineTimer::start(deadline, hook)),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` without one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// # Errors
    ///
    /// Returns the [`CancelReason`] once the context is cancelled or its deadline has passed.
    pub fn check(&self) -> Result<(), CancelReason> {
        if self.is_cancelled() {
            return Err(CancelReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(CancelReason::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
