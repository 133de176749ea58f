//! A condvar-backed pollset.
//!
//! The pollset owns the caller's state `T` behind the same mutex it uses for
//! its own bookkeeping, so a completion flag stored in `T` and the kick that
//! announces it are always published together.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::PollError;
use crate::exec_ctx::{ExecCtx, Job};

struct Inner<T> {
    state: T,
    kicked: bool,
    jobs: VecDeque<Job>,
    active_workers: usize,
    shutting_down: bool,
    on_shutdown: Option<Job>,
}

pub struct Pollset<T> {
    inner: Mutex<Inner<T>>,
    wakeup: Condvar,
    works: AtomicUsize,
    kicks: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollsetStats {
    /// Calls to `work` that got past the shutdown check.
    pub works: usize,
    pub kicks: usize,
}

/// Holds the pollset mutex. Derefs to the caller's state.
pub struct PollsetGuard<'a, T> {
    pollset: &'a Pollset<T>,
    inner: MutexGuard<'a, Inner<T>>,
}

impl<T> Pollset<T> {
    pub fn new(state: T) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state,
                kicked: false,
                jobs: VecDeque::new(),
                active_workers: 0,
                shutting_down: false,
                on_shutdown: None,
            }),
            wakeup: Condvar::new(),
            works: AtomicUsize::new(0),
            kicks: AtomicUsize::new(0),
        })
    }

    pub fn lock(&self) -> PollsetGuard<'_, T> {
        PollsetGuard {
            pollset: self,
            inner: self.inner.lock(),
        }
    }

    pub fn stats(&self) -> PollsetStats {
        PollsetStats {
            works: self.works.load(Ordering::Relaxed),
            kicks: self.kicks.load(Ordering::Relaxed),
        }
    }

    /// Blocks until the pollset is kicked, a job is scheduled, or `deadline`
    /// passes, then runs whatever jobs are queued.
    ///
    /// The mutex held by `guard` is released while waiting and while jobs run,
    /// and is held again on return. Returning `Ok` says nothing about the
    /// caller's state: re-check it.
    pub fn work(
        &self,
        exec_ctx: &mut ExecCtx,
        guard: &mut PollsetGuard<'_, T>,
        deadline: Option<Instant>,
    ) -> Result<(), PollError> {
        debug_assert!(std::ptr::eq(guard.pollset, self));

        if guard.inner.shutting_down {
            return Err(PollError::Shutdown);
        }
        self.works.fetch_add(1, Ordering::Relaxed);
        guard.inner.active_workers += 1;

        if guard.inner.jobs.is_empty() && !guard.inner.kicked {
            match deadline {
                Some(deadline) => {
                    // Not an error, the caller re-checks its own deadline
                    if self.wakeup.wait_until(&mut guard.inner, deadline).timed_out() {
                        tracing::trace!("pollset work timed out");
                    }
                }
                None => self.wakeup.wait(&mut guard.inner),
            }
        }
        guard.inner.kicked = false;

        let jobs = std::mem::take(&mut guard.inner.jobs);
        if !jobs.is_empty() {
            MutexGuard::unlocked(&mut guard.inner, || {
                for job in jobs {
                    job(exec_ctx);
                }
                exec_ctx.flush();
            });
        }

        guard.inner.active_workers -= 1;
        if guard.inner.active_workers == 0 && guard.inner.shutting_down {
            if let Some(on_done) = guard.inner.on_shutdown.take() {
                exec_ctx.schedule_boxed(on_done);
            }
        }
        Ok(())
    }

    /// Starts shutdown. Queued jobs are dropped, later `work` calls fail, and
    /// `on_done` is scheduled on an exec ctx once no worker is inside `work`.
    ///
    /// Must not be called while holding a [`PollsetGuard`] for this pollset.
    pub fn shutdown(&self, exec_ctx: &mut ExecCtx, on_done: Job) {
        let mut inner = self.inner.lock();
        if inner.shutting_down {
            tracing::warn!("pollset shut down twice");
        }
        inner.shutting_down = true;
        let dropped = std::mem::take(&mut inner.jobs);

        if inner.active_workers == 0 {
            drop(inner);
            exec_ctx.schedule_boxed(on_done);
        } else {
            inner.on_shutdown = Some(on_done);
            self.wakeup.notify_all();
            drop(inner);
        }

        // Jobs can own completion closures whose drop locks this pollset.
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "dropping jobs queued at shutdown");
        }
        drop(dropped);
    }
}

impl<T> PollsetGuard<'_, T> {
    /// Wakes every worker blocked in `work`. Taking `&mut self` means the
    /// mutex is held for the kick.
    pub fn kick(&mut self) {
        self.inner.kicked = true;
        self.pollset.kicks.fetch_add(1, Ordering::Relaxed);
        self.pollset.wakeup.notify_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down
    }
}

impl<T> Deref for PollsetGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.state
    }
}

impl<T> DerefMut for PollsetGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner.state
    }
}

impl<T> fmt::Debug for Pollset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pollset").field("stats", &self.stats()).finish()
    }
}

/// The part of a pollset a credentials provider may touch.
pub trait Poller: Send + Sync {
    /// Runs `job` on the thread driving the pollset, inside `work`.
    fn schedule(&self, job: Job);

    fn kick(&self);

    fn stats(&self) -> PollsetStats;
}

impl<T: Send> Poller for Pollset<T> {
    fn schedule(&self, job: Job) {
        let mut inner = self.inner.lock();
        if inner.shutting_down {
            drop(inner);
            tracing::warn!("pollset is shut down, dropping scheduled job");
            drop(job);
            return;
        }
        inner.jobs.push_back(job);
        self.wakeup.notify_all();
    }

    fn kick(&self) {
        self.lock().kick();
    }

    fn stats(&self) -> PollsetStats {
        Pollset::stats(self)
    }
}

/// Type-erased, cloneable handle to a pollset.
#[derive(Clone)]
pub struct PollingEntity(Arc<dyn Poller>);

impl PollingEntity {
    pub fn from_pollset<T: Send + 'static>(pollset: &Arc<Pollset<T>>) -> Self {
        let poller: Arc<dyn Poller> = pollset.clone();
        Self(poller)
    }

    pub fn schedule<F>(&self, job: F)
    where
        F: FnOnce(&mut ExecCtx) + Send + 'static,
    {
        self.0.schedule(Box::new(job));
    }

    pub fn kick(&self) {
        self.0.kick();
    }

    pub fn stats(&self) -> PollsetStats {
        self.0.stats()
    }

    pub fn downgrade(&self) -> WeakPollingEntity {
        WeakPollingEntity(Arc::downgrade(&self.0))
    }
}

impl fmt::Debug for PollingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PollingEntity").field(&self.stats()).finish()
    }
}

#[derive(Clone)]
pub struct WeakPollingEntity(Weak<dyn Poller>);

impl WeakPollingEntity {
    pub fn upgrade(&self) -> Option<PollingEntity> {
        self.0.upgrade().map(PollingEntity)
    }

    /// Whether the pollset storage is still allocated.
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl fmt::Debug for WeakPollingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakPollingEntity")
            .field(&self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn kick_from_another_thread_wakes_worker() {
        let pollset = Pollset::new(false);
        let remote = Arc::clone(&pollset);
        let mut ctx = ExecCtx::new();

        let mut guard = pollset.lock();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let mut guard = remote.lock();
            *guard = true;
            guard.kick();
        });

        while !*guard {
            pollset.work(&mut ctx, &mut guard, None).unwrap();
        }
        drop(guard);
        handle.join().unwrap();
        assert_eq!(pollset.stats().kicks, 1);
    }

    #[test]
    fn pending_kick_is_consumed_without_blocking() {
        let pollset = Pollset::new(());
        let mut ctx = ExecCtx::new();
        let mut guard = pollset.lock();
        guard.kick();
        pollset.work(&mut ctx, &mut guard, None).unwrap();
        assert_eq!(pollset.stats(), PollsetStats { works: 1, kicks: 1 });
    }

    #[test]
    fn scheduled_jobs_run_on_the_polling_thread() {
        let pollset = Pollset::new(None::<thread::ThreadId>);
        let pollent = PollingEntity::from_pollset(&pollset);
        let target = Arc::clone(&pollset);
        let mut ctx = ExecCtx::new();

        let handle = thread::spawn(move || {
            pollent.schedule(move |_| {
                let mut guard = target.lock();
                *guard = Some(thread::current().id());
                guard.kick();
            });
        });

        let mut guard = pollset.lock();
        while guard.is_none() {
            pollset.work(&mut ctx, &mut guard, None).unwrap();
        }
        assert_eq!(*guard, Some(thread::current().id()));
        drop(guard);
        handle.join().unwrap();
    }

    #[test]
    fn entity_kick_is_seen_by_next_work() {
        let pollset = Pollset::new(());
        let pollent = PollingEntity::from_pollset(&pollset);
        let mut ctx = ExecCtx::new();

        pollent.kick();
        let mut guard = pollset.lock();
        pollset.work(&mut ctx, &mut guard, None).unwrap();
        assert_eq!(pollent.stats(), PollsetStats { works: 1, kicks: 1 });
    }

    #[test]
    fn work_returns_at_deadline() {
        let pollset = Pollset::new(());
        let mut ctx = ExecCtx::new();
        let mut guard = pollset.lock();
        let start = Instant::now();
        let deadline = start + Duration::from_millis(30);
        pollset.work(&mut ctx, &mut guard, Some(deadline)).unwrap();
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn shutdown_fails_later_work_and_runs_callback() {
        let pollset = Pollset::new(());
        let pollent = PollingEntity::from_pollset(&pollset);
        let mut ctx = ExecCtx::new();
        let done = Arc::new(AtomicBool::new(false));
        let job_ran = Arc::new(AtomicBool::new(false));

        let j = Arc::clone(&job_ran);
        pollent.schedule(move |_| j.store(true, Ordering::SeqCst));

        let d = Arc::clone(&done);
        pollset.shutdown(&mut ctx, Box::new(move |_| d.store(true, Ordering::SeqCst)));
        assert!(ctx.flush());
        assert!(done.load(Ordering::SeqCst));

        let mut guard = pollset.lock();
        assert!(guard.is_shutting_down());
        assert_eq!(
            pollset.work(&mut ctx, &mut guard, None),
            Err(PollError::Shutdown)
        );
        drop(guard);

        pollent.schedule(|_| panic!("job scheduled after shutdown must not run"));
        assert!(!job_ran.load(Ordering::SeqCst));
        assert_eq!(pollset.stats().works, 0);
    }

    #[test]
    fn weak_handle_tracks_storage() {
        let pollset = Pollset::new(());
        let weak = PollingEntity::from_pollset(&pollset).downgrade();
        assert!(weak.is_alive());
        assert!(weak.upgrade().is_some());
        drop(pollset);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }
}
