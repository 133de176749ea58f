//! Explicit execution context.
//!
//! Work that must not run re-entrantly (for example a completion callback
//! fired while the provider still holds its own locks) is pushed onto an
//! [`ExecCtx`] and run later by whoever owns the context.

use std::collections::VecDeque;
use std::fmt;

pub type Job = Box<dyn FnOnce(&mut ExecCtx) + Send>;

#[derive(Default)]
pub struct ExecCtx {
    queue: VecDeque<Job>,
}

impl ExecCtx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&mut self, job: F)
    where
        F: FnOnce(&mut ExecCtx) + Send + 'static,
    {
        self.queue.push_back(Box::new(job));
    }

    pub fn schedule_boxed(&mut self, job: Job) {
        self.queue.push_back(job);
    }

    /// Runs queued jobs until the queue is empty, including jobs scheduled by
    /// the jobs themselves. Returns whether anything ran.
    pub fn flush(&mut self) -> bool {
        let mut ran = false;
        while let Some(job) = self.queue.pop_front() {
            job(self);
            ran = true;
        }
        ran
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecCtx")
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Drop for ExecCtx {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn flush_runs_jobs_in_order_including_nested() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut ctx = ExecCtx::new();

        let o = Arc::clone(&order);
        ctx.schedule(move |ctx| {
            o.lock().push(1);
            let o2 = Arc::clone(&o);
            ctx.schedule(move |_| o2.lock().push(3));
        });
        let o = Arc::clone(&order);
        ctx.schedule(move |_| o.lock().push(2));

        assert!(ctx.flush());
        assert!(ctx.is_empty());
        assert_eq!(*order.lock(), vec![1, 2, 3]);
        assert!(!ctx.flush());
    }

    #[test]
    fn drop_finishes_pending_work() {
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let mut ctx = ExecCtx::new();
            let h = Arc::clone(&hits);
            ctx.schedule(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
