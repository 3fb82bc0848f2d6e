use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread;

use log::debug;

/// Single-flight guard for a background job. Acquire before spawning, hand
/// the guard into the job, and completion clears it on drop.
#[derive(Clone)]
pub struct BusyFlag {
    busy: Arc<AtomicBool>,
}

impl BusyFlag {
    pub fn new() -> Self {
        Self {
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claims the flag. Returns `None` if a previous job is still running.
    pub fn try_begin(&self) -> Option<BusyGuard> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(BusyGuard {
                busy: self.busy.clone(),
            })
        } else {
            None
        }
    }
}

impl Default for BusyFlag {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Bounded fire-and-forget runner. Jobs above the bound run on the caller's
/// thread so work is never silently dropped.
pub struct TaskRunner {
    active: Arc<AtomicUsize>,
    limit: usize,
}

impl TaskRunner {
    pub fn new(limit: usize) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn spawn<F>(&self, name: &'static str, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.active.fetch_add(1, Ordering::AcqRel) >= self.limit {
            self.active.fetch_sub(1, Ordering::AcqRel);
            debug!("task runner saturated, running '{}' inline", name);
            job();
            return;
        }

        let active = self.active.clone();
        thread::spawn(move || {
            job();
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }
}
