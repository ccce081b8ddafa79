// The MIT License (MIT)

// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! `P`: a logical processor owning a local run queue and, while active,
//! exactly one bound `M`.
//!
//! An `Arc`-wrapped inner struct bound to the current OS thread through a
//! `thread_local!`, without a lock-free work-stealing deque or an `mpsc`
//! neighbor-notification channel between peers — this runtime's `P`s are
//! an array owned outright by the `Scheduler` singleton, and workers
//! coordinate by going back to that singleton (idle list, global queue)
//! rather than by message-passing between peers.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use consts::LOCAL_RUNQ_CAP;
use coroutine::Handle;
use runtime::queue::LocalRunQueue;
use scheduler;

thread_local!(static CURRENT_PROCESSOR: RefCell<Option<Processor>> = RefCell::new(None));

/// Mirrors `enum p_status` in the original runtime's `internal.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PStatus {
    Idle,
    Running,
}

struct ProcessorInner {
    id: usize,
    run_queue: LocalRunQueue,
    status: AtomicUsize,
    /// Bumped once per scheduling loop iteration; `find_runnable` checks
    /// the global queue whenever this hits `consts::SCHED_CHECK_INTERVAL`,
    /// so a busy `P` with a full local queue can't starve the global one.
    sched_tick: AtomicUsize,
    steal_count: AtomicUsize,
}

/// A cloneable handle to a `P`. All clones refer to the same run queue
/// and counters.
#[derive(Clone)]
pub struct Processor(Arc<ProcessorInner>);

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "P{}", self.0.id)
    }
}

impl Processor {
    pub(crate) fn new(id: usize) -> Processor {
        Processor(Arc::new(ProcessorInner {
            id: id,
            run_queue: LocalRunQueue::new(LOCAL_RUNQ_CAP),
            status: AtomicUsize::new(PStatus::Idle as usize),
            sched_tick: AtomicUsize::new(0),
            steal_count: AtomicUsize::new(0),
        }))
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.0.id
    }

    #[inline]
    pub(crate) fn status(&self) -> PStatus {
        match self.0.status.load(Ordering::Acquire) {
            0 => PStatus::Idle,
            1 => PStatus::Running,
            v => fatal!("corrupted P status word: {}", v),
        }
    }

    #[inline]
    pub(crate) fn set_status(&self, s: PStatus) {
        self.0.status.store(s as usize, Ordering::Release);
    }

    #[inline]
    pub(crate) fn local_len(&self) -> usize {
        self.0.run_queue.len()
    }

    pub(crate) fn local_try_push(&self, g: Handle) -> Result<(), Handle> {
        self.0.run_queue.try_push(g)
    }

    pub(crate) fn local_pop(&self) -> Option<Handle> {
        self.0.run_queue.pop_front()
    }

    pub(crate) fn local_try_steal_half(&self) -> Vec<Handle> {
        self.0.run_queue.try_steal_half()
    }

    /// Pulls a batch off the global run queue, `max == 0` meaning
    /// "auto-size" (the default policy) and `max >= 1` capping it —
    /// `find_runnable`'s periodic fairness check passes `max = 1` so it
    /// never inserts a batch into this queue.
    pub(crate) fn pull_from_global(&self, max: usize) -> Option<Handle> {
        scheduler::global_runq().get(scheduler::nproc(), LOCAL_RUNQ_CAP, max, &self.0.run_queue)
    }

    /// `true` iff this `P`'s local queue has room for more coroutines,
    /// mirroring `p->runq_size < P_RUNQ_SIZE_MAX` in `find_runnable`'s
    /// periodic-check gate.
    pub(crate) fn has_local_room(&self) -> bool {
        self.local_len() < LOCAL_RUNQ_CAP
    }

    /// `true` once every `consts::SCHED_CHECK_INTERVAL` ticks, mirroring
    /// `p->sched_tick % P_SCHED_CHECK_INTERVAL == 0` in `find_runnable`.
    pub(crate) fn tick_and_check_global(&self, interval: usize) -> bool {
        let t = self.0.sched_tick.fetch_add(1, Ordering::Relaxed) + 1;
        t % interval == 0
    }

    pub(crate) fn note_steal(&self) {
        self.0.steal_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn steal_count(&self) -> usize {
        self.0.steal_count.load(Ordering::Relaxed)
    }

    /// Binds `self` as the processor running on the calling OS thread.
    /// Called once by an `M` when it picks up an idle `P`.
    pub(crate) fn bind_to_current_thread(&self) {
        CURRENT_PROCESSOR.with(|c| *c.borrow_mut() = Some(self.clone()));
    }

    pub(crate) fn unbind_from_current_thread() {
        CURRENT_PROCESSOR.with(|c| *c.borrow_mut() = None);
    }
}

impl PartialEq for Processor {
    fn eq(&self, other: &Processor) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Processor {}

/// The `P` bound to the calling OS thread, if any.
pub(crate) fn current() -> Option<Processor> {
    CURRENT_PROCESSOR.with(|c| c.borrow().clone())
}

pub(crate) fn current_processor_id() -> Option<usize> {
    CURRENT_PROCESSOR.with(|c| c.borrow().as_ref().map(Processor::id))
}

/// Enqueues `g` on `pid`'s local run queue, overflowing to the global
/// queue if the local one is at `consts::LOCAL_RUNQ_CAP`, or straight to
/// the global queue if `pid` is `None` — the case of a coroutine started
/// from the main thread before any worker has claimed it. Mirrors
/// `runq_put` in `co.c`.
pub(crate) fn runq_put(pid: Option<usize>, g: Handle) {
    let target = pid.and_then(scheduler::processor_at);
    match target {
        Some(p) => {
            g.set_processor_id(Some(p.id()));
            if let Err(g) = p.local_try_push(g) {
                debug!("P{} local run queue full, overflowing G{} to global", p.id(), g.id());
                g.set_processor_id(None);
                scheduler::global_runq().put(g);
            }
        }
        None => {
            scheduler::global_runq().put(g);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_processor_is_idle_and_empty() {
        let p = Processor::new(0);
        assert_eq!(p.status(), PStatus::Idle);
        assert_eq!(p.local_len(), 0);
    }

    #[test]
    fn sched_tick_fires_on_interval() {
        let p = Processor::new(0);
        let mut fired = 0;
        for _ in 0..20 {
            if p.tick_and_check_global(5) {
                fired += 1;
            }
        }
        assert_eq!(fired, 4);
    }
}
