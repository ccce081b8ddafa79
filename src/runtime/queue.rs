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

//! The local and global run queues.
//!
//! Mirrors `local_runq_put`/`local_runq_get` and `global_runq_put`/
//! `global_runq_get` in the original runtime's `co.c`. A lock-free
//! work-stealing deque doesn't expose popping an arbitrary *half* of a
//! victim's queue as a single batch operation, which this runtime's
//! stealing policy needs, so both queues here are a plain
//! `Mutex<VecDeque<Handle>>` guarded by an `Atomic` size — closer to the
//! original C runtime's intrusive linked lists, but exposing exactly the
//! batch operations the scheduler needs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Mutex;

use coroutine::Handle;

/// A `P`'s bounded local run queue. Capacity is fixed at
/// `consts::LOCAL_RUNQ_CAP`; once full, `runq_put` overflows the
/// newcomer onto the global queue rather than growing this one, exactly
/// as `local_runq_put` does.
pub(crate) struct LocalRunQueue {
    cap: usize,
    items: Mutex<VecDeque<Handle>>,
    size: AtomicUsize,
}

impl LocalRunQueue {
    pub(crate) fn new(cap: usize) -> LocalRunQueue {
        LocalRunQueue {
            cap: cap,
            items: Mutex::new(VecDeque::with_capacity(cap)),
            size: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Pushes `g` onto the back unless the queue is at capacity, in
    /// which case it returns `g` back to the caller to overflow onto the
    /// global queue.
    pub(crate) fn try_push(&self, g: Handle) -> Result<(), Handle> {
        let mut items = self.items.lock().unwrap();
        if items.len() >= self.cap {
            return Err(g);
        }
        items.push_back(g);
        self.size.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Pops the next runnable `G`, if any, in FIFO order.
    pub(crate) fn pop_front(&self) -> Option<Handle> {
        let mut items = self.items.lock().unwrap();
        let g = items.pop_front();
        if g.is_some() {
            self.size.fetch_sub(1, Ordering::Relaxed);
        }
        g
    }

    /// Pushes a batch fetched from the global queue directly onto the
    /// back, bypassing the capacity check: `global_runq_get` only ever
    /// hands out at most `CAP/2` items to an empty-enough local queue, so
    /// this can never overflow in practice (enforced by `co_assert!`
    /// rather than silently dropping work).
    pub(crate) fn push_back_batch(&self, batch: Vec<Handle>) {
        if batch.is_empty() {
            return;
        }
        let mut items = self.items.lock().unwrap();
        co_assert!(
            items.len() + batch.len() <= self.cap,
            "local run queue overflowed by a global-queue batch"
        );
        let n = batch.len();
        items.extend(batch);
        self.size.fetch_add(n, Ordering::Relaxed);
    }

    /// Steals `⌈size/2⌉` items from this queue's tail for a thief `P`,
    /// leaving the victim the coroutines at the front it was about to run
    /// next. Mirrors `steal_work`'s `n -= n / 2` (ceiling, not floor) and
    /// its `list_pop_back` loop: stealing from the tail (the end `runq_put`
    /// enqueues onto) rather than the front (the end `local_runq_get`
    /// dequeues from) is deliberate — it's the coroutines the victim
    /// enqueued most recently, not the ones next in its own FIFO order.
    /// The returned vector is ordered newest-stolen-first, matching the
    /// original's `list_pop_back` popping order: the caller runs
    /// `stolen[0]` immediately and pushes the rest onto the thief's local
    /// queue in the same order the original's loop does.
    pub(crate) fn try_steal_half(&self) -> Vec<Handle> {
        let mut items = match self.items.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };
        let len = items.len();
        if len <= 1 {
            return Vec::new();
        }
        let n = len - len / 2;
        let mut stolen: Vec<Handle> = items.split_off(len - n).into();
        self.size.fetch_sub(stolen.len(), Ordering::Relaxed);
        stolen.reverse();
        stolen
    }
}

/// The scheduler-wide overflow queue. Unbounded, and shared by every `P`.
/// Mirrors `global_runq_put`/`global_runq_get`.
pub(crate) struct GlobalRunQueue {
    items: Mutex<VecDeque<Handle>>,
    size: AtomicIsize,
}

impl GlobalRunQueue {
    pub(crate) fn new() -> GlobalRunQueue {
        GlobalRunQueue {
            items: Mutex::new(VecDeque::new()),
            size: AtomicIsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        let n = self.size.load(Ordering::Relaxed);
        if n < 0 { 0 } else { n as usize }
    }

    pub(crate) fn put(&self, g: Handle) {
        let mut items = self.items.lock().unwrap();
        items.push_back(g);
        self.size.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn put_batch(&self, batch: Vec<Handle>) {
        if batch.is_empty() {
            return;
        }
        let mut items = self.items.lock().unwrap();
        let n = batch.len() as isize;
        items.extend(batch);
        self.size.fetch_add(n, Ordering::Relaxed);
    }

    /// Fetches a batch sized for a single `P` out of `nproc` to drain,
    /// topping off `local` with them, and returns the first one to run
    /// immediately (or `None` if the global queue was empty). The batch
    /// size is exactly the original runtime's `global_runq_get` formula:
    ///
    /// ```text
    /// n = len/nproc + 1
    /// if n > len { n = len }
    /// if max > 0 && n > max { n = max }
    /// if n > cap/2 { n = cap/2 }
    /// ```
    ///
    /// using floor division throughout, not ceiling — a deliberate
    /// parity point with `co.c`, not an approximation of it. `max == 0`
    /// means "auto-size" (the default batch-sizing path); `max` of 1 or
    /// more caps the batch, which the periodic fairness check in
    /// `scheduler::find_runnable` relies on to fetch exactly one
    /// coroutine (`max = 1`) without ever inserting a batch into `local`.
    pub(crate) fn get(&self, nproc: usize, cap: usize, max: usize, local: &LocalRunQueue) -> Option<Handle> {
        let mut items = self.items.lock().unwrap();
        let len = items.len();
        if len == 0 {
            return None;
        }

        let mut n = len / nproc.max(1) + 1;
        if n > len {
            n = len;
        }
        if max > 0 && n > max {
            n = max;
        }
        if n > cap / 2 {
            n = cap / 2;
        }
        let n = n.max(1);

        let first = items.pop_front().unwrap();
        let mut rest = Vec::with_capacity(n - 1);
        for _ in 1..n {
            match items.pop_front() {
                Some(g) => rest.push(g),
                None => break,
            }
        }
        let taken = 1 + rest.len();
        self.size.fetch_sub(taken as isize, Ordering::Relaxed);
        drop(items);

        local.push_back_batch(rest);
        Some(first)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use coroutine;

    fn dummy(name: &str) -> Handle {
        coroutine::new_detached(name)
    }

    #[test]
    fn local_queue_respects_capacity() {
        let q = LocalRunQueue::new(2);
        assert!(q.try_push(dummy("a")).is_ok());
        assert!(q.try_push(dummy("b")).is_ok());
        assert!(q.try_push(dummy("c")).is_err());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn local_queue_is_fifo() {
        let q = LocalRunQueue::new(4);
        let a = dummy("a");
        let b = dummy("b");
        q.try_push(a.clone()).unwrap();
        q.try_push(b.clone()).unwrap();
        assert_eq!(q.pop_front().unwrap(), a);
        assert_eq!(q.pop_front().unwrap(), b);
        assert!(q.pop_front().is_none());
    }

    #[test]
    fn steal_half_takes_ceil_from_tail() {
        let q = LocalRunQueue::new(8);
        let pushed: Vec<Handle> = (0..5).map(|i| dummy(&format!("g{}", i))).collect();
        for g in &pushed {
            q.try_push(g.clone()).unwrap();
        }
        // len=5 -> n = 5 - 5/2 = 3, taken from the tail (g2, g3, g4),
        // returned newest-first: g4, g3, g2.
        let stolen = q.try_steal_half();
        assert_eq!(stolen, vec![pushed[4].clone(), pushed[3].clone(), pushed[2].clone()]);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_front().unwrap(), pushed[0]);
        assert_eq!(q.pop_front().unwrap(), pushed[1]);
    }

    #[test]
    fn steal_half_skips_queue_with_one_item() {
        let q = LocalRunQueue::new(8);
        q.try_push(dummy("a")).unwrap();
        assert!(q.try_steal_half().is_empty());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn global_batch_formula_matches_original() {
        let global = GlobalRunQueue::new();
        for i in 0..10 {
            global.put(dummy(&format!("g{}", i)));
        }
        let local = LocalRunQueue::new(8);
        // len=10, nproc=4 -> by_share = 10/4+1 = 3; min(3, 10, 4) = 3.
        let first = global.get(4, 8, 0, &local);
        assert!(first.is_some());
        assert_eq!(local.len(), 2);
        assert_eq!(global.len(), 7);
    }

    #[test]
    fn global_get_honors_max_cap() {
        let global = GlobalRunQueue::new();
        for i in 0..10 {
            global.put(dummy(&format!("g{}", i)));
        }
        let local = LocalRunQueue::new(8);
        // Without a cap this would take 3 (as above); max=1 forces
        // exactly one, with nothing inserted into `local`.
        let first = global.get(4, 8, 1, &local);
        assert!(first.is_some());
        assert_eq!(local.len(), 0);
        assert_eq!(global.len(), 9);
    }

    #[test]
    fn global_get_on_empty_queue_returns_none() {
        let global = GlobalRunQueue::new();
        let local = LocalRunQueue::new(8);
        assert!(global.get(4, 8, 0, &local).is_none());
    }
}
