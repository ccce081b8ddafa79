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

//! The scheduler singleton: the `P` registry, the global run queue, the
//! dead-coroutine list, id generators, and the `find_runnable` policy
//! that ties local queues, the global queue, and work-stealing together.
//!
//! Stored as a raw `static mut *mut Scheduler`, the same way a `P` holds
//! its enclosing scheduler through a bare `scheduler: *mut Scheduler`
//! field rather than an `Arc` — the scheduler singleton outlives every
//! `M`/`P`/`G` in the process once started, so a raw pointer dereferenced
//! only between `start()` and `stop()` is sound.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use rand::{thread_rng, Rng};

use config::Config;
use consts::{SCHED_CHECK_INTERVAL, STEAL_TRIES};
use coroutine::Handle;
use runtime::machine;
use runtime::processor::{PStatus, Processor};
use runtime::queue::GlobalRunQueue;

static mut SCHEDULER: *mut Scheduler = ptr::null_mut();

pub(crate) struct Scheduler {
    processors: Vec<Processor>,
    global: GlobalRunQueue,
    dead: Mutex<Vec<Handle>>,
    coid_gen: AtomicUsize,
    stop_the_world: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
    log_on_shutdown: bool,
    steal_tally: AtomicUsize,
}

impl Scheduler {
    fn new(cfg: &Config) -> Scheduler {
        let processors = (0..cfg.parallelism).map(Processor::new).collect();
        Scheduler {
            processors: processors,
            global: GlobalRunQueue::new(),
            dead: Mutex::new(Vec::new()),
            coid_gen: AtomicUsize::new(1),
            stop_the_world: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            started_at: Instant::now(),
            log_on_shutdown: cfg.log_on_shutdown,
            steal_tally: AtomicUsize::new(0),
        }
    }
}

fn get() -> &'static Scheduler {
    unsafe {
        let ptr = SCHEDULER;
        if ptr.is_null() {
            fatal!("scheduler used before init()");
        }
        &*ptr
    }
}

/// Builds the scheduler singleton and spawns its `M` worker threads, one
/// per `P`. Mirrors `scheduler_init` followed by `scheduler_start`.
pub(crate) fn init_and_start(cfg: &Config) {
    unsafe {
        co_assert!(SCHEDULER.is_null(), "scheduler already initialized");
        let sched = Box::new(Scheduler::new(cfg));
        SCHEDULER = Box::into_raw(sched);
    }

    let sched = get();
    let mut workers = sched.workers.lock().unwrap();
    for p in &sched.processors {
        let p = p.clone();
        let handle = thread::Builder::new()
            .name(format!("gpm-co-worker-{}", p.id()))
            .spawn(move || machine::run(p))
            .unwrap_or_else(|e| fatal!("failed to spawn worker thread: {}", e));
        workers.push(handle);
    }
    debug!("scheduler started with {} processors", sched.processors.len());
}

/// Signals every `M` to stop at its next scheduling point and joins all
/// of them. Mirrors `scheduler_stop`. Optionally prints a shutdown
/// summary to stderr.
pub(crate) fn stop() {
    let sched = get();
    sched.stop_the_world.store(true, Ordering::SeqCst);

    let handles: Vec<JoinHandle<()>> = {
        let mut workers = sched.workers.lock().unwrap();
        ::std::mem::replace(&mut *workers, Vec::new())
    };
    for h in handles {
        let _ = h.join();
    }

    if sched.log_on_shutdown {
        print_shutdown_log(sched);
    }

    unsafe {
        let ptr = SCHEDULER;
        SCHEDULER = ptr::null_mut();
        drop(Box::from_raw(ptr));
    }
}

fn print_shutdown_log(sched: &Scheduler) {
    let uptime = sched.started_at.elapsed();
    eprintln!("\x1b[1;36m== gpm-co scheduler shutdown ==\x1b[0m");
    eprintln!("  at:            {}", ::time::now().rfc822());
    eprintln!("  uptime:        {:.3}s", uptime.as_secs() as f64 + uptime.subsec_nanos() as f64 * 1e-9);
    eprintln!("  processors:    {}", sched.processors.len());
    eprintln!("  coroutines:    {}", sched.coid_gen.load(Ordering::Relaxed) - 1);
    eprintln!("  steals:        {}", sched.steal_tally.load(Ordering::Relaxed));
    for p in &sched.processors {
        eprintln!("    P{}: {} steals", p.id(), p.steal_count());
    }
}

pub(crate) fn should_stop() -> bool {
    get().stop_the_world.load(Ordering::Relaxed)
}

pub(crate) fn nproc() -> usize {
    get().processors.len()
}

pub(crate) fn processor_at(id: usize) -> Option<Processor> {
    get().processors.get(id).cloned()
}

pub(crate) fn global_runq() -> &'static GlobalRunQueue {
    &get().global
}

pub(crate) fn next_coroutine_id() -> u64 {
    get().coid_gen.fetch_add(1, Ordering::Relaxed) as u64
}

pub(crate) fn add_dead(g: Handle) {
    get().dead.lock().unwrap().push(g);
}

pub(crate) fn remove_dead(g: &Handle) {
    let mut dead = get().dead.lock().unwrap();
    if let Some(pos) = dead.iter().position(|d| d == g) {
        dead.remove(pos);
    }
}

/// The `find_runnable` policy: periodically drain the
/// global queue first so it can't starve behind busy `P`s, otherwise
/// prefer local work, then the global queue, then stealing from a few
/// randomly chosen peers. Returns `None` only once every avenue has come
/// up empty.
pub(crate) fn find_runnable(p: &Processor) -> Option<Handle> {
    let sched = get();

    // The periodic check only fires when the local queue has room
    // (`p->runq_size < P_RUNQ_SIZE_MAX`) and pulls with `max = 1`, so it
    // never inserts a batch into a local queue that might already be
    // near capacity — a near-full local queue plus the auto-sized batch
    // this used to take here is exactly what overflows `push_back_batch`.
    if p.tick_and_check_global(SCHED_CHECK_INTERVAL) && p.has_local_room() {
        if let Some(g) = p.pull_from_global(1) {
            return Some(g);
        }
    }

    if let Some(g) = p.local_pop() {
        return Some(g);
    }

    if let Some(g) = p.pull_from_global(0) {
        return Some(g);
    }

    steal_work(sched, p)
}

/// Tries `consts::STEAL_TRIES` randomized permutations of every other
/// `P`, considering only victims currently `Running`, and taking
/// whichever one's local queue yields a non-empty half under a
/// try-lock. Mirrors `steal_work`: a fresh shuffle per try (not a single
/// shuffle truncated to the first `STEAL_TRIES` candidates) and a failed
/// try-lock just moves on to the next candidate rather than blocking, so
/// one busy victim can't stall a thief that has other peers to check.
fn steal_work(sched: &Scheduler, thief: &Processor) -> Option<Handle> {
    let nproc = sched.processors.len();
    if nproc <= 1 {
        return None;
    }

    for _ in 0..STEAL_TRIES {
        let mut candidates: Vec<usize> = (0..nproc).collect();
        thread_rng().shuffle(&mut candidates);

        for victim_id in candidates {
            if victim_id == thief.id() {
                continue;
            }
            let victim = &sched.processors[victim_id];
            if victim.status() != PStatus::Running {
                continue;
            }

            let mut stolen = victim.local_try_steal_half();
            if stolen.is_empty() {
                continue;
            }
            trace!("P{} stole {} G(s) from P{}", thief.id(), stolen.len(), victim_id);
            thief.note_steal();
            sched.steal_tally.fetch_add(1, Ordering::Relaxed);

            let first = stolen.remove(0);
            let mut overflow = Vec::new();
            for g in stolen {
                if let Err(g) = thief.local_try_push(g) {
                    overflow.push(g);
                }
            }
            sched.global.put_batch(overflow);
            return Some(first);
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use config::Config;

    fn test_config(n: usize) -> Config {
        Config { parallelism: n, log_on_shutdown: false }
    }

    // The scheduler is a single process-wide singleton (matching the
    // original runtime's one-`struct scheduler`-per-process design), so
    // tests that run a full init/start/stop lifecycle can't interleave
    // with each other. A single test function keeps them sequential
    // without pulling in a lazily-initialized-static dependency just
    // for test serialization.
    static GUARD: AtomicBool = AtomicBool::new(false);

    #[test]
    fn lifecycle_and_id_generator() {
        while GUARD.compare_and_swap(false, true, Ordering::SeqCst) {
            thread::yield_now();
        }

        init_and_start(&test_config(2));
        assert_eq!(nproc(), 2);
        let a = next_coroutine_id();
        let b = next_coroutine_id();
        assert!(b > a);
        stop();

        GUARD.store(false, Ordering::SeqCst);
    }
}
