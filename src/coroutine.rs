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

//! `G`: a stackful coroutine and its public lifecycle API.
//!
//! Mirrors `struct co` / `co_start`/`co_yield`/`co_wait`/`co_exit`/`co_free`
//! in the original runtime's `co.c`, generalized from a raw C function
//! pointer + `void*` argument into an `FnOnce() + Send` closure.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use context::Context;

use consts::DEFAULT_STACK_SIZE;
use runtime::context::{self as ctx_switch, ReasonCode, TransferSlot};
use runtime::processor;
use runtime::stack::CoroutineStack;
use scheduler;
use sync::semaphore::Semaphore;

thread_local!(static CURRENT_G: RefCell<Option<Handle>> = RefCell::new(None));
thread_local!(static IS_MAIN_THREAD: ::std::cell::Cell<bool> = ::std::cell::Cell::new(false));

/// Lifecycle state of a `G`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum State {
    New = 0,
    Running = 1,
    Runnable = 2,
    Waiting = 3,
    SemWaiting = 4,
    Dead = 5,
}

impl State {
    fn from_usize(v: usize) -> State {
        match v {
            0 => State::New,
            1 => State::Running,
            2 => State::Runnable,
            3 => State::Waiting,
            4 => State::SemWaiting,
            5 => State::Dead,
            _ => fatal!("corrupted coroutine state word: {}", v),
        }
    }
}

pub(crate) struct CoroutineInner {
    id: u64,
    name: String,
    entry: Mutex<Option<Box<FnMut() + Send>>>,
    status: AtomicUsize,
    /// `None` for the main coroutine, which owns no stack of its own.
    /// For every other `G` this starts `Some` and is taken out by
    /// `free()`, which must reclaim the stack out-of-band: a coroutine
    /// that has run `exit()` never unwinds, so the `Handle` clones alive
    /// in `run_wrapper`'s and `exit`'s own stack frames (on that very
    /// stack) never drop, and the `Arc` strong count they hold can never
    /// reach zero on its own. Relying on the struct's destructor to free
    /// this field would leak the stack forever.
    is_main: bool,
    stack: Mutex<Option<CoroutineStack>>,
    saved_context: Mutex<Option<Context>>,
    waiters: Mutex<Vec<Handle>>,
    waiter_count: AtomicUsize,
    processor: Mutex<Option<usize>>,
}

// `context::Context` is a bare pointer into a stack and carries no
// built-in Send/Sync; it is only ever touched by whichever single OS
// thread currently owns the `G` (the worker running its scheduler
// dispatch, or a thief that just stole it before its first resume), the
// same "one owner at a time" discipline the rest of this module's
// locking already enforces. `Coroutine` handles themselves are freely
// passed between threads (run queues, waiter lists, `Arc` clones).
unsafe impl Send for CoroutineInner {}
unsafe impl Sync for CoroutineInner {}

/// A handle to a coroutine (`G`). Cloning shares ownership; the
/// underlying `CoroutineInner` is freed only after [`free`] is called on
/// the last live handle once the coroutine has reached [`State::Dead`].
#[derive(Clone)]
pub struct Coroutine(pub(crate) Arc<CoroutineInner>);

/// Internal alias for a queued/boxed coroutine reference.
pub(crate) type Handle = Coroutine;

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "G{}({:?})", self.0.id, self.0.name)
    }
}

impl PartialEq for Coroutine {
    fn eq(&self, other: &Coroutine) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Coroutine {}

impl Coroutine {
    #[inline]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn state(&self) -> State {
        State::from_usize(self.0.status.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.state() == State::Dead
    }

    #[inline]
    pub(crate) fn set_state(&self, s: State) {
        self.0.status.store(s as usize, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_main(&self) -> bool {
        self.0.is_main
    }

    /// Runs `f` with a reference to this coroutine's stack, for the one
    /// instant `switch_into` needs it to build a fresh `Context`. Never
    /// called after `free()` has taken the stack out.
    pub(crate) fn with_stack_raw<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&::context::stack::ProtectedFixedSizeStack) -> R,
    {
        let guard = self.0.stack.lock().unwrap();
        match *guard {
            Some(ref s) => f(s.raw()),
            None => fatal!("attempted to switch onto G{}'s freed or non-existent stack", self.0.id),
        }
    }

    pub(crate) fn check_canary(&self) {
        if self.is_main() {
            return;
        }
        let intact = self.0.stack.lock().unwrap().as_ref().map(|s| s.canary_intact()).unwrap_or(true);
        if !intact {
            fatal!(
                "G{} ({}) stack bottom corruption detected",
                self.0.id,
                self.0.name
            );
        }
    }

    /// Consumes this handle into a raw pointer, carried across a fresh
    /// context switch as the trampoline's `Transfer::data` argument.
    /// Must be paired with exactly one [`Coroutine::from_raw`].
    pub(crate) fn into_raw(self) -> usize {
        Arc::into_raw(self.0) as usize
    }

    /// Reconstructs a handle consumed by [`Coroutine::into_raw`].
    pub(crate) unsafe fn from_raw(raw: usize) -> Handle {
        Coroutine(Arc::from_raw(raw as *const CoroutineInner))
    }

    pub(crate) fn take_context(&self) -> Option<Context> {
        self.0.saved_context.lock().unwrap().take()
    }

    pub(crate) fn store_context(&self, c: Context) {
        *self.0.saved_context.lock().unwrap() = Some(c);
    }

    pub(crate) fn processor_id(&self) -> Option<usize> {
        *self.0.processor.lock().unwrap()
    }

    pub(crate) fn set_processor_id(&self, p: Option<usize>) {
        *self.0.processor.lock().unwrap() = p;
    }

    pub(crate) fn waiter_count(&self) -> usize {
        self.0.waiter_count.load(Ordering::Relaxed)
    }

    pub(crate) fn take_entry(&self) -> Box<FnMut() + Send> {
        self.0
            .entry
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| fatal!("G{} entry already consumed", self.0.id))
    }

    /// Links `waiter` onto this coroutine's waiter list and returns
    /// `true`, unless this coroutine is already `Dead`, in which case it
    /// does nothing and returns `false` (caller must make `waiter`
    /// runnable itself).
    pub(crate) fn link_waiter(&self, waiter: Handle) -> bool {
        let mut waiters = self.0.waiters.lock().unwrap();
        if self.is_dead() {
            return false;
        }
        waiters.push(waiter);
        self.0.waiter_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Drains the waiter list. Called exactly once, by `exit`.
    pub(crate) fn drain_waiters(&self) -> Vec<Handle> {
        let mut waiters = self.0.waiters.lock().unwrap();
        self.0.waiter_count.store(0, Ordering::Relaxed);
        ::std::mem::replace(&mut *waiters, Vec::new())
    }
}

/// Allocates the main coroutine representing the thread that calls
/// [`::init`]. It owns no stack of its own (it runs on the OS thread's
/// native stack) and is never placed on any run queue.
pub(crate) fn new_main() -> Handle {
    let inner = CoroutineInner {
        id: 0,
        name: "main".to_owned(),
        entry: Mutex::new(None),
        status: AtomicUsize::new(State::Running as usize),
        is_main: true,
        stack: Mutex::new(None),
        saved_context: Mutex::new(None),
        waiters: Mutex::new(Vec::new()),
        waiter_count: AtomicUsize::new(0),
        processor: Mutex::new(None),
    };
    let g = Coroutine(Arc::new(inner));
    IS_MAIN_THREAD.with(|c| c.set(true));
    set_current(Some(g.clone()));
    g
}

pub(crate) fn is_main_thread() -> bool {
    IS_MAIN_THREAD.with(|c| c.get())
}

/// The coroutine currently running on this OS thread — the main
/// coroutine if this thread never entered the scheduler loop, otherwise
/// whatever `G` the local `Processor` last resumed.
pub(crate) fn current() -> Handle {
    CURRENT_G
        .with(|c| c.borrow().clone())
        .unwrap_or_else(|| fatal!("no current coroutine on this thread"))
}

pub(crate) fn set_current(g: Option<Handle>) {
    CURRENT_G.with(|c| *c.borrow_mut() = g);
}

/// Creates and enqueues a new coroutine. Mirrors `co_start`.
pub fn start<F>(name: &str, f: F) -> Coroutine
where
    F: FnOnce() + Send + 'static,
{
    let stack = CoroutineStack::new(DEFAULT_STACK_SIZE);

    // FnOnce is boxed behind a FnMut so `entry` can live in a plain
    // `Option<Box<FnMut()>>` slot and be called through `take_entry`
    // without requiring `Box<FnOnce()>` (unstable to call through a Box
    // on this crate's MSRV). `run_once` guards against a second call.
    let mut slot = Some(f);
    let entry: Box<FnMut() + Send> = Box::new(move || {
        if let Some(f) = slot.take() {
            f();
        }
    });

    let inner = CoroutineInner {
        id: scheduler::next_coroutine_id(),
        name: name.to_owned(),
        entry: Mutex::new(Some(entry)),
        status: AtomicUsize::new(State::New as usize),
        is_main: false,
        stack: Mutex::new(Some(stack)),
        saved_context: Mutex::new(None),
        waiters: Mutex::new(Vec::new()),
        waiter_count: AtomicUsize::new(0),
        processor: Mutex::new(None),
    };
    let g = Coroutine(Arc::new(inner));

    debug!("co_start: created G{} ({})", g.id(), g.name());

    processor::runq_put(processor::current_processor_id(), g.clone());
    g
}

/// Cooperatively yields the processor. A no-op when called from the
/// main coroutine, which is never scheduled.
pub fn yield_now() {
    let g = current();
    if g.is_main() {
        debug!("yield_now() on main coroutine ignored");
        return;
    }
    g.check_canary();
    ctx_switch::save_and_jump(ReasonCode::Yield, TransferSlot::Empty);
    g.check_canary();
}

/// Suspends the calling coroutine until `target` reaches `State::Dead`.
///
/// When called from the main coroutine (which is never scheduled and so
/// cannot be parked onto a waiter list) this busy-polls `target`'s
/// status instead of blocking.
pub fn wait(target: &Coroutine) {
    let g = current();
    if !g.is_main() {
        g.check_canary();
    }

    if target.is_dead() {
        debug!("wait: G{} already dead", target.id());
        return;
    }

    if g.is_main() {
        debug!("wait: main coroutine busy-polling G{}", target.id());
        while !target.is_dead() {
            ::std::thread::sleep(::std::time::Duration::from_millis(1));
        }
        return;
    }

    ctx_switch::save_and_jump(ReasonCode::Wait, TransferSlot::WaitTarget(target.clone()));
    g.check_canary();
}

/// Terminates the calling coroutine. A no-op when called on the main
/// coroutine (it cannot exit; the process exits around it instead).
///
/// Mirrors `co_exit`: the dead-handling (canary check, marking `Dead`,
/// linking into the scheduler's dead list, waking every waiter) all
/// happens here, before the jump back into the scheduler — by the time
/// the scheduler's dispatch table sees the `Exit` reason code there is
/// nothing left for it to do.
pub fn exit() {
    let g = current();
    g.check_canary();

    if g.is_main() {
        debug!("exit() on main coroutine ignored");
        return;
    }

    g.set_state(State::Dead);
    scheduler::add_dead(g.clone());

    for waiter in g.drain_waiters() {
        waiter.set_state(State::Runnable);
        processor::runq_put(waiter.processor_id(), waiter);
    }

    g.check_canary();
    ctx_switch::save_and_jump(ReasonCode::Exit, TransferSlot::Empty);
    unreachable!("a dead coroutine cannot be resumed");
}

/// Releases a dead coroutine's resources. Must not be called on a live
/// coroutine or the main coroutine (undefined behaviour in the original
/// C runtime — this implementation turns it into a logged `fatal!`).
///
/// `exit()` never unwinds off the coroutine's own stack, so the `Handle`
/// clones alive in its abandoned call frames (`run_wrapper`'s `g`,
/// `exit`'s own `current()`) never drop and hold the `Arc` strong count
/// above zero forever. Waiting for the last clone to drop would leak the
/// stack, so this takes it out of its slot and drops it here instead,
/// independent of however many of those strong refs remain.
pub fn free(g: Coroutine) {
    if g.is_main() {
        fatal!("free() called on the main coroutine");
    }
    if !g.is_dead() {
        fatal!("free() called on live G{} ({})", g.id(), g.name());
    }
    scheduler::remove_dead(&g);
    if let Some(stack) = g.0.stack.lock().unwrap().take() {
        drop(stack);
    }
    debug!("free: G{} ({}) stack released", g.id(), g.name());
}

/// Initializes a semaphore with the given starting count.
pub fn sem_init(sem: &Semaphore, initial: isize) {
    sem.init(initial);
}

/// Decrements a semaphore's count, blocking the calling coroutine if the
/// result would go negative.
///
/// The main coroutine is never resumed by a scheduler dispatch, so it
/// has no way to be woken back up once parked; calling this from the
/// main coroutine is a programming error, not a case this runtime
/// accommodates (compare `free()` on a live coroutine, also `fatal!`).
pub fn sem_wait(sem: &Semaphore) {
    if is_main_thread() {
        fatal!("sem_wait() called from the main coroutine, which cannot be parked");
    }
    sem.wait();
}

/// Increments a semaphore's count, waking one blocked waiter if any.
pub fn sem_post(sem: &Semaphore) {
    sem.post();
}

/// Entry point invoked on a coroutine's very first resumption (status
/// `New`). Mirrors `co_wrapper`.
pub(crate) fn run_wrapper(g: Handle) -> ! {
    set_current(Some(g.clone()));
    g.check_canary();
    g.set_state(State::Running);

    debug!("co_wrapper: starting G{} ({})", g.id(), g.name());
    {
        let mut entry = g.take_entry();
        entry();
    }
    debug!("co_wrapper: G{} finished", g.id());

    exit();
    unreachable!("co_wrapper: exit() returned")
}

/// Builds a `G` without touching the scheduler singleton or any run
/// queue — used by unit tests elsewhere in the crate (e.g.
/// `runtime::queue`) that only need a distinct, inspectable `Handle` and
/// would otherwise have to spin up a whole scheduler just to get one.
#[cfg(test)]
pub(crate) fn new_detached(name: &str) -> Handle {
    let inner = CoroutineInner {
        id: 0,
        name: name.to_owned(),
        entry: Mutex::new(Some(Box::new(|| {}) as Box<FnMut() + Send>)),
        status: AtomicUsize::new(State::New as usize),
        is_main: false,
        stack: Mutex::new(Some(CoroutineStack::new(DEFAULT_STACK_SIZE))),
        saved_context: Mutex::new(None),
        waiters: Mutex::new(Vec::new()),
        waiter_count: AtomicUsize::new(0),
        processor: Mutex::new(None),
    };
    Coroutine(Arc::new(inner))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn state_roundtrips_through_usize() {
        for s in &[
            State::New,
            State::Running,
            State::Runnable,
            State::Waiting,
            State::SemWaiting,
            State::Dead,
        ] {
            assert_eq!(State::from_usize(*s as usize), *s);
        }
    }

    #[test]
    fn stack_can_be_reclaimed_independent_of_leaked_handle_clones() {
        let g = new_detached("leaky");
        // Simulates the `Handle` clones that sit forever in `run_wrapper`'s
        // and `exit`'s abandoned stack frames once a coroutine exits
        // without unwinding: extra strong refs that never drop.
        let pinned = vec![g.clone(), g.clone()];
        assert!(g.0.stack.lock().unwrap().is_some());

        let taken = g.0.stack.lock().unwrap().take();
        assert!(taken.is_some());
        drop(taken);

        assert!(g.0.stack.lock().unwrap().is_none());
        drop(pinned);
    }
}
