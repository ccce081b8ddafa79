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

//! `M`: an OS worker thread bound to exactly one `P` for its lifetime,
//! running the scheduling loop that finds runnable `G`s and resumes
//! them. Mirrors `m_main_loop` in the original runtime, generalized from
//! its `setjmp`-based "SCHED:" label into the `context`-crate-backed
//! `switch_into`/reason-code dispatch this crate uses throughout.
//!
//! This runtime binds each `M` to a single `P` for the worker's whole
//! lifetime rather than letting idle `M`s hand their `P` off to one
//! another — the original's `idle_p_list` handoff exists to let a
//! blocked `M` give up its `P` to someone with work; since this crate's
//! coroutines never block the underlying OS thread (every blocking
//! operation is a `save_and_jump` back into this very loop), an `M`
//! never has a reason to give up its `P`. Work imbalance between `P`s is
//! handled entirely by `scheduler::find_runnable`'s global-queue checks
//! and stealing.

use std::thread;

use consts;
use coroutine::{self, Handle, State};
use runtime::context::{self as ctx_switch, ReasonCode, TransferSlot};
use runtime::processor::{self, PStatus, Processor};
use scheduler;
use sync::semaphore::Semaphore;

/// Entry point for a freshly spawned worker thread. Never returns until
/// `scheduler::stop()` has signalled shutdown.
pub(crate) fn run(p: Processor) {
    p.bind_to_current_thread();
    // Set once for the worker's whole lifetime on this `P`, mirroring
    // `p_get_idle` setting `p->status = P_RUNNING` at bind time rather
    // than toggling it per scheduling-loop iteration — `steal_work` reads
    // this to skip victims that aren't actually bound to a live `M`.
    p.set_status(PStatus::Running);
    debug!("M started on P{}", p.id());

    loop {
        if scheduler::should_stop() {
            break;
        }

        match scheduler::find_runnable(&p) {
            Some(g) => dispatch(&p, g),
            None => thread::sleep(consts::idle_sleep()),
        }
    }

    // Mirrors `p_put_idle` at shutdown.
    p.set_status(PStatus::Idle);
    Processor::unbind_from_current_thread();
    debug!("M stopped on P{}", p.id());
}

/// Resumes `g` once and acts on the reason code it hands back. `Exit`
/// needs no action here: `coroutine::exit()` performs all of its own
/// cleanup (marking `Dead`, waking waiters) before making the jump.
fn dispatch(p: &Processor, g: Handle) {
    g.set_processor_id(Some(p.id()));
    g.set_state(State::Running);

    // Mirrors `co_schedule` setting `current_g = g` before every switch,
    // NEW or RUNABLE (co.c): without this, a resumed (not freshly
    // started) coroutine leaves `CURRENT_G` pointing at whatever `G` last
    // ran `run_wrapper` on this thread, so `current()` inside that
    // coroutine's body — and the `exit()` call at the end of it — would
    // act on the wrong `G`.
    coroutine::set_current(Some(g.clone()));

    let reason = ctx_switch::switch_into(&g);

    match reason {
        ReasonCode::Yield => {
            trace!("P{}: G{} yielded", p.id(), g.id());
            g.set_state(State::Runnable);
            processor::runq_put(Some(p.id()), g);
        }
        ReasonCode::Wait => {
            trace!("P{}: G{} parked on wait", p.id(), g.id());
            match ctx_switch::take_transfer_slot() {
                TransferSlot::WaitTarget(target) => {
                    g.set_state(State::Waiting);
                    if !target.link_waiter(g.clone()) {
                        // The target finished the instant between
                        // `co_wait`'s dead-check and the jump; wake
                        // immediately rather than leaving it parked
                        // forever.
                        g.set_state(State::Runnable);
                        processor::runq_put(Some(p.id()), g);
                    }
                }
                _ => fatal!("Wait reason code carried no wait target"),
            }
        }
        ReasonCode::SemWait => {
            trace!("P{}: G{} parked on a semaphore", p.id(), g.id());
            match ctx_switch::take_transfer_slot() {
                TransferSlot::Semaphore(ptr) => {
                    g.set_state(State::SemWaiting);
                    unsafe {
                        Semaphore::link_waiter_and_unlock(ptr, g);
                    }
                }
                _ => fatal!("SemWait reason code carried no semaphore"),
            }
        }
        ReasonCode::Exit => {
            trace!("P{}: G{} exited", p.id(), g.id());
        }
    }
}
