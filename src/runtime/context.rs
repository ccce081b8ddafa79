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

//! The context-switch primitives and the thread-local "transfer slot"
//! that carries a reason code plus an optional payload (a wait target,
//! or a semaphore) from a suspending coroutine to the scheduler dispatch
//! that resumes on the same OS thread immediately afterwards.
//!
//! Rather than hand-rolling the two raw-asm primitives the original C
//! runtime needs (`stack_switch_call` plus `setjmp`/`longjmp`), this
//! crate reuses the `context` crate's `fcontext`-based `Context`/
//! `Transfer`, the portable "use the platform's existing low-level
//! context primitives" option.
//!
//! The two primitives map onto `context::Context` as follows:
//!
//! - *Switch-to-fresh-stack* is `Context::new(stack, trampoline)` followed
//!   by `.resume(raw_g_ptr)`: the coroutine pointer travels across in the
//!   `Transfer::data` word, exactly where a register-argument convention
//!   would put it.
//! - *Save-and-jump* is whatever `Context` the coroutine's own earlier
//!   resume handed it (stashed in `OUTER_CONTEXT`) being resumed with the
//!   reason code as `data`; the `Transfer` it gets back in return holds
//!   the *new* context to resume into next time, which is stashed right
//!   back into `OUTER_CONTEXT`.

use std::cell::Cell;

use context::{Context, Transfer};

use coroutine::{self, Handle};

thread_local!(static OUTER_CONTEXT: Cell<Option<Context>> = Cell::new(None));
thread_local!(static TRANSFER_SLOT: Cell<TransferSlot> = Cell::new(TransferSlot::Empty));

/// The reason a coroutine handed control back to its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReasonCode {
    Yield = 1,
    Wait = 2,
    SemWait = 3,
    Exit = 4,
}

impl ReasonCode {
    fn from_usize(v: usize) -> ReasonCode {
        match v {
            1 => ReasonCode::Yield,
            2 => ReasonCode::Wait,
            3 => ReasonCode::SemWait,
            4 => ReasonCode::Exit,
            _ => fatal!("unrecognized scheduler reason code: {}", v),
        }
    }
}

/// Payload accompanying a reason code, read by the scheduler dispatch
/// immediately after the coroutine that set it has jumped away. Never
/// observed by any thread other than the one that wrote it.
#[derive(Clone)]
pub enum TransferSlot {
    Empty,
    WaitTarget(Handle),
    /// A `*const Semaphore`, erased to `usize` so this module does not
    /// need to depend on `sync::semaphore`.
    Semaphore(usize),
}

/// The trampoline every freshly started coroutine's stack begins
/// executing on. Reconstructs the `Handle` passed across in `t.data` and
/// hands control to `coroutine::run_wrapper`, which never returns.
extern "C" fn trampoline(t: Transfer) -> ! {
    OUTER_CONTEXT.with(|c| c.set(Some(t.context)));
    let g = unsafe { Handle::from_raw(t.data) };
    coroutine::run_wrapper(g)
}

/// Resumes `g` on the calling (worker) thread. `g` must currently be
/// owned by the calling `Processor`/`Machine` and not concurrently
/// touched by anyone else. Returns the reason code the coroutine handed
/// back when it next suspended.
pub(crate) fn switch_into(g: &Handle) -> ReasonCode {
    let transfer = match g.take_context() {
        Some(saved) => saved.resume(0),
        None => {
            let raw_ctx = g.with_stack_raw(|s| unsafe { Context::new(s, trampoline) });
            let raw_ptr = g.clone().into_raw();
            raw_ctx.resume(raw_ptr)
        }
    };
    g.store_context(transfer.context);
    ReasonCode::from_usize(transfer.data)
}

/// Called from inside a running coroutine: saves its register state,
/// publishes `slot` for the scheduler to consume, and jumps back into
/// the scheduler loop on this OS thread carrying `reason`. Returns once
/// this coroutine is resumed again.
pub(crate) fn save_and_jump(reason: ReasonCode, slot: TransferSlot) {
    TRANSFER_SLOT.with(|c| c.set(slot));
    let outer = OUTER_CONTEXT
        .with(|c| c.replace(None))
        .unwrap_or_else(|| fatal!("save_and_jump called with no outer scheduler context"));
    let transfer = outer.resume(reason as usize);
    OUTER_CONTEXT.with(|c| c.set(Some(transfer.context)));
}

/// Consumed by the scheduler dispatch immediately after `switch_into`
/// returns, on the same OS thread that just ran `save_and_jump`.
pub(crate) fn take_transfer_slot() -> TransferSlot {
    TRANSFER_SLOT.with(|c| c.replace(TransferSlot::Empty))
}
