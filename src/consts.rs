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

//! Tunables that define the scheduler's wire-level behaviour.
//!
//! These mirror the constants hard-coded in the original `co.c`
//! (`internal.h`): default parallelism, default stack size, local run
//! queue capacity, the global-queue fairness check interval, steal
//! retries, the stack canary, and the idle sleep duration.

/// Default number of `P`s (and worker `M` threads) when `COMAXPROCS` is unset.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Default coroutine stack size in bytes.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Capacity of a `Processor`'s local run queue. Enqueues beyond this
/// overflow to the global run queue.
pub const LOCAL_RUNQ_CAP: usize = 8;

/// Every `P_SCHED_CHECK_INTERVAL`-th scheduling tick, a `Processor` peeks
/// at the global run queue even if its local queue is non-empty, so
/// globally queued coroutines are never starved.
pub const SCHED_CHECK_INTERVAL: usize = 61;

/// Number of randomized victim permutations tried per steal attempt.
pub const STEAL_TRIES: usize = 3;

/// Fixed 64-bit value written at the lowest address of every coroutine
/// stack. Checked on every scheduler entry into and exit from that stack.
pub const STACK_CANARY: u64 = 0xDEAD_BEEF_CAFE_BABE;

/// How long a worker thread sleeps after finding no runnable coroutine
/// anywhere (local queue, global queue, or steal) before retrying.
#[inline]
pub fn idle_sleep() -> ::std::time::Duration {
    ::std::time::Duration::from_micros(10_000)
}

/// Environment variable that overrides `DEFAULT_PARALLELISM`.
pub const ENV_MAXPROCS: &'static str = "COMAXPROCS";

/// Environment variable that, if set to any non-empty value, causes a
/// scheduler summary to be logged to stderr on shutdown.
pub const ENV_SCHED_LOG: &'static str = "CO_SCHED_LOG";
