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

//! An M:N stackful coroutine runtime built around a `G`-`P`-`M`
//! scheduler: coroutines (`G`) are multiplexed over a fixed pool of
//! logical processors (`P`, each with its own bounded run queue) which
//! are in turn driven by OS worker threads (`M`), with work-stealing
//! between `P`s to keep them all busy.
//!
//! ```no_run
//! let _rt = gpm_co::init();
//! let g = gpm_co::start("worker", || {
//!     println!("hello from a coroutine");
//! });
//! gpm_co::wait(&g);
//! gpm_co::free(g);
//! ```
//!
//! The public surface is deliberately small and infallible — there is
//! no `Result` anywhere in it. A coroutine that cannot be started, a
//! corrupted stack, or a misconfigured environment is a programming
//! error this crate reports by logging and aborting the process, not by
//! returning an error a caller might paper over (see `util::fatal!`).

#[macro_use]
extern crate log;
extern crate context;
extern crate libc;
extern crate rand;
extern crate time;

#[macro_use]
mod util;

mod config;
mod consts;
mod coroutine;
mod runtime;
mod scheduler;
mod sync;

pub use coroutine::{exit, free, sem_init, sem_post, sem_wait, start, wait, yield_now, Coroutine, State};
pub use sync::semaphore::Semaphore;

pub use config::Config;

/// An RAII handle on the running scheduler. Starting the runtime spawns
/// one worker thread per `P`; dropping this handle stops the world and
/// joins them, mirroring the original runtime's constructor/destructor
/// auto-init pair (`__attribute__((constructor))`/`(destructor))`) with
/// an explicit, ordinary Rust lifetime instead of link-time magic.
///
/// Only one `Runtime` may be alive in a process at a time.
pub struct Runtime {
    _private: (),
}

impl Runtime {
    fn start(cfg: Config) -> Runtime {
        coroutine::new_main();
        scheduler::init_and_start(&cfg);
        Runtime { _private: () }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        scheduler::stop();
    }
}

/// Starts the runtime with `COMAXPROCS`/`CO_SCHED_LOG` read from the
/// environment (falling back to `consts::DEFAULT_PARALLELISM` logical
/// processors and no shutdown summary). Aborts the process if
/// `COMAXPROCS` is set to something unparseable or zero.
pub fn init() -> Runtime {
    let cfg = config::Config::from_env().unwrap_or_else(|e| fatal!("invalid configuration: {:?}", e));
    Runtime::start(cfg)
}

/// Starts the runtime with an explicit [`Config`], ignoring the
/// environment entirely.
pub fn init_with_config(cfg: Config) -> Runtime {
    Runtime::start(cfg)
}
