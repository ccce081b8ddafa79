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

//! Small helpers shared across the runtime.

/// Logs a `PANIC`-style diagnostic at `error!` level and aborts the
/// process. Mirrors `panic()`/`assert()` in the original C runtime's
/// `panic.h`: every fatal condition in this crate (a corrupted stack
/// canary, a broken queue-size invariant, an OOM on coroutine creation,
/// a bad `COMAXPROCS`) goes through here rather than through `panic!`,
/// since unwinding across a coroutine's borrowed OS stack is not sound.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        error!("PANIC at {}:{} in {}: {}", file!(), line!(), module_path!(), format_args!($($arg)*));
        ::std::process::abort();
    }}
}

/// Like `assert!`, but aborts via [`fatal!`] instead of unwinding.
macro_rules! co_assert {
    ($cond:expr) => {
        if !$cond {
            fatal!("assertion failed: {}", stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            fatal!("assertion failed: {} ({})", stringify!($cond), format_args!($($arg)*));
        }
    };
}
