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

//! Coroutine stack allocation and the overflow canary.
//!
//! Each `G` owns a fixed-size stack allocated through the `context`
//! crate's `ProtectedFixedSizeStack`, which maps a guard page below the
//! usable region (catching gross overflow with a hard segfault). On top
//! of that this runtime writes a software canary — the fixed 64-bit
//! value `consts::STACK_CANARY` — at the lowest address of the usable
//! region, exactly where the original C runtime's `co_start` writes it,
//! and checks it at the same points: wrapper entry, either side of the
//! user function, and every resumption after a yield or wait.

use context::stack::{ProtectedFixedSizeStack, Stack as ContextStack};

use consts::STACK_CANARY;

pub struct CoroutineStack {
    inner: ProtectedFixedSizeStack,
}

impl CoroutineStack {
    pub fn new(size: usize) -> CoroutineStack {
        let inner = match ProtectedFixedSizeStack::new(size) {
            Ok(s) => s,
            Err(e) => fatal!("failed to allocate {}-byte coroutine stack: {}", size, e),
        };

        let stack = CoroutineStack { inner: inner };
        unsafe {
            *(stack.inner.bottom() as *mut u64) = STACK_CANARY;
        }
        stack
    }

    /// `true` iff the canary word is intact.
    #[inline]
    pub fn canary_intact(&self) -> bool {
        unsafe { *(self.inner.bottom() as *const u64) == STACK_CANARY }
    }

    #[inline]
    pub fn raw(&self) -> &ProtectedFixedSizeStack {
        &self.inner
    }
}

// `ProtectedFixedSizeStack` is a raw mmap'd region; it is fine to hand
// the owning `G` (and hence this stack) to any worker thread, same as
// any other heap allocation.
unsafe impl Send for CoroutineStack {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn canary_written_on_allocation() {
        let stack = CoroutineStack::new(64 * 1024);
        assert!(stack.canary_intact());
    }

    #[test]
    fn canary_detects_corruption() {
        let stack = CoroutineStack::new(64 * 1024);
        unsafe {
            *(stack.inner.bottom() as *mut u64) = 0;
        }
        assert!(!stack.canary_intact());
    }
}
