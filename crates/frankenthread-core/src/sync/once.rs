//! One-time initialization on the address-wait layer.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::sys;

const INCOMPLETE: u32 = 0;
const RUNNING: u32 = 1;
const COMPLETE: u32 = 2;

/// Runs an initializer exactly once, however many threads race for it.
///
/// If the initializer unwinds (panic or cancellation), the `Once` goes back
/// to incomplete and the next caller retries.
#[derive(Debug)]
pub struct Once {
    state: AtomicU32,
}

struct ResetOnUnwind<'a>(&'a AtomicU32);

impl Drop for ResetOnUnwind<'_> {
    fn drop(&mut self) {
        self.0.store(INCOMPLETE, Ordering::Release);
        sys::wake_all(self.0);
    }
}

impl Once {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(INCOMPLETE),
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETE
    }

    pub fn call_once(&self, init: impl FnOnce()) {
        let mut init = Some(init);
        loop {
            match self.state.compare_exchange(
                INCOMPLETE,
                RUNNING,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let reset = ResetOnUnwind(&self.state);
                    if let Some(init) = init.take() {
                        init();
                    }
                    std::mem::forget(reset);
                    self.state.store(COMPLETE, Ordering::Release);
                    sys::wake_all(&self.state);
                    return;
                }
                Err(COMPLETE) => return,
                Err(_) => sys::wait(&self.state, RUNNING),
            }
        }
    }
}

impl Default for Once {
    fn default() -> Self {
        Self::new()
    }
}
