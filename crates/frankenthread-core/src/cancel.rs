//! Deferred, cooperative cancellation.
//!
//! ## Model
//!
//! - Each runtime thread carries a [`ThreadControl`] shared with its
//!   [`crate::thread::Thread`] handle. `killed` is the only field another
//!   thread writes; it and the wait-address registration sit behind the
//!   control block's lock.
//! - `killable` and the cleanup stack are plain thread-locals, touched only
//!   by the owning thread.
//! - Cancellation takes effect only at cancellation points
//!   ([`test_cancel`] and the blocking calls built on [`wait_addr`]). The
//!   thread then disables cancellation, runs cleanup records newest first,
//!   and unwinds with a [`Cancelled`] payload that the thread trampoline
//!   catches.
//!
//! ## Waking a blocked target
//!
//! A cancellable wait registers the word it sleeps on. [`request`] sets
//! `killed`, bumps the registered word and wakes all of its waiters, so the
//! target cannot miss the request even if it registered but has not yet
//! gone to sleep. Every word waited on through [`wait_addr`] must therefore
//! be a wake-sequence word whose value carries no other meaning.

#![allow(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::contract;
use crate::sys::{self, AddrWait};

/// Unwind payload of a cancelled thread.
///
/// Catching it with `catch_unwind` outside the runtime trampoline breaks
/// the cancellation contract: the thread must not resume.
#[derive(Debug)]
pub struct Cancelled;

/// Cancellation state returned by [`save_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "pass the saved state back to restore_cancel"]
pub struct CancelState {
    enabled: bool,
}

impl CancelState {
    #[must_use]
    pub fn is_enabled(self) -> bool {
        self.enabled
    }
}

// ---------------------------------------------------------------------------
// Thread control block
// ---------------------------------------------------------------------------

struct WaitAddr(*const AtomicU32);

// SAFETY: the pointer is only dereferenced by `request`, under the control
// lock, while the registering thread is still inside `wait_addr`.
unsafe impl Send for WaitAddr {}

/// State shared between a runtime thread and its handle.
pub(crate) struct ThreadControl {
    id: u64,
    killed: AtomicBool,
    wait: parking_lot::Mutex<Option<WaitAddr>>,
    park_seq: AtomicU32,
    exit_seq: AtomicU32,
    finished: AtomicBool,
}

impl ThreadControl {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            killed: AtomicBool::new(false),
            wait: parking_lot::Mutex::new(None),
            park_seq: AtomicU32::new(0),
            exit_seq: AtomicU32::new(0),
            finished: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Called by the trampoline once the thread has run everything it will.
    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
        self.exit_seq.fetch_add(1, Ordering::Release);
        sys::wake_all(&self.exit_seq);
    }

    /// Block until [`ThreadControl::mark_finished`]. Cancellation point for
    /// the caller.
    pub(crate) fn wait_finished(&self) {
        test_cancel();
        loop {
            let seq = self.exit_seq.load(Ordering::Acquire);
            if self.is_finished() {
                return;
            }
            wait_addr(&self.exit_seq, seq, None);
            test_cancel();
        }
    }
}

/// Ask the thread owning `control` to terminate at its next cancellation
/// point.
pub(crate) fn request(control: &ThreadControl) {
    let slot = control.wait.lock();
    control.killed.store(true, Ordering::SeqCst);
    if let Some(addr) = slot.as_ref() {
        // SAFETY: the target clears the registration under this lock before
        // leaving `wait_addr`, and the word outlives that call.
        let word = unsafe { &*addr.0 };
        word.fetch_add(1, Ordering::SeqCst);
        sys::wake_all(word);
    }
    log::debug!("cancellation requested for thread {}", control.id);
}

// ---------------------------------------------------------------------------
// Thread-local state
// ---------------------------------------------------------------------------

type CleanupFn = Box<dyn FnOnce() + 'static>;

struct LocalState {
    control: RefCell<Option<Arc<ThreadControl>>>,
    killable: Cell<bool>,
    cleanup: RefCell<Vec<CleanupFn>>,
}

thread_local! {
    static LOCAL: LocalState = const {
        LocalState {
            control: RefCell::new(None),
            killable: Cell::new(true),
            cleanup: RefCell::new(Vec::new()),
        }
    };
}

/// Bind `control` to the calling thread. Trampoline only.
pub(crate) fn install(control: Arc<ThreadControl>) {
    LOCAL.with(|local| {
        *local.control.borrow_mut() = Some(control);
        local.killable.set(true);
    });
}

/// Unbind the calling thread's control block. Trampoline only.
pub(crate) fn uninstall() {
    let _ = LOCAL.try_with(|local| {
        let leftover = std::mem::take(&mut *local.cleanup.borrow_mut());
        if !leftover.is_empty() {
            log::warn!(
                "thread exited with {} cleanup record(s) still pushed; discarding",
                leftover.len()
            );
        }
        local.control.borrow_mut().take();
    });
}

pub(crate) fn current_control() -> Option<Arc<ThreadControl>> {
    LOCAL
        .try_with(|local| local.control.borrow().clone())
        .ok()
        .flatten()
}

fn killable_control() -> Option<Arc<ThreadControl>> {
    LOCAL
        .try_with(|local| {
            if local.killable.get() {
                local.control.borrow().clone()
            } else {
                None
            }
        })
        .ok()
        .flatten()
}

// ---------------------------------------------------------------------------
// Enable / disable
// ---------------------------------------------------------------------------

/// Disable cancellation and return the prior state.
///
/// During thread-local teardown the prior state reads as disabled.
pub fn save_cancel() -> CancelState {
    let enabled = LOCAL
        .try_with(|local| local.killable.replace(false))
        .unwrap_or(false);
    CancelState { enabled }
}

/// Restore the state returned by the matching [`save_cancel`].
///
/// Saves do not nest: restoring while cancellation is enabled aborts.
#[track_caller]
pub fn restore_cancel(prior: CancelState) {
    let was_disabled = LOCAL
        .try_with(|local| {
            if local.killable.get() {
                return false;
            }
            local.killable.set(prior.enabled);
            true
        })
        .unwrap_or(true);
    if !was_disabled {
        contract::violation(
            "restore_cancel",
            format_args!("cancellation is not disabled; save/restore must be balanced"),
        );
    }
}

/// Whether cancellation is currently enabled on the calling thread.
#[must_use]
pub fn is_cancel_enabled() -> bool {
    LOCAL.try_with(|local| local.killable.get()).unwrap_or(false)
}

/// Whether the calling thread would terminate at its next cancellation point.
pub(crate) fn is_pending() -> bool {
    killable_control().is_some_and(|control| control.is_killed())
}

/// Cancellation point: terminate now if cancellation is enabled and pending.
///
/// No-op on threads the runtime did not create.
pub fn test_cancel() {
    if is_pending() {
        terminate();
    }
}

#[cold]
fn terminate() -> ! {
    let _ = LOCAL.try_with(|local| local.killable.set(false));
    loop {
        let record = LOCAL
            .try_with(|local| local.cleanup.borrow_mut().pop())
            .ok()
            .flatten();
        match record {
            Some(cleanup) => cleanup(),
            None => break,
        }
    }
    std::panic::resume_unwind(Box::new(Cancelled))
}

// ---------------------------------------------------------------------------
// Cleanup records
// ---------------------------------------------------------------------------

/// Push a cleanup procedure, run if the thread is cancelled before the
/// matching [`cleanup_pop`] / [`cleanup_run`].
pub fn cleanup_push(cleanup: impl FnOnce() + 'static) {
    push_record(Box::new(cleanup));
}

/// Discard the newest cleanup record without running it.
#[track_caller]
pub fn cleanup_pop() {
    drop(pop_record("cleanup_pop"));
}

/// Pop the newest cleanup record and run it.
#[track_caller]
pub fn cleanup_run() {
    let cleanup = pop_record("cleanup_run");
    cleanup();
}

/// Depth of the calling thread's cleanup stack.
#[must_use]
pub fn cleanup_depth() -> usize {
    LOCAL
        .try_with(|local| local.cleanup.borrow().len())
        .unwrap_or(0)
}

/// Returns the new depth, or 0 if thread-local state is already gone and the
/// record was dropped.
fn push_record(record: CleanupFn) -> usize {
    LOCAL
        .try_with(|local| {
            let mut stack = local.cleanup.borrow_mut();
            stack.push(record);
            stack.len()
        })
        .unwrap_or(0)
}

#[track_caller]
fn pop_record(operation: &'static str) -> CleanupFn {
    match LOCAL
        .try_with(|local| local.cleanup.borrow_mut().pop())
        .ok()
        .flatten()
    {
        Some(record) => record,
        None => contract::violation(operation, format_args!("cleanup stack is empty")),
    }
}

struct ScopedRecord {
    depth: usize,
}

impl Drop for ScopedRecord {
    fn drop(&mut self) {
        let _ = LOCAL.try_with(|local| {
            let mut stack = local.cleanup.borrow_mut();
            // Cancellation already drained the stack; otherwise drop our
            // record (and anything left above it) unrun.
            if self.depth > 0 && stack.len() >= self.depth {
                stack.truncate(self.depth.saturating_sub(1));
            }
        });
    }
}

/// Run `body` with `cleanup` registered as a cleanup record.
///
/// If the thread is cancelled inside `body`, `cleanup` runs (after any
/// records pushed later) before the thread terminates. Otherwise it is
/// dropped unrun when `body` returns or panics. Unlike [`cleanup_push`],
/// `cleanup` may borrow from the caller's frame.
#[track_caller]
pub fn with_cleanup<'a, R>(cleanup: impl FnOnce() + 'a, body: impl FnOnce() -> R) -> R {
    let record: Box<dyn FnOnce() + 'a> = Box::new(cleanup);
    // SAFETY: `ScopedRecord` removes the record before this frame returns or
    // finishes unwinding. Cancellation runs it while the frame is still
    // live. Either way it never outlives `'a`.
    let record: CleanupFn = unsafe { std::mem::transmute::<Box<dyn FnOnce() + 'a>, CleanupFn>(record) };
    let depth = push_record(record);
    let scope = ScopedRecord { depth };
    let result = body();
    if cleanup_depth() != depth {
        contract::violation(
            "with_cleanup",
            format_args!(
                "cleanup stack unbalanced: depth {} on exit, expected {depth}",
                cleanup_depth()
            ),
        );
    }
    drop(scope);
    result
}

// ---------------------------------------------------------------------------
// Cancellable waits
// ---------------------------------------------------------------------------

/// Address wait that a [`request`] can interrupt.
///
/// Returns [`AddrWait::Woken`] without sleeping if cancellation is already
/// pending; callers follow up with [`test_cancel`].
pub(crate) fn wait_addr(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> AddrWait {
    let Some(control) = killable_control() else {
        return sys::wait_for(word, expected, timeout);
    };
    {
        let mut slot = control.wait.lock();
        if control.is_killed() {
            return AddrWait::Woken;
        }
        *slot = Some(WaitAddr(word as *const AtomicU32));
    }
    let outcome = sys::wait_for(word, expected, timeout);
    *control.wait.lock() = None;
    outcome
}

/// Sleep for at most `timeout`; cancellation cuts it short.
pub(crate) fn park_timeout(timeout: Duration) {
    match current_control() {
        Some(control) => {
            let seq = control.park_seq.load(Ordering::Acquire);
            wait_addr(&control.park_seq, seq, Some(timeout));
        }
        None => {
            let idle = AtomicU32::new(0);
            sys::wait_for(&idle, 0, Some(timeout));
        }
    }
}
