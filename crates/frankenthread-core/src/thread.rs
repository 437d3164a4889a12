//! Thread lifecycle.
//!
//! Runtime threads are created with `std::thread::Builder`, so the standard
//! library's own per-thread bookkeeping is in place, and then run through a
//! trampoline that:
//!
//! 1. records the runtime thread id and applies the real-time priority hint,
//! 2. binds the thread's cancellation control block,
//! 3. runs the entry closure, catching the cancellation unwind,
//! 4. sweeps thread-specific storage destructors,
//! 5. signals joiners, even if a destructor panicked.
//!
//! Termination signals (`SIGINT`, `SIGHUP`, `SIGQUIT`, `SIGTERM`,
//! `SIGCHLD`) are blocked around creation so new threads inherit a mask
//! that leaves them to the threads that handle them.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crate::cancel::{self, Cancelled, ThreadControl};
use crate::error::{Result, ThreadError};
use crate::runtime;
use crate::sys::host;
use crate::tls;

/// Stack size of runtime threads: 128 KiB per byte of machine word.
pub const STACK_SIZE: usize = 128 * std::mem::size_of::<usize>() * 1024;

/// Base scheduling priority. With real-time priorities enabled, the
/// configured offset is added and the thread runs under `SCHED_RR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i32);

impl Priority {
    pub const LOW: Self = Self(0);
    pub const VIDEO: Self = Self(0);
    pub const AUDIO: Self = Self(5);
    pub const INPUT: Self = Self(10);
    pub const OUTPUT: Self = Self(15);
    pub const HIGHEST: Self = Self(20);
}

// ---------------------------------------------------------------------------
// Thread ids
// ---------------------------------------------------------------------------

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static SELF_ID: Cell<u64> = const { Cell::new(0) };
}

fn fresh_thread_id() -> u64 {
    NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)
}

/// Runtime id of the calling thread. Threads the runtime did not create
/// get an id on first use. Never 0.
#[must_use]
pub fn current_id() -> u64 {
    SELF_ID.with(|slot| {
        let existing = slot.get();
        if existing != 0 {
            return existing;
        }
        let id = fresh_thread_id();
        slot.set(id);
        id
    })
}

/// Whether the calling thread was created by [`clone`] or [`clone_detached`].
#[must_use]
pub fn is_runtime_thread() -> bool {
    cancel::current_control().is_some()
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

fn apply_realtime_priority(native: usize, priority: i32, id: u64) {
    match host::set_realtime_priority(native, priority) {
        Ok(applied) => log::debug!("thread {id}: SCHED_RR priority {applied}"),
        Err(errno) => {
            log::debug!("thread {id}: real-time priority {priority} not applied (errno {errno})");
        }
    }
}

/// Signals joiners when dropped, including while a panic unwinds out of
/// the exit sweep.
struct FinishOnExit(Arc<ThreadControl>);

impl Drop for FinishOnExit {
    fn drop(&mut self) {
        self.0.mark_finished();
    }
}

fn trampoline<T, F>(control: Arc<ThreadControl>, entry: F, rt_priority: Option<i32>) -> Option<T>
where
    F: FnOnce() -> T,
{
    SELF_ID.with(|slot| slot.set(control.id()));
    let finished = FinishOnExit(Arc::clone(&control));
    if let Some(priority) = rt_priority {
        apply_realtime_priority(host::native_self(), priority, control.id());
    }

    cancel::install(control);
    let outcome = panic::catch_unwind(AssertUnwindSafe(entry));
    cancel::uninstall();
    tls::sweep_current_thread();
    drop(finished);

    match outcome {
        Ok(value) => Some(value),
        Err(payload) => cancelled_or_resume(payload),
    }
}

fn cancelled_or_resume<T>(payload: Box<dyn Any + Send>) -> Option<T> {
    if payload.is::<Cancelled>() {
        None
    } else {
        panic::resume_unwind(payload)
    }
}

fn spawn<T, F>(entry: F, priority: Priority) -> Result<(Arc<ThreadControl>, JoinHandle<Option<T>>)>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let rt_priority = runtime::get().realtime_priority(priority);
    let id = fresh_thread_id();
    let control = Arc::new(ThreadControl::new(id));
    let child = Arc::clone(&control);
    let builder = std::thread::Builder::new()
        .name(format!("frankenthread-{id}"))
        .stack_size(STACK_SIZE);

    let spawned = {
        let _mask = host::mask_termination_signals();
        builder.spawn(move || trampoline(child, entry, rt_priority))
    };
    match spawned {
        Ok(handle) => {
            log::debug!("spawned thread {id} (priority {})", priority.0);
            Ok((control, handle))
        }
        Err(err) => {
            log::debug!("thread spawn failed: {err}");
            Err(ThreadError::from_spawn(err))
        }
    }
}

/// Start a joinable thread running `entry`.
pub fn clone<T, F>(entry: F, priority: Priority) -> Result<Thread<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (control, handle) = spawn(entry, priority)?;
    Ok(Thread { control, handle })
}

/// Start a thread nobody will join. It frees its own control block on exit.
pub fn clone_detached<F>(entry: F, priority: Priority) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    spawn(entry, priority).map(drop)
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A joinable runtime thread.
///
/// Dropping the handle without joining detaches the thread.
#[must_use = "dropping a Thread detaches it"]
pub struct Thread<T> {
    control: Arc<ThreadControl>,
    handle: JoinHandle<Option<T>>,
}

impl<T> Thread<T> {
    /// Runtime id of the thread.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.control.id()
    }

    /// Request cancellation. Takes effect at the target's next cancellation
    /// point with cancellation enabled; a blocked cancellable wait is woken.
    pub fn cancel(&self) {
        cancel::request(&self.control);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.control.is_killed()
    }

    /// Whether the entry closure and exit sweep have completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.control.is_finished()
    }

    /// Wait for the thread to exit. Cancellation point for the caller.
    ///
    /// Returns the entry's result, or `None` if the thread was cancelled.
    /// A panic in the thread resumes in the caller.
    pub fn join(self) -> Option<T> {
        self.control.wait_finished();
        match self.handle.join() {
            Ok(result) => result,
            Err(payload) => cancelled_or_resume(payload),
        }
    }

    /// Re-apply a real-time priority. No-op when real-time priorities are
    /// disabled.
    pub fn set_priority(&self, priority: Priority) -> Result<()> {
        let Some(rt_priority) = runtime::get().realtime_priority(priority) else {
            return Ok(());
        };
        host::set_realtime_priority(native_handle(&self.handle), rt_priority)
            .map(drop)
            .map_err(|errno| ThreadError::from_errno("pthread_setschedparam", errno))
    }
}

impl<T> std::fmt::Debug for Thread<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id())
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(unix)]
fn native_handle<T>(handle: &JoinHandle<T>) -> usize {
    use std::os::unix::thread::JoinHandleExt;
    handle.as_pthread_t() as usize
}

#[cfg(not(unix))]
fn native_handle<T>(_handle: &JoinHandle<T>) -> usize {
    0
}
