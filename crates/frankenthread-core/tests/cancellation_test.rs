use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use frankenthread_core::cancel::{self, cleanup_push, with_cleanup};
use frankenthread_core::sync::{Condvar, Mutex, Semaphore};
use frankenthread_core::thread::{self, Priority};
use frankenthread_core::{clock, tls};
use parking_lot::Mutex as Journal;

type Log = Arc<Journal<Vec<&'static str>>>;

fn journal() -> Log {
    Arc::new(Journal::new(Vec::new()))
}

fn record(log: &Log, event: &'static str) -> impl FnOnce() + 'static {
    let log = Arc::clone(log);
    move || log.lock().push(event)
}

#[test]
fn cancel_in_cond_wait_reacquires_mutex_then_runs_cleanup_lifo() {
    let log = journal();
    let state = Arc::new((Mutex::new_fast(), Condvar::new()));
    let started = Arc::new(Semaphore::new(0));

    let target = {
        let log = Arc::clone(&log);
        let state = Arc::clone(&state);
        let started = Arc::clone(&started);
        thread::clone(
            move || {
                let (lock, cond) = &*state;
                cleanup_push(record(&log, "outer"));
                lock.lock();
                {
                    let log = Arc::clone(&log);
                    let state = Arc::clone(&state);
                    cleanup_push(move || {
                        assert!(state.0.is_locked_by_current());
                        state.0.unlock();
                        log.lock().push("unlock");
                    });
                }
                started.post().unwrap();
                for _ in 0..1_000_000 {
                    cond.wait(lock);
                }
                log.lock().push("returned");
            },
            Priority::LOW,
        )
        .unwrap()
    };

    started.wait();
    std::thread::sleep(Duration::from_millis(20));
    target.cancel();
    assert_eq!(target.join(), None);
    assert_eq!(*log.lock(), vec!["unlock", "outer"]);
    assert!(!state.0.is_locked());
}

#[test]
fn cancel_in_sem_wait_runs_each_cleanup_once() {
    let log = journal();
    let sem = Arc::new(Semaphore::new(0));
    let started = Arc::new(AtomicBool::new(false));

    let target = {
        let log = Arc::clone(&log);
        let sem = Arc::clone(&sem);
        let started = Arc::clone(&started);
        thread::clone(
            move || {
                cleanup_push(record(&log, "first"));
                cleanup_push(record(&log, "second"));
                cleanup_push(record(&log, "third"));
                started.store(true, Ordering::SeqCst);
                sem.wait();
                log.lock().push("admitted");
            },
            Priority::LOW,
        )
        .unwrap()
    };

    while !started.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(1));
    }
    std::thread::sleep(Duration::from_millis(20));
    target.cancel();
    assert_eq!(target.join(), None);
    assert_eq!(*log.lock(), vec!["third", "second", "first"]);

    // The cancelled waiter did not consume anything.
    sem.post().unwrap();
    assert!(sem.try_wait());
}

#[test]
fn cancel_in_join_terminates_the_joiner() {
    let log = journal();
    let release = Arc::new(Semaphore::new(0));
    let inner_done = Arc::new(AtomicBool::new(false));
    let joining = Arc::new(Semaphore::new(0));

    let joiner = {
        let log = Arc::clone(&log);
        let release = Arc::clone(&release);
        let inner_done = Arc::clone(&inner_done);
        let joining = Arc::clone(&joining);
        thread::clone(
            move || {
                let inner = thread::clone(
                    move || {
                        release.wait();
                        inner_done.store(true, Ordering::SeqCst);
                    },
                    Priority::LOW,
                )
                .unwrap();
                cleanup_push(record(&log, "joiner cleanup"));
                joining.post().unwrap();
                inner.join();
                log.lock().push("join returned");
            },
            Priority::LOW,
        )
        .unwrap()
    };

    joining.wait();
    std::thread::sleep(Duration::from_millis(20));
    joiner.cancel();
    assert_eq!(joiner.join(), None);
    assert_eq!(*log.lock(), vec!["joiner cleanup"]);

    // The inner thread was detached by the joiner's unwind and still finishes.
    release.post().unwrap();
    for _ in 0..500 {
        if inner_done.load(Ordering::SeqCst) {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(inner_done.load(Ordering::SeqCst));
}

#[test]
fn disabled_cancellation_defers_until_restored() {
    let log = journal();
    let parked = Arc::new(Semaphore::new(0));
    let go = Arc::new(Semaphore::new(0));

    let target = {
        let log = Arc::clone(&log);
        let parked = Arc::clone(&parked);
        let go = Arc::clone(&go);
        thread::clone(
            move || {
                cleanup_push(record(&log, "cleanup"));
                let state = cancel::save_cancel();
                parked.post().unwrap();
                go.wait();
                cancel::test_cancel();
                clock::sleep(Duration::from_millis(1));
                log.lock().push("survived");
                cancel::restore_cancel(state);
                cancel::test_cancel();
                log.lock().push("after restore");
            },
            Priority::LOW,
        )
        .unwrap()
    };

    parked.wait();
    target.cancel();
    std::thread::sleep(Duration::from_millis(10));
    go.post().unwrap();
    assert_eq!(target.join(), None);
    assert_eq!(*log.lock(), vec!["survived", "cleanup"]);
}

#[test]
fn cancel_interrupts_sleep() {
    let target = thread::clone(|| clock::sleep(Duration::from_secs(30)), Priority::LOW).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let start = std::time::Instant::now();
    target.cancel();
    assert_eq!(target.join(), None);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn scoped_cleanup_may_borrow_the_frame() {
    let ran = Arc::new(AtomicUsize::new(0));
    let started = Arc::new(Semaphore::new(0));
    let target = {
        let ran = Arc::clone(&ran);
        let started = Arc::clone(&started);
        thread::clone(
            move || {
                let local_hits = AtomicUsize::new(0);
                with_cleanup(
                    || {
                        local_hits.fetch_add(1, Ordering::SeqCst);
                        ran.fetch_add(local_hits.load(Ordering::SeqCst), Ordering::SeqCst);
                    },
                    || {
                        started.post().unwrap();
                        clock::sleep(Duration::from_secs(30));
                    },
                );
            },
            Priority::LOW,
        )
        .unwrap()
    };
    started.wait();
    target.cancel();
    assert_eq!(target.join(), None);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

static TLS_DESTROYED: AtomicUsize = AtomicUsize::new(0);

fn count_tls(_value: usize) {
    TLS_DESTROYED.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn cancelled_threads_still_sweep_tls() {
    let key = tls::create(Some(count_tls)).unwrap();
    let started = Arc::new(Semaphore::new(0));
    let target = {
        let started = Arc::clone(&started);
        thread::clone(
            move || {
                tls::set(key, 99).unwrap();
                started.post().unwrap();
                clock::sleep(Duration::from_secs(30));
            },
            Priority::LOW,
        )
        .unwrap()
    };
    started.wait();
    target.cancel();
    assert_eq!(target.join(), None);
    assert_eq!(TLS_DESTROYED.load(Ordering::SeqCst), 1);
    tls::delete(key);
}

#[test]
fn cancel_state_calls_survive_thread_local_teardown() {
    static CALLS_DONE: AtomicBool = AtomicBool::new(false);

    struct LateUser;

    impl Drop for LateUser {
        fn drop(&mut self) {
            // Destroyed after the cancellation thread-locals of this thread.
            let state = cancel::save_cancel();
            let depth = with_cleanup(|| {}, cancel::cleanup_depth);
            cancel::restore_cancel(state);
            assert!(depth <= 1);
            CALLS_DONE.store(true, Ordering::SeqCst);
        }
    }

    thread_local! {
        static LATE_USER: LateUser = const { LateUser };
    }

    std::thread::spawn(|| {
        LATE_USER.with(|_| {});
        let _ = cancel::cleanup_depth();
    })
    .join()
    .unwrap();
    assert!(CALLS_DONE.load(Ordering::SeqCst));
}
