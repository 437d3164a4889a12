use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use frankenthread_core::cancel::cleanup_push;
use frankenthread_core::sync::{RwLock, Semaphore};
use frankenthread_core::thread::{self, Priority};

#[test]
fn nested_reads_succeed_and_writer_waits_for_both_unlocks() {
    let lock = Arc::new(RwLock::new());
    let a_holds_two = Arc::new(Semaphore::new(0));
    let a_release_one = Arc::new(Semaphore::new(0));
    let a_release_two = Arc::new(Semaphore::new(0));
    let a_released_one = Arc::new(Semaphore::new(0));
    let writer_in = Arc::new(AtomicBool::new(false));

    let a = {
        let lock = Arc::clone(&lock);
        let holds = Arc::clone(&a_holds_two);
        let release_one = Arc::clone(&a_release_one);
        let released_one = Arc::clone(&a_released_one);
        let release_two = Arc::clone(&a_release_two);
        thread::clone(
            move || {
                lock.read_lock();
                lock.read_lock();
                holds.post().unwrap();
                release_one.wait();
                lock.unlock();
                released_one.post().unwrap();
                release_two.wait();
                lock.unlock();
            },
            Priority::LOW,
        )
        .unwrap()
    };

    a_holds_two.wait();
    let b = {
        let lock = Arc::clone(&lock);
        let writer_in = Arc::clone(&writer_in);
        thread::clone(
            move || {
                lock.write_lock();
                writer_in.store(true, Ordering::SeqCst);
                lock.unlock();
            },
            Priority::LOW,
        )
        .unwrap()
    };

    std::thread::sleep(Duration::from_millis(20));
    assert!(!writer_in.load(Ordering::SeqCst));

    a_release_one.post().unwrap();
    a_released_one.wait();
    std::thread::sleep(Duration::from_millis(20));
    assert!(!writer_in.load(Ordering::SeqCst), "writer entered with one read lock held");

    a_release_two.post().unwrap();
    a.join();
    b.join();
    assert!(writer_in.load(Ordering::SeqCst));
    assert_eq!(lock.readers(), Some(0));
}

#[test]
fn writers_are_exclusive() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 500;
    let lock = Arc::new(RwLock::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            thread::clone(
                move || {
                    for _ in 0..ROUNDS {
                        lock.write_lock();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.unlock();
                    }
                },
                Priority::LOW,
            )
            .unwrap()
        })
        .collect();
    for worker in workers {
        assert_eq!(worker.join(), Some(()));
    }
}

#[test]
fn contended_acquisition_is_a_cancellation_point() {
    let lock = Arc::new(RwLock::new());
    lock.write_lock();
    let cleaned = Arc::new(AtomicBool::new(false));
    let waiting = Arc::new(Semaphore::new(0));

    let reader = {
        let lock = Arc::clone(&lock);
        let cleaned = Arc::clone(&cleaned);
        let waiting = Arc::clone(&waiting);
        thread::clone(
            move || {
                cleanup_push(move || cleaned.store(true, Ordering::SeqCst));
                waiting.post().unwrap();
                lock.read_lock();
            },
            Priority::LOW,
        )
        .unwrap()
    };

    waiting.wait();
    std::thread::sleep(Duration::from_millis(20));
    reader.cancel();
    assert_eq!(reader.join(), None);
    assert!(cleaned.load(Ordering::SeqCst));

    // The cancelled reader left the lock consistent.
    lock.unlock();
    lock.write_lock();
    lock.unlock();
    assert_eq!(lock.readers(), Some(0));
}

#[test]
fn cleanup_of_cancelled_waiter_can_release_its_read_lock() {
    let lock = Arc::new(RwLock::new());
    let waiting = Arc::new(Semaphore::new(0));

    let upgrader = {
        let lock = Arc::clone(&lock);
        let waiting = Arc::clone(&waiting);
        thread::clone(
            move || {
                lock.read_lock();
                let held = Arc::clone(&lock);
                cleanup_push(move || held.unlock());
                waiting.post().unwrap();
                // Blocks on its own read lock until cancelled.
                lock.write_lock();
            },
            Priority::LOW,
        )
        .unwrap()
    };

    waiting.wait();
    std::thread::sleep(Duration::from_millis(20));
    upgrader.cancel();
    assert_eq!(upgrader.join(), None);
    assert_eq!(lock.readers(), Some(0));
    lock.write_lock();
    lock.unlock();
}
