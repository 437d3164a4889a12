use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use frankenthread_core::error::{Resource, ThreadError};
use frankenthread_core::thread::{self, Priority};
use frankenthread_core::tls::{self, KEYS_MAX, Key};
use parking_lot::Mutex;

static CHAIN_KEYS: Mutex<Vec<Key>> = parking_lot::const_mutex(Vec::new());
static CHAIN_CALLS: AtomicUsize = AtomicUsize::new(0);

/// Serializes tests that depend on how many keys are live.
static EXHAUST_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Destroying the value of key `n` stores a value under key `n + 1`, so the
/// sweep has to rescan after every call.
fn chain_destructor(value: usize) {
    CHAIN_CALLS.fetch_add(1, Ordering::SeqCst);
    let next = CHAIN_KEYS.lock().get(value + 1).copied();
    if let Some(next) = next {
        tls::set(next, value + 1).unwrap();
    }
}

#[test]
fn sweep_restarts_until_a_clean_pass() {
    const DEPTH: usize = 5;
    let _serial = EXHAUST_LOCK.lock();
    // Index i of CHAIN_KEYS is the key that receives value i; value 0 is null,
    // so the chain starts at 1.
    let keys: Vec<Key> = (0..=DEPTH)
        .map(|_| tls::create(Some(chain_destructor)).unwrap())
        .collect();
    *CHAIN_KEYS.lock() = keys.clone();

    let first = keys[1];
    thread::clone(move || tls::set(first, 1).unwrap(), Priority::LOW)
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(CHAIN_CALLS.load(Ordering::SeqCst), DEPTH);
    for key in keys {
        tls::delete(key);
    }
}

#[test]
fn key_creation_is_bounded() {
    let _serial = EXHAUST_LOCK.lock();
    let mut created = Vec::new();
    let err = loop {
        match tls::create(None) {
            Ok(key) => created.push(key),
            Err(err) => break err,
        }
        assert!(created.len() <= KEYS_MAX, "created more than KEYS_MAX keys");
    };
    assert!(matches!(
        err,
        ThreadError::ResourceExhausted(Resource::TlsKeys)
    ));
    assert_eq!(tls::live_keys(), KEYS_MAX);

    let freed = created.pop().unwrap();
    tls::delete(freed);
    let again = tls::create(None).unwrap();
    assert_eq!(again.index(), freed.index());
    assert_ne!(again, freed);
    created.push(again);

    for key in created {
        tls::delete(key);
    }
}

#[test]
fn values_are_per_thread() {
    let _serial = EXHAUST_LOCK.lock();
    let key = tls::create(None).unwrap();
    tls::set(key, 1).unwrap();
    let seen = Arc::new(AtomicUsize::new(usize::MAX));
    let probe = Arc::clone(&seen);
    thread::clone(
        move || {
            probe.store(tls::get(key), Ordering::SeqCst);
            tls::set(key, 2).unwrap();
            assert_eq!(tls::get(key), 2);
        },
        Priority::LOW,
    )
    .unwrap()
    .join()
    .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 0);
    assert_eq!(tls::get(key), 1);
    tls::delete(key);
}

#[test]
fn delete_never_runs_destructors() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    fn never(_value: usize) {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    let _serial = EXHAUST_LOCK.lock();
    let key = tls::create(Some(never)).unwrap();
    let done = thread::clone(
        move || {
            tls::set(key, 7).unwrap();
            tls::delete(key);
        },
        Priority::LOW,
    )
    .unwrap()
    .join();
    assert_eq!(done, Some(()));
    assert_eq!(CALLS.load(Ordering::SeqCst), 0);
}

#[test]
fn panicking_destructor_still_releases_joiner() {
    fn failing(_value: usize) {
        panic!("destructor failed");
    }

    let _serial = EXHAUST_LOCK.lock();
    let key = tls::create(Some(failing)).unwrap();
    let target = thread::clone(move || tls::set(key, 1).unwrap(), Priority::LOW).unwrap();

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let joined = panic::catch_unwind(AssertUnwindSafe(|| target.join()));
        let message = joined
            .err()
            .and_then(|payload| payload.downcast_ref::<&str>().map(|text| text.to_string()));
        let _ = tx.send(message);
    });

    let message = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("join blocked after the destructor panicked");
    assert_eq!(message.as_deref(), Some("destructor failed"));
    tls::delete(key);
}
