//! Scenario catalog.
//!
//! Each scenario drives one runtime primitive through a small concurrent
//! workload and checks a behavioral property of it: mutual exclusion,
//! bounded admission, cleanup ordering on cancellation, clock monotonicity,
//! and so on. Scenarios are plain functions so the runner can isolate them
//! with `catch_unwind`.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use frankenthread_core::cancel::{self, cleanup_push};
use frankenthread_core::clock::{self, TICKS_PER_MS, Tick};
use frankenthread_core::sync::{
    Condvar, Mutex, Once, RwLock, Semaphore, StaticMutex, TryLock, mutex_counters,
};
use frankenthread_core::thread::{self, Priority, Thread};
use frankenthread_core::tls;
use serde::Serialize;
use serde_json::json;

use crate::structured_log::Primitive;

/// Iteration count used when the caller does not pick one.
pub const DEFAULT_ITERATIONS: u32 = 1_000;

/// Knobs shared by every scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioConfig {
    /// Per-thread repetitions for scenarios with a tunable workload.
    pub iterations: u32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// What a passing scenario measured.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub threads: u32,
    pub iterations: u32,
    /// Mean cost of one operation, when the scenario times one.
    pub latency_ns: Option<u64>,
    pub details: serde_json::Value,
}

impl Measurement {
    fn new(threads: u32, iterations: u32) -> Self {
        Self {
            threads,
            iterations,
            latency_ns: None,
            details: serde_json::Value::Null,
        }
    }

    fn with_latency(mut self, elapsed: Duration, ops: u64) -> Self {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.latency_ns = Some(nanos / ops.max(1));
        self
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// A violated property.
#[derive(Debug, Clone)]
pub struct Failure {
    pub message: String,
    pub details: serde_json::Value,
}

impl Failure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }
}

pub type Check = Result<Measurement, Failure>;

/// One entry of the catalog.
pub struct Scenario {
    pub name: &'static str,
    pub primitive: Primitive,
    pub summary: &'static str,
    run: fn(&ScenarioConfig) -> Check,
}

impl Scenario {
    pub fn run(&self, config: &ScenarioConfig) -> Check {
        (self.run)(config)
    }
}

impl Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("primitive", &self.primitive)
            .finish_non_exhaustive()
    }
}

static CATALOG: [Scenario; 14] = [
    Scenario {
        name: "mutex_exclusion",
        primitive: Primitive::Mutex,
        summary: "N threads x K locked increments yield exactly N*K",
        run: mutex_exclusion,
    },
    Scenario {
        name: "mutex_try_lock_busy",
        primitive: Primitive::Mutex,
        summary: "try_lock reports Busy while another thread holds the mutex",
        run: mutex_try_lock_busy,
    },
    Scenario {
        name: "recursive_mutex_depth",
        primitive: Primitive::Mutex,
        summary: "recursive mutex stays held until every lock is unlocked",
        run: recursive_mutex_depth,
    },
    Scenario {
        name: "static_mutex_exclusion",
        primitive: Primitive::Mutex,
        summary: "statically initialized mutex excludes like a regular one",
        run: static_mutex_exclusion,
    },
    Scenario {
        name: "condvar_bounded_queue",
        primitive: Primitive::Condvar,
        summary: "producer/consumer over a bounded queue loses and overlaps nothing",
        run: condvar_bounded_queue,
    },
    Scenario {
        name: "semaphore_admission",
        primitive: Primitive::Semaphore,
        summary: "a semaphore of value V never admits more than V holders",
        run: semaphore_admission,
    },
    Scenario {
        name: "rwlock_nested_read",
        primitive: Primitive::Rwlock,
        summary: "nested read locks succeed while a writer is waiting",
        run: rwlock_nested_read,
    },
    Scenario {
        name: "tls_destructors",
        primitive: Primitive::Tls,
        summary: "every thread's value is destroyed exactly once at exit",
        run: tls_destructors,
    },
    Scenario {
        name: "cancel_cleanup_order",
        primitive: Primitive::Cancel,
        summary: "cancelled thread runs its cleanup records newest first",
        run: cancel_cleanup_order,
    },
    Scenario {
        name: "cancel_deferred_while_disabled",
        primitive: Primitive::Cancel,
        summary: "cancellation waits until the thread re-enables it",
        run: cancel_deferred_while_disabled,
    },
    Scenario {
        name: "once_single_init",
        primitive: Primitive::Once,
        summary: "racing call_once runs the initializer exactly once",
        run: once_single_init,
    },
    Scenario {
        name: "thread_join_value",
        primitive: Primitive::Thread,
        summary: "join returns the entry's value and ids are distinct",
        run: thread_join_value,
    },
    Scenario {
        name: "clock_monotonic",
        primitive: Primitive::Clock,
        summary: "successive clock reads never decrease",
        run: clock_monotonic,
    },
    Scenario {
        name: "wait_until_precision",
        primitive: Primitive::Clock,
        summary: "wait_until never returns earlier than one resolution before the deadline",
        run: wait_until_precision,
    },
];

/// Every scenario, in run order.
#[must_use]
pub fn catalog() -> &'static [Scenario] {
    &CATALOG
}

/// Look a scenario up by name.
#[must_use]
pub fn find(name: &str) -> Option<&'static Scenario> {
    CATALOG.iter().find(|scenario| scenario.name == name)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn spawn<T, F>(entry: F) -> Result<Thread<T>, Failure>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::clone(entry, Priority::LOW).map_err(|err| Failure::new(format!("spawn failed: {err}")))
}

fn join<T>(handle: Thread<T>, what: &str) -> Result<T, Failure> {
    handle
        .join()
        .ok_or_else(|| Failure::new(format!("{what} was cancelled unexpectedly")))
}

fn join_all<T>(handles: Vec<Thread<T>>, what: &str) -> Result<Vec<T>, Failure> {
    handles.into_iter().map(|h| join(h, what)).collect()
}

fn expect_eq<T>(what: &str, expected: T, actual: T) -> Result<(), Failure>
where
    T: PartialEq + Debug + Serialize,
{
    if expected == actual {
        return Ok(());
    }
    Err(Failure {
        message: format!("{what}: expected {expected:?}, got {actual:?}"),
        details: json!({ "expected": expected, "actual": actual }),
    })
}

fn expect(what: &str, holds: bool) -> Result<(), Failure> {
    if holds {
        Ok(())
    } else {
        Err(Failure::new(what))
    }
}

type Journal = Arc<std::sync::Mutex<Vec<&'static str>>>;

fn journal() -> Journal {
    Arc::new(std::sync::Mutex::new(Vec::new()))
}

fn record(journal: &Journal, event: &'static str) -> impl FnOnce() + Send + 'static {
    let journal = Arc::clone(journal);
    move || {
        journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

fn entries(journal: &Journal) -> Vec<&'static str> {
    journal.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

const WORKERS: u32 = 4;

fn mutex_exclusion(config: &ScenarioConfig) -> Check {
    let rounds = config.iterations;
    let shared = Arc::new((Mutex::new_fast(), AtomicU64::new(0)));
    let before = mutex_counters();
    let start = Instant::now();

    let workers = (0..WORKERS)
        .map(|_| {
            let shared = Arc::clone(&shared);
            spawn(move || {
                let (lock, count) = &*shared;
                for _ in 0..rounds {
                    lock.lock();
                    // Split read/write: only exclusion keeps increments from being lost.
                    let seen = count.load(Ordering::Relaxed);
                    count.store(seen + 1, Ordering::Relaxed);
                    lock.unlock();
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    join_all(workers, "mutex worker")?;

    let elapsed = start.elapsed();
    let after = mutex_counters();
    let expected = u64::from(WORKERS) * u64::from(rounds);
    expect_eq("counter", expected, shared.1.load(Ordering::SeqCst))?;

    Ok(Measurement::new(WORKERS, rounds)
        .with_latency(elapsed, expected)
        .with_details(json!({
            "spins": after.spins.saturating_sub(before.spins),
            "waits": after.waits.saturating_sub(before.waits),
            "wakes": after.wakes.saturating_sub(before.wakes),
        })))
}

fn try_lock_elsewhere(lock: &Arc<Mutex>) -> Result<TryLock, Failure> {
    let lock = Arc::clone(lock);
    let probe = spawn(move || {
        let outcome = lock.try_lock();
        if outcome == TryLock::Locked {
            lock.unlock();
        }
        outcome
    })?;
    join(probe, "try_lock probe")
}

fn mutex_try_lock_busy(_config: &ScenarioConfig) -> Check {
    let lock = Arc::new(Mutex::new_fast());

    lock.lock();
    let held = try_lock_elsewhere(&lock)?;
    lock.unlock();
    expect("try_lock while held reports Busy", held == TryLock::Busy)?;

    let free = try_lock_elsewhere(&lock)?;
    expect("try_lock while free succeeds", free == TryLock::Locked)?;
    expect("mutex left unlocked", !lock.is_locked())?;

    Ok(Measurement::new(2, 1))
}

fn recursive_mutex_depth(_config: &ScenarioConfig) -> Check {
    const DEPTH: u32 = 3;
    let lock = Arc::new(Mutex::new_recursive());

    for _ in 0..DEPTH {
        lock.lock();
    }
    let mut probes = Vec::new();
    for _ in 0..DEPTH {
        probes.push(format!("{:?}", try_lock_elsewhere(&lock)?));
        lock.unlock();
    }
    expect_eq("probes while held", vec!["Busy".to_string(); DEPTH as usize], probes)?;
    expect("released after matching unlocks", !lock.is_locked())?;

    let free = try_lock_elsewhere(&lock)?;
    expect("try_lock after release succeeds", free == TryLock::Locked)?;

    Ok(Measurement::new(2, DEPTH).with_details(json!({ "depth": DEPTH })))
}

fn static_mutex_exclusion(config: &ScenarioConfig) -> Check {
    let rounds = config.iterations;
    let shared = Arc::new((StaticMutex::new(), AtomicU64::new(0)));
    let start = Instant::now();

    let workers = (0..WORKERS)
        .map(|_| {
            let shared = Arc::clone(&shared);
            spawn(move || {
                let (lock, count) = &*shared;
                for _ in 0..rounds {
                    lock.lock();
                    let seen = count.load(Ordering::Relaxed);
                    count.store(seen + 1, Ordering::Relaxed);
                    lock.unlock();
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    join_all(workers, "static mutex worker")?;

    let elapsed = start.elapsed();
    let expected = u64::from(WORKERS) * u64::from(rounds);
    expect_eq("counter", expected, shared.1.load(Ordering::SeqCst))?;
    expect_eq("contention after run", 0, shared.0.contention())?;

    Ok(Measurement::new(WORKERS, rounds).with_latency(elapsed, expected))
}

// ---------------------------------------------------------------------------
// Condition variable
// ---------------------------------------------------------------------------

const QUEUE_CAPACITY: usize = 4;

struct BoundedQueue {
    lock: Mutex,
    not_empty: Condvar,
    not_full: Condvar,
    items: std::sync::Mutex<VecDeque<u64>>,
    overlaps: AtomicU32,
}

impl BoundedQueue {
    fn new() -> Self {
        Self {
            lock: Mutex::new_fast(),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            items: std::sync::Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
            overlaps: AtomicU32::new(0),
        }
    }

    /// Touch the items. `lock` must be held; a contended inner lock means
    /// two threads got past it at once.
    fn with_items<R>(&self, f: impl FnOnce(&mut VecDeque<u64>) -> R) -> R {
        if let Ok(mut items) = self.items.try_lock() {
            return f(&mut items);
        }
        self.overlaps.fetch_add(1, Ordering::Relaxed);
        f(&mut self.items.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn push(&self, item: u64) {
        self.lock.lock();
        while self.with_items(|items| items.len()) >= QUEUE_CAPACITY {
            self.not_full.wait(&self.lock);
        }
        self.with_items(|items| items.push_back(item));
        self.not_empty.signal();
        self.lock.unlock();
    }

    fn pop(&self) -> u64 {
        self.lock.lock();
        let item = loop {
            if let Some(item) = self.with_items(VecDeque::pop_front) {
                break item;
            }
            self.not_empty.wait(&self.lock);
        };
        self.not_full.signal();
        self.lock.unlock();
        item
    }
}

fn condvar_bounded_queue(config: &ScenarioConfig) -> Check {
    let items = u64::from(config.iterations);
    let queue = Arc::new(BoundedQueue::new());
    let start = Instant::now();

    let producer = {
        let queue = Arc::clone(&queue);
        spawn(move || (1..=items).for_each(|item| queue.push(item)))?
    };
    let consumer = {
        let queue = Arc::clone(&queue);
        spawn(move || (0..items).map(|_| queue.pop()).sum::<u64>())?
    };
    join(producer, "producer")?;
    let sum = join(consumer, "consumer")?;
    let elapsed = start.elapsed();

    expect_eq("sum of consumed items", items * (items + 1) / 2, sum)?;
    expect_eq("overlapping critical sections", 0, queue.overlaps.load(Ordering::SeqCst))?;

    Ok(Measurement::new(2, config.iterations)
        .with_latency(elapsed, items)
        .with_details(json!({ "capacity": QUEUE_CAPACITY })))
}

// ---------------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------------

fn semaphore_admission(config: &ScenarioConfig) -> Check {
    const PERMITS: u32 = 3;
    const CONTENDERS: u32 = 8;
    let rounds = config.iterations.min(200);
    let sem = Arc::new(Semaphore::new(PERMITS));
    let active = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));
    let overflows = Arc::new(AtomicU32::new(0));

    let workers = (0..CONTENDERS)
        .map(|_| {
            let sem = Arc::clone(&sem);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let overflows = Arc::clone(&overflows);
            spawn(move || {
                for _ in 0..rounds {
                    sem.wait();
                    let holders = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(holders, Ordering::SeqCst);
                    std::thread::yield_now();
                    active.fetch_sub(1, Ordering::SeqCst);
                    if sem.post().is_err() {
                        overflows.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    join_all(workers, "semaphore contender")?;

    let peak = peak.load(Ordering::SeqCst);
    expect("peak holders within permits", peak <= PERMITS)?;
    expect_eq("overflowing posts", 0, overflows.load(Ordering::SeqCst))?;
    expect_eq("value after balanced waits and posts", PERMITS, sem.value())?;

    Ok(Measurement::new(CONTENDERS, rounds)
        .with_details(json!({ "permits": PERMITS, "peak_holders": peak })))
}

// ---------------------------------------------------------------------------
// Read/write lock
// ---------------------------------------------------------------------------

fn rwlock_nested_read(_config: &ScenarioConfig) -> Check {
    let lock = Arc::new(RwLock::new());
    let wrote = Arc::new(AtomicBool::new(false));

    lock.read_lock();
    let writer = {
        let lock = Arc::clone(&lock);
        let wrote = Arc::clone(&wrote);
        spawn(move || {
            lock.write_lock();
            wrote.store(true, Ordering::SeqCst);
            lock.unlock();
        })?
    };
    std::thread::sleep(Duration::from_millis(20));

    lock.read_lock();
    let nested = lock.readers();
    let early_write = wrote.load(Ordering::SeqCst);
    lock.unlock();
    lock.unlock();
    join(writer, "writer")?;

    expect_eq("readers while nested", Some(2), nested)?;
    expect("writer excluded while reads are held", !early_write)?;
    expect("writer ran after reads released", wrote.load(Ordering::SeqCst))?;
    expect_eq("readers after release", Some(0), lock.readers())?;

    Ok(Measurement::new(2, 1))
}

// ---------------------------------------------------------------------------
// Thread-specific storage
// ---------------------------------------------------------------------------

static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);
static DESTROYED: std::sync::Mutex<Vec<usize>> = std::sync::Mutex::new(Vec::new());

fn note_destroyed(value: usize) {
    DESTROYED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(value);
}

fn tls_destructors(_config: &ScenarioConfig) -> Check {
    let key = tls::create(Some(note_destroyed))
        .map_err(|err| Failure::new(format!("tls key creation failed: {err}")))?;

    let workers = (0..WORKERS)
        .map(|_| {
            spawn(move || {
                let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
                tls::set(key, token).map(|()| token).ok()
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let tokens = join_all(workers, "tls worker")?;
    let main_value = tls::get(key);
    tls::delete(key);

    let tokens: Vec<usize> = tokens.into_iter().flatten().collect();
    expect_eq("values stored", WORKERS as usize, tokens.len())?;
    let destroyed = DESTROYED.lock().unwrap_or_else(PoisonError::into_inner).clone();
    let counts: Vec<usize> = tokens
        .iter()
        .map(|token| destroyed.iter().filter(|seen| *seen == token).count())
        .collect();
    expect_eq("destructor runs per value", vec![1; WORKERS as usize], counts)?;
    expect_eq("value seen by a thread that never set one", 0, main_value)?;

    Ok(Measurement::new(WORKERS, 1).with_details(json!({ "key_index": key.index() })))
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

fn cancel_cleanup_order(_config: &ScenarioConfig) -> Check {
    let journal = journal();
    let started = Arc::new(Semaphore::new(0));
    let gate = Arc::new(Semaphore::new(0));

    let target = {
        let journal = Arc::clone(&journal);
        let started = Arc::clone(&started);
        let gate = Arc::clone(&gate);
        spawn(move || {
            cleanup_push(record(&journal, "first"));
            cleanup_push(record(&journal, "second"));
            cleanup_push(record(&journal, "third"));
            let _ = started.post();
            gate.wait();
            record(&journal, "returned")();
        })?
    };

    started.wait();
    std::thread::sleep(Duration::from_millis(10));
    target.cancel();
    let joined = target.join();

    expect("join of a cancelled thread yields nothing", joined.is_none())?;
    expect_eq("cleanup order", vec!["third", "second", "first"], entries(&journal))?;
    Ok(Measurement::new(1, 1))
}

fn cancel_deferred_while_disabled(_config: &ScenarioConfig) -> Check {
    let journal = journal();
    let started = Arc::new(Semaphore::new(0));
    let gate = Arc::new(Semaphore::new(0));

    let target = {
        let journal = Arc::clone(&journal);
        let started = Arc::clone(&started);
        let gate = Arc::clone(&gate);
        spawn(move || {
            cleanup_push(record(&journal, "cleanup"));
            let prior = cancel::save_cancel();
            let _ = started.post();
            gate.wait();
            record(&journal, "ran while disabled")();
            cancel::restore_cancel(prior);
            cancel::test_cancel();
            record(&journal, "survived")();
        })?
    };

    started.wait();
    target.cancel();
    std::thread::sleep(Duration::from_millis(20));
    let finished_early = target.is_finished();
    let _ = gate.post();
    let joined = target.join();

    expect("thread kept running while cancellation was disabled", !finished_early)?;
    expect("join of a cancelled thread yields nothing", joined.is_none())?;
    expect_eq(
        "event order",
        vec!["ran while disabled", "cleanup"],
        entries(&journal),
    )?;
    Ok(Measurement::new(1, 1))
}

// ---------------------------------------------------------------------------
// Once / threads
// ---------------------------------------------------------------------------

fn once_single_init(_config: &ScenarioConfig) -> Check {
    const RACERS: u32 = 8;
    let shared = Arc::new((Once::new(), AtomicU32::new(0)));

    let racers = (0..RACERS)
        .map(|_| {
            let shared = Arc::clone(&shared);
            spawn(move || {
                let (once, runs) = &*shared;
                once.call_once(|| {
                    runs.fetch_add(1, Ordering::SeqCst);
                });
                once.is_completed()
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let completed = join_all(racers, "once racer")?;

    expect_eq("initializer runs", 1, shared.1.load(Ordering::SeqCst))?;
    expect("every racer saw completion", completed.iter().all(|done| *done))?;
    Ok(Measurement::new(RACERS, 1))
}

fn thread_join_value(_config: &ScenarioConfig) -> Check {
    let outside = thread::is_runtime_thread();
    let caller_id = thread::current_id();
    let child = spawn(|| (thread::current_id(), thread::is_runtime_thread(), 42_u32))?;
    let child_id = child.id();
    let (seen_id, inside, value) = join(child, "child")?;

    expect_eq("joined value", 42, value)?;
    expect_eq("id seen by the child", child_id, seen_id)?;
    expect("child id differs from caller", child_id != caller_id)?;
    expect("child is a runtime thread", inside)?;
    expect("harness thread is not a runtime thread", !outside)?;
    Ok(Measurement::new(1, 1))
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

fn clock_monotonic(config: &ScenarioConfig) -> Check {
    let samples = config.iterations.max(2);
    let mut previous = clock::now();
    let mut regressions = 0_u32;
    let mut largest_step: Tick = 0;
    let start = Instant::now();
    for _ in 1..samples {
        let current = clock::now();
        if current < previous {
            regressions += 1;
        }
        largest_step = largest_step.max(current - previous);
        previous = current;
    }
    let elapsed = start.elapsed();

    // The wall clock may be stepped by the host.
    if clock::source().is_monotonic() {
        expect_eq("backward steps", 0, regressions)?;
    }
    Ok(Measurement::new(1, samples)
        .with_latency(elapsed, u64::from(samples))
        .with_details(json!({
            "source": clock::source().name(),
            "resolution_us": clock::resolution(),
            "largest_step_us": largest_step,
            "backward_steps": regressions,
        })))
}

fn wait_until_precision(config: &ScenarioConfig) -> Check {
    const LEAD: Tick = 2 * TICKS_PER_MS;
    let rounds = config.iterations.clamp(1, 20);
    let resolution = clock::resolution();
    let mut earliest: Tick = Tick::MAX;
    let mut latest: Tick = Tick::MIN;
    let mut total_late: Tick = 0;

    for _ in 0..rounds {
        let deadline = clock::now() + LEAD;
        clock::wait_until(deadline);
        let late = clock::now() - deadline;
        earliest = earliest.min(late);
        latest = latest.max(late);
        total_late += late.max(0);
    }

    let details = json!({
        "resolution_us": resolution,
        "earliest_us": earliest,
        "latest_us": latest,
    });
    if earliest < -resolution {
        return Err(Failure {
            message: format!(
                "woke {}us before the deadline, resolution is {resolution}us",
                -earliest
            ),
            details,
        });
    }

    let mean_late_ns = u64::try_from(total_late / Tick::from(rounds)).unwrap_or(0) * 1_000;
    let mut measurement = Measurement::new(1, rounds).with_details(details);
    measurement.latency_ns = Some(mean_late_ns);
    Ok(measurement)
}
