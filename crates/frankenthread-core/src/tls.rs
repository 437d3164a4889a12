//! Thread-specific storage keys.
//!
//! ## Design
//!
//! - **Key registry**: up to [`KEYS_MAX`] slots behind one process-wide
//!   lock. Each slot carries a generation that changes on delete, so a key
//!   handle from before a delete never matches a later key in the same slot.
//! - **Per-thread values**: a thread-local vector indexed by slot, each
//!   entry tagged with the generation it was stored under. Values are
//!   opaque machine words; `0` means "no value".
//! - **Exit sweep**: for every entry whose key is still live and has a
//!   destructor, clear the entry, call the destructor, and restart the
//!   scan (the destructor may have set other keys). The sweep ends after a
//!   full pass that calls nothing. Runtime threads sweep explicitly from
//!   their trampoline; other threads sweep when std tears down the
//!   thread-local.

use std::cell::RefCell;

use parking_lot::{Mutex, const_mutex};

use crate::error::{Resource, Result, ThreadError};

/// Maximum number of live keys.
pub const KEYS_MAX: usize = 1024;

/// Called at thread exit with the non-null value the thread stored.
pub type Destructor = fn(usize);

/// Handle to a thread-specific storage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    #[must_use]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

// ---------------------------------------------------------------------------
// Global key registry
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct KeySlot {
    generation: u32,
    live: bool,
    destructor: Option<Destructor>,
}

struct KeyRegistry {
    slots: Vec<KeySlot>,
}

impl KeyRegistry {
    fn live_slot(&self, index: usize, generation: u32) -> Option<&KeySlot> {
        self.slots
            .get(index)
            .filter(|slot| slot.live && slot.generation == generation)
    }
}

static REGISTRY: Mutex<KeyRegistry> = const_mutex(KeyRegistry { slots: Vec::new() });

fn next_generation(generation: u32) -> u32 {
    // Generation 0 marks an empty per-thread entry.
    generation.checked_add(1).unwrap_or(1)
}

/// Allocate a key. Fails once [`KEYS_MAX`] keys are live.
pub fn create(destructor: Option<Destructor>) -> Result<Key> {
    let mut registry = REGISTRY.lock();
    if let Some(index) = registry.slots.iter().position(|slot| !slot.live) {
        let slot = &mut registry.slots[index];
        slot.live = true;
        slot.destructor = destructor;
        return Ok(Key {
            index: index as u32,
            generation: slot.generation,
        });
    }
    if registry.slots.len() >= KEYS_MAX {
        return Err(ThreadError::ResourceExhausted(Resource::TlsKeys));
    }
    registry.slots.push(KeySlot {
        generation: 1,
        live: true,
        destructor,
    });
    Ok(Key {
        index: (registry.slots.len() - 1) as u32,
        generation: 1,
    })
}

/// Release `key`. Never runs destructors; values stored under it become
/// unreachable on every thread.
pub fn delete(key: Key) {
    let mut registry = REGISTRY.lock();
    match registry.slots.get_mut(key.index()) {
        Some(slot) if slot.live && slot.generation == key.generation => {
            slot.live = false;
            slot.destructor = None;
            slot.generation = next_generation(slot.generation);
        }
        _ => log::debug!("tls delete of stale key {key:?} ignored"),
    }
}

/// Number of live keys.
#[must_use]
pub fn live_keys() -> usize {
    REGISTRY.lock().slots.iter().filter(|slot| slot.live).count()
}

// ---------------------------------------------------------------------------
// Per-thread values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    generation: u32,
    value: usize,
}

struct ThreadValues {
    entries: RefCell<Vec<Entry>>,
}

impl Drop for ThreadValues {
    fn drop(&mut self) {
        sweep(&self.entries);
    }
}

thread_local! {
    static VALUES: ThreadValues = const {
        ThreadValues {
            entries: RefCell::new(Vec::new()),
        }
    };
}

/// The calling thread's value for `key`, or `0` if none was stored or the
/// key has been deleted.
#[must_use]
pub fn get(key: Key) -> usize {
    if !is_live(key) {
        return 0;
    }
    VALUES
        .try_with(|values| {
            values
                .entries
                .borrow()
                .get(key.index())
                .filter(|entry| entry.generation == key.generation)
                .map_or(0, |entry| entry.value)
        })
        .unwrap_or(0)
}

fn is_live(key: Key) -> bool {
    REGISTRY
        .lock()
        .live_slot(key.index(), key.generation)
        .is_some()
}

/// Store `value` for `key` on the calling thread.
pub fn set(key: Key, value: usize) -> Result<()> {
    if !is_live(key) {
        return Err(ThreadError::StaleKey);
    }
    let stored = VALUES.try_with(|values| {
        let mut entries = values.entries.borrow_mut();
        if entries.len() <= key.index() {
            entries.resize(key.index() + 1, Entry::default());
        }
        entries[key.index()] = Entry {
            generation: key.generation,
            value,
        };
    });
    if stored.is_err() {
        log::debug!("tls set on key {key:?} during thread teardown dropped");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Exit sweep
// ---------------------------------------------------------------------------

/// Clear entries until one needs a destructor; return it with its value.
fn next_pending(entries: &mut [Entry], registry: &KeyRegistry) -> Option<(Destructor, usize)> {
    for (index, entry) in entries.iter_mut().enumerate() {
        if entry.value == 0 {
            continue;
        }
        let destructor = registry
            .live_slot(index, entry.generation)
            .and_then(|slot| slot.destructor);
        let value = std::mem::take(&mut entry.value);
        if let Some(destructor) = destructor {
            return Some((destructor, value));
        }
    }
    None
}

fn sweep(entries: &RefCell<Vec<Entry>>) -> usize {
    let mut calls = 0;
    loop {
        let pending = {
            let registry = REGISTRY.lock();
            next_pending(&mut entries.borrow_mut(), &registry)
        };
        match pending {
            Some((destructor, value)) => {
                destructor(value);
                calls += 1;
            }
            None => return calls,
        }
    }
}

/// Run the exit sweep for the calling thread now. Returns the number of
/// destructor calls.
pub(crate) fn sweep_current_thread() -> usize {
    VALUES.try_with(|values| sweep(&values.entries)).unwrap_or(0)
}
