//! `Registry<T>`: the handle-based object table (spec §5).
//!
//! Every user-visible object in the core is addressed by a `Handle`
//! rather than a direct reference, so a caller can hold a stable
//! identifier across an `await` point without fighting the borrow
//! checker. `Registry::with` is the only legal way to mutate a record —
//! it acquires the per-object lock, runs the closure, and releases,
//! mirroring spec §5's `acquire(handle) -> &mut record` / `release`
//! pairing without exposing an unpaired acquire at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{CoreError, Result};

/// A stable identifier for an object registered with a [`Registry`].
/// The generation counter distinguishes a handle from a previous
/// incarnation that reused the same slot index, so a stale handle held
/// across a `destroy` is rejected rather than silently addressing a
/// different object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

struct Slot<T> {
    record: Option<Arc<RwLock<T>>>,
    generation: u32,
}

/// The handle table. `T` is the record type (e.g. a dispatcher session);
/// records are reached only through [`Registry::with`]/[`Registry::with_mut`].
pub struct Registry<T> {
    slots: RwLock<HashMap<u32, Slot<T>>>,
    next_index: AtomicU32,
}

impl<T> Registry<T> {
    /// An empty registry.
    pub fn new() -> Self {
        Self { slots: RwLock::new(HashMap::new()), next_index: AtomicU32::new(0) }
    }

    /// Register a new record, returning the handle that addresses it.
    pub fn insert(&self, value: T) -> Handle {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let mut slots = self.slots.write().expect("registry lock poisoned");
        let generation = slots.get(&index).map(|s| s.generation + 1).unwrap_or(0);
        slots.insert(index, Slot { record: Some(Arc::new(RwLock::new(value))), generation });
        Handle { index, generation }
    }

    /// Run `f` with read access to the record behind `handle`. Fails with
    /// `Signalled` if the handle's object has already been destroyed or
    /// the generation no longer matches (spec §5: "acquires on a
    /// destroyed object fail with `Signalled`").
    pub fn with<R>(&self, handle: Handle, f: impl FnOnce(&T) -> R) -> Result<R> {
        let arc = self.resolve(handle)?;
        let guard = arc.read().expect("record lock poisoned");
        Ok(f(&guard))
    }

    /// Run `f` with exclusive access to the record behind `handle`.
    pub fn with_mut<R>(&self, handle: Handle, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let arc = self.resolve(handle)?;
        let mut guard = arc.write().expect("record lock poisoned");
        Ok(f(&mut guard))
    }

    /// Destroy the object behind `handle`. Any handle sharing the same
    /// index (the same or an earlier generation) subsequently fails to
    /// resolve.
    pub fn destroy(&self, handle: Handle) -> Result<()> {
        let mut slots = self.slots.write().expect("registry lock poisoned");
        match slots.get_mut(&handle.index) {
            Some(slot) if slot.generation == handle.generation && slot.record.is_some() => {
                slot.record = None;
                Ok(())
            }
            _ => Err(CoreError::Signalled(format!(
                "handle {}/{} does not address a live object",
                handle.index, handle.generation
            ))),
        }
    }

    fn resolve(&self, handle: Handle) -> Result<Arc<RwLock<T>>> {
        let slots = self.slots.read().expect("registry lock poisoned");
        match slots.get(&handle.index) {
            Some(slot) if slot.generation == handle.generation => slot
                .record
                .clone()
                .ok_or_else(|| CoreError::Signalled(format!("handle {} was destroyed", handle.index))),
            _ => Err(CoreError::Signalled(format!(
                "handle {}/{} does not address a live object",
                handle.index, handle.generation
            ))),
        }
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_with_reads_the_stored_value() {
        let registry: Registry<u32> = Registry::new();
        let handle = registry.insert(42);
        let read = registry.with(handle, |v| *v).unwrap();
        assert_eq!(read, 42);
    }

    #[test]
    fn with_mut_mutates_in_place() {
        let registry: Registry<u32> = Registry::new();
        let handle = registry.insert(1);
        registry.with_mut(handle, |v| *v += 1).unwrap();
        assert_eq!(registry.with(handle, |v| *v).unwrap(), 2);
    }

    #[test]
    fn destroyed_handle_fails_with_signalled() {
        let registry: Registry<u32> = Registry::new();
        let handle = registry.insert(1);
        registry.destroy(handle).unwrap();
        let err = registry.with(handle, |v| *v);
        assert!(matches!(err, Err(CoreError::Signalled(_))));
    }

    #[test]
    fn double_destroy_is_rejected() {
        let registry: Registry<u32> = Registry::new();
        let first = registry.insert(1);
        registry.destroy(first).unwrap();
        // A second destroy attempt on the same (now-dead) handle is
        // rejected the same way a fresh resolve would be.
        assert!(registry.destroy(first).is_err());
    }
}
