//! The boundary to the replicated key-value platform holding lease records.
//!
//! A [`LeaseStore`] keeps one [`SequencerRecord`] per sequencer name and
//! exposes a linearizable read-modify-write per name. [`InMemoryLeaseStore`]
//! is a single-process implementation that replicates every committed record
//! to the requested number of backup maps.

mod memory;

use std::sync::Weak;

pub use memory::*;

use crate::{LesseeId, Result, SequencerRecord};

/// A mutation applied to the record stored under one sequencer name.
///
/// `None` means no record exists. Setting the value to `None` removes the
/// record. Returning `Err` aborts the mutation and nothing is committed.
pub type Mutation<'a> = dyn FnMut(&mut Option<SequencerRecord>) -> Result<()> + 'a;

/// Receives lease changes committed by a [`LeaseStore`].
///
/// Observers run while the store still holds the mutation point for the
/// affected name, so a revoked holder is notified before its slot can be
/// handed to anyone else. They must not call back into the store.
pub trait LeaseObserver: Send + Sync {
    /// `lessee` no longer holds `logical_node_id` in sequencer `name`.
    fn on_released(&self, name: &str, logical_node_id: u32, lessee: LesseeId);

    /// Sequencer `name` and all its leases were removed.
    fn on_destroyed(&self, name: &str);
}

/// A linearizable, replicated store of sequencer records keyed by name.
pub trait LeaseStore: Send + Sync {
    /// How many backup copies this store can keep for a record.
    fn backup_capacity(&self) -> u16;

    /// Reads the committed record for `name`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Storage`] if the backend fails.
    fn get(&self, name: &str) -> Result<Option<SequencerRecord>>;

    /// Names of all existing sequencers.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Storage`] if the backend fails.
    fn names(&self) -> Result<Vec<String>>;

    /// Atomically applies `mutation` to the record under `name`.
    ///
    /// Mutations on the same name are totally ordered. On success the new
    /// record is committed to the primary and to as many backups as its
    /// definition asks for before this call returns.
    ///
    /// # Errors
    ///
    /// Whatever `mutation` returns, or [`crate::Error::Storage`].
    fn update(&self, name: &str, mutation: &mut Mutation<'_>) -> Result<()>;

    /// Registers an observer. Dropped observers are pruned lazily.
    fn register_observer(&self, observer: Weak<dyn LeaseObserver>);
}

/// Tells `observers` what changed between `before` and `after`.
///
/// Backends call this after committing a mutation and before releasing the
/// name's mutation point.
pub fn notify_observers(
    observers: &[Weak<dyn LeaseObserver>],
    name: &str,
    before: Option<&SequencerRecord>,
    after: Option<&SequencerRecord>,
) {
    match (before, after) {
        (Some(_), None) => {
            for observer in observers.iter().filter_map(Weak::upgrade) {
                observer.on_destroyed(name);
            }
        }
        (Some(before), Some(after)) => {
            for (logical_node_id, lessee) in before.revocations(after) {
                for observer in observers.iter().filter_map(Weak::upgrade) {
                    observer.on_released(name, logical_node_id, lessee);
                }
            }
        }
        (None, _) => {}
    }
}
