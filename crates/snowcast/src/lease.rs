use std::sync::{Arc, Weak};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Error, Grant, Lease, LeaseObserver, LeaseStore, LesseeId, ReleaseOutcome, Result,
    SequencerDefinition, SequencerRecord,
};

/// The single authority that assigns and frees logical node ids.
///
/// Every operation is one read-modify-write on the [`LeaseStore`], so two
/// concurrent attaches can never observe the same free slot. `LeaseTable` is
/// cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct LeaseTable {
    store: Arc<dyn LeaseStore>,
}

impl LeaseTable {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LeaseStore> {
        &self.store
    }

    /// Backup copies the underlying store can keep per sequencer.
    pub fn backup_capacity(&self) -> u16 {
        self.store.backup_capacity()
    }

    /// Forwards lease changes on this table's store to `observer`.
    pub fn register_observer(&self, observer: Weak<dyn LeaseObserver>) {
        self.store.register_observer(observer);
    }

    fn check_replicas(&self, definition: &SequencerDefinition) -> Result<()> {
        let available = self.store.backup_capacity();
        if definition.backup_count() > available {
            return Err(Error::InsufficientReplicas {
                requested: definition.backup_count(),
                available,
            });
        }
        Ok(())
    }

    /// Creates the sequencer if needed and leases the lowest free logical
    /// node id to `lessee`, in one atomic step.
    ///
    /// Returns the stored definition, which carries the backup count of the
    /// first creator.
    ///
    /// # Errors
    ///
    /// - [`Error::InsufficientReplicas`] if the store keeps fewer backups
    ///   than requested
    /// - [`Error::ConfigurationConflict`] if the name exists with another
    ///   epoch or node count
    /// - [`Error::CapacityExhausted`] if every slot is attached
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, definition), fields(name = definition.name()))
    )]
    pub fn attach(
        &self,
        definition: &SequencerDefinition,
        lessee: LesseeId,
    ) -> Result<(SequencerDefinition, u32)> {
        self.check_replicas(definition)?;

        let mut attached = None;
        self.store.update(definition.name(), &mut |record| {
            let record = record.get_or_insert_with(|| SequencerRecord::new(definition.clone()));
            record.definition().ensure_compatible(definition)?;
            let logical_node_id = record.acquire(lessee)?;
            attached = Some((record.definition().clone(), logical_node_id));
            Ok(())
        })?;

        let (definition, logical_node_id) = attached.ok_or_else(|| {
            Error::Storage("store committed an attach without running it".to_owned())
        })?;
        #[cfg(feature = "tracing")]
        tracing::debug!(logical_node_id, %lessee, "attached");
        Ok((definition, logical_node_id))
    }

    /// Creates the sequencer if it does not exist and returns the stored
    /// definition.
    ///
    /// # Errors
    ///
    /// [`Error::InsufficientReplicas`] or [`Error::ConfigurationConflict`],
    /// as for [`Self::attach`].
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, definition), fields(name = definition.name()))
    )]
    pub fn create_or_get(&self, definition: &SequencerDefinition) -> Result<SequencerDefinition> {
        self.check_replicas(definition)?;

        let mut stored = None;
        self.store.update(definition.name(), &mut |record| {
            let record = record.get_or_insert_with(|| SequencerRecord::new(definition.clone()));
            record.definition().ensure_compatible(definition)?;
            stored = Some(record.definition().clone());
            Ok(())
        })?;
        stored.ok_or_else(|| Error::Storage("store committed a create without running it".to_owned()))
    }

    /// Leases the lowest free logical node id of an existing sequencer. The
    /// [`Grant`] tells whether the slot had an earlier lessee.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownSequencer`] if the sequencer does not exist
    /// - [`Error::ConfigurationConflict`] if it exists with another shape
    /// - [`Error::CapacityExhausted`] if every slot is attached
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, definition), fields(name = definition.name()))
    )]
    pub fn acquire(&self, definition: &SequencerDefinition, lessee: LesseeId) -> Result<Grant> {
        let mut acquired = None;
        self.store.update(definition.name(), &mut |record| {
            let Some(record) = record else {
                return Err(Error::UnknownSequencer(definition.name().to_owned()));
            };
            record.definition().ensure_compatible(definition)?;
            acquired = Some(record.grant(lessee)?);
            Ok(())
        })?;
        acquired.ok_or_else(|| Error::Storage("store committed an acquire without running it".to_owned()))
    }

    /// Detaches `logical_node_id` if `lessee` still holds it.
    ///
    /// Releasing a slot that was already released, reassigned, or belongs to
    /// a sequencer that no longer exists is a no-op reported as
    /// [`ReleaseOutcome::Stale`].
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] if the backend fails.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn release(
        &self,
        name: &str,
        logical_node_id: u32,
        lessee: LesseeId,
    ) -> Result<ReleaseOutcome> {
        let mut outcome = ReleaseOutcome::Stale;
        self.store.update(name, &mut |record| {
            outcome = match record {
                Some(record) => record.release(logical_node_id, lessee),
                None => ReleaseOutcome::Stale,
            };
            Ok(())
        })?;
        Ok(outcome)
    }

    /// Detaches every slot `lessee` holds in any sequencer and returns how
    /// many were released.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] if the backend fails. Sequencers processed before
    /// the failure stay released.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn on_lessee_disconnect(&self, lessee: LesseeId) -> Result<usize> {
        let mut total = 0;
        for name in self.store.names()? {
            let mut released = 0;
            self.store.update(&name, &mut |record| {
                released = record.as_mut().map_or(0, |record| record.release_all(lessee));
                Ok(())
            })?;
            total += released;
        }
        #[cfg(feature = "tracing")]
        tracing::info!(released = total, "lessee disconnected");
        Ok(total)
    }

    /// Removes the sequencer and all its leases. Returns `false` if it did
    /// not exist.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] if the backend fails.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn destroy(&self, name: &str) -> Result<bool> {
        let mut existed = false;
        self.store.update(name, &mut |record| {
            existed = record.take().is_some();
            Ok(())
        })?;
        Ok(existed)
    }

    /// The stored definition of `name`, if the sequencer exists.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] if the backend fails.
    pub fn definition(&self, name: &str) -> Result<Option<SequencerDefinition>> {
        Ok(self.store.get(name)?.map(|record| record.definition().clone()))
    }

    /// All attached and detached leases of `name`, ascending by id.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownSequencer`] if the sequencer does not exist.
    pub fn leases(&self, name: &str) -> Result<Vec<Lease>> {
        self.store
            .get(name)?
            .map(|record| record.leases())
            .ok_or_else(|| Error::UnknownSequencer(name.to_owned()))
    }

    /// Names of all existing sequencers.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] if the backend fails.
    pub fn names(&self) -> Result<Vec<String>> {
        self.store.names()
    }
}

impl core::fmt::Debug for LeaseTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LeaseTable")
            .field("backup_capacity", &self.store.backup_capacity())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            Barrier, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use super::*;
    use crate::{InMemoryLeaseStore, LeaseState, SnowcastEpoch};

    fn table(backups: u16) -> LeaseTable {
        LeaseTable::new(Arc::new(InMemoryLeaseStore::new(backups)))
    }

    fn definition(name: &str, epoch_ms: u64, count: u32) -> SequencerDefinition {
        SequencerDefinition::new(name, SnowcastEpoch::from_unix_millis(epoch_ms), count, 1).unwrap()
    }

    #[test]
    fn attach_creates_then_leases_ascending_ids() {
        let table = table(1);
        let def = definition("seq", 0, 128);
        let a = LesseeId::new(1);
        let b = LesseeId::new(2);

        assert_eq!(table.attach(&def, a).unwrap(), (def.clone(), 0));
        assert_eq!(table.attach(&def, b).unwrap().1, 1);
        assert_eq!(table.acquire(&def, a).unwrap().logical_node_id, 2);
        assert_eq!(table.definition("seq").unwrap(), Some(def));
    }

    #[test]
    fn first_creator_backup_count_wins() {
        let table = table(3);
        let first = SequencerDefinition::new("seq", SnowcastEpoch::UNIX, 128, 2).unwrap();
        let second = SequencerDefinition::new("seq", SnowcastEpoch::UNIX, 128, 0).unwrap();
        table.create_or_get(&first).unwrap();

        let (stored, _) = table.attach(&second, LesseeId::new(1)).unwrap();
        assert_eq!(stored.backup_count(), 2);
    }

    #[test]
    fn conflicting_attach_leaves_the_table_untouched() {
        let table = table(1);
        table.attach(&definition("seq1", 10, 256), LesseeId::new(1)).unwrap();

        let result = table.attach(&definition("seq1", 20, 256), LesseeId::new(2));
        assert!(matches!(result, Err(Error::ConfigurationConflict { .. })));
        assert_eq!(table.leases("seq1").unwrap().len(), 1);
    }

    #[test]
    fn exactly_max_attaches_succeed() {
        let table = table(1);
        let def = definition("seq", 0, 128);
        for expected in 0..128 {
            assert_eq!(table.attach(&def, LesseeId::new(7)).unwrap().1, expected);
        }
        assert_eq!(
            table.attach(&def, LesseeId::new(8)),
            Err(Error::CapacityExhausted {
                name: "seq".into(),
                max_logical_node_count: 128
            })
        );
    }

    #[test]
    fn insufficient_replicas_is_rejected_before_creation() {
        let table = table(1);
        let def = SequencerDefinition::new("seq", SnowcastEpoch::UNIX, 128, 2).unwrap();
        assert_eq!(
            table.attach(&def, LesseeId::new(1)),
            Err(Error::InsufficientReplicas {
                requested: 2,
                available: 1
            })
        );
        assert_eq!(table.definition("seq").unwrap(), None);
    }

    #[test]
    fn acquire_requires_an_existing_sequencer() {
        let table = table(1);
        assert_eq!(
            table.acquire(&definition("missing", 0, 128), LesseeId::new(1)),
            Err(Error::UnknownSequencer("missing".into()))
        );
        assert_eq!(
            table.leases("missing"),
            Err(Error::UnknownSequencer("missing".into()))
        );
    }

    #[test]
    fn release_is_stale_for_strangers_and_unknown_names() {
        let table = table(1);
        let def = definition("seq", 0, 128);
        let owner = LesseeId::new(1);
        let (_, id) = table.attach(&def, owner).unwrap();

        assert_eq!(table.release("seq", id, LesseeId::new(2)).unwrap(), ReleaseOutcome::Stale);
        assert_eq!(table.release("nope", id, owner).unwrap(), ReleaseOutcome::Stale);
        assert_eq!(table.release("seq", id, owner).unwrap(), ReleaseOutcome::Released);
        assert_eq!(table.release("seq", id, owner).unwrap(), ReleaseOutcome::Stale);
        assert_eq!(table.leases("seq").unwrap()[0].state, LeaseState::Detached);
    }

    #[test]
    fn disconnect_releases_across_sequencers() {
        let table = table(1);
        let gone = LesseeId::new(1);
        let alive = LesseeId::new(2);
        let a = definition("a", 0, 128);
        let b = definition("b", 0, 128);
        table.attach(&a, gone).unwrap();
        table.attach(&a, alive).unwrap();
        table.attach(&b, gone).unwrap();
        table.attach(&b, gone).unwrap();

        assert_eq!(table.on_lessee_disconnect(gone).unwrap(), 3);
        assert_eq!(table.on_lessee_disconnect(gone).unwrap(), 0);
        assert_eq!(table.attach(&a, alive).unwrap().1, 0);
        assert_eq!(table.attach(&b, alive).unwrap().1, 0);
    }

    #[test]
    fn destroy_then_create_starts_empty() {
        let table = table(1);
        let def = definition("seq", 0, 128);
        table.attach(&def, LesseeId::new(1)).unwrap();
        table.attach(&def, LesseeId::new(1)).unwrap();

        assert!(table.destroy("seq").unwrap());
        assert!(!table.destroy("seq").unwrap());
        assert_eq!(table.definition("seq").unwrap(), None);

        // A recreated sequencer may use another shape.
        let recreated = definition("seq", 99, 256);
        assert_eq!(table.attach(&recreated, LesseeId::new(2)).unwrap().1, 0);
        assert_eq!(table.leases("seq").unwrap().len(), 1);
    }

    #[test]
    fn concurrent_leases_are_never_shared() {
        let table = table(1);
        let def = definition("seq", 0, 128);
        table.create_or_get(&def).unwrap();
        let held = Mutex::new(HashSet::new());

        std::thread::scope(|s| {
            for worker in 0..8 {
                let table = &table;
                let def = &def;
                let held = &held;
                s.spawn(move || {
                    let lessee = LesseeId::new(worker);
                    for _ in 0..200 {
                        let id = table.acquire(def, lessee).unwrap().logical_node_id;
                        assert!(held.lock().unwrap().insert(id), "id {id} leased twice");
                        // Hold the slot while the other workers acquire.
                        for _ in 0..4 {
                            std::thread::yield_now();
                        }
                        assert!(held.lock().unwrap().remove(&id));
                        assert_eq!(
                            table.release("seq", id, lessee).unwrap(),
                            ReleaseOutcome::Released
                        );
                    }
                });
            }
        });

        assert!(
            table
                .leases("seq")
                .unwrap()
                .iter()
                .all(|lease| lease.state == LeaseState::Detached)
        );
    }

    #[test]
    fn concurrent_attaches_stop_at_capacity() {
        const WORKERS: u64 = 16;
        const MAX: u32 = 128;

        let table = table(1);
        let def = definition("seq", 0, MAX);
        let barrier = Barrier::new(WORKERS as usize);
        let granted = Mutex::new(Vec::new());
        let exhausted = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for worker in 0..WORKERS {
                let (table, def, barrier, granted, exhausted) =
                    (&table, &def, &barrier, &granted, &exhausted);
                s.spawn(move || {
                    barrier.wait();
                    loop {
                        match table.attach(def, LesseeId::new(worker)) {
                            Ok((_, id)) => granted.lock().unwrap().push(id),
                            Err(Error::CapacityExhausted { .. }) => {
                                exhausted.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                });
            }
        });

        let mut granted = granted.into_inner().unwrap();
        granted.sort_unstable();
        assert_eq!(granted, (0..MAX).collect::<Vec<_>>());
        assert_eq!(exhausted.load(Ordering::Relaxed), WORKERS as usize);
        assert_eq!(table.leases("seq").unwrap().len(), MAX as usize);
    }
}
