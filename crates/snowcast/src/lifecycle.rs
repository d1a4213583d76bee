use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    DEFAULT_BACKUP_COUNT, DEFAULT_MAX_LOGICAL_NODE_COUNT, LeaseObserver, LeaseTable,
    LesseeId, Result, SequencerDefinition, SequencerState, SnowcastEpoch, SnowcastSequencer,
    SystemClock, TimeSource,
};

/// Handles owned by one controller, indexed by sequencer name. Registered
/// with the lease store to receive revocations and destruction.
struct Registry<T: TimeSource> {
    lessee: LesseeId,
    handles: Mutex<HashMap<String, SnowcastSequencer<T>>>,
}

impl<T: TimeSource> Registry<T> {
    fn get(&self, name: &str) -> Option<SnowcastSequencer<T>> {
        self.handles.lock().get(name).cloned()
    }
}

impl<T> LeaseObserver for Registry<T>
where
    T: TimeSource + Send + Sync,
{
    fn on_released(&self, name: &str, logical_node_id: u32, lessee: LesseeId) {
        if lessee != self.lessee {
            return;
        }
        if let Some(handle) = self.get(name) {
            handle.revoke(logical_node_id);
        }
    }

    fn on_destroyed(&self, name: &str) {
        if let Some(handle) = self.get(name) {
            handle.mark_destroyed();
        }
    }
}

/// Entry point for one process: hands out sequencer handles and drives their
/// lifecycle.
///
/// Each controller leases under its own random [`LesseeId`] and keeps at most
/// one live handle per sequencer name. Controllers sharing a [`LeaseTable`]
/// see each other's destroys: every handle of a destroyed sequencer becomes
/// [`SequencerState::Destroyed`] on every controller.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use snowcast::{InMemoryLeaseStore, LeaseTable, SequencerState, Snowcast, SnowcastEpoch, SystemClock};
///
/// let table = LeaseTable::new(Arc::new(InMemoryLeaseStore::new(1)));
/// let snowcast = Snowcast::new(table, SystemClock);
///
/// let sequencer = snowcast.create_sequencer("orders", SnowcastEpoch::DEFAULT).unwrap();
/// let id = sequencer.next_id().unwrap();
/// assert!(id.to_i64() > 0);
///
/// snowcast.destroy_sequencer(&sequencer).unwrap();
/// assert_eq!(sequencer.state(), SequencerState::Destroyed);
/// assert!(sequencer.next_id().is_err());
/// ```
pub struct Snowcast<T: TimeSource = SystemClock> {
    table: LeaseTable,
    time: T,
    backup_count: u16,
    registry: Arc<Registry<T>>,
    create_lock: Mutex<()>,
}

impl<T> Snowcast<T>
where
    T: TimeSource + Clone + Send + Sync + 'static,
{
    /// Creates a controller with a fresh lessee identity.
    pub fn new(table: LeaseTable, time: T) -> Self {
        Self::with_lessee(table, time, LesseeId::random())
    }

    /// Creates a controller leasing under `lessee`.
    ///
    /// Two live controllers must never share a lessee.
    pub fn with_lessee(table: LeaseTable, time: T, lessee: LesseeId) -> Self {
        let registry = Arc::new(Registry {
            lessee,
            handles: Mutex::new(HashMap::new()),
        });
        let observer = Arc::downgrade(&registry) as Weak<dyn LeaseObserver>;
        table.register_observer(observer);

        #[cfg(feature = "tracing")]
        tracing::debug!(%lessee, "snowcast controller started");

        Self {
            table,
            time,
            backup_count: DEFAULT_BACKUP_COUNT,
            registry,
            create_lock: Mutex::new(()),
        }
    }

    /// Sets the backup count used for sequencers this controller creates.
    #[must_use]
    pub fn with_backup_count(mut self, backup_count: u16) -> Self {
        self.backup_count = backup_count;
        self
    }

    pub fn lessee(&self) -> LesseeId {
        self.registry.lessee
    }

    pub fn table(&self) -> &LeaseTable {
        &self.table
    }

    /// Creates or joins `name` with [`DEFAULT_MAX_LOGICAL_NODE_COUNT`]
    /// logical nodes.
    ///
    /// # Errors
    ///
    /// As for [`Self::create_sequencer_with`].
    pub fn create_sequencer(
        &self,
        name: &str,
        epoch: SnowcastEpoch,
    ) -> Result<SnowcastSequencer<T>> {
        self.create_sequencer_with(name, epoch, DEFAULT_MAX_LOGICAL_NODE_COUNT)
    }

    /// Creates or joins `name` and returns an Attached handle.
    ///
    /// The sequencer is created if it does not exist. If it does, `epoch`
    /// and `max_logical_node_count` must match the existing definition.
    /// Repeated calls for a name this controller already holds return the
    /// same handle.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InvalidName`], [`crate::Error::InvalidMaxLogicalNodeCount`] or
    ///   [`crate::Error::InvalidBackupCount`] for bad arguments
    /// - [`crate::Error::InsufficientReplicas`] if the store keeps fewer backups
    ///   than this controller asks for
    /// - [`crate::Error::ConfigurationConflict`] if `name` exists with another epoch
    ///   or node count
    /// - [`crate::Error::CapacityExhausted`] if no logical node id is free
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn create_sequencer_with(
        &self,
        name: &str,
        epoch: SnowcastEpoch,
        max_logical_node_count: u32,
    ) -> Result<SnowcastSequencer<T>> {
        let requested = SequencerDefinition::new(
            name,
            epoch,
            max_logical_node_count,
            u32::from(self.backup_count),
        )?;

        let _create = self.create_lock.lock();
        if let Some(cached) = self
            .registry
            .get(name)
            .filter(|cached| cached.state() != SequencerState::Destroyed)
        {
            cached.definition().ensure_compatible(&requested)?;
            return Ok(cached);
        }

        let definition = self.table.create_or_get(&requested)?;
        let handle = SnowcastSequencer::unbound(
            definition,
            self.table.clone(),
            self.registry.lessee,
            self.time.clone(),
        );
        self.registry
            .handles
            .lock()
            .insert(name.to_owned(), handle.clone());

        if let Err(e) = handle.attach() {
            let mut handles = self.registry.handles.lock();
            if handles
                .get(name)
                .is_some_and(|current| current.state() != SequencerState::Attached)
            {
                handles.remove(name);
            }
            return Err(e);
        }
        Ok(handle)
    }

    /// Destroys the sequencer behind `sequencer` cluster-wide.
    ///
    /// Destroying an already destroyed sequencer succeeds.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Storage`] if the store fails.
    pub fn destroy_sequencer(&self, sequencer: &SnowcastSequencer<T>) -> Result<()> {
        self.destroy(sequencer.name())?;
        sequencer.mark_destroyed();
        Ok(())
    }

    /// Destroys `name` cluster-wide. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Storage`] if the store fails.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn destroy(&self, name: &str) -> Result<bool> {
        let _create = self.create_lock.lock();
        let existed = self.table.destroy(name)?;
        self.registry.handles.lock().remove(name);
        Ok(existed)
    }

    /// Releases every lease this controller holds, as if its connection to
    /// the cluster was lost. All its handles become Detached.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Storage`] if the store fails.
    pub fn disconnect(&self) -> Result<usize> {
        self.table.on_lessee_disconnect(self.registry.lessee)
    }

    /// The handle this controller holds for `name`, if any.
    pub fn sequencer(&self, name: &str) -> Option<SnowcastSequencer<T>> {
        self.registry.get(name)
    }
}

impl<T: TimeSource> core::fmt::Debug for Snowcast<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Snowcast")
            .field("lessee", &self.registry.lessee)
            .field("backup_count", &self.backup_count)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}
