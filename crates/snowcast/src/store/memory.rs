use std::{collections::HashMap, sync::Weak};

use parking_lot::{Mutex, RwLock};
#[cfg(feature = "tracing")]
use tracing::instrument;

use super::{LeaseObserver, LeaseStore, Mutation, notify_observers};
use crate::{Error, Result, SequencerRecord};

#[derive(Debug, Default)]
struct Replicas {
    primary: HashMap<String, SequencerRecord>,
    backups: Vec<HashMap<String, SequencerRecord>>,
}

impl Replicas {
    fn replicate(&mut self, name: &str, record: Option<&SequencerRecord>) {
        let copies = record.map_or(0, |record| usize::from(record.definition().backup_count()));
        for (index, backup) in self.backups.iter_mut().enumerate() {
            match record {
                Some(record) if index < copies => {
                    backup.insert(name.to_owned(), record.clone());
                }
                _ => {
                    backup.remove(name);
                }
            }
        }
    }
}

/// A [`LeaseStore`] kept in process memory.
///
/// A single mutex serialises all mutations, which makes every name trivially
/// linearizable. Each commit is copied synchronously into the first
/// `backup_count` backup maps, so [`InMemoryLeaseStore::failover`] can
/// promote a backup without losing acknowledged leases.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use snowcast::{InMemoryLeaseStore, LeaseTable};
///
/// let store = Arc::new(InMemoryLeaseStore::new(1));
/// let table = LeaseTable::new(store);
/// assert_eq!(table.backup_capacity(), 1);
/// ```
pub struct InMemoryLeaseStore {
    replicas: Mutex<Replicas>,
    observers: RwLock<Vec<Weak<dyn LeaseObserver>>>,
    backup_capacity: u16,
}

impl InMemoryLeaseStore {
    /// Creates an empty store that can keep up to `backup_capacity` backups
    /// per record.
    pub fn new(backup_capacity: u16) -> Self {
        Self {
            replicas: Mutex::new(Replicas {
                primary: HashMap::new(),
                backups: vec![HashMap::new(); usize::from(backup_capacity)],
            }),
            observers: RwLock::new(Vec::new()),
            backup_capacity,
        }
    }

    /// Simulates the loss of the primary: the first backup becomes the
    /// primary and the backups are re-synchronised from it.
    ///
    /// Records that had no backup are lost; observers see them as destroyed.
    /// Returns the names of the lost records.
    ///
    /// # Errors
    ///
    /// [`Error::InsufficientReplicas`] if the store keeps no backups.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn failover(&self) -> Result<Vec<String>> {
        let mut replicas = self.replicas.lock();
        if replicas.backups.is_empty() {
            return Err(Error::InsufficientReplicas {
                requested: 1,
                available: 0,
            });
        }

        let promoted = replicas.backups.remove(0);
        replicas.backups.push(HashMap::new());
        let old_primary = core::mem::replace(&mut replicas.primary, promoted);

        let mut lost: Vec<String> = old_primary
            .keys()
            .filter(|name| !replicas.primary.contains_key(*name))
            .cloned()
            .collect();
        lost.sort();

        let records: Vec<(String, SequencerRecord)> = replicas
            .primary
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect();
        for backup in &mut replicas.backups {
            backup.clear();
        }
        for (name, record) in &records {
            replicas.replicate(name, Some(record));
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(lost = lost.len(), "promoted backup to primary");

        let observers = self.observers.read();
        for name in &lost {
            notify_observers(&observers, name, old_primary.get(name), None);
        }
        Ok(lost)
    }

    /// Reads the copy of `name` held by backup `index`, if any.
    pub fn backup(&self, index: usize, name: &str) -> Option<SequencerRecord> {
        self.replicas.lock().backups.get(index)?.get(name).cloned()
    }
}

impl Default for InMemoryLeaseStore {
    fn default() -> Self {
        Self::new(crate::DEFAULT_BACKUP_COUNT)
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn backup_capacity(&self) -> u16 {
        self.backup_capacity
    }

    fn get(&self, name: &str) -> Result<Option<SequencerRecord>> {
        Ok(self.replicas.lock().primary.get(name).cloned())
    }

    fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.replicas.lock().primary.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn update(&self, name: &str, mutation: &mut Mutation<'_>) -> Result<()> {
        let mut replicas = self.replicas.lock();
        let before = replicas.primary.get(name).cloned();
        let mut after = before.clone();
        mutation(&mut after)?;

        if after == before {
            return Ok(());
        }
        if let Some(record) = &after {
            let requested = record.definition().backup_count();
            if requested > self.backup_capacity {
                return Err(Error::InsufficientReplicas {
                    requested,
                    available: self.backup_capacity,
                });
            }
        }

        replicas.replicate(name, after.as_ref());
        match &after {
            Some(record) => {
                replicas.primary.insert(name.to_owned(), record.clone());
            }
            None => {
                replicas.primary.remove(name);
            }
        }

        let observers = self.observers.read();
        notify_observers(&observers, name, before.as_ref(), after.as_ref());
        Ok(())
    }

    fn register_observer(&self, observer: Weak<dyn LeaseObserver>) {
        let mut observers = self.observers.write();
        observers.retain(|existing| existing.strong_count() > 0);
        observers.push(observer);
    }
}
