use crate::{BitLayout, Error, Result, SnowcastEpoch};

/// Smallest supported `max_logical_node_count` (7 node bits).
pub const MIN_LOGICAL_NODE_COUNT: u32 = 128;

/// Largest supported `max_logical_node_count` (13 node bits).
pub const MAX_LOGICAL_NODE_COUNT: u32 = 8192;

/// Node count used when the caller does not pick one.
pub const DEFAULT_MAX_LOGICAL_NODE_COUNT: u32 = MAX_LOGICAL_NODE_COUNT;

/// Largest supported number of backup copies.
pub const MAX_BACKUP_COUNT: u32 = i16::MAX as u32;

/// Backup count used when the caller does not pick one.
pub const DEFAULT_BACKUP_COUNT: u16 = 1;

/// Immutable descriptor of one named sequencer.
///
/// Created once per name, cluster-wide. Two definitions are compatible when
/// their epoch and node count agree; the backup count of the first creator
/// wins.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SequencerDefinition {
    name: String,
    epoch: SnowcastEpoch,
    max_logical_node_count: u32,
    backup_count: u16,
    layout: BitLayout,
}

impl SequencerDefinition {
    /// Validates the arguments and derives the bit layout.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidName`] for an empty name
    /// - [`Error::InvalidMaxLogicalNodeCount`] outside
    ///   [`MIN_LOGICAL_NODE_COUNT`]..=[`MAX_LOGICAL_NODE_COUNT`]
    /// - [`Error::InvalidBackupCount`] above [`MAX_BACKUP_COUNT`]
    pub fn new(
        name: impl Into<String>,
        epoch: SnowcastEpoch,
        max_logical_node_count: u32,
        backup_count: u32,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidName);
        }
        if !(MIN_LOGICAL_NODE_COUNT..=MAX_LOGICAL_NODE_COUNT).contains(&max_logical_node_count) {
            return Err(Error::InvalidMaxLogicalNodeCount(max_logical_node_count));
        }
        let backup_count = u16::try_from(backup_count)
            .ok()
            .filter(|count| u32::from(*count) <= MAX_BACKUP_COUNT)
            .ok_or(Error::InvalidBackupCount(backup_count))?;
        let layout = BitLayout::new(max_logical_node_count)?;

        Ok(Self {
            name,
            epoch,
            max_logical_node_count,
            backup_count,
            layout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn epoch(&self) -> SnowcastEpoch {
        self.epoch
    }

    pub const fn max_logical_node_count(&self) -> u32 {
        self.max_logical_node_count
    }

    pub const fn backup_count(&self) -> u16 {
        self.backup_count
    }

    pub const fn layout(&self) -> BitLayout {
        self.layout
    }

    /// True when `other` names the same sequencer with the same epoch and
    /// node count.
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.name == other.name
            && self.epoch == other.epoch
            && self.max_logical_node_count == other.max_logical_node_count
    }

    /// Fails with [`Error::ConfigurationConflict`] unless `requested` is
    /// compatible with this (existing) definition.
    pub fn ensure_compatible(&self, requested: &Self) -> Result<()> {
        if self.is_compatible(requested) {
            return Ok(());
        }
        Err(Error::ConfigurationConflict {
            name: requested.name.clone(),
            existing_epoch_ms: self.epoch.unix_millis(),
            existing_max_logical_node_count: self.max_logical_node_count,
            requested_epoch_ms: requested.epoch.unix_millis(),
            requested_max_logical_node_count: requested.max_logical_node_count,
        })
    }
}
