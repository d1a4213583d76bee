use crate::SequencerState;

/// A result type defaulting to the crate-wide [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All error variants that `snowcast` can emit.
///
/// Validation and capacity errors come from attach/create and are returned
/// before any lease-table mutation is committed. [`Error::ClockRegression`]
/// fails a single `next_id` call and leaves the handle usable once the clock
/// recovers. [`Error::InvalidState`] with [`SequencerState::Destroyed`] is
/// permanent for that handle.
///
/// Counter overflow is never surfaced: generation waits for the next
/// millisecond instead. Releasing a slot that is no longer held is reported as
/// [`crate::ReleaseOutcome::Stale`], not as an error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A sequencer with this name already exists with a different epoch or
    /// logical node count.
    #[error(
        "sequencer '{name}' already exists with epoch {existing_epoch_ms} and {existing_max_logical_node_count} logical nodes (requested epoch {requested_epoch_ms}, {requested_max_logical_node_count} logical nodes)"
    )]
    ConfigurationConflict {
        name: String,
        existing_epoch_ms: u64,
        existing_max_logical_node_count: u32,
        requested_epoch_ms: u64,
        requested_max_logical_node_count: u32,
    },

    /// Every logical node id of the sequencer is currently leased.
    #[error("no free logical node id in sequencer '{name}' ({max_logical_node_count} slots)")]
    CapacityExhausted {
        name: String,
        max_logical_node_count: u32,
    },

    /// The wall clock moved backwards relative to the last emitted id.
    #[error("clock moved backwards: last timestamp offset {last_ms}ms, now {now_ms}ms")]
    ClockRegression { last_ms: u64, now_ms: u64 },

    /// Generation or re-attachment was attempted in a state that forbids it.
    #[error("sequencer is {0:?}")]
    InvalidState(SequencerState),

    /// `max_logical_node_count` is outside the supported range.
    #[error("max logical node count {0} is outside [{min}, {max}]", min = crate::MIN_LOGICAL_NODE_COUNT, max = crate::MAX_LOGICAL_NODE_COUNT)]
    InvalidMaxLogicalNodeCount(u32),

    /// `backup_count` is outside the supported range.
    #[error("backup count {0} is outside [0, {max}]", max = crate::MAX_BACKUP_COUNT)]
    InvalidBackupCount(u32),

    /// Sequencer names must be non-empty.
    #[error("sequencer name must not be empty")]
    InvalidName,

    /// The requested node count leaves no room for the counter.
    #[error("{node_bits} logical node bits leave no counter bits")]
    DegenerateLayout { node_bits: u32 },

    /// More backups were requested than the store can keep.
    #[error("{requested} backups requested but only {available} available")]
    InsufficientReplicas { requested: u16, available: u16 },

    /// The clock reads earlier than the sequencer's epoch.
    #[error("current time {now_ms}ms is before the epoch {epoch_ms}ms")]
    BeforeEpoch { now_ms: u64, epoch_ms: u64 },

    /// The timestamp offset no longer fits the timestamp field.
    #[error("timestamp offset {offset_ms}ms exceeds the layout maximum {max_ms}ms")]
    TimestampOverflow { offset_ms: u64, max_ms: u64 },

    /// No sequencer with this name exists (never created or destroyed).
    #[error("unknown sequencer '{0}'")]
    UnknownSequencer(String),

    /// The lease store backend failed.
    #[error("lease store error: {0}")]
    Storage(String),
}
