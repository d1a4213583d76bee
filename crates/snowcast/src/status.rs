use crate::SnowcastId;

/// Represents the result of attempting to generate a new id without
/// blocking.
///
/// This type models the outcome of [`SnowcastSequencer::poll_id`]:
///
/// - [`IdGenStatus::Ready`] indicates a new id was successfully generated.
/// - [`IdGenStatus::Pending`] means the counter is exhausted for the current
///   millisecond, or another thread won the race for the state word.
///
/// [`SnowcastSequencer::next_id`] spins on `Pending`; async callers can sleep
/// for `yield_for` milliseconds instead.
///
/// [`SnowcastSequencer::poll_id`]: crate::SnowcastSequencer::poll_id
/// [`SnowcastSequencer::next_id`]: crate::SnowcastSequencer::next_id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGenStatus {
    /// A unique id was generated and is ready to use.
    Ready {
        /// The generated id.
        id: SnowcastId,
    },
    /// No id could be generated right now.
    ///
    /// `yield_for` is the number of milliseconds to wait before trying again.
    /// Zero means the state word was contended and an immediate retry is
    /// fine.
    Pending {
        /// Milliseconds until the clock is expected to allow a new id.
        yield_for: u64,
    },
}
