
use core::{cmp, fmt};
use std::sync::Arc;

use parking_lot::Mutex;
use portable_atomic::{AtomicU8, AtomicU64, Ordering};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    BitLayout, Error, IdGenStatus, IdParts, LeaseTable, LesseeId, ReleaseOutcome, Result,
    SequencerDefinition, SnowcastEpoch, SnowcastId, TimeSource,
};

/// The caller's view of its lease.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SequencerState {
    /// The handle holds a logical node id and may generate.
    Attached = 0,
    /// The lease was released or revoked; [`SnowcastSequencer::attach`]
    /// must succeed before generating again.
    Detached = 1,
    /// The sequencer no longer exists anywhere. Terminal.
    Destroyed = 2,
}

impl SequencerState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Attached,
            1 => Self::Detached,
            _ => Self::Destroyed,
        }
    }
}

/// State word value while no lease is bound. Never a valid id since the sign
/// bit is set.
const NOT_ATTACHED: u64 = u64::MAX;

/// Set on a freshly bound state word whose low bits carry the logical node
/// id. No id has been emitted under the lease yet.
const FRESH: u64 = 1 << 63;

#[derive(Debug, Default)]
struct Binding {
    logical_node_id: Option<u32>,
    /// Revocations that arrived while no lease was bound.
    revoked: Vec<u32>,
}

struct Inner<T: TimeSource> {
    definition: SequencerDefinition,
    table: LeaseTable,
    lessee: LesseeId,
    time: T,
    #[cfg(feature = "cache-padded")]
    state: crossbeam_utils::CachePadded<AtomicU64>,
    #[cfg(not(feature = "cache-padded"))]
    state: AtomicU64,
    /// Lowest timestamp offset the next fresh lease may emit.
    floor: AtomicU64,
    lifecycle: AtomicU8,
    binding: Mutex<Binding>,
    /// Serialises attach and detach on this handle.
    transition: Mutex<()>,
}

impl<T: TimeSource> Inner<T> {
    fn lifecycle(&self) -> SequencerState {
        SequencerState::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    /// Stops generation and unbinds the lease. Must be called with the
    /// binding lock held.
    fn fence(&self, binding: &mut Binding, next: SequencerState) -> Option<u32> {
        self.lifecycle.store(next as u8, Ordering::Release);
        let last = self.state.swap(NOT_ATTACHED, Ordering::AcqRel);
        if last & FRESH == 0 {
            let last_timestamp = self
                .definition
                .layout()
                .decode(SnowcastId::from_raw(last))
                .timestamp;
            self.floor.fetch_max(last_timestamp + 1, Ordering::AcqRel);
        }
        binding.logical_node_id.take()
    }

    fn revoke(&self, logical_node_id: u32) {
        let mut binding = self.binding.lock();
        if binding.logical_node_id == Some(logical_node_id) {
            self.fence(&mut binding, SequencerState::Detached);
            #[cfg(feature = "tracing")]
            tracing::warn!(
                name = self.definition.name(),
                logical_node_id,
                "lease revoked"
            );
        } else {
            binding.revoked.push(logical_node_id);
        }
    }

    fn destroy(&self) {
        let mut binding = self.binding.lock();
        if self.lifecycle() != SequencerState::Destroyed {
            self.fence(&mut binding, SequencerState::Destroyed);
            #[cfg(feature = "tracing")]
            tracing::info!(name = self.definition.name(), "sequencer destroyed");
        }
    }
}

/// A handle bound to one leased logical node id of a sequencer.
///
/// Generation is lock-free: the last emitted id lives in a single atomic
/// word that every call advances with a compare-and-swap, so one handle can
/// be shared by any number of threads. Clones share the same lease.
///
/// Handles are obtained from [`crate::Snowcast`]. Revocations and
/// destruction are pushed into the handle by the lease store, so a handle
/// stops generating before its logical node id can be given to anyone else.
///
/// Dropping a handle does not release its lease; call
/// [`SnowcastSequencer::detach`] or [`crate::Snowcast::disconnect`].
pub struct SnowcastSequencer<T: TimeSource> {
    inner: Arc<Inner<T>>,
}

impl<T: TimeSource> Clone for SnowcastSequencer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: TimeSource> SnowcastSequencer<T> {
    /// An unbound handle. It starts Detached and must be attached.
    pub(crate) fn unbound(
        definition: SequencerDefinition,
        table: LeaseTable,
        lessee: LesseeId,
        time: T,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                definition,
                table,
                lessee,
                time,
                #[cfg(feature = "cache-padded")]
                state: crossbeam_utils::CachePadded::new(AtomicU64::new(NOT_ATTACHED)),
                #[cfg(not(feature = "cache-padded"))]
                state: AtomicU64::new(NOT_ATTACHED),
                floor: AtomicU64::new(0),
                lifecycle: AtomicU8::new(SequencerState::Detached as u8),
                binding: Mutex::new(Binding::default()),
                transition: Mutex::new(()),
            }),
        }
    }

    pub(crate) fn revoke(&self, logical_node_id: u32) {
        self.inner.revoke(logical_node_id);
    }

    pub(crate) fn mark_destroyed(&self) {
        self.inner.destroy();
    }

    pub fn name(&self) -> &str {
        self.inner.definition.name()
    }

    pub fn definition(&self) -> &SequencerDefinition {
        &self.inner.definition
    }

    pub fn epoch(&self) -> SnowcastEpoch {
        self.inner.definition.epoch()
    }

    pub fn layout(&self) -> BitLayout {
        self.inner.definition.layout()
    }

    /// The identity this handle leases under.
    pub fn lessee(&self) -> LesseeId {
        self.inner.lessee
    }

    pub fn state(&self) -> SequencerState {
        self.inner.lifecycle()
    }

    /// The logical node id currently held, if attached.
    pub fn logical_node_id(&self) -> Option<u32> {
        let word = self.inner.state.load(Ordering::Acquire);
        match word {
            NOT_ATTACHED => None,
            word if word & FRESH != 0 => Some((word & !FRESH) as u32),
            word => Some(self.layout().decode(SnowcastId::from_raw(word)).logical_node_id),
        }
    }

    /// Generates the next id, spinning while the counter is exhausted for the
    /// current millisecond.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless the handle is Attached
    /// - [`Error::ClockRegression`] if the clock is behind the last emitted
    ///   id; the handle stays usable
    /// - [`Error::BeforeEpoch`] or [`Error::TimestampOverflow`] if the clock
    ///   is outside the layout's range
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use snowcast::{InMemoryLeaseStore, LeaseTable, Snowcast, SnowcastEpoch, SystemClock};
    ///
    /// let table = LeaseTable::new(Arc::new(InMemoryLeaseStore::new(1)));
    /// let snowcast = Snowcast::new(table, SystemClock);
    /// let sequencer = snowcast.create_sequencer("orders", SnowcastEpoch::DEFAULT).unwrap();
    ///
    /// let a = sequencer.next_id().unwrap();
    /// let b = sequencer.next_id().unwrap();
    /// assert!(a < b);
    /// assert_eq!(sequencer.logical_node_id_of(a), 0);
    /// ```
    pub fn next_id(&self) -> Result<SnowcastId> {
        loop {
            match self.poll_id()? {
                IdGenStatus::Ready { id } => break Ok(id),
                IdGenStatus::Pending { .. } => core::hint::spin_loop(),
            }
        }
    }

    /// Async form of [`Self::next_id`] that sleeps instead of spinning while
    /// the counter is exhausted.
    ///
    /// # Errors
    ///
    /// Same as [`Self::next_id`].
    #[cfg(feature = "async-tokio")]
    pub async fn next_id_async(&self) -> Result<SnowcastId> {
        loop {
            match self.poll_id()? {
                IdGenStatus::Ready { id } => break Ok(id),
                IdGenStatus::Pending { yield_for: 0 } => {}
                IdGenStatus::Pending { yield_for } => {
                    tokio::time::sleep(core::time::Duration::from_millis(yield_for)).await;
                }
            }
        }
    }

    /// Attempts to generate one id without waiting.
    ///
    /// # Errors
    ///
    /// Same as [`Self::next_id`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn poll_id(&self) -> Result<IdGenStatus> {
        let lifecycle = self.inner.lifecycle();
        if lifecycle != SequencerState::Attached {
            return Err(Error::InvalidState(lifecycle));
        }

        // State before clock, so a word published after the clock read is
        // never newer than `now`.
        let current = self.inner.state.load(Ordering::Acquire);
        if current == NOT_ATTACHED {
            return Err(Error::InvalidState(match self.inner.lifecycle() {
                SequencerState::Attached => SequencerState::Detached,
                state => state,
            }));
        }

        let layout = self.layout();
        let now_ms = self.inner.time.current_millis();
        let epoch_ms = self.epoch().unix_millis();
        let Some(offset) = now_ms.checked_sub(epoch_ms) else {
            return Err(Error::BeforeEpoch { now_ms, epoch_ms });
        };
        if offset > layout.max_timestamp() {
            return Err(Error::TimestampOverflow {
                offset_ms: offset,
                max_ms: layout.max_timestamp(),
            });
        }

        let next = if current & FRESH != 0 {
            let floor = self.inner.floor.load(Ordering::Acquire);
            if offset < floor {
                return Self::cold_behind_floor(offset, floor);
            }
            layout.encode(offset, (current & !FRESH) as u32, 0)
        } else {
            let last = layout.decode(SnowcastId::from_raw(current));
            match offset.cmp(&last.timestamp) {
                cmp::Ordering::Equal => {
                    if last.counter < layout.max_counter() {
                        layout.encode(offset, last.logical_node_id, last.counter + 1)
                    } else {
                        return Ok(IdGenStatus::Pending { yield_for: 1 });
                    }
                }
                cmp::Ordering::Greater => layout.encode(offset, last.logical_node_id, 0),
                cmp::Ordering::Less => {
                    return Err(Self::cold_clock_behind(last.timestamp, offset));
                }
            }
        };

        if self
            .inner
            .state
            .compare_exchange(current, next.to_raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Ok(IdGenStatus::Ready { id: next })
        } else {
            // Another thread won the race, or the lease was fenced.
            Ok(IdGenStatus::Pending { yield_for: 0 })
        }
    }

    #[cold]
    #[inline(never)]
    fn cold_clock_behind(last_ms: u64, now_ms: u64) -> Error {
        #[cfg(feature = "tracing")]
        tracing::warn!(last_ms, now_ms, "clock moved backwards");
        Error::ClockRegression { last_ms, now_ms }
    }

    #[cold]
    #[inline(never)]
    fn cold_behind_floor(offset: u64, floor: u64) -> Result<IdGenStatus> {
        // The previous lease emitted at `floor - 1`; waiting one tick is
        // fine, anything more is a regression.
        if offset + 1 == floor {
            Ok(IdGenStatus::Pending { yield_for: 1 })
        } else {
            Err(Self::cold_clock_behind(floor - 1, offset))
        }
    }

    /// Leases a logical node id for a Detached handle.
    ///
    /// Returns the id already held when the handle is Attached.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the sequencer was destroyed, or if the
    ///   new lease was revoked before it could be bound
    /// - [`Error::CapacityExhausted`] if every slot is attached
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(name = self.name()))
    )]
    pub fn attach(&self) -> Result<u32> {
        let _transition = self.inner.transition.lock();
        match self.inner.lifecycle() {
            SequencerState::Destroyed => {
                return Err(Error::InvalidState(SequencerState::Destroyed));
            }
            SequencerState::Attached => {
                if let Some(logical_node_id) = self.inner.binding.lock().logical_node_id {
                    return Ok(logical_node_id);
                }
            }
            SequencerState::Detached => {}
        }
        self.inner.binding.lock().revoked.clear();

        let grant = match self
            .inner
            .table
            .acquire(&self.inner.definition, self.inner.lessee)
        {
            Ok(grant) => grant,
            Err(Error::UnknownSequencer(_)) => {
                self.inner.destroy();
                return Err(Error::InvalidState(SequencerState::Destroyed));
            }
            Err(e) => return Err(e),
        };
        let logical_node_id = grant.logical_node_id;
        if grant.reused {
            // The previous holder was fenced before the slot became free, so
            // none of its ids are later than now.
            let now_ms = self.inner.time.current_millis();
            if let Some(offset) = now_ms.checked_sub(self.epoch().unix_millis()) {
                self.inner.floor.fetch_max(offset + 1, Ordering::AcqRel);
            }
        }

        let mut binding = self.inner.binding.lock();
        match self.inner.lifecycle() {
            SequencerState::Destroyed => Err(Error::InvalidState(SequencerState::Destroyed)),
            _ if binding.revoked.contains(&logical_node_id) => {
                Err(Error::InvalidState(SequencerState::Detached))
            }
            _ => {
                binding.logical_node_id = Some(logical_node_id);
                self.inner
                    .state
                    .store(FRESH | u64::from(logical_node_id), Ordering::Release);
                self.inner
                    .lifecycle
                    .store(SequencerState::Attached as u8, Ordering::Release);
                #[cfg(feature = "tracing")]
                tracing::debug!(logical_node_id, "attached");
                Ok(logical_node_id)
            }
        }
    }

    /// Stops generation and releases the lease.
    ///
    /// Detaching a Detached handle is a no-op reported as
    /// [`ReleaseOutcome::Stale`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the sequencer was destroyed
    /// - [`Error::Storage`] if the release could not be recorded; the handle
    ///   is Detached either way
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(name = self.name()))
    )]
    pub fn detach(&self) -> Result<ReleaseOutcome> {
        let _transition = self.inner.transition.lock();
        let released = {
            let mut binding = self.inner.binding.lock();
            match self.inner.lifecycle() {
                SequencerState::Destroyed => {
                    return Err(Error::InvalidState(SequencerState::Destroyed));
                }
                SequencerState::Detached => return Ok(ReleaseOutcome::Stale),
                SequencerState::Attached => {
                    self.inner.fence(&mut binding, SequencerState::Detached)
                }
            }
        };

        match released {
            Some(logical_node_id) => {
                self.inner
                    .table
                    .release(self.name(), logical_node_id, self.inner.lessee)
            }
            None => Ok(ReleaseOutcome::Stale),
        }
    }

    /// Splits an id produced by this sequencer into its fields.
    pub fn decode(&self, id: SnowcastId) -> IdParts {
        self.layout().decode(id)
    }

    /// Absolute creation time of `id`, in Unix milliseconds.
    pub fn timestamp(&self, id: SnowcastId) -> u64 {
        self.epoch()
            .unix_millis()
            .saturating_add(self.decode(id).timestamp)
    }

    pub fn logical_node_id_of(&self, id: SnowcastId) -> u32 {
        self.decode(id).logical_node_id
    }

    pub fn counter(&self, id: SnowcastId) -> u64 {
        self.decode(id).counter
    }
}

impl<T: TimeSource> fmt::Debug for SnowcastSequencer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowcastSequencer")
            .field("name", &self.name())
            .field("lessee", &self.inner.lessee)
            .field("state", &self.state())
            .field("logical_node_id", &self.logical_node_id())
            .finish_non_exhaustive()
    }
}
