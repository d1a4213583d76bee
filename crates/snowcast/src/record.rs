use crate::{Error, LesseeId, Result, SequencerDefinition};

/// State of one logical node id inside a [`SequencerRecord`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "state", rename_all = "snake_case"))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Never leased since the sequencer was created.
    #[default]
    Free,
    /// Exclusively held by `lessee`.
    Attached { lessee: LesseeId },
    /// Released by (or revoked from) `lessee`; assignable again.
    Detached { lessee: LesseeId },
}

impl Slot {
    pub const fn is_assignable(&self) -> bool {
        !matches!(self, Self::Attached { .. })
    }

    pub const fn holder(&self) -> Option<LesseeId> {
        match self {
            Self::Attached { lessee } => Some(*lessee),
            _ => None,
        }
    }
}

/// Whether a lease is currently usable by its lessee.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LeaseState {
    Attached,
    Detached,
}

/// A read-only view of one non-free slot.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Lease {
    pub sequencer_name: String,
    pub logical_node_id: u32,
    pub lessee: LesseeId,
    pub state: LeaseState,
}

/// Result of a release request.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReleaseOutcome {
    /// The slot was held by the caller and is now detached.
    Released,
    /// The caller did not hold the slot (already released, reassigned,
    /// unknown sequencer or out-of-range id). Nothing changed.
    Stale,
}

/// A logical node id handed to a lessee.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Grant {
    pub logical_node_id: u32,
    /// The slot was detached from an earlier lessee, whose last ids may
    /// carry the current millisecond.
    pub reused: bool,
}

/// The replicated state of one sequencer: its definition plus the full slot
/// table, indexed by logical node id.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequencerRecord {
    definition: SequencerDefinition,
    slots: Vec<Slot>,
}

impl SequencerRecord {
    /// A record with every slot free.
    pub fn new(definition: SequencerDefinition) -> Self {
        let slots = vec![Slot::Free; definition.max_logical_node_count() as usize];
        Self { definition, slots }
    }

    pub const fn definition(&self) -> &SequencerDefinition {
        &self.definition
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Number of slots currently attached.
    pub fn attached_count(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_assignable()).count()
    }

    /// Assigns the lowest assignable logical node id to `lessee`.
    ///
    /// # Errors
    ///
    /// [`Error::CapacityExhausted`] when every slot is attached.
    pub fn acquire(&mut self, lessee: LesseeId) -> Result<u32> {
        self.grant(lessee).map(|grant| grant.logical_node_id)
    }

    /// Like [`Self::acquire`], but also reports whether the slot had an
    /// earlier lessee.
    ///
    /// # Errors
    ///
    /// [`Error::CapacityExhausted`] when every slot is attached.
    pub fn grant(&mut self, lessee: LesseeId) -> Result<Grant> {
        let Some(index) = self.slots.iter().position(Slot::is_assignable) else {
            return Err(Error::CapacityExhausted {
                name: self.definition.name().to_owned(),
                max_logical_node_count: self.definition.max_logical_node_count(),
            });
        };
        let reused = self.slots[index] != Slot::Free;
        self.slots[index] = Slot::Attached { lessee };
        Ok(Grant {
            logical_node_id: index as u32,
            reused,
        })
    }

    /// Detaches `logical_node_id` if, and only if, `lessee` holds it.
    pub fn release(&mut self, logical_node_id: u32, lessee: LesseeId) -> ReleaseOutcome {
        match self.slots.get_mut(logical_node_id as usize) {
            Some(slot) if slot.holder() == Some(lessee) => {
                *slot = Slot::Detached { lessee };
                ReleaseOutcome::Released
            }
            _ => ReleaseOutcome::Stale,
        }
    }

    /// Detaches every slot held by `lessee`, returning how many there were.
    pub fn release_all(&mut self, lessee: LesseeId) -> usize {
        let mut released = 0;
        for slot in self.slots.iter_mut().filter(|slot| slot.holder() == Some(lessee)) {
            *slot = Slot::Detached { lessee };
            released += 1;
        }
        released
    }

    /// All attached and detached slots, ascending by id.
    pub fn leases(&self) -> Vec<Lease> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let (lessee, state) = match *slot {
                    Slot::Free => return None,
                    Slot::Attached { lessee } => (lessee, LeaseState::Attached),
                    Slot::Detached { lessee } => (lessee, LeaseState::Detached),
                };
                Some(Lease {
                    sequencer_name: self.definition.name().to_owned(),
                    logical_node_id: index as u32,
                    lessee,
                    state,
                })
            })
            .collect()
    }

    /// Slots attached in `self` that are no longer attached to the same lessee
    /// in `after`.
    pub fn revocations<'a>(
        &'a self,
        after: &'a Self,
    ) -> impl Iterator<Item = (u32, LesseeId)> + 'a {
        self.slots
            .iter()
            .zip(after.slots.iter())
            .enumerate()
            .filter_map(|(index, (before, after))| match before.holder() {
                Some(lessee) if after.holder() != Some(lessee) => Some((index as u32, lessee)),
                _ => None,
            })
    }
}
