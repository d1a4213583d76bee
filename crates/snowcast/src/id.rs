use core::fmt;

/// A generated 63-bit identifier.
///
/// The raw value is only meaningful together with the [`BitLayout`] of the
/// sequencer that produced it; see [`crate::SnowcastSequencer::decode`].
///
/// Ids from one sequencer handle compare in generation order.
///
/// [`BitLayout`]: crate::BitLayout
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnowcastId {
    id: u64,
}

impl SnowcastId {
    /// Wraps a raw value, e.g. one read back from storage.
    pub const fn from_raw(raw: u64) -> Self {
        Self { id: raw }
    }

    /// The raw packed value.
    pub const fn to_raw(&self) -> u64 {
        self.id
    }

    /// The raw value as a signed integer. Never negative.
    pub const fn to_i64(&self) -> i64 {
        self.id as i64
    }

    /// Returns the ID as a zero-padded 20-digit string.
    pub fn to_padded_string(&self) -> String {
        format!("{:020}", self.id)
    }
}

impl From<SnowcastId> for u64 {
    fn from(id: SnowcastId) -> Self {
        id.to_raw()
    }
}

impl fmt::Display for SnowcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for SnowcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnowcastId({:#018x})", self.id)
    }
}
