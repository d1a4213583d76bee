use core::fmt;

use crate::{Error, Result, SnowcastId};

/// Number of usable bits in an id. The sign bit of the `u64` is never set so
/// ids stay non-negative when stored as signed 64-bit integers.
pub const USABLE_BITS: u32 = 63;

/// Width of the timestamp field: 2^41 ms covers roughly 69.7 years from the
/// custom epoch.
pub const TIMESTAMP_BITS: u32 = 41;

/// The three fields packed into a [`SnowcastId`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct IdParts {
    /// Milliseconds since the sequencer's epoch.
    pub timestamp: u64,
    /// The logical node id leased to the producer.
    pub logical_node_id: u32,
    /// Per-millisecond counter.
    pub counter: u64,
}

/// Partition of the 63 usable id bits into timestamp, logical node and
/// counter fields.
///
/// The node field is `ceil(log2(max_logical_node_count))` bits wide, the
/// timestamp field is fixed at [`TIMESTAMP_BITS`], and the counter takes the
/// rest.
///
/// ```text
///  Bit Index:  63    62            22 21          22-N 21-N                 0
///              +-----+----------------+------------------+------------------+
///  Field:      | (0) | timestamp (41) | logical node (N) | counter (22 - N) |
///              +-----+----------------+------------------+------------------+
///              |<------------ MSB ------------ 64 bits ----------- LSB ---->|
/// ```
///
/// # Example
///
/// ```
/// use snowcast::BitLayout;
///
/// let layout = BitLayout::new(128).unwrap();
/// assert_eq!(layout.node_bits(), 7);
/// assert_eq!(layout.counter_bits(), 15);
///
/// let id = layout.encode(1000, 5, 1);
/// let parts = layout.decode(id);
/// assert_eq!((parts.timestamp, parts.logical_node_id, parts.counter), (1000, 5, 1));
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct BitLayout {
    node_bits: u32,
    counter_bits: u32,
}

impl BitLayout {
    /// Derives the layout for `max_logical_node_count` slots, rounding the
    /// count up to the next power of two.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMaxLogicalNodeCount`] for a zero count
    /// - [`Error::DegenerateLayout`] if no counter bit would remain
    pub fn new(max_logical_node_count: u32) -> Result<Self> {
        if max_logical_node_count == 0 {
            return Err(Error::InvalidMaxLogicalNodeCount(max_logical_node_count));
        }
        let node_bits = match max_logical_node_count.checked_next_power_of_two() {
            Some(rounded) => rounded.trailing_zeros(),
            None => u32::BITS,
        };
        if TIMESTAMP_BITS + node_bits >= USABLE_BITS {
            return Err(Error::DegenerateLayout { node_bits });
        }
        Ok(Self {
            node_bits,
            counter_bits: USABLE_BITS - TIMESTAMP_BITS - node_bits,
        })
    }

    /// Width of the logical node field.
    pub const fn node_bits(&self) -> u32 {
        self.node_bits
    }

    /// Width of the counter field.
    pub const fn counter_bits(&self) -> u32 {
        self.counter_bits
    }

    /// Width of the timestamp field.
    pub const fn timestamp_bits(&self) -> u32 {
        TIMESTAMP_BITS
    }

    /// Largest encodable timestamp offset, in milliseconds.
    pub const fn max_timestamp(&self) -> u64 {
        (1 << TIMESTAMP_BITS) - 1
    }

    /// Largest encodable logical node id.
    pub const fn max_logical_node_id(&self) -> u32 {
        ((1u64 << self.node_bits) - 1) as u32
    }

    /// Largest counter value within one millisecond.
    pub const fn max_counter(&self) -> u64 {
        (1 << self.counter_bits) - 1
    }

    const fn node_shift(&self) -> u32 {
        self.counter_bits
    }

    const fn timestamp_shift(&self) -> u32 {
        self.counter_bits + self.node_bits
    }

    /// Packs the three fields, most significant first.
    ///
    /// Values wider than their field are masked; callers are expected to stay
    /// within the widths reported by this layout.
    pub const fn encode(&self, timestamp: u64, logical_node_id: u32, counter: u64) -> SnowcastId {
        let timestamp = (timestamp & self.max_timestamp()) << self.timestamp_shift();
        let node = ((logical_node_id & self.max_logical_node_id()) as u64) << self.node_shift();
        let counter = counter & self.max_counter();
        SnowcastId::from_raw(timestamp | node | counter)
    }

    /// Unpacks an id produced by [`Self::encode`] with the same layout.
    pub const fn decode(&self, id: SnowcastId) -> IdParts {
        let raw = id.to_raw();
        IdParts {
            timestamp: (raw >> self.timestamp_shift()) & self.max_timestamp(),
            logical_node_id: ((raw >> self.node_shift()) as u32) & self.max_logical_node_id(),
            counter: raw & self.max_counter(),
        }
    }
}

impl fmt::Debug for BitLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitLayout")
            .field("timestamp_bits", &TIMESTAMP_BITS)
            .field("node_bits", &self.node_bits)
            .field("counter_bits", &self.counter_bits)
            .finish()
    }
}
