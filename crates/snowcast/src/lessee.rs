use core::fmt;

/// Opaque identity of a lease holder: a process, a client connection or a
/// server-side session.
///
/// Lease releases are fenced on this identity, so two live lessees must never
/// share a value. [`LesseeId::random`] draws 64 random bits.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LesseeId(u64);

impl LesseeId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// A fresh identity from the thread-local RNG.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub const fn to_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LesseeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for LesseeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LesseeId({self})")
    }
}

impl core::str::FromStr for LesseeId {
    type Err = core::num::ParseIntError;

    /// Parses the hexadecimal form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(Self)
    }
}
