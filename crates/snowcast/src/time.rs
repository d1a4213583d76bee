use core::time::Duration;
use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

/// A source of wall-clock time in milliseconds since the Unix epoch.
///
/// Sequencers subtract their custom epoch from this value, so a time source
/// that jumps backwards surfaces as [`crate::Error::ClockRegression`] instead
/// of duplicate ids.
///
/// # Example
///
/// ```
/// use snowcast::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1234);
/// ```
pub trait TimeSource {
    /// Milliseconds since 1970-01-01T00:00:00Z.
    fn current_millis(&self) -> u64;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

/// Reads [`SystemTime::now`] on every call.
///
/// Follows NTP and manual adjustments, including backwards steps.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_millis(&self) -> u64 {
        unix_millis(SystemTime::now())
    }
}

/// Shared ticker thread that updates every millisecond.
#[derive(Debug)]
struct SharedTickerInner {
    elapsed: AtomicU64,
    _handle: OnceLock<JoinHandle<()>>,
}

/// A time source that never moves backwards.
///
/// The wall clock is sampled once at construction; afterwards a background
/// thread advances an atomic millisecond counter from [`Instant`], so reads
/// are a single relaxed load and external clock adjustments are ignored. The
/// ticker thread exits once every clone has been dropped.
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    inner: Arc<SharedTickerInner>,
    anchor_millis: u64,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Anchors a new clock to the current wall-clock time.
    pub fn new() -> Self {
        let start = Instant::now();
        let anchor_millis = unix_millis(SystemTime::now());

        let inner = Arc::new(SharedTickerInner {
            elapsed: AtomicU64::new(0),
            _handle: OnceLock::new(),
        });

        let weak_inner = Arc::downgrade(&inner);
        let handle = thread::spawn(move || {
            let mut tick = 0;

            loop {
                let Some(inner_ref) = weak_inner.upgrade() else {
                    break;
                };

                let target = start + Duration::from_millis(tick);
                let now = Instant::now();
                if now < target {
                    thread::sleep(target - now);
                }

                let now_ms = start.elapsed().as_millis() as u64;
                inner_ref.elapsed.store(now_ms, Ordering::Relaxed);

                // Align to the next tick after the actual time.
                tick = now_ms + 1;
            }
        });

        // Freshly created, so the cell is always empty here.
        let _ = inner._handle.set(handle);

        Self {
            inner,
            anchor_millis,
        }
    }
}

impl TimeSource for MonotonicClock {
    fn current_millis(&self) -> u64 {
        self.anchor_millis + self.inner.elapsed.load(Ordering::Relaxed)
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// The custom epoch of a sequencer, in milliseconds since the Unix epoch.
///
/// Every id stores `now - epoch`, so a recent epoch maximises the usable
/// range of the 41-bit timestamp field (about 69.7 years).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnowcastEpoch {
    unix_millis: u64,
}

impl SnowcastEpoch {
    /// Wednesday, January 1, 2025 00:00:00 UTC.
    pub const DEFAULT: Self = Self::from_unix_millis(1_735_689_600_000);

    /// The Unix epoch itself.
    pub const UNIX: Self = Self::from_unix_millis(0);

    pub const fn from_unix_millis(unix_millis: u64) -> Self {
        Self { unix_millis }
    }

    /// Builds an epoch from a duration since 1970-01-01 UTC. Sub-millisecond
    /// precision is dropped.
    pub const fn from_duration(since_unix_epoch: Duration) -> Self {
        Self::from_unix_millis(since_unix_epoch.as_millis() as u64)
    }

    /// Builds an epoch from a [`SystemTime`]. Times before 1970 clamp to the
    /// Unix epoch.
    pub fn from_system_time(time: SystemTime) -> Self {
        Self::from_unix_millis(unix_millis(time))
    }

    pub const fn unix_millis(&self) -> u64 {
        self.unix_millis
    }
}

impl Default for SnowcastEpoch {
    fn default() -> Self {
        Self::DEFAULT
    }
}
