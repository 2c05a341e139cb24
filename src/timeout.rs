use crate::error::LockError;
use std::time::{Duration, Instant};

/// How long an acquisition may wait.
///
/// Converts from a `Duration`, from `Option<Duration>` (`None` waits forever)
/// and, through [`Timeout::from_millis`], from the classic signed millisecond
/// convention where `-1` means infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    Infinite,
    After(Duration),
}

impl Timeout {
    pub const ZERO: Timeout = Timeout::After(Duration::ZERO);

    pub fn from_millis(ms: i32) -> Result<Self, LockError> {
        match ms {
            -1 => Ok(Timeout::Infinite),
            ms if ms < -1 => Err(LockError::InvalidTimeout(ms)),
            ms => Ok(Timeout::After(Duration::from_millis(ms as u64))),
        }
    }

    /// A zero timeout fails fast without ever blocking.
    #[inline]
    pub fn is_zero(&self) -> bool {
        matches!(self, Timeout::After(d) if d.is_zero())
    }

    /// Fixes the point in time the wait gives up at. Durations too large to
    /// represent as an `Instant` wait forever.
    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            Timeout::Infinite => None,
            Timeout::After(d) => Instant::now().checked_add(d),
        }
    }

    pub(crate) fn until(instant: Instant) -> Self {
        Timeout::After(instant.saturating_duration_since(Instant::now()))
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(d: Option<Duration>) -> Self {
        d.map_or(Timeout::Infinite, Timeout::After)
    }
}
