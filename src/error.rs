use std::error::Error;
use std::fmt;

/// The three kinds of slot a thread can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Read,
    Write,
    UpgradeableRead,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Slot::Read => "read",
            Slot::Write => "write",
            Slot::UpgradeableRead => "upgradeable read",
        })
    }
}

/// Reentrant acquisition patterns that a lock refuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recursion {
    RecursiveRead,
    RecursiveWrite,
    RecursiveUpgrade,
    ReadAfterWrite,
    WriteAfterRead,
    UpgradeAfterRead,
    UpgradeAfterWrite,
}

impl fmt::Display for Recursion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Recursion::RecursiveRead => "recursive read lock acquisition is not allowed",
            Recursion::RecursiveWrite => "recursive write lock acquisition is not allowed",
            Recursion::RecursiveUpgrade => {
                "recursive upgradeable read lock acquisition is not allowed"
            }
            Recursion::ReadAfterWrite => {
                "a read lock may not be acquired with the write lock held"
            }
            Recursion::WriteAfterRead => {
                "a write lock may not be acquired with a read lock held, release it or use an upgradeable read lock"
            }
            Recursion::UpgradeAfterRead => {
                "an upgradeable read lock may not be acquired with a read lock held"
            }
            Recursion::UpgradeAfterWrite => {
                "an upgradeable read lock may not be acquired with the write lock held"
            }
        })
    }
}

/// Misuse of a lock. All of these are programming errors on the caller's side.
/// A timed out acquisition is not an error, it is reported as `Ok(false)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockError {
    /// The calling thread released a slot it does not hold.
    MismatchedRelease(Slot),
    /// The acquisition would need a reentrant pattern the policy forbids.
    DisallowedRecursion(Recursion),
    /// A millisecond timeout below `-1`.
    InvalidTimeout(i32),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::MismatchedRelease(slot) => write!(
                f,
                "the {} lock is being released without being held",
                slot
            ),
            LockError::DisallowedRecursion(recursion) => recursion.fmt(f),
            LockError::InvalidTimeout(ms) => write!(
                f,
                "invalid timeout of {}ms, expected -1 (infinite) or a non-negative value",
                ms
            ),
        }
    }
}

impl Error for LockError {}

impl From<Recursion> for LockError {
    fn from(recursion: Recursion) -> Self {
        LockError::DisallowedRecursion(recursion)
    }
}
