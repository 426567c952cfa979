use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

type RawStamp = u64;

static COUNTER: AtomicU64 = AtomicU64::new(1);

/// A modification stamp drawn from a single, process wide, monotonically
/// increasing counter.  Stamps are compared by value: a stamp drawn later is
/// always greater than any stamp drawn before it.
#[derive(
    Display, Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct ModTime(RawStamp);

impl ModTime {
    /// Precedes every stamp handed out by [ModTime::next].
    pub const ZERO: Self = Self(0);

    /// Draws a fresh stamp.
    pub fn next() -> Self {
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> RawStamp {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<ModTime> for u64 {
    fn from(t: ModTime) -> Self {
        t.0
    }
}

/// The modification stamp a stage carries.  Parameter setters call
/// [MTime::modified] so the executive can tell that the stage's previous output
/// is out of date.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MTime {
    stamp: ModTime,
}

impl MTime {
    pub fn new() -> Self {
        Self {
            stamp: ModTime::next(),
        }
    }

    pub fn modified(&mut self) {
        self.stamp = ModTime::next();
    }

    pub fn get(&self) -> ModTime {
        self.stamp
    }
}

impl Default for MTime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn stamps_increase() {
        let a = ModTime::next();
        let b = ModTime::next();
        assert!(b > a);
        assert!(a > ModTime::ZERO);
    }

    #[test]
    fn modified_advances_stamp() {
        let mut mtime = MTime::new();
        let before = mtime.get();
        mtime.modified();
        assert!(mtime.get() > before);
        // reading does not advance
        assert_eq!(mtime.get(), mtime.get());
    }
}
