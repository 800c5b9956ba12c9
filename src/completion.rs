//! Mandatory response tracking
//!
//! A fingerprint is complete once one response of every mandatory category was received. The
//! categories are kept as bits of a [`CompletionMask`] which only ever gains bits.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// A set of mandatory response categories
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CompletionMask(u8);

impl CompletionMask {
    /// `LMP_features_res`
    pub const FEATURES: CompletionMask = CompletionMask(1 << 0);
    /// `LMP_features_res_ext`
    pub const EXTENDED_FEATURES: CompletionMask = CompletionMask(1 << 1);
    /// `LMP_version_res`
    pub const VERSION: CompletionMask = CompletionMask(1 << 2);
    /// `LMP_name_res` (a complete name)
    pub const NAME: CompletionMask = CompletionMask(1 << 3);

    /// Every mandatory category
    pub const ALL: CompletionMask = CompletionMask(0b1111);

    pub const fn empty() -> Self {
        CompletionMask(0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: CompletionMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_complete(&self) -> bool {
        self.contains(CompletionMask::ALL)
    }
}

impl BitOr for CompletionMask {
    type Output = CompletionMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        CompletionMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for CompletionMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

impl fmt::Debug for CompletionMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CompletionMask({:#06b})", self.0)
    }
}

/// Tracker of the mandatory responses of a session
#[derive(Debug, Clone, Default)]
pub struct CompletionTracker {
    mask: CompletionMask,
    reported: bool,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mask(&self) -> CompletionMask {
        self.mask
    }

    pub fn is_complete(&self) -> bool {
        self.mask.is_complete()
    }

    /// Mark a category as received
    ///
    /// `true` is returned exactly once, by the call that completes the mask.
    pub fn mark(&mut self, category: CompletionMask) -> bool {
        self.mask |= category;

        if self.mask.is_complete() && !self.reported {
            self.reported = true;

            true
        } else {
            false
        }
    }
}
