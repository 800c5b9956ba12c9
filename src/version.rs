//! LMP version numbers
//!
//! The version number within an `LMP_version_res` maps to the version of the core specification the
//! link manager implements.

use core::fmt;

/// The LMP version of a link manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LmpVersion {
    V1_0b,
    V1_1,
    V1_2,
    V2_0,
    V2_1,
    V3_0,
    V4_0,
    V4_1,
    V4_2,
    V5_0,
    V5_1,
    V5_2,
    V5_3,
    V5_4,
}

impl LmpVersion {
    pub fn try_from_raw(raw: u8) -> Result<Self, UnknownVersion> {
        match raw {
            0 => Ok(LmpVersion::V1_0b),
            1 => Ok(LmpVersion::V1_1),
            2 => Ok(LmpVersion::V1_2),
            3 => Ok(LmpVersion::V2_0),
            4 => Ok(LmpVersion::V2_1),
            5 => Ok(LmpVersion::V3_0),
            6 => Ok(LmpVersion::V4_0),
            7 => Ok(LmpVersion::V4_1),
            8 => Ok(LmpVersion::V4_2),
            9 => Ok(LmpVersion::V5_0),
            10 => Ok(LmpVersion::V5_1),
            11 => Ok(LmpVersion::V5_2),
            12 => Ok(LmpVersion::V5_3),
            13 => Ok(LmpVersion::V5_4),
            _ => Err(UnknownVersion(raw)),
        }
    }

    pub fn into_raw(self) -> u8 {
        self as u8
    }

    /// The core specification version
    pub fn as_str(&self) -> &'static str {
        match self {
            LmpVersion::V1_0b => "1.0b",
            LmpVersion::V1_1 => "1.1",
            LmpVersion::V1_2 => "1.2",
            LmpVersion::V2_0 => "2.0",
            LmpVersion::V2_1 => "2.1",
            LmpVersion::V3_0 => "3.0",
            LmpVersion::V4_0 => "4.0",
            LmpVersion::V4_1 => "4.1",
            LmpVersion::V4_2 => "4.2",
            LmpVersion::V5_0 => "5.0",
            LmpVersion::V5_1 => "5.1",
            LmpVersion::V5_2 => "5.2",
            LmpVersion::V5_3 => "5.3",
            LmpVersion::V5_4 => "5.4",
        }
    }
}

impl fmt::Display for LmpVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Bluetooth {}", self.as_str())
    }
}

/// A version number newer than the ones known by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownVersion(pub u8);

impl fmt::Display for UnknownVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown LMP version number ({})", self.0)
    }
}

impl std::error::Error for UnknownVersion {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_numbers() {
        assert_eq!(Ok(LmpVersion::V1_0b), LmpVersion::try_from_raw(0));

        assert_eq!(Ok(LmpVersion::V5_0), LmpVersion::try_from_raw(9));

        assert_eq!("5.4", LmpVersion::try_from_raw(13).unwrap().as_str());

        assert_eq!(Err(UnknownVersion(14)), LmpVersion::try_from_raw(14));

        for raw in 0..=13 {
            assert_eq!(raw, LmpVersion::try_from_raw(raw).unwrap().into_raw());
        }
    }
}
