//! Peer identity types
//!
//! These are the identifiers of a peer that are either handed to the fingerprinter by the host
//! (the [`ConnectionHandle`]) or recovered from an FHS packet (the [`BluetoothDeviceAddress`] and
//! the [`ClassOfDevice`]).

use core::fmt;

/// The connection handle
///
/// This is the identifier of a connection to a peer. It is assigned by the controller when the
/// connection is established and is used by the fingerprinter as the key of its session map.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct ConnectionHandle {
    handle: u16,
}

impl ConnectionHandle {
    pub const MAX: u16 = 0x0EFF;

    const ERROR: &'static str = "Raw connection handle value larger then the maximum (0x0EFF)";

    pub fn get_raw_handle(&self) -> u16 {
        self.handle
    }
}

impl TryFrom<u16> for ConnectionHandle {
    type Error = &'static str;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        if raw <= ConnectionHandle::MAX {
            Ok(ConnectionHandle { handle: raw })
        } else {
            Err(Self::ERROR)
        }
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.handle)
    }
}

/// A Bluetooth device address
///
/// The address is stored most significant byte first, the same order it is displayed in
/// (`NAP:NAP:UAP:LAP:LAP:LAP`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BluetoothDeviceAddress(pub [u8; 6]);

impl BluetoothDeviceAddress {
    /// Create an address from its non-significant, upper and lower address parts
    pub fn from_parts(nap: u16, uap: u8, lap: u32) -> Self {
        let nap = nap.to_be_bytes();

        let lap = lap.to_be_bytes();

        BluetoothDeviceAddress([nap[0], nap[1], uap, lap[1], lap[2], lap[3]])
    }

    /// The lower address part (24 bits)
    pub fn lap(&self) -> u32 {
        u32::from_be_bytes([0, self.0[3], self.0[4], self.0[5]])
    }
}

impl fmt::Display for BluetoothDeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let a = &self.0;

        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

impl fmt::Debug for BluetoothDeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Error for a malformed textual Bluetooth address
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AddressParseError;

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("expected a Bluetooth address of the form XX:XX:XX:XX:XX:XX")
    }
}

impl std::error::Error for AddressParseError {}

impl core::str::FromStr for BluetoothDeviceAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut address = [0u8; 6];

        let mut parts = s.split(':');

        for byte in address.iter_mut() {
            let part = parts.next().ok_or(AddressParseError)?;

            if part.len() != 2 {
                return Err(AddressParseError);
            }

            *byte = u8::from_str_radix(part, 16).map_err(|_| AddressParseError)?;
        }

        match parts.next() {
            None => Ok(BluetoothDeviceAddress(address)),
            Some(_) => Err(AddressParseError),
        }
    }
}

/// Class of Device
///
/// The 24 bit class of device field. A raw value of zero is reported by devices that do not set
/// their class, so it is kept as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassOfDevice {
    Class(u32),
    Unknown,
}

impl ClassOfDevice {
    /// Create a `ClassOfDevice` from the three little endian bytes of the field
    pub fn from_le_bytes(raw: [u8; 3]) -> Self {
        match raw {
            [0, 0, 0] => ClassOfDevice::Unknown,
            _ => ClassOfDevice::Class((raw[2] as u32) << 16 | (raw[1] as u32) << 8 | (raw[0] as u32)),
        }
    }

    /// Get the raw 24 bit value (zero for `Unknown`)
    pub fn get_raw(&self) -> u32 {
        match self {
            ClassOfDevice::Class(val) => *val,
            ClassOfDevice::Unknown => 0,
        }
    }

    /// The major device class (bits 8 to 12)
    pub fn major_device_class(&self) -> u8 {
        ((self.get_raw() >> 8) & 0x1F) as u8
    }
}

impl fmt::Display for ClassOfDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:06x}", self.get_raw())
    }
}
