//! LMP PDU framing
//!
//! PDUs are handed to and from the radio with the baseband and ACL headers still attached. The
//! layout, from the start of the buffer, is
//!
//! | bytes | content |
//! |-------|---------|
//! | 0     | `LT_ADDR` (bits 0..3), baseband packet type (bits 3..7), flow (bit 7) |
//! | 1     | baseband header flags |
//! | 2..4  | `LLID` (bits 0..2), flow (bit 2), ACL payload length (bits 3..13) |
//! | 4     | transaction id (bit 0), opcode (bits 1..8) |
//! | 5     | extended opcode, only when the opcode is the escape opcode 127 |
//!
//! The payload follows the opcode byte, or the extended opcode byte for escaped PDUs. Reads of
//! fixed fields are always checked against the length of the buffer, see [`read_field`].
//!
//! Byte 5 of an escaped PDU is read whole as the extended opcode, not as a transaction id bit with
//! the extended opcode shifted above it. This is the encoding every outbound request is built
//! with and the one capture dissectors match `btbrlmp.eop` against.

pub mod request;

use core::fmt::{self, Display, Formatter};

/// The number of bytes of the baseband and ACL headers
pub const HEADER_SIZE: usize = 4;

/// Offset of the opcode byte
pub const OPCODE_OFFSET: usize = 4;

/// Offset of the first byte after the opcode
pub const PAYLOAD_OFFSET: usize = 5;

/// Offset of the first payload byte of an escaped (extended opcode) PDU
pub const EXTENDED_PAYLOAD_OFFSET: usize = 6;

/// The escape opcode that selects an extended opcode
pub const ESCAPE_OPCODE: u8 = 127;

/// Baseband packet type of an FHS packet
pub const FHS_PACKET_TYPE: u8 = 0x2;

/// LMP opcodes used by the fingerprinter
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum Opcode {
    NameReq,
    NameRes,
    Accepted,
    NotAccepted,
    EncryptionKeySizeReq,
    SwitchReq,
    VersionReq,
    VersionRes,
    FeaturesReq,
    FeaturesRes,
    Escape,
}

impl Opcode {
    /// Get the raw opcode value
    pub fn into_code(self) -> u8 {
        match self {
            Opcode::NameReq => 1,
            Opcode::NameRes => 2,
            Opcode::Accepted => 3,
            Opcode::NotAccepted => 4,
            Opcode::EncryptionKeySizeReq => 16,
            Opcode::SwitchReq => 19,
            Opcode::VersionReq => 37,
            Opcode::VersionRes => 38,
            Opcode::FeaturesReq => 39,
            Opcode::FeaturesRes => 40,
            Opcode::Escape => ESCAPE_OPCODE,
        }
    }

    /// Create an `Opcode` from the raw opcode value
    pub fn try_from_code(val: u8) -> Result<Self, UnknownOpcode> {
        match val {
            1 => Ok(Opcode::NameReq),
            2 => Ok(Opcode::NameRes),
            3 => Ok(Opcode::Accepted),
            4 => Ok(Opcode::NotAccepted),
            16 => Ok(Opcode::EncryptionKeySizeReq),
            19 => Ok(Opcode::SwitchReq),
            37 => Ok(Opcode::VersionReq),
            38 => Ok(Opcode::VersionRes),
            39 => Ok(Opcode::FeaturesReq),
            40 => Ok(Opcode::FeaturesRes),
            ESCAPE_OPCODE => Ok(Opcode::Escape),
            _ => Err(UnknownOpcode(val)),
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Opcode::NameReq => f.write_str("LMP_name_req"),
            Opcode::NameRes => f.write_str("LMP_name_res"),
            Opcode::Accepted => f.write_str("LMP_accepted"),
            Opcode::NotAccepted => f.write_str("LMP_not_accepted"),
            Opcode::EncryptionKeySizeReq => f.write_str("LMP_encryption_key_size_req"),
            Opcode::SwitchReq => f.write_str("LMP_switch_req"),
            Opcode::VersionReq => f.write_str("LMP_version_req"),
            Opcode::VersionRes => f.write_str("LMP_version_res"),
            Opcode::FeaturesReq => f.write_str("LMP_features_req"),
            Opcode::FeaturesRes => f.write_str("LMP_features_res"),
            Opcode::Escape => f.write_str("LMP escape"),
        }
    }
}

/// Extended LMP opcodes (the opcode following the escape opcode)
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum ExtendedOpcode {
    NotAcceptedExt,
    FeaturesReqExt,
    FeaturesResExt,
    PingReq,
    PingRes,
}

impl ExtendedOpcode {
    /// Get the raw extended opcode value
    pub fn into_code(self) -> u8 {
        match self {
            ExtendedOpcode::NotAcceptedExt => 2,
            ExtendedOpcode::FeaturesReqExt => 3,
            ExtendedOpcode::FeaturesResExt => 4,
            ExtendedOpcode::PingReq => 33,
            ExtendedOpcode::PingRes => 34,
        }
    }

    /// Create an `ExtendedOpcode` from the raw extended opcode value
    pub fn try_from_code(val: u8) -> Result<Self, UnknownOpcode> {
        match val {
            2 => Ok(ExtendedOpcode::NotAcceptedExt),
            3 => Ok(ExtendedOpcode::FeaturesReqExt),
            4 => Ok(ExtendedOpcode::FeaturesResExt),
            33 => Ok(ExtendedOpcode::PingReq),
            34 => Ok(ExtendedOpcode::PingRes),
            _ => Err(UnknownOpcode(val)),
        }
    }
}

impl Display for ExtendedOpcode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ExtendedOpcode::NotAcceptedExt => f.write_str("LMP_not_accepted_ext"),
            ExtendedOpcode::FeaturesReqExt => f.write_str("LMP_features_req_ext"),
            ExtendedOpcode::FeaturesResExt => f.write_str("LMP_features_res_ext"),
            ExtendedOpcode::PingReq => f.write_str("LMP_ping_req"),
            ExtendedOpcode::PingRes => f.write_str("LMP_ping_res"),
        }
    }
}

/// An opcode value that is not used by the fingerprinter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownOpcode(pub u8);

impl Display for UnknownOpcode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "unknown LMP opcode ({})", self.0)
    }
}

impl std::error::Error for UnknownOpcode {}

/// PDU Errors
///
/// These are errors that can occur when reading fields out of a raw PDU.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum PduError {
    /// Raw data is too small to contain the fields that were read
    RawDataTooSmall { required: usize, received: usize },
    /// The opcode is not one that can be classified
    UnknownOpcode(u8),
}

impl Display for PduError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            PduError::RawDataTooSmall { required, received } => write!(
                f,
                "raw data is too small for the PDU fields ({} bytes required, {} received)",
                required, received
            ),
            PduError::UnknownOpcode(op) => write!(f, "unknown LMP opcode ({})", op),
        }
    }
}

impl std::error::Error for PduError {}

impl From<UnknownOpcode> for PduError {
    fn from(e: UnknownOpcode) -> Self {
        PduError::UnknownOpcode(e.0)
    }
}

/// Make sure `raw` contains at least `required` bytes
pub fn ensure_len(raw: &[u8], required: usize) -> Result<(), PduError> {
    if raw.len() < required {
        Err(PduError::RawDataTooSmall {
            required,
            received: raw.len(),
        })
    } else {
        Ok(())
    }
}

/// Read a fixed size field at `offset`
///
/// The read is checked against the length of `raw`; a field that does not fit is an error and
/// nothing past the end of `raw` is ever indexed.
pub fn read_field<const N: usize>(raw: &[u8], offset: usize) -> Result<[u8; N], PduError> {
    ensure_len(raw, offset + N)?;

    let mut field = [0u8; N];

    field.copy_from_slice(&raw[offset..offset + N]);

    Ok(field)
}

/// Read a single byte at `offset`
pub fn read_u8(raw: &[u8], offset: usize) -> Result<u8, PduError> {
    read_field::<1>(raw, offset).map(|[b]| b)
}

/// The decoded baseband, ACL, and opcode headers of a PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHeader {
    /// Baseband packet type
    pub packet_type: u8,
    /// The payload length from the ACL header (this includes the opcode bytes)
    pub acl_length: u16,
    /// The transaction id bit
    pub transaction_id: bool,
    /// The (non-extended) opcode
    pub opcode: u8,
    /// The extended opcode if the opcode is the escape opcode
    pub extended_opcode: Option<u8>,
}

impl PduHeader {
    /// Read the header of a raw PDU
    pub fn try_from_raw(raw: &[u8]) -> Result<Self, PduError> {
        let opcode_byte = read_u8(raw, OPCODE_OFFSET)?;

        let opcode = opcode_byte >> 1;

        let extended_opcode = if opcode == ESCAPE_OPCODE {
            Some(read_u8(raw, PAYLOAD_OFFSET)?)
        } else {
            None
        };

        Ok(PduHeader {
            packet_type: packet_type(raw)?,
            acl_length: acl_length(raw)?,
            transaction_id: opcode_byte & 1 == 1,
            opcode,
            extended_opcode,
        })
    }
}

/// Get the baseband packet type of a raw packet
pub fn packet_type(raw: &[u8]) -> Result<u8, PduError> {
    read_u8(raw, 0).map(|b| (b >> 3) & 0xF)
}

/// Get the ACL payload length of a raw packet
pub fn acl_length(raw: &[u8]) -> Result<u16, PduError> {
    read_field::<2>(raw, 2).map(|field| (u16::from_le_bytes(field) >> 3) & 0x3FF)
}
