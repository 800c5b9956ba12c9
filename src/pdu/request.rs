//! Outbound LMP requests
//!
//! Every request is built into a freshly allocated buffer from the values carried by [`Request`].
//! Nothing is shared between two built PDUs, so a page number or name offset that changes between
//! two requests is only ever a parameter of the next build.

use super::{ExtendedOpcode, Opcode, ESCAPE_OPCODE};
use core::fmt;
use serde::{Deserialize, Serialize};

/// Feature mask advertised by the basic `LMP_features_req`
///
/// This is a typical feature set observed from real devices.
pub const DEFAULT_FEATURES_MASK: [u8; 8] = [0xbf, 0xee, 0xcd, 0xfe, 0xdb, 0xff, 0x7b, 0x87];

/// Feature mask advertised by `LMP_features_req_ext`
pub const DEFAULT_EXTENDED_FEATURES_MASK: [u8; 8] = [0x0b, 0, 0, 0, 0, 0, 0, 0];

/// The maximum page advertised in a (well formed) `LMP_features_req_ext`
pub const DEFAULT_MAX_FEATURES_PAGE: u8 = 2;

/// The proposed key size of the encryption key size probe
pub const WEAK_KEY_SIZE: u8 = 1;

/// The switch instant used by the role switch probe
pub const DEFAULT_SWITCH_INSTANT: u32 = 0x0000_FFFF;

/// Version information advertised in an `LMP_version_req`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionParameters {
    pub version: u8,
    pub company_id: u16,
    pub subversion: u16,
}

impl Default for VersionParameters {
    fn default() -> Self {
        VersionParameters {
            version: 0x13,
            company_id: 0x0060,
            subversion: 0x030e,
        }
    }
}

/// The category of a request
///
/// Request counters are kept per category. Malformed variants of a request are their own
/// category so that probing never consumes the budget of the well formed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKind {
    Features,
    FeaturesExt,
    Name,
    Version,
    MalformedFeatures,
    MalformedFeaturesExt,
    Switch,
    EncryptionKeySize,
    Ping,
}

impl RequestKind {
    pub const ALL: [RequestKind; 9] = [
        RequestKind::Features,
        RequestKind::FeaturesExt,
        RequestKind::Name,
        RequestKind::Version,
        RequestKind::MalformedFeatures,
        RequestKind::MalformedFeaturesExt,
        RequestKind::Switch,
        RequestKind::EncryptionKeySize,
        RequestKind::Ping,
    ];

    /// The opcode a peer echoes back within `LMP_accepted` or `LMP_not_accepted`
    pub fn opcode(self) -> Opcode {
        match self {
            RequestKind::Features | RequestKind::MalformedFeatures => Opcode::FeaturesReq,
            RequestKind::Name => Opcode::NameReq,
            RequestKind::Version => Opcode::VersionReq,
            RequestKind::Switch => Opcode::SwitchReq,
            RequestKind::EncryptionKeySize => Opcode::EncryptionKeySizeReq,
            RequestKind::FeaturesExt | RequestKind::MalformedFeaturesExt | RequestKind::Ping => {
                Opcode::Escape
            }
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RequestKind::Features => f.write_str("LMP_features_req"),
            RequestKind::FeaturesExt => f.write_str("LMP_features_req_ext"),
            RequestKind::Name => f.write_str("LMP_name_req"),
            RequestKind::Version => f.write_str("LMP_version_req"),
            RequestKind::MalformedFeatures => f.write_str("malformed LMP_features_req"),
            RequestKind::MalformedFeaturesExt => f.write_str("malformed LMP_features_req_ext"),
            RequestKind::Switch => f.write_str("LMP_switch_req"),
            RequestKind::EncryptionKeySize => f.write_str("LMP_encryption_key_size_req"),
            RequestKind::Ping => f.write_str("LMP_ping_req"),
        }
    }
}

/// An outbound LMP request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// `LMP_features_req` with the feature mask of this device
    Features { mask: [u8; 8] },
    /// `LMP_features_req_ext` for one feature page
    FeaturesExt { page: u8, max_page: u8, mask: [u8; 8] },
    /// `LMP_name_req` starting at `offset`
    Name { offset: u8 },
    /// `LMP_version_req`
    Version(VersionParameters),
    /// `LMP_features_req` with every bit set, including the reserved ones
    MalformedFeatures,
    /// `LMP_features_req_ext` claiming 255 pages of features with every bit set
    MalformedFeaturesExt { page: u8 },
    /// `LMP_switch_req` at a switch instant
    Switch { instant: u32 },
    /// `LMP_encryption_key_size_req` proposing `key_size` bytes
    EncryptionKeySize { key_size: u8 },
    /// `LMP_ping_req`
    Ping,
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Features { .. } => RequestKind::Features,
            Request::FeaturesExt { .. } => RequestKind::FeaturesExt,
            Request::Name { .. } => RequestKind::Name,
            Request::Version(_) => RequestKind::Version,
            Request::MalformedFeatures => RequestKind::MalformedFeatures,
            Request::MalformedFeaturesExt { .. } => RequestKind::MalformedFeaturesExt,
            Request::Switch { .. } => RequestKind::Switch,
            Request::EncryptionKeySize { .. } => RequestKind::EncryptionKeySize,
            Request::Ping => RequestKind::Ping,
        }
    }

    /// The two leading baseband header bytes
    fn baseband_header(&self) -> [u8; 2] {
        match self {
            Request::Version(_) => [0x19, 0x00],
            Request::Switch { .. } => [0x99, 0x02],
            _ => [0x99, 0x03],
        }
    }

    fn transaction_id(&self) -> bool {
        matches!(self, Request::Switch { .. })
    }

    /// Build the PDU (with baseband and ACL headers) for this request
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(16);

        let opcode = |op: Opcode| op.into_code() << 1 | self.transaction_id() as u8;

        match *self {
            Request::Features { mask } => {
                body.push(opcode(Opcode::FeaturesReq));
                body.extend_from_slice(&mask);
            }
            Request::FeaturesExt { page, max_page, mask } => {
                body.push(ESCAPE_OPCODE << 1);
                body.push(ExtendedOpcode::FeaturesReqExt.into_code());
                body.push(page);
                body.push(max_page);
                body.extend_from_slice(&mask);
            }
            Request::Name { offset } => {
                body.push(opcode(Opcode::NameReq));
                body.push(offset);
            }
            Request::Version(parameters) => {
                body.push(opcode(Opcode::VersionReq));
                body.push(parameters.version);
                body.extend_from_slice(&parameters.company_id.to_le_bytes());
                body.extend_from_slice(&parameters.subversion.to_le_bytes());
            }
            Request::MalformedFeatures => {
                body.push(opcode(Opcode::FeaturesReq));
                body.extend_from_slice(&[0xff; 8]);
            }
            Request::MalformedFeaturesExt { page } => {
                body.push(ESCAPE_OPCODE << 1);
                body.push(ExtendedOpcode::FeaturesReqExt.into_code());
                body.push(page);
                body.push(0xff);
                body.extend_from_slice(&[0xff; 8]);
            }
            Request::Switch { instant } => {
                body.push(opcode(Opcode::SwitchReq));
                body.extend_from_slice(&instant.to_le_bytes());
            }
            Request::EncryptionKeySize { key_size } => {
                body.push(opcode(Opcode::EncryptionKeySizeReq));
                body.push(key_size);
            }
            Request::Ping => {
                body.push(ESCAPE_OPCODE << 1);
                body.push(ExtendedOpcode::PingReq.into_code());
            }
        }

        // LLID for LMP is 0b11 and the flow bit is always set
        let acl_header = ((body.len() as u16) << 3 | 0x7).to_le_bytes();

        let mut pdu = Vec::with_capacity(super::HEADER_SIZE + body.len());

        pdu.extend_from_slice(&self.baseband_header());

        pdu.extend_from_slice(&acl_header);

        pdu.extend_from_slice(&body);

        pdu
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Request::FeaturesExt { page, .. } | Request::MalformedFeaturesExt { page } => {
                write!(f, "{} (page {})", self.kind(), page)
            }
            Request::Name { offset } => write!(f, "{} (offset {})", self.kind(), offset),
            _ => fmt::Display::fmt(&self.kind(), f),
        }
    }
}
