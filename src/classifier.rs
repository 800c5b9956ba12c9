//! Response classification
//!
//! Every inbound PDU is classified into exactly one [`Response`]. Matching goes through the
//! [`PacketFilter`] facility; the predicates are registered once when the classifier is created and
//! then tested in a fixed order for every packet. The first predicate that matches decides how the
//! fields of the packet are read.
//!
//! All fields are read with length checks. A packet that matches a predicate but is too short for
//! the fixed fields of its category is an error (`PduError::RawDataTooSmall`) and is never indexed.

use crate::address::{BluetoothDeviceAddress, ClassOfDevice};
use crate::errors::ErrorCode;
use crate::filter::{PacketFilter, Predicate};
use crate::pdu::{self, ExtendedOpcode, Opcode, PduError};

/// A classified inbound PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `LMP_not_accepted` with the echoed opcode and the reason
    NotAccepted { opcode: u8, error: ErrorCode },
    /// `LMP_not_accepted_ext` with the echoed extended opcode and the reason
    NotAcceptedExt { extended_opcode: u8, error: ErrorCode },
    /// `LMP_accepted` with the echoed opcode
    Accepted { opcode: u8 },
    /// `LMP_features_res`
    FeaturesRes { features: [u8; 8] },
    /// `LMP_features_res_ext`
    FeaturesResExt {
        page: u8,
        max_page: u8,
        features: [u8; 8],
    },
    /// `LMP_name_res`
    ///
    /// `payload` is every byte after the name length field; how much of it belongs to the name
    /// fragment is decided by the reassembler from `acl_length`.
    NameRes {
        offset: u8,
        total: u8,
        acl_length: u16,
        payload: Vec<u8>,
    },
    /// `LMP_version_res`
    VersionRes {
        version: u8,
        company_id: u16,
        subversion: u16,
    },
    /// `LMP_ping_res`
    PingRes,
    /// An `LMP_encryption_key_size_req` initiated by the peer
    EncryptionKeySizeReq { key_size: u8 },
    /// An FHS packet
    Fhs {
        class: ClassOfDevice,
        address: BluetoothDeviceAddress,
    },
    /// A packet that matched none of the predicates
    Unclassified,
}

impl Response {
    /// The minimum number of bytes (from the start of the packet) a response of this kind is read
    /// from
    pub fn minimum_length(predicate: Predicate) -> usize {
        match predicate {
            Predicate::Opcode(Opcode::NotAccepted) => 7,
            Predicate::ExtendedOpcode(ExtendedOpcode::NotAcceptedExt) => 9,
            Predicate::Opcode(Opcode::Accepted) => 6,
            Predicate::Opcode(Opcode::FeaturesRes) => 13,
            Predicate::ExtendedOpcode(ExtendedOpcode::FeaturesResExt) => 16,
            Predicate::Opcode(Opcode::NameRes) => 7,
            Predicate::Opcode(Opcode::VersionRes) => 10,
            Predicate::ExtendedOpcode(ExtendedOpcode::PingRes) => 6,
            Predicate::Opcode(Opcode::EncryptionKeySizeReq) => 6,
            Predicate::Fhs => 16,
            _ => pdu::PAYLOAD_OFFSET,
        }
    }
}

/// The predicates of the classifier in the order they are tested
pub const CLASSIFIED: [Predicate; 10] = [
    Predicate::Opcode(Opcode::NotAccepted),
    Predicate::ExtendedOpcode(ExtendedOpcode::NotAcceptedExt),
    Predicate::Opcode(Opcode::Accepted),
    Predicate::Opcode(Opcode::FeaturesRes),
    Predicate::ExtendedOpcode(ExtendedOpcode::FeaturesResExt),
    Predicate::Opcode(Opcode::NameRes),
    Predicate::Fhs,
    Predicate::ExtendedOpcode(ExtendedOpcode::PingRes),
    Predicate::Opcode(Opcode::EncryptionKeySizeReq),
    Predicate::Opcode(Opcode::VersionRes),
];

/// Classifier of inbound PDUs
///
/// The classifier only holds the ids returned by the filter facility, the filter itself is passed
/// to [`classify`](ResponseClassifier::classify).
#[derive(Debug, Clone)]
pub struct ResponseClassifier<I> {
    predicates: Vec<(Predicate, I)>,
}

impl<I: Copy> ResponseClassifier<I> {
    /// Create a new `ResponseClassifier`
    ///
    /// Every predicate in [`CLASSIFIED`] is registered with `filter`.
    pub fn new<F>(filter: &mut F) -> Self
    where
        F: PacketFilter<Id = I>,
    {
        let predicates = CLASSIFIED
            .iter()
            .map(|predicate| (*predicate, filter.register(*predicate)))
            .collect();

        ResponseClassifier { predicates }
    }

    /// Classify a raw inbound PDU
    pub fn classify<F>(&self, filter: &F, raw: &[u8]) -> Result<Response, PduError>
    where
        F: PacketFilter<Id = I>,
    {
        match self.predicates.iter().find(|(_, id)| filter.matches(*id, raw)) {
            Some((predicate, _)) => decode(*predicate, raw),
            None => Ok(Response::Unclassified),
        }
    }
}

/// Read the fields of a packet that matched `predicate`
pub fn decode(predicate: Predicate, raw: &[u8]) -> Result<Response, PduError> {
    pdu::ensure_len(raw, Response::minimum_length(predicate))?;

    let response = match predicate {
        Predicate::Opcode(Opcode::NotAccepted) => Response::NotAccepted {
            opcode: pdu::read_u8(raw, 5)?,
            error: pdu::read_u8(raw, 6)?.into(),
        },
        Predicate::ExtendedOpcode(ExtendedOpcode::NotAcceptedExt) => Response::NotAcceptedExt {
            extended_opcode: pdu::read_u8(raw, 7)?,
            error: pdu::read_u8(raw, 8)?.into(),
        },
        Predicate::Opcode(Opcode::Accepted) => Response::Accepted {
            opcode: pdu::read_u8(raw, 5)?,
        },
        Predicate::Opcode(Opcode::FeaturesRes) => Response::FeaturesRes {
            features: pdu::read_field(raw, 5)?,
        },
        Predicate::ExtendedOpcode(ExtendedOpcode::FeaturesResExt) => Response::FeaturesResExt {
            page: pdu::read_u8(raw, 6)?,
            max_page: pdu::read_u8(raw, 7)?,
            features: pdu::read_field(raw, 8)?,
        },
        Predicate::Opcode(Opcode::NameRes) => Response::NameRes {
            offset: pdu::read_u8(raw, 5)?,
            total: pdu::read_u8(raw, 6)?,
            acl_length: pdu::acl_length(raw)?,
            payload: raw[7..].to_vec(),
        },
        Predicate::Opcode(Opcode::VersionRes) => Response::VersionRes {
            version: pdu::read_u8(raw, 5)?,
            company_id: u16::from_le_bytes(pdu::read_field(raw, 6)?),
            subversion: u16::from_le_bytes(pdu::read_field(raw, 8)?),
        },
        Predicate::ExtendedOpcode(ExtendedOpcode::PingRes) => Response::PingRes,
        Predicate::Opcode(Opcode::EncryptionKeySizeReq) => Response::EncryptionKeySizeReq {
            key_size: pdu::read_u8(raw, 5)?,
        },
        Predicate::Fhs => {
            let [nap_uap_0, nap_uap_1, nap_uap_2] = pdu::read_field::<3>(raw, 10)?;

            let lap = (u32::from_le_bytes(pdu::read_field(raw, 6)?) >> 2) & 0xFF_FFFF;

            let lap = lap.to_be_bytes();

            Response::Fhs {
                class: ClassOfDevice::from_le_bytes(pdu::read_field(raw, 13)?),
                address: BluetoothDeviceAddress([nap_uap_2, nap_uap_1, nap_uap_0, lap[1], lap[2], lap[3]]),
            }
        }
        _ => Response::Unclassified,
    };

    Ok(response)
}
