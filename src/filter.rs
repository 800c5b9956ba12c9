//! Packet filter facility
//!
//! Classification of inbound packets goes through a filter facility: every [`Predicate`] the
//! classifier cares about is registered once, and each inbound packet is then tested against the
//! registered predicates by id. Capture hardware usually comes with its own dissector based filter
//! engine, which is adapted by implementing [`PacketFilter`] and registering
//! [`Predicate::expression`] with it.
//!
//! [`HeaderFilter`] is a filter that evaluates the predicates directly from the fixed header
//! offsets of the packet, for hosts without a dissector.

use crate::pdu::{self, ExtendedOpcode, Opcode, PduHeader};
use core::fmt;

/// A named boolean predicate over the content of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// The baseband packet is an FHS packet
    Fhs,
    /// The packet is an LMP PDU with this opcode
    Opcode(Opcode),
    /// The packet is an escaped LMP PDU with this extended opcode
    ExtendedOpcode(ExtendedOpcode),
}

impl Predicate {
    /// The name the predicate is registered under
    pub fn name(&self) -> &'static str {
        match self {
            Predicate::Fhs => "fhs",
            Predicate::Opcode(Opcode::Accepted) => "lmp_accepted",
            Predicate::Opcode(Opcode::NotAccepted) => "lmp_not_accepted",
            Predicate::Opcode(Opcode::FeaturesReq) => "lmp_features_req",
            Predicate::Opcode(Opcode::FeaturesRes) => "lmp_features_res",
            Predicate::Opcode(Opcode::VersionReq) => "lmp_version_req",
            Predicate::Opcode(Opcode::VersionRes) => "lmp_version_res",
            Predicate::Opcode(Opcode::NameReq) => "lmp_name_req",
            Predicate::Opcode(Opcode::NameRes) => "lmp_name_res",
            Predicate::Opcode(Opcode::SwitchReq) => "lmp_switch_req",
            Predicate::Opcode(Opcode::EncryptionKeySizeReq) => "lmp_encryption_key_size_req",
            Predicate::Opcode(Opcode::Escape) => "lmp_escape",
            Predicate::ExtendedOpcode(ExtendedOpcode::NotAcceptedExt) => "lmp_not_accepted_ext",
            Predicate::ExtendedOpcode(ExtendedOpcode::FeaturesReqExt) => "lmp_features_req_ext",
            Predicate::ExtendedOpcode(ExtendedOpcode::FeaturesResExt) => "lmp_features_res_ext",
            Predicate::ExtendedOpcode(ExtendedOpcode::PingReq) => "lmp_ping_req",
            Predicate::ExtendedOpcode(ExtendedOpcode::PingRes) => "lmp_ping_res",
        }
    }

    /// The predicate as a dissector filter expression
    pub fn expression(&self) -> String {
        match self {
            Predicate::Fhs => format!("btbbd.type == 0x{:x}", pdu::FHS_PACKET_TYPE),
            Predicate::Opcode(op) => format!("btbrlmp.op == {}", op.into_code()),
            Predicate::ExtendedOpcode(eop) => format!(
                "btbrlmp.op == {} && btbrlmp.eop == {}",
                pdu::ESCAPE_OPCODE,
                eop.into_code()
            ),
        }
    }

    /// Evaluate the predicate from the fixed header offsets of a raw packet
    ///
    /// A packet too short to contain the tested header fields never matches.
    pub fn evaluate(&self, packet: &[u8]) -> bool {
        match self {
            Predicate::Fhs => pdu::packet_type(packet).map_or(false, |t| t == pdu::FHS_PACKET_TYPE),
            Predicate::Opcode(op) => PduHeader::try_from_raw(packet).map_or(false, |header| {
                header.packet_type != pdu::FHS_PACKET_TYPE && header.opcode == op.into_code()
            }),
            Predicate::ExtendedOpcode(eop) => PduHeader::try_from_raw(packet).map_or(false, |header| {
                header.packet_type != pdu::FHS_PACKET_TYPE && header.extended_opcode == Some(eop.into_code())
            }),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.expression())
    }
}

/// The filter facility consumed by the classifier
pub trait PacketFilter {
    /// Identifier of a registered predicate
    type Id: Copy;

    /// Register a predicate
    ///
    /// This is called once per predicate when the fingerprinter is created.
    fn register(&mut self, predicate: Predicate) -> Self::Id;

    /// Test a packet against a registered predicate
    fn matches(&self, id: Self::Id, packet: &[u8]) -> bool;
}

/// A filter evaluating predicates from the fixed header offsets of the packet
#[derive(Debug, Default, Clone)]
pub struct HeaderFilter {
    predicates: Vec<Predicate>,
}

impl HeaderFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacketFilter for HeaderFilter {
    type Id = usize;

    fn register(&mut self, predicate: Predicate) -> usize {
        log::trace!("(LMP) registering filter {}", predicate);

        self.predicates.push(predicate);

        self.predicates.len() - 1
    }

    fn matches(&self, id: usize, packet: &[u8]) -> bool {
        self.predicates
            .get(id)
            .map_or(false, |predicate| predicate.evaluate(packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expressions() {
        assert_eq!("btbbd.type == 0x2", Predicate::Fhs.expression());

        assert_eq!("btbrlmp.op == 3", Predicate::Opcode(Opcode::Accepted).expression());

        assert_eq!(
            "btbrlmp.op == 127 && btbrlmp.eop == 4",
            Predicate::ExtendedOpcode(ExtendedOpcode::FeaturesResExt).expression()
        );
    }

    #[test]
    fn header_filter_matches_by_id() {
        let mut filter = HeaderFilter::new();

        let accepted = filter.register(Predicate::Opcode(Opcode::Accepted));

        let ping_res = filter.register(Predicate::ExtendedOpcode(ExtendedOpcode::PingRes));

        let fhs = filter.register(Predicate::Fhs);

        let accepted_pdu = [0x99, 0x03, 0x17, 0x00, 0x06, 0x10];

        let ping_res_pdu = [0x99, 0x03, 0x17, 0x00, 0xfe, 0x22];

        assert!(filter.matches(accepted, &accepted_pdu));

        assert!(!filter.matches(ping_res, &accepted_pdu));

        assert!(filter.matches(ping_res, &ping_res_pdu));

        assert!(!filter.matches(accepted, &ping_res_pdu));

        assert!(!filter.matches(fhs, &accepted_pdu));

        assert!(filter.matches(fhs, &[0x10, 0, 0, 0]));

        // unregistered id
        assert!(!filter.matches(99, &accepted_pdu));
    }

    #[test]
    fn short_packets_never_match() {
        assert!(!Predicate::Opcode(Opcode::Accepted).evaluate(&[0x99, 0x03, 0x17]));

        assert!(!Predicate::ExtendedOpcode(ExtendedOpcode::PingRes).evaluate(&[0x99, 0x03, 0x17, 0x00, 0xfe]));

        assert!(!Predicate::Fhs.evaluate(&[]));
    }
}
