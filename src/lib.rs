//! Fingerprinting of Bluetooth BR/EDR devices through the Link Manager Protocol
//!
//! The link manager of a Bluetooth controller answers a set of LMP requests with information about
//! itself: the supported features (basic and extended pages), the LMP version with the company
//! identifier and sub-version, and the device name. Together these form a fingerprint of the
//! controller and its firmware. This library drives those requests from the LMP layer of a
//! connection, classifies every inbound PDU, and records everything learned to an append only log.
//!
//! Beyond the fingerprint, a set of experimental [probes](config::ProbeKind) can be enabled. These
//! check the peer for behavior that is suspicious or outright vulnerable, such as accepting a one
//! byte encryption key (KNOB), answering feature pages beyond its declared maximum, or answering an
//! `LMP_features_req` differently depending on the features of the requester.
//!
//! # Use
//! The library does not own the radio. A host gives a [`Fingerprinter`] the inbound PDUs of a
//! connection and asks it for the PDU to send at every transmit opportunity.
//!
//! 1. Create a [`Fingerprinter`] with a [`PacketFilter`](filter::PacketFilter), a
//!    [`ReportSink`](report::ReportSink), and a [`Config`](config::Config).
//! 2. Call [`start_session`](Fingerprinter::start_session) once a connection is established.
//! 3. At every transmit opportunity call [`next_request`](Fingerprinter::next_request).
//! 4. Hand every inbound PDU to [`receive`](Fingerprinter::receive).
//! 5. Call [`disconnected`](Fingerprinter::disconnected) when the connection goes down.
//!
//! The records can be read back with [`log_parse::parse_line`].

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod address;
pub mod auditor;
pub mod classifier;
pub mod completion;
pub mod config;
pub mod errors;
pub mod features;
pub mod filter;
pub mod fingerprinter;
pub mod log_parse;
pub mod name;
pub mod pdu;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod version;

pub use address::{BluetoothDeviceAddress, ClassOfDevice, ConnectionHandle};
pub use config::{Config, ProbeKind, ProbeSet};
pub use fingerprinter::{Fingerprinter, Transmit};
pub use session::{Event, Session};

use core::fmt;

/// The error of the fingerprinter
#[derive(Debug)]
pub enum Error {
    /// An inbound PDU was too short for its fields
    Pdu(pdu::PduError),
    /// An inbound name fragment was invalid
    Name(name::NameError),
    /// A retry limit was reached before the fingerprint was complete
    RetriesExhausted(scheduler::RetriesExhausted),
    /// The log record could not be written
    Sink(std::io::Error),
    /// There is no session for the connection handle
    UnknownSession(ConnectionHandle),
    /// A session already exists for the connection handle
    SessionExists(ConnectionHandle),
    /// The session stalled and never sends another request
    SessionStalled(ConnectionHandle),
    Config(config::ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Pdu(e) => write!(f, "invalid PDU: {}", e),
            Error::Name(e) => write!(f, "invalid name fragment: {}", e),
            Error::RetriesExhausted(e) => fmt::Display::fmt(e, f),
            Error::Sink(e) => write!(f, "failed to write the log record: {}", e),
            Error::UnknownSession(handle) => write!(f, "no session for connection handle {}", handle),
            Error::SessionExists(handle) => {
                write!(f, "a session already exists for connection handle {}", handle)
            }
            Error::SessionStalled(handle) => write!(f, "session {} stalled", handle),
            Error::Config(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Pdu(e) => Some(e),
            Error::Name(e) => Some(e),
            Error::RetriesExhausted(e) => Some(e),
            Error::Sink(e) => Some(e),
            Error::Config(e) => Some(e),
            Error::UnknownSession(_) | Error::SessionExists(_) | Error::SessionStalled(_) => None,
        }
    }
}

impl From<pdu::PduError> for Error {
    fn from(e: pdu::PduError) -> Self {
        Error::Pdu(e)
    }
}

impl From<name::NameError> for Error {
    fn from(e: name::NameError) -> Self {
        Error::Name(e)
    }
}

impl From<scheduler::RetriesExhausted> for Error {
    fn from(e: scheduler::RetriesExhausted) -> Self {
        Error::RetriesExhausted(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Sink(e)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e)
    }
}
