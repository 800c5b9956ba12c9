//! Findings and the log record
//!
//! Everything learned about a peer is recorded as a [`Finding`]. Findings are written to a
//! [`ReportSink`] as tagged text lines of the form `<prefix> <TAG> <value>`, the same record format
//! post-processing tools read back (see [`log_parse`](crate::log_parse)). The record is append only.
//!
//! Byte values are written as `0xNN` tokens separated by spaces. A device name is written twice,
//! once as bytes and once as text with its control characters escaped.

use crate::address::{BluetoothDeviceAddress, ClassOfDevice};
use crate::config::ProbeSet;
use crate::pdu::{ExtendedOpcode, ESCAPE_OPCODE};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// The tag of a name record
pub const NAME_TAG: &str = "LMP_OP_0x02";
/// The tag of a rejection record
pub const NOT_ACCEPTED_TAG: &str = "LMP_OP_0x04";
/// The tag of a version record
pub const VERSION_TAG: &str = "LMP_OP_0x26";
/// The tag of a basic features record
pub const FEATURES_TAG: &str = "LMP_OP_0x28";
/// The tag of an escaped opcode record
pub const EXTENDED_TAG: &str = "LMP_OP_0x7F";
/// The tag of a ping record
pub const PING_TAG: &str = "LMP_OP_0xFE";
/// The tag of a peer encryption key size request
pub const KEY_SIZE_TAG: &str = "LMP_OP_0x10";
pub const CLASS_OF_DEVICE_TAG: &str = "CLASS_OF_DEVICE";
pub const ADDRESS_TAG: &str = "REMOTE_BDADDR";
pub const COMMENT_TAG: &str = "COMMENT";
pub const NEW_RUN: &str = "NEW RUN";
pub const LOG_ENTRY: &str = "LOG ENTRY FOR BDADDR:";
pub const ALL_RESPONSES_RECEIVED: &str = "ALL RESPONSES RECEIVED";
pub const FINGERPRINT_INCOMPLETE: &str = "FINGERPRINT INCOMPLETE";

pub const WEAK_KEY_ACCEPTED: &str = "KNOB: ACCEPTED 1 BYTE KEY PROPOSAL";
pub const WEAK_KEY_TEARDOWN: &str = "KNOB: CONNECTION TORN DOWN AFTER ACCEPTING 1 BYTE KEY PROPOSAL (LOWERED CONFIDENCE)";
pub const REQUEST_INDEPENDENT: &str =
    "LMP_FEATURES_RES: RESPONSE DOESN'T DIFFER BASED ON SENDER'S LMP_FEATURES_REQ";
pub const REQUEST_DEPENDENT: &str =
    "LMP_FEATURES_RES: FOUND DEVICE THAT RESPONDS DIFFERENTLY DEPENDING ON SENDER'S LMP_FEATURES_REQ";

/// A structured finding about a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// A new run of the fingerprinter started
    NewRun,
    /// A session started for a peer with a known address
    LogEntry { address: BluetoothDeviceAddress },
    /// The name of the peer
    Name { raw: Vec<u8> },
    /// The peer rejected a request
    NotAccepted { opcode: u8, error: u8 },
    /// The peer rejected an escaped request
    NotAcceptedExt { extended_opcode: u8, error: u8 },
    /// The version information of the peer
    Version {
        version: u8,
        company_id: u16,
        subversion: u16,
    },
    /// The basic features of the peer
    Features { features: [u8; 8] },
    /// A page of extended features
    ExtendedFeatures {
        page: u8,
        max_page: u8,
        features: [u8; 8],
    },
    /// The class of device from an FHS packet
    ClassOfDevice(ClassOfDevice),
    /// The address from an FHS packet
    Address(BluetoothDeviceAddress),
    /// The peer answered an `LMP_ping_req`
    PingResponse,
    /// The peer requested an encryption key size
    PeerKeySizeRequest { key_size: u8 },
    /// The peer accepted a one byte encryption key
    WeakKeyAccepted,
    /// The connection ended after the peer accepted a one byte encryption key
    WeakKeyTeardown,
    /// The features response does not depend on the requester's features
    RequestIndependent,
    /// The features response depends on the requester's features
    RequestDependent { baseline: [u8; 8], probe: [u8; 8] },
    /// A non-zero value for an extended features page beyond the declared maximum
    InfoLeak {
        page: u8,
        value: u64,
        confirmations: u32,
        mismatches: u32,
    },
    /// Experimental probing began
    ExperimentalChecks(ProbeSet),
    /// Every mandatory response was received
    Complete,
    /// The session ended before every mandatory response was received
    Incomplete,
}

fn hex_bytes<'a, I>(bytes: I) -> String
where
    I: IntoIterator<Item = &'a u8>,
{
    bytes
        .into_iter()
        .map(|b| format!("0x{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The text of a name as a single record line
///
/// Control characters are escaped so a name sent by the peer can never break the record into more
/// lines.
fn printable(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .chars()
        .map(|c| {
            if c.is_control() {
                c.escape_default().to_string()
            } else {
                c.to_string()
            }
        })
        .collect()
}

impl Finding {
    /// The record lines of the finding (without the prefix)
    pub fn lines(&self) -> Vec<String> {
        match self {
            Finding::NewRun => vec![NEW_RUN.to_string()],
            Finding::LogEntry { address } => vec![format!("{} {}", LOG_ENTRY, address)],
            Finding::Name { raw } => vec![
                format!("{} {}", NAME_TAG, hex_bytes(raw)),
                format!("{} {}", NAME_TAG, printable(raw)),
            ],
            Finding::NotAccepted { opcode, error } => {
                vec![format!("{} {}", NOT_ACCEPTED_TAG, hex_bytes(&[*opcode, *error]))]
            }
            Finding::NotAcceptedExt { extended_opcode, error } => vec![format!(
                "{} {}",
                EXTENDED_TAG,
                hex_bytes(&[
                    ExtendedOpcode::NotAcceptedExt.into_code(),
                    ESCAPE_OPCODE,
                    *extended_opcode,
                    *error
                ])
            )],
            Finding::Version {
                version,
                company_id,
                subversion,
            } => {
                let company_id = company_id.to_le_bytes();

                let subversion = subversion.to_le_bytes();

                vec![format!(
                    "{} {}",
                    VERSION_TAG,
                    hex_bytes(&[*version, company_id[0], company_id[1], subversion[0], subversion[1]])
                )]
            }
            Finding::Features { features } => vec![format!("{} {}", FEATURES_TAG, hex_bytes(features))],
            Finding::ExtendedFeatures {
                page,
                max_page,
                features,
            } => vec![format!(
                "{} {} {}",
                EXTENDED_TAG,
                hex_bytes(&[ExtendedOpcode::FeaturesResExt.into_code(), *page, *max_page]),
                hex_bytes(features)
            )],
            Finding::ClassOfDevice(class) => vec![format!("{} {}", CLASS_OF_DEVICE_TAG, class)],
            Finding::Address(address) => vec![format!("{} {}", ADDRESS_TAG, address)],
            // readers of the record match on this literal value
            Finding::PingResponse => vec![format!("{} 0x34", PING_TAG)],
            Finding::PeerKeySizeRequest { key_size } => vec![format!(
                "{} {}",
                KEY_SIZE_TAG,
                hex_bytes(&[*key_size])
            )],
            Finding::WeakKeyAccepted => vec![format!("{}: {}", COMMENT_TAG, WEAK_KEY_ACCEPTED)],
            Finding::WeakKeyTeardown => vec![format!("{}: {}", COMMENT_TAG, WEAK_KEY_TEARDOWN)],
            Finding::RequestIndependent => vec![format!("{} {}", COMMENT_TAG, REQUEST_INDEPENDENT)],
            Finding::RequestDependent { baseline, probe } => vec![
                format!("{} {}", COMMENT_TAG, REQUEST_DEPENDENT),
                format!(
                    "{} LMP_FEATURES_RES: BASELINE {} PROBE {}",
                    COMMENT_TAG,
                    hex_bytes(baseline),
                    hex_bytes(probe)
                ),
            ],
            Finding::InfoLeak {
                page,
                value,
                confirmations,
                mismatches,
            } => vec![format!(
                "{} POSSIBLE INFO LEAK: EXT PAGE 0x{:02X} = 0x{:016X} CONFIRMATIONS {} MISMATCHES {}",
                COMMENT_TAG, page, value, confirmations, mismatches
            )],
            Finding::ExperimentalChecks(probes) => {
                vec![format!("{} BEGINNING EXPERIMENTAL CHECKS: {}", COMMENT_TAG, probes)]
            }
            Finding::Complete => vec![ALL_RESPONSES_RECEIVED.to_string()],
            Finding::Incomplete => vec![FINGERPRINT_INCOMPLETE.to_string()],
        }
    }
}

/// The append only log record
pub trait ReportSink {
    /// Append one line to the record
    fn append(&mut self, line: &str) -> io::Result<()>;
}

/// A log record kept within a file
///
/// The file is opened in append mode, so earlier runs are never overwritten.
#[derive(Debug)]
pub struct LogFileSink {
    file: File,
}

impl LogFileSink {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(LogFileSink { file })
    }
}

impl ReportSink for LogFileSink {
    fn append(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.file, "{}", line)?;

        self.file.flush()
    }
}

/// A log record kept in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Vec<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Check if any line contains `pattern`
    pub fn contains(&self, pattern: &str) -> bool {
        self.lines.iter().any(|line| line.contains(pattern))
    }
}

impl ReportSink for MemorySink {
    fn append(&mut self, line: &str) -> io::Result<()> {
        self.lines.push(line.to_string());

        Ok(())
    }
}

impl<S: ReportSink + ?Sized> ReportSink for Box<S> {
    fn append(&mut self, line: &str) -> io::Result<()> {
        (**self).append(line)
    }
}

/// Writer of findings to a sink
#[derive(Debug)]
pub struct Reporter<S> {
    sink: S,
    prefix: String,
}

impl<S: ReportSink> Reporter<S> {
    pub fn new(sink: S, prefix: impl Into<String>) -> Self {
        Reporter {
            sink,
            prefix: prefix.into(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Append the lines of a finding to the record
    pub fn record(&mut self, finding: &Finding) -> io::Result<()> {
        for line in finding.lines() {
            self.sink.append(&format!("{} {}", self.prefix, line))?;
        }

        Ok(())
    }
}
