//! Reader of the log record
//!
//! This turns the lines written by the [`Reporter`](crate::report::Reporter) back into typed
//! [`Record`]s for post-processing. Lines are parsed one at a time and a line that does not start
//! with the record prefix is an error, so callers reading a shared log file can skip foreign lines
//! by ignoring [`ParseError::MissingPrefix`].

use crate::address::{AddressParseError, BluetoothDeviceAddress, ClassOfDevice};
use crate::errors::ErrorCode;
use crate::pdu::ExtendedOpcode;
use crate::report::{
    ADDRESS_TAG, ALL_RESPONSES_RECEIVED, CLASS_OF_DEVICE_TAG, COMMENT_TAG, EXTENDED_TAG, FEATURES_TAG,
    FINGERPRINT_INCOMPLETE, KEY_SIZE_TAG, LOG_ENTRY, NAME_TAG, NEW_RUN, NOT_ACCEPTED_TAG, PING_TAG, VERSION_TAG,
};
use crate::version::{LmpVersion, UnknownVersion};
use core::fmt;

/// A parsed line of the log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    NewRun,
    LogEntry(BluetoothDeviceAddress),
    /// The bytes of the device name
    NameBytes(Vec<u8>),
    /// The device name as text
    NameText(String),
    NotAccepted {
        opcode: u8,
        error: ErrorCode,
    },
    NotAcceptedExt {
        extended_opcode: u8,
        error: ErrorCode,
    },
    Version {
        version: u8,
        company_id: u16,
        subversion: u16,
    },
    Features([u8; 8]),
    ExtendedFeatures {
        page: u8,
        max_page: u8,
        features: [u8; 8],
    },
    ClassOfDevice(ClassOfDevice),
    Address(BluetoothDeviceAddress),
    PingResponse,
    PeerKeySizeRequest(u8),
    Comment(String),
    Complete,
    Incomplete,
}

impl Record {
    /// The LMP version of a version record
    pub fn lmp_version(&self) -> Option<Result<LmpVersion, UnknownVersion>> {
        match self {
            Record::Version { version, .. } => Some(LmpVersion::try_from_raw(*version)),
            _ => None,
        }
    }
}

/// Error for a line that is not a valid record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line does not start with the record prefix
    MissingPrefix,
    UnknownTag(String),
    /// A byte token is not of the form `0xNN`
    MalformedByte(String),
    ByteCount {
        expected: usize,
        received: usize,
    },
    MalformedAddress(AddressParseError),
    MalformedClassOfDevice(String),
    /// The bytes are well formed but do not form a known record
    UnexpectedValue(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::MissingPrefix => f.write_str("line does not start with the record prefix"),
            ParseError::UnknownTag(tag) => write!(f, "unknown record tag '{}'", tag),
            ParseError::MalformedByte(token) => write!(f, "malformed byte token '{}'", token),
            ParseError::ByteCount { expected, received } => {
                write!(f, "expected {} bytes within the record, found {}", expected, received)
            }
            ParseError::MalformedAddress(e) => fmt::Display::fmt(e, f),
            ParseError::MalformedClassOfDevice(value) => write!(f, "malformed class of device '{}'", value),
            ParseError::UnexpectedValue(value) => write!(f, "unexpected record value '{}'", value),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<AddressParseError> for ParseError {
    fn from(e: AddressParseError) -> Self {
        ParseError::MalformedAddress(e)
    }
}

fn parse_byte(token: &str) -> Result<u8, ParseError> {
    let malformed = || ParseError::MalformedByte(token.to_string());

    let digits = token.strip_prefix("0x").ok_or_else(malformed)?;

    if digits.len() != 2 || !digits.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)) {
        return Err(malformed());
    }

    u8::from_str_radix(digits, 16).map_err(|_| malformed())
}

fn parse_bytes(value: &str) -> Result<Vec<u8>, ParseError> {
    value.split_ascii_whitespace().map(parse_byte).collect()
}

fn parse_array<const N: usize>(value: &str) -> Result<[u8; N], ParseError> {
    let bytes = parse_bytes(value)?;

    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| ParseError::ByteCount {
        expected: N,
        received: bytes.len(),
    })
}

fn parse_class_of_device(value: &str) -> Result<ClassOfDevice, ParseError> {
    let malformed = || ParseError::MalformedClassOfDevice(value.to_string());

    let digits = value.strip_prefix("0x").ok_or_else(malformed)?;

    if digits.len() != 6 {
        return Err(malformed());
    }

    let raw = u32::from_str_radix(digits, 16).map_err(|_| malformed())?;

    let [b0, b1, b2, _] = raw.to_le_bytes();

    Ok(ClassOfDevice::from_le_bytes([b0, b1, b2]))
}

fn parse_extended(value: &str) -> Result<Record, ParseError> {
    let bytes = parse_bytes(value)?;

    let features_res_ext = ExtendedOpcode::FeaturesResExt.into_code();

    let not_accepted_ext = ExtendedOpcode::NotAcceptedExt.into_code();

    match bytes.first() {
        Some(op) if *op == features_res_ext => {
            let fields: [u8; 11] = parse_array(value)?;

            let mut features = [0u8; 8];

            features.copy_from_slice(&fields[3..]);

            Ok(Record::ExtendedFeatures {
                page: fields[1],
                max_page: fields[2],
                features,
            })
        }
        Some(op) if *op == not_accepted_ext => {
            let [_, _, extended_opcode, error]: [u8; 4] = parse_array(value)?;

            Ok(Record::NotAcceptedExt {
                extended_opcode,
                error: error.into(),
            })
        }
        _ => Err(ParseError::UnexpectedValue(value.to_string())),
    }
}

/// Parse one line of the log record
///
/// `prefix` is the record prefix the log was written with (see
/// [`Config::log_prefix`](crate::config::Config::log_prefix)).
pub fn parse_line(line: &str, prefix: &str) -> Result<Record, ParseError> {
    let body = line
        .trim_end()
        .strip_prefix(prefix)
        .ok_or(ParseError::MissingPrefix)?
        .trim_start();

    match body {
        NEW_RUN => return Ok(Record::NewRun),
        ALL_RESPONSES_RECEIVED => return Ok(Record::Complete),
        FINGERPRINT_INCOMPLETE => return Ok(Record::Incomplete),
        _ => (),
    }

    if let Some(address) = body.strip_prefix(LOG_ENTRY) {
        return Ok(Record::LogEntry(address.trim().parse()?));
    }

    let (tag, value) = body.split_once(' ').unwrap_or((body, ""));

    let value = value.trim();

    match tag.trim_end_matches(':') {
        // the name is written both as bytes and as text
        NAME_TAG => match parse_bytes(value) {
            Ok(bytes) if !bytes.is_empty() => Ok(Record::NameBytes(bytes)),
            _ => Ok(Record::NameText(value.to_string())),
        },
        NOT_ACCEPTED_TAG => {
            let [opcode, error]: [u8; 2] = parse_array(value)?;

            Ok(Record::NotAccepted {
                opcode,
                error: error.into(),
            })
        }
        VERSION_TAG => {
            let [version, c0, c1, s0, s1]: [u8; 5] = parse_array(value)?;

            Ok(Record::Version {
                version,
                company_id: u16::from_le_bytes([c0, c1]),
                subversion: u16::from_le_bytes([s0, s1]),
            })
        }
        FEATURES_TAG => Ok(Record::Features(parse_array(value)?)),
        EXTENDED_TAG => parse_extended(value),
        PING_TAG => {
            let [op]: [u8; 1] = parse_array(value)?;

            if op == 0x34 {
                Ok(Record::PingResponse)
            } else {
                Err(ParseError::UnexpectedValue(value.to_string()))
            }
        }
        KEY_SIZE_TAG => {
            let [key_size]: [u8; 1] = parse_array(value)?;

            Ok(Record::PeerKeySizeRequest(key_size))
        }
        CLASS_OF_DEVICE_TAG => Ok(Record::ClassOfDevice(parse_class_of_device(value)?)),
        ADDRESS_TAG => Ok(Record::Address(value.parse()?)),
        COMMENT_TAG => Ok(Record::Comment(value.to_string())),
        _ => Err(ParseError::UnknownTag(tag.to_string())),
    }
}
