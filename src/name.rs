//! Device name reassembly
//!
//! A device name is requested with `LMP_name_req` carrying an offset into the name, and the peer
//! answers with an `LMP_name_res` carrying the same offset, the total length of the name, and up to
//! [`MAX_CHUNK`] bytes of the name. Names longer than a single chunk are put back together within a
//! [`NameBuffer`] by the [`NameReassembler`].

use core::fmt;

/// The capacity of a name buffer
pub const NAME_CAPACITY: usize = 256;

/// The maximum number of name bytes within a single `LMP_name_res`
pub const MAX_CHUNK: usize = 14;

/// The bytes of the ACL payload that are not part of the name fragment (opcode, offset, and total
/// length)
pub const NAME_RES_HEADER: u16 = 3;

/// Name reassembly errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameError {
    /// The fragment starts at or beyond the declared total length of the name
    OffsetOutOfRange { offset: u8, total: u8 },
    /// The total length of the name changed in the middle of a reassembly
    TotalLengthChanged { expected: u8, received: u8 },
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NameError::OffsetOutOfRange { offset, total } => write!(
                f,
                "name fragment at offset {} is beyond the name length ({})",
                offset, total
            ),
            NameError::TotalLengthChanged { expected, received } => write!(
                f,
                "name length changed during reassembly (expected {}, received {})",
                expected, received
            ),
        }
    }
}

impl std::error::Error for NameError {}

/// A decoded device name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceName {
    raw: Vec<u8>,
}

impl DeviceName {
    fn new(raw: &[u8]) -> Self {
        DeviceName { raw: raw.to_vec() }
    }

    /// The raw bytes of the name
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The name as text
    ///
    /// Invalid UTF-8 sequences are replaced.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.raw))
    }
}

/// The buffer a fragmented name is written into
///
/// Bytes are written at the offset declared by the peer. The highest filled position never exceeds
/// the declared total length.
#[derive(Clone)]
pub struct NameBuffer {
    bytes: Box<[u8; NAME_CAPACITY]>,
    written: Box<[bool; NAME_CAPACITY]>,
    total: Option<u8>,
    highest: usize,
    more_needed: bool,
}

impl NameBuffer {
    fn new() -> Self {
        NameBuffer {
            bytes: Box::new([0; NAME_CAPACITY]),
            written: Box::new([false; NAME_CAPACITY]),
            total: None,
            highest: 0,
            more_needed: false,
        }
    }

    fn reset(&mut self) {
        *self = NameBuffer::new();
    }

    /// The highest position filled so far
    pub fn highest_filled(&self) -> usize {
        self.highest
    }

    /// The declared total length of the name under reassembly
    pub fn total(&self) -> Option<u8> {
        self.total
    }

    /// The first position of the name that has not been received
    pub fn resume_offset(&self) -> u8 {
        let total = self.total.unwrap_or_default() as usize;

        // total is at most 255 so the position always fits
        self.written[..total].iter().position(|w| !w).unwrap_or(total) as u8
    }

    fn is_complete(&self) -> bool {
        match self.total {
            Some(total) => self.written[..total as usize].iter().all(|w| *w),
            None => false,
        }
    }
}

impl fmt::Debug for NameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NameBuffer")
            .field("total", &self.total)
            .field("highest", &self.highest)
            .field("more_needed", &self.more_needed)
            .finish()
    }
}

/// The result of processing an `LMP_name_res`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameProgress {
    /// The name is complete
    Complete(DeviceName),
    /// More of the name must be requested, starting at `resume_offset`
    MoreNeeded { resume_offset: u8 },
}

/// Reassembler of fragmented device names
#[derive(Debug, Clone)]
pub struct NameReassembler {
    buffer: NameBuffer,
}

impl NameReassembler {
    pub fn new() -> Self {
        NameReassembler {
            buffer: NameBuffer::new(),
        }
    }

    pub fn buffer(&self) -> &NameBuffer {
        &self.buffer
    }

    /// Check if another `LMP_name_req` is needed to continue the reassembly
    pub fn more_needed(&self) -> bool {
        self.buffer.more_needed
    }

    /// The offset the next `LMP_name_req` should ask for
    pub fn resume_offset(&self) -> u8 {
        self.buffer.resume_offset()
    }

    /// Clear the "more data needed" flag
    ///
    /// This is done whenever a `LMP_name_req` is sent.
    pub fn clear_more_needed(&mut self) {
        self.buffer.more_needed = false;
    }

    /// Process the fields of an `LMP_name_res`
    ///
    /// `payload` is every byte of the PDU after the total length field. The fragment is the first
    /// `acl_length - 3` bytes of it, bounded by the bytes that are actually present and by the
    /// declared total length. When the name fits within a single chunk it is decoded directly from
    /// `payload`.
    ///
    /// Nothing is written to the buffer when an error is returned.
    pub fn push(
        &mut self,
        offset: u8,
        total: u8,
        acl_length: u16,
        payload: &[u8],
    ) -> Result<NameProgress, NameError> {
        if total as usize <= MAX_CHUNK {
            let len = core::cmp::min(total as usize, payload.len());

            self.buffer.reset();

            return Ok(NameProgress::Complete(DeviceName::new(&payload[..len])));
        }

        if let Some(expected) = self.buffer.total {
            if expected != total {
                return Err(NameError::TotalLengthChanged {
                    expected,
                    received: total,
                });
            }
        }

        if offset >= total {
            return Err(NameError::OffsetOutOfRange { offset, total });
        }

        let offset = offset as usize;

        // every fragment carries a full chunk, the bytes past the total length are padding
        let chunk = core::cmp::min(
            core::cmp::min(acl_length.saturating_sub(NAME_RES_HEADER) as usize, payload.len()),
            total as usize - offset,
        );

        log::trace!("(LMP) name fragment at offset {} of {} bytes", offset, chunk);

        self.buffer.total = Some(total);

        self.buffer.bytes[offset..offset + chunk].copy_from_slice(&payload[..chunk]);

        self.buffer.written[offset..offset + chunk]
            .iter_mut()
            .for_each(|w| *w = true);

        self.buffer.highest = core::cmp::min(
            core::cmp::max(self.buffer.highest, offset + chunk),
            total as usize,
        );

        if self.buffer.is_complete() {
            let name = DeviceName::new(&self.buffer.bytes[..total as usize]);

            self.buffer.reset();

            Ok(NameProgress::Complete(name))
        } else {
            self.buffer.more_needed = true;

            Ok(NameProgress::MoreNeeded {
                resume_offset: self.buffer.resume_offset(),
            })
        }
    }
}

impl Default for NameReassembler {
    fn default() -> Self {
        Self::new()
    }
}
