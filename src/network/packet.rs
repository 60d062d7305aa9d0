//! SMBv1 probe messages and response inspection
//!
//! Every request the prober sends is a fixed template. The only bytes that
//! change between hosts are the tree and user identifiers assigned by the
//! server, which are applied to a fresh copy of the template through a patch
//! list. Templates themselves are never written to.

use crate::error::{ProbeError, ProbeResult, ProbeStep};

/// NetBIOS session header plus the fixed SMB header
pub const MIN_RESPONSE_LEN: usize = 36;

/// Largest payload a NetBIOS session frame can announce
pub const MAX_FRAME_PAYLOAD: usize = 0x1_ffff;

pub const NETBIOS_HEADER_LEN: usize = 4;

const STATUS_OFFSET: usize = 9;
const TREE_ID_OFFSET: usize = 28;
const USER_ID_OFFSET: usize = 32;
const MULTIPLEX_ID_OFFSET: usize = 34;

/// STATUS_INSUFF_SERVER_RESOURCES as it appears on the wire
const TRANSACTION_SIGNAL: [u8; 4] = [0x05, 0x02, 0x00, 0xc0];

/// Multiplex id low byte echoed by a DoublePulsar implant
const IMPLANT_SIGNAL: u8 = 0x51;

// Session setup AndX response layout, relative to the end of the SMB header
const SESSION_SETUP_BYTE_COUNT: usize = 7;
const SESSION_SETUP_FIXED_LEN: usize = 45;
const NATIVE_OS_OFFSET: usize = 10;

#[rustfmt::skip]
const NEGOTIATE_PROTOCOL_REQUEST: [u8; 137] = [
    0x00, 0x00, 0x00, 0x85, 0xff, 0x53, 0x4d, 0x42, 0x72, 0x00, 0x00, 0x00, 0x00, 0x18, 0x53, 0xc0,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xfe,
    0x00, 0x00, 0x40, 0x00, 0x00, 0x62, 0x00, 0x02, 0x50, 0x43, 0x20, 0x4e, 0x45, 0x54, 0x57, 0x4f,
    0x52, 0x4b, 0x20, 0x50, 0x52, 0x4f, 0x47, 0x52, 0x41, 0x4d, 0x20, 0x31, 0x2e, 0x30, 0x00, 0x02,
    0x4c, 0x41, 0x4e, 0x4d, 0x41, 0x4e, 0x31, 0x2e, 0x30, 0x00, 0x02, 0x57, 0x69, 0x6e, 0x64, 0x6f,
    0x77, 0x73, 0x20, 0x66, 0x6f, 0x72, 0x20, 0x57, 0x6f, 0x72, 0x6b, 0x67, 0x72, 0x6f, 0x75, 0x70,
    0x73, 0x20, 0x33, 0x2e, 0x31, 0x61, 0x00, 0x02, 0x4c, 0x4d, 0x31, 0x2e, 0x32, 0x58, 0x30, 0x30,
    0x32, 0x00, 0x02, 0x4c, 0x41, 0x4e, 0x4d, 0x41, 0x4e, 0x32, 0x2e, 0x31, 0x00, 0x02, 0x4e, 0x54,
    0x20, 0x4c, 0x4d, 0x20, 0x30, 0x2e, 0x31, 0x32, 0x00,
];

#[rustfmt::skip]
const SESSION_SETUP_REQUEST: [u8; 140] = [
    0x00, 0x00, 0x00, 0x88, 0xff, 0x53, 0x4d, 0x42, 0x73, 0x00, 0x00, 0x00, 0x00, 0x18, 0x07, 0xc0,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xfe,
    0x00, 0x00, 0x40, 0x00, 0x0d, 0xff, 0x00, 0x88, 0x00, 0x04, 0x11, 0x0a, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xd4, 0x00, 0x00, 0x00, 0x4b,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x57, 0x00, 0x69, 0x00, 0x6e, 0x00, 0x64, 0x00, 0x6f, 0x00,
    0x77, 0x00, 0x73, 0x00, 0x20, 0x00, 0x32, 0x00, 0x30, 0x00, 0x30, 0x00, 0x30, 0x00, 0x20, 0x00,
    0x32, 0x00, 0x31, 0x00, 0x39, 0x00, 0x35, 0x00, 0x00, 0x00, 0x57, 0x00, 0x69, 0x00, 0x6e, 0x00,
    0x64, 0x00, 0x6f, 0x00, 0x77, 0x00, 0x73, 0x00, 0x20, 0x00, 0x32, 0x00, 0x30, 0x00, 0x30, 0x00,
    0x30, 0x00, 0x20, 0x00, 0x35, 0x00, 0x2e, 0x00, 0x30, 0x00, 0x00, 0x00,
];

#[rustfmt::skip]
const TREE_CONNECT_REQUEST: [u8; 100] = [
    0x00, 0x00, 0x00, 0x60, 0xff, 0x53, 0x4d, 0x42, 0x75, 0x00, 0x00, 0x00, 0x00, 0x18, 0x07, 0xc0,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xfe,
    0x00, 0x08, 0x40, 0x00, 0x04, 0xff, 0x00, 0x60, 0x00, 0x08, 0x00, 0x01, 0x00, 0x35, 0x00, 0x00,
    0x5c, 0x00, 0x5c, 0x00, 0x31, 0x00, 0x39, 0x00, 0x32, 0x00, 0x2e, 0x00, 0x31, 0x00, 0x36, 0x00,
    0x38, 0x00, 0x2e, 0x00, 0x31, 0x00, 0x37, 0x00, 0x35, 0x00, 0x2e, 0x00, 0x31, 0x00, 0x32, 0x00,
    0x38, 0x00, 0x5c, 0x00, 0x49, 0x00, 0x50, 0x00, 0x43, 0x00, 0x24, 0x00, 0x00, 0x00, 0x3f, 0x3f,
    0x3f, 0x3f, 0x3f, 0x00,
];

#[rustfmt::skip]
const TRANS_NAMED_PIPE_REQUEST: [u8; 78] = [
    0x00, 0x00, 0x00, 0x4a, 0xff, 0x53, 0x4d, 0x42, 0x25, 0x00, 0x00, 0x00, 0x00, 0x18, 0x01, 0x28,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x8e, 0xa3,
    0x01, 0x08, 0x52, 0x98, 0x10, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x4a, 0x00, 0x00, 0x00, 0x4a, 0x00, 0x02,
    0x00, 0x23, 0x00, 0x00, 0x00, 0x07, 0x00, 0x5c, 0x50, 0x49, 0x50, 0x45, 0x5c, 0x00,
];

#[rustfmt::skip]
const TRANS2_SESSION_SETUP_REQUEST: [u8; 82] = [
    0x00, 0x00, 0x00, 0x4e, 0xff, 0x53, 0x4d, 0x42, 0x32, 0x00, 0x00, 0x00, 0x00, 0x18, 0x07, 0xc0,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0xff, 0xfe,
    0x00, 0x08, 0x41, 0x00, 0x0f, 0x0c, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xa6, 0xd9, 0xa4, 0x00, 0x00, 0x00, 0x0c, 0x00, 0x42, 0x00, 0x00, 0x00, 0x4e, 0x00, 0x01,
    0x00, 0x0e, 0x00, 0x0d, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
];
/// Immutable request blueprint
#[derive(Debug, Clone, Copy)]
pub struct Template {
    name: &'static str,
    bytes: &'static [u8],
}

impl Template {
    pub const fn new(name: &'static str, bytes: &'static [u8]) -> Self {
        Self { name, bytes }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn bytes(&self) -> &'static [u8] {
        self.bytes
    }

    /// Copy the template and apply `patches` to the copy
    pub fn render(&self, patches: &[Patch]) -> ProbeResult<Vec<u8>> {
        let mut packet = self.bytes.to_vec();
        for patch in patches {
            let slot = packet
                .get_mut(patch.offset..patch.offset + patch.value.len())
                .ok_or(ProbeError::PatchOutOfRange {
                    template: self.name,
                    offset: patch.offset,
                })?;
            slot.copy_from_slice(&patch.value);
        }
        Ok(packet)
    }
}

pub const NEGOTIATE_PROTOCOL: Template =
    Template::new("negotiate protocol", &NEGOTIATE_PROTOCOL_REQUEST);
pub const SESSION_SETUP: Template = Template::new("session setup", &SESSION_SETUP_REQUEST);
pub const TREE_CONNECT: Template = Template::new("tree connect", &TREE_CONNECT_REQUEST);
pub const TRANS_NAMED_PIPE: Template =
    Template::new("named pipe transaction", &TRANS_NAMED_PIPE_REQUEST);
pub const TRANS2_SESSION_SETUP: Template =
    Template::new("trans2 session setup", &TRANS2_SESSION_SETUP_REQUEST);

/// Two-byte value written at a fixed offset of a rendered template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch {
    pub offset: usize,
    pub value: [u8; 2],
}

impl Patch {
    pub fn tree_id(id: [u8; 2]) -> Self {
        Self {
            offset: TREE_ID_OFFSET,
            value: id,
        }
    }

    pub fn user_id(id: [u8; 2]) -> Self {
        Self {
            offset: USER_ID_OFFSET,
            value: id,
        }
    }
}

/// Result of looking for the native OS string in a session setup response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsBanner {
    /// The response carries no parameter words
    Absent,
    /// The declared byte count disagrees with the frame length
    Malformed { declared: usize, actual: usize },
    Present(String),
}

impl OsBanner {
    pub fn into_text(self) -> String {
        match self {
            OsBanner::Present(text) => text,
            _ => String::new(),
        }
    }
}

/// Named accessors over one received frame
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    bytes: &'a [u8],
}

impl<'a> ResponseView<'a> {
    /// Wrap a frame, rejecting anything shorter than the SMB header
    pub fn parse(step: ProbeStep, bytes: &'a [u8]) -> ProbeResult<Self> {
        if bytes.len() < MIN_RESPONSE_LEN {
            return Err(ProbeError::ShortResponse {
                step,
                len: bytes.len(),
            });
        }
        Ok(Self { bytes })
    }

    /// NT status from the SMB header
    pub fn status(&self) -> u32 {
        u32::from_le_bytes(self.field(STATUS_OFFSET))
    }

    pub fn tree_id(&self) -> [u8; 2] {
        self.field(TREE_ID_OFFSET)
    }

    pub fn user_id(&self) -> [u8; 2] {
        self.field(USER_ID_OFFSET)
    }

    /// The server answered the named pipe transaction with
    /// STATUS_INSUFF_SERVER_RESOURCES
    pub fn has_transaction_signal(&self) -> bool {
        self.field::<4>(STATUS_OFFSET) == TRANSACTION_SIGNAL
    }

    pub fn has_implant_signal(&self) -> bool {
        self.bytes[MULTIPLEX_ID_OFFSET] == IMPLANT_SIGNAL
    }

    /// Extract the native OS string from a session setup AndX response
    pub fn native_os(&self) -> OsBanner {
        let body = &self.bytes[MIN_RESPONSE_LEN..];
        match body.first() {
            None | Some(&0) => return OsBanner::Absent,
            Some(_) => {}
        }

        let declared = match body.get(SESSION_SETUP_BYTE_COUNT..SESSION_SETUP_BYTE_COUNT + 2) {
            Some(raw) => u16::from_le_bytes([raw[0], raw[1]]) as usize,
            None => {
                return OsBanner::Malformed {
                    declared: 0,
                    actual: self.bytes.len(),
                }
            }
        };

        if self.bytes.len() != declared + SESSION_SETUP_FIXED_LEN {
            return OsBanner::Malformed {
                declared,
                actual: self.bytes.len(),
            };
        }

        let raw = body
            .get(NATIVE_OS_OFFSET..)
            .and_then(|tail| {
                tail.windows(2)
                    .position(|pair| pair == [0, 0])
                    .map(|end| &tail[..end])
            })
            .unwrap_or(&[]);

        let text: Vec<u8> = raw.iter().copied().filter(|&b| b != 0).collect();
        OsBanner::Present(String::from_utf8_lossy(&text).into_owned())
    }

    // Offsets are all below MIN_RESPONSE_LEN, which `parse` guarantees.
    fn field<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[offset..offset + N]);
        out
    }
}
