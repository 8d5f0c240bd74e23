//! Wire codec for the VME-EVG230 UDP register gateway.
//!
//! The gateway speaks a fixed-layout 12-octet request/response message. All
//! multi-byte fields are big-endian. The same layout is used in both
//! directions: a request carries `status = 0` and the gateway fills `status`
//! and (for reads) `data` in the reply.
//!
//! ```text
//! offset  width  field
//!      0      1  access     1 = read, 2 = write
//!      1      1  status     0 on requests; filled in by the card on replies
//!      2      2  data       write payload on requests, read payload on replies
//!      4      4  address    REGISTER_BASE + register offset
//!      8      4  reference  reserved; 0 on requests, echoed on replies
//! ```

/// Exact size of every register message, request or reply.
pub const MESSAGE_LEN: usize = 12;

/// Base of the card's register window as seen through the gateway. Register
/// offsets from the VME-EVG230 address map are added to this value.
pub const REGISTER_BASE: u32 = 0x8000_0000;

const ACCESS_READ: u8 = 1;
const ACCESS_WRITE: u8 = 2;

/// Direction of a register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    fn to_wire(self) -> u8 {
        match self {
            Access::Read => ACCESS_READ,
            Access::Write => ACCESS_WRITE,
        }
    }
}

/// A decoded register message.
///
/// `address` is the full gateway address (`REGISTER_BASE + offset`);
/// [`RegisterMessage::register`] recovers the register offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMessage {
    pub access: Access,
    pub status: u8,
    pub data: u16,
    pub address: u32,
    pub reference: u32,
}

impl RegisterMessage {
    /// Builds a read request for the register at `offset`.
    pub fn read(offset: u16) -> Self {
        Self {
            access: Access::Read,
            status: 0,
            data: 0,
            address: REGISTER_BASE + u32::from(offset),
            reference: 0,
        }
    }

    /// Builds a write request storing `data` at the register at `offset`.
    pub fn write(offset: u16, data: u16) -> Self {
        Self {
            access: Access::Write,
            status: 0,
            data,
            address: REGISTER_BASE + u32::from(offset),
            reference: 0,
        }
    }

    /// The register offset addressed by this message.
    pub fn register(&self) -> u16 {
        (self.address.wrapping_sub(REGISTER_BASE)) as u16
    }
}

/// Errors produced when decoding a datagram that is not a valid register
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The datagram was not exactly [`MESSAGE_LEN`] octets.
    WrongLength { actual: usize },
    /// The access byte was neither read (1) nor write (2).
    InvalidAccess { value: u8 },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::WrongLength { actual } => {
                write!(f, "bad message length {actual}, expected {MESSAGE_LEN}")
            }
            DecodeError::InvalidAccess { value } => {
                write!(f, "bad access byte {value:#04x}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Encodes `msg` into its 12-octet wire form.
pub fn encode_message(msg: &RegisterMessage) -> [u8; MESSAGE_LEN] {
    let mut out = [0u8; MESSAGE_LEN];
    out[0] = msg.access.to_wire();
    out[1] = msg.status;
    out[2..4].copy_from_slice(&msg.data.to_be_bytes());
    out[4..8].copy_from_slice(&msg.address.to_be_bytes());
    out[8..12].copy_from_slice(&msg.reference.to_be_bytes());
    out
}

/// Decodes a datagram into a [`RegisterMessage`].
///
/// The gateway pads nothing and never coalesces messages, so anything other
/// than exactly [`MESSAGE_LEN`] octets is rejected.
pub fn decode_message(frame: &[u8]) -> Result<RegisterMessage, DecodeError> {
    if frame.len() != MESSAGE_LEN {
        return Err(DecodeError::WrongLength {
            actual: frame.len(),
        });
    }
    let access = match frame[0] {
        ACCESS_READ => Access::Read,
        ACCESS_WRITE => Access::Write,
        value => return Err(DecodeError::InvalidAccess { value }),
    };
    Ok(RegisterMessage {
        access,
        status: frame[1],
        data: u16::from_be_bytes([frame[2], frame[3]]),
        address: u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]),
        reference: u32::from_be_bytes([frame[8], frame[9], frame[10], frame[11]]),
    })
}
