//! Wire-protocol constants shared by the client, the tenant runtime and the
//! host: outbound frame commands, host/tenant message type codes, subtask flag
//! bits, and the error-type discriminants carried on inbound frames.

use serde::{Deserialize, Serialize};

/// Protocol major version carried by the HELLO command.
pub const PROTOCOL_MAJOR: u16 = 4;
/// Protocol minor version carried by the HELLO command.
pub const PROTOCOL_MINOR: u16 = 1;

/// Key carrying column names in a row-result envelope.
pub const ENVELOPE_COLUMNS: &str = "__C_";
/// Key carrying row tuples in a row-result envelope.
pub const ENVELOPE_ROWS: &str = "__R_";
/// Key carrying the additional/trailer value in a row-result envelope.
pub const ENVELOPE_ADDITIONAL: &str = "__A_";

/// Outbound frame commands. Each serializes as a single leading character of
/// the text frame `{CMD}{id};{target};{jsonArgs}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Hello,
    Query,
    Call,
}

impl Command {
    pub fn as_char(self) -> char {
        match self {
            Command::Hello => 'H',
            Command::Query => 'Q',
            Command::Call => 'C',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'H' => Some(Command::Hello),
            'Q' => Some(Command::Query),
            'C' => Some(Command::Call),
            _ => None,
        }
    }
}

/// Error-type discriminant carried on inbound error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    ServerError,
    BadResult,
    ValidationError,
}

/// Server-push event tags, carried in `result.eventType` on frames without a
/// matching pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushEvent {
    #[serde(rename = "V")]
    VersionChange,
    #[serde(rename = "D")]
    DataChange,
}

/// Outbound host message type codes (tenant runtime → host). Packed into the
/// top byte of the request identifier in each outbox slot.
pub mod msg {
    pub const CALL_RESULT: u8 = 144;
    pub const CALL_ERROR: u8 = 145;
    pub const FETCH: u8 = 146;
    pub const LOG: u8 = 147;
    pub const QUERY: u8 = 151;
    pub const CREATE_TIMER: u8 = 152;
    pub const DELETE_TIMER: u8 = 153;
}

/// Inbound subtask flag bits (host → tenant runtime). The flag byte occupies
/// bits 24..32 of the slot's request identifier; bits 0..24 are the request id.
pub mod flags {
    /// Slot is a subtask resolution.
    pub const RESUME: u32 = 1 << 31;
    /// Slot is a subtask rejection.
    pub const REJECT: u32 = 1 << 30;
    /// Either flag set means the slot resumes a subtask instead of starting a task.
    pub const REQUEST_IS_SUBTASK: u32 = RESUME | REJECT;
    /// Mask isolating the request id from the flag/type byte.
    pub const REQUEST_ID_MASK: u32 = 0x00ff_ffff;
}

/// Pack an 8-bit message type into the top byte of a request identifier.
pub fn pack_msg(msg_type: u8, request_id: u32) -> u32 {
    ((msg_type as u32) << 24) | (request_id & flags::REQUEST_ID_MASK)
}

/// Extract the message-type byte from a packed identifier.
pub fn msg_type(packed: u32) -> u8 {
    (packed >> 24) as u8
}

/// Extract the request id from a packed identifier.
pub fn request_id(packed: u32) -> u32 {
    packed & flags::REQUEST_ID_MASK
}
