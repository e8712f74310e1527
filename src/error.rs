//! Error types shared by the device and host sides

use core::fmt::Debug;

/// Transport failure, aborts the current request without a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("serial read failed")]
    Read,
    #[error("serial write failed")]
    Write,
}

/// Reasons a request was refused or failed after being received.
///
/// These never stop the bootloader; by the time one is returned the
/// matching NACK or failure status has already gone out on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("frame checksum mismatch")]
    ChecksumMismatch,
    #[error("unknown command 0x{0:02x}")]
    UnknownCommand(u8),
    #[error("payload too short for command")]
    MalformedPayload,
    #[error("address 0x{0:08x} outside every allowed region")]
    InvalidAddress(u32),
    #[error("invalid erase request (sector {sector}, count {count})")]
    InvalidEraseParameters { sector: u8, count: u8 },
    #[error("flash erase failed")]
    EraseFailed,
    #[error("flash programming failed from 0x{address:08x}")]
    ProgramFailed { address: u32 },
    #[error("readout protection change rejected")]
    ProtectionChangeRejected,
}

/// Host side errors, generic over the serial port error
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum ClientError<SerialError: Debug> {
    #[error("serial error: {0:?}")]
    Serial(SerialError),
    #[error("device replied with NACK")]
    Nack,
    #[error("timed out waiting for device response")]
    ResponseTimeout,
    #[error("unexpected response byte 0x{0:02x}")]
    InvalidResponse(u8),
    #[error("expected {expected} reply bytes, got {got}")]
    ShortReply { expected: usize, got: usize },
    #[error("{len} bytes from 0x{address:08x} run past the end of the address space")]
    AddressOverflow { address: u32, len: usize },
    #[error("payload of {0} bytes does not fit in one frame")]
    PayloadTooLarge(usize),
    #[error("reply of {0} bytes exceeds the receive buffer")]
    ReplyTooLong(usize),
}
