//! SAM-BA monitor command language and XMODEM control bytes

use core::fmt;

/// Start of a 128 byte data block
pub const SOH: u8 = 0x01;
/// End of transmission
pub const EOT: u8 = 0x04;
/// Block accepted
pub const ACK: u8 = 0x06;
/// Block rejected, resend
pub const NAK: u8 = 0x15;
/// Abort transfer
pub const CAN: u8 = 0x18;
/// Pad byte for short final blocks
pub const SUB: u8 = 0x1A;

/// Monitor reply indicating the receiver is ready for XMODEM/CRC blocks
pub const READY: u8 = b'C';

/// Terminates monitor text replies
pub const LINE_TERMINATOR: u8 = b'\n';

/// Payload bytes per XMODEM block
pub const BLOCK_SIZE: usize = 128;

/// Header, sequence and complement bytes preceding the payload
pub const BLOCK_HEADER_LEN: usize = 3;

/// Trailing CRC bytes
pub const BLOCK_CRC_LEN: usize = 2;

/// Capacity of the monitor line buffer
pub const LINE_BUFF_LEN: usize = 1024;

#[derive(Debug, PartialEq, Clone)]
pub enum MonitorCommand {
    /// Select binary (non-interactive) framing, replies with a line
    Handshake,

    /// Fetch the monitor version string
    QueryVersion,

    /// Jump to the provided address, no reply
    Branch(u32),

    /// Start an XMODEM receive on the device at the provided address, replies with `C`
    BeginUpload(u32),

    /// Start an XMODEM send from the device, the trailing `C` kicks off the first block
    BeginDownload { address: u32, length: u32 },
}

impl fmt::Display for MonitorCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MonitorCommand::Handshake => write!(f, "N#"),
            MonitorCommand::QueryVersion => write!(f, "V#"),
            MonitorCommand::Branch(a) => write!(f, "G{:X}#", a),
            MonitorCommand::BeginUpload(a) => write!(f, "S{:X}#", a),
            MonitorCommand::BeginDownload { address, length } => {
                write!(f, "R{:X},{:X}#C", address, length)
            }
        }
    }
}
