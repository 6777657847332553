//! XMODEM/CRC block transfer engine
//!
//! Blocks are framed as `[SOH][seq][0xFF - seq][128 byte payload][crc hi][crc lo]`,
//! with the CRC covering the payload only. Each block must be acknowledged before
//! the next is sent (or accepted), and the transfer is closed by an acknowledged `EOT`.

use core::fmt::Debug;
use std::io::{ErrorKind as IoErrorKind, Read, Write};

use embedded_hal::blocking::delay::DelayMs;

use crate::crc::crc16;
use crate::link::Link;
use crate::protocol::*;
use crate::{Error, Transport};

/// Length of a complete data block on the wire
pub const BLOCK_LEN: usize = BLOCK_HEADER_LEN + BLOCK_SIZE + BLOCK_CRC_LEN;

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Direction {
    /// Host to device (upload)
    Send,
    /// Device to host (download)
    Receive,
}

/// Terminal status of a transfer
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Outcome {
    Pending,
    Success,
    ProtocolError,
    ChecksumError,
    IoError,
    Timeout,
    Cancelled,
}

/// Cause of a block being retried
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Fault {
    /// Device answered `NAK`
    Nak,
    /// Complement byte did not match the sequence number
    Complement,
    /// Payload CRC did not match
    Checksum,
    /// Device repeated an already acknowledged block
    Duplicate,
}

/// Progress of a single transfer
#[derive(Clone, PartialEq, Debug)]
pub struct TransferState {
    pub direction: Direction,
    /// Sequence number of the block currently in flight
    pub sequence: u8,
    /// Number of blocks acknowledged
    pub blocks: u32,
    /// Source bytes sent, or bytes written to the sink
    pub bytes_transferred: u64,
    /// Retries spent on the current block
    pub retries: u32,
    /// `Success` once complete, failed transfers report via `Error::outcome`
    pub result: Outcome,
}

impl TransferState {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            sequence: 1,
            blocks: 0,
            bytes_transferred: 0,
            retries: 0,
            result: Outcome::Pending,
        }
    }

    /// Move on to the next block after an acknowledgement
    fn advance(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
        self.blocks += 1;
        self.retries = 0;
    }
}

/// A single data block
#[derive(Clone, PartialEq, Debug)]
pub struct Block {
    pub sequence: u8,
    pub payload: [u8; BLOCK_SIZE],
}

impl Block {
    /// Create a block, padding `data` out to the block size with `SUB`
    pub fn new(sequence: u8, data: &[u8]) -> Self {
        let mut payload = [SUB; BLOCK_SIZE];
        payload[..data.len()].copy_from_slice(data);

        Self { sequence, payload }
    }

    pub fn complement(&self) -> u8 {
        0xFF - self.sequence
    }

    pub fn crc(&self) -> u16 {
        crc16(&self.payload)
    }

    /// Encode to wire format, CRC high byte first
    pub fn encode(&self) -> [u8; BLOCK_LEN] {
        let mut buff = [0u8; BLOCK_LEN];

        buff[0] = SOH;
        buff[1] = self.sequence;
        buff[2] = self.complement();
        buff[BLOCK_HEADER_LEN..][..BLOCK_SIZE].copy_from_slice(&self.payload);
        buff[BLOCK_LEN - BLOCK_CRC_LEN..].copy_from_slice(&self.crc().to_be_bytes());

        buff
    }

    /// Parse a block from the bytes following `SOH`, checking the complement and CRC
    pub fn decode(frame: &[u8; BLOCK_LEN - 1]) -> Result<Self, Fault> {
        let (sequence, complement) = (frame[0], frame[1]);
        if complement != 0xFF - sequence {
            return Err(Fault::Complement);
        }

        let mut payload = [0u8; BLOCK_SIZE];
        payload.copy_from_slice(&frame[2..][..BLOCK_SIZE]);

        let crc = u16::from_be_bytes([frame[BLOCK_LEN - 3], frame[BLOCK_LEN - 2]]);
        if crc16(&payload) != crc {
            return Err(Fault::Checksum);
        }

        Ok(Self { sequence, payload })
    }
}

/// Read from `source` until `buff` is full or the source is exhausted
fn fill<R: Read>(source: &mut R, buff: &mut [u8]) -> Result<usize, IoErrorKind> {
    let mut n = 0;

    while n < buff.len() {
        match source.read(&mut buff[n..]) {
            Ok(0) => break,
            Ok(v) => n += v,
            Err(e) if e.kind() == IoErrorKind::Interrupted => (),
            Err(e) => return Err(e.kind()),
        }
    }

    Ok(n)
}

/// Tell the device to give up on the transfer
fn abort<P, D, E>(link: &mut Link<P, D, E>) -> Result<(), Error<E>>
where
    P: Transport<E>,
    D: DelayMs<u32>,
    E: Debug,
{
    debug!("Cancelling transfer");
    link.write_all(&[CAN, CAN])
}

/// Count a retry against the current block, aborting once the budget is spent
fn retry<P, D, E>(
    link: &mut Link<P, D, E>,
    state: &mut TransferState,
    fault: Fault,
) -> Result<(), Error<E>>
where
    P: Transport<E>,
    D: DelayMs<u32>,
    E: Debug,
{
    state.retries += 1;
    warn!(
        "Block {} failed ({:?}), retry {}/{}",
        state.sequence,
        fault,
        state.retries,
        link.options().max_retries
    );

    if state.retries > link.options().max_retries {
        abort(link)?;
        return Err(Error::RetriesExhausted {
            sequence: state.sequence,
            reason: fault,
        });
    }

    Ok(())
}

/// Send `source` to a device that has already signalled it is ready
pub(crate) fn send<P, D, E, R>(
    link: &mut Link<P, D, E>,
    state: &mut TransferState,
    source: &mut R,
) -> Result<(), Error<E>>
where
    P: Transport<E>,
    D: DelayMs<u32>,
    E: Debug,
    R: Read,
{
    let mut data = [0u8; BLOCK_SIZE];

    loop {
        let n = match fill(source, &mut data) {
            Ok(n) => n,
            Err(kind) => {
                abort(link)?;
                return Err(Error::Io(kind));
            }
        };
        if n == 0 {
            break;
        }

        let frame = Block::new(state.sequence, &data[..n]).encode();

        loop {
            trace!("Sending block {} ({} bytes)", state.sequence, n);
            link.write_all(&frame)?;

            match link.read_byte()? {
                ACK => break,
                NAK => retry(link, state, Fault::Nak)?,
                CAN => return Err(Error::Cancelled),
                v => {
                    debug!("Received unexpected value: 0x{:02x}", v);
                    return Err(Error::UnexpectedResponse(v));
                }
            }
        }

        state.bytes_transferred += n as u64;
        state.advance();
    }

    debug!("Sending EOT after {} blocks", state.blocks);
    link.write_all(&[EOT])?;

    match link.read_byte()? {
        ACK => Ok(()),
        CAN => Err(Error::Cancelled),
        v => Err(Error::UnexpectedResponse(v)),
    }
}

/// Receive blocks from a device that has been asked to start sending,
/// writing at most `length` bytes to `sink`
pub(crate) fn receive<P, D, E, W>(
    link: &mut Link<P, D, E>,
    state: &mut TransferState,
    length: u64,
    sink: &mut W,
) -> Result<(), Error<E>>
where
    P: Transport<E>,
    D: DelayMs<u32>,
    E: Debug,
    W: Write,
{
    let mut frame = [0u8; BLOCK_LEN - 1];

    loop {
        match link.read_byte()? {
            SOH => (),
            EOT => {
                debug!("Received EOT after {} blocks", state.blocks);
                return link.write_all(&[ACK]);
            }
            CAN => return Err(Error::Cancelled),
            v => {
                debug!("Received unexpected value: 0x{:02x}", v);
                return Err(Error::UnexpectedResponse(v));
            }
        }

        // Always consume the whole block so a bad one leaves the stream framed
        link.read_exact(&mut frame)?;

        let block = match Block::decode(&frame) {
            Ok(b) => b,
            Err(fault) => {
                retry(link, state, fault)?;
                link.write_all(&[NAK])?;
                continue;
            }
        };

        // Our last ACK was lost, the device is repeating the previous block
        if state.blocks > 0 && block.sequence == state.sequence.wrapping_sub(1) {
            debug!("Duplicate block {}, re-acknowledging", block.sequence);
            retry(link, state, Fault::Duplicate)?;
            link.write_all(&[ACK])?;
            continue;
        }

        if block.sequence != state.sequence {
            abort(link)?;
            return Err(Error::SequenceMismatch {
                expected: state.sequence,
                received: block.sequence,
            });
        }

        let owed = length.saturating_sub(state.bytes_transferred);
        let n = (owed as usize).min(BLOCK_SIZE);
        if let Err(e) = sink.write_all(&block.payload[..n]) {
            abort(link)?;
            return Err(Error::Io(e.kind()));
        }

        trace!("Received block {} ({} bytes kept)", block.sequence, n);

        state.bytes_transferred += n as u64;
        link.write_all(&[ACK])?;
        state.advance();
    }
}
