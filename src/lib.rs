//! SAM-BA Serial Bootloader.
//!
//! Drives the ROM monitor found on Atmel / Microchip SAM parts: a line based
//! ASCII command set (`V#`, `G<addr>#`, ...) with binary images moved via XMODEM/CRC.

use core::marker::PhantomData;

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::serial::{Write, Read};
use embedded_hal::blocking::delay::DelayMs;

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod crc;
mod link;
pub mod protocol;
pub mod xmodem;

use link::Link;
use protocol::*;
pub use protocol::MonitorCommand;
pub use xmodem::{Direction, Fault, Outcome, TransferState};

/// Serial transport used by the programmer
pub trait Transport<E>: Write<u8, Error=E> + Read<u8, Error=E> {}

impl <T, E> Transport<E> for T where T: Write<u8, Error=E> + Read<u8, Error=E> {}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    Init,
    Connected,
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError> {
    #[error("serial port error: {0:?}")]
    Serial(SerialError),

    #[error("device not ready, received 0x{0:02x} instead of 'C'")]
    NotReady(u8),

    #[error("unexpected response 0x{0:02x}")]
    UnexpectedResponse(u8),

    #[error("block sequence mismatch (expected {expected}, received {received})")]
    SequenceMismatch { expected: u8, received: u8 },

    #[error("block {sequence} failed after maximum retries ({reason:?})")]
    RetriesExhausted { sequence: u8, reason: Fault },

    #[error("transfer cancelled by device")]
    Cancelled,

    #[error("response exceeded {} byte line buffer", LINE_BUFF_LEN)]
    BufferOverflow,

    #[error("response timeout")]
    ResponseTimeout,

    #[error("file error: {0:?}")]
    Io(std::io::ErrorKind),
}

impl<SerialError> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

impl<SerialError> Error<SerialError> {
    /// Transfer outcome corresponding to this error
    pub fn outcome(&self) -> Outcome {
        match self {
            Error::Serial(_) | Error::Io(_) => Outcome::IoError,
            Error::ResponseTimeout => Outcome::Timeout,
            Error::Cancelled => Outcome::Cancelled,
            Error::RetriesExhausted { reason: Fault::Checksum, .. } => Outcome::ChecksumError,
            _ => Outcome::ProtocolError,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Timeout to wait for each bootloader response byte (0 waits forever)
    #[cfg_attr(feature = "structopt", structopt(long, default_value="1000"))]
    pub response_timeout_ms: u32,

    /// Period to poll for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value="1"))]
    pub poll_delay_ms: u32,

    /// Maximum retransmissions of a single block
    #[cfg_attr(feature = "structopt", structopt(long, default_value="10"))]
    pub max_retries: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            response_timeout_ms: 1000,
            poll_delay_ms: 1,
            max_retries: 10,
        }
    }
}

pub struct Programmer<P, D, E> {
    state: State,
    options: Options,
    port: P,
    delay: D,
    buff: [u8; LINE_BUFF_LEN],
    skip_cr: bool,
    _err: PhantomData<E>,
}

impl <P, D, E> Programmer<P, D, E>
where
    P: Transport<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new programmer instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self{state: State::Init, options, port, delay, buff: [0u8; LINE_BUFF_LEN], skip_cr: false, _err: PhantomData}
    }

    /// Fetch the programmer state
    pub fn state(&mut self) -> State {
        self.state
    }

    /// Consume the programmer, returning the underlying port and delay
    pub fn release(self) -> (P, D) {
        (self.port, self.delay)
    }

    /// Connect to the monitor
    pub fn init(&mut self) -> Result<(), Error<E>> {
        debug!("Sending handshake");

        self.handshake()?;
        self.state = State::Connected;

        Ok(())
    }

    /// Switch the monitor to binary framing, discarding its reply
    pub fn handshake(&mut self) -> Result<(), Error<E>> {
        self.write_cmd(&MonitorCommand::Handshake)?;
        self.read_line()?;

        Ok(())
    }

    /// Fetch the monitor version string
    pub fn version(&mut self) -> Result<String, Error<E>> {
        self.write_cmd(&MonitorCommand::QueryVersion)?;
        let n = self.read_line()?;

        let v = String::from_utf8_lossy(&self.buff[..n]);
        Ok(v.trim_end_matches('\r').to_string())
    }

    /// Jump to the provided address, the monitor does not reply
    pub fn go(&mut self, address: u32) -> Result<(), Error<E>> {
        debug!("Branching to 0x{:08x}", address);
        self.write_cmd(&MonitorCommand::Branch(address))
    }

    /// Request an upload to `address` and wait for the device to become ready
    pub fn begin_upload(&mut self, address: u32) -> Result<(), Error<E>> {
        self.write_cmd(&MonitorCommand::BeginUpload(address))?;

        let mut link = Link::new(&mut self.port, &mut self.delay, &self.options, &mut self.skip_cr);
        match link.read_byte()? {
            READY => {
                debug!("Device ready for upload");
                Ok(())
            },
            v => {
                debug!("Received 0x{:02x} instead of ready", v);
                Err(Error::NotReady(v))
            }
        }
    }

    /// Request a download of `length` bytes from `address`, the device starts sending immediately
    pub fn begin_download(&mut self, address: u32, length: u32) -> Result<(), Error<E>> {
        self.write_cmd(&MonitorCommand::BeginDownload{ address, length })
    }

    /// Write the contents of `source` to device memory at `address`
    pub fn upload<R: std::io::Read>(&mut self, address: u32, source: &mut R)
    -> Result<TransferState, Error<E>> {
        let mut state = TransferState::new(Direction::Send);

        self.begin_upload(address)?;

        let mut link = Link::new(&mut self.port, &mut self.delay, &self.options, &mut self.skip_cr);
        xmodem::send(&mut link, &mut state, source)?;
        state.result = Outcome::Success;

        Ok(state)
    }

    /// Read `length` bytes of device memory at `address` into `sink`
    pub fn download<W: std::io::Write>(&mut self, address: u32, length: u32, sink: &mut W)
    -> Result<TransferState, Error<E>> {
        let mut state = TransferState::new(Direction::Receive);

        self.begin_download(address, length)?;

        let mut link = Link::new(&mut self.port, &mut self.delay, &self.options, &mut self.skip_cr);
        xmodem::receive(&mut link, &mut state, length as u64, sink)?;
        state.result = Outcome::Success;

        Ok(state)
    }

    /// Read a line from the monitor into the internal buffer,
    /// returning the offset of the line terminator
    pub fn read_line(&mut self) -> Result<usize, Error<E>> {
        let mut link = Link::new(&mut self.port, &mut self.delay, &self.options, &mut self.skip_cr);
        let mut n = 0;
        let mut t = 0;

        loop {
            match link.try_read()? {
                Some(LINE_TERMINATOR) => {
                    // Monitor replies end with "\n\r"
                    link.discard_next_cr();
                    trace!("Received line: {:?}", String::from_utf8_lossy(&self.buff[..n]));
                    return Ok(n)
                },
                Some(v) => {
                    if n == self.buff.len() {
                        error!("Line buffer overflow");
                        return Err(Error::BufferOverflow)
                    }
                    self.buff[n] = v;
                    n += 1;
                    t = 0;
                },
                None => link.wait(&mut t)?,
            }
        }
    }

    fn write_cmd(&mut self, command: &MonitorCommand) -> Result<(), Error<E>> {
        let c = command.to_string();
        trace!("Writing command: {}", c);

        let mut link = Link::new(&mut self.port, &mut self.delay, &self.options, &mut self.skip_cr);
        link.write_all(c.as_bytes())
    }
}
