use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serial_core::{
    BaudRate, CharSize, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};
use linux_embedded_hal::{Delay, Serial};

use crate::{Options, Programmer};

/// Monitor line speed
pub const DEFAULT_BAUD: usize = 115_200;

impl Programmer<Serial, Delay, IoErrorKind> {
    /// Create a new linux serial port programmer instance
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> anyhow::Result<Self> {
        let path = port.as_ref();

        // Open port
        let mut port = Serial::open(path)
            .with_context(|| format!("opening {}", path.display()))?;

        // Apply settings, 8N1 without flow control
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityNone);

        port.0.write_settings(&settings)
            .context("configuring serial port")?;

        // Reads return WouldBlock after one poll period
        let poll = Duration::from_millis(options.poll_delay_ms.max(1) as u64);
        port.0.set_timeout(poll)?;

        // Return instance
        Ok(Self::new(port, Delay {}, options))
    }
}
