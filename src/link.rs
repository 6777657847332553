//! Byte level serial access with poll based timeouts

use core::fmt::Debug;
use core::marker::PhantomData;

use embedded_hal::blocking::delay::DelayMs;

use crate::{Error, Options, Transport};

/// Borrowed view over a port and delay for the duration of one exchange
pub(crate) struct Link<'a, P, D, E> {
    port: &'a mut P,
    delay: &'a mut D,
    options: &'a Options,
    /// Set after a monitor line, a `\r` arriving next completes its terminator
    skip_cr: &'a mut bool,
    _err: PhantomData<E>,
}

impl<'a, P, D, E> Link<'a, P, D, E>
where
    P: Transport<E>,
    D: DelayMs<u32>,
    E: Debug,
{
    pub fn new(port: &'a mut P, delay: &'a mut D, options: &'a Options, skip_cr: &'a mut bool) -> Self {
        Self {
            port,
            delay,
            options,
            skip_cr,
            _err: PhantomData,
        }
    }

    pub fn options(&self) -> &Options {
        self.options
    }

    /// Non-blocking read, `None` if no byte is pending
    pub fn try_read(&mut self) -> Result<Option<u8>, Error<E>> {
        loop {
            let v = match self.port.read() {
                Ok(v) => v,
                Err(nb::Error::WouldBlock) => return Ok(None),
                Err(nb::Error::Other(e)) => return Err(e.into()),
            };

            let skip = core::mem::replace(self.skip_cr, false);
            if skip && v == b'\r' {
                trace!("Discarding line terminator");
                continue;
            }

            return Ok(Some(v));
        }
    }

    /// Discard a `\r` if it is the next byte received
    pub fn discard_next_cr(&mut self) {
        *self.skip_cr = true;
    }

    /// Sleep one poll period, failing once `waited` exceeds the response timeout
    pub fn wait(&mut self, waited: &mut u32) -> Result<(), Error<E>> {
        self.delay.delay_ms(self.options.poll_delay_ms);
        *waited = waited.saturating_add(self.options.poll_delay_ms.max(1));

        let timeout = self.options.response_timeout_ms;
        if timeout != 0 && *waited > timeout {
            error!("Receive timeout");
            return Err(Error::ResponseTimeout);
        }

        Ok(())
    }

    /// Block until a byte arrives or the response timeout expires
    pub fn read_byte(&mut self) -> Result<u8, Error<E>> {
        let mut t = 0;

        loop {
            if let Some(v) = self.try_read()? {
                return Ok(v);
            }

            self.wait(&mut t)?;
        }
    }

    /// Fill `buff` completely, each byte subject to the response timeout
    pub fn read_exact(&mut self, buff: &mut [u8]) -> Result<(), Error<E>> {
        for b in buff.iter_mut() {
            *b = self.read_byte()?;
        }
        Ok(())
    }

    /// Write all of `data` then flush
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        for b in data {
            block!(self.port.write(*b))?;
        }
        block!(self.port.flush())?;

        Ok(())
    }
}
