//! Scripted serial port for exercising the programmer without hardware

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use samba_loader::xmodem::Block;
use samba_loader::{Options, Programmer};

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct MockError;

#[derive(Default, Debug)]
struct Inner {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    polls: usize,
}

/// Port replaying a fixed device response stream and recording everything written
#[derive(Clone, Default, Debug)]
pub struct MockPort(Rc<RefCell<Inner>>);

impl MockPort {
    pub fn new(rx: &[u8]) -> Self {
        let p = Self::default();
        p.0.borrow_mut().rx.extend(rx);
        p
    }

    /// Bytes written by the host
    pub fn tx(&self) -> Vec<u8> {
        self.0.borrow().tx.clone()
    }

    /// Device bytes not yet consumed by the host
    pub fn pending(&self) -> usize {
        self.0.borrow().rx.len()
    }

    /// Number of reads that found nothing pending
    pub fn polls(&self) -> usize {
        self.0.borrow().polls
    }
}

impl Read<u8> for MockPort {
    type Error = MockError;

    fn read(&mut self) -> nb::Result<u8, MockError> {
        let mut i = self.0.borrow_mut();
        match i.rx.pop_front() {
            Some(v) => Ok(v),
            None => {
                i.polls += 1;
                Err(nb::Error::WouldBlock)
            }
        }
    }
}

impl Write<u8> for MockPort {
    type Error = MockError;

    fn write(&mut self, word: u8) -> nb::Result<(), MockError> {
        self.0.borrow_mut().tx.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), MockError> {
        Ok(())
    }
}

pub struct NoDelay;

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}

pub type MockProgrammer = Programmer<MockPort, NoDelay, MockError>;

/// Options with a short timeout so starved reads fail quickly
pub fn options() -> Options {
    Options {
        response_timeout_ms: 20,
        poll_delay_ms: 1,
        max_retries: 10,
    }
}

pub fn programmer(rx: &[u8]) -> (MockProgrammer, MockPort) {
    programmer_with(rx, options())
}

pub fn programmer_with(rx: &[u8], options: Options) -> (MockProgrammer, MockPort) {
    let port = MockPort::new(rx);
    let p = Programmer::new(port.clone(), NoDelay, options);
    (p, port)
}

/// Deterministic test image
pub fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 256) as u8).collect()
}

/// A block as transmitted by the device
pub fn frame(sequence: u8, data: &[u8]) -> Vec<u8> {
    Block::new(sequence, data).encode().to_vec()
}
