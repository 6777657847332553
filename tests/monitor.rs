mod common;

use common::*;
use samba_loader::{Error, Options, Programmer, State};

#[test]
fn handshake_discards_reply() {
    let (mut p, port) = programmer(b"\n\r");

    assert_eq!(p.state(), State::Init);
    p.init().unwrap();
    assert_eq!(p.state(), State::Connected);

    assert_eq!(port.tx(), b"N#");
}

#[test]
fn version_strips_terminators() {
    let (mut p, port) = programmer(b"v1.1 Dec 15 2010 19:25:04\n\r");

    let v = p.version().unwrap();
    assert_eq!(v, "v1.1 Dec 15 2010 19:25:04");
    assert_eq!(port.tx(), b"V#");
}

#[test]
fn version_after_handshake() {
    let (mut p, port) = programmer(b"\n\rv2.0\n\r");

    p.init().unwrap();
    assert_eq!(p.version().unwrap(), "v2.0");
    assert_eq!(port.tx(), b"N#V#");
}

#[test]
fn only_cr_after_line_is_discarded() {
    let (mut p, _port) = programmer(b"\n\r\ra\rb\n");

    p.init().unwrap();
    assert_eq!(p.version().unwrap(), "\ra\rb");
}

#[test]
fn go_does_not_wait() {
    let (mut p, port) = programmer(&[]);

    p.go(0x20001000).unwrap();
    assert_eq!(port.tx(), b"G20001000#");
    assert_eq!(port.polls(), 0);
}

#[test]
fn read_line_returns_terminator_offset() {
    let (mut p, _port) = programmer(b"hello\nworld\n");

    assert_eq!(p.read_line().unwrap(), 5);
    assert_eq!(p.read_line().unwrap(), 5);
}

#[test]
fn read_line_fills_buffer_exactly() {
    let mut rx = vec![b'a'; 1024];
    rx.push(b'\n');
    let (mut p, _port) = programmer(&rx);

    assert_eq!(p.read_line().unwrap(), 1024);
}

#[test]
fn read_line_overflow() {
    let (mut p, _port) = programmer(&[b'a'; 1025]);

    assert_eq!(p.read_line(), Err(Error::BufferOverflow));
}

#[test]
fn read_line_timeout() {
    let (mut p, port) = programmer(b"partial");

    assert_eq!(p.read_line(), Err(Error::ResponseTimeout));
    assert_eq!(port.pending(), 0);
}

#[test]
fn handshake_timeout() {
    let (mut p, _port) = programmer(&[]);

    assert_eq!(p.init(), Err(Error::ResponseTimeout));
    assert_eq!(p.state(), State::Init);
}

#[test]
fn zero_timeout_keeps_polling() {
    let o = Options {
        response_timeout_ms: 0,
        ..Options::default()
    };

    // Reply arrives long after the default timeout would have expired
    let port = SlowPort { reply: b"ok\n", pos: 0, after: 5000 };
    let mut p = Programmer::new(port, NoDelay, o);

    assert_eq!(p.read_line().unwrap(), 2);
}

/// Port that only starts replying once it has been polled `after` times
struct SlowPort {
    reply: &'static [u8],
    pos: usize,
    after: usize,
}

impl embedded_hal::serial::Read<u8> for SlowPort {
    type Error = MockError;

    fn read(&mut self) -> nb::Result<u8, MockError> {
        if self.after > 0 {
            self.after -= 1;
            return Err(nb::Error::WouldBlock);
        }

        match self.reply.get(self.pos) {
            Some(v) => {
                self.pos += 1;
                Ok(*v)
            }
            None => Err(nb::Error::WouldBlock),
        }
    }
}

impl embedded_hal::serial::Write<u8> for SlowPort {
    type Error = MockError;

    fn write(&mut self, _word: u8) -> nb::Result<(), MockError> {
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), MockError> {
        Ok(())
    }
}
