#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind as IoErrorKind, Write};
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use linux_embedded_hal::{Delay, Serial};

use samba_loader::linux::DEFAULT_BAUD;
use samba_loader::{Options, Programmer};

const USAGE: &str = "commands: v | g <addr> | w <addr> <file> | r <addr> <len> <file>";

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to
    port: String,

    /// Commands to execute in order (v, g <addr>, w <addr> <file>, r <addr> <len> <file>)
    #[structopt(required = true)]
    commands: Vec<String>,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, Debug, PartialEq)]
enum Action {
    /// Print the monitor version
    Version,
    /// Branch to an address
    Go(u32),
    /// Upload a file to an address
    Write { address: u32, file: PathBuf },
    /// Download a number of bytes from an address to a file
    Read { address: u32, length: u32, file: PathBuf },
}

/// Parse `0x` prefixed hex or decimal
fn parse_int(s: &str) -> Result<u32, String> {
    let r = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(h) => u32::from_str_radix(h, 16),
        None => s.parse(),
    };
    r.map_err(|e| format!("invalid number '{}': {}", s, e))
}

/// Take the next argument for `cmd`
fn arg<'a, I>(i: &mut I, name: &str, cmd: &str) -> Result<&'a str, String>
where
    I: Iterator<Item = &'a String>,
{
    i.next().map(|v| v.as_str()).ok_or_else(|| format!("'{}' missing {} argument", cmd, name))
}

fn parse_actions(args: &[String]) -> Result<Vec<Action>, String> {
    let mut actions = vec![];
    let mut i = args.iter();

    while let Some(cmd) = i.next() {
        let cmd = cmd.as_str();

        let a = match cmd {
            "v" => Action::Version,
            "g" => Action::Go(parse_int(arg(&mut i, "address", cmd)?)?),
            "w" => Action::Write {
                address: parse_int(arg(&mut i, "address", cmd)?)?,
                file: arg(&mut i, "file", cmd)?.into(),
            },
            "r" => Action::Read {
                address: parse_int(arg(&mut i, "address", cmd)?)?,
                length: parse_int(arg(&mut i, "length", cmd)?)?,
                file: arg(&mut i, "file", cmd)?.into(),
            },
            _ => return Err(format!("unknown command '{}'", cmd)),
        };

        actions.push(a);
    }

    Ok(actions)
}

fn run(p: &mut Programmer<Serial, Delay, IoErrorKind>, action: &Action) -> anyhow::Result<()> {
    match action {
        Action::Version => {
            let v = p.version()?;
            println!("{}", v);
        },
        Action::Go(address) => {
            info!("Branching to 0x{:08x}", address);
            p.go(*address)?;
        },
        Action::Write { address, file } => {
            let f = File::open(file)
                .with_context(|| format!("opening {}", file.display()))?;
            let mut f = BufReader::new(f);

            info!("Writing {} to 0x{:08x}", file.display(), address);
            let s = p.upload(*address, &mut f)?;

            info!("Wrote {} in {} blocks", bytefmt::format(s.bytes_transferred), s.blocks);
        },
        Action::Read { address, length, file } => {
            let f = File::create(file)
                .with_context(|| format!("creating {}", file.display()))?;
            let mut f = BufWriter::new(f);

            info!("Reading {} from 0x{:08x}", bytefmt::format(*length as u64), address);
            let s = p.download(*address, *length, &mut f)?;
            f.flush().with_context(|| format!("writing {}", file.display()))?;

            info!("Read {} to {}", bytefmt::format(s.bytes_transferred), file.display());
        },
    }

    Ok(())
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    let actions = match parse_actions(&o.commands) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            process::exit(1);
        }
    };

    if o.baud != DEFAULT_BAUD {
        warn!("Monitor expects {} baud, using {}", DEFAULT_BAUD, o.baud);
    }

    info!("Connecting to serial port");

    let mut p = match Programmer::linux(&o.port, o.baud, o.options) {
        Ok(p) => p,
        Err(e) => {
            error!("Error connecting to serial port: {:#}", e);
            process::exit(1);
        }
    };

    info!("Connecting to bootloader");

    if let Err(e) = p.init() {
        error!("Error connecting to bootloader: {}", e);
        process::exit(1);
    }

    info!("Bootloader connected!");

    for a in &actions {
        if let Err(e) = run(&mut p, a) {
            error!("Error executing {:?}: {:#}", a, e);
            process::exit(1);
        }
    }
}
