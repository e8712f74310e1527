#[macro_use]
extern crate log;

use std::num::ParseIntError;
use std::path::PathBuf;

use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use simplelog::{Config, LevelFilter, SimpleLogger};
use structopt::StructOpt;

use stm32_serial_bootloader::protocol::{ProtectionLevel, MASS_ERASE};
use stm32_serial_bootloader::{Client, Options};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    command: Operation,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Operation {
    /// Read vendor id and bootloader version
    Version,
    /// List the commands the bootloader supports
    Help,
    /// Read the chip identifier
    ChipId,
    /// Read the readout protection level
    Rdp,
    /// Change the readout protection level (0 or 1)
    SetRdp {
        #[structopt(parse(try_from_str = parse_level))]
        level: ProtectionLevel,
    },
    /// Erase flash sectors
    Erase {
        /// First sector to erase
        #[structopt(long, required_unless = "mass")]
        sector: Option<u8>,
        /// Number of sectors to erase
        #[structopt(long, default_value = "1")]
        count: u8,
        /// Erase the whole bank
        #[structopt(long, conflicts_with = "sector")]
        mass: bool,
    },
    /// Write a binary image to memory
    Write {
        /// Start address, decimal or 0x prefixed hex
        #[structopt(long, parse(try_from_str = parse_u32), default_value = "0x08008000")]
        address: u32,
        /// Image file
        #[structopt(parse(from_os_str))]
        file: PathBuf,
    },
    /// Ask the bootloader to jump to an address
    Jump {
        /// Target address, decimal or 0x prefixed hex
        #[structopt(parse(try_from_str = parse_u32), default_value = "0x08008000")]
        address: u32,
    },
}

fn parse_u32(s: &str) -> Result<u32, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn parse_level(s: &str) -> Result<ProtectionLevel, String> {
    match s {
        "0" => Ok(ProtectionLevel::Level0),
        "1" => Ok(ProtectionLevel::Level1),
        "2" => Err("level 2 permanently locks the device and is not supported".to_string()),
        other => Err(format!("unknown protection level '{}'", other)),
    }
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    info!("Connecting to serial port");

    let mut c = Client::linux(&o.port, o.baud, o.options.clone())
        .with_context(|| format!("Error connecting to serial port {}", o.port))?;

    match o.command {
        Operation::Version => {
            let v = c.get_version()?;
            info!("Bootloader {}", v);
        }
        Operation::Help => {
            let mut commands = [0u8; 255];
            let n = c.get_help(&mut commands)?;
            info!("Supported commands: {}", hex::encode(&commands[..n]));
        }
        Operation::ChipId => {
            let id = c.chip_id()?;
            info!("Chip ID: 0x{:03x}", id);
        }
        Operation::Rdp => {
            let level = c.protection_level()?;
            info!("Readout protection: {:?}", level);
        }
        Operation::SetRdp { level } => {
            if !c.change_protection(level)? {
                bail!("Device refused protection level change");
            }
            info!("Readout protection set to {:?}", level);
        }
        Operation::Erase {
            sector,
            count,
            mass,
        } => {
            let sector = match (mass, sector) {
                (true, _) => MASS_ERASE,
                (false, Some(s)) => s,
                (false, None) => bail!("No sector given"),
            };

            if !c.erase(sector, count)? {
                bail!("Erase failed");
            }
            info!("Erase complete");
        }
        Operation::Write { address, file } => {
            let image = std::fs::read(&file)
                .with_context(|| format!("Error reading {}", file.display()))?;

            info!(
                "Writing {} ({}) to 0x{:08x}",
                file.display(),
                bytefmt::format(image.len() as u64),
                address
            );

            let bar = ProgressBar::new(image.len() as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{bar:40} {bytes}/{total_bytes} ({eta})"),
            );

            let ok = c.write_memory(address, &image, |n| bar.set_position(n as u64))?;
            if !ok {
                bar.abandon();
                bail!("Write failed");
            }

            bar.finish_with_message("done");
        }
        Operation::Jump { address } => {
            if !c.jump(address)? {
                bail!("Device rejected jump to 0x{:08x}", address);
            }
            info!("Device jumped to 0x{:08x}", address);
        }
    }

    Ok(())
}
