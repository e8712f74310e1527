//! Runs the bootloader on a host serial port, backed by in-memory flash.
//!
//! Pair it with the utility through a null-modem cable or a pty pair
//! (`socat -d -d pty,raw,echo=0 pty,raw,echo=0`).

#[macro_use]
extern crate log;

use std::path::PathBuf;

use anyhow::Context;
use simplelog::{LevelFilter, SimpleLogger};
use structopt::StructOpt;

use stm32_serial_bootloader::address::FLASH_BASE;
use stm32_serial_bootloader::handoff::Handoff;
use stm32_serial_bootloader::linux::open_port;
use stm32_serial_bootloader::sim::{FixedDebugInfo, MemoryFlash};
use stm32_serial_bootloader::{Bootloader, Config};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to serve on
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    /// Raw IDCODE reported to the host
    #[structopt(long, default_value = "268919827")]
    id_code: u32,

    /// Image preloaded at the application base
    #[structopt(long, parse(from_os_str))]
    image: Option<PathBuf>,

    /// Behave as if no update was requested at reset
    #[structopt(long)]
    boot: bool,

    /// Log level for console output
    #[structopt(long, default_value = "debug")]
    log_level: LevelFilter,
}

const FLASH_END: u32 = FLASH_BASE + 1024 * 1024;

/// Ends the emulator where a device would leave the bootloader
struct ExitHandoff;

impl Handoff for ExitHandoff {
    fn boot_application(&mut self, vector_table: u32) -> ! {
        info!("Booting application at 0x{:08x}", vector_table);
        std::process::exit(0)
    }

    fn jump_to_address(&mut self, address: u32) -> ! {
        info!("Jumping to 0x{:08x}", address);
        std::process::exit(0)
    }
}

fn main() -> anyhow::Result<()> {
    let o = Args::from_args();

    let _ = SimpleLogger::init(o.log_level, simplelog::Config::default());

    let config = Config::default();

    let mut flash = MemoryFlash::stm32f407();
    if let Some(path) = &o.image {
        let image =
            std::fs::read(path).with_context(|| format!("Error reading {}", path.display()))?;
        anyhow::ensure!(
            image.len() <= (FLASH_END - config.application_base) as usize,
            "Image of {} bytes does not fit in flash",
            image.len()
        );
        flash.load(config.application_base, &image);
        info!("Loaded {} bytes at 0x{:08x}", image.len(), config.application_base);
    }

    let port = open_port(&o.port, o.baud)
        .with_context(|| format!("Error opening serial port {}", o.port))?;

    info!("Emulating bootloader on {}", o.port);

    let mut bootloader = Bootloader::new(port, flash, FixedDebugInfo(o.id_code), config);
    bootloader.start(!o.boot, &mut ExitHandoff)
}
