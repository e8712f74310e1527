//! Device configuration

use crate::address::{Region, STM32F407_REGIONS};
use crate::protocol::Version;

pub const VENDOR_ID: u8 = 100;

/// Start of flash sector 2, where the resident application lives
pub const STM32F407_APPLICATION_BASE: u32 = 0x0800_8000;

/// Highest sector index on a 1 MiB STM32F407
pub const STM32F407_LAST_SECTOR: u8 = 11;

#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Reported by `GetVersion`
    pub version: Version,

    /// Memory the host may jump to or write into
    pub regions: &'static [Region],

    /// Vector table of the resident application
    pub application_base: u32,

    /// Erase requests must satisfy `sector + count <= last_sector`
    pub last_sector: u8,

    /// Acknowledge erase requests twice, before and after checksum
    /// verification, as existing host tools expect
    pub erase_double_ack: bool,
}

impl Config {
    pub const fn stm32f407() -> Self {
        Self {
            version: Version {
                vendor_id: VENDOR_ID,
                major: 1,
                minor: 0,
                patch: 0,
            },
            regions: &STM32F407_REGIONS,
            application_base: STM32F407_APPLICATION_BASE,
            last_sector: STM32F407_LAST_SECTOR,
            erase_double_ack: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::stm32f407()
    }
}
