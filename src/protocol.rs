
use core::convert::TryFrom;

pub const ACK: u8 = 0xCD;
pub const NACK: u8 = 0xAB;

/// Sector marker requesting an erase of the whole bank
pub const MASS_ERASE: u8 = 0xFF;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum Command {
    /// Fetch vendor id and bootloader version
    GetVersion = 0x10,

    /// Fetch the list of supported commands
    GetHelp = 0x11,

    /// Gets the chip ID
    GetChipId = 0x12,

    /// Gets the current readout protection level
    GetProtectionLevel = 0x13,

    /// Jumps to code located in the internal Flash memory or in SRAM.
    JumpToAddress = 0x14,

    /// Erases a range of sectors or the whole flash bank.
    EraseFlash = 0x15,

    /// Writes up to one frame of bytes starting from an address specified by the host.
    MemoryWrite = 0x16,

    /// Enables read/write protection for some sectors (not implemented by the device).
    EnableRwProtect = 0x17,

    /// Reads memory (not implemented by the device).
    MemoryRead = 0x18,

    /// Reads sector protection status (not implemented by the device).
    ReadSectorStatus = 0x19,

    /// Reads the OTP area (not implemented by the device).
    OtpRead = 0x20,

    /// Changes the readout protection level.
    ChangeProtectionLevel = 0x21,
}

/// Commands advertised by `GetHelp`, in wire order
pub const SUPPORTED_COMMANDS: [u8; 12] = [
    Command::GetVersion as u8,
    Command::GetHelp as u8,
    Command::GetChipId as u8,
    Command::GetProtectionLevel as u8,
    Command::JumpToAddress as u8,
    Command::EraseFlash as u8,
    Command::MemoryWrite as u8,
    Command::EnableRwProtect as u8,
    Command::MemoryRead as u8,
    Command::ReadSectorStatus as u8,
    Command::OtpRead as u8,
    Command::ChangeProtectionLevel as u8,
];

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        let c = match v {
            0x10 => Command::GetVersion,
            0x11 => Command::GetHelp,
            0x12 => Command::GetChipId,
            0x13 => Command::GetProtectionLevel,
            0x14 => Command::JumpToAddress,
            0x15 => Command::EraseFlash,
            0x16 => Command::MemoryWrite,
            0x17 => Command::EnableRwProtect,
            0x18 => Command::MemoryRead,
            0x19 => Command::ReadSectorStatus,
            0x20 => Command::OtpRead,
            0x21 => Command::ChangeProtectionLevel,
            other => return Err(other),
        };
        Ok(c)
    }
}

/// Bootloader identification returned by `GetVersion`
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Version {
    pub vendor_id: u8,
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const fn to_bytes(&self) -> [u8; 4] {
        [self.vendor_id, self.major, self.minor, self.patch]
    }

    pub const fn from_bytes(b: [u8; 4]) -> Self {
        Self {
            vendor_id: b[0],
            major: b[1],
            minor: b[2],
            patch: b[3],
        }
    }
}

impl core::fmt::Display for Version {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "vendor {} v{}.{}.{}",
            self.vendor_id, self.major, self.minor, self.patch
        )
    }
}

/// Readout protection (RDP) level, encoded as the option byte value
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum ProtectionLevel {
    /// No protection
    Level0 = 0xAA,
    /// Debug and boot-from-RAM access to flash blocked
    Level1 = 0x55,
    /// Chip fully locked, irreversible
    Level2 = 0xCC,
}

impl ProtectionLevel {
    /// Decode an option byte read back from the device.
    ///
    /// Any value other than the level 0 and level 2 codes means level 1.
    pub fn from_option_byte(v: u8) -> Self {
        match v {
            0xAA => ProtectionLevel::Level0,
            0xCC => ProtectionLevel::Level2,
            _ => ProtectionLevel::Level1,
        }
    }

    pub fn as_option_byte(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for ProtectionLevel {
    type Error = u8;

    /// Strict decoding used for change requests
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0xAA => Ok(ProtectionLevel::Level0),
            0x55 => Ok(ProtectionLevel::Level1),
            0xCC => Ok(ProtectionLevel::Level2),
            other => Err(other),
        }
    }
}

/// Validity flag sent in reply to `JumpToAddress`, and used internally for writes
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum AddressStatus {
    Invalid = 0,
    Valid = 1,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum EraseStatus {
    Invalid = 2,
    Erased = 3,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum WriteStatus {
    Fail = 0,
    Done = 1,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum ProtectionStatus {
    Unchanged = 0,
    Changed = 1,
}
