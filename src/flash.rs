//! Flash programming engine.
//!
//! [`FlashEngine`] wraps the raw controller primitives with the locking
//! discipline the hardware expects: the controller is unlocked for the
//! duration of one operation and relocked on every path out of it,
//! failures included.

use core::fmt::Debug;

use crate::protocol::{EraseStatus, ProtectionLevel, ProtectionStatus, WriteStatus, MASS_ERASE};

/// What an erase covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseScope {
    /// Every sector in the bank
    Mass,
    /// `count` contiguous sectors starting at `first`
    Sectors { first: u8, count: u8 },
}

/// Non-volatile memory controller primitives.
///
/// Implementations are trusted to do what they are asked; the engine only
/// interprets their success or failure.
pub trait NonVolatileMemory {
    type Error: Debug;

    /// Unlock the program memory control register
    fn unlock(&mut self) -> Result<(), Self::Error>;

    fn lock(&mut self) -> Result<(), Self::Error>;

    fn erase(&mut self, scope: EraseScope) -> Result<(), Self::Error>;

    /// Program a single byte
    fn program_byte(&mut self, address: u32, value: u8) -> Result<(), Self::Error>;

    /// Current readout protection level from the option bytes
    fn protection_level(&mut self) -> ProtectionLevel;

    /// Unlock the option byte control register
    fn unlock_options(&mut self) -> Result<(), Self::Error>;

    fn lock_options(&mut self) -> Result<(), Self::Error>;

    fn program_protection(&mut self, level: ProtectionLevel) -> Result<(), Self::Error>;

    /// Reload the option bytes; on hardware this usually resets the device
    fn launch_options(&mut self) -> Result<(), Self::Error>;
}

pub struct FlashEngine<N> {
    nvm: N,
    last_sector: u8,
}

impl<N> FlashEngine<N>
where
    N: NonVolatileMemory,
{
    pub fn new(nvm: N, last_sector: u8) -> Self {
        Self { nvm, last_sector }
    }

    pub fn inner(&self) -> &N {
        &self.nvm
    }

    pub fn inner_mut(&mut self) -> &mut N {
        &mut self.nvm
    }

    pub fn release(self) -> N {
        self.nvm
    }

    /// Map an erase request onto a scope, if it is legal
    pub fn erase_scope(&self, sector: u8, count: u8) -> Option<EraseScope> {
        if sector == MASS_ERASE {
            return Some(EraseScope::Mass);
        }

        if u16::from(sector) + u16::from(count) <= u16::from(self.last_sector) {
            Some(EraseScope::Sectors {
                first: sector,
                count,
            })
        } else {
            None
        }
    }

    /// Erase sectors `sector..sector + count`, or the whole bank for [`MASS_ERASE`]
    pub fn erase(&mut self, sector: u8, count: u8) -> EraseStatus {
        let scope = match self.erase_scope(sector, count) {
            Some(s) => s,
            None => {
                warn!("Rejected erase of {} sectors from {}", count, sector);
                return EraseStatus::Invalid;
            }
        };

        let status = match self.nvm.unlock().and_then(|_| self.nvm.erase(scope)) {
            Ok(()) => EraseStatus::Erased,
            Err(e) => {
                error!("Erase {:?} failed: {:?}", scope, e);
                EraseStatus::Invalid
            }
        };

        if let Err(e) = self.nvm.lock() {
            warn!("Flash relock failed: {:?}", e);
        }

        status
    }

    /// Program `data` byte by byte from `start`.
    ///
    /// Stops at the first failing byte. Bytes already written stay written.
    pub fn program(&mut self, start: u32, data: &[u8]) -> WriteStatus {
        let mut status = WriteStatus::Fail;

        match self.nvm.unlock() {
            Ok(()) => {
                for (i, b) in data.iter().enumerate() {
                    let address = start.wrapping_add(i as u32);
                    if let Err(e) = self.nvm.program_byte(address, *b) {
                        error!("Program failed at 0x{:08x}: {:?}", address, e);
                        status = WriteStatus::Fail;
                        break;
                    }
                    status = WriteStatus::Done;
                }
            }
            Err(e) => error!("Flash unlock failed: {:?}", e),
        }

        if let Err(e) = self.nvm.lock() {
            warn!("Flash relock failed: {:?}", e);
        }

        status
    }

    pub fn protection_level(&mut self) -> ProtectionLevel {
        self.nvm.protection_level()
    }

    /// Reprogram the readout protection level.
    ///
    /// Level 2 permanently locks the chip and is always refused here, whatever
    /// the caller has already checked.
    pub fn set_protection_level(&mut self, level: ProtectionLevel) -> ProtectionStatus {
        if level == ProtectionLevel::Level2 {
            warn!("Refusing to set readout protection level 2");
            return ProtectionStatus::Unchanged;
        }

        let nvm = &mut self.nvm;
        let res = nvm
            .unlock_options()
            .and_then(|_| nvm.program_protection(level))
            .and_then(|_| nvm.launch_options())
            .and_then(|_| nvm.lock_options());

        let status = match res {
            Ok(()) => ProtectionStatus::Changed,
            Err(e) => {
                error!("Protection change to {:?} failed: {:?}", level, e);
                ProtectionStatus::Unchanged
            }
        };

        if let Err(e) = self.nvm.lock_options() {
            warn!("Option byte relock failed: {:?}", e);
        }

        status
    }
}
