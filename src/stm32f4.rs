//! Hardware backends for STM32F40x/41x parts, on the `stm32f4` PAC.
//!
//! Owns the FLASH interface and DBGMCU blocks; the serial driver, clock
//! tree and vector table setup stay with the board support code.

use core::ptr::write_volatile;

use ::stm32f4::stm32f407::{DBGMCU, FLASH};

use crate::device::DebugInfo;
use crate::flash::{EraseScope, NonVolatileMemory};
use crate::protocol::ProtectionLevel;

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xCDEF_89AB;
const OPTKEY1: u32 = 0x0819_2A3B;
const OPTKEY2: u32 = 0x4C5D_6E7F;

const PSIZE_X8: u8 = 0b00;
/// Parallelism for a 2.7 V to 3.6 V supply
const PSIZE_X32: u8 = 0b10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stm32f4FlashError {
    /// Control register still locked after writing the key sequence
    Locked,
    /// Option control register still locked after writing the key sequence
    OptionsLocked,
    /// Status register contents after an operation raised an error flag
    Status(u32),
}

/// The embedded flash interface
pub struct Stm32f4Flash {
    flash: FLASH,
}

impl Stm32f4Flash {
    pub fn new(flash: FLASH) -> Self {
        Self { flash }
    }

    /// Give the peripheral back
    pub fn free(self) -> FLASH {
        self.flash
    }

    /// Spin until the controller is idle, then report and clear error flags
    fn wait(&mut self) -> Result<(), Stm32f4FlashError> {
        while self.flash.sr.read().bsy().bit_is_set() {}

        let sr = self.flash.sr.read();
        let failed = sr.wrperr().bit_is_set()
            || sr.pgaerr().bit_is_set()
            || sr.pgperr().bit_is_set()
            || sr.pgserr().bit_is_set();

        // Flags are write-one-to-clear, writing back what was read clears them all
        self.flash.sr.write(|w| unsafe { w.bits(sr.bits()) });

        match failed {
            false => Ok(()),
            true => Err(Stm32f4FlashError::Status(sr.bits())),
        }
    }

    fn erase_sector(&mut self, sector: u8) -> Result<(), Stm32f4FlashError> {
        self.wait()?;

        self.flash.cr.modify(|_, w| {
            unsafe { w.psize().bits(PSIZE_X32).snb().bits(sector) }
                .ser()
                .set_bit()
                .mer()
                .clear_bit()
                .pg()
                .clear_bit()
        });
        self.flash.cr.modify(|_, w| w.strt().set_bit());

        let res = self.wait();
        self.flash.cr.modify(|_, w| w.ser().clear_bit());
        res
    }

    fn erase_bank(&mut self) -> Result<(), Stm32f4FlashError> {
        self.wait()?;

        self.flash.cr.modify(|_, w| {
            unsafe { w.psize().bits(PSIZE_X32) }
                .mer()
                .set_bit()
                .ser()
                .clear_bit()
                .pg()
                .clear_bit()
        });
        self.flash.cr.modify(|_, w| w.strt().set_bit());

        let res = self.wait();
        self.flash.cr.modify(|_, w| w.mer().clear_bit());
        res
    }
}

impl NonVolatileMemory for Stm32f4Flash {
    type Error = Stm32f4FlashError;

    fn unlock(&mut self) -> Result<(), Self::Error> {
        if self.flash.cr.read().lock().bit_is_set() {
            self.flash.keyr.write(|w| unsafe { w.key().bits(KEY1) });
            self.flash.keyr.write(|w| unsafe { w.key().bits(KEY2) });
        }

        match self.flash.cr.read().lock().bit_is_set() {
            false => Ok(()),
            true => Err(Stm32f4FlashError::Locked),
        }
    }

    fn lock(&mut self) -> Result<(), Self::Error> {
        self.flash.cr.modify(|_, w| w.lock().set_bit());
        Ok(())
    }

    fn erase(&mut self, scope: EraseScope) -> Result<(), Self::Error> {
        match scope {
            EraseScope::Mass => self.erase_bank(),
            EraseScope::Sectors { first, count } => {
                for s in first..first.saturating_add(count) {
                    self.erase_sector(s)?;
                }
                Ok(())
            }
        }
    }

    fn program_byte(&mut self, address: u32, value: u8) -> Result<(), Self::Error> {
        self.wait()?;

        self.flash.cr.modify(|_, w| {
            unsafe { w.psize().bits(PSIZE_X8) }
                .pg()
                .set_bit()
                .ser()
                .clear_bit()
                .mer()
                .clear_bit()
        });

        unsafe { write_volatile(address as *mut u8, value) };

        let res = self.wait();
        self.flash.cr.modify(|_, w| w.pg().clear_bit());
        res
    }

    fn protection_level(&mut self) -> ProtectionLevel {
        ProtectionLevel::from_option_byte(self.flash.optcr.read().rdp().bits())
    }

    fn unlock_options(&mut self) -> Result<(), Self::Error> {
        if self.flash.optcr.read().optlock().bit_is_set() {
            self.flash.optkeyr.write(|w| unsafe { w.optkey().bits(OPTKEY1) });
            self.flash.optkeyr.write(|w| unsafe { w.optkey().bits(OPTKEY2) });
        }

        match self.flash.optcr.read().optlock().bit_is_set() {
            false => Ok(()),
            true => Err(Stm32f4FlashError::OptionsLocked),
        }
    }

    fn lock_options(&mut self) -> Result<(), Self::Error> {
        self.flash.optcr.modify(|_, w| w.optlock().set_bit());
        Ok(())
    }

    fn program_protection(&mut self, level: ProtectionLevel) -> Result<(), Self::Error> {
        self.wait()?;

        let code = level.as_option_byte();
        self.flash.optcr.modify(|_, w| unsafe { w.rdp().bits(code) });
        Ok(())
    }

    fn launch_options(&mut self) -> Result<(), Self::Error> {
        self.flash.optcr.modify(|_, w| w.optstrt().set_bit());
        self.wait()
    }
}

/// Debug MCU configuration block
pub struct DbgMcu {
    dbgmcu: DBGMCU,
}

impl DbgMcu {
    pub fn new(dbgmcu: DBGMCU) -> Self {
        Self { dbgmcu }
    }

    pub fn free(self) -> DBGMCU {
        self.dbgmcu
    }
}

impl DebugInfo for DbgMcu {
    fn id_code(&mut self) -> u32 {
        self.dbgmcu.idcode.read().bits()
    }
}
