//! In-memory stand-ins for the hardware capabilities.
//!
//! Used by the tests and by the emulator binary, which runs the real
//! dispatcher against a serial port without a device attached.

use std::collections::VecDeque;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial;

use crate::address::FLASH_BASE;
use crate::device::DebugInfo;
use crate::flash::{EraseScope, NonVolatileMemory};
use crate::handoff::Handoff;
use crate::protocol::ProtectionLevel;

/// STM32F407 sector sizes in KiB
const STM32F407_SECTORS_KB: [u32; 12] = [16, 16, 16, 16, 64, 128, 128, 128, 128, 128, 128, 128];

/// Primitive calls seen by [`MemoryFlash`], in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmOp {
    Unlock,
    Lock,
    Erase(EraseScope),
    Program(u32),
    UnlockOptions,
    LockOptions,
    ProgramProtection(ProtectionLevel),
    LaunchOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFlashError {
    Locked,
    OutOfRange(u32),
    NoSuchSector(u8),
    /// Failure requested through one of the `fail_*` switches
    Injected,
}

/// Flash bank held in memory, with failure injection
pub struct MemoryFlash {
    base: u32,
    data: Vec<u8>,
    /// (offset, size) of every sector
    sectors: Vec<(u32, u32)>,
    locked: bool,
    options_locked: bool,
    rdp: ProtectionLevel,
    ops: Vec<NvmOp>,

    pub fail_unlock: bool,
    pub fail_erase: bool,
    pub fail_program_at: Option<u32>,
    pub fail_options: bool,
}

impl MemoryFlash {
    /// Flash with the given sector sizes in bytes, starting at `base`
    pub fn new(base: u32, sector_sizes: &[u32]) -> Self {
        let mut sectors = Vec::with_capacity(sector_sizes.len());
        let mut offset = 0;
        for size in sector_sizes {
            sectors.push((offset, *size));
            offset += size;
        }

        Self {
            base,
            data: vec![0xFF; offset as usize],
            sectors,
            locked: true,
            options_locked: true,
            rdp: ProtectionLevel::Level0,
            ops: Vec::new(),
            fail_unlock: false,
            fail_erase: false,
            fail_program_at: None,
            fail_options: false,
        }
    }

    /// 1 MiB single bank STM32F407 layout
    pub fn stm32f407() -> Self {
        let sizes: Vec<u32> = STM32F407_SECTORS_KB.iter().map(|kb| kb * 1024).collect();
        Self::new(FLASH_BASE, &sizes)
    }

    pub fn ops(&self) -> &[NvmOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn options_locked(&self) -> bool {
        self.options_locked
    }

    pub fn set_protection(&mut self, level: ProtectionLevel) {
        self.rdp = level;
    }

    /// Read back `len` bytes from `address`
    pub fn read(&self, address: u32, len: usize) -> &[u8] {
        let offset = (address - self.base) as usize;
        &self.data[offset..offset + len]
    }

    /// Preload contents, bypassing the controller
    pub fn load(&mut self, address: u32, contents: &[u8]) {
        let offset = (address - self.base) as usize;
        self.data[offset..offset + contents.len()].copy_from_slice(contents);
    }

    fn offset(&self, address: u32) -> Result<usize, MemoryFlashError> {
        match address.checked_sub(self.base) {
            Some(o) if (o as usize) < self.data.len() => Ok(o as usize),
            _ => Err(MemoryFlashError::OutOfRange(address)),
        }
    }

    fn erase_sector(&mut self, index: u8) -> Result<(), MemoryFlashError> {
        let (offset, size) = *self
            .sectors
            .get(index as usize)
            .ok_or(MemoryFlashError::NoSuchSector(index))?;
        let (start, end) = (offset as usize, (offset + size) as usize);
        self.data[start..end].iter_mut().for_each(|b| *b = 0xFF);
        Ok(())
    }
}

impl NonVolatileMemory for MemoryFlash {
    type Error = MemoryFlashError;

    fn unlock(&mut self) -> Result<(), Self::Error> {
        self.ops.push(NvmOp::Unlock);
        if self.fail_unlock {
            return Err(MemoryFlashError::Injected);
        }
        self.locked = false;
        Ok(())
    }

    fn lock(&mut self) -> Result<(), Self::Error> {
        self.ops.push(NvmOp::Lock);
        self.locked = true;
        Ok(())
    }

    fn erase(&mut self, scope: EraseScope) -> Result<(), Self::Error> {
        self.ops.push(NvmOp::Erase(scope));
        if self.locked {
            return Err(MemoryFlashError::Locked);
        }
        if self.fail_erase {
            return Err(MemoryFlashError::Injected);
        }

        match scope {
            EraseScope::Mass => {
                self.data.iter_mut().for_each(|b| *b = 0xFF);
                Ok(())
            }
            EraseScope::Sectors { first, count } => {
                for s in first..first.saturating_add(count) {
                    self.erase_sector(s)?;
                }
                Ok(())
            }
        }
    }

    fn program_byte(&mut self, address: u32, value: u8) -> Result<(), Self::Error> {
        self.ops.push(NvmOp::Program(address));
        if self.locked {
            return Err(MemoryFlashError::Locked);
        }
        if self.fail_program_at == Some(address) {
            return Err(MemoryFlashError::Injected);
        }

        let offset = self.offset(address)?;
        // Programming only clears bits
        self.data[offset] &= value;
        Ok(())
    }

    fn protection_level(&mut self) -> ProtectionLevel {
        self.rdp
    }

    fn unlock_options(&mut self) -> Result<(), Self::Error> {
        self.ops.push(NvmOp::UnlockOptions);
        if self.fail_options {
            return Err(MemoryFlashError::Injected);
        }
        self.options_locked = false;
        Ok(())
    }

    fn lock_options(&mut self) -> Result<(), Self::Error> {
        self.ops.push(NvmOp::LockOptions);
        self.options_locked = true;
        Ok(())
    }

    fn program_protection(&mut self, level: ProtectionLevel) -> Result<(), Self::Error> {
        self.ops.push(NvmOp::ProgramProtection(level));
        if self.options_locked {
            return Err(MemoryFlashError::Locked);
        }
        self.rdp = level;
        Ok(())
    }

    fn launch_options(&mut self) -> Result<(), Self::Error> {
        self.ops.push(NvmOp::LaunchOptions);
        Ok(())
    }
}

/// Debug unit reporting a fixed IDCODE
#[derive(Debug, Clone, Copy)]
pub struct FixedDebugInfo(pub u32);

impl DebugInfo for FixedDebugInfo {
    fn id_code(&mut self) -> u32 {
        self.0
    }
}

/// Serial port replaying a fixed input and recording everything written
#[derive(Debug, Default)]
pub struct ScriptedLink {
    input: VecDeque<u8>,
    output: Vec<u8>,
    stall_when_empty: bool,
    fail_next_read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedLinkError {
    /// Read past the end of the script
    Exhausted,
    /// Failure requested through [`ScriptedLink::fail_next_read`]
    Injected,
}

impl ScriptedLink {
    /// Link that fails reads once `input` has been consumed
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            output: Vec::new(),
            stall_when_empty: false,
            fail_next_read: false,
        }
    }

    /// Link that reports "no data yet" forever once `input` has been consumed
    pub fn stalling(input: &[u8]) -> Self {
        Self {
            stall_when_empty: true,
            ..Self::new(input)
        }
    }

    /// Make the next read fail once, without consuming input
    pub fn fail_next_read(&mut self) {
        self.fail_next_read = true;
    }

    pub fn push_input(&mut self, data: &[u8]) {
        self.input.extend(data.iter().copied());
    }

    pub fn remaining(&self) -> usize {
        self.input.len()
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.output)
    }
}

impl serial::Read<u8> for ScriptedLink {
    type Error = ScriptedLinkError;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        if core::mem::take(&mut self.fail_next_read) {
            return Err(nb::Error::Other(ScriptedLinkError::Injected));
        }

        match self.input.pop_front() {
            Some(b) => Ok(b),
            None if self.stall_when_empty => Err(nb::Error::WouldBlock),
            None => Err(nb::Error::Other(ScriptedLinkError::Exhausted)),
        }
    }
}

impl serial::Write<u8> for ScriptedLink {
    type Error = ScriptedLinkError;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.output.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

/// Delay that only keeps count
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptedDelay {
    pub elapsed_ms: u32,
}

impl DelayMs<u32> for ScriptedDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.elapsed_ms += ms;
    }
}

/// Handoff that panics with the requested transfer, for observing it in tests
#[derive(Debug, Default)]
pub struct PanicHandoff;

impl Handoff for PanicHandoff {
    fn boot_application(&mut self, vector_table: u32) -> ! {
        panic!("boot application at 0x{:08x}", vector_table)
    }

    fn jump_to_address(&mut self, address: u32) -> ! {
        panic!("jump to 0x{:08x}", address)
    }
}
