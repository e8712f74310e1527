//! Transfer of control out of the bootloader.
//!
//! Both operations are terminal: once called, the bootloader is gone.

/// Offset of the reset vector within a Cortex-M vector table
pub const RESET_VECTOR_OFFSET: u32 = 4;

pub trait Handoff {
    /// Start the resident application whose vector table sits at `vector_table`.
    ///
    /// Loads the initial stack pointer and reset vector from the table,
    /// returns clocks and peripherals to their reset state, then enters
    /// the reset handler.
    fn boot_application(&mut self, vector_table: u32) -> !;

    /// Branch straight to `address`, leaving stack and clocks as they are
    fn jump_to_address(&mut self, address: u32) -> !;
}

/// Branch target for `address` with the Thumb state bit set
pub fn thumb_entry(address: u32) -> u32 {
    address | 1
}

#[cfg(all(feature = "stm32f4", target_arch = "arm"))]
pub use self::cortex::CortexM;

#[cfg(all(feature = "stm32f4", target_arch = "arm"))]
mod cortex {
    use core::ptr::read_volatile;

    use super::{thumb_entry, Handoff, RESET_VECTOR_OFFSET};

    /// Handoff for Cortex-M cores.
    ///
    /// `deinit` restores clocks and peripherals to their reset configuration
    /// before an application boot; it belongs to the board support code.
    pub struct CortexM<F> {
        deinit: F,
    }

    impl<F: FnMut()> CortexM<F> {
        pub fn new(deinit: F) -> Self {
            Self { deinit }
        }
    }

    impl<F: FnMut()> Handoff for CortexM<F> {
        fn boot_application(&mut self, vector_table: u32) -> ! {
            let (msp, rv) = unsafe {
                (
                    read_volatile(vector_table as *const u32),
                    read_volatile((vector_table + RESET_VECTOR_OFFSET) as *const u32),
                )
            };

            info!("Booting application, msp = 0x{:08x}, rv = 0x{:08x}", msp, rv);

            (self.deinit)();

            // Sets MSP then branches to the reset handler
            unsafe { cortex_m::asm::bootstrap(msp as *const u32, rv as *const u32) }
        }

        fn jump_to_address(&mut self, address: u32) -> ! {
            let entry = thumb_entry(address);
            info!("Jump to: 0x{:08x}", entry);

            unsafe {
                let f: extern "C" fn() -> ! = core::mem::transmute(entry as usize);
                f()
            }
        }
    }
}
