//! STM32 Serial Bootloader.
//!
//! Device side firmware update agent: receives length-prefixed, CRC-checked
//! command frames over a serial link and erases, programs and protects the
//! on-chip flash, or hands control to an application image. A host side
//! client for the same protocol lives in [`host`].
//!
//! Hardware is reached only through the [`flash::NonVolatileMemory`],
//! [`device::DebugInfo`] and [`handoff::Handoff`] traits, so the whole
//! protocol runs on a desktop against the [`sim`] doubles.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

pub mod address;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod flash;
pub mod frame;
pub mod handoff;
pub mod host;
pub mod link;
pub mod protocol;

#[cfg(any(test, feature = "std"))]
pub mod sim;

#[cfg(all(feature = "stm32f4", target_arch = "arm"))]
pub mod stm32f4;

#[cfg(feature = "linux")]
pub mod linux;

pub use config::Config;
pub use dispatcher::{Bootloader, State, Step};
pub use error::{ClientError, LinkError, RequestError};
pub use host::{Client, Options};
