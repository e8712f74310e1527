//! Blocking byte-stream transport between host and device.
//!
//! Every call waits indefinitely and cannot be cancelled; a stalled link
//! stalls the caller.

use core::fmt::Debug;

use embedded_hal::serial::{Read, Write};

use crate::error::LinkError;

pub trait Link {
    /// Fill `buf` completely, blocking until every byte has arrived
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), LinkError>;

    /// Send all of `buf` and flush
    fn write_all(&mut self, buf: &[u8]) -> Result<(), LinkError>;
}

impl<S> Link for S
where
    S: Read<u8> + Write<u8>,
    <S as Read<u8>>::Error: Debug,
    <S as Write<u8>>::Error: Debug,
{
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), LinkError> {
        for b in buf.iter_mut() {
            *b = block!(self.read()).map_err(|e| {
                debug!("Serial read error: {:?}", e);
                LinkError::Read
            })?;
        }
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), LinkError> {
        for b in buf {
            block!(self.write(*b)).map_err(|e| {
                debug!("Serial write error: {:?}", e);
                LinkError::Write
            })?;
        }
        block!(self.flush()).map_err(|e| {
            debug!("Serial flush error: {:?}", e);
            LinkError::Write
        })
    }
}
