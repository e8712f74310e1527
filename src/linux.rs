use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use linux_embedded_hal::{Delay, Serial};
use serial_core::{
    BaudRate, CharSize, Error as SerialError, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};

use crate::host::{Client, Options};

/// Open a serial port with the link settings the bootloader uses (8N1, no flow control)
pub fn open_port<P: AsRef<Path>>(port: P, baud: usize) -> Result<Serial, SerialError> {
    // Open port
    let mut port = Serial::open(port.as_ref())?;

    // Apply settings
    let mut settings = port.0.read_settings()?;

    settings.set_char_size(CharSize::Bits8);
    settings.set_stop_bits(StopBits::Stop1);
    settings.set_baud_rate(BaudRate::from_speed(baud))?;
    settings.set_flow_control(FlowControl::FlowNone);
    settings.set_parity(Parity::ParityNone);

    port.0.write_settings(&settings)?;

    // Short reads so the client can poll with its own timeout
    port.0.set_timeout(Duration::from_millis(10))?;

    Ok(port)
}

impl Client<Serial, Delay, IoErrorKind> {
    /// Create a new linux serial port client instance
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, SerialError> {
        let port = open_port(port, baud)?;

        // Return instance
        Ok(Self::new(port, Delay {}, options))
    }
}
