//! Host side of the protocol, for driving a device over a serial port

use core::fmt::Debug;
use core::marker::PhantomData;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use crate::error::ClientError;
use crate::frame::{Frame, MAX_PAYLOAD};
use crate::protocol::{
    AddressStatus, Command, EraseStatus, ProtectionLevel, ProtectionStatus, Version, WriteStatus,
    ACK, NACK,
};

/// Address, length byte
const WRITE_HEADER_LEN: usize = 5;

/// Most data bytes a single write frame can carry
pub const MAX_WRITE_CHUNK: usize = MAX_PAYLOAD - WRITE_HEADER_LEN;

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Timeout to wait for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "5000"))]
    pub response_timeout_ms: u32,

    /// Period to poll for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,

    /// Data bytes per write request
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "128"))]
    pub chunk_size: usize,

    /// Expect the single erase acknowledgement of devices without the doubled ACK
    #[cfg_attr(feature = "structopt", structopt(long = "single-erase-ack", parse(from_flag = std::ops::Not::not)))]
    pub erase_double_ack: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5000,
            poll_delay_ms: 1,
            chunk_size: 128,
            erase_double_ack: true,
        }
    }
}

pub struct Client<P, D, E> {
    options: Options,
    port: P,
    delay: D,
    _err: PhantomData<E>,
}

impl<P, D, E> Client<P, D, E>
where
    P: Read<u8, Error = E> + Write<u8, Error = E>,
    D: DelayMs<u32>,
    E: Debug,
{
    /// Create a new client instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self {
            options,
            port,
            delay,
            _err: PhantomData,
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn get_version(&mut self) -> Result<Version, ClientError<E>> {
        let mut b = [0u8; 4];
        self.request_exact(Command::GetVersion, &[], &mut b)?;
        Ok(Version::from_bytes(b))
    }

    /// Fetch the supported command opcodes, returning how many were written to `commands`
    pub fn get_help(&mut self, commands: &mut [u8]) -> Result<usize, ClientError<E>> {
        self.request(Command::GetHelp, &[], commands)
    }

    pub fn chip_id(&mut self) -> Result<u16, ClientError<E>> {
        let mut b = [0u8; 2];
        self.request_exact(Command::GetChipId, &[], &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    pub fn protection_level(&mut self) -> Result<ProtectionLevel, ClientError<E>> {
        let mut b = [0u8; 1];
        self.request_exact(Command::GetProtectionLevel, &[], &mut b)?;
        Ok(ProtectionLevel::from_option_byte(b[0]))
    }

    /// Ask the device to jump to `address`, returns whether it accepted
    pub fn jump(&mut self, address: u32) -> Result<bool, ClientError<E>> {
        let mut b = [0u8; 1];
        self.request_exact(Command::JumpToAddress, &address.to_le_bytes(), &mut b)?;
        Ok(b[0] == AddressStatus::Valid as u8)
    }

    /// Erase `count` sectors from `sector`, or the whole bank with [`crate::protocol::MASS_ERASE`]
    pub fn erase(&mut self, sector: u8, count: u8) -> Result<bool, ClientError<E>> {
        debug!("Erasing {} sectors from {}", count, sector);

        self.send(Command::EraseFlash, &[sector, count])?;

        if self.options.erase_double_ack {
            self.await_ack()?;
        }

        let mut b = [0u8; 1];
        self.read_reply(&mut b)?;
        Ok(b[0] == EraseStatus::Erased as u8)
    }

    /// Write one frame worth of data at `address`
    pub fn write_chunk(&mut self, address: u32, data: &[u8]) -> Result<bool, ClientError<E>> {
        if data.len() > MAX_WRITE_CHUNK {
            return Err(ClientError::PayloadTooLarge(data.len()));
        }

        let mut payload = [0u8; MAX_PAYLOAD];
        payload[..4].copy_from_slice(&address.to_le_bytes());
        payload[4] = data.len() as u8;
        payload[WRITE_HEADER_LEN..WRITE_HEADER_LEN + data.len()].copy_from_slice(data);

        let mut b = [0u8; 1];
        self.request_exact(
            Command::MemoryWrite,
            &payload[..WRITE_HEADER_LEN + data.len()],
            &mut b,
        )?;
        Ok(b[0] == WriteStatus::Done as u8)
    }

    /// Write `data` from `address` in `chunk_size` pieces.
    ///
    /// `progress` is called with the number of bytes written so far. Stops at
    /// the first chunk the device refuses and returns false. Images running
    /// past the top of the address space are refused before anything is sent.
    pub fn write_memory<F: FnMut(usize)>(
        &mut self,
        address: u32,
        data: &[u8],
        mut progress: F,
    ) -> Result<bool, ClientError<E>> {
        if u64::from(address) + data.len() as u64 > 1 << 32 {
            return Err(ClientError::AddressOverflow {
                address,
                len: data.len(),
            });
        }

        let chunk_size = self.options.chunk_size.max(1).min(MAX_WRITE_CHUNK);
        let mut written = 0;

        for chunk in data.chunks(chunk_size) {
            let a = address.wrapping_add(written as u32);
            if !self.write_chunk(a, chunk)? {
                error!("Device rejected write at 0x{:08x}", a);
                return Ok(false);
            }

            written += chunk.len();
            progress(written);
        }

        Ok(true)
    }

    pub fn change_protection(&mut self, level: ProtectionLevel) -> Result<bool, ClientError<E>> {
        let mut b = [0u8; 1];
        self.request_exact(
            Command::ChangeProtectionLevel,
            &[level.as_option_byte()],
            &mut b,
        )?;
        Ok(b[0] == ProtectionStatus::Changed as u8)
    }

    fn request_exact(
        &mut self,
        command: Command,
        payload: &[u8],
        reply: &mut [u8],
    ) -> Result<(), ClientError<E>> {
        let n = self.request(command, payload, reply)?;
        if n != reply.len() {
            debug!("Expected {} reply bytes, got {}", reply.len(), n);
            return Err(ClientError::ShortReply {
                expected: reply.len(),
                got: n,
            });
        }
        Ok(())
    }

    /// Send a request and read the acknowledged reply into `reply`
    pub fn request(
        &mut self,
        command: Command,
        payload: &[u8],
        reply: &mut [u8],
    ) -> Result<usize, ClientError<E>> {
        self.send(command, payload)?;
        self.read_reply(reply)
    }

    fn send(&mut self, command: Command, payload: &[u8]) -> Result<(), ClientError<E>> {
        let frame = Frame::encode(command as u8, payload)
            .ok_or(ClientError::PayloadTooLarge(payload.len()))?;

        trace!("Sending {:?}", frame);

        for b in frame.as_bytes() {
            block!(self.port.write(*b)).map_err(ClientError::Serial)?;
        }
        block!(self.port.flush()).map_err(ClientError::Serial)
    }

    fn read_reply(&mut self, reply: &mut [u8]) -> Result<usize, ClientError<E>> {
        let len = self.await_ack()? as usize;
        if len > reply.len() {
            return Err(ClientError::ReplyTooLong(len));
        }

        for b in reply[..len].iter_mut() {
            *b = self.read_byte()?;
        }

        Ok(len)
    }

    /// Wait for an ACK and return the reply length that follows it
    fn await_ack(&mut self) -> Result<u8, ClientError<E>> {
        match self.read_byte()? {
            ACK => {
                let len = self.read_byte()?;
                trace!("Received bootloader ack, {} bytes follow", len);
                Ok(len)
            }
            NACK => {
                debug!("Received bootloader nack");
                Err(ClientError::Nack)
            }
            v => {
                debug!("Received unexpected value: 0x{:x}", v);
                Err(ClientError::InvalidResponse(v))
            }
        }
    }

    fn read_byte(&mut self) -> Result<u8, ClientError<E>> {
        // Zero delay still spends the timeout, one poll per millisecond
        let step = self.options.poll_delay_ms.max(1);
        let mut t = 0;

        loop {
            // Attempt to read from serial port
            match self.port.read() {
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(ClientError::Serial(e)),
                Ok(v) => return Ok(v),
            };

            // Wait for delay period
            self.delay.delay_ms(self.options.poll_delay_ms);
            t += step;

            if t > self.options.response_timeout_ms {
                error!("Receive timeout");
                return Err(ClientError::ResponseTimeout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::checksum;
    use crate::protocol::{MASS_ERASE, SUPPORTED_COMMANDS};
    use crate::sim::{ScriptedDelay, ScriptedLink, ScriptedLinkError};

    type TestClient = Client<ScriptedLink, ScriptedDelay, ScriptedLinkError>;

    fn client(replies: &[u8]) -> TestClient {
        Client::new(
            ScriptedLink::stalling(replies),
            ScriptedDelay::default(),
            Options::default(),
        )
    }

    #[test]
    fn version_request_and_reply() {
        let mut c = client(&[ACK, 4, 100, 1, 0, 0]);

        let v = c.get_version().unwrap();
        assert_eq!(
            v,
            Version {
                vendor_id: 100,
                major: 1,
                minor: 0,
                patch: 0
            }
        );

        let sent = c.port().output();
        assert_eq!(sent.len(), 6);
        assert_eq!(&sent[..2], &[5, 0x10]);
        assert_eq!(&sent[2..], &checksum(&[5, 0x10]).to_le_bytes());
    }

    #[test]
    fn help_reply() {
        let mut reply = vec![ACK, 12];
        reply.extend_from_slice(&SUPPORTED_COMMANDS);
        let mut c = client(&reply);

        let mut commands = [0u8; 32];
        let n = c.get_help(&mut commands).unwrap();
        assert_eq!(&commands[..n], &SUPPORTED_COMMANDS);
    }

    #[test]
    fn nack_is_error() {
        let mut c = client(&[NACK]);
        assert_eq!(c.chip_id(), Err(ClientError::Nack));
    }

    #[test]
    fn garbage_is_invalid_response() {
        let mut c = client(&[0x79]);
        assert_eq!(c.chip_id(), Err(ClientError::InvalidResponse(0x79)));
    }

    #[test]
    fn silence_times_out() {
        let mut c = client(&[]);
        assert_eq!(c.get_version(), Err(ClientError::ResponseTimeout));
    }

    #[test]
    fn oversized_reply_rejected() {
        let mut c = client(&[ACK, 3, 1, 2, 3]);
        assert_eq!(c.chip_id(), Err(ClientError::ReplyTooLong(3)));
    }

    #[test]
    fn erase_expects_two_acks() {
        let mut c = client(&[ACK, 1, ACK, 1, EraseStatus::Erased as u8]);
        assert_eq!(c.erase(MASS_ERASE, 0), Ok(true));

        let mut c = client(&[ACK, 1, ACK, 1, EraseStatus::Invalid as u8]);
        assert_eq!(c.erase(11, 5), Ok(false));
    }

    #[test]
    fn erase_with_single_ack() {
        let options = Options {
            erase_double_ack: false,
            ..Options::default()
        };
        let mut c = Client::new(
            ScriptedLink::stalling(&[ACK, 1, EraseStatus::Erased as u8]),
            ScriptedDelay::default(),
            options,
        );
        assert_eq!(c.erase(2, 1), Ok(true));
    }

    #[test]
    fn write_memory_chunks() {
        let options = Options {
            chunk_size: 4,
            ..Options::default()
        };
        let done = [ACK, 1, WriteStatus::Done as u8];
        let mut replies = Vec::new();
        for _ in 0..3 {
            replies.extend_from_slice(&done);
        }
        let mut c = Client::new(
            ScriptedLink::stalling(&replies),
            ScriptedDelay::default(),
            options,
        );

        let data = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let mut seen = Vec::new();
        assert_eq!(c.write_memory(0x0800_8000, &data, |n| seen.push(n)), Ok(true));
        assert_eq!(seen, vec![4, 8, 10]);

        // Three frames, the last carrying two bytes at 0x08008008
        let sent = c.port().output();
        let first = Frame::from_bytes(sent).unwrap();
        assert!(first.verify());
        assert_eq!(first.payload(), &[0x00, 0x80, 0x00, 0x08, 4, 1, 2, 3, 4]);

        let rest = &sent[2 * first.len()..];
        let last = Frame::from_bytes(rest).unwrap();
        assert_eq!(last.payload(), &[0x08, 0x80, 0x00, 0x08, 2, 9, 10]);
    }

    #[test]
    fn write_memory_stops_on_refusal() {
        let options = Options {
            chunk_size: 2,
            ..Options::default()
        };
        let mut c = Client::new(
            ScriptedLink::stalling(&[ACK, 1, WriteStatus::Fail as u8]),
            ScriptedDelay::default(),
            options,
        );

        let mut calls = 0;
        assert_eq!(c.write_memory(0x0800_8000, &[1, 2, 3, 4], |_| calls += 1), Ok(false));
        assert_eq!(calls, 0);
    }

    #[test]
    fn write_memory_past_address_space_is_refused() {
        let options = Options {
            chunk_size: 16,
            ..Options::default()
        };
        let mut c = Client::new(
            ScriptedLink::stalling(&[]),
            ScriptedDelay::default(),
            options,
        );

        assert_eq!(
            c.write_memory(0xFFFF_FFF0, &[0u8; 32], |_| ()),
            Err(ClientError::AddressOverflow {
                address: 0xFFFF_FFF0,
                len: 32
            })
        );
        assert!(c.port().output().is_empty());
    }

    #[test]
    fn write_memory_up_to_top_of_address_space() {
        let mut c = client(&[ACK, 1, WriteStatus::Done as u8]);

        assert_eq!(c.write_memory(0xFFFF_FFF0, &[0u8; 16], |_| ()), Ok(true));

        let f = Frame::from_bytes(c.port().output()).unwrap();
        assert_eq!(&f.payload()[..5], &[0xF0, 0xFF, 0xFF, 0xFF, 16]);
    }

    #[test]
    fn short_reply_reports_lengths() {
        let mut c = client(&[ACK, 1, 0x13]);
        assert_eq!(
            c.chip_id(),
            Err(ClientError::ShortReply {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn zero_poll_delay_still_times_out() {
        let options = Options {
            poll_delay_ms: 0,
            response_timeout_ms: 50,
            ..Options::default()
        };
        let mut c = Client::new(
            ScriptedLink::stalling(&[]),
            ScriptedDelay::default(),
            options,
        );

        assert_eq!(c.get_version(), Err(ClientError::ResponseTimeout));
    }

    #[test]
    fn write_chunk_too_large() {
        let mut c = client(&[]);
        let data = [0u8; MAX_WRITE_CHUNK + 1];
        assert_eq!(
            c.write_chunk(0x0800_8000, &data),
            Err(ClientError::PayloadTooLarge(MAX_WRITE_CHUNK + 1))
        );
    }

    #[test]
    fn change_protection_sends_option_byte() {
        let mut c = client(&[ACK, 1, ProtectionStatus::Changed as u8]);
        assert_eq!(c.change_protection(ProtectionLevel::Level1), Ok(true));

        let f = Frame::from_bytes(c.port().output()).unwrap();
        assert_eq!(f.opcode(), Command::ChangeProtectionLevel as u8);
        assert_eq!(f.payload(), &[0x55]);
    }
}
