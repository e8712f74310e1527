//! Request/response loop.
//!
//! One frame is received, handled and answered before the next is read.
//! Handlers check the frame checksum themselves and never act on a frame
//! that fails it.

use core::convert::TryFrom;

use crate::address::AddressPolicy;
use crate::config::Config;
use crate::device::DebugInfo;
use crate::error::{LinkError, RequestError};
use crate::flash::{FlashEngine, NonVolatileMemory};
use crate::frame::Frame;
use crate::handoff::Handoff;
use crate::link::Link;
use crate::protocol::{
    AddressStatus, Command, EraseStatus, ProtectionLevel, ProtectionStatus, WriteStatus, ACK,
    NACK, SUPPORTED_COMMANDS,
};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum State {
    AwaitingFrame,
    Processing,
}

/// Result of handling one request
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Step {
    /// The reply has been sent. `Err` says why it was a NACK or failure status.
    Answered(Result<Command, RequestError>),
    /// The valid flag has been sent and control should now move to the address
    Jump(u32),
}

pub struct Bootloader<L, N, D> {
    state: State,
    config: Config,
    policy: AddressPolicy,
    link: L,
    flash: FlashEngine<N>,
    debug: D,
}

impl<L, N, D> Bootloader<L, N, D>
where
    L: Link,
    N: NonVolatileMemory,
    D: DebugInfo,
{
    pub fn new(link: L, nvm: N, debug: D, config: Config) -> Self {
        Self {
            state: State::AwaitingFrame,
            policy: AddressPolicy::new(config.regions),
            flash: FlashEngine::new(nvm, config.last_sector),
            config,
            link,
            debug,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn nvm(&self) -> &N {
        self.flash.inner()
    }

    pub fn nvm_mut(&mut self) -> &mut N {
        self.flash.inner_mut()
    }

    pub fn release(self) -> (L, N, D) {
        (self.link, self.flash.release(), self.debug)
    }

    /// Decide at cold boot whether to serve the host or start the application
    pub fn start<H: Handoff>(&mut self, update_requested: bool, handoff: &mut H) -> ! {
        if !update_requested {
            info!("No update requested, booting application");
            handoff.boot_application(self.config.application_base)
        }

        info!("Bootloader waiting for host commands");
        self.run(handoff)
    }

    /// Serve requests until the host asks for a jump
    pub fn run<H: Handoff>(&mut self, handoff: &mut H) -> ! {
        loop {
            match self.poll() {
                Ok(Step::Jump(address)) => handoff.jump_to_address(address),
                Ok(Step::Answered(Ok(c))) => trace!("{:?} done", c),
                Ok(Step::Answered(Err(e))) => warn!("Request failed: {}", e),
                Err(e) => warn!("Dropped request: {}", e),
            }
        }
    }

    /// Receive and handle exactly one frame
    pub fn poll(&mut self) -> Result<Step, LinkError> {
        self.state = State::AwaitingFrame;
        let frame = Frame::receive(&mut self.link)?;

        self.state = State::Processing;
        let res = self.dispatch(&frame);

        self.state = State::AwaitingFrame;
        res
    }

    pub fn dispatch(&mut self, frame: &Frame) -> Result<Step, LinkError> {
        let command = match Command::try_from(frame.opcode()) {
            Ok(c) => c,
            Err(op) => {
                warn!("Invalid command 0x{:02x}", op);
                self.send_nack()?;
                return Ok(Step::Answered(Err(RequestError::UnknownCommand(op))));
            }
        };

        debug!("{:?} command", command);

        match command {
            Command::GetVersion => self.get_version(frame),
            Command::GetHelp => self.get_help(frame),
            Command::GetChipId => self.get_chip_id(frame),
            Command::GetProtectionLevel => self.get_protection_level(frame),
            Command::JumpToAddress => self.jump_to_address(frame),
            Command::EraseFlash => self.erase_flash(frame),
            Command::MemoryWrite => self.memory_write(frame),
            Command::ChangeProtectionLevel => self.change_protection_level(frame),
            other => self.acknowledge_only(other, frame),
        }
    }

    fn send_ack(&mut self, reply_len: u8) -> Result<(), LinkError> {
        self.link.write_all(&[ACK, reply_len])
    }

    fn send_nack(&mut self) -> Result<(), LinkError> {
        self.link.write_all(&[NACK])
    }

    fn reply(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        self.send_ack(payload.len() as u8)?;
        self.link.write_all(payload)
    }

    /// NACK and report the frame if its checksum is wrong
    fn check(&mut self, frame: &Frame) -> Result<Option<RequestError>, LinkError> {
        if frame.verify() {
            return Ok(None);
        }

        debug!("Checksum mismatch on {:?}", frame);
        self.send_nack()?;
        Ok(Some(RequestError::ChecksumMismatch))
    }

    fn get_version(&mut self, frame: &Frame) -> Result<Step, LinkError> {
        if let Some(e) = self.check(frame)? {
            return Ok(Step::Answered(Err(e)));
        }

        let version = self.config.version.to_bytes();
        self.reply(&version)?;

        Ok(Step::Answered(Ok(Command::GetVersion)))
    }

    fn get_help(&mut self, frame: &Frame) -> Result<Step, LinkError> {
        if let Some(e) = self.check(frame)? {
            return Ok(Step::Answered(Err(e)));
        }

        self.reply(&SUPPORTED_COMMANDS)?;

        Ok(Step::Answered(Ok(Command::GetHelp)))
    }

    fn get_chip_id(&mut self, frame: &Frame) -> Result<Step, LinkError> {
        if let Some(e) = self.check(frame)? {
            return Ok(Step::Answered(Err(e)));
        }

        let id = self.debug.chip_id();
        self.reply(&id.to_le_bytes())?;

        Ok(Step::Answered(Ok(Command::GetChipId)))
    }

    fn get_protection_level(&mut self, frame: &Frame) -> Result<Step, LinkError> {
        if let Some(e) = self.check(frame)? {
            return Ok(Step::Answered(Err(e)));
        }

        self.send_ack(1)?;
        let level = self.flash.protection_level();
        self.link.write_all(&[level.as_option_byte()])?;

        Ok(Step::Answered(Ok(Command::GetProtectionLevel)))
    }

    fn jump_to_address(&mut self, frame: &Frame) -> Result<Step, LinkError> {
        if let Some(e) = self.check(frame)? {
            return Ok(Step::Answered(Err(e)));
        }

        self.send_ack(1)?;

        let address = match read_u32(frame.payload()) {
            Some(a) => a,
            None => {
                self.link.write_all(&[AddressStatus::Invalid as u8])?;
                return Ok(Step::Answered(Err(RequestError::MalformedPayload)));
            }
        };

        if !self.policy.is_valid(address) {
            self.link.write_all(&[AddressStatus::Invalid as u8])?;
            return Ok(Step::Answered(Err(RequestError::InvalidAddress(address))));
        }

        info!("Jump to: 0x{:08x}", address);
        self.link.write_all(&[AddressStatus::Valid as u8])?;

        Ok(Step::Jump(address))
    }

    fn erase_flash(&mut self, frame: &Frame) -> Result<Step, LinkError> {
        // Existing hosts expect this first ACK whatever the checksum
        if self.config.erase_double_ack {
            self.send_ack(1)?;
        }

        if let Some(e) = self.check(frame)? {
            return Ok(Step::Answered(Err(e)));
        }

        self.send_ack(1)?;

        let (sector, count) = match frame.payload() {
            [sector, count, ..] => (*sector, *count),
            _ => {
                self.link.write_all(&[EraseStatus::Invalid as u8])?;
                return Ok(Step::Answered(Err(RequestError::MalformedPayload)));
            }
        };

        let status = self.flash.erase(sector, count);
        self.link.write_all(&[status as u8])?;

        let res = match status {
            EraseStatus::Erased => Ok(Command::EraseFlash),
            EraseStatus::Invalid if self.flash.erase_scope(sector, count).is_none() => {
                Err(RequestError::InvalidEraseParameters { sector, count })
            }
            EraseStatus::Invalid => Err(RequestError::EraseFailed),
        };

        Ok(Step::Answered(res))
    }

    fn memory_write(&mut self, frame: &Frame) -> Result<Step, LinkError> {
        if let Some(e) = self.check(frame)? {
            return Ok(Step::Answered(Err(e)));
        }

        self.send_ack(1)?;

        let payload = frame.payload();
        let (address, data) = match (read_u32(payload), payload.get(4)) {
            (Some(address), Some(len)) => {
                match payload[5..].get(..*len as usize) {
                    Some(data) => (address, data),
                    None => {
                        self.link.write_all(&[WriteStatus::Fail as u8])?;
                        return Ok(Step::Answered(Err(RequestError::MalformedPayload)));
                    }
                }
            }
            _ => {
                self.link.write_all(&[WriteStatus::Fail as u8])?;
                return Ok(Step::Answered(Err(RequestError::MalformedPayload)));
            }
        };

        if !self.policy.is_valid(address) {
            self.link.write_all(&[WriteStatus::Fail as u8])?;
            return Ok(Step::Answered(Err(RequestError::InvalidAddress(address))));
        }

        let status = self.flash.program(address, data);
        self.link.write_all(&[status as u8])?;

        match status {
            WriteStatus::Done => Ok(Step::Answered(Ok(Command::MemoryWrite))),
            WriteStatus::Fail => Ok(Step::Answered(Err(RequestError::ProgramFailed { address }))),
        }
    }

    fn change_protection_level(&mut self, frame: &Frame) -> Result<Step, LinkError> {
        if let Some(e) = self.check(frame)? {
            return Ok(Step::Answered(Err(e)));
        }

        self.send_ack(1)?;

        let requested = frame.payload().first().copied();
        let status = match requested.map(ProtectionLevel::try_from) {
            Some(Ok(level)) if level != ProtectionLevel::Level2 => {
                self.flash.set_protection_level(level)
            }
            Some(Ok(_)) => {
                warn!("Host requested readout protection level 2");
                ProtectionStatus::Unchanged
            }
            Some(Err(code)) => {
                warn!("Unknown protection level 0x{:02x}", code);
                ProtectionStatus::Unchanged
            }
            None => ProtectionStatus::Unchanged,
        };

        self.link.write_all(&[status as u8])?;

        match (status, requested) {
            (ProtectionStatus::Changed, _) => {
                Ok(Step::Answered(Ok(Command::ChangeProtectionLevel)))
            }
            (ProtectionStatus::Unchanged, None) => {
                Ok(Step::Answered(Err(RequestError::MalformedPayload)))
            }
            (ProtectionStatus::Unchanged, Some(_)) => {
                Ok(Step::Answered(Err(RequestError::ProtectionChangeRejected)))
            }
        }
    }

    /// Recognised commands the device has no implementation for
    fn acknowledge_only(&mut self, command: Command, frame: &Frame) -> Result<Step, LinkError> {
        if let Some(e) = self.check(frame)? {
            return Ok(Step::Answered(Err(e)));
        }

        debug!("{:?} is not implemented, acknowledging only", command);
        self.send_ack(0)?;

        Ok(Step::Answered(Ok(command)))
    }
}

/// Little endian address at the start of a payload
fn read_u32(payload: &[u8]) -> Option<u32> {
    let mut b = [0u8; 4];
    b.copy_from_slice(payload.get(..4)?);
    Some(u32::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{FixedDebugInfo, MemoryFlash, ScriptedLink};

    type Sim = Bootloader<ScriptedLink, MemoryFlash, FixedDebugInfo>;

    fn bootloader(input: &[u8]) -> Sim {
        Bootloader::new(
            ScriptedLink::new(input),
            MemoryFlash::stm32f407(),
            FixedDebugInfo(0x1007_6413),
            Config::default(),
        )
    }

    #[test]
    fn state_returns_to_awaiting() {
        let f = Frame::encode(Command::GetVersion as u8, &[]).unwrap();
        let mut b = bootloader(f.as_bytes());

        assert_eq!(b.state(), State::AwaitingFrame);
        b.poll().unwrap();
        assert_eq!(b.state(), State::AwaitingFrame);
    }

    #[test]
    fn link_error_sends_nothing() {
        let mut b = bootloader(&[]);

        assert_eq!(b.poll(), Err(LinkError::Read));
        assert!(b.link().output().is_empty());
    }

    #[test]
    fn read_u32_little_endian() {
        assert_eq!(read_u32(&[0x00, 0x80, 0x00, 0x08, 0xAA]), Some(0x0800_8000));
        assert_eq!(read_u32(&[1, 2, 3]), None);
    }

    #[test]
    fn corrupted_frame_is_nacked_without_side_effect() {
        let f = Frame::encode(Command::MemoryWrite as u8, &[0x00, 0x80, 0x00, 0x08, 1, 0x42])
            .unwrap();
        let mut raw = f.as_bytes().to_vec();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;

        let mut b = bootloader(&raw);
        let step = b.poll().unwrap();

        assert_eq!(step, Step::Answered(Err(RequestError::ChecksumMismatch)));
        assert_eq!(b.link().output(), &[NACK]);
        assert!(b.nvm().ops().is_empty());
    }
}
