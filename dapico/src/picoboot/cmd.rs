//! Wire structures of the PICOBOOT bulk protocol, see section 2.8.5 of the
//! RP2040 datasheet and 5.6 of the RP2350 datasheet.

use serde::{Deserialize, Serialize};

pub const PICOBOOT_MAGIC: u32 = 0x431FD10B;
pub const PICOBOOT_CMD_SIZE: usize = 32;
pub const PICOBOOT_STATUS_SIZE: usize = 16;

const ARGS_SIZE: usize = 16;

/// Vendor control requests on the PICOBOOT interface.
pub const PICOBOOT_IF_RESET: u8 = 0x41;
pub const PICOBOOT_IF_CMD_STATUS: u8 = 0x42;

pub const REBOOT2_FLAG_REBOOT_TYPE_NORMAL: u32 = 0x0;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PicobootCmdId {
    Unknown = 0x0,
    ExclusiveAccess = 0x1,
    Reboot = 0x2,
    FlashErase = 0x3,
    Read = 0x84, // either RAM or FLASH
    Write = 0x5, // either RAM or FLASH (does no erase)
    ExitXip = 0x6,
    EnterCmdXip = 0x7,
    Exec = 0x8,
    VectorizeFlash = 0x9,
    // RP2350 only below here
    Reboot2 = 0xA,
    GetInfo = 0x8B,
    OtpRead = 0x8C,
    OtpWrite = 0xD,
}

impl TryFrom<u8> for PicobootCmdId {
    type Error = u8;

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        [
            Self::Unknown,
            Self::ExclusiveAccess,
            Self::Reboot,
            Self::FlashErase,
            Self::Read,
            Self::Write,
            Self::ExitXip,
            Self::EnterCmdXip,
            Self::Exec,
            Self::VectorizeFlash,
            Self::Reboot2,
            Self::GetInfo,
            Self::OtpRead,
            Self::OtpWrite,
        ]
        .into_iter()
        .find(|id| *id as u8 == x)
        .ok_or(x)
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PicobootStatus {
    Ok = 0,
    UnknownCmd = 1,
    InvalidCmdLength = 2,
    InvalidTransferLength = 3,
    InvalidAddress = 4,
    BadAlignment = 5,
    InterleavedWrite = 6,
    Rebooting = 7,
    UnknownError = 8,
    InvalidState = 9,
    NotPermitted = 10,
    InvalidArg = 11,
    BufferTooSmall = 12,
    PreconditionNotMet = 13,
    ModifiedData = 14,
    InvalidData = 15,
    NotFound = 16,
    UnsupportedModification = 17,
}

impl TryFrom<u32> for PicobootStatus {
    type Error = u32;

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        [
            Self::Ok,
            Self::UnknownCmd,
            Self::InvalidCmdLength,
            Self::InvalidTransferLength,
            Self::InvalidAddress,
            Self::BadAlignment,
            Self::InterleavedWrite,
            Self::Rebooting,
            Self::UnknownError,
            Self::InvalidState,
            Self::NotPermitted,
            Self::InvalidArg,
            Self::BufferTooSmall,
            Self::PreconditionNotMet,
            Self::ModifiedData,
            Self::InvalidData,
            Self::NotFound,
            Self::UnsupportedModification,
        ]
        .into_iter()
        .find(|status| *status as u32 == x)
        .ok_or(x)
    }
}

/// Serializes a command argument struct and pads it to the 16 argument bytes
/// of a command. Returns the unpadded size as well, which is the command's
/// `cmd_size`.
fn ser_args<T: Serialize>(args: &T) -> crate::Result<([u8; ARGS_SIZE], u8)> {
    let bytes = bincode::serialize(args)?;
    let mut out = [0; ARGS_SIZE];
    out[..bytes.len()].copy_from_slice(&bytes);
    Ok((out, bytes.len() as u8))
}

#[derive(Serialize, Debug)]
pub(crate) struct PicobootRangeCmd {
    addr: u32,
    size: u32,
}

impl PicobootRangeCmd {
    pub fn ser(addr: u32, size: u32) -> crate::Result<([u8; ARGS_SIZE], u8)> {
        ser_args(&PicobootRangeCmd { addr, size })
    }
}

#[derive(Serialize, Debug)]
pub(crate) struct PicobootAddressOnlyCmd {
    addr: u32,
}

impl PicobootAddressOnlyCmd {
    pub fn ser(addr: u32) -> crate::Result<([u8; ARGS_SIZE], u8)> {
        ser_args(&PicobootAddressOnlyCmd { addr })
    }
}

#[derive(Serialize, Debug)]
pub(crate) struct PicobootRebootCmd {
    pc: u32,
    sp: u32,
    delay: u32,
}

impl PicobootRebootCmd {
    pub fn ser(pc: u32, sp: u32, delay: u32) -> crate::Result<([u8; ARGS_SIZE], u8)> {
        ser_args(&PicobootRebootCmd { pc, sp, delay })
    }
}

#[derive(Serialize, Debug)]
pub(crate) struct PicobootReboot2Cmd {
    flags: u32,
    delay: u32,
    p0: u32,
    p1: u32,
}

impl PicobootReboot2Cmd {
    pub fn ser(flags: u32, delay: u32, p0: u32, p1: u32) -> crate::Result<([u8; ARGS_SIZE], u8)> {
        ser_args(&PicobootReboot2Cmd {
            flags,
            delay,
            p0,
            p1,
        })
    }
}

/// Reply to `PICOBOOT_IF_CMD_STATUS`.
#[derive(Deserialize, Debug)]
pub(crate) struct PicobootStatusCmd {
    pub token: u32,
    pub status_code: u32,
    pub cmd_id: u8,
    pub in_progress: u8,
    _unused: [u8; 6],
}

impl PicobootStatusCmd {
    pub fn status(&self) -> Option<PicobootStatus> {
        PicobootStatus::try_from(self.status_code).ok()
    }
}

#[derive(Serialize, Debug)]
pub(crate) struct PicobootCmd {
    magic: u32,
    pub token: u32,
    pub cmd_id: u8,
    cmd_size: u8,
    _unused: u16,
    pub transfer_len: u32,
    args: [u8; ARGS_SIZE],
}

impl PicobootCmd {
    pub fn new(cmd_id: PicobootCmdId, (args, cmd_size): ([u8; ARGS_SIZE], u8), transfer_len: u32) -> Self {
        PicobootCmd {
            magic: PICOBOOT_MAGIC,
            token: 0,
            cmd_id: cmd_id as u8,
            cmd_size,
            _unused: 0,
            transfer_len,
            args,
        }
    }

    /// A command without arguments.
    pub fn bare(cmd_id: PicobootCmdId) -> Self {
        Self::new(cmd_id, ([0; ARGS_SIZE], 0), 0)
    }

    pub fn is_in(&self) -> bool {
        self.cmd_id & 0x80 != 0
    }
}
