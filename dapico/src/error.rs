use std::io;

use nusb::transfer::TransferError;
use thiserror::Error;

use crate::elf::ElfError;
use crate::picoboot::cmd::PicobootStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("ELF parse failed: {0}")]
    Elf(#[from] ElfError),

    /// Host side USB or file failures. nusb reports enumeration, open and
    /// claim errors as `io::Error`.
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("USB transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("failed to encode PICOBOOT structure: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("USB transfer timed out")]
    TimedOut,

    #[error("No Raspberry Pi BOOTSEL device found.")]
    NoBootselDevice,

    #[error("No Raspberry Pi USB device found.")]
    NoDevice,

    #[error("Device does not expose a reset or picoboot interface.")]
    NoInterface,

    #[error("device reported {status:?} for command {cmd_id:#04x}")]
    Status { cmd_id: u8, status: PicobootStatus },

    #[error("short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    /// A device operation failed partway through a load.
    #[error("{what} failed at {addr:#x} ({source}).")]
    Load {
        what: &'static str,
        addr: u32,
        source: Box<Error>,
    },

    /// The image cannot be loaded the way it was asked for. The message is
    /// shown to the user verbatim.
    #[error("{0}")]
    Plan(String),
}

impl Error {
    /// Device went away, which is what a successful reboot or exec looks like.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::Transfer(TransferError::Disconnected))
    }
}
