pub mod dryrun;
pub mod elf;
pub mod error;
pub mod load;
pub mod picoboot;
pub mod plan;
pub mod reboot;
pub mod reset;

pub use error::{Error, Result};

pub const PICO_PAGE_SIZE: usize = 256;
pub const PICO_SECTOR_SIZE: u32 = 4096;

pub const FLASH_START: u32 = 0x10000000;
pub const FLASH_END_RP2040: u32 = 0x11000000;
pub const FLASH_END_RP2350: u32 = 0x14000000;

pub const SRAM_START: u32 = 0x20000000;
pub const SRAM_END_RP2040: u32 = 0x20042000;
pub const SRAM_END_RP2350: u32 = 0x20082000;

pub const RP_VID: u16 = 0x2E8A;
pub const PID_RP2040_BOOTSEL: u16 = 0x0003;
pub const PID_RP2350_BOOTSEL: u16 = 0x000f;
pub const PID_RP2040_STDIO_USB: u16 = 0x000a;
pub const PID_RP2350_STDIO_USB: u16 = 0x0009;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetID {
    Rp2040,
    Rp2350,
}

impl TargetID {
    /// Chip family for a Raspberry Pi product id, in BOOTSEL or stdio-usb mode.
    pub fn from_product_id(pid: u16) -> Option<Self> {
        match pid {
            PID_RP2040_BOOTSEL | PID_RP2040_STDIO_USB => Some(TargetID::Rp2040),
            PID_RP2350_BOOTSEL | PID_RP2350_STDIO_USB => Some(TargetID::Rp2350),
            _ => None,
        }
    }
}

/// Address space boundaries used to decide where an image segment goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    pub flash_end: u32,
    pub sram_end: u32,
}

impl MemoryLayout {
    pub const fn rp2040() -> Self {
        MemoryLayout {
            flash_end: FLASH_END_RP2040,
            sram_end: SRAM_END_RP2040,
        }
    }

    pub const fn rp2350() -> Self {
        MemoryLayout {
            flash_end: FLASH_END_RP2350,
            sram_end: SRAM_END_RP2350,
        }
    }

    pub fn for_target(target: TargetID) -> Self {
        match target {
            TargetID::Rp2040 => Self::rp2040(),
            TargetID::Rp2350 => Self::rp2350(),
        }
    }

    pub fn is_flash(&self, addr: u32) -> bool {
        addr >= FLASH_START && addr < self.flash_end
    }

    pub fn is_sram(&self, addr: u32) -> bool {
        addr >= SRAM_START && addr < self.sram_end
    }

    /// SRAM address that mirrors flash address `addr`, if `size` bytes from
    /// there still fit in SRAM.
    pub fn mirror_flash_to_sram(&self, addr: u32, size: u32) -> Option<u32> {
        let offset = addr.checked_sub(FLASH_START)?;
        let mapped = SRAM_START.checked_add(offset)?;
        let end = mapped.checked_add(size)?;
        (end <= self.sram_end).then_some(mapped)
    }
}

pub fn align_down(value: u32, align: u32) -> u32 {
    value & !(align - 1)
}

pub fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}
