use std::io::Write;

use crate::picoboot::PicobootConnection;
use crate::plan::{segment_overflow, LoadPlan};
use crate::{Error, MemoryLayout, Result};

/// Largest single PICOBOOT write used for RAM.
pub const RAM_WRITE_CHUNK: usize = 1024;

/// The PICOBOOT operations a load needs.
pub trait LoadTarget {
    fn reset_interface(&mut self) -> Result<()>;
    fn exit_xip(&mut self) -> Result<()>;
    fn flash_erase(&mut self, addr: u32, size: u32) -> Result<()>;
    fn write(&mut self, addr: u32, buf: Vec<u8>) -> Result<()>;
    fn exec(&mut self, addr: u32) -> Result<()>;
}

impl LoadTarget for PicobootConnection {
    fn reset_interface(&mut self) -> Result<()> {
        PicobootConnection::reset_interface(self)
    }

    fn exit_xip(&mut self) -> Result<()> {
        PicobootConnection::exit_xip(self)
    }

    fn flash_erase(&mut self, addr: u32, size: u32) -> Result<()> {
        PicobootConnection::flash_erase(self, addr, size)
    }

    fn write(&mut self, addr: u32, buf: Vec<u8>) -> Result<()> {
        PicobootConnection::write(self, addr, buf)
    }

    fn exec(&mut self, addr: u32) -> Result<()> {
        PicobootConnection::exec(self, addr)
    }
}

fn failed_at(what: &'static str, addr: u32, e: Error) -> Error {
    Error::Load {
        what,
        addr,
        source: Box::new(e),
    }
}

/// Puts `plan` on the device behind `target` and optionally starts it.
pub fn run<T: LoadTarget>(
    target: &mut T,
    plan: &LoadPlan,
    layout: &MemoryLayout,
    allow_flash: bool,
    exec_after: bool,
    out: &mut impl Write,
) -> Result<()> {
    if let Err(e) = target.reset_interface() {
        log::warn!("reset interface failed ({})", e);
    }

    plan.write_notes(out)?;

    if plan.has_flash_writes() {
        if let Err(e) = target.exit_xip() {
            log::warn!("Failed to exit XIP mode ({})", e);
        }
        for range in &plan.erase_ranges {
            log::debug!("erasing {:#x}-{:#x}", range.start, range.end);
            target
                .flash_erase(range.start, range.len())
                .map_err(|e| failed_at("Flash erase", range.start, e))?;
        }
    }

    for segment in &plan.ram_segments {
        log::debug!("writing {} bytes to {:#x}", segment.data.len(), segment.addr);
        for (i, chunk) in segment.data.chunks(RAM_WRITE_CHUNK).enumerate() {
            let addr = u32::try_from(i * RAM_WRITE_CHUNK)
                .ok()
                .and_then(|offset| segment.addr.checked_add(offset))
                .ok_or_else(|| segment_overflow(segment.addr))?;
            target
                .write(addr, chunk.to_vec())
                .map_err(|e| failed_at("RAM write", addr, e))?;
        }
    }

    for (addr, page) in &plan.flash_pages {
        target
            .write(*addr, page.clone())
            .map_err(|e| failed_at("Flash write", *addr, e))?;
    }

    if exec_after {
        let exec_addr = plan.exec_address(layout, allow_flash)?;
        target
            .exec(exec_addr)
            .map_err(|e| failed_at("Exec", exec_addr, e))?;
        writeln!(out, "Executing at {:#x}.", exec_addr)?;
    }

    writeln!(out, "Load complete.")?;
    Ok(())
}
