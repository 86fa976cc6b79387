//! Reports what a load would do without touching any hardware.

use std::io::Write;
use std::path::Path;

use crate::elf::ElfFile;
use crate::plan::LoadPlan;
use crate::{MemoryLayout, Result};

/// Reads `path`, plans the load for an RP2040 and writes one line per
/// operation to `out`.
pub fn run(path: &Path, allow_flash: bool, exec_after: bool, out: &mut impl Write) -> Result<()> {
    let layout = MemoryLayout::rp2040();
    writeln!(
        out,
        "Dry run: assuming RP2040 memory layout (flash end {:#x}, SRAM end {:#x}).",
        layout.flash_end, layout.sram_end
    )?;

    let elf = ElfFile::read(path)?;
    let plan = LoadPlan::build(&elf, &layout, allow_flash)?;
    report(&plan, &layout, allow_flash, exec_after, out)
}

pub fn report(
    plan: &LoadPlan,
    layout: &MemoryLayout,
    allow_flash: bool,
    exec_after: bool,
    out: &mut impl Write,
) -> Result<()> {
    plan.write_notes(out)?;

    if plan.has_flash_writes() {
        writeln!(out, "Dry run: would exit XIP mode.")?;
        for range in &plan.erase_ranges {
            writeln!(
                out,
                "Dry run: would erase flash {:#x}-{:#x} ({} bytes).",
                range.start,
                range.end,
                range.len()
            )?;
        }
    }

    for segment in &plan.ram_segments {
        writeln!(
            out,
            "Dry run: would write RAM {:#x} ({} bytes).",
            segment.addr,
            segment.data.len()
        )?;
    }

    for (addr, page) in &plan.flash_pages {
        writeln!(
            out,
            "Dry run: would write flash page {:#x} ({} bytes).",
            addr,
            page.len()
        )?;
    }

    if exec_after {
        let exec_addr = plan.exec_address(layout, allow_flash)?;
        writeln!(out, "Dry run: would execute at {:#x}.", exec_addr)?;
    }

    writeln!(out, "Dry run complete.")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::tests::build_elf;

    fn report_for(segments: &[(u32, u32, Vec<u8>)], entry: u32, allow_flash: bool, exec: bool) -> String {
        let layout = MemoryLayout::rp2040();
        let elf = ElfFile::from_bytes(build_elf(entry, segments)).unwrap();
        let plan = LoadPlan::build(&elf, &layout, allow_flash).unwrap();
        let mut out = Vec::new();
        report(&plan, &layout, allow_flash, exec, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn ram_image_report() {
        let text = report_for(
            &[
                (0x2000_0000, 0x2000_0000, vec![0; 33500]),
                (0x2000_82dc, 0x2000_82dc, vec![0; 5832]),
            ],
            0x2000_01e9,
            false,
            true,
        );
        assert_eq!(
            text,
            "Dry run: would write RAM 0x20000000 (33500 bytes).\n\
             Dry run: would write RAM 0x200082dc (5832 bytes).\n\
             Dry run: would execute at 0x200001e9.\n\
             Dry run complete.\n"
        );
    }

    #[test]
    fn flash_image_report() {
        let text = report_for(
            &[(0x1000_0000, 0x1000_0000, vec![0x55; 260])],
            0x1000_0001,
            true,
            false,
        );
        assert_eq!(
            text,
            "Dry run: would exit XIP mode.\n\
             Dry run: would erase flash 0x10000000-0x10001000 (4096 bytes).\n\
             Dry run: would write flash page 0x10000000 (256 bytes).\n\
             Dry run: would write flash page 0x10000100 (256 bytes).\n\
             Dry run complete.\n"
        );
    }

    #[test]
    fn mirrored_image_report() {
        let text = report_for(
            &[(0x1000_0000, 0x1000_0000, vec![0x55; 64])],
            0x1000_00c1,
            false,
            true,
        );
        assert_eq!(
            text,
            "Mirroring flash segments into SRAM (use --flash to write flash instead).\n\
             Dry run: would write RAM 0x20000000 (64 bytes).\n\
             Dry run: would execute at 0x200000c1.\n\
             Dry run complete.\n"
        );
    }

    #[test]
    fn run_prints_layout_before_parsing() {
        let mut out = Vec::new();
        let err = run(Path::new("/nonexistent/image.elf"), false, true, &mut out).unwrap_err();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Dry run: assuming RP2040 memory layout (flash end 0x11000000, SRAM end 0x20042000).\n"
        );
        assert_eq!(
            err.to_string(),
            "ELF parse failed: Failed to open file: /nonexistent/image.elf"
        );
    }
}
