//! Turns the loadable segments of an ELF image into the list of operations
//! needed to put it on a device: RAM writes, flash erases and flash pages.

use std::collections::BTreeMap;
use std::io::Write;

use crate::elf::{ElfError, ElfFile};
use crate::{align_down, align_up, Error, MemoryLayout, Result, PICO_PAGE_SIZE, PICO_SECTOR_SIZE};

/// Half-open address range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: u32,
    pub end: u32,
}

impl AddressRange {
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Sorts `ranges` and coalesces the ones that overlap or touch.
pub fn merge_ranges(mut ranges: Vec<AddressRange>) -> Vec<AddressRange> {
    ranges.sort_by_key(|r| r.start);
    let mut merged: Vec<AddressRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamSegment {
    pub addr: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct LoadPlan {
    /// In program header order.
    pub ram_segments: Vec<RamSegment>,
    /// Keyed by page base address, each page is `PICO_PAGE_SIZE` bytes.
    pub flash_pages: BTreeMap<u32, Vec<u8>>,
    /// Sector aligned and merged.
    pub erase_ranges: Vec<AddressRange>,
    pub mirrored_flash: bool,
    pub skipped_flash: bool,
    pub entry_point: u32,
}

impl LoadPlan {
    pub fn build(elf: &ElfFile, layout: &MemoryLayout, allow_flash: bool) -> Result<Self> {
        let mut plan = LoadPlan {
            entry_point: elf.entry(),
            ..Default::default()
        };
        let mut erase_ranges = Vec::new();

        for segment in elf.segments() {
            if !segment.is_load() || segment.filesz == 0 {
                continue;
            }
            let addr = segment.load_address();
            if addr == 0 {
                return Err(ElfError::NoLoadAddress.into());
            }
            let data = elf.content(segment)?;
            if data.is_empty() {
                continue;
            }
            let size = u32::try_from(data.len()).map_err(|_| segment_overflow(addr))?;

            if !layout.is_flash(addr) {
                addr.checked_add(size).ok_or_else(|| segment_overflow(addr))?;
                log::debug!("RAM segment {:#x} ({} bytes)", addr, size);
                plan.ram_segments.push(RamSegment {
                    addr,
                    data: data.to_vec(),
                });
                continue;
            }

            if !allow_flash {
                match layout.mirror_flash_to_sram(addr, size) {
                    Some(mapped) => {
                        log::debug!("mirroring flash segment {:#x} to {:#x}", addr, mapped);
                        plan.mirrored_flash = true;
                        plan.ram_segments.push(RamSegment {
                            addr: mapped,
                            data: data.to_vec(),
                        });
                    }
                    None => {
                        log::debug!("flash segment {:#x} ({} bytes) does not fit in SRAM", addr, size);
                        plan.skipped_flash = true;
                    }
                }
                continue;
            }

            let end = addr
                .checked_add(size)
                .filter(|end| *end <= u32::MAX - PICO_SECTOR_SIZE)
                .ok_or_else(|| segment_overflow(addr))?;
            erase_ranges.push(AddressRange {
                start: align_down(addr, PICO_SECTOR_SIZE),
                end: align_up(end, PICO_SECTOR_SIZE),
            });
            plan.scatter_into_pages(addr, data);
        }

        plan.erase_ranges = merge_ranges(erase_ranges);

        if !allow_flash && plan.flash_pages.is_empty() && plan.ram_segments.is_empty() {
            return Err(Error::Plan(
                "No loadable RAM segments found (flash segments skipped). Use --flash to enable flash writes."
                    .to_string(),
            ));
        }
        Ok(plan)
    }

    fn scatter_into_pages(&mut self, addr: u32, data: &[u8]) {
        let mut written = 0;
        while written < data.len() {
            let byte_addr = addr + written as u32;
            let page_base = align_down(byte_addr, PICO_PAGE_SIZE as u32);
            let page_offset = (byte_addr - page_base) as usize;
            let n = (PICO_PAGE_SIZE - page_offset).min(data.len() - written);
            let page = self
                .flash_pages
                .entry(page_base)
                .or_insert_with(|| vec![0; PICO_PAGE_SIZE]);
            page[page_offset..page_offset + n].copy_from_slice(&data[written..written + n]);
            written += n;
        }
    }

    pub fn has_flash_writes(&self) -> bool {
        !self.flash_pages.is_empty()
    }

    /// Address to jump to once the image is in place.
    pub fn exec_address(&self, layout: &MemoryLayout, allow_flash: bool) -> Result<u32> {
        let entry = self.entry_point;
        if entry == 0 {
            return Err(Error::Plan(
                "ELF entry point is zero; cannot execute.".to_string(),
            ));
        }
        if allow_flash {
            return Ok(entry);
        }
        if layout.is_flash(entry) {
            return layout.mirror_flash_to_sram(entry, 4).ok_or_else(|| {
                Error::Plan(format!(
                    "Entry point {:#x} cannot be mirrored into SRAM. Use --flash to run from flash.",
                    entry
                ))
            });
        }
        if !layout.is_sram(entry) {
            return Err(Error::Plan(format!(
                "Entry point {:#x} is not in flash or SRAM.",
                entry
            )));
        }
        Ok(entry)
    }

    /// Informational lines about flash segments that were not written as
    /// flash.
    pub fn write_notes(&self, out: &mut impl Write) -> std::io::Result<()> {
        if self.mirrored_flash {
            writeln!(
                out,
                "Mirroring flash segments into SRAM (use --flash to write flash instead)."
            )?;
        }
        if self.skipped_flash {
            writeln!(
                out,
                "Skipping flash segments that do not fit in SRAM (use --flash to enable flash writes)."
            )?;
        }
        Ok(())
    }
}

pub(crate) fn segment_overflow(addr: u32) -> Error {
    Error::Plan(format!(
        "Segment at {:#x} runs past the end of the address space.",
        addr
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::tests::build_elf;

    fn plan_for(
        entry: u32,
        segments: &[(u32, u32, Vec<u8>)],
        layout: MemoryLayout,
        allow_flash: bool,
    ) -> Result<LoadPlan> {
        let elf = ElfFile::from_bytes(build_elf(entry, segments)).unwrap();
        LoadPlan::build(&elf, &layout, allow_flash)
    }

    #[test]
    fn merge_coalesces_overlapping_and_touching() {
        let merged = merge_ranges(vec![
            AddressRange { start: 0x3000, end: 0x4000 },
            AddressRange { start: 0x0000, end: 0x1000 },
            AddressRange { start: 0x1000, end: 0x2000 },
            AddressRange { start: 0x3800, end: 0x5000 },
        ]);
        assert_eq!(
            merged,
            vec![
                AddressRange { start: 0x0000, end: 0x2000 },
                AddressRange { start: 0x3000, end: 0x5000 },
            ]
        );
        assert!(merge_ranges(vec![]).is_empty());
    }

    #[test]
    fn ram_segments_keep_file_order() {
        let plan = plan_for(
            0x2000_01e9,
            &[
                (0x2000_0000, 0x2000_0000, vec![0xaa; 33500]),
                (0x2000_82dc, 0x2000_82dc, vec![0xbb; 5832]),
            ],
            MemoryLayout::rp2040(),
            false,
        )
        .unwrap();
        let addrs: Vec<_> = plan
            .ram_segments
            .iter()
            .map(|s| (s.addr, s.data.len()))
            .collect();
        assert_eq!(addrs, vec![(0x2000_0000, 33500), (0x2000_82dc, 5832)]);
        assert!(!plan.mirrored_flash);
        assert!(!plan.has_flash_writes());
        assert_eq!(
            plan.exec_address(&MemoryLayout::rp2040(), false).unwrap(),
            0x2000_01e9
        );
    }

    #[test]
    fn flash_segments_mirror_into_sram_without_flash_flag() {
        let plan = plan_for(
            0x1000_0101,
            &[(0x1000_0000, 0x1000_0000, vec![1; 512])],
            MemoryLayout::rp2040(),
            false,
        )
        .unwrap();
        assert!(plan.mirrored_flash);
        assert_eq!(plan.ram_segments[0].addr, 0x2000_0000);
        assert!(plan.flash_pages.is_empty());
        assert_eq!(
            plan.exec_address(&MemoryLayout::rp2040(), false).unwrap(),
            0x2000_0101
        );
        // with flash writes allowed the entry point is used as is
        assert_eq!(
            plan.exec_address(&MemoryLayout::rp2040(), true).unwrap(),
            0x1000_0101
        );
    }

    #[test]
    fn oversized_flash_segment_is_skipped() {
        let err = plan_for(
            0x1000_0000,
            &[(0x1000_0000, 0x1000_0000, vec![0; 0x43000])],
            MemoryLayout::rp2040(),
            false,
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("No loadable RAM segments found"));

        let plan = plan_for(
            0x2000_0001,
            &[
                (0x1000_0000, 0x1000_0000, vec![0; 0x43000]),
                (0x2000_0000, 0x2000_0000, vec![0; 16]),
            ],
            MemoryLayout::rp2040(),
            false,
        )
        .unwrap();
        assert!(plan.skipped_flash);
        assert_eq!(plan.ram_segments.len(), 1);

        let mut notes = Vec::new();
        plan.write_notes(&mut notes).unwrap();
        assert_eq!(
            String::from_utf8(notes).unwrap(),
            "Skipping flash segments that do not fit in SRAM (use --flash to enable flash writes).\n"
        );
    }

    #[test]
    fn flash_writes_are_paged_and_erased_by_sector() {
        let mut data = vec![0u8; 300];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        let plan = plan_for(
            0x1000_0000,
            &[
                (0x1000_0f80, 0x1000_0f80, data),
                (0x1000_1100, 0x1000_1100, vec![0xee; 4]),
            ],
            MemoryLayout::rp2040(),
            true,
        )
        .unwrap();

        assert_eq!(
            plan.erase_ranges,
            vec![AddressRange { start: 0x1000_0000, end: 0x1000_2000 }]
        );
        assert_eq!(plan.erase_ranges[0].len(), 0x2000);

        let bases: Vec<_> = plan.flash_pages.keys().copied().collect();
        assert_eq!(bases, vec![0x1000_0f00, 0x1000_1000, 0x1000_1100]);

        let first = &plan.flash_pages[&0x1000_0f00];
        assert!(first[..0x80].iter().all(|b| *b == 0));
        assert_eq!(first[0x80], 0);
        assert_eq!(first[0xff], 0x7f);
        let second = &plan.flash_pages[&0x1000_1000];
        assert_eq!(second[0], 0x80);
        assert_eq!(second[300 - 0x80 - 1], (299 % 256) as u8);
        assert_eq!(&plan.flash_pages[&0x1000_1100][..5], &[0xee, 0xee, 0xee, 0xee, 0]);
        assert!(plan.ram_segments.is_empty());
    }

    #[test]
    fn ram_segment_past_end_of_address_space_is_rejected() {
        let err = plan_for(
            0x2000_0001,
            &[(0xffff_fc00, 0xffff_fc00, vec![0; 2048])],
            MemoryLayout::rp2040(),
            false,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Segment at 0xfffffc00 runs past the end of the address space."
        );
    }

    #[test]
    fn rp2350_mirrors_what_rp2040_skips() {
        let segments = [
            (0x1004_2000, 0x1004_2000, vec![0x5a; 0x100]),
            (0x2000_0000, 0x2000_0000, vec![0; 16]),
        ];

        let plan = plan_for(0x2000_0001, &segments, MemoryLayout::rp2040(), false).unwrap();
        assert!(plan.skipped_flash);
        assert!(!plan.mirrored_flash);
        assert_eq!(plan.ram_segments.len(), 1);

        let plan = plan_for(0x2000_0001, &segments, MemoryLayout::rp2350(), false).unwrap();
        assert!(!plan.skipped_flash);
        assert!(plan.mirrored_flash);
        let addrs: Vec<_> = plan
            .ram_segments
            .iter()
            .map(|s| (s.addr, s.data.len()))
            .collect();
        assert_eq!(addrs, vec![(0x2004_2000, 0x100), (0x2000_0000, 16)]);
    }

    #[test]
    fn zero_load_address_is_rejected() {
        let err = plan_for(
            0x2000_0001,
            &[(0, 0, vec![1, 2, 3])],
            MemoryLayout::rp2040(),
            false,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "ELF parse failed: ELF segment has no load address"
        );
    }

    #[test]
    fn exec_address_checks_entry_point() {
        let plan = LoadPlan::default();
        assert_eq!(
            plan.exec_address(&MemoryLayout::rp2040(), false)
                .unwrap_err()
                .to_string(),
            "ELF entry point is zero; cannot execute."
        );

        let plan = LoadPlan {
            entry_point: 0x1004_1ffe,
            ..Default::default()
        };
        assert_eq!(
            plan.exec_address(&MemoryLayout::rp2040(), false)
                .unwrap_err()
                .to_string(),
            "Entry point 0x10041ffe cannot be mirrored into SRAM. Use --flash to run from flash."
        );

        let plan = LoadPlan {
            entry_point: 0x0000_00ed,
            ..Default::default()
        };
        assert_eq!(
            plan.exec_address(&MemoryLayout::rp2040(), false)
                .unwrap_err()
                .to_string(),
            "Entry point 0xed is not in flash or SRAM."
        );
    }
}
