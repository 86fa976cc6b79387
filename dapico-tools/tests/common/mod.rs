//! Helpers shared by the CLI integration tests

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Little-endian ELF32 ARM image with one PT_LOAD per `(paddr, bytes)`.
pub fn build_elf(entry: u32, segments: &[(u32, Vec<u8>)]) -> Vec<u8> {
    const EHDR: u32 = 52;
    const PHDR: u32 = 32;

    let mut out = vec![0x7f, b'E', b'L', b'F', 1, 1, 1];
    out.resize(16, 0);
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&40u16.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&entry.to_le_bytes());
    out.extend_from_slice(&EHDR.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0x0500_0200u32.to_le_bytes());
    out.extend_from_slice(&(EHDR as u16).to_le_bytes());
    out.extend_from_slice(&(PHDR as u16).to_le_bytes());
    out.extend_from_slice(&(segments.len() as u16).to_le_bytes());
    out.extend_from_slice(&[0; 6]);

    let mut offset = EHDR + PHDR * segments.len() as u32;
    for (addr, bytes) in segments {
        let len = bytes.len() as u32;
        for word in [1, offset, *addr, *addr, len, len, 7, 4] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        offset += len;
    }
    for (_, bytes) in segments {
        out.extend_from_slice(bytes);
    }
    out
}

/// A RAM-only image laid out like the blink example the packaging test uses:
/// `.text`/`.data` at the start of SRAM, a second block after it, and the
/// Thumb entry point inside the first one.
pub fn ram_fixture() -> Vec<u8> {
    build_elf(
        0x2000_01e9,
        &[
            (0x2000_0000, vec![0x5a; 33500]),
            (0x2000_82dc, vec![0xa5; 5832]),
        ],
    )
}

pub struct Fixture {
    #[allow(dead_code)]
    dir: TempDir,
    path: PathBuf,
}

impl Fixture {
    pub fn write(name: &str, bytes: &[u8]) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).expect("Failed to write fixture");
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
