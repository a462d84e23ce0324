//! Extraction of cache-identity notes from pipeline ELF binaries.
//!
//! The compiler embeds two note entries into every pipeline binary it
//! emits: `cache_hash`, the 16-byte content hash the live cache keys the
//! binary under, and `compiler_version`, a major/minor `u32` pair. The
//! reader here is a deliberately minimal ELF64 little-endian section and
//! note parser; it handles exactly the images the compiler produces and
//! rejects everything else.

use crate::error::CreatorError;

/// Note carrying the 16-byte cache hash.
pub const NOTE_CACHE_HASH: &str = "cache_hash";

/// Note carrying the compiler major/minor version pair.
pub const NOTE_COMPILER_VERSION: &str = "compiler_version";

/// ELF section type for note sections.
const SHT_NOTE: u32 = 7;

/// Size of the ELF64 file header.
const EHDR_SIZE: usize = 64;

/// Cache identity extracted from one pipeline binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfCacheInfo {
    /// Content hash the binary is cached under.
    pub cache_hash: [u8; 16],
    /// Compiler (major, minor) version that produced the binary.
    pub compiler_version: (u32, u32),
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset.checked_add(2)?)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset.checked_add(4)?)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    data.get(offset..offset.checked_add(8)?).map(|b| {
        u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    })
}

fn align4(value: usize) -> usize {
    (value + 3) & !3
}

/// Reads the cache-identity notes from an ELF64 little-endian image.
pub fn read_elf_cache_info(elf: &[u8]) -> Result<ElfCacheInfo, CreatorError> {
    // e_ident: magic, then class (2 = 64-bit) and data (1 = little-endian).
    if elf.len() < EHDR_SIZE
        || &elf[..4] != b"\x7fELF"
        || elf[4] != 2
        || elf[5] != 1
    {
        return Err(CreatorError::NotElf);
    }

    let sh_offset = read_u64(elf, 0x28).ok_or(CreatorError::NotElf)? as usize;
    let sh_entsize = read_u16(elf, 0x3a).ok_or(CreatorError::NotElf)? as usize;
    let sh_count = read_u16(elf, 0x3c).ok_or(CreatorError::NotElf)? as usize;
    if sh_entsize < 64 {
        return Err(CreatorError::NotElf);
    }

    let mut cache_hash = None;
    let mut compiler_version = None;

    for index in 0..sh_count {
        // Header fields are corruption-controlled; any offset arithmetic
        // here must saturate into a clean rejection, not wrap.
        let base = index
            .checked_mul(sh_entsize)
            .and_then(|rel| rel.checked_add(sh_offset))
            .ok_or(CreatorError::NotElf)?;
        let end = base.checked_add(sh_entsize).ok_or(CreatorError::NotElf)?;
        if end > elf.len() {
            return Err(CreatorError::NotElf);
        }
        let Some(section_type) = read_u32(elf, base + 0x04) else {
            return Err(CreatorError::NotElf);
        };
        if section_type != SHT_NOTE {
            continue;
        }
        let offset = read_u64(elf, base + 0x18).ok_or(CreatorError::NotElf)? as usize;
        let size = read_u64(elf, base + 0x20).ok_or(CreatorError::NotElf)? as usize;
        let section = elf
            .get(offset..offset.checked_add(size).ok_or(CreatorError::NotElf)?)
            .ok_or(CreatorError::NotElf)?;

        scan_notes(section, &mut cache_hash, &mut compiler_version)?;
    }

    Ok(ElfCacheInfo {
        cache_hash: cache_hash.ok_or(CreatorError::MissingNote {
            name: NOTE_CACHE_HASH,
        })?,
        compiler_version: compiler_version.ok_or(CreatorError::MissingNote {
            name: NOTE_COMPILER_VERSION,
        })?,
    })
}

/// Walks one note section and records the entries of interest.
fn scan_notes(
    section: &[u8],
    cache_hash: &mut Option<[u8; 16]>,
    compiler_version: &mut Option<(u32, u32)>,
) -> Result<(), CreatorError> {
    let mut offset = 0;
    while offset + 12 <= section.len() {
        let name_size = read_u32(section, offset).unwrap_or(0) as usize;
        let desc_size = read_u32(section, offset + 4).unwrap_or(0) as usize;

        let name_start = offset + 12;
        let name_end = name_start.checked_add(name_size).filter(|e| *e <= section.len());
        let Some(name_end) = name_end else { break };
        // Note names are NUL-terminated.
        let name = &section[name_start..name_end];
        let name = name.strip_suffix(&[0]).unwrap_or(name);

        let desc_start = align4(name_end);
        let desc_end = desc_start.checked_add(desc_size).filter(|e| *e <= section.len());
        let Some(desc_end) = desc_end else { break };
        let desc = &section[desc_start..desc_end];

        if name.starts_with(NOTE_CACHE_HASH.as_bytes()) {
            let hash: [u8; 16] =
                desc.try_into()
                    .map_err(|_| CreatorError::MalformedNote {
                        name: NOTE_CACHE_HASH,
                        reason: format!("expected 16 bytes, found {}", desc.len()),
                    })?;
            *cache_hash = Some(hash);
        } else if name.starts_with(NOTE_COMPILER_VERSION.as_bytes()) {
            if desc.len() != 8 {
                return Err(CreatorError::MalformedNote {
                    name: NOTE_COMPILER_VERSION,
                    reason: format!("expected 8 bytes, found {}", desc.len()),
                });
            }
            let major = read_u32(desc, 0).unwrap_or(0);
            let minor = read_u32(desc, 4).unwrap_or(0);
            *compiler_version = Some((major, minor));
        }

        offset = align4(desc_end);
    }
    Ok(())
}

/// Builds a minimal ELF64 image with one note section, for tests.
#[cfg(test)]
pub(crate) fn build_test_elf(cache_hash: [u8; 16], version: (u32, u32)) -> Vec<u8> {
    fn push_note(notes: &mut Vec<u8>, name: &str, desc: &[u8]) {
        let name_size = name.len() + 1;
        notes.extend_from_slice(&(name_size as u32).to_le_bytes());
        notes.extend_from_slice(&(desc.len() as u32).to_le_bytes());
        notes.extend_from_slice(&0u32.to_le_bytes());
        notes.extend_from_slice(name.as_bytes());
        notes.push(0);
        while notes.len() % 4 != 0 {
            notes.push(0);
        }
        notes.extend_from_slice(desc);
        while notes.len() % 4 != 0 {
            notes.push(0);
        }
    }

    let mut notes = Vec::new();
    push_note(&mut notes, NOTE_CACHE_HASH, &cache_hash);
    let mut version_desc = Vec::new();
    version_desc.extend_from_slice(&version.0.to_le_bytes());
    version_desc.extend_from_slice(&version.1.to_le_bytes());
    push_note(&mut notes, NOTE_COMPILER_VERSION, &version_desc);

    // File header, a null section header, the note section header, then
    // the note contents.
    let sh_offset = EHDR_SIZE;
    let notes_offset = sh_offset + 2 * 64;

    let mut elf = vec![0u8; notes_offset];
    elf[..4].copy_from_slice(b"\x7fELF");
    elf[4] = 2; // ELFCLASS64
    elf[5] = 1; // ELFDATA2LSB
    elf[6] = 1; // EV_CURRENT
    elf[0x28..0x30].copy_from_slice(&(sh_offset as u64).to_le_bytes());
    elf[0x3a..0x3c].copy_from_slice(&64u16.to_le_bytes());
    elf[0x3c..0x3e].copy_from_slice(&2u16.to_le_bytes());

    let note_shdr = sh_offset + 64;
    elf[note_shdr + 0x04..note_shdr + 0x08].copy_from_slice(&SHT_NOTE.to_le_bytes());
    elf[note_shdr + 0x18..note_shdr + 0x20].copy_from_slice(&(notes_offset as u64).to_le_bytes());
    elf[note_shdr + 0x20..note_shdr + 0x28].copy_from_slice(&(notes.len() as u64).to_le_bytes());

    elf.extend_from_slice(&notes);
    elf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_both_notes() {
        let hash = [0xabu8; 16];
        let elf = build_test_elf(hash, (70, 3));
        let info = read_elf_cache_info(&elf).unwrap();
        assert_eq!(info.cache_hash, hash);
        assert_eq!(info.compiler_version, (70, 3));
    }

    #[test]
    fn rejects_non_elf_input() {
        assert!(matches!(
            read_elf_cache_info(b"just some bytes"),
            Err(CreatorError::NotElf)
        ));
    }

    #[test]
    fn rejects_big_endian_image() {
        let mut elf = build_test_elf([0u8; 16], (70, 0));
        elf[5] = 2; // ELFDATA2MSB
        assert!(matches!(
            read_elf_cache_info(&elf),
            Err(CreatorError::NotElf)
        ));
    }

    #[test]
    fn missing_notes_are_reported_by_name() {
        // An image with section headers but no note section.
        let mut elf = build_test_elf([0u8; 16], (70, 0));
        let note_shdr = EHDR_SIZE + 64;
        // Flip the section type away from SHT_NOTE.
        elf[note_shdr + 0x04..note_shdr + 0x08].copy_from_slice(&1u32.to_le_bytes());
        assert!(matches!(
            read_elf_cache_info(&elf),
            Err(CreatorError::MissingNote { name: NOTE_CACHE_HASH })
        ));
    }

    #[test]
    fn overflowing_section_table_is_rejected() {
        // Section table offset that wraps once indexed.
        let mut elf = build_test_elf([0u8; 16], (70, 0));
        elf[0x28..0x30].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            read_elf_cache_info(&elf),
            Err(CreatorError::NotElf)
        ));

        // And one merely pointing far past the end of the image.
        let mut elf = build_test_elf([0u8; 16], (70, 0));
        elf[0x28..0x30].copy_from_slice(&(1u64 << 40).to_le_bytes());
        assert!(matches!(
            read_elf_cache_info(&elf),
            Err(CreatorError::NotElf)
        ));
    }

    #[test]
    fn truncated_note_section_is_tolerated() {
        let hash = [7u8; 16];
        let mut elf = build_test_elf(hash, (70, 1));
        // Shrink the declared note section to exactly the first note, so
        // the version note is cut off.
        let note_shdr = EHDR_SIZE + 64;
        elf[note_shdr + 0x20..note_shdr + 0x28].copy_from_slice(&40u64.to_le_bytes());
        // The first note still parses; the version note is then missing.
        assert!(matches!(
            read_elf_cache_info(&elf),
            Err(CreatorError::MissingNote {
                name: NOTE_COMPILER_VERSION
            })
        ));
    }
}
