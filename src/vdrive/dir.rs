//! CBM DOS directories: entry layout, wildcard matching and the `$` listing.

use std::collections::HashSet;
use std::fmt;

use crate::disk::{DiskImage, BLOCK_SIZE};
use crate::petscii::Petscii;
use crate::vdrive::bam::{Bam, PADDING_BYTE};
use crate::vdrive::dos_code_for_io;
use crate::vdrive::status::DosCode;

pub const ENTRY_SIZE: usize = 32;
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / ENTRY_SIZE;
pub const NAME_LENGTH: usize = 16;

const ENTRY_TYPE_OFFSET: usize = 0x02;
const ENTRY_FIRST_SECTOR_OFFSET: usize = 0x03;
const ENTRY_NAME_OFFSET: usize = 0x05;
const ENTRY_BLOCKS_OFFSET: usize = 0x1e;

const FILE_TYPE_MASK: u8 = 0x07;
const FILE_LOCKED_MASK: u8 = 0x40;
const FILE_CLOSED_MASK: u8 = 0x80;

/// Load address of the BASIC program that a `$` listing is returned as.
pub const LISTING_LOAD_ADDRESS: u16 = 0x0401;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    Del,
    Seq,
    Prg,
    Usr,
    Rel,
}

impl FileType {
    pub fn from_byte(byte: u8) -> FileType {
        match byte & FILE_TYPE_MASK {
            1 => FileType::Seq,
            2 => FileType::Prg,
            3 => FileType::Usr,
            4 => FileType::Rel,
            _ => FileType::Del,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            FileType::Del => 0,
            FileType::Seq => 1,
            FileType::Prg => 2,
            FileType::Usr => 3,
            FileType::Rel => 4,
        }
    }

    /// The type selected by a one-letter option (`S`, `P`, `U`, `L`, `D`).
    pub fn from_letter(letter: u8) -> Option<FileType> {
        match letter {
            b'S' => Some(FileType::Seq),
            b'P' => Some(FileType::Prg),
            b'U' => Some(FileType::Usr),
            b'L' | b'R' => Some(FileType::Rel),
            b'D' => Some(FileType::Del),
            _ => None,
        }
    }

    pub fn from_string(string: &str) -> Option<FileType> {
        match string.to_uppercase().as_str() {
            "DEL" => Some(FileType::Del),
            "SEQ" => Some(FileType::Seq),
            "PRG" => Some(FileType::Prg),
            "USR" => Some(FileType::Usr),
            "REL" => Some(FileType::Rel),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FileType::Del => "DEL",
            FileType::Seq => "SEQ",
            FileType::Prg => "PRG",
            FileType::Usr => "USR",
            FileType::Rel => "REL",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name().to_lowercase())
    }
}

/// The position of a directory entry: a directory block and the entry's
/// index within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub track: u8,
    pub sector: u8,
    pub index: usize,
}

impl Slot {
    #[inline]
    pub fn offset(&self) -> usize {
        self.index * ENTRY_SIZE
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DirEntry {
    pub slot: Slot,
    pub file_type: FileType,
    pub closed: bool,
    pub locked: bool,
    pub first: (u8, u8),
    pub name: Petscii,
    pub blocks: u16,
}

impl DirEntry {
    pub fn new(slot: Slot, name: Petscii, file_type: FileType) -> DirEntry {
        DirEntry {
            slot,
            file_type,
            closed: false,
            locked: false,
            first: (0, 0),
            name,
            blocks: 0,
        }
    }

    /// Parse the entry at `slot` out of its directory block.  Returns None
    /// for an empty (scratched) slot.
    pub fn parse(block: &[u8], slot: Slot) -> Option<DirEntry> {
        let bytes = &block[slot.offset()..slot.offset() + ENTRY_SIZE];
        let attributes = bytes[ENTRY_TYPE_OFFSET];
        if attributes == 0 {
            return None;
        }
        Some(DirEntry {
            slot,
            file_type: FileType::from_byte(attributes),
            closed: attributes & FILE_CLOSED_MASK != 0,
            locked: attributes & FILE_LOCKED_MASK != 0,
            first: (
                bytes[ENTRY_FIRST_SECTOR_OFFSET],
                bytes[ENTRY_FIRST_SECTOR_OFFSET + 1],
            ),
            name: Petscii::from_padded_bytes(
                &bytes[ENTRY_NAME_OFFSET..ENTRY_NAME_OFFSET + NAME_LENGTH],
                PADDING_BYTE,
            ),
            blocks: u16::from_le_bytes([bytes[ENTRY_BLOCKS_OFFSET], bytes[ENTRY_BLOCKS_OFFSET + 1]]),
        })
    }

    pub fn attributes(&self) -> u8 {
        let mut byte = self.file_type.to_byte();
        if self.locked {
            byte |= FILE_LOCKED_MASK;
        }
        if self.closed {
            byte |= FILE_CLOSED_MASK;
        }
        byte
    }

    /// Serialize into the entry's slot of a directory block.  The link bytes
    /// at the start of the first slot are left alone.
    pub fn write(&self, block: &mut [u8]) {
        let offset = self.slot.offset();
        let bytes = &mut block[offset..offset + ENTRY_SIZE];
        for byte in bytes[ENTRY_TYPE_OFFSET..].iter_mut() {
            *byte = 0;
        }
        bytes[ENTRY_TYPE_OFFSET] = self.attributes();
        bytes[ENTRY_FIRST_SECTOR_OFFSET] = self.first.0;
        bytes[ENTRY_FIRST_SECTOR_OFFSET + 1] = self.first.1;
        self.name.write_bytes_with_padding(
            &mut bytes[ENTRY_NAME_OFFSET..ENTRY_NAME_OFFSET + NAME_LENGTH],
            PADDING_BYTE,
        );
        bytes[ENTRY_BLOCKS_OFFSET..ENTRY_BLOCKS_OFFSET + 2].copy_from_slice(&self.blocks.to_le_bytes());
    }
}

impl fmt::Display for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:<4} {:18}{}{}{}",
            self.blocks,
            format!("\"{}\"", self.name),
            if self.closed { ' ' } else { '*' },
            self.file_type,
            if self.locked { "<" } else { " " },
        )
    }
}

/// Match a name against a CBM wildcard pattern: `?` matches any single
/// character and `*` matches the rest of the name.
pub fn matches(pattern: &[u8], name: &[u8]) -> bool {
    let mut name = name.iter();
    for &p in pattern {
        match p {
            b'*' => return true,
            b'?' => {
                if name.next().is_none() {
                    return false;
                }
            }
            _ => {
                if name.next() != Some(&p) {
                    return false;
                }
            }
        }
    }
    name.next().is_none()
}

#[inline]
pub fn has_wildcards(name: &[u8]) -> bool {
    name.iter().any(|&c| c == b'*' || c == b'?')
}

/// A pattern with an optional `=X` file type filter, as used by `$` and by
/// the directory commands of the tool.
#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    pub name: Vec<u8>,
    pub file_type: Option<FileType>,
}

impl Pattern {
    pub fn parse(text: &[u8]) -> Pattern {
        match text.iter().position(|&c| c == b'=') {
            Some(p) => Pattern {
                name: text[..p].to_vec(),
                file_type: text.get(p + 1).and_then(|&c| FileType::from_letter(c)),
            },
            None => Pattern {
                name: text.to_vec(),
                file_type: None,
            },
        }
    }

    pub fn any() -> Pattern {
        Pattern {
            name: b"*".to_vec(),
            file_type: None,
        }
    }

    pub fn matches(&self, entry: &DirEntry) -> bool {
        self.file_type.map_or(true, |t| t == entry.file_type)
            && (self.name.is_empty() || matches(&self.name, entry.name.as_bytes()))
    }
}

/// The blocks of the directory chain, read in order.  A chain that loops,
/// leaves the directory track, or hits an unreadable block is an error.
pub fn read_blocks(image: &DiskImage, bam: &Bam) -> Result<Vec<((u8, u8), Vec<u8>)>, DosCode> {
    let format = bam.format();
    let track = format.directory_track();
    let mut next = Some((track, format.first_directory_sector()));
    let mut visited = HashSet::new();
    let mut blocks = vec![];
    while let Some((t, s)) = next {
        if t != track || !visited.insert(s) {
            return Err(DosCode::DirectoryError);
        }
        let mut block = vec![0u8; BLOCK_SIZE];
        match image.read_sector(t, s, &mut block) {
            Ok(status) if status.is_ok() => {}
            Ok(status) => return Err(DosCode::from_fdc(status)),
            Err(_) => return Err(DosCode::DirectoryError),
        }
        next = if block[0] == 0 { None } else { Some((block[0], block[1])) };
        blocks.push(((t, s), block));
    }
    Ok(blocks)
}

/// All used directory entries, in directory order.
pub fn entries(image: &DiskImage, bam: &Bam) -> Result<Vec<DirEntry>, DosCode> {
    let blocks = read_blocks(image, bam)?;
    Ok(blocks
        .iter()
        .flat_map(|&((track, sector), ref block)| {
            (0..ENTRIES_PER_BLOCK)
                .filter_map(move |index| DirEntry::parse(block, Slot { track, sector, index }))
        })
        .collect())
}

/// Find the first entry matching `pattern`.
pub fn find(image: &DiskImage, bam: &Bam, pattern: &Pattern) -> Result<Option<DirEntry>, DosCode> {
    Ok(entries(image, bam)?
        .into_iter()
        .find(|entry| entry.file_type != FileType::Del && pattern.matches(entry)))
}

/// Where a new entry can go: an empty slot in the existing chain, or (if
/// the chain is full) a block that could extend it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreeSlot {
    Existing(Slot),
    Extend { last: (u8, u8), sector: u8 },
}

/// Locate room for a new directory entry without modifying anything.
pub fn free_slot(image: &DiskImage, bam: &Bam) -> Result<FreeSlot, DosCode> {
    let blocks = read_blocks(image, bam)?;
    for &((track, sector), ref block) in &blocks {
        for index in 0..ENTRIES_PER_BLOCK {
            if block[index * ENTRY_SIZE + ENTRY_TYPE_OFFSET] == 0 {
                return Ok(FreeSlot::Existing(Slot { track, sector, index }));
            }
        }
    }
    let last = blocks.last().map(|&(location, _)| location).ok_or(DosCode::DirectoryError)?;
    let mut probe = bam.clone();
    match probe.alloc_directory_sector(last.1) {
        Some(sector) => Ok(FreeSlot::Extend { last, sector }),
        None => Err(DosCode::DiskFull),
    }
}

/// Store an entry, claiming a slot for it first if it has none.  Extending
/// the directory allocates the new block in the BAM cache and links it.
pub fn store_entry(
    image: &mut DiskImage,
    bam: &mut Bam,
    entry: &mut DirEntry,
    claim: bool,
) -> Result<(), DosCode> {
    let io_error = |e| dos_code_for_io(&e);
    if claim {
        entry.slot = match free_slot(image, bam)? {
            FreeSlot::Existing(slot) => slot,
            FreeSlot::Extend { last, .. } => {
                let track = bam.format().directory_track();
                let sector = bam.alloc_directory_sector(last.1).ok_or(DosCode::DiskFull)?;
                let mut block = vec![0u8; BLOCK_SIZE];
                image.read_sector(last.0, last.1, &mut block).map_err(io_error)?;
                block[0] = track;
                block[1] = sector;
                image.write_sector(last.0, last.1, &block).map_err(io_error)?;
                let mut fresh = vec![0u8; BLOCK_SIZE];
                fresh[1] = 0xff;
                image.write_sector(track, sector, &fresh).map_err(io_error)?;
                Slot { track, sector, index: 0 }
            }
        };
    }
    let mut block = vec![0u8; BLOCK_SIZE];
    image
        .read_sector(entry.slot.track, entry.slot.sector, &mut block)
        .map_err(io_error)?;
    entry.write(&mut block);
    image
        .write_sector(entry.slot.track, entry.slot.sector, &block)
        .map_err(io_error)
}

/// Mark a slot empty.
pub fn clear_entry(image: &mut DiskImage, slot: Slot) -> Result<(), DosCode> {
    let io_error = |e| dos_code_for_io(&e);
    let mut block = vec![0u8; BLOCK_SIZE];
    image.read_sector(slot.track, slot.sector, &mut block).map_err(io_error)?;
    block[slot.offset() + ENTRY_TYPE_OFFSET] = 0;
    image.write_sector(slot.track, slot.sector, &block).map_err(io_error)
}

/// Render the directory as the BASIC program a drive returns for `$`.
/// Lines carry the block count as their line number; the header line shows
/// the disk name in reverse and the last line the free block count.
pub fn listing(image: &DiskImage, bam: &Bam, pattern: &Pattern) -> Result<Vec<u8>, DosCode> {
    let mut lines: Vec<(u16, Vec<u8>)> = vec![];

    let mut header = vec![0x12, b'"'];
    let mut name = [0u8; NAME_LENGTH];
    Petscii::from_bytes(bam.disk_name()).write_bytes_with_padding(&mut name, b' ');
    header.extend_from_slice(&name);
    header.push(b'"');
    header.push(b' ');
    header.extend_from_slice(&bam.disk_id());
    header.push(b' ');
    header.extend_from_slice(&bam.dos_version());
    lines.push((0, header));

    for entry in entries(image, bam)? {
        if !pattern.matches(&entry) {
            continue;
        }
        let mut text = vec![b' '; padding_for(entry.blocks)];
        text.push(b'"');
        text.extend_from_slice(entry.name.as_bytes());
        text.push(b'"');
        text.extend(std::iter::repeat(b' ').take(NAME_LENGTH - entry.name.len().min(NAME_LENGTH)));
        text.push(if entry.closed { b' ' } else { b'*' });
        text.extend_from_slice(entry.file_type.name().as_bytes());
        text.push(if entry.locked { b'<' } else { b' ' });
        lines.push((entry.blocks, text));
    }

    let free = bam.blocks_free().min(u32::from(u16::MAX)) as u16;
    let mut footer = b"BLOCKS FREE.".to_vec();
    footer.extend_from_slice(&[b' '; 13]);
    lines.push((free, footer));

    let mut program = LISTING_LOAD_ADDRESS.to_le_bytes().to_vec();
    let mut address = LISTING_LOAD_ADDRESS;
    for (number, text) in lines {
        // link (2) + line number (2) + text + terminator
        address += 4 + text.len() as u16 + 1;
        program.extend_from_slice(&address.to_le_bytes());
        program.extend_from_slice(&number.to_le_bytes());
        program.extend_from_slice(&text);
        program.push(0);
    }
    program.extend_from_slice(&[0, 0]);
    Ok(program)
}

fn padding_for(blocks: u16) -> usize {
    match blocks {
        0..=9 => 3,
        10..=99 => 2,
        100..=999 => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards() {
        assert!(matches(b"FOO", b"FOO"));
        assert!(!matches(b"FOO", b"FOOD"));
        assert!(matches(b"FO*", b"FOOD"));
        assert!(matches(b"*", b""));
        assert!(matches(b"F?O", b"FXO"));
        assert!(!matches(b"F?O", b"FO"));
        assert!(!matches(b"FOOD", b"FOO"));
        assert!(has_wildcards(b"A*"));
        assert!(!has_wildcards(b"ABC"));
    }

    #[test]
    fn test_entry_layout() {
        let slot = Slot {
            track: 18,
            sector: 1,
            index: 1,
        };
        let mut entry = DirEntry::new(slot, Petscii::from_bytes(b"HELLO"), FileType::Prg);
        entry.closed = true;
        entry.first = (17, 0);
        entry.blocks = 300;

        let mut block = vec![0u8; BLOCK_SIZE];
        entry.write(&mut block);
        assert_eq!(&block[0x22..0x2a], &[0x82, 17, 0, b'H', b'E', b'L', b'L', b'O']);
        assert_eq!(block[0x2a], PADDING_BYTE);
        assert_eq!(&block[0x3e..0x40], &[0x2c, 0x01]);
        assert_eq!(DirEntry::parse(&block, slot), Some(entry.clone()));
        assert_eq!(
            DirEntry::parse(&block, Slot { index: 0, ..slot }),
            None
        );
        assert_eq!(entry.to_string(), format!("300  {:18} prg ", "\"hello\""));
    }

    #[test]
    fn test_pattern() {
        let pattern = Pattern::parse(b"A*=S");
        assert_eq!(pattern.name, b"A*".to_vec());
        assert_eq!(pattern.file_type, Some(FileType::Seq));
        let slot = Slot {
            track: 18,
            sector: 1,
            index: 0,
        };
        let entry = DirEntry::new(slot, Petscii::from_bytes(b"ABC"), FileType::Prg);
        assert!(!pattern.matches(&entry));
        assert!(Pattern::parse(b"A*=P").matches(&entry));
        assert!(Pattern::any().matches(&entry));
    }
}
