//! Zipcode archives.
//!
//! Zipcode packs a 35-track D64 image into four files, `1!name` through
//! `4!name`, holding tracks 1-8, 9-16, 17-25 and 26-35.  Each file starts
//! with a load address (the first also carries the disk ID), followed by
//! one record per sector.  A record begins with the track (whose top two
//! bits select the packing) and the sector number:
//!
//! * plain: the 256 data bytes follow;
//! * `0x40`: one fill byte follows, repeated across the sector;
//! * `0x80`: a length, a repeat marker and `length` packed bytes follow,
//!   in which `marker count value` expands to `count` copies of `value`.
//!
//! Some archives hold all four parts in one file named without a prefix.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::disk::{ImageType, BLOCK_SIZE};
use crate::tool::ToolError;

pub const TRACKS: u8 = 35;
/// The first track of each part.
const PART_STARTS: [u8; 4] = [1, 9, 17, 26];
const FIRST_HEADER: usize = 4;
const HEADER: usize = 2;

const PACK_FILL: u8 = 0x40;
const PACK_RLE: u8 = 0x80;

#[derive(Clone)]
pub struct Sector {
    pub track: u8,
    pub sector: u8,
    pub data: [u8; BLOCK_SIZE],
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], skip: usize) -> Reader<'a> {
        Reader {
            bytes,
            position: skip,
        }
    }

    fn skip(&mut self, count: usize) {
        self.position += count;
    }

    fn byte(&mut self) -> Result<u8, ToolError> {
        let byte = *self.bytes.get(self.position).ok_or(ToolError::BadImage)?;
        self.position += 1;
        Ok(byte)
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ToolError> {
        let bytes = self
            .bytes
            .get(self.position..self.position + count)
            .ok_or(ToolError::BadImage)?;
        self.position += count;
        Ok(bytes)
    }

    /// Decode the next sector record, which must belong to `track`.
    fn sector(&mut self, track: u8) -> Result<Sector, ToolError> {
        let flags = self.byte()?;
        let sector = self.byte()?;
        if flags & 0x3f != track {
            debug!("zipcode: expected track {}, found {}", track, flags & 0x3f);
            return Err(ToolError::BadImage);
        }
        let mut data = [0u8; BLOCK_SIZE];
        if flags & PACK_RLE != 0 {
            let length = self.byte()? as usize;
            let marker = self.byte()?;
            let packed = self.take(length)?;
            let mut input = packed.iter();
            let mut count = 0;
            while let Some(&c) = input.next() {
                let (repeat, value) = if c == marker {
                    match (input.next(), input.next()) {
                        (Some(&repeat), Some(&value)) => (repeat as usize, value),
                        _ => return Err(ToolError::BadImage),
                    }
                } else {
                    (1, c)
                };
                if count + repeat > BLOCK_SIZE {
                    return Err(ToolError::BadImage);
                }
                data[count..count + repeat].fill(value);
                count += repeat;
            }
        } else if flags & PACK_FILL != 0 {
            data.fill(self.byte()?);
        } else {
            data.copy_from_slice(self.take(BLOCK_SIZE)?);
        }
        Ok(Sector {
            track,
            sector,
            data,
        })
    }

    fn track(&mut self, track: u8, sectors: &mut Vec<Sector>) -> Result<(), ToolError> {
        for _ in 0..ImageType::D64.sectors_in_track(track) {
            sectors.push(self.sector(track)?);
        }
        Ok(())
    }
}

/// Decode the four parts of an archive.
pub fn decode_parts(parts: &[Vec<u8>; 4]) -> Result<Vec<Sector>, ToolError> {
    let mut sectors = Vec::with_capacity(683);
    for (index, part) in parts.iter().enumerate() {
        let mut reader = Reader::new(part, if index == 0 { FIRST_HEADER } else { HEADER });
        let end = PART_STARTS.get(index + 1).copied().unwrap_or(TRACKS + 1);
        for track in PART_STARTS[index]..end {
            reader.track(track, &mut sectors)?;
        }
    }
    Ok(sectors)
}

/// Decode an archive whose parts were joined into one file.
pub fn decode_single(bytes: &[u8]) -> Result<Vec<Sector>, ToolError> {
    let mut sectors = Vec::with_capacity(683);
    let mut reader = Reader::new(bytes, FIRST_HEADER);
    for track in 1..=TRACKS {
        if track != 1 && PART_STARTS.contains(&track) {
            reader.skip(HEADER);
        }
        reader.track(track, &mut sectors)?;
    }
    Ok(sectors)
}

/// The base name of an archive, without any `N!` part prefix.
fn base_name(zipname: &Path) -> Result<(PathBuf, String), ToolError> {
    let name = zipname
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(ToolError::BadName)?;
    let name = match name.as_bytes() {
        [b'1'..=b'4', b'!', ..] => &name[2..],
        _ => name,
    };
    if name.is_empty() {
        return Err(ToolError::BadName);
    }
    let dir = zipname.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok((dir, name.to_string()))
}

/// Load and decode an archive from the host filesystem.  `zipname` may
/// name any of the parts, or the base name.
pub fn load(zipname: &Path) -> Result<Vec<Sector>, ToolError> {
    let (dir, name) = base_name(zipname)?;
    let single = dir.join(&name);
    if let Ok(bytes) = fs::read(&single) {
        info!("reading {} as a single-file archive", single.display());
        return decode_single(&bytes);
    }
    let mut parts: [Vec<u8>; 4] = Default::default();
    for (index, part) in parts.iter_mut().enumerate() {
        let path = dir.join(format!("{}!{}", index + 1, name));
        *part = fs::read(&path).map_err(|e| {
            debug!("{}: {}", path.display(), e);
            ToolError::NotRd
        })?;
    }
    decode_parts(&parts)
}
