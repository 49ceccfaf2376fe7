//! The G64/G71 container: raw GCR tracks behind a track offset table.
//!
//! ```text
//! 0   signature "GCR-1541" (or "GCR-1571")
//! 8   version (0)
//! 9   number of half-tracks
//! 10  maximum track size (u16 LE)
//! 12  track offsets (u32 LE per half-track, 0 = no track)
//! ..  speed zones (u32 LE per half-track)
//! ```
//!
//! Each track is a u16 LE byte count followed by that many GCR bytes.

use std::io;

use log::debug;

use crate::disk::error::DiskError;
use crate::disk::format::{ImageType, BLOCK_SIZE};
use crate::gcr::{self, FdcStatus, RawTrack, SectorHeader};

pub const G64_SIGNATURE: &[u8] = b"GCR-1541";
pub const G71_SIGNATURE: &[u8] = b"GCR-1571";
pub const P64_SIGNATURE: &[u8] = b"P64-1541";

const HEADER_SIZE: usize = 12;
const VERSION: u8 = 0;
const G64_HALF_TRACKS: u8 = 84;
const G71_HALF_TRACKS: u8 = 168;
/// The maximum track size written into newly created images.
const DEFAULT_MAX_TRACK_SIZE: u16 = 7928;
/// G71 images keep the second side starting at physical track 43.
const G71_SIDE_OFFSET: u8 = 42;
const SIDE_TRACKS: u8 = 35;

/// The decoded track table of a GCR image, plus the in-memory track data.
pub struct FluxTracks {
    half_tracks: u8,
    slots: Vec<Option<TrackSlot>>,
}

struct TrackSlot {
    offset: usize,
    track: RawTrack,
    dirty: bool,
}

/// Identify a GCR-family signature.
pub fn signature_type(bytes: &[u8]) -> Option<ImageType> {
    match bytes.get(..8) {
        Some(s) if s == G64_SIGNATURE => Some(ImageType::G64),
        Some(s) if s == G71_SIGNATURE => Some(ImageType::G71),
        Some(s) if s == P64_SIGNATURE => Some(ImageType::P64),
        _ => None,
    }
}

/// The half-track index holding a logical track.
pub fn half_track_index(image_type: ImageType, track: u8) -> usize {
    let physical = if image_type == ImageType::G71 && track > SIDE_TRACKS {
        track + G71_SIDE_OFFSET - SIDE_TRACKS
    } else {
        track
    };
    (physical as usize - 1) * 2
}

fn read_u16(bytes: &[u8], offset: usize) -> io::Result<u16> {
    match bytes.get(offset..offset + 2) {
        Some(b) => Ok(u16::from(b[0]) | u16::from(b[1]) << 8),
        None => Err(DiskError::InvalidHeader.into()),
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> io::Result<u32> {
    match bytes.get(offset..offset + 4) {
        Some(b) => Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(DiskError::InvalidHeader.into()),
    }
}

impl FluxTracks {
    /// Parse the header and load every track.
    pub fn parse(bytes: &[u8]) -> io::Result<(ImageType, FluxTracks)> {
        let image_type = match signature_type(bytes) {
            Some(ImageType::P64) => return Err(DiskError::Unsupported("P64").into()),
            Some(image_type) => image_type,
            None => return Err(DiskError::InvalidHeader.into()),
        };
        if bytes.len() < HEADER_SIZE || bytes[8] != VERSION {
            return Err(DiskError::InvalidHeader.into());
        }
        let half_tracks = bytes[9];
        if half_tracks == 0 {
            return Err(DiskError::InvalidHeader.into());
        }
        let max_track_size = read_u16(bytes, 10)? as usize;

        let mut slots = Vec::with_capacity(half_tracks as usize);
        for index in 0..half_tracks as usize {
            let offset = read_u32(bytes, HEADER_SIZE + index * 4)? as usize;
            // Speed entries above 3 point at speed maps, which only matter
            // for timing.
            let speed = read_u32(bytes, HEADER_SIZE + (half_tracks as usize + index) * 4)?;
            if offset == 0 {
                slots.push(None);
                continue;
            }
            let length = read_u16(bytes, offset)? as usize;
            if length > gcr::MAX_TRACK_SIZE || (max_track_size > 0 && length > max_track_size) {
                return Err(DiskError::InvalidHeader.into());
            }
            let data = bytes
                .get(offset + 2..offset + 2 + length)
                .ok_or(DiskError::InvalidHeader)?;
            debug!(
                "half-track {}: {} bytes at {:#x}, speed {}",
                index, length, offset, speed
            );
            slots.push(Some(TrackSlot {
                offset,
                track: RawTrack::new(index as u8, data.to_vec()),
                dirty: false,
            }));
        }
        Ok((image_type, FluxTracks { half_tracks, slots }))
    }

    #[inline]
    pub fn half_tracks(&self) -> u8 {
        self.half_tracks
    }

    /// Number of whole tracks addressable through this image.
    pub fn tracks(&self, image_type: ImageType) -> u8 {
        match image_type {
            ImageType::G71 => SIDE_TRACKS * 2,
            _ => (self.half_tracks / 2).min(42),
        }
    }

    pub fn track(&self, index: usize) -> Option<&RawTrack> {
        self.slots
            .get(index)
            .and_then(|slot| slot.as_ref())
            .map(|slot| &slot.track)
    }

    /// Write a sector into a track, which is marked for write-back only if
    /// the write went through.  `None` if the image has no such track.
    pub fn write_sector(&mut self, index: usize, sector: u8, data: &[u8]) -> Option<FdcStatus> {
        let slot = self.slots.get_mut(index)?.as_mut()?;
        let status = gcr::write_sector(&mut slot.track, sector, data);
        if status.is_ok() {
            slot.dirty = true;
        }
        Some(status)
    }

    /// Replace the bytes of an existing track.  The replacement must have
    /// the same length, since the container has no room to grow it.
    pub fn replace(&mut self, index: usize, track: &RawTrack) -> io::Result<()> {
        let slot = match self.slots.get_mut(index).and_then(|slot| slot.as_mut()) {
            Some(slot) => slot,
            None => return Err(DiskError::BadTrack.into()),
        };
        if slot.track.len() != track.len() {
            return Err(DiskError::InvalidOffset.into());
        }
        if slot.track.data() != track.data() {
            slot.track.data_mut().copy_from_slice(track.data());
            slot.dirty = true;
        }
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.slots.iter().flatten().any(|slot| slot.dirty)
    }

    /// Copy modified tracks back into the container bytes.
    pub fn write_back(&mut self, bytes: &mut [u8]) -> io::Result<()> {
        for slot in self.slots.iter_mut().flatten().filter(|slot| slot.dirty) {
            let start = slot.offset + 2;
            let target = bytes
                .get_mut(start..start + slot.track.len())
                .ok_or(DiskError::InvalidOffset)?;
            target.copy_from_slice(slot.track.data());
            slot.dirty = false;
        }
        Ok(())
    }
}

/// Lay out one formatted track with empty sectors.
pub fn format_track(image_type: ImageType, track: u8, id: [u8; 2]) -> RawTrack {
    let empty = [0u8; BLOCK_SIZE];
    let sectors = (0..image_type.sectors_in_track(track))
        .map(|sector| (SectorHeader::new(track, sector, id), &empty[..], FdcStatus::Ok));
    gcr::encode_track(
        half_track_index(image_type, track) as u8,
        image_type.raw_track_size(track),
        image_type.gap_size(track),
        sectors,
    )
}

/// Build the bytes of a new, formatted G64 or G71 image.
pub fn create(image_type: ImageType, id: [u8; 2]) -> io::Result<Vec<u8>> {
    let (signature, half_tracks, tracks) = match image_type {
        ImageType::G64 => (G64_SIGNATURE, G64_HALF_TRACKS, SIDE_TRACKS),
        ImageType::G71 => (G71_SIGNATURE, G71_HALF_TRACKS, SIDE_TRACKS * 2),
        _ => return Err(DiskError::Unsupported(image_type.name()).into()),
    };
    let table_size = half_tracks as usize * 4;
    let slot_size = 2 + DEFAULT_MAX_TRACK_SIZE as usize;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + 2 * table_size + tracks as usize * slot_size);
    bytes.extend_from_slice(signature);
    bytes.push(VERSION);
    bytes.push(half_tracks);
    bytes.extend_from_slice(&DEFAULT_MAX_TRACK_SIZE.to_le_bytes());
    bytes.resize(HEADER_SIZE + 2 * table_size, 0);

    for track in 1..=tracks {
        let index = half_track_index(image_type, track);
        let offset = bytes.len();
        let raw = format_track(image_type, track, id);
        let speed = image_type.speed_zone(track) as u32;
        let offset_entry = HEADER_SIZE + index * 4;
        let speed_entry = HEADER_SIZE + table_size + index * 4;
        bytes[offset_entry..offset_entry + 4].copy_from_slice(&(offset as u32).to_le_bytes());
        bytes[speed_entry..speed_entry + 4].copy_from_slice(&speed.to_le_bytes());

        bytes.extend_from_slice(&(raw.len() as u16).to_le_bytes());
        bytes.extend_from_slice(raw.data());
        bytes.resize(offset + slot_size, 0);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_parse() {
        let bytes = create(ImageType::G64, *b"ab").unwrap();
        assert_eq!(&bytes[..8], G64_SIGNATURE);
        let (image_type, tracks) = FluxTracks::parse(&bytes).unwrap();
        assert_eq!(image_type, ImageType::G64);
        assert_eq!(tracks.half_tracks(), 84);
        assert_eq!(tracks.tracks(image_type), 42);
        assert!(tracks.track(half_track_index(image_type, 1)).is_some());
        assert!(tracks.track(1).is_none());
        assert!(tracks.track(half_track_index(image_type, 36)).is_none());

        let track = tracks.track(half_track_index(image_type, 18)).unwrap();
        assert_eq!(track.len(), 7142);
        let mut buffer = [0xffu8; BLOCK_SIZE];
        assert_eq!(
            gcr::read_sector_with_id(track, 18, Some(*b"ab"), &mut buffer),
            FdcStatus::Ok
        );
        assert_eq!(buffer, [0u8; BLOCK_SIZE]);
    }

    #[test]
    fn test_g71_second_side() {
        assert_eq!(half_track_index(ImageType::G71, 35), 68);
        assert_eq!(half_track_index(ImageType::G71, 36), 84);
        assert_eq!(half_track_index(ImageType::G64, 36), 70);

        let bytes = create(ImageType::G71, *b"xy").unwrap();
        let (image_type, tracks) = FluxTracks::parse(&bytes).unwrap();
        assert_eq!(image_type, ImageType::G71);
        assert_eq!(tracks.tracks(image_type), 70);
        let track = tracks.track(half_track_index(image_type, 36)).unwrap();
        assert_eq!(track.len(), 7692);
    }

    #[test]
    fn test_bad_headers() {
        let mut bytes = create(ImageType::G64, *b"ab").unwrap();
        bytes[8] = 1;
        assert_eq!(
            DiskError::from_io_error(&FluxTracks::parse(&bytes).err().unwrap()),
            Some(DiskError::InvalidHeader)
        );

        let mut p64 = P64_SIGNATURE.to_vec();
        p64.resize(64, 0);
        assert_eq!(
            DiskError::from_io_error(&FluxTracks::parse(&p64).err().unwrap()),
            Some(DiskError::Unsupported("P64"))
        );

        let truncated = &create(ImageType::G64, *b"ab").unwrap()[..2000];
        assert!(FluxTracks::parse(truncated).is_err());
    }

    #[test]
    fn test_write_back() {
        let mut bytes = create(ImageType::G64, *b"ab").unwrap();
        let original = bytes.clone();
        let (image_type, mut tracks) = FluxTracks::parse(&bytes).unwrap();
        let index = half_track_index(image_type, 1);

        tracks.write_back(&mut bytes).unwrap();
        assert_eq!(bytes, original);

        let data = [0x5au8; BLOCK_SIZE];
        assert_eq!(tracks.write_sector(index, 30, &data), Some(FdcStatus::HeaderNotFound));
        assert!(!tracks.is_dirty());
        assert_eq!(tracks.write_sector(index, 3, &data), Some(FdcStatus::Ok));
        assert!(tracks.is_dirty());
        tracks.write_back(&mut bytes).unwrap();
        assert!(!tracks.is_dirty());
        assert_ne!(bytes, original);

        let (_, reloaded) = FluxTracks::parse(&bytes).unwrap();
        let mut buffer = [0u8; BLOCK_SIZE];
        let track = reloaded.track(index).unwrap();
        assert_eq!(gcr::read_sector(track, 3, &mut buffer), FdcStatus::Ok);
        assert_eq!(buffer, data);
    }
}
