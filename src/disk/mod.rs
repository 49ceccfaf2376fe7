//! Disk image containers.
//!
//! A `DiskImage` presents a uniform track/sector view over every supported
//! image format.  Sector images (D64, D67, D71, D81, D80, D82 and X64) are
//! memory-mapped and written through immediately.  GCR images (G64, G71)
//! are decoded into in-memory raw tracks, accessed through the `gcr` codec,
//! and written back when the image is flushed or closed.

mod error;
mod format;
mod g64;
mod image;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::gcr::{self, FdcStatus, RawTrack, SectorHeader};

pub use self::error::DiskError;
pub use self::format::{probe_size, ImageType, SectorLayout, BLOCK_SIZE};
pub use self::g64::half_track_index;
use self::g64::FluxTracks;
use self::image::Image;

const X64_MAGIC: [u8; 4] = [0x43, 0x15, 0x41, 0x64];
const X64_HEADER_SIZE: usize = 64;
const X64_TRACKS_OFFSET: usize = 7;
const X64_MAX_TRACKS: u8 = 42;

/// The storage behind an image, chosen once when the image is opened.
enum Storage {
    Sectors {
        image: Image,
        /// Offset of the first sector (nonzero for X64 containers).
        data_offset: usize,
        /// Offset of the per-sector error bytes, if present.
        error_info: Option<usize>,
    },
    Flux {
        image: Image,
        tracks: FluxTracks,
    },
}

/// One disk image of a known format.
pub struct DiskImage {
    image_type: ImageType,
    tracks: u8,
    read_only: bool,
    path: Option<PathBuf>,
    storage: Storage,
}

impl DiskImage {
    /// Open an image file.  The format is recognized from the file's
    /// signature or size; if `hint` is given, the recognized format must
    /// match it.
    pub fn open<P: AsRef<Path>>(
        path: P,
        hint: Option<ImageType>,
        read_only: bool,
    ) -> io::Result<DiskImage> {
        let path = path.as_ref();
        let image = Image::open(path, read_only)?;
        let mut disk_image = DiskImage::from_image(image, hint, read_only)?;
        info!(
            "opened {} image {} ({} tracks{})",
            disk_image.image_type.name(),
            path.display(),
            disk_image.tracks,
            if read_only { ", read-only" } else { "" }
        );
        disk_image.path = Some(path.to_path_buf());
        Ok(disk_image)
    }

    /// Create a new blank image file of the given type, replacing any
    /// existing file.  GCR images are created fully formatted (with empty
    /// sectors); sector images are zero-filled.
    pub fn create<P: AsRef<Path>>(path: P, image_type: ImageType) -> io::Result<()> {
        let bytes = blank_image(image_type)?;
        Image::create(path.as_ref(), &bytes)?;
        info!("created {} image {}", image_type.name(), path.as_ref().display());
        Ok(())
    }

    /// A blank image of the given type held in memory.
    pub fn memory(image_type: ImageType) -> io::Result<DiskImage> {
        let bytes = blank_image(image_type)?;
        DiskImage::from_image(Image::from_bytes(bytes), Some(image_type), false)
    }

    /// Wrap existing image bytes held in memory.
    pub fn from_bytes(bytes: Vec<u8>, hint: Option<ImageType>) -> io::Result<DiskImage> {
        DiskImage::from_image(Image::from_bytes(bytes), hint, false)
    }

    fn from_image(image: Image, hint: Option<ImageType>, read_only: bool) -> io::Result<DiskImage> {
        let bytes = image.bytes();
        let (image_type, tracks, storage) = if g64::signature_type(bytes).is_some() {
            let (image_type, flux) = FluxTracks::parse(bytes)?;
            let tracks = flux.tracks(image_type);
            (image_type, tracks, Storage::Flux { image, tracks: flux })
        } else if bytes.len() > X64_HEADER_SIZE && bytes[..4] == X64_MAGIC {
            let tracks = bytes[X64_TRACKS_OFFSET];
            let layout = SectorLayout::new(ImageType::X64, tracks, false);
            if tracks == 0 || tracks > X64_MAX_TRACKS || bytes.len() < X64_HEADER_SIZE + layout.size()
            {
                return Err(DiskError::UnknownFormat.into());
            }
            let storage = Storage::Sectors {
                image,
                data_offset: X64_HEADER_SIZE,
                error_info: None,
            };
            (ImageType::X64, tracks, storage)
        } else {
            let layout = probe_size(bytes.len()).ok_or(DiskError::UnknownFormat)?;
            let error_info = if layout.error_info {
                Some(layout.sectors() * BLOCK_SIZE)
            } else {
                None
            };
            let storage = Storage::Sectors {
                image,
                data_offset: 0,
                error_info,
            };
            (layout.image_type, layout.tracks, storage)
        };
        if let Some(hint) = hint {
            if hint != image_type {
                debug!("expected a {} image, found {}", hint.name(), image_type.name());
                return Err(DiskError::UnknownFormat.into());
            }
        }
        Ok(DiskImage {
            image_type,
            tracks,
            read_only,
            path: None,
            storage,
        })
    }

    #[inline]
    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    #[inline]
    pub fn tracks(&self) -> u8 {
        self.tracks
    }

    /// The number of half-track positions the image can describe.
    pub fn max_half_tracks(&self) -> u8 {
        match &self.storage {
            Storage::Flux { tracks, .. } => tracks.half_tracks(),
            Storage::Sectors { .. } => self.tracks.saturating_mul(2),
        }
    }

    #[inline]
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// The backing file, or None for images held in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn has_error_info(&self) -> bool {
        matches!(
            self.storage,
            Storage::Sectors {
                error_info: Some(_),
                ..
            }
        )
    }

    pub fn sectors_in_track(&self, track: u8) -> u8 {
        self.image_type.sectors_in_track(track)
    }

    /// Validate a location against this image's geometry.
    pub fn check_sector(&self, track: u8, sector: u8) -> Result<(), DiskError> {
        if track < 1 || track > self.tracks {
            Err(DiskError::BadTrack)
        } else if sector >= self.sectors_in_track(track) {
            Err(DiskError::BadSector)
        } else {
            Ok(())
        }
    }

    /// Read a sector into `buffer`.  Media faults (from the error info table
    /// or from decoding GCR) are returned as the status; the buffer holds
    /// whatever data could be read.
    pub fn read_sector(&self, track: u8, sector: u8, buffer: &mut [u8]) -> io::Result<FdcStatus> {
        self.check_sector(track, sector)?;
        match &self.storage {
            Storage::Sectors {
                image,
                data_offset,
                error_info,
            } => {
                let index = self.image_type.sector_index(track, sector);
                let data = image.slice(data_offset + index * BLOCK_SIZE, BLOCK_SIZE)?;
                buffer[..BLOCK_SIZE].copy_from_slice(data);
                Ok(match error_info {
                    Some(offset) => FdcStatus::from_error_byte(image.slice(offset + index, 1)?[0]),
                    None => FdcStatus::Ok,
                })
            }
            Storage::Flux { tracks, .. } => {
                match tracks.track(half_track_index(self.image_type, track)) {
                    Some(raw) => Ok(gcr::read_sector(raw, sector, buffer)),
                    None => Ok(FdcStatus::SyncNotFound),
                }
            }
        }
    }

    /// Write a sector.  Images opened read-only reject the write before
    /// anything is touched.
    pub fn write_sector(&mut self, track: u8, sector: u8, buffer: &[u8]) -> io::Result<()> {
        if self.read_only {
            return Err(DiskError::ReadOnly.into());
        }
        self.check_sector(track, sector)?;
        let image_type = self.image_type;
        match &mut self.storage {
            Storage::Sectors {
                image, data_offset, ..
            } => {
                let index = image_type.sector_index(track, sector);
                image
                    .slice_mut(*data_offset + index * BLOCK_SIZE, BLOCK_SIZE)?
                    .copy_from_slice(&buffer[..BLOCK_SIZE]);
                Ok(())
            }
            Storage::Flux { tracks, .. } => {
                let status = tracks
                    .write_sector(half_track_index(image_type, track), sector, buffer)
                    .ok_or(DiskError::Controller(FdcStatus::SyncNotFound))?;
                match status {
                    FdcStatus::Ok => Ok(()),
                    status => Err(DiskError::Controller(status).into()),
                }
            }
        }
    }

    /// The disk ID as recorded in the header block, which is what GCR
    /// sector headers of a formatted disk carry.
    pub fn header_id(&self) -> io::Result<[u8; 2]> {
        let (track, sector, offset) = self.image_type.header_id_location();
        let mut block = [0u8; BLOCK_SIZE];
        self.read_sector(track, sector, &mut block)?;
        Ok([block[offset], block[offset + 1]])
    }

    /// Produce the raw GCR form of a track.  GCR images hand out their
    /// stored track; sector images are encoded on the fly, with any error
    /// info bytes injected as media faults.  Returns None for a track that
    /// has no data.
    pub fn read_raw_track(&self, track: u8) -> io::Result<Option<RawTrack>> {
        if track < 1 || track > self.tracks {
            return Err(DiskError::BadTrack.into());
        }
        let index = half_track_index(self.image_type, track);
        if let Storage::Flux { tracks, .. } = &self.storage {
            return Ok(tracks.track(index).cloned());
        }
        let id = self.header_id()?;
        let sectors = self.sectors_in_track(track);
        let mut blocks = Vec::with_capacity(sectors as usize);
        for sector in 0..sectors {
            let mut block = vec![0u8; BLOCK_SIZE];
            let status = self.read_sector(track, sector, &mut block)?;
            blocks.push((SectorHeader::new(track, sector, id), block, status));
        }
        Ok(Some(gcr::encode_track(
            index as u8,
            self.image_type.raw_track_size(track),
            self.image_type.gap_size(track),
            blocks
                .iter()
                .map(|(header, block, status)| (*header, &block[..], *status)),
        )))
    }

    /// Store the raw GCR form of a track.  For sector images, each sector
    /// that decodes cleanly is written back; undecodable sectors keep their
    /// previous contents.
    pub fn write_raw_track(&mut self, track: u8, raw: &RawTrack) -> io::Result<()> {
        if self.read_only {
            return Err(DiskError::ReadOnly.into());
        }
        if track < 1 || track > self.tracks {
            return Err(DiskError::BadTrack.into());
        }
        let index = half_track_index(self.image_type, track);
        if let Storage::Flux { tracks, .. } = &mut self.storage {
            return tracks.replace(index, raw);
        }
        let mut block = [0u8; BLOCK_SIZE];
        for sector in 0..self.sectors_in_track(track) {
            match gcr::read_sector(raw, sector, &mut block) {
                FdcStatus::Ok => self.write_sector(track, sector, &block)?,
                status => debug!("track {} sector {} not written back: {}", track, sector, status),
            }
        }
        Ok(())
    }

    /// Low-level format: GCR images get freshly laid out tracks whose
    /// headers carry `id`; sector images are zero-filled.
    pub fn erase(&mut self, id: [u8; 2]) -> io::Result<()> {
        if self.read_only {
            return Err(DiskError::ReadOnly.into());
        }
        let image_type = self.image_type;
        let track_count = self.tracks;
        if let Storage::Flux { tracks, .. } = &mut self.storage {
            for track in 1..=track_count {
                let index = half_track_index(image_type, track);
                if tracks.track(index).is_some() {
                    tracks.replace(index, &g64::format_track(image_type, track, id))?;
                }
            }
            return Ok(());
        }
        let empty = [0u8; BLOCK_SIZE];
        for track in 1..=track_count {
            for sector in 0..image_type.sectors_in_track(track) {
                self.write_sector(track, sector, &empty)?;
            }
        }
        Ok(())
    }

    /// Does the image hold modifications not yet written to its backing?
    pub fn is_dirty(&self) -> bool {
        match &self.storage {
            Storage::Flux { tracks, .. } => tracks.is_dirty(),
            Storage::Sectors { .. } => false,
        }
    }

    /// Push pending changes to the backing store.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.read_only {
            return Ok(());
        }
        match &mut self.storage {
            Storage::Sectors { image, .. } => image.flush(),
            Storage::Flux { image, tracks } => {
                if tracks.is_dirty() {
                    let length = image.len();
                    tracks.write_back(image.slice_mut(0, length)?)?;
                    image.flush()?;
                }
                Ok(())
            }
        }
    }

    /// Flush and release the image.
    pub fn close(mut self) -> io::Result<()> {
        self.flush()?;
        if let Some(path) = &self.path {
            info!("closed image {}", path.display());
        }
        Ok(())
    }
}

impl fmt::Debug for DiskImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DiskImage")
            .field("image_type", &self.image_type)
            .field("tracks", &self.tracks)
            .field("read_only", &self.read_only)
            .field("path", &self.path)
            .finish()
    }
}

/// The bytes of a new, blank image.
fn blank_image(image_type: ImageType) -> io::Result<Vec<u8>> {
    match image_type {
        ImageType::G64 | ImageType::G71 => g64::create(image_type, [0xa0, 0xa0]),
        ImageType::P64 => Err(DiskError::Unsupported("P64").into()),
        ImageType::X64 => {
            let tracks = image_type.default_tracks();
            let layout = SectorLayout::new(image_type, tracks, false);
            let mut bytes = vec![0u8; X64_HEADER_SIZE + layout.size()];
            bytes[..4].copy_from_slice(&X64_MAGIC);
            // Version 1.2, device type 1541.
            bytes[4] = 1;
            bytes[5] = 2;
            bytes[6] = 1;
            bytes[X64_TRACKS_OFFSET] = tracks;
            Ok(bytes)
        }
        _ => {
            let layout = SectorLayout::new(image_type, image_type.default_tracks(), false);
            Ok(vec![0u8; layout.size()])
        }
    }
}
