//! Drive-level attach: binding an image to an emulated drive mechanism.
//!
//! When the host emulates the drive hardware itself, the mechanism reads
//! raw GCR tracks rather than sectors.  A `DriveContext` holds those live
//! track buffers for one drive.  Attaching loads them from the image
//! (sector images are GCR-encoded on the fly, with any error info applied)
//! and detaching writes modified tracks back.

use std::fmt;
use std::io;

use log::{debug, info, warn};

use crate::disk::{DiskError, DiskImage, ImageType};
use crate::gcr::{self, FdcStatus, RawTrack};

/// Emulated drive models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DriveModel {
    None,
    Cbm1540,
    Cbm1541,
    Cbm1541II,
    Cbm1551,
    Cbm1570,
    Cbm1571,
    Cbm1571Cr,
    Cbm1581,
    Cmd2000,
    Cmd4000,
    Cbm2031,
    Cbm2040,
    Cbm3040,
    Cbm4040,
    Cbm1001,
    Cbm8050,
    Cbm8250,
}

impl DriveModel {
    pub const ALL: [DriveModel; 18] = [
        DriveModel::None,
        DriveModel::Cbm1540,
        DriveModel::Cbm1541,
        DriveModel::Cbm1541II,
        DriveModel::Cbm1551,
        DriveModel::Cbm1570,
        DriveModel::Cbm1571,
        DriveModel::Cbm1571Cr,
        DriveModel::Cbm1581,
        DriveModel::Cmd2000,
        DriveModel::Cmd4000,
        DriveModel::Cbm2031,
        DriveModel::Cbm2040,
        DriveModel::Cbm3040,
        DriveModel::Cbm4040,
        DriveModel::Cbm1001,
        DriveModel::Cbm8050,
        DriveModel::Cbm8250,
    ];

    pub fn name(self) -> &'static str {
        use self::DriveModel::*;
        match self {
            None => "none",
            Cbm1540 => "1540",
            Cbm1541 => "1541",
            Cbm1541II => "1541-II",
            Cbm1551 => "1551",
            Cbm1570 => "1570",
            Cbm1571 => "1571",
            Cbm1571Cr => "1571CR",
            Cbm1581 => "1581",
            Cmd2000 => "2000",
            Cmd4000 => "4000",
            Cbm2031 => "2031",
            Cbm2040 => "2040",
            Cbm3040 => "3040",
            Cbm4040 => "4040",
            Cbm1001 => "1001",
            Cbm8050 => "8050",
            Cbm8250 => "8250",
        }
    }

    pub fn from_name(name: &str) -> Option<DriveModel> {
        let name = name.to_uppercase();
        DriveModel::ALL
            .iter()
            .copied()
            .find(|model| model.name().to_uppercase() == name)
    }

    /// Can this drive physically take an image of the given type?
    pub fn supports(self, image_type: ImageType) -> bool {
        use self::DriveModel::*;
        use crate::disk::ImageType::*;
        match image_type {
            D64 | G64 | P64 | X64 => matches!(
                self,
                Cbm1540
                    | Cbm1541
                    | Cbm1541II
                    | Cbm1551
                    | Cbm1570
                    | Cbm1571
                    | Cbm1571Cr
                    | Cbm2031
                    | Cbm2040
                    | Cbm3040
                    | Cbm4040
            ),
            D67 => matches!(
                self,
                Cbm1540 | Cbm1541 | Cbm1541II | Cbm2031 | Cbm2040 | Cbm3040 | Cbm4040
            ),
            D71 | G71 => matches!(self, Cbm1570 | Cbm1571 | Cbm1571Cr),
            D81 => matches!(self, Cbm1581 | Cmd2000 | Cmd4000),
            D80 | D82 => matches!(self, Cbm1001 | Cbm8050 | Cbm8250),
        }
    }

    /// Does the mechanism read GCR?  The 1581 and the CMD drives use MFM.
    pub fn uses_gcr(self) -> bool {
        !matches!(
            self,
            DriveModel::None | DriveModel::Cbm1581 | DriveModel::Cmd2000 | DriveModel::Cmd4000
        )
    }
}

impl Default for DriveModel {
    fn default() -> DriveModel {
        DriveModel::Cbm1541
    }
}

impl fmt::Display for DriveModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the mechanism knows about the bound image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundImage {
    pub image_type: ImageType,
    pub tracks: u8,
    pub read_only: bool,
}

/// The live state of one emulated drive mechanism.
pub struct DriveContext {
    unit: u8,
    drive: u8,
    model: DriveModel,
    bound: Option<BoundImage>,
    /// GCR data per logical track (index 0 is track 1).
    tracks: Vec<Option<RawTrack>>,
    dirty: Vec<bool>,
    attach_clk: u64,
    detach_clk: u64,
    attach_detach_clk: u64,
}

impl DriveContext {
    pub fn new(unit: u8, drive: u8, model: DriveModel) -> DriveContext {
        DriveContext {
            unit,
            drive,
            model,
            bound: None,
            tracks: vec![],
            dirty: vec![],
            attach_clk: 0,
            detach_clk: 0,
            attach_detach_clk: 0,
        }
    }

    #[inline]
    pub fn model(&self) -> DriveModel {
        self.model
    }

    pub fn set_model(&mut self, model: DriveModel) {
        self.model = model;
    }

    /// The image currently bound, if any.
    #[inline]
    pub fn bound(&self) -> Option<BoundImage> {
        self.bound
    }

    #[inline]
    pub fn attach_clk(&self) -> u64 {
        self.attach_clk
    }

    #[inline]
    pub fn detach_clk(&self) -> u64 {
        self.detach_clk
    }

    /// The clock of an attach that followed a detach, used to model the
    /// time a disk change takes.
    #[inline]
    pub fn attach_detach_clk(&self) -> u64 {
        self.attach_detach_clk
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.iter().any(|&d| d)
    }

    /// The live GCR data of a logical track.
    pub fn track(&self, track: u8) -> Option<&RawTrack> {
        let index = (track as usize).checked_sub(1)?;
        self.tracks.get(index).and_then(|t| t.as_ref())
    }

    /// Bind an image to the mechanism.  An image the drive model cannot
    /// take is refused, and nothing about the context changes.
    pub fn attach(&mut self, image: &DiskImage, clock: u64) -> io::Result<()> {
        let image_type = image.image_type();
        if !self.model.supports(image_type) {
            warn!(
                "unit {} drive {}: a {} drive cannot take a {} image",
                self.unit,
                self.drive,
                self.model,
                image_type.name()
            );
            return Err(DiskError::DriveMismatch.into());
        }
        if self.bound.is_some() {
            warn!(
                "unit {} drive {}: replacing a bound image without detaching it",
                self.unit, self.drive
            );
        }

        let mut tracks = Vec::with_capacity(image.tracks() as usize);
        if self.model.uses_gcr() {
            for track in 1..=image.tracks() {
                tracks.push(image.read_raw_track(track)?);
            }
        }

        self.dirty = vec![false; tracks.len()];
        self.tracks = tracks;
        self.bound = Some(BoundImage {
            image_type,
            tracks: image.tracks(),
            read_only: image.read_only(),
        });
        if self.detach_clk > 0 {
            self.attach_detach_clk = clock;
        }
        self.attach_clk = clock;
        info!(
            "unit {} drive {}: {} image in {} drive{}",
            self.unit,
            self.drive,
            image_type.name(),
            self.model,
            if self.tracks.is_empty() { " (no GCR)" } else { "" }
        );
        Ok(())
    }

    /// Unbind the image, writing any modified tracks back to it first.  The
    /// buffers are released even if a write back fails; the first failure
    /// is returned.
    pub fn detach(&mut self, image: &mut DiskImage, clock: u64) -> io::Result<()> {
        if self.bound.take().is_none() {
            return Ok(());
        }
        let mut result = Ok(());
        for (index, raw) in self.tracks.iter().enumerate() {
            if !self.dirty[index] {
                continue;
            }
            if let Some(raw) = raw {
                let track = index as u8 + 1;
                debug!("unit {}: writing back track {}", self.unit, track);
                if let Err(e) = image.write_raw_track(track, raw) {
                    warn!("unit {}: track {} not written back: {}", self.unit, track, e);
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        self.tracks = vec![];
        self.dirty = vec![];
        self.detach_clk = clock;
        info!("unit {} drive {}: image removed", self.unit, self.drive);
        result
    }

    fn gcr_track(&self, track: u8) -> io::Result<&RawTrack> {
        let bound = self.bound.ok_or(DiskError::NotAttached)?;
        if self.tracks.is_empty() {
            return Err(DiskError::Unsupported("MFM").into());
        }
        if track < 1 || track > bound.tracks {
            return Err(DiskError::BadTrack.into());
        }
        self.track(track)
            .ok_or_else(|| DiskError::Controller(FdcStatus::SyncNotFound).into())
    }

    /// Read a sector from the live GCR data, the way the drive's
    /// controller would.
    pub fn read_sector(&self, track: u8, sector: u8, buffer: &mut [u8]) -> io::Result<FdcStatus> {
        let raw = self.gcr_track(track)?;
        Ok(gcr::read_sector(raw, sector, buffer))
    }

    /// Write a sector into the live GCR data.
    pub fn write_sector(&mut self, track: u8, sector: u8, data: &[u8]) -> io::Result<()> {
        self.gcr_track(track)?;
        if self.bound.map_or(false, |b| b.read_only) {
            return Err(DiskError::ReadOnly.into());
        }
        let index = track as usize - 1;
        let raw = self.tracks[index]
            .as_mut()
            .ok_or(DiskError::Controller(FdcStatus::SyncNotFound))?;
        match gcr::write_sector(raw, sector, data) {
            FdcStatus::Ok => {
                self.dirty[index] = true;
                Ok(())
            }
            status => Err(DiskError::Controller(status).into()),
        }
    }
}

impl fmt::Debug for DriveContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DriveContext")
            .field("unit", &self.unit)
            .field("drive", &self.drive)
            .field("model", &self.model)
            .field("bound", &self.bound)
            .field("attach_clk", &self.attach_clk)
            .field("detach_clk", &self.detach_clk)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::BLOCK_SIZE;

    #[test]
    fn test_compatibility() {
        assert!(DriveModel::Cbm1541.supports(ImageType::G64));
        assert!(DriveModel::Cbm2040.supports(ImageType::D67));
        assert!(!DriveModel::Cbm1571.supports(ImageType::D67));
        assert!(DriveModel::Cbm1571.supports(ImageType::D71));
        assert!(!DriveModel::Cbm1541.supports(ImageType::G71));
        assert!(DriveModel::Cmd4000.supports(ImageType::D81));
        assert!(DriveModel::Cbm8250.supports(ImageType::D80));
        assert!(!DriveModel::None.supports(ImageType::D64));
        assert_eq!(DriveModel::from_name("1541-ii"), Some(DriveModel::Cbm1541II));
        assert_eq!(DriveModel::from_name("9999"), None);
    }

    #[test]
    fn test_incompatible_leaves_nothing_bound() {
        let image = DiskImage::memory(ImageType::G64).unwrap();
        let mut context = DriveContext::new(8, 0, DriveModel::Cbm1581);
        let error = context.attach(&image, 1000).unwrap_err();
        assert!(error == DiskError::DriveMismatch);
        assert_eq!(context.bound(), None);
        assert!(context.track(1).is_none());
        assert_eq!(context.attach_clk(), 0);
    }

    #[test]
    fn test_sector_image_round_trip() {
        let mut image = DiskImage::memory(ImageType::D64).unwrap();
        let original = [0x5au8; BLOCK_SIZE];
        image.write_sector(5, 3, &original).unwrap();

        let mut context = DriveContext::new(8, 0, DriveModel::Cbm1541);
        context.attach(&image, 100).unwrap();
        assert_eq!(context.track(35).map(|t| t.track()), Some(68));

        let mut buffer = [0u8; BLOCK_SIZE];
        assert_eq!(context.read_sector(5, 3, &mut buffer).unwrap(), FdcStatus::Ok);
        assert_eq!(&buffer[..], &original[..]);

        let changed = [0xc3u8; BLOCK_SIZE];
        context.write_sector(5, 3, &changed).unwrap();
        assert!(context.is_dirty());
        // The image is untouched until detach.
        image.read_sector(5, 3, &mut buffer).unwrap();
        assert_eq!(&buffer[..], &original[..]);

        context.detach(&mut image, 200).unwrap();
        image.read_sector(5, 3, &mut buffer).unwrap();
        assert_eq!(&buffer[..], &changed[..]);
        assert_eq!(context.bound(), None);
        assert_eq!(context.detach_clk(), 200);

        context.attach(&image, 300).unwrap();
        assert_eq!(context.attach_clk(), 300);
        assert_eq!(context.attach_detach_clk(), 300);
    }

    #[test]
    fn test_mfm_binds_without_gcr() {
        let image = DiskImage::memory(ImageType::D81).unwrap();
        let mut context = DriveContext::new(8, 0, DriveModel::Cbm1581);
        context.attach(&image, 1).unwrap();
        assert!(context.bound().is_some());
        assert!(context.track(1).is_none());
        let mut buffer = [0u8; BLOCK_SIZE];
        assert!(context.read_sector(1, 0, &mut buffer).is_err());
    }

    #[test]
    fn test_flux_write_back() {
        let mut image = DiskImage::memory(ImageType::G64).unwrap();
        let mut context = DriveContext::new(8, 0, DriveModel::Cbm1541II);
        context.attach(&image, 1).unwrap();
        let data = [0x11u8; BLOCK_SIZE];
        context.write_sector(18, 0, &data).unwrap();
        assert!(context.write_sector(0, 0, &data).unwrap_err() == DiskError::BadTrack);
        context.detach(&mut image, 2).unwrap();
        assert!(image.is_dirty());
        let mut buffer = [0u8; BLOCK_SIZE];
        assert_eq!(image.read_sector(18, 0, &mut buffer).unwrap(), FdcStatus::Ok);
        assert_eq!(&buffer[..], &data[..]);
    }
}
