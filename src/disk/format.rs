use std::path::Path;

use crate::gcr;

pub const BLOCK_SIZE: usize = 256;

/// Disk image types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageType {
    /// 1541 sector image (35 to 42 tracks).
    D64,
    /// 2040 (DOS 1) sector image.
    D67,
    /// 1571 double-sided sector image.
    D71,
    /// 1581 sector image.
    D81,
    /// 8050 sector image.
    D80,
    /// 8250 double-sided sector image.
    D82,
    /// 1541 raw GCR image.
    G64,
    /// 1571 raw GCR image.
    G71,
    /// 1541 flux pulse image.
    P64,
    /// D64 contents behind a 64-byte header.
    X64,
}

// Sectors per track, indexed by speed zone (0 is the innermost zone).
static SECTOR_MAP_1541: [u8; 4] = [17, 18, 19, 21];
static SECTOR_MAP_2040: [u8; 4] = [17, 18, 20, 21];
static SECTOR_MAP_8050: [u8; 4] = [23, 25, 27, 29];

// Raw GCR bytes per track, indexed by speed zone.
static RAW_TRACK_SIZE_1541: [usize; 4] = [6250, 6666, 7142, 7692];
static RAW_TRACK_SIZE_8050: [usize; 4] = [9375, 10000, 10714, 11538];

// Inter-sector gap bytes, indexed by speed zone.
static GAP_SIZE_1541: [usize; 4] = [9, 12, 17, 8];
const GAP_SIZE_8050: usize = 25;

const D81_SECTORS: u8 = 40;

impl ImageType {
    pub fn name(self) -> &'static str {
        use self::ImageType::*;
        match self {
            D64 => "D64",
            D67 => "D67",
            D71 => "D71",
            D81 => "D81",
            D80 => "D80",
            D82 => "D82",
            G64 => "G64",
            G71 => "G71",
            P64 => "P64",
            X64 => "X64",
        }
    }

    pub fn from_name(name: &str) -> Option<ImageType> {
        use self::ImageType::*;
        match &name.to_lowercase()[..] {
            "d64" => Some(D64),
            "d67" => Some(D67),
            "d71" => Some(D71),
            "d81" => Some(D81),
            "d80" => Some(D80),
            "d82" => Some(D82),
            "g64" => Some(G64),
            "g71" => Some(G71),
            "p64" => Some(P64),
            "x64" => Some(X64),
            _ => None,
        }
    }

    pub fn from_extension<P: AsRef<Path>>(path: P) -> Option<ImageType> {
        path.as_ref()
            .extension()
            .and_then(|s| s.to_str())
            .and_then(ImageType::from_name)
    }

    /// Does this image store raw flux (GCR) tracks instead of sectors?
    #[inline]
    pub fn is_flux(self) -> bool {
        matches!(self, ImageType::G64 | ImageType::G71 | ImageType::P64)
    }

    /// Can sectors of this type be error-info tagged?
    pub fn has_error_variant(self) -> bool {
        matches!(self, ImageType::D64 | ImageType::D71 | ImageType::D81)
    }

    /// The number of tracks of a freshly created image.
    pub fn default_tracks(self) -> u8 {
        use self::ImageType::*;
        match self {
            D64 | D67 | X64 => 35,
            D71 => 70,
            D81 => 80,
            D80 => 77,
            D82 => 154,
            G64 | P64 => 42,
            G71 => 70,
        }
    }

    /// Map a track onto the equivalent track of the first side, for the
    /// purpose of looking up its zone.
    fn first_side_track(self, track: u8) -> u8 {
        use self::ImageType::*;
        match self {
            D71 | G71 if track > 35 => track - 35,
            D82 if track > 77 => track - 77,
            _ => track,
        }
    }

    /// The speed zone of a track: 3 for the outermost, 0 for the innermost.
    pub fn speed_zone(self, track: u8) -> usize {
        let track = self.first_side_track(track);
        match self {
            ImageType::D80 | ImageType::D82 => {
                (track < 65) as usize + (track < 54) as usize + (track < 40) as usize
            }
            _ => (track < 31) as usize + (track < 25) as usize + (track < 18) as usize,
        }
    }

    pub fn sectors_in_track(self, track: u8) -> u8 {
        use self::ImageType::*;
        let zone = self.speed_zone(track);
        match self {
            D81 => D81_SECTORS,
            D67 => SECTOR_MAP_2040[zone],
            D80 | D82 => SECTOR_MAP_8050[zone],
            D64 | D71 | G64 | G71 | P64 | X64 => SECTOR_MAP_1541[zone],
        }
    }

    /// Raw GCR track length in bytes for the track's zone.
    pub fn raw_track_size(self, track: u8) -> usize {
        let zone = self.speed_zone(track);
        match self {
            ImageType::D80 | ImageType::D82 => RAW_TRACK_SIZE_8050[zone],
            _ => RAW_TRACK_SIZE_1541[zone],
        }
    }

    /// Gap between sectors when laying out a GCR track.  Zones that are too
    /// crowded for the nominal gap get whatever fits.
    pub fn gap_size(self, track: u8) -> usize {
        let zone = self.speed_zone(track);
        let nominal = match self {
            ImageType::D80 | ImageType::D82 => GAP_SIZE_8050,
            _ => GAP_SIZE_1541[zone],
        };
        let sectors = self.sectors_in_track(track) as usize;
        let room = self.raw_track_size(track) / sectors;
        let fitting = room.saturating_sub(gcr::sector_length(0, gcr::SYNC_LENGTH));
        nominal.min(fitting)
    }

    /// Total sectors in tracks `1..=tracks`.
    pub fn total_sectors(self, tracks: u8) -> usize {
        (1..=tracks)
            .map(|track| self.sectors_in_track(track) as usize)
            .sum()
    }

    /// Linear index of a sector within a sector image.  The location must
    /// already have been checked.
    pub fn sector_index(self, track: u8, sector: u8) -> usize {
        self.total_sectors(track - 1) + sector as usize
    }

    /// Where the disk ID used in GCR sector headers is kept: track, sector,
    /// and offset of the two ID bytes in the header block.
    pub fn header_id_location(self) -> (u8, u8, usize) {
        use self::ImageType::*;
        match self {
            D81 => (40, 0, 0x16),
            D80 | D82 => (39, 0, 0x18),
            _ => (18, 0, 0xa2),
        }
    }
}

/// A sector image layout recognized from the size of a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectorLayout {
    pub image_type: ImageType,
    pub tracks: u8,
    pub error_info: bool,
}

impl SectorLayout {
    pub fn new(image_type: ImageType, tracks: u8, error_info: bool) -> SectorLayout {
        SectorLayout {
            image_type,
            tracks,
            error_info,
        }
    }

    pub fn sectors(&self) -> usize {
        self.image_type.total_sectors(self.tracks)
    }

    /// The file size of this layout, not counting any container header.
    pub fn size(&self) -> usize {
        let sectors = self.sectors();
        if self.error_info {
            sectors * (BLOCK_SIZE + 1)
        } else {
            sectors * BLOCK_SIZE
        }
    }
}

/// Recognize a sector image from its size.  Candidates are tried in the
/// order D64, D67, D71, D81, D80, D82.
pub fn probe_size(length: usize) -> Option<SectorLayout> {
    use self::ImageType::*;
    let candidates = (35..=42)
        .map(|tracks| (D64, tracks))
        .chain(Some((D67, 35)))
        .chain(Some((D71, 70)))
        .chain((80..=83).map(|tracks| (D81, tracks)))
        .chain(Some((D80, 77)))
        .chain(Some((D82, 154)));
    for (image_type, tracks) in candidates {
        let plain = SectorLayout::new(image_type, tracks, false);
        if plain.size() == length {
            return Some(plain);
        }
        let with_errors = SectorLayout::new(image_type, tracks, true);
        if image_type.has_error_variant() && with_errors.size() == length {
            return Some(with_errors);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_sizes() {
        assert_eq!(ImageType::D64.total_sectors(35), 683);
        assert_eq!(ImageType::D64.total_sectors(40), 768);
        assert_eq!(ImageType::D67.total_sectors(35), 690);
        assert_eq!(ImageType::D71.total_sectors(70), 1366);
        assert_eq!(ImageType::D81.total_sectors(80), 3200);
        assert_eq!(ImageType::D80.total_sectors(77), 2083);
        assert_eq!(ImageType::D82.total_sectors(154), 4166);
    }

    #[test]
    fn test_probe() {
        let probe = |size| probe_size(size).map(|l| (l.image_type, l.tracks, l.error_info));
        assert_eq!(probe(174848), Some((ImageType::D64, 35, false)));
        assert_eq!(probe(175531), Some((ImageType::D64, 35, true)));
        assert_eq!(probe(196608), Some((ImageType::D64, 40, false)));
        assert_eq!(probe(176640), Some((ImageType::D67, 35, false)));
        assert_eq!(probe(349696), Some((ImageType::D71, 70, false)));
        assert_eq!(probe(351062), Some((ImageType::D71, 70, true)));
        assert_eq!(probe(819200), Some((ImageType::D81, 80, false)));
        assert_eq!(probe(822400), Some((ImageType::D81, 80, true)));
        assert_eq!(probe(533248), Some((ImageType::D80, 77, false)));
        assert_eq!(probe(1066496), Some((ImageType::D82, 154, false)));
        assert_eq!(probe(1000), None);
        assert_eq!(probe(0), None);
    }

    #[test]
    fn test_zone_boundaries() {
        let d64: Vec<u8> = [1, 17, 18, 24, 25, 30, 31, 35, 40]
            .iter()
            .map(|&t| ImageType::D64.sectors_in_track(t))
            .collect();
        assert_eq!(d64, vec![21, 21, 19, 19, 18, 18, 17, 17, 17]);

        let d71: Vec<u8> = [36, 52, 53, 70]
            .iter()
            .map(|&t| ImageType::D71.sectors_in_track(t))
            .collect();
        assert_eq!(d71, vec![21, 21, 19, 17]);

        let d80: Vec<u8> = [1, 39, 40, 53, 54, 64, 65, 77]
            .iter()
            .map(|&t| ImageType::D80.sectors_in_track(t))
            .collect();
        assert_eq!(d80, vec![29, 29, 27, 27, 25, 25, 23, 23]);
        assert_eq!(ImageType::D82.sectors_in_track(78), 29);
        assert_eq!(ImageType::D67.sectors_in_track(18), 20);
        assert_eq!(ImageType::D81.sectors_in_track(80), 40);
    }

    #[test]
    fn test_tracks_fit() {
        for &image_type in &[ImageType::D64, ImageType::D67, ImageType::D71, ImageType::D80] {
            for track in 1..=image_type.default_tracks() {
                let sectors = image_type.sectors_in_track(track) as usize;
                let needed =
                    sectors * gcr::sector_length(image_type.gap_size(track), gcr::SYNC_LENGTH);
                assert!(needed <= image_type.raw_track_size(track));
            }
        }
    }

    #[test]
    fn test_extension() {
        assert_eq!(ImageType::from_extension("games.D64"), Some(ImageType::D64));
        assert_eq!(ImageType::from_extension("/tmp/x.g71"), Some(ImageType::G71));
        assert_eq!(ImageType::from_extension("readme.txt"), None);
        assert_eq!(ImageType::from_extension("noextension"), None);
    }
}
