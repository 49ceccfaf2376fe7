use std::io;

use log::{debug, warn};

use crate::disk::{DiskImage, ImageType, BLOCK_SIZE};
use crate::vdrive::dos::DosFormat;

pub const PADDING_BYTE: u8 = 0xa0;
pub const DISK_NAME_SIZE: usize = 16;

/// Where one track's free-sector count and bitmap live within the BAM
/// image.  A set bit marks a free sector.
struct EntryLayout {
    count: usize,
    map: usize,
}

/// The in-memory Block Availability Map of a virtual drive: the header
/// block followed by any separate BAM blocks of the format, exactly as
/// they are stored on disk.
#[derive(Clone)]
pub struct Bam {
    format: DosFormat,
    image_type: ImageType,
    tracks: u8,
    data: Vec<u8>,
}

impl Bam {
    pub fn new(format: DosFormat, image_type: ImageType, image_tracks: u8) -> Bam {
        Bam {
            format,
            image_type,
            tracks: format.bam_tracks(image_tracks),
            data: vec![0; format.bam_size()],
        }
    }

    #[inline]
    pub fn format(&self) -> DosFormat {
        self.format
    }

    /// The highest track managed by this BAM.
    #[inline]
    pub fn tracks(&self) -> u8 {
        self.tracks
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn sectors_in_track(&self, track: u8) -> u8 {
        self.image_type.sectors_in_track(track)
    }

    /// Read the BAM blocks from an image.
    pub fn load(&mut self, image: &DiskImage) -> io::Result<()> {
        for (block, &(track, sector)) in self.data.chunks_mut(BLOCK_SIZE).zip(self.format.bam_blocks()) {
            let status = image.read_sector(track, sector, block)?;
            if !status.is_ok() {
                warn!("BAM block {}/{}: {}", track, sector, status);
            }
        }
        Ok(())
    }

    /// Write the BAM blocks back to an image.
    pub fn store(&self, image: &mut DiskImage) -> io::Result<()> {
        for (block, &(track, sector)) in self.data.chunks(BLOCK_SIZE).zip(self.format.bam_blocks()) {
            image.write_sector(track, sector, block)?;
        }
        debug!("BAM written ({} blocks free)", self.blocks_free());
        Ok(())
    }

    fn entry(&self, track: u8) -> Option<EntryLayout> {
        use self::DosFormat::*;
        if track < 1 || track > self.tracks {
            return None;
        }
        let t = track as usize;
        Some(match self.format {
            Cbm1541 | Cbm2040 | Cbm1571 if track <= 35 => EntryLayout {
                count: 4 * t,
                map: 4 * t + 1,
            },
            Cbm1541 => EntryLayout {
                count: 0xc0 + 4 * (t - 36),
                map: 0xc0 + 4 * (t - 36) + 1,
            },
            Cbm1571 => EntryLayout {
                count: 0xdd + (t - 36),
                map: 0x100 + 3 * (t - 36),
            },
            Cbm1581 => {
                let (block, index) = if track <= 40 { (1, t - 1) } else { (2, t - 41) };
                let base = block * BLOCK_SIZE + 0x10 + 6 * index;
                EntryLayout {
                    count: base,
                    map: base + 1,
                }
            }
            Cbm8050 | Cbm8250 => {
                let base = (1 + (t - 1) / 50) * BLOCK_SIZE + 6 + 5 * ((t - 1) % 50);
                EntryLayout {
                    count: base,
                    map: base + 1,
                }
            }
            Cbm2040 => return None,
        })
    }

    fn is_reserved(&self, track: u8) -> bool {
        track == self.format.directory_track() || Some(track) == self.format.reserved_track()
    }

    pub fn is_free(&self, track: u8, sector: u8) -> bool {
        if sector >= self.sectors_in_track(track) {
            return false;
        }
        match self.entry(track) {
            Some(entry) => {
                self.data[entry.map + (sector / 8) as usize] & (1 << (sector % 8)) != 0
            }
            None => false,
        }
    }

    /// Mark a sector as used.  Returns false if it was not free.
    pub fn allocate(&mut self, track: u8, sector: u8) -> bool {
        if !self.is_free(track, sector) {
            return false;
        }
        if let Some(entry) = self.entry(track) {
            self.data[entry.map + (sector / 8) as usize] &= !(1 << (sector % 8));
            self.data[entry.count] = self.data[entry.count].saturating_sub(1);
        }
        true
    }

    /// Mark a sector as free.  Returns false if it was already free or is
    /// outside the map.
    pub fn free(&mut self, track: u8, sector: u8) -> bool {
        if sector >= self.sectors_in_track(track) || self.is_free(track, sector) {
            return false;
        }
        match self.entry(track) {
            Some(entry) => {
                self.data[entry.map + (sector / 8) as usize] |= 1 << (sector % 8);
                self.data[entry.count] = self.data[entry.count].saturating_add(1);
                true
            }
            None => false,
        }
    }

    pub fn free_in_track(&self, track: u8) -> u8 {
        self.entry(track).map_or(0, |entry| self.data[entry.count])
    }

    /// The "blocks free" figure: free sectors outside the directory track
    /// and any reserved track.
    pub fn blocks_free(&self) -> u32 {
        (1..=self.tracks)
            .filter(|&track| !self.is_reserved(track))
            .map(|track| u32::from(self.free_in_track(track)))
            .sum()
    }

    /// Find a free sector on a track, scanning from `start` and wrapping.
    fn scan_track(&self, track: u8, start: u8) -> Option<u8> {
        if self.free_in_track(track) == 0 {
            return None;
        }
        let sectors = self.sectors_in_track(track);
        (0..sectors)
            .map(|i| (start + i) % sectors)
            .find(|&sector| self.is_free(track, sector))
    }

    /// Locate the block a file's first sector goes to: the nearest track
    /// to the directory with any free sector, trying the lower side first
    /// at each distance.
    pub fn first_free(&self) -> Option<(u8, u8)> {
        let directory = self.format.directory_track();
        for distance in 1..=self.format.disk_half() {
            let candidates = [
                directory.checked_sub(distance),
                directory.checked_add(distance),
            ];
            for track in candidates.iter().flatten().copied() {
                if track < 1 || track > self.tracks || self.is_reserved(track) {
                    continue;
                }
                if let Some(sector) = self.scan_track(track, 0) {
                    return Some((track, sector));
                }
            }
        }
        None
    }

    pub fn alloc_first_free(&mut self) -> Option<(u8, u8)> {
        let (track, sector) = self.first_free()?;
        self.allocate(track, sector);
        Some((track, sector))
    }

    /// Locate the block that follows `(track, sector)` in a file chain.
    ///
    /// The CBM algorithm grows files away from the directory track.  The
    /// current track is tried first, starting one interleave past the
    /// previous sector.  Then the tracks further out on the same half are
    /// tried, then all of the other half, then all of the original half.
    pub fn next_free(&self, track: u8, sector: u8) -> Option<(u8, u8)> {
        let directory = self.format.directory_track();
        if track == directory || track < 1 || track > self.tracks {
            return None;
        }
        let interleave = self.format.interleave();
        let mut track = track;
        let mut passes = 3;
        let mut reset_sector = false;

        while passes > 0 {
            if !self.is_reserved(track) {
                let sectors = self.sectors_in_track(track);
                let mut start = if reset_sector { 0 } else { sector + interleave };
                while start >= sectors {
                    start -= sectors;
                    if start > 0 {
                        start -= 1;
                    }
                }
                if let Some(found) = self.scan_track(track, start) {
                    return Some((track, found));
                }
            }

            if track < directory {
                track -= 1;
                if track < 1 {
                    track = directory + 1;
                    passes -= 1;
                    reset_sector = true;
                }
            } else {
                track += 1;
                if track > self.tracks {
                    track = directory - 1;
                    passes -= 1;
                    reset_sector = true;
                }
            }
        }
        None
    }

    pub fn alloc_next_free(&mut self, track: u8, sector: u8) -> Option<(u8, u8)> {
        let (track, sector) = self.next_free(track, sector)?;
        self.allocate(track, sector);
        Some((track, sector))
    }

    /// Allocate a sector on the directory track to extend the directory
    /// after `previous`.
    pub fn alloc_directory_sector(&mut self, previous: u8) -> Option<u8> {
        let directory = self.format.directory_track();
        let sectors = self.sectors_in_track(directory);
        let start = (previous + self.format.directory_interleave()) % sectors;
        let sector = (0..sectors)
            .map(|i| (start + i) % sectors)
            .find(|&sector| self.is_free(directory, sector))?;
        self.allocate(directory, sector);
        Some(sector)
    }

    /// Mark every sector of every track as free.
    pub fn free_all(&mut self) {
        for track in 1..=self.tracks {
            if let Some(entry) = self.entry(track) {
                let sectors = self.sectors_in_track(track);
                self.data[entry.count] = sectors;
                for sector in 0..sectors {
                    self.data[entry.map + (sector / 8) as usize] |= 1 << (sector % 8);
                }
            }
        }
    }

    /// Mark the blocks the DOS itself occupies: header, BAM blocks, the
    /// first directory block, and any reserved track.
    pub fn allocate_system_blocks(&mut self) {
        for &(track, sector) in self.format.bam_blocks() {
            self.allocate(track, sector);
        }
        self.allocate(self.format.directory_track(), self.format.first_directory_sector());
        if let Some(track) = self.format.reserved_track() {
            for sector in 0..self.sectors_in_track(track) {
                self.allocate(track, sector);
            }
        }
    }

    /// Lay out the header and BAM of a freshly formatted disk.
    pub fn create(&mut self, name: &[u8], id: [u8; 2]) {
        use self::DosFormat::*;
        let format = self.format;
        for byte in self.data.iter_mut() {
            *byte = 0;
        }
        let directory = format.directory_track();
        match format {
            Cbm8050 | Cbm8250 => {
                self.data[0] = 38;
                self.data[1] = 0;
            }
            _ => {
                self.data[0] = directory;
                self.data[1] = format.first_directory_sector();
            }
        }
        self.data[2] = format.format_letter();
        if format == Cbm1571 {
            self.data[3] = 0x80;
        }

        let name_offset = format.name_offset();
        for byte in &mut self.data[name_offset..name_offset + format.header_name_length()] {
            *byte = PADDING_BYTE;
        }
        self.set_disk_name(name);
        self.set_disk_id(id);
        let version = format.version_offset();
        self.data[version..version + 2].copy_from_slice(&format.dos_version());

        match format {
            Cbm1581 => {
                for (block, link) in [(1usize, (40u8, 2u8)), (2, (0, 0xff))].iter().copied() {
                    let base = block * BLOCK_SIZE;
                    self.data[base] = link.0;
                    self.data[base + 1] = link.1;
                    self.data[base + 2] = format.format_letter();
                    self.data[base + 3] = !format.format_letter();
                    self.data[base + 4] = id[0];
                    self.data[base + 5] = id[1];
                    self.data[base + 6] = 0xc0;
                }
            }
            Cbm8050 | Cbm8250 => {
                let blocks = format.bam_blocks();
                for block in 1..blocks.len() {
                    let base = block * BLOCK_SIZE;
                    let link = blocks
                        .get(block + 1)
                        .copied()
                        .unwrap_or((directory, format.first_directory_sector()));
                    let first = (block - 1) * 50 + 1;
                    let last = (first + 50).min(self.tracks as usize + 1);
                    self.data[base] = link.0;
                    self.data[base + 1] = link.1;
                    self.data[base + 2] = format.format_letter();
                    self.data[base + 4] = first as u8;
                    self.data[base + 5] = last as u8;
                }
            }
            _ => {}
        }

        self.free_all();
        self.allocate_system_blocks();
    }

    /// The disk name, without padding.
    pub fn disk_name(&self) -> &[u8] {
        let offset = self.format.name_offset();
        let name = &self.data[offset..offset + DISK_NAME_SIZE];
        let length = name
            .iter()
            .rposition(|&b| b != PADDING_BYTE)
            .map_or(0, |p| p + 1);
        &name[..length]
    }

    pub fn set_disk_name(&mut self, name: &[u8]) {
        let offset = self.format.name_offset();
        for (i, byte) in self.data[offset..offset + DISK_NAME_SIZE].iter_mut().enumerate() {
            *byte = name.get(i).copied().unwrap_or(PADDING_BYTE);
        }
    }

    pub fn disk_id(&self) -> [u8; 2] {
        let offset = self.format.id_offset();
        [self.data[offset], self.data[offset + 1]]
    }

    pub fn set_disk_id(&mut self, id: [u8; 2]) {
        let offset = self.format.id_offset();
        self.data[offset..offset + 2].copy_from_slice(&id);
        if self.format == DosFormat::Cbm1581 {
            for block in 1..=2 {
                let base = block * BLOCK_SIZE;
                self.data[base + 4..base + 6].copy_from_slice(&id);
            }
        }
    }

    /// The DOS version bytes (e.g. "2A").
    pub fn dos_version(&self) -> [u8; 2] {
        let offset = self.format.version_offset();
        [self.data[offset], self.data[offset + 1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatted(image_type: ImageType) -> Bam {
        let format = DosFormat::for_image(image_type, image_type.default_tracks());
        let mut bam = Bam::new(format, image_type, image_type.default_tracks());
        bam.create(b"TEST DISK", *b"ab");
        bam
    }

    #[test]
    fn test_blocks_free() {
        assert_eq!(formatted(ImageType::D64).blocks_free(), 664);
        assert_eq!(formatted(ImageType::D71).blocks_free(), 1328);
        assert_eq!(formatted(ImageType::D81).blocks_free(), 3160);
        assert_eq!(formatted(ImageType::D80).blocks_free(), 2052);
        assert_eq!(formatted(ImageType::D82).blocks_free(), 4133);
    }

    #[test]
    fn test_header_layout() {
        let bam = formatted(ImageType::D64);
        let bytes = bam.as_bytes();
        assert_eq!(&bytes[..4], &[18, 1, b'A', 0]);
        assert_eq!(&bytes[0x90..0x99], b"TEST DISK");
        assert_eq!(bytes[0x99], PADDING_BYTE);
        assert_eq!(&bytes[0xa2..0xa7], &[b'a', b'b', PADDING_BYTE, b'2', b'A']);
        assert_eq!(bytes[0xab], 0);
        // Track 1: 21 free sectors, all bits set.
        assert_eq!(&bytes[4..8], &[21, 0xff, 0xff, 0x1f]);
        // Track 18: header and first directory block in use.
        assert_eq!(&bytes[0x48..0x4c], &[17, 0xfc, 0xff, 0x07]);
        assert_eq!(bam.disk_name(), b"TEST DISK");
        assert_eq!(bam.disk_id(), *b"ab");
        assert_eq!(bam.dos_version(), *b"2A");

        let bam = formatted(ImageType::D81);
        let bytes = bam.as_bytes();
        assert_eq!(&bytes[..3], &[40, 3, b'D']);
        assert_eq!(&bytes[0x100..0x107], &[40, 2, b'D', 0xbb, b'a', b'b', 0xc0]);
        assert_eq!(&bytes[0x200..0x202], &[0, 0xff]);
        assert_eq!(bam.dos_version(), *b"3D");

        let bam = formatted(ImageType::D80);
        let bytes = bam.as_bytes();
        assert_eq!(&bytes[0x100..0x106], &[38, 3, b'C', 0, 1, 51]);
        assert_eq!(&bytes[0x200..0x206], &[39, 1, b'C', 0, 51, 78]);
    }

    #[test]
    fn test_allocation_order() {
        let mut bam = formatted(ImageType::D64);
        assert_eq!(bam.alloc_first_free(), Some((17, 0)));
        assert_eq!(bam.alloc_next_free(17, 0), Some((17, 10)));
        assert_eq!(bam.alloc_next_free(17, 10), Some((17, 20)));
        // 20 + 10 wraps to 30 - 21 = 9, minus one.
        assert_eq!(bam.alloc_next_free(17, 20), Some((17, 8)));
        assert_eq!(bam.alloc_next_free(18, 0), None);
        assert_eq!(bam.free_in_track(17), 17);

        // Upper half files grow upwards.
        for sector in 0..19 {
            bam.allocate(19, sector);
        }
        assert_eq!(bam.alloc_next_free(19, 5), Some((20, 15)));
    }

    #[test]
    fn test_exhaustion() {
        let mut bam = formatted(ImageType::D64);
        let mut count = 0;
        let mut previous = bam.alloc_first_free();
        while let Some((track, sector)) = previous {
            count += 1;
            previous = bam.alloc_next_free(track, sector);
        }
        assert_eq!(count, 664);
        assert_eq!(bam.blocks_free(), 0);
        assert_eq!(bam.alloc_first_free(), None);
    }

    #[test]
    fn test_allocate_and_free() {
        let mut bam = formatted(ImageType::D71);
        assert!(bam.is_free(40, 3));
        assert!(bam.allocate(40, 3));
        assert!(!bam.allocate(40, 3));
        assert_eq!(bam.free_in_track(40), 20);
        assert!(bam.free(40, 3));
        assert!(!bam.free(40, 3));
        assert!(!bam.is_free(53, 0));
        assert!(!bam.free(71, 0));
        assert_eq!(bam.as_bytes()[0xdd + 4], 21);
    }

    #[test]
    fn test_free_with_corrupt_count() {
        let mut bam = formatted(ImageType::D64);
        assert!(bam.allocate(1, 0));
        bam.data[4] = 0xff;
        assert!(bam.free(1, 0));
        assert_eq!(bam.as_bytes()[4], 0xff);
    }

    #[test]
    fn test_directory_sector() {
        let mut bam = formatted(ImageType::D64);
        assert_eq!(bam.alloc_directory_sector(1), Some(4));
        assert_eq!(bam.alloc_directory_sector(4), Some(7));
        let before = bam.blocks_free();
        assert_eq!(bam.alloc_directory_sector(7), Some(10));
        assert_eq!(bam.blocks_free(), before);
    }

    #[test]
    fn test_extended_1541() {
        let mut bam = Bam::new(DosFormat::Cbm1541, ImageType::D64, 40);
        bam.create(b"BIG", *b"00");
        assert_eq!(bam.blocks_free(), 664 + 5 * 17);
        assert_eq!(bam.free_in_track(40), 17);
        assert_eq!(bam.as_bytes()[0xc0], 17);
    }
}
