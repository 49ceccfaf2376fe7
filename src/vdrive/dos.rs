use crate::disk::ImageType;

/// The DOS family whose on-disk layout (BAM, header, directory) a virtual
/// drive emulates.  Chosen from the type of the attached image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DosFormat {
    Cbm1541,
    Cbm2040,
    Cbm1571,
    Cbm1581,
    Cbm8050,
    Cbm8250,
}

/// Tracks of a 1541 disk covered by the standard BAM entries.
const STANDARD_TRACKS: u8 = 35;
/// Tracks of a 1541 disk that the extended BAM (at 0xc0) can describe.
const EXTENDED_TRACKS: u8 = 40;

impl DosFormat {
    pub fn for_image(image_type: ImageType, tracks: u8) -> DosFormat {
        use crate::disk::ImageType::*;
        match image_type {
            D64 | G64 | X64 => DosFormat::Cbm1541,
            D67 => DosFormat::Cbm2040,
            D71 | G71 => DosFormat::Cbm1571,
            D81 => DosFormat::Cbm1581,
            D80 => DosFormat::Cbm8050,
            D82 => DosFormat::Cbm8250,
            P64 if tracks > 42 => DosFormat::Cbm1571,
            P64 => DosFormat::Cbm1541,
        }
    }

    pub fn name(self) -> &'static str {
        use self::DosFormat::*;
        match self {
            Cbm1541 => "1541",
            Cbm2040 => "2040",
            Cbm1571 => "1571",
            Cbm1581 => "1581",
            Cbm8050 => "8050",
            Cbm8250 => "8250",
        }
    }

    /// Number of tracks managed by the BAM, given the image's track count.
    pub fn bam_tracks(self, image_tracks: u8) -> u8 {
        use self::DosFormat::*;
        match self {
            Cbm1541 => image_tracks.min(EXTENDED_TRACKS),
            Cbm2040 => STANDARD_TRACKS,
            Cbm1571 => 70,
            Cbm1581 => image_tracks,
            Cbm8050 => 77,
            Cbm8250 => 154,
        }
    }

    pub fn directory_track(self) -> u8 {
        use self::DosFormat::*;
        match self {
            Cbm1541 | Cbm2040 | Cbm1571 => 18,
            Cbm1581 => 40,
            Cbm8050 | Cbm8250 => 39,
        }
    }

    pub fn first_directory_sector(self) -> u8 {
        match self {
            DosFormat::Cbm1581 => 3,
            _ => 1,
        }
    }

    /// A track entirely reserved by the DOS, besides the directory track.
    pub fn reserved_track(self) -> Option<u8> {
        match self {
            DosFormat::Cbm1571 => Some(53),
            _ => None,
        }
    }

    /// The header block, holding the disk name and ID.
    pub fn header_location(self) -> (u8, u8) {
        (self.directory_track(), 0)
    }

    /// The blocks making up the in-memory BAM image, in order.  The header
    /// block always comes first, even on formats where it holds no bitmap.
    pub fn bam_blocks(self) -> &'static [(u8, u8)] {
        use self::DosFormat::*;
        match self {
            Cbm1541 | Cbm2040 => &[(18, 0)],
            Cbm1571 => &[(18, 0), (53, 0)],
            Cbm1581 => &[(40, 0), (40, 1), (40, 2)],
            Cbm8050 => &[(39, 0), (38, 0), (38, 3)],
            Cbm8250 => &[(39, 0), (38, 0), (38, 3), (38, 6), (38, 9)],
        }
    }

    pub fn bam_size(self) -> usize {
        self.bam_blocks().len() * 256
    }

    pub fn name_offset(self) -> usize {
        use self::DosFormat::*;
        match self {
            Cbm1541 | Cbm2040 | Cbm1571 => 0x90,
            Cbm1581 => 0x04,
            Cbm8050 | Cbm8250 => 0x06,
        }
    }

    pub fn id_offset(self) -> usize {
        use self::DosFormat::*;
        match self {
            Cbm1541 | Cbm2040 | Cbm1571 => 0xa2,
            Cbm1581 => 0x16,
            Cbm8050 | Cbm8250 => 0x18,
        }
    }

    /// Offset of the two-byte DOS version ("2A", "3D", "2C").
    pub fn version_offset(self) -> usize {
        self.id_offset() + 3
    }

    pub fn dos_version(self) -> [u8; 2] {
        use self::DosFormat::*;
        match self {
            Cbm1541 | Cbm2040 | Cbm1571 => *b"2A",
            Cbm1581 => *b"3D",
            Cbm8050 | Cbm8250 => *b"2C",
        }
    }

    /// Format letter stored in byte 2 of the header block.
    pub fn format_letter(self) -> u8 {
        use self::DosFormat::*;
        match self {
            Cbm1541 | Cbm2040 | Cbm1571 => b'A',
            Cbm1581 => b'D',
            Cbm8050 | Cbm8250 => b'C',
        }
    }

    /// Sector interleave used when writing file chains.
    pub fn interleave(self) -> u8 {
        use self::DosFormat::*;
        match self {
            Cbm1541 | Cbm2040 => 10,
            Cbm1571 | Cbm8050 => 6,
            Cbm1581 => 1,
            Cbm8250 => 5,
        }
    }

    /// Sector interleave used when extending the directory.
    pub fn directory_interleave(self) -> u8 {
        match self {
            DosFormat::Cbm1581 => 1,
            _ => 3,
        }
    }

    /// The furthest distance from the directory track that a first free
    /// block search has to look.
    pub fn disk_half(self) -> u8 {
        use self::DosFormat::*;
        match self {
            Cbm1541 | Cbm2040 => 22,
            Cbm1571 => 52,
            Cbm1581 => 40,
            Cbm8050 => 39,
            Cbm8250 => 117,
        }
    }

    /// Length of the padded disk name field in the header block.
    pub fn header_name_length(self) -> usize {
        match self {
            DosFormat::Cbm1581 => 25,
            _ => 27,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_selection() {
        assert_eq!(DosFormat::for_image(ImageType::G64, 42), DosFormat::Cbm1541);
        assert_eq!(DosFormat::for_image(ImageType::G71, 70), DosFormat::Cbm1571);
        assert_eq!(DosFormat::for_image(ImageType::D82, 154), DosFormat::Cbm8250);
        assert_eq!(DosFormat::for_image(ImageType::P64, 84), DosFormat::Cbm1571);
        assert_eq!(DosFormat::Cbm8250.bam_size(), 0x500);
        assert_eq!(DosFormat::Cbm1541.bam_tracks(42), 40);
        assert_eq!(DosFormat::Cbm1541.bam_tracks(35), 35);
    }
}
