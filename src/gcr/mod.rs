//! Group Coded Recording (GCR) encoding and decoding of disk sectors.
//!
//! CBM drives store every 4-bit nibble as a 5-bit code chosen so that the
//! flux stream never contains more than two consecutive zero bits.  A run of
//! ten or more one bits therefore can't occur inside data and is used as a
//! sync mark.  A sector on the track consists of:
//!
//! ```text
//! sync | header (10 bytes GCR) | gap | sync | data block (325 bytes GCR) | gap
//! ```
//!
//! The header decodes to `08 checksum sector track id2 id1 0f 0f`, and the
//! data block to `07 <256 data bytes> checksum 00 00`.  Both checksums are the
//! XOR of the covered bytes.

mod cursor;

use std::fmt;

pub use self::cursor::{BitCursor, BitWriter};

pub const SECTOR_SIZE: usize = 256;
/// Number of 0xff bytes written for each sync mark.
pub const SYNC_LENGTH: usize = 5;
/// Minimum run of one bits recognized as a sync mark.
pub const SYNC_BITS: usize = 10;
pub const HEADER_GAP_LENGTH: usize = 9;
pub const GCR_HEADER_LENGTH: usize = 10;
pub const GCR_BLOCK_LENGTH: usize = 325;
/// Largest raw track any container may hold.
pub const MAX_TRACK_SIZE: usize = 65536;

const HEADER_MARK: u8 = 0x08;
const DATA_MARK: u8 = 0x07;
const GAP_BYTE: u8 = 0x55;
const HEADER_GROUPS: usize = 2;
const BLOCK_GROUPS: usize = 65;
const BLOCK_LENGTH: usize = BLOCK_GROUPS * 4;

/// The data sync must start within this many bits after the header ends.
const DATA_SYNC_WINDOW: usize = 40 * 8;

static TO_GCR: [u8; 16] = [
    0x0a, 0x0b, 0x12, 0x13, 0x0e, 0x0f, 0x16, 0x17, 0x09, 0x19, 0x1a, 0x1b, 0x0d, 0x1d, 0x1e, 0x15,
];

const BAD: u8 = 0xff;
static FROM_GCR: [u8; 32] = [
    BAD, BAD, BAD, BAD, BAD, BAD, BAD, BAD, BAD, 0x08, 0x00, 0x01, BAD, 0x0c, 0x04, 0x05, //
    BAD, BAD, 0x02, 0x03, BAD, 0x0f, 0x06, 0x07, BAD, 0x09, 0x0a, 0x0b, BAD, 0x0d, 0x0e, BAD,
];

/// The raw flux content of one track, stored as a bit stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawTrack {
    track: u8,
    data: Vec<u8>,
    bits: usize,
}

impl RawTrack {
    /// Wrap raw GCR bytes belonging to the given half-track index.
    pub fn new(track: u8, data: Vec<u8>) -> RawTrack {
        let bits = data.len() * 8;
        RawTrack { track, data, bits }
    }

    /// A track of the given size that contains nothing but gap bytes.
    pub fn blank(track: u8, size: usize) -> RawTrack {
        RawTrack::new(track, vec![GAP_BYTE; size])
    }

    #[inline]
    pub fn track(&self) -> u8 {
        self.track
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn bits(&self) -> usize {
        self.bits
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The identifying fields of a sector header.  `id` holds the disk ID in the
/// order it appears in the BAM (first character first); on the media the two
/// bytes are stored swapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectorHeader {
    pub sector: u8,
    pub track: u8,
    pub id: [u8; 2],
}

impl SectorHeader {
    pub fn new(track: u8, sector: u8, id: [u8; 2]) -> SectorHeader {
        SectorHeader { sector, track, id }
    }

    #[inline]
    pub fn checksum(&self) -> u8 {
        self.sector ^ self.track ^ self.id[1] ^ self.id[0]
    }
}

/// Outcome of a disk controller operation, as reported by the drive's
/// floppy disk controller.  These also appear as the per-sector bytes of
/// "error info" image variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FdcStatus {
    Ok,
    HeaderNotFound,
    SyncNotFound,
    NoBlock,
    DataChecksum,
    Verify,
    WriteProtect,
    HeaderChecksum,
    BlockLength,
    IdMismatch,
    DriveNotReady,
    Decode,
}

impl FdcStatus {
    /// Interpret a byte from an image's error info table.  Zero and any
    /// unassigned value mean the sector is fine.
    pub fn from_error_byte(byte: u8) -> FdcStatus {
        use self::FdcStatus::*;
        match byte {
            2 => HeaderNotFound,
            3 => SyncNotFound,
            4 => NoBlock,
            5 => DataChecksum,
            7 => Verify,
            8 => WriteProtect,
            9 => HeaderChecksum,
            10 => BlockLength,
            11 => IdMismatch,
            15 => DriveNotReady,
            16 => Decode,
            _ => Ok,
        }
    }

    pub fn error_byte(self) -> u8 {
        use self::FdcStatus::*;
        match self {
            Ok => 1,
            HeaderNotFound => 2,
            SyncNotFound => 3,
            NoBlock => 4,
            DataChecksum => 5,
            Verify => 7,
            WriteProtect => 8,
            HeaderChecksum => 9,
            BlockLength => 10,
            IdMismatch => 11,
            DriveNotReady => 15,
            Decode => 16,
        }
    }

    /// The CBM DOS error number a drive reports for this status.
    pub fn dos_code(self) -> u8 {
        use self::FdcStatus::*;
        match self {
            Ok => 0,
            HeaderNotFound => 20,
            SyncNotFound => 21,
            NoBlock => 22,
            DataChecksum => 23,
            Decode => 24,
            Verify => 25,
            WriteProtect => 26,
            HeaderChecksum => 27,
            BlockLength => 28,
            IdMismatch => 29,
            DriveNotReady => 74,
        }
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == FdcStatus::Ok
    }
}

impl fmt::Display for FdcStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::FdcStatus::*;
        let message = match self {
            Ok => "ok",
            HeaderNotFound => "header block not found",
            SyncNotFound => "sync mark not found",
            NoBlock => "data block not present",
            DataChecksum => "data block checksum error",
            Verify => "write verify error",
            WriteProtect => "write protected",
            HeaderChecksum => "header block checksum error",
            BlockLength => "block too long",
            IdMismatch => "disk id mismatch",
            DriveNotReady => "drive not ready",
            Decode => "byte decoding error",
        };
        f.write_str(message)
    }
}

/// XOR of all bytes, as used by both header and data block checksums.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |checksum, b| checksum ^ b)
}

/// Encode four bytes into five GCR bytes.
pub fn encode_group(input: &[u8], output: &mut [u8]) {
    let mut accumulator: u64 = 0;
    for &byte in &input[..4] {
        accumulator = (accumulator << 5) | u64::from(TO_GCR[(byte >> 4) as usize]);
        accumulator = (accumulator << 5) | u64::from(TO_GCR[(byte & 0x0f) as usize]);
    }
    for (i, byte) in output[..5].iter_mut().enumerate() {
        *byte = (accumulator >> (32 - 8 * i)) as u8;
    }
}

/// Decode five GCR bytes into four bytes.  Invalid 5-bit codes decode as
/// zero nibbles and make the function return false.
pub fn decode_group(input: &[u8], output: &mut [u8]) -> bool {
    let accumulator = input[..5]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    let mut valid = true;
    for (i, byte) in output[..4].iter_mut().enumerate() {
        let high = FROM_GCR[((accumulator >> (35 - 10 * i)) & 0x1f) as usize];
        let low = FROM_GCR[((accumulator >> (30 - 10 * i)) & 0x1f) as usize];
        if high == BAD || low == BAD {
            valid = false;
        }
        *byte = ((high & 0x0f) << 4) | (low & 0x0f);
    }
    valid
}

fn push_groups(output: &mut Vec<u8>, input: &[u8]) {
    let mut encoded = [0u8; 5];
    for group in input.chunks(4) {
        encode_group(group, &mut encoded);
        output.extend_from_slice(&encoded);
    }
}

/// The number of raw bytes `encode_sector` produces.
pub fn sector_length(gap: usize, sync: usize) -> usize {
    2 * sync + GCR_HEADER_LENGTH + HEADER_GAP_LENGTH + GCR_BLOCK_LENGTH + gap
}

/// Encode a complete sector (sync, header, gap, sync, data block, gap).  The
/// `error` status, if it names a fault with an on-media representation,
/// corrupts the corresponding part of the sector so that a reader
/// encounters the same fault.
pub fn encode_sector(
    data: &[u8],
    header: &SectorHeader,
    gap: usize,
    sync: usize,
    error: FdcStatus,
) -> Vec<u8> {
    let mut output = Vec::with_capacity(sector_length(gap, sync));
    output.resize(sync, 0xff);

    let mark = if error == FdcStatus::HeaderNotFound {
        0xff
    } else {
        HEADER_MARK
    };
    let mut id = header.id;
    if error == FdcStatus::IdMismatch {
        id[0] ^= 0xff;
    }
    let mut checksum = SectorHeader { id, ..*header }.checksum();
    if error == FdcStatus::HeaderChecksum {
        checksum ^= 0xff;
    }
    push_groups(
        &mut output,
        &[mark, checksum, header.sector, header.track, id[1], id[0], 0x0f, 0x0f],
    );
    output.resize(output.len() + HEADER_GAP_LENGTH, GAP_BYTE);

    let sync_byte = if error == FdcStatus::SyncNotFound {
        GAP_BYTE
    } else {
        0xff
    };
    output.resize(output.len() + sync, sync_byte);

    let mut block = [0u8; BLOCK_LENGTH];
    block[0] = if error == FdcStatus::NoBlock {
        0xff
    } else {
        DATA_MARK
    };
    block[1..=SECTOR_SIZE].copy_from_slice(&data[..SECTOR_SIZE]);
    block[SECTOR_SIZE + 1] = xor_checksum(&data[..SECTOR_SIZE]);
    if error == FdcStatus::DataChecksum {
        block[SECTOR_SIZE + 1] ^= 0xff;
    }
    push_groups(&mut output, &block);
    output.resize(output.len() + gap, GAP_BYTE);
    output
}

/// Lay out a whole track: each sector encoded in turn, the remainder filled
/// with gap bytes up to `size`.
pub fn encode_track<'a, I>(track: u8, size: usize, gap: usize, sectors: I) -> RawTrack
where
    I: IntoIterator<Item = (SectorHeader, &'a [u8], FdcStatus)>,
{
    let mut data = Vec::with_capacity(size);
    for (header, bytes, error) in sectors {
        data.extend(encode_sector(bytes, &header, gap, SYNC_LENGTH, error));
    }
    data.resize(size, GAP_BYTE);
    RawTrack::new(track, data)
}

/// Find the next sync mark at or after `position`, scanning at most
/// `max_bits` bits and wrapping at the end of the track.  Returns the bit
/// position of the first bit following the sync.
pub fn find_sync(track: &RawTrack, position: usize, max_bits: usize) -> Option<usize> {
    let mut cursor = BitCursor::new(track, position);
    cursor.seek_sync(max_bits).map(|_| cursor.position())
}

/// Decode `groups` GCR groups starting at an arbitrary bit position.
/// Returns false if any invalid GCR code was encountered.
pub fn decode_block(track: &RawTrack, position: usize, output: &mut [u8], groups: usize) -> bool {
    let mut cursor = BitCursor::new(track, position);
    let mut encoded = [0u8; 5];
    let mut valid = true;
    for group in output[..groups * 4].chunks_mut(4) {
        for byte in encoded.iter_mut() {
            *byte = cursor.next_byte();
        }
        valid &= decode_group(&encoded, group);
    }
    valid
}

/// Locate the data block belonging to `sector`, returning the bit position
/// of its first bit.
fn locate_data_block(
    track: &RawTrack,
    sector: u8,
    id: Option<[u8; 2]>,
) -> Result<usize, FdcStatus> {
    let bits = track.bits();
    if bits == 0 {
        return Err(FdcStatus::SyncNotFound);
    }
    // One revolution, plus enough to recognize a sync that straddles the
    // starting point.
    let limit = bits + SYNC_LENGTH * 8;
    let mut cursor = BitCursor::new(track, 0);
    let mut scanned = 0;
    let mut seen_sync = false;
    while scanned < limit {
        match cursor.seek_sync(limit - scanned) {
            Some(consumed) => scanned += consumed.max(1),
            None => break,
        }
        seen_sync = true;

        let start = cursor.position();
        let mut header = [0u8; HEADER_GROUPS * 4];
        decode_block(track, start, &mut header, HEADER_GROUPS);
        if header[0] != HEADER_MARK || header[2] != sector {
            continue;
        }
        if xor_checksum(&header[1..6]) != 0 {
            return Err(FdcStatus::HeaderChecksum);
        }
        if let Some(id) = id {
            if header[5] != id[0] || header[4] != id[1] {
                return Err(FdcStatus::IdMismatch);
            }
        }

        let mut data_cursor = BitCursor::new(track, start + GCR_HEADER_LENGTH * 8);
        return match data_cursor.seek_sync(DATA_SYNC_WINDOW) {
            Some(_) => Ok(data_cursor.position()),
            None => Err(FdcStatus::SyncNotFound),
        };
    }
    Err(if seen_sync {
        FdcStatus::HeaderNotFound
    } else {
        FdcStatus::SyncNotFound
    })
}

/// Read a sector from a raw track into `buffer`.  On `DataChecksum` (and
/// `Decode`) the data that was read is still delivered.
pub fn read_sector(track: &RawTrack, sector: u8, buffer: &mut [u8]) -> FdcStatus {
    read_sector_with_id(track, sector, None, buffer)
}

/// Like `read_sector`, but also require the header to carry the given disk
/// ID, as the drive does after it has read the ID from track 18.
pub fn read_sector_with_id(
    track: &RawTrack,
    sector: u8,
    id: Option<[u8; 2]>,
    buffer: &mut [u8],
) -> FdcStatus {
    let position = match locate_data_block(track, sector, id) {
        Ok(position) => position,
        Err(status) => return status,
    };
    let mut block = [0u8; BLOCK_LENGTH];
    let valid = decode_block(track, position, &mut block, BLOCK_GROUPS);
    if block[0] != DATA_MARK {
        return FdcStatus::NoBlock;
    }
    buffer[..SECTOR_SIZE].copy_from_slice(&block[1..=SECTOR_SIZE]);
    if !valid {
        return FdcStatus::Decode;
    }
    if xor_checksum(&block[1..=SECTOR_SIZE]) != block[SECTOR_SIZE + 1] {
        return FdcStatus::DataChecksum;
    }
    FdcStatus::Ok
}

/// Replace the data block of `sector` on a raw track.  The new block is
/// written at the exact bit position of the old one; nothing is modified
/// unless the sector was found.
pub fn write_sector(track: &mut RawTrack, sector: u8, data: &[u8]) -> FdcStatus {
    let position = match locate_data_block(track, sector, None) {
        Ok(position) => position,
        Err(status) => return status,
    };
    let mut block = Vec::with_capacity(BLOCK_LENGTH);
    block.push(DATA_MARK);
    block.extend_from_slice(&data[..SECTOR_SIZE]);
    block.push(xor_checksum(&data[..SECTOR_SIZE]));
    block.extend_from_slice(&[0, 0]);
    let mut encoded = Vec::with_capacity(GCR_BLOCK_LENGTH);
    push_groups(&mut encoded, &block);

    let mut writer = BitWriter::new(track, position);
    for byte in encoded {
        writer.put_byte(byte);
    }
    FdcStatus::Ok
}
