use std::error;
use std::fmt;

use crate::gcr::FdcStatus;

/// The version string a drive reports after power-up or reset.
pub const DOS_VERSION: &str = "VIRTUAL DRIVE EMULATION V3.5";

/// CBM DOS status codes, as reported on the command channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DosCode {
    Ok = 0,
    FilesScratched = 1,
    Unimplemented = 3,
    HeaderNotFound = 20,
    NoSync = 21,
    DataBlockMissing = 22,
    DataChecksum = 23,
    ByteDecoding = 24,
    WriteVerify = 25,
    WriteProtect = 26,
    HeaderChecksum = 27,
    LongDataBlock = 28,
    IdMismatch = 29,
    SyntaxError = 30,
    InvalidCommand = 31,
    LongLine = 32,
    InvalidFilename = 33,
    NoFilename = 34,
    CommandNotFound = 39,
    RecordNotPresent = 50,
    OverflowInRecord = 51,
    FileTooLarge = 52,
    WriteFileOpen = 60,
    FileNotOpen = 61,
    FileNotFound = 62,
    FileExists = 63,
    FileTypeMismatch = 64,
    NoBlock = 65,
    IllegalTrackOrSector = 66,
    IllegalSystemTrackOrSector = 67,
    NoChannel = 70,
    DirectoryError = 71,
    DiskFull = 72,
    DosVersion = 73,
    DriveNotReady = 74,
    FormatError = 75,
    DirectoryNotEmpty = 80,
    PermissionDenied = 81,
}

impl DosCode {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// The message text a drive prints for this code.
    pub fn message(self) -> &'static str {
        use self::DosCode::*;
        match self {
            Ok => " OK",
            FilesScratched => "FILES SCRATCHED",
            Unimplemented => "UNIMPLEMENTED",
            HeaderNotFound | NoSync | DataBlockMissing | DataChecksum | ByteDecoding
            | HeaderChecksum => "READ ERROR",
            WriteVerify | LongDataBlock => "WRITE ERROR",
            WriteProtect => "WRITE PROTECT ON",
            IdMismatch => "DISK ID MISMATCH",
            SyntaxError | InvalidCommand | LongLine | InvalidFilename | NoFilename => {
                "SYNTAX ERROR"
            }
            CommandNotFound => "FILE NOT FOUND",
            RecordNotPresent => "RECORD NOT PRESENT",
            OverflowInRecord => "OVERFLOW IN RECORD",
            FileTooLarge => "FILE TOO LARGE",
            WriteFileOpen => "WRITE FILE OPEN",
            FileNotOpen => "FILE NOT OPEN",
            FileNotFound => "FILE NOT FOUND",
            FileExists => "FILE EXISTS",
            FileTypeMismatch => "FILE TYPE MISMATCH",
            NoBlock => "NO BLOCK",
            IllegalTrackOrSector => "ILLEGAL TRACK OR SECTOR",
            IllegalSystemTrackOrSector => "ILLEGAL SYSTEM T OR S",
            NoChannel => "NO CHANNEL",
            DirectoryError => "DIRECTORY ERROR",
            DiskFull => "DISK FULL",
            DosVersion => DOS_VERSION,
            DriveNotReady => "DRIVE NOT READY",
            FormatError => "FORMAT ERROR",
            DirectoryNotEmpty => "DIRECTORY NOT EMPTY",
            PermissionDenied => "PERMISSION DENIED",
        }
    }

    /// The DOS code a drive reports for a disk controller outcome.
    pub fn from_fdc(status: FdcStatus) -> DosCode {
        match status {
            FdcStatus::Ok => DosCode::Ok,
            FdcStatus::HeaderNotFound => DosCode::HeaderNotFound,
            FdcStatus::SyncNotFound => DosCode::NoSync,
            FdcStatus::NoBlock => DosCode::DataBlockMissing,
            FdcStatus::DataChecksum => DosCode::DataChecksum,
            FdcStatus::Decode => DosCode::ByteDecoding,
            FdcStatus::Verify => DosCode::WriteVerify,
            FdcStatus::WriteProtect => DosCode::WriteProtect,
            FdcStatus::HeaderChecksum => DosCode::HeaderChecksum,
            FdcStatus::BlockLength => DosCode::LongDataBlock,
            FdcStatus::IdMismatch => DosCode::IdMismatch,
            FdcStatus::DriveNotReady => DosCode::DriveNotReady,
        }
    }
}

impl fmt::Display for DosCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02},{}", self.code(), self.message())
    }
}

impl error::Error for DosCode {}

/// The status a drive presents on its command channel: a code plus the
/// track and sector it refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DosStatus {
    pub code: DosCode,
    pub track: u8,
    pub sector: u8,
}

impl DosStatus {
    pub fn new(code: DosCode, track: u8, sector: u8) -> DosStatus {
        DosStatus {
            code,
            track,
            sector,
        }
    }

    /// The status line as the drive sends it, e.g. `00, OK,00,00\r`.
    pub fn line(&self) -> String {
        format!(
            "{:02},{},{:02},{:02}\r",
            self.code.code(),
            self.code.message(),
            self.track,
            self.sector
        )
    }
}

impl Default for DosStatus {
    fn default() -> DosStatus {
        DosStatus::new(DosCode::Ok, 0, 0)
    }
}
