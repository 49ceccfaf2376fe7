use std::io;

use thiserror::Error;

use crate::gcr::FdcStatus;

/// Errors that can be returned from disk image operations.  These are
/// generally converted into `io::Error`.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DiskError {
    #[error("unknown error")]
    Unknown,
    #[error("write access attempted to read-only media")]
    ReadOnly,
    #[error("bad track")]
    BadTrack,
    #[error("bad sector")]
    BadSector,
    #[error("offset out of bounds")]
    InvalidOffset,
    /// The size or signature of the image matches no known format.
    #[error("incompatible image")]
    UnknownFormat,
    #[error("unsupported image format: {0}")]
    Unsupported(&'static str),
    #[error("invalid GCR image header")]
    InvalidHeader,
    #[error("disk controller: {0}")]
    Controller(FdcStatus),
    #[error("image format not supported by the drive model")]
    DriveMismatch,
    #[error("no image attached")]
    NotAttached,
}

impl From<DiskError> for io::Error {
    fn from(error: DiskError) -> io::Error {
        use self::DiskError::*;
        use std::io::ErrorKind;
        let kind = match error {
            Unknown | Controller(_) => ErrorKind::Other,
            ReadOnly => ErrorKind::PermissionDenied,
            BadTrack | BadSector | InvalidOffset => ErrorKind::InvalidInput,
            UnknownFormat | InvalidHeader => ErrorKind::InvalidData,
            Unsupported(_) | DriveMismatch => ErrorKind::Unsupported,
            NotAttached => ErrorKind::NotFound,
        };
        io::Error::new(kind, error)
    }
}

impl DiskError {
    /// If the provided `io::Error` contains a `DiskError`, return the
    /// underlying `DiskError`.  If not, return None.
    pub fn from_io_error(error: &io::Error) -> Option<DiskError> {
        error
            .get_ref()
            .and_then(|e| e.downcast_ref::<DiskError>())
            .cloned()
    }

    /// This is sometimes useful instead of .into() when the compiler doesn't
    /// have enough information to perform type inference.
    pub fn to_io_error(&self) -> io::Error {
        self.clone().into()
    }
}

impl PartialEq<io::Error> for DiskError {
    fn eq(&self, other: &io::Error) -> bool {
        DiskError::from_io_error(other).as_ref() == Some(self)
    }
}

impl PartialEq<DiskError> for io::Error {
    fn eq(&self, other: &DiskError) -> bool {
        DiskError::from_io_error(self).as_ref() == Some(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_round_trip() {
        let error: io::Error = DiskError::BadSector.into();
        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(DiskError::from_io_error(&error), Some(DiskError::BadSector));
        assert!(error == DiskError::BadSector);
        assert!(DiskError::BadTrack != error);

        let error = DiskError::Controller(FdcStatus::DataChecksum).to_io_error();
        assert_eq!(error.to_string(), "disk controller: data block checksum error");

        let plain = io::Error::new(io::ErrorKind::Other, "plain");
        assert_eq!(DiskError::from_io_error(&plain), None);
    }
}
