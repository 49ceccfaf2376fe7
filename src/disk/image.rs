use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use memmap::{Mmap, MmapMut, MmapOptions};

use crate::disk::error::DiskError;

/// Backing storage (mapped file or memory) for the bytes of a disk image.
pub enum Image {
    ReadOnlyMap(Mmap),
    ReadWriteMap(MmapMut),
    Memory(Box<[u8]>),
}

impl Image {
    pub fn from_bytes(bytes: Vec<u8>) -> Image {
        Image::Memory(bytes.into_boxed_slice())
    }

    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> io::Result<Image> {
        let file = if read_only {
            File::open(path)?
        } else {
            OpenOptions::new().read(true).write(true).open(path)?
        };
        // An empty file cannot be mapped, and is no disk image anyway.
        if file.metadata()?.len() == 0 {
            return Err(DiskError::UnknownFormat.into());
        }
        if read_only {
            let mmap = unsafe { MmapOptions::new().map(&file)? };
            Ok(Image::ReadOnlyMap(mmap))
        } else {
            let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
            Ok(Image::ReadWriteMap(mmap))
        }
    }

    /// Create (or truncate) a file holding exactly `contents`.
    pub fn create<P: AsRef<Path>>(path: P, contents: &[u8]) -> io::Result<Image> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(contents.len() as u64)?;
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        mmap.copy_from_slice(contents);
        mmap.flush()?;
        Ok(Image::ReadWriteMap(mmap))
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, Image::ReadOnlyMap(_))
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Image::ReadOnlyMap(mmap) => &mmap[..],
            Image::ReadWriteMap(mmap) => &mmap[..],
            Image::Memory(array) => &array[..],
        }
    }

    pub fn slice(&self, offset: usize, length: usize) -> io::Result<&[u8]> {
        self.bytes()
            .get(offset..offset + length)
            .ok_or_else(|| DiskError::InvalidOffset.into())
    }

    pub fn slice_mut(&mut self, offset: usize, length: usize) -> io::Result<&mut [u8]> {
        let bytes = match self {
            Image::ReadOnlyMap(_) => return Err(DiskError::ReadOnly.into()),
            Image::ReadWriteMap(mmap) => &mut mmap[..],
            Image::Memory(array) => &mut array[..],
        };
        bytes
            .get_mut(offset..offset + length)
            .ok_or_else(|| DiskError::InvalidOffset.into())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            Image::ReadOnlyMap(_) => Ok(()),
            Image::ReadWriteMap(mmap) => mmap.flush(),
            Image::Memory(_) => Ok(()),
        }
    }
}
