//! The virtual drive: CBM DOS file system semantics on top of a disk image.
//!
//! A `VirtualDrive` owns the attached `DiskImage` together with a cache of
//! its Block Availability Map, and exposes the drive's sixteen channels.
//! Channels 0-14 carry file data; channel 15 takes DOS commands and reports
//! the drive status.  Data blocks are written as soon as they fill, but the
//! directory entry and the BAM are only written when a file is closed, when
//! a DOS command completes, or when the image is detached.

pub mod bam;
mod channel;
mod command;
pub mod dir;
pub mod dos;
pub mod name;
pub mod status;

use std::collections::HashSet;
use std::io;

use log::{debug, info, warn};

use crate::disk::{DiskError, DiskImage, BLOCK_SIZE};
use crate::petscii::Petscii;

pub use self::bam::Bam;
pub use self::channel::{ChannelMode, ReadByte, CHANNEL_COUNT};
pub use self::dir::{DirEntry, FileType, Pattern};
pub use self::dos::DosFormat;
pub use self::name::{AccessMode, SA_COMMAND, SA_LOAD, SA_SAVE};
pub use self::status::{DosCode, DosStatus, DOS_VERSION};

use self::channel::Channel;

/// Map a container failure onto the status a drive would report.
pub(crate) fn dos_code_for_io(error: &io::Error) -> DosCode {
    match DiskError::from_io_error(error) {
        Some(DiskError::ReadOnly) => DosCode::WriteProtect,
        Some(DiskError::BadTrack) | Some(DiskError::BadSector) | Some(DiskError::InvalidOffset) => {
            DosCode::IllegalTrackOrSector
        }
        Some(DiskError::Controller(status)) => DosCode::from_fdc(status),
        _ => DosCode::DriveNotReady,
    }
}

pub struct VirtualDrive {
    unit: u8,
    drive: u8,
    image: Option<DiskImage>,
    bam: Option<Bam>,
    bam_dirty: bool,
    channels: Vec<Option<Channel>>,
    status: DosStatus,
    status_line: Option<(Vec<u8>, usize)>,
    command: Vec<u8>,
}

impl VirtualDrive {
    pub fn new(unit: u8, drive: u8) -> VirtualDrive {
        VirtualDrive {
            unit,
            drive,
            image: None,
            bam: None,
            bam_dirty: false,
            channels: vec![None; CHANNEL_COUNT],
            status: DosStatus::new(DosCode::DosVersion, 0, 0),
            status_line: None,
            command: vec![],
        }
    }

    #[inline]
    pub fn unit(&self) -> u8 {
        self.unit
    }

    #[inline]
    pub fn drive(&self) -> u8 {
        self.drive
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.image.is_some()
    }

    pub fn image(&self) -> Option<&DiskImage> {
        self.image.as_ref()
    }

    pub fn image_mut(&mut self) -> Option<&mut DiskImage> {
        self.image.as_mut()
    }

    pub fn format(&self) -> Option<DosFormat> {
        self.bam.as_ref().map(|bam| bam.format())
    }

    pub fn bam(&self) -> Option<&Bam> {
        self.bam.as_ref()
    }

    #[inline]
    pub fn status(&self) -> DosStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, code: DosCode, track: u8, sector: u8) {
        self.status = DosStatus::new(code, track, sector);
        self.status_line = None;
    }

    /// Latch the outcome of an operation as the drive status.
    fn report<T>(&mut self, result: Result<T, DosCode>) -> Result<T, DosCode> {
        match &result {
            Ok(_) => self.set_status(DosCode::Ok, 0, 0),
            Err(code) => self.set_status(*code, 0, 0),
        }
        result
    }

    /// Bind an image.  Any previously bound image is detached first, and all
    /// channels start out closed.
    pub fn attach(&mut self, image: DiskImage) -> io::Result<()> {
        let bam = VirtualDrive::read_bam(&image)?;
        if let Some(old) = self.detach() {
            old.close()?;
        }
        self.mount(image, bam);
        Ok(())
    }

    /// Read the BAM of an image that is about to be attached.  Nothing is
    /// bound until this succeeds.
    pub(crate) fn read_bam(image: &DiskImage) -> io::Result<Bam> {
        let format = DosFormat::for_image(image.image_type(), image.tracks());
        let mut bam = Bam::new(format, image.image_type(), image.tracks());
        bam.load(image)?;
        Ok(bam)
    }

    /// Bind an image to an empty drive.
    pub(crate) fn mount(&mut self, image: DiskImage, bam: Bam) {
        let format = bam.format();
        info!(
            "unit {} drive {}: attached {} image ({} DOS, {} blocks free)",
            self.unit,
            self.drive,
            image.image_type().name(),
            format.name(),
            bam.blocks_free()
        );
        self.image = Some(image);
        self.bam = Some(bam);
        self.bam_dirty = false;
        self.channels = vec![None; CHANNEL_COUNT];
        self.command.clear();
        self.set_status(DosCode::DosVersion, 0, 0);
    }

    /// Unbind the image and hand it back.  Open write channels are closed
    /// and the BAM is written out first; failures there are logged, and
    /// the drive ends up detached regardless.
    pub fn detach(&mut self) -> Option<DiskImage> {
        self.image.as_ref()?;
        for channel in 0..CHANNEL_COUNT as u8 {
            if let Err(code) = self.close_channel(channel) {
                warn!("unit {}: closing channel {} on detach: {}", self.unit, channel, code);
            }
        }
        if let Err(code) = self.store_bam() {
            warn!("unit {}: writing BAM on detach: {}", self.unit, code);
        }
        self.bam = None;
        self.bam_dirty = false;
        self.channels = vec![None; CHANNEL_COUNT];
        self.command.clear();
        let mut image = self.image.take()?;
        if let Err(e) = image.flush() {
            warn!("unit {}: flushing image on detach: {}", self.unit, e);
        }
        info!("unit {} drive {}: detached image", self.unit, self.drive);
        Some(image)
    }

    fn mounted(&mut self) -> Result<(&mut DiskImage, &mut Bam), DosCode> {
        match (self.image.as_mut(), self.bam.as_mut()) {
            (Some(image), Some(bam)) => Ok((image, bam)),
            _ => Err(DosCode::DriveNotReady),
        }
    }

    fn mounted_ref(&self) -> Result<(&DiskImage, &Bam), DosCode> {
        match (self.image.as_ref(), self.bam.as_ref()) {
            (Some(image), Some(bam)) => Ok((image, bam)),
            _ => Err(DosCode::DriveNotReady),
        }
    }

    fn writable(&self) -> Result<(), DosCode> {
        match &self.image {
            Some(image) if image.read_only() => Err(DosCode::WriteProtect),
            Some(_) => Ok(()),
            None => Err(DosCode::DriveNotReady),
        }
    }

    /// Write the cached BAM back to the image if it has changed.
    fn store_bam(&mut self) -> Result<(), DosCode> {
        if !self.bam_dirty {
            return Ok(());
        }
        let (image, bam) = self.mounted()?;
        bam.store(image).map_err(|e| dos_code_for_io(&e))?;
        self.bam_dirty = false;
        Ok(())
    }

    fn read_block(&self, track: u8, sector: u8) -> Result<Vec<u8>, DosCode> {
        let image = self.image.as_ref().ok_or(DosCode::DriveNotReady)?;
        let mut block = vec![0u8; BLOCK_SIZE];
        let status = image
            .read_sector(track, sector, &mut block)
            .map_err(|e| dos_code_for_io(&e))?;
        if status.is_ok() {
            Ok(block)
        } else {
            Err(DosCode::from_fdc(status))
        }
    }

    fn write_block(&mut self, track: u8, sector: u8, block: &[u8]) -> Result<(), DosCode> {
        let image = self.image.as_mut().ok_or(DosCode::DriveNotReady)?;
        image
            .write_sector(track, sector, block)
            .map_err(|e| dos_code_for_io(&e))
    }

    /// Read a block directly, as `U1` does.  Failures are latched as the
    /// drive status along with the location.
    pub fn read_sector(&mut self, track: u8, sector: u8, buffer: &mut [u8]) -> Result<(), DosCode> {
        match self.read_block(track, sector) {
            Ok(block) => {
                buffer[..BLOCK_SIZE].copy_from_slice(&block);
                Ok(())
            }
            Err(code) => {
                self.set_status(code, track, sector);
                Err(code)
            }
        }
    }

    /// Write a block directly, as `U2` does.
    pub fn write_sector(&mut self, track: u8, sector: u8, buffer: &[u8]) -> Result<(), DosCode> {
        match self.write_block(track, sector, buffer) {
            Ok(()) => Ok(()),
            Err(code) => {
                self.set_status(code, track, sector);
                Err(code)
            }
        }
    }

    /// Follow a file's block chain, returning the blocks in order.
    fn chain(&self, first: (u8, u8)) -> Result<Vec<(u8, u8)>, DosCode> {
        let image = self.image.as_ref().ok_or(DosCode::DriveNotReady)?;
        let mut visited = HashSet::new();
        let mut blocks = vec![];
        let mut next = Some(first);
        while let Some((track, sector)) = next {
            if image.check_sector(track, sector).is_err() {
                return Err(DosCode::IllegalTrackOrSector);
            }
            if !visited.insert((track, sector)) {
                return Err(DosCode::DirectoryError);
            }
            let block = self.read_block(track, sector)?;
            blocks.push((track, sector));
            next = if block[0] == 0 { None } else { Some((block[0], block[1])) };
        }
        Ok(blocks)
    }

    /// The directory entries of the attached disk.
    pub fn entries(&self) -> Result<Vec<DirEntry>, DosCode> {
        let (image, bam) = self.mounted_ref()?;
        dir::entries(image, bam)
    }

    /// Look up a file by name or pattern.
    pub fn find(&self, pattern: &Pattern) -> Result<Option<DirEntry>, DosCode> {
        let (image, bam) = self.mounted_ref()?;
        dir::find(image, bam, pattern)
    }

    pub fn blocks_free(&self) -> Option<u32> {
        self.bam.as_ref().map(|bam| bam.blocks_free())
    }

    pub fn disk_name(&self) -> Option<Petscii> {
        self.bam.as_ref().map(|bam| Petscii::from_bytes(bam.disk_name()))
    }

    pub fn disk_id(&self) -> Option<[u8; 2]> {
        self.bam.as_ref().map(|bam| bam.disk_id())
    }

    /// Change the ID held in the BAM cache.  It reaches the image with the
    /// next BAM write.
    pub fn set_disk_id(&mut self, id: [u8; 2]) -> Result<(), DosCode> {
        let bam = self.bam.as_mut().ok_or(DosCode::DriveNotReady)?;
        bam.set_disk_id(id);
        self.bam_dirty = true;
        Ok(())
    }

    /// Rename the disk (and optionally change its ID) in place.
    pub fn set_disk_label(&mut self, name: &[u8], id: Option<[u8; 2]>) -> Result<(), DosCode> {
        self.writable()?;
        let bam = self.bam.as_mut().ok_or(DosCode::DriveNotReady)?;
        bam.set_disk_name(name);
        if let Some(id) = id {
            bam.set_disk_id(id);
        }
        self.bam_dirty = true;
        self.store_bam()
    }

    /// Open a channel.  Channel 15 executes the name as a DOS command.
    pub fn open(&mut self, filename: &[u8], secondary: u8) -> Result<(), DosCode> {
        let channel = secondary & 0x0f;
        if channel == SA_COMMAND {
            if filename.is_empty() {
                return Ok(());
            }
            let status = self.execute_command(filename);
            return match status.code.code() {
                0..=19 => Ok(()),
                _ => Err(status.code),
            };
        }
        let result = self.open_channel(filename, channel);
        if let Err(code) = result {
            debug!(
                "unit {}: open {:?} on channel {}: {}",
                self.unit,
                Petscii::from_bytes(filename),
                channel,
                code
            );
        }
        self.report(result)
    }

    fn open_channel(&mut self, filename: &[u8], channel: u8) -> Result<(), DosCode> {
        self.mounted_ref()?;
        if self.channels[channel as usize].is_some() {
            return Err(DosCode::NoChannel);
        }
        let opened = match filename.first() {
            Some(b'$') => {
                let (_, mut pattern) = name::split_drive(&filename[1..])?;
                if pattern.iter().all(u8::is_ascii_digit) {
                    pattern = &[];
                }
                let (image, bam) = self.mounted_ref()?;
                Channel::directory(dir::listing(image, bam, &Pattern::parse(pattern))?)
            }
            Some(b'#') => Channel::buffer(),
            _ => {
                let parsed = name::parse(filename, channel)?;
                match parsed.mode {
                    AccessMode::Read | AccessMode::Modify => self.open_read(&parsed)?,
                    AccessMode::Write => self.open_write(parsed)?,
                    AccessMode::Append => self.open_append(&parsed)?,
                }
            }
        };
        debug!(
            "unit {}: opened {:?} on channel {} ({:?})",
            self.unit,
            Petscii::from_bytes(filename),
            channel,
            opened.mode
        );
        self.channels[channel as usize] = Some(opened);
        Ok(())
    }

    fn lookup(&self, parsed: &name::ParsedName) -> Result<DirEntry, DosCode> {
        let pattern = Pattern {
            name: parsed.name.clone(),
            file_type: parsed.type_filter,
        };
        let entry = self.find(&pattern)?.ok_or(DosCode::FileNotFound)?;
        match parsed.file_type {
            Some(file_type) if file_type != entry.file_type => Err(DosCode::FileTypeMismatch),
            _ => Ok(entry),
        }
    }

    fn open_read(&mut self, parsed: &name::ParsedName) -> Result<Channel, DosCode> {
        let entry = self.lookup(parsed)?;
        if !entry.closed && parsed.mode != AccessMode::Modify {
            return Err(DosCode::WriteFileOpen);
        }
        let mut channel = Channel::reader(entry.first);
        let block = self.read_block(entry.first.0, entry.first.1)?;
        channel.load_block(entry.first.0, entry.first.1, &block);
        channel.name = entry.name.as_bytes().to_vec();
        channel.file_type = entry.file_type;
        Ok(channel)
    }

    fn open_write(&mut self, parsed: name::ParsedName) -> Result<Channel, DosCode> {
        self.writable()?;
        let existing = self.find(&Pattern {
            name: parsed.name.clone(),
            file_type: None,
        })?;
        let slot = match existing {
            Some(entry) if parsed.replace => Some(entry.slot),
            Some(_) => return Err(DosCode::FileExists),
            None => {
                let (image, bam) = self.mounted_ref()?;
                dir::free_slot(image, bam)?;
                None
            }
        };
        let (_, bam) = self.mounted()?;
        let first = bam.alloc_first_free().ok_or(DosCode::DiskFull)?;
        self.bam_dirty = true;
        let file_type = parsed.file_type.unwrap_or(FileType::Seq);
        let mut channel = Channel::writer(parsed.name, file_type, first, parsed.replace);
        channel.slot = slot;
        Ok(channel)
    }

    fn open_append(&mut self, parsed: &name::ParsedName) -> Result<Channel, DosCode> {
        self.writable()?;
        let entry = self.lookup(parsed)?;
        if !entry.closed {
            return Err(DosCode::WriteFileOpen);
        }
        let chain = self.chain(entry.first)?;
        let &(track, sector) = chain.last().ok_or(DosCode::DirectoryError)?;
        let block = self.read_block(track, sector)?;
        let mut channel = Channel::writer(entry.name.as_bytes().to_vec(), entry.file_type, entry.first, false);
        channel.mode = ChannelMode::Append;
        channel.buffer.copy_from_slice(&block);
        channel.track = track;
        channel.sector = sector;
        channel.position = (block[1] as usize + 1).max(2);
        channel.blocks = chain.len() as u16;
        channel.slot = Some(entry.slot);
        Ok(channel)
    }

    /// Read one byte from a channel.
    pub fn read_byte(&mut self, channel: u8) -> Result<ReadByte, DosCode> {
        let channel = channel & 0x0f;
        if channel == SA_COMMAND {
            return Ok(self.read_status_byte());
        }
        let result = self.read_channel_byte(channel);
        if let Err(code) = result {
            let (track, sector) = self.channels[channel as usize]
                .as_ref()
                .map_or((0, 0), |c| (c.track, c.sector));
            self.set_status(code, track, sector);
        }
        result
    }

    fn read_channel_byte(&mut self, index: u8) -> Result<ReadByte, DosCode> {
        loop {
            let channel = self.channels[index as usize]
                .as_mut()
                .ok_or(DosCode::FileNotOpen)?;
            match channel.mode {
                ChannelMode::Buffer => return Ok(channel.get_buffer_byte()),
                ChannelMode::Write | ChannelMode::Append => return Err(DosCode::FileNotOpen),
                ChannelMode::Read | ChannelMode::Directory => {}
            }
            if let Some(byte) = channel.take_byte() {
                return Ok(if channel.at_end() {
                    ReadByte::Last(byte)
                } else {
                    ReadByte::Data(byte)
                });
            }
            let (track, sector) = match channel.next_link() {
                Some(next) if channel.mode == ChannelMode::Read => next,
                _ => return Ok(ReadByte::Eof),
            };
            let block = self.read_block(track, sector)?;
            if let Some(channel) = self.channels[index as usize].as_mut() {
                channel.load_block(track, sector, &block);
            }
        }
    }

    fn read_status_byte(&mut self) -> ReadByte {
        if self.status_line.is_none() {
            let line = self.status.line().into_bytes();
            self.status = DosStatus::default();
            self.status_line = Some((line, 0));
        }
        let (byte, last) = match &mut self.status_line {
            Some((line, position)) => {
                let byte = line[*position];
                *position += 1;
                (byte, *position >= line.len())
            }
            None => return ReadByte::Eof,
        };
        if last {
            self.status_line = None;
            ReadByte::Last(byte)
        } else {
            ReadByte::Data(byte)
        }
    }

    /// Write one byte to a channel.  On channel 15 a carriage return ends
    /// the command and executes it.
    pub fn write_byte(&mut self, channel: u8, byte: u8) -> Result<(), DosCode> {
        let channel = channel & 0x0f;
        if channel == SA_COMMAND {
            if byte == b'\r' {
                let command = std::mem::take(&mut self.command);
                let status = self.execute_command(&command);
                return match status.code.code() {
                    0..=19 => Ok(()),
                    _ => Err(status.code),
                };
            }
            self.command.push(byte);
            return Ok(());
        }
        let result = self.write_channel_byte(channel, byte);
        if let Err(code) = result {
            self.set_status(code, 0, 0);
        }
        result
    }

    fn write_channel_byte(&mut self, index: u8, byte: u8) -> Result<(), DosCode> {
        let mode = self.channels[index as usize]
            .as_ref()
            .map(|c| c.mode)
            .ok_or(DosCode::FileNotOpen)?;
        match mode {
            ChannelMode::Buffer => {
                if let Some(channel) = self.channels[index as usize].as_mut() {
                    channel.put_buffer_byte(byte);
                }
                return Ok(());
            }
            ChannelMode::Read | ChannelMode::Directory => return Err(DosCode::FileNotOpen),
            ChannelMode::Write | ChannelMode::Append => {}
        }
        self.writable()?;

        let (track, sector, full) = match &self.channels[index as usize] {
            Some(c) => (c.track, c.sector, c.position >= BLOCK_SIZE),
            None => return Err(DosCode::FileNotOpen),
        };
        if full {
            let (_, bam) = self.mounted()?;
            let next = bam.alloc_next_free(track, sector).ok_or(DosCode::DiskFull)?;
            self.bam_dirty = true;
            let mut block = match self.channels[index as usize].as_mut() {
                Some(channel) => {
                    channel.buffer[0] = next.0;
                    channel.buffer[1] = next.1;
                    channel.buffer.clone()
                }
                None => return Err(DosCode::FileNotOpen),
            };
            self.write_block(track, sector, &block)?;
            for b in block.iter_mut() {
                *b = 0;
            }
            if let Some(channel) = self.channels[index as usize].as_mut() {
                channel.buffer = block;
                channel.track = next.0;
                channel.sector = next.1;
                channel.position = 2;
                channel.blocks += 1;
            }
        }
        if let Some(channel) = self.channels[index as usize].as_mut() {
            channel.buffer[channel.position] = byte;
            channel.position += 1;
        }
        Ok(())
    }

    /// Close a channel.  Closing a write channel writes its last block, the
    /// directory entry and the BAM.  Closing channel 15 runs any command
    /// still pending and then closes every channel.
    pub fn close(&mut self, channel: u8) -> Result<(), DosCode> {
        let channel = channel & 0x0f;
        if channel == SA_COMMAND {
            if !self.command.is_empty() {
                let command = std::mem::take(&mut self.command);
                self.execute_command(&command);
            }
            let mut result = Ok(());
            for index in 0..SA_COMMAND {
                if let Err(code) = self.close_channel(index) {
                    result = Err(code);
                }
            }
            return result;
        }
        let was_writing = self.channels[channel as usize]
            .as_ref()
            .map_or(false, |c| c.is_writing());
        let result = self.close_channel(channel);
        if was_writing || result.is_err() {
            self.report(result)
        } else {
            result
        }
    }

    fn close_channel(&mut self, index: u8) -> Result<(), DosCode> {
        let channel = match self.channels.get_mut(index as usize).and_then(|c| c.take()) {
            Some(channel) => channel,
            None => return Ok(()),
        };
        if !channel.is_writing() {
            return Ok(());
        }
        let result = self.commit(channel);
        let store = self.store_bam();
        result.and(store)
    }

    /// Write the last block of a file and its directory entry.
    fn commit(&mut self, mut channel: Channel) -> Result<(), DosCode> {
        channel.buffer[0] = 0;
        channel.buffer[1] = (channel.position - 1) as u8;
        self.write_block(channel.track, channel.sector, &channel.buffer)?;

        let name = Petscii::from_bytes(&channel.name);
        let (mut entry, claim) = match (channel.mode, channel.slot) {
            (ChannelMode::Append, Some(slot)) | (ChannelMode::Write, Some(slot)) => {
                let block = self.read_block(slot.track, slot.sector)?;
                let old = DirEntry::parse(&block, slot).ok_or(DosCode::DirectoryError)?;
                if channel.mode == ChannelMode::Write {
                    self.free_chain(old.first);
                }
                let mut entry = old;
                entry.file_type = channel.file_type;
                (entry, false)
            }
            _ => (
                DirEntry::new(
                    dir::Slot {
                        track: 0,
                        sector: 0,
                        index: 0,
                    },
                    name,
                    channel.file_type,
                ),
                true,
            ),
        };
        entry.first = channel.first;
        entry.blocks = channel.blocks;
        entry.closed = true;

        let (image, bam) = self.mounted()?;
        dir::store_entry(image, bam, &mut entry, claim)?;
        self.bam_dirty = true;
        debug!(
            "unit {}: closed {:?} ({} blocks)",
            self.unit, entry.name, entry.blocks
        );
        Ok(())
    }

    /// Release the blocks of a chain in the BAM cache, as far as the chain
    /// can be followed.
    fn free_chain(&mut self, first: (u8, u8)) {
        let mut visited = HashSet::new();
        let mut next = Some(first);
        while let Some((track, sector)) = next {
            if !visited.insert((track, sector)) {
                break;
            }
            let block = match self.read_block(track, sector) {
                Ok(block) => block,
                Err(_) => break,
            };
            if let Some(bam) = self.bam.as_mut() {
                bam.free(track, sector);
            }
            next = if block[0] == 0 { None } else { Some((block[0], block[1])) };
        }
        self.bam_dirty = true;
    }

    /// Is any data channel open?
    pub fn has_open_channels(&self) -> bool {
        self.channels.iter().any(|c| c.is_some())
    }

    /// Read a whole file into memory.
    pub fn read_file(&mut self, name: &[u8]) -> Result<Vec<u8>, DosCode> {
        const CHANNEL: u8 = 2;
        self.open(name, CHANNEL)?;
        let mut data = vec![];
        loop {
            match self.read_byte(CHANNEL) {
                Ok(ReadByte::Data(byte)) => data.push(byte),
                Ok(ReadByte::Last(byte)) => {
                    data.push(byte);
                    break;
                }
                Ok(ReadByte::Eof) => break,
                Err(code) => {
                    self.close(CHANNEL).ok();
                    return Err(code);
                }
            }
        }
        self.close(CHANNEL)?;
        Ok(data)
    }

    /// Write a whole file.  `name` may carry options such as `,P,W`.
    pub fn write_file(&mut self, name: &[u8], data: &[u8]) -> Result<(), DosCode> {
        const CHANNEL: u8 = 2;
        let mut full_name = name.to_vec();
        if !name.contains(&b',') {
            full_name.extend_from_slice(b",P");
        }
        full_name.extend_from_slice(b",W");
        self.open(&full_name, CHANNEL)?;
        for &byte in data {
            if let Err(code) = self.write_byte(CHANNEL, byte) {
                self.close(CHANNEL).ok();
                return Err(code);
            }
        }
        self.close(CHANNEL)
    }
}

impl Drop for VirtualDrive {
    fn drop(&mut self) {
        if let Some(image) = self.detach() {
            if let Err(e) = image.close() {
                warn!("unit {}: closing image: {}", self.unit, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::ImageType;

    fn formatted(image_type: ImageType) -> VirtualDrive {
        let mut drive = VirtualDrive::new(8, 0);
        drive.attach(DiskImage::memory(image_type).unwrap()).unwrap();
        assert_eq!(drive.execute_command(b"N:TEST,AB").code, DosCode::Ok);
        drive
    }

    fn read_status(drive: &mut VirtualDrive) -> String {
        let mut line = vec![];
        loop {
            match drive.read_byte(15).unwrap() {
                ReadByte::Data(b) => line.push(b),
                ReadByte::Last(b) => {
                    line.push(b);
                    break;
                }
                ReadByte::Eof => break,
            }
        }
        String::from_utf8(line).unwrap()
    }

    #[test]
    fn test_power_on_status() {
        let mut drive = VirtualDrive::new(8, 0);
        assert_eq!(read_status(&mut drive), "73,VIRTUAL DRIVE EMULATION V3.5,00,00\r");
        assert_eq!(read_status(&mut drive), "00, OK,00,00\r");
    }

    #[test]
    fn test_not_ready() {
        let mut drive = VirtualDrive::new(8, 0);
        assert_eq!(drive.open(b"FILE", 2), Err(DosCode::DriveNotReady));
        assert_eq!(drive.status().code, DosCode::DriveNotReady);
        let mut block = [0u8; BLOCK_SIZE];
        assert_eq!(drive.read_sector(18, 0, &mut block), Err(DosCode::DriveNotReady));
        assert!(drive.detach().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let mut drive = formatted(ImageType::D64);
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        drive.write_file(b"DATA", &data).unwrap();
        assert_eq!(drive.read_file(b"DATA").unwrap(), data);
        // 1000 bytes need four blocks of 254.
        assert_eq!(drive.blocks_free(), Some(660));
        let entry = drive.find(&Pattern::parse(b"DA*")).unwrap().unwrap();
        assert_eq!(entry.blocks, 4);
        assert_eq!(entry.first, (17, 0));
        assert_eq!(entry.file_type, FileType::Prg);
        assert!(entry.closed);
    }

    #[test]
    fn test_byte_stream() {
        let mut drive = formatted(ImageType::D81);
        drive.open(b"LOG,S,W", 3).unwrap();
        for &b in b"ABC" {
            drive.write_byte(3, b).unwrap();
        }
        drive.close(3).unwrap();

        drive.open(b"LOG,S,A", 3).unwrap();
        drive.write_byte(3, b'D').unwrap();
        drive.close(3).unwrap();

        drive.open(b"LOG,S,R", 4).unwrap();
        assert_eq!(drive.read_byte(4), Ok(ReadByte::Data(b'A')));
        assert_eq!(drive.read_byte(4), Ok(ReadByte::Data(b'B')));
        assert_eq!(drive.read_byte(4), Ok(ReadByte::Data(b'C')));
        assert_eq!(drive.read_byte(4), Ok(ReadByte::Last(b'D')));
        assert_eq!(drive.read_byte(4), Ok(ReadByte::Eof));
        drive.close(4).unwrap();
        assert_eq!(drive.read_byte(4), Err(DosCode::FileNotOpen));
    }

    #[test]
    fn test_open_errors() {
        let mut drive = formatted(ImageType::D64);
        assert_eq!(drive.open(b"MISSING", 2), Err(DosCode::FileNotFound));
        assert_eq!(read_status(&mut drive), "62,FILE NOT FOUND,00,00\r");
        drive.write_file(b"ONE", b"1").unwrap();
        assert_eq!(drive.open(b"ONE,W", 2), Err(DosCode::FileExists));
        assert_eq!(drive.open(b"ONE,S,R", 2), Err(DosCode::FileTypeMismatch));
        drive.open(b"ONE", 2).unwrap();
        assert_eq!(drive.open(b"ONE", 2), Err(DosCode::NoChannel));
    }

    #[test]
    fn test_open_type_filter() {
        let mut drive = formatted(ImageType::D64);
        drive.write_file(b"DATA,S", b"sequential").unwrap();
        drive.write_file(b"DATA2", b"program").unwrap();

        drive.open(b"DATA=S", 2).unwrap();
        assert_eq!(drive.read_byte(2), Ok(ReadByte::Data(b's')));
        drive.close(2).unwrap();

        assert_eq!(drive.open(b"DATA=P", 2), Err(DosCode::FileNotFound));
        assert_eq!(drive.read_file(b"DATA*=P").unwrap(), b"program".to_vec());
        assert_eq!(drive.read_file(b"0:D*=S").unwrap(), b"sequential".to_vec());
    }

    #[test]
    fn test_replace() {
        let mut drive = formatted(ImageType::D64);
        drive.write_file(b"F", &[1u8; 600]).unwrap();
        drive.write_file(b"@0:F", &[2u8; 10]).unwrap();
        assert_eq!(drive.read_file(b"F").unwrap(), vec![2u8; 10]);
        assert_eq!(drive.blocks_free(), Some(663));
        assert_eq!(drive.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_unclosed_until_close() {
        let mut drive = formatted(ImageType::D64);
        drive.open(b"PENDING,P,W", 1).unwrap();
        for _ in 0..300 {
            drive.write_byte(1, 0x55).unwrap();
        }
        // Nothing reaches the directory until the channel closes.
        assert!(drive.entries().unwrap().is_empty());
        drive.close(1).unwrap();
        assert_eq!(drive.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_directory_listing() {
        let mut drive = formatted(ImageType::D64);
        drive.write_file(b"HELLO", b"hi").unwrap();
        drive.open(b"$", 0).unwrap();
        let mut listing = vec![];
        loop {
            match drive.read_byte(0).unwrap() {
                ReadByte::Data(b) => listing.push(b),
                ReadByte::Last(b) => {
                    listing.push(b);
                    break;
                }
                ReadByte::Eof => break,
            }
        }
        drive.close(0).unwrap();
        assert_eq!(&listing[..2], &[0x01, 0x04]);
        // Header line: link, line 0, reverse on, quoted name.
        assert_eq!(&listing[4..9], &[0, 0, 0x12, b'"', b'T']);
        let text = String::from_utf8_lossy(&listing);
        assert!(text.contains(&format!("\"HELLO\"{}PRG ", " ".repeat(12))));
        assert!(text.contains("BLOCKS FREE."));
        assert_eq!(&listing[listing.len() - 2..], &[0, 0]);
    }
}
