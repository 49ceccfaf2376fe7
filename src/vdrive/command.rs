//! DOS commands received on channel 15.

use std::collections::HashSet;

use log::{debug, info};

use crate::disk::BLOCK_SIZE;
use crate::petscii::Petscii;
use crate::vdrive::bam::Bam;
use crate::vdrive::channel::{Channel, ChannelMode};
use crate::vdrive::dir::{self, DirEntry, Pattern};
use crate::vdrive::name::split_drive;
use crate::vdrive::status::{DosCode, DosStatus};
use crate::vdrive::{dos_code_for_io, VirtualDrive};

/// Characters that separate the numeric parameters of block commands.
fn is_separator(c: u8) -> bool {
    matches!(c, b' ' | b',' | b')' | b'#' | b':' | 0x1d)
}

/// Parse the numbers following a block command, e.g. `B-R:2 0 18 1` or
/// `U1 2,0,18,1`.
fn parse_numbers(text: &[u8]) -> Result<Vec<u16>, DosCode> {
    text.split(|&c| is_separator(c))
        .filter(|field| !field.is_empty())
        .map(|field| {
            std::str::from_utf8(field)
                .ok()
                .and_then(|s| s.parse::<u16>().ok())
                .ok_or(DosCode::SyntaxError)
        })
        .collect()
}

/// Split `text` at `=` into two halves, for `R:new=old`.
fn split_assignment(text: &[u8]) -> Option<(&[u8], &[u8])> {
    let p = text.iter().position(|&c| c == b'=')?;
    Some((&text[..p], &text[p + 1..]))
}

impl VirtualDrive {
    /// Execute a DOS command and latch its outcome as the drive status.
    pub fn execute_command(&mut self, command: &[u8]) -> DosStatus {
        let command = match command.last() {
            Some(b'\r') => &command[..command.len() - 1],
            _ => command,
        };
        debug!("unit {}: command {:?}", self.unit(), Petscii::from_bytes(command));
        let result = self.dispatch(command);
        match result {
            Ok(status) => self.set_status(status.code, status.track, status.sector),
            Err(status) => self.set_status(status.code, status.track, status.sector),
        }
        self.status()
    }

    fn dispatch(&mut self, command: &[u8]) -> Result<DosStatus, DosStatus> {
        let fail = |code: DosCode| DosStatus::new(code, 0, 0);
        match command {
            [] => Ok(DosStatus::default()),
            [b'U', b'I', ..] | [b'U', b':', ..] | [b'U', b'J', ..] | [b'U', b'9', ..] => {
                Ok(DosStatus::new(DosCode::DosVersion, 0, 0))
            }
            [b'U', b'1', rest @ ..] | [b'U', b'A', rest @ ..] => self.block_read(rest, false),
            [b'U', b'2', rest @ ..] | [b'U', b'B', rest @ ..] => self.block_write(rest, false),
            [b'B', b'-', b'R', rest @ ..] => self.block_read(rest, true),
            [b'B', b'-', b'W', rest @ ..] => self.block_write(rest, true),
            [b'B', b'-', b'A', rest @ ..] => self.block_allocate(rest),
            [b'B', b'-', b'F', rest @ ..] => self.block_free(rest),
            [b'B', b'-', b'P', rest @ ..] => self.buffer_pointer(rest),
            [b'I', ..] => self.initialize().map(|_| DosStatus::default()).map_err(fail),
            [b'V', ..] => self.validate().map(|_| DosStatus::default()).map_err(fail),
            [b'N', rest @ ..] => {
                let (_, argument) = split_drive(rest).map_err(fail)?;
                let mut fields = argument.splitn(2, |&c| c == b',');
                let name = fields.next().unwrap_or(&[]);
                let id = match fields.next() {
                    Some([a, b, ..]) => Some([*a, *b]),
                    Some(_) => return Err(fail(DosCode::SyntaxError)),
                    None => None,
                };
                self.format_disk(name, id).map(|_| DosStatus::default()).map_err(fail)
            }
            [b'S', rest @ ..] => {
                let (_, patterns) = split_drive(rest).map_err(fail)?;
                let count = self.scratch(patterns).map_err(fail)?;
                Ok(DosStatus::new(DosCode::FilesScratched, count.min(255) as u8, 0))
            }
            [b'R', rest @ ..] => {
                let (_, argument) = split_drive(rest).map_err(fail)?;
                let (new, old) = split_assignment(argument).ok_or_else(|| fail(DosCode::SyntaxError))?;
                let (_, old) = split_drive(old).map_err(fail)?;
                self.rename(old, new).map(|_| DosStatus::default()).map_err(fail)
            }
            _ => Err(fail(DosCode::InvalidCommand)),
        }
    }

    /// Parse `channel drive track sector` and check the location.
    fn block_parameters(&self, text: &[u8]) -> Result<(u8, u8, u8), DosStatus> {
        let numbers = parse_numbers(text).map_err(|code| DosStatus::new(code, 0, 0))?;
        let (channel, track, sector) = match numbers[..] {
            [channel, _drive, track, sector, ..] => (channel, track, sector),
            _ => return Err(DosStatus::new(DosCode::SyntaxError, 0, 0)),
        };
        let image = self
            .image()
            .ok_or_else(|| DosStatus::new(DosCode::DriveNotReady, 0, 0))?;
        let illegal = || DosStatus::new(DosCode::IllegalTrackOrSector, track as u8, sector as u8);
        if track > 255 || sector > 255 || channel > 14 {
            return Err(illegal());
        }
        image
            .check_sector(track as u8, sector as u8)
            .map_err(|_| illegal())?;
        Ok((channel as u8, track as u8, sector as u8))
    }

    fn buffer_channel(&mut self, channel: u8) -> Result<&mut Channel, DosStatus> {
        match self.channels.get_mut(channel as usize) {
            Some(Some(c)) if c.mode == ChannelMode::Buffer => Ok(c),
            _ => Err(DosStatus::new(DosCode::NoChannel, 0, 0)),
        }
    }

    /// `U1` reads a whole block into a buffer channel.  `B-R` takes the
    /// first byte of the block as the count of bytes to deliver.
    fn block_read(&mut self, text: &[u8], counted: bool) -> Result<DosStatus, DosStatus> {
        let (channel, track, sector) = self.block_parameters(text)?;
        self.buffer_channel(channel)?;
        let block = self
            .read_block(track, sector)
            .map_err(|code| DosStatus::new(code, track, sector))?;
        let buffer = self.buffer_channel(channel)?;
        buffer.buffer.copy_from_slice(&block);
        if counted {
            buffer.position = 1;
            buffer.length = block[0] as usize + 1;
        } else {
            buffer.position = 0;
            buffer.length = BLOCK_SIZE;
        }
        buffer.track = track;
        buffer.sector = sector;
        Ok(DosStatus::default())
    }

    /// `U2` writes a buffer channel's block as is.  `B-W` first stores the
    /// buffer pointer in byte 0 as the count.
    fn block_write(&mut self, text: &[u8], counted: bool) -> Result<DosStatus, DosStatus> {
        let (channel, track, sector) = self.block_parameters(text)?;
        let buffer = self.buffer_channel(channel)?;
        if counted {
            let position = buffer.position;
            buffer.buffer[0] = position.saturating_sub(1) as u8;
        }
        let block = buffer.buffer.clone();
        self.write_block(track, sector, &block)
            .map_err(|code| DosStatus::new(code, track, sector))?;
        Ok(DosStatus::default())
    }

    fn block_allocate(&mut self, text: &[u8]) -> Result<DosStatus, DosStatus> {
        let numbers = parse_numbers(text).map_err(|code| DosStatus::new(code, 0, 0))?;
        let (track, sector) = match numbers[..] {
            [_drive, track, sector, ..] if track <= 255 && sector <= 255 => (track as u8, sector as u8),
            _ => return Err(DosStatus::new(DosCode::SyntaxError, 0, 0)),
        };
        let bam = self
            .bam
            .as_mut()
            .ok_or_else(|| DosStatus::new(DosCode::DriveNotReady, 0, 0))?;
        if track < 1 || track > bam.tracks() || sector >= bam.sectors_in_track(track) {
            return Err(DosStatus::new(DosCode::IllegalTrackOrSector, track, sector));
        }
        if bam.allocate(track, sector) {
            self.bam_dirty = true;
            self.store_bam().map_err(|code| DosStatus::new(code, 0, 0))?;
            return Ok(DosStatus::default());
        }
        // Report the next free block after the requested one.
        let next = next_free_after(bam, track, sector);
        let (t, s) = next.unwrap_or((0, 0));
        Err(DosStatus::new(DosCode::NoBlock, t, s))
    }

    fn block_free(&mut self, text: &[u8]) -> Result<DosStatus, DosStatus> {
        let numbers = parse_numbers(text).map_err(|code| DosStatus::new(code, 0, 0))?;
        let (track, sector) = match numbers[..] {
            [_drive, track, sector, ..] if track <= 255 && sector <= 255 => (track as u8, sector as u8),
            _ => return Err(DosStatus::new(DosCode::SyntaxError, 0, 0)),
        };
        let bam = self
            .bam
            .as_mut()
            .ok_or_else(|| DosStatus::new(DosCode::DriveNotReady, 0, 0))?;
        if track < 1 || track > bam.tracks() || sector >= bam.sectors_in_track(track) {
            return Err(DosStatus::new(DosCode::IllegalTrackOrSector, track, sector));
        }
        if bam.free(track, sector) {
            self.bam_dirty = true;
            self.store_bam().map_err(|code| DosStatus::new(code, 0, 0))?;
        }
        Ok(DosStatus::default())
    }

    fn buffer_pointer(&mut self, text: &[u8]) -> Result<DosStatus, DosStatus> {
        let numbers = parse_numbers(text).map_err(|code| DosStatus::new(code, 0, 0))?;
        let (channel, position) = match numbers[..] {
            [channel, position, ..] if channel <= 14 && position <= 255 => (channel as u8, position),
            _ => return Err(DosStatus::new(DosCode::SyntaxError, 0, 0)),
        };
        let buffer = self.buffer_channel(channel)?;
        buffer.position = position as usize;
        Ok(DosStatus::default())
    }

    /// Re-read the BAM from the image, discarding the cache.
    pub fn initialize(&mut self) -> Result<(), DosCode> {
        let (image, bam) = self.mounted()?;
        bam.load(image).map_err(|e| dos_code_for_io(&e))?;
        self.bam_dirty = false;
        Ok(())
    }

    /// Format the disk.  With an ID the whole medium is erased first;
    /// without one, only a fresh BAM and empty directory are written and
    /// the old ID is kept.
    pub fn format_disk(&mut self, name: &[u8], id: Option<[u8; 2]>) -> Result<(), DosCode> {
        self.writable()?;
        if name.is_empty() {
            return Err(DosCode::NoFilename);
        }
        if self.has_open_channels() {
            self.close(15)?;
        }
        let (image, bam) = self.mounted()?;
        let id = match id {
            Some(id) => {
                image.erase(id).map_err(|e| dos_code_for_io(&e))?;
                id
            }
            None => bam.disk_id(),
        };
        bam.create(name, id);
        let format = bam.format();
        let mut directory = vec![0u8; BLOCK_SIZE];
        directory[1] = 0xff;
        image
            .write_sector(format.directory_track(), format.first_directory_sector(), &directory)
            .map_err(|e| dos_code_for_io(&e))?;
        bam.store(image).map_err(|e| dos_code_for_io(&e))?;
        self.bam_dirty = false;
        info!(
            "unit {}: formatted {:?} id {:?}",
            self.unit(),
            Petscii::from_bytes(name),
            Petscii::from_bytes(&id)
        );
        Ok(())
    }

    /// Scratch every file matching any of the comma separated patterns.
    /// Locked files are skipped.  Returns the number of files scratched.
    pub fn scratch(&mut self, patterns: &[u8]) -> Result<usize, DosCode> {
        self.writable()?;
        let patterns: Vec<Pattern> = patterns
            .split(|&c| c == b',')
            .map(|text| split_drive(text).map(|(_, name)| Pattern::parse(name)))
            .collect::<Result<_, _>>()?;
        let victims: Vec<DirEntry> = self
            .entries()?
            .into_iter()
            .filter(|entry| !entry.locked && patterns.iter().any(|p| !p.name.is_empty() && p.matches(entry)))
            .collect();
        for entry in &victims {
            if entry.closed {
                self.free_chain(entry.first);
            }
            let (image, _) = self.mounted()?;
            dir::clear_entry(image, entry.slot)?;
        }
        self.bam_dirty = true;
        self.store_bam()?;
        Ok(victims.len())
    }

    pub fn rename(&mut self, old: &[u8], new: &[u8]) -> Result<(), DosCode> {
        self.writable()?;
        if new.is_empty() || old.is_empty() {
            return Err(DosCode::NoFilename);
        }
        if dir::has_wildcards(new) || new.len() > dir::NAME_LENGTH {
            return Err(DosCode::InvalidFilename);
        }
        if self.find(&Pattern::parse(new))?.is_some() {
            return Err(DosCode::FileExists);
        }
        let mut entry = self
            .find(&Pattern {
                name: old.to_vec(),
                file_type: None,
            })?
            .ok_or(DosCode::FileNotFound)?;
        entry.name = Petscii::from_bytes(new);
        let (image, bam) = self.mounted()?;
        dir::store_entry(image, bam, &mut entry, false)
    }

    /// Rebuild the BAM from the directory.  Unclosed files are deleted.  If
    /// any chain is broken the previous BAM is restored and the error is
    /// reported.
    pub fn validate(&mut self) -> Result<(), DosCode> {
        self.writable()?;
        let backup = self.bam.clone().ok_or(DosCode::DriveNotReady)?;
        match self.rebuild_bam() {
            Ok(()) => {
                self.bam_dirty = true;
                self.store_bam()
            }
            Err(code) => {
                self.bam = Some(backup);
                Err(code)
            }
        }
    }

    fn rebuild_bam(&mut self) -> Result<(), DosCode> {
        let directory_blocks = {
            let (image, bam) = self.mounted_ref()?;
            dir::read_blocks(image, bam)?
        };
        let entries = self.entries()?;
        let mut chains = vec![];
        for entry in &entries {
            if !entry.closed {
                let (image, _) = self.mounted()?;
                dir::clear_entry(image, entry.slot)?;
                debug!("unit {}: validate removed unclosed {:?}", self.unit(), entry.name);
                continue;
            }
            if entry.file_type == dir::FileType::Del {
                continue;
            }
            chains.push(self.chain(entry.first)?);
        }

        let bam = self.bam.as_mut().ok_or(DosCode::DriveNotReady)?;
        bam.free_all();
        bam.allocate_system_blocks();
        for &((track, sector), _) in &directory_blocks {
            bam.allocate(track, sector);
        }
        let mut seen = HashSet::new();
        for chain in chains {
            for (track, sector) in chain {
                // A block claimed twice, or by the DOS itself, breaks the chain.
                if !seen.insert((track, sector)) || !bam.allocate(track, sector) {
                    return Err(DosCode::IllegalTrackOrSector);
                }
            }
        }
        Ok(())
    }
}

/// The first free block at or after the given one, scanning upwards
/// through the tracks.  The directory track is never offered.
fn next_free_after(bam: &Bam, track: u8, sector: u8) -> Option<(u8, u8)> {
    let directory = bam.format().directory_track();
    let mut start = sector;
    for t in track..=bam.tracks() {
        if t != directory {
            if let Some(s) = (start..bam.sectors_in_track(t)).find(|&s| bam.is_free(t, s)) {
                return Some((t, s));
            }
        }
        start = 0;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DiskImage, ImageType};
    use crate::vdrive::ReadByte;

    fn formatted() -> VirtualDrive {
        let mut drive = VirtualDrive::new(8, 0);
        drive.attach(DiskImage::memory(ImageType::D64).unwrap()).unwrap();
        assert_eq!(drive.execute_command(b"N:WORK,W1").code, DosCode::Ok);
        drive
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_numbers(b":2 0 18 1"), Ok(vec![2, 0, 18, 1]));
        assert_eq!(parse_numbers(b" 2,0,18,1"), Ok(vec![2, 0, 18, 1]));
        assert_eq!(parse_numbers(b"#2)0\x1d18"), Ok(vec![2, 0, 18]));
        assert_eq!(parse_numbers(b":2 X"), Err(DosCode::SyntaxError));
    }

    #[test]
    fn test_format() {
        let drive = formatted();
        assert_eq!(drive.disk_name().unwrap().as_bytes(), b"WORK");
        assert_eq!(drive.disk_id(), Some(*b"W1"));
        assert_eq!(drive.blocks_free(), Some(664));
        assert_eq!(drive.image().unwrap().header_id().unwrap(), *b"W1");
    }

    #[test]
    fn test_unknown_command() {
        let mut drive = formatted();
        assert_eq!(drive.execute_command(b"Z").code, DosCode::InvalidCommand);
        assert_eq!(drive.execute_command(b"UI").code, DosCode::DosVersion);
        assert_eq!(drive.execute_command(b"I0").code, DosCode::Ok);
    }

    #[test]
    fn test_scratch_and_rename() {
        let mut drive = formatted();
        drive.write_file(b"ALPHA", &[1; 300]).unwrap();
        drive.write_file(b"BETA", &[2; 10]).unwrap();
        drive.write_file(b"ALSO", &[3; 10]).unwrap();
        assert_eq!(drive.blocks_free(), Some(660));

        let status = drive.execute_command(b"R0:GAMMA=BETA");
        assert_eq!(status.code, DosCode::Ok);
        assert_eq!(drive.read_file(b"GAMMA").unwrap(), vec![2; 10]);
        assert_eq!(drive.execute_command(b"R:GAMMA=ALSO").code, DosCode::FileExists);
        assert_eq!(drive.execute_command(b"R:X=NOPE").code, DosCode::FileNotFound);

        let status = drive.execute_command(b"S0:AL*");
        assert_eq!(status, DosStatus::new(DosCode::FilesScratched, 2, 0));
        assert_eq!(drive.blocks_free(), Some(663));
        assert_eq!(drive.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_validate() {
        let mut drive = formatted();
        drive.write_file(b"KEEP", &[7; 1000]).unwrap();
        drive.open(b"SPLAT,S,W", 2).unwrap();
        drive.write_byte(2, 1).unwrap();
        // Leak a block, then let validation recover it.
        assert_eq!(drive.execute_command(b"B-A 0 30 5").code, DosCode::Ok);
        assert_eq!(drive.blocks_free(), Some(658));
        drive.close(2).unwrap();
        // Turn SPLAT into an unclosed entry.
        let entry = drive.find(&Pattern::parse(b"SPLAT")).unwrap().unwrap();
        let mut block = [0u8; BLOCK_SIZE];
        drive.read_sector(entry.slot.track, entry.slot.sector, &mut block).unwrap();
        block[entry.slot.offset() + 2] &= 0x7f;
        drive.write_sector(entry.slot.track, entry.slot.sector, &block).unwrap();

        assert_eq!(drive.execute_command(b"V").code, DosCode::Ok);
        assert_eq!(drive.blocks_free(), Some(660));
        assert_eq!(drive.entries().unwrap().len(), 1);
        assert_eq!(drive.read_file(b"KEEP").unwrap(), vec![7; 1000]);
    }

    #[test]
    fn test_validate_restores_on_error() {
        let mut drive = formatted();
        drive.write_file(b"BROKEN", &[1; 600]).unwrap();
        let entry = drive.find(&Pattern::parse(b"BROKEN")).unwrap().unwrap();
        let mut block = [0u8; BLOCK_SIZE];
        drive.read_sector(entry.first.0, entry.first.1, &mut block).unwrap();
        block[0] = 99;
        drive.write_sector(entry.first.0, entry.first.1, &block).unwrap();
        let before = drive.bam().unwrap().as_bytes().to_vec();
        assert_eq!(drive.execute_command(b"V").code, DosCode::IllegalTrackOrSector);
        assert_eq!(drive.bam().unwrap().as_bytes(), &before[..]);
    }

    #[test]
    fn test_block_commands() {
        let mut drive = formatted();
        drive.open(b"#", 5).unwrap();
        for &b in b"block data" {
            drive.write_byte(5, b).unwrap();
        }
        assert_eq!(drive.execute_command(b"U2:5 0 1 0").code, DosCode::Ok);
        assert_eq!(drive.execute_command(b"B-P 5 0").code, DosCode::Ok);
        drive.write_byte(5, b'B').unwrap();
        assert_eq!(drive.execute_command(b"U1:5 0 1 0").code, DosCode::Ok);
        assert_eq!(drive.read_byte(5), Ok(ReadByte::Data(b'b')));
        assert_eq!(drive.read_byte(5), Ok(ReadByte::Data(b'l')));

        let status = drive.execute_command(b"U1:5 0 36 0");
        assert_eq!(status, DosStatus::new(DosCode::IllegalTrackOrSector, 36, 0));
        assert_eq!(drive.execute_command(b"U1:6 0 1 0").code, DosCode::NoChannel);

        assert_eq!(drive.execute_command(b"B-A 0 1 0").code, DosCode::Ok);
        let status = drive.execute_command(b"B-A 0 1 0");
        assert_eq!(status, DosStatus::new(DosCode::NoBlock, 1, 1));
        assert_eq!(drive.execute_command(b"B-F 0 1 0").code, DosCode::Ok);
        assert_eq!(drive.blocks_free(), Some(664));
    }

    #[test]
    fn test_command_channel() {
        let mut drive = formatted();
        drive.write_file(b"GONE", b"x").unwrap();
        for &b in b"S:GONE\r" {
            let _ = drive.write_byte(15, b);
        }
        assert_eq!(drive.status(), DosStatus::new(DosCode::FilesScratched, 1, 0));
        assert!(drive.open(b"I", 15).is_ok());
        assert_eq!(drive.status().code, DosCode::Ok);
    }
}
