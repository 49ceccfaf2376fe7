use crate::disk::BLOCK_SIZE;
use crate::vdrive::dir::{FileType, Slot};

pub const CHANNEL_COUNT: usize = 16;

/// What a channel is open for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelMode {
    Read,
    Write,
    Append,
    /// A `$` listing, served from a prepared buffer.
    Directory,
    /// A `#` buffer for direct block access.
    Buffer,
}

/// One byte delivered by a read.  `Last` carries the final byte of the
/// stream (the drive signals EOI with it); reads past the end yield `Eof`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadByte {
    Data(u8),
    Last(u8),
    Eof,
}

/// The state of one open data channel.
#[derive(Clone, Debug)]
pub struct Channel {
    pub mode: ChannelMode,
    /// The block currently held, including its link bytes.
    pub buffer: Vec<u8>,
    /// Index of the next byte to read or write in `buffer`.
    pub position: usize,
    /// One past the last valid byte of `buffer`, for reads.
    pub length: usize,
    /// The block `buffer` was read from or will be written to.
    pub track: u8,
    pub sector: u8,
    pub first: (u8, u8),
    pub blocks: u16,
    pub name: Vec<u8>,
    pub file_type: FileType,
    /// The directory entry an append continues, or a replaced file's slot.
    pub slot: Option<Slot>,
    pub replace: bool,
    pub eof: bool,
}

impl Channel {
    fn with_mode(mode: ChannelMode, buffer: Vec<u8>) -> Channel {
        Channel {
            mode,
            buffer,
            position: 0,
            length: 0,
            track: 0,
            sector: 0,
            first: (0, 0),
            blocks: 0,
            name: vec![],
            file_type: FileType::Seq,
            slot: None,
            replace: false,
            eof: false,
        }
    }

    /// A channel reading a file chain; `load_block` fills the buffer.
    pub fn reader(first: (u8, u8)) -> Channel {
        let mut channel = Channel::with_mode(ChannelMode::Read, vec![0u8; BLOCK_SIZE]);
        channel.first = first;
        channel
    }

    /// A channel writing a new file whose first block is already allocated.
    pub fn writer(name: Vec<u8>, file_type: FileType, first: (u8, u8), replace: bool) -> Channel {
        let mut channel = Channel::with_mode(ChannelMode::Write, vec![0u8; BLOCK_SIZE]);
        channel.name = name;
        channel.file_type = file_type;
        channel.first = first;
        channel.track = first.0;
        channel.sector = first.1;
        channel.position = 2;
        channel.blocks = 1;
        channel.replace = replace;
        channel
    }

    pub fn directory(listing: Vec<u8>) -> Channel {
        let length = listing.len();
        let mut channel = Channel::with_mode(ChannelMode::Directory, listing);
        channel.length = length;
        channel
    }

    pub fn buffer() -> Channel {
        let mut channel = Channel::with_mode(ChannelMode::Buffer, vec![0u8; BLOCK_SIZE]);
        channel.length = BLOCK_SIZE;
        channel
    }

    /// Take over a block read from a file chain.
    pub fn load_block(&mut self, track: u8, sector: u8, block: &[u8]) {
        self.buffer.copy_from_slice(&block[..BLOCK_SIZE]);
        self.track = track;
        self.sector = sector;
        self.position = 2;
        self.length = if block[0] == 0 {
            (block[1] as usize + 1).max(2)
        } else {
            BLOCK_SIZE
        };
    }

    /// The next block of the chain, if the held block links to one.
    pub fn next_link(&self) -> Option<(u8, u8)> {
        match self.buffer[0] {
            0 => None,
            track => Some((track, self.buffer[1])),
        }
    }

    pub fn is_writing(&self) -> bool {
        matches!(self.mode, ChannelMode::Write | ChannelMode::Append)
    }

    /// Fetch the next byte from the held data.  Returns None when the
    /// buffer is exhausted (and the caller may need to load the next block).
    pub fn take_byte(&mut self) -> Option<u8> {
        if self.position >= self.length {
            return None;
        }
        let byte = self.buffer[self.position];
        self.position += 1;
        Some(byte)
    }

    /// Is the read position at the end of the whole stream?
    pub fn at_end(&self) -> bool {
        self.position >= self.length
            && match self.mode {
                ChannelMode::Read => self.next_link().is_none(),
                _ => true,
            }
    }

    /// Store a byte in a buffer channel, wrapping at the end of the block.
    pub fn put_buffer_byte(&mut self, byte: u8) {
        self.buffer[self.position % BLOCK_SIZE] = byte;
        self.position = (self.position + 1) % BLOCK_SIZE;
    }

    /// Fetch a byte from a buffer channel, wrapping at the end of the block.
    pub fn get_buffer_byte(&mut self) -> ReadByte {
        let byte = self.buffer[self.position % BLOCK_SIZE];
        self.position = (self.position + 1) % BLOCK_SIZE;
        if self.position == self.length % BLOCK_SIZE {
            ReadByte::Last(byte)
        } else {
            ReadByte::Data(byte)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_lengths() {
        let mut channel = Channel::reader((17, 0));
        let mut block = vec![0u8; BLOCK_SIZE];
        block[0] = 17;
        block[1] = 10;
        channel.load_block(17, 0, &block);
        assert_eq!(channel.length, BLOCK_SIZE);
        assert_eq!(channel.next_link(), Some((17, 10)));

        block[0] = 0;
        block[1] = 4;
        block[2..5].copy_from_slice(b"abc");
        channel.load_block(17, 10, &block);
        assert_eq!(channel.take_byte(), Some(b'a'));
        assert_eq!(channel.take_byte(), Some(b'b'));
        assert!(!channel.at_end());
        assert_eq!(channel.take_byte(), Some(b'c'));
        assert!(channel.at_end());
        assert_eq!(channel.take_byte(), None);
    }

    #[test]
    fn test_buffer_wraps() {
        let mut channel = Channel::buffer();
        channel.position = 255;
        channel.put_buffer_byte(1);
        channel.put_buffer_byte(2);
        assert_eq!(channel.buffer[255], 1);
        assert_eq!(channel.buffer[0], 2);
        channel.position = 254;
        assert_eq!(channel.get_buffer_byte(), ReadByte::Data(0));
        assert_eq!(channel.get_buffer_byte(), ReadByte::Last(1));
    }
}
