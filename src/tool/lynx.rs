//! Lynx archives.
//!
//! A Lynx file starts with a small BASIC program, followed by a text
//! directory (each field terminated by a carriage return) and then the file
//! contents, each padded out to a multiple of 254 bytes.  The directory
//! occupies the first `directory blocks * 254` bytes of the archive.

use log::{debug, warn};

use crate::petscii::Petscii;
use crate::tool::ToolError;
use crate::vdrive::dir::NAME_LENGTH;
use crate::vdrive::FileType;

/// Data bytes in one block of a file chain.
const BLOCK_DATA: usize = 254;
const CR: u8 = 0x0d;
const PADDING_BYTE: u8 = 0xa0;

#[derive(Clone, Debug, PartialEq)]
pub struct LynxEntry {
    pub name: Petscii,
    pub file_type: FileType,
    pub data: Vec<u8>,
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8, ToolError> {
        let byte = *self.bytes.get(self.position).ok_or(ToolError::RdErr)?;
        self.position += 1;
        Ok(byte)
    }

    /// The bytes up to the next carriage return, which is consumed.
    fn field(&mut self) -> Result<&'a [u8], ToolError> {
        let rest = &self.bytes[self.position.min(self.bytes.len())..];
        let end = rest.iter().position(|&c| c == CR).ok_or(ToolError::RdErr)?;
        self.position += end + 1;
        Ok(&rest[..end])
    }

    /// A field holding a number, possibly with leading spaces and trailing
    /// text.
    fn number(&mut self) -> Result<usize, ToolError> {
        let field = self.field()?;
        let digits: String = field
            .iter()
            .skip_while(|&&c| c == b' ')
            .take_while(|c| c.is_ascii_digit())
            .map(|&c| c as char)
            .collect();
        digits.parse().map_err(|_| {
            warn!("invalid Lynx file: bad number {:?}", Petscii::from_bytes(field));
            ToolError::RdErr
        })
    }
}

/// Split a Lynx archive into its files.
pub fn parse(archive: &[u8]) -> Result<Vec<LynxEntry>, ToolError> {
    let mut header = Reader {
        bytes: archive,
        position: 0,
    };

    // The BASIC program ends with three zero bytes.
    let mut zeros = 0;
    while zeros < 3 {
        zeros = if header.byte()? == 0 { zeros + 1 } else { 0 };
    }
    header.byte()?;

    let directory_blocks = header.number()?;
    let count = header.number()?;
    if directory_blocks == 0 || count == 0 {
        warn!("invalid Lynx file: empty directory");
        return Err(ToolError::RdErr);
    }
    debug!("Lynx archive: {} directory blocks, {} files", directory_blocks, count);

    let mut position = directory_blocks
        .checked_mul(BLOCK_DATA)
        .ok_or(ToolError::RdErr)?;
    let mut entries = vec![];
    for _ in 0..count {
        let name = header.field()?;
        let name = &name[..name.len().min(NAME_LENGTH)];
        let blocks = header.number()?;
        let file_type = match header.byte()? {
            b'D' => FileType::Del,
            b'P' => FileType::Prg,
            b'S' => FileType::Seq,
            b'U' => FileType::Usr,
            b'R' => {
                warn!("Lynx file {:?} is a REL file", Petscii::from_bytes(name));
                return Err(ToolError::RdErr);
            }
            _ => FileType::Prg,
        };
        header.byte()?;
        let last = header.number()?;
        if blocks == 0 || last == 0 {
            return Err(ToolError::RdErr);
        }

        let size = (blocks - 1)
            .checked_mul(BLOCK_DATA)
            .and_then(|size| size.checked_add(last - 1))
            .ok_or(ToolError::RdErr)?;
        let end = position.checked_add(size).ok_or(ToolError::RdErr)?;
        let data = archive.get(position..end).ok_or(ToolError::RdErr)?.to_vec();
        position = end;
        if last < 255 {
            position += BLOCK_DATA + 1 - last;
        }
        entries.push(LynxEntry {
            name: Petscii::from_padded_bytes(name, PADDING_BYTE),
            file_type,
            data,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an archive the way the Lynx program lays one out.
    fn archive(files: &[(&[u8], u8, &[u8])]) -> Vec<u8> {
        let mut bytes = vec![0x01, 0x08, 0x0b, 0x08, 0x0a, 0x00, 0x9e, 0x32, 0x30, 0x36, 0x31];
        bytes.extend_from_slice(&[0, 0, 0]);
        bytes.push(CR);
        bytes.extend_from_slice(b" 1  *LYNX XV  BY WILL CORLEY\r");
        bytes.extend_from_slice(format!(" {} \r", files.len()).as_bytes());
        for (name, kind, data) in files {
            let blocks = (data.len() + BLOCK_DATA - 1) / BLOCK_DATA;
            let last = data.len() - (blocks - 1) * BLOCK_DATA + 1;
            bytes.extend_from_slice(name);
            bytes.push(CR);
            bytes.extend_from_slice(format!(" {} \r", blocks).as_bytes());
            bytes.push(*kind);
            bytes.push(CR);
            bytes.extend_from_slice(format!(" {} \r", last).as_bytes());
        }
        bytes.resize(BLOCK_DATA, 0);
        for (_, _, data) in files {
            bytes.extend_from_slice(data);
            let tail = data.len() % BLOCK_DATA;
            if tail != 0 {
                bytes.resize(bytes.len() + BLOCK_DATA - tail, 0);
            }
        }
        bytes
    }

    #[test]
    fn test_parse() {
        let long: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
        let bytes = archive(&[
            (&b"FIRST\xa0\xa0"[..], b'P', &long[..]),
            (&b"NOTES"[..], b'S', &b"hello"[..]),
            (&b"EXACT"[..], b'U', &[7u8; 254][..]),
        ]);
        let entries = parse(&bytes).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, Petscii::from_bytes(b"FIRST"));
        assert_eq!(entries[0].file_type, FileType::Prg);
        assert_eq!(entries[0].data, long);
        assert_eq!(entries[1].file_type, FileType::Seq);
        assert_eq!(entries[1].data, b"hello".to_vec());
        assert_eq!(entries[2].file_type, FileType::Usr);
        assert_eq!(entries[2].data, vec![7u8; 254]);
    }

    #[test]
    fn test_invalid() {
        assert!(parse(b"no basic here").is_err());
        let mut bytes = archive(&[(&b"DATA"[..], b'R', &b"x"[..])]);
        assert!(parse(&bytes).is_err());
        bytes.truncate(40);
        assert!(parse(&bytes).is_err());
    }

    #[test]
    fn test_oversized_fields() {
        let huge = format!(" {} \r", usize::MAX);
        let mut bytes = vec![0x01, 0x08, 0, 0, 0, CR];
        bytes.extend_from_slice(huge.as_bytes());
        bytes.extend_from_slice(b" 1 \r");
        assert!(matches!(parse(&bytes), Err(ToolError::RdErr)));

        let mut bytes = vec![0x01, 0x08, 0, 0, 0, CR];
        bytes.extend_from_slice(b" 1 \r 1 \rBIG\r");
        bytes.extend_from_slice(huge.as_bytes());
        bytes.extend_from_slice(b"P\r 200 \r");
        assert!(matches!(parse(&bytes), Err(ToolError::RdErr)));

        let mut bytes = vec![0x01, 0x08, 0, 0, 0, CR];
        bytes.extend_from_slice(format!(" 1 \r {} \r", usize::MAX).as_bytes());
        assert!(matches!(parse(&bytes), Err(ToolError::RdErr)));
    }
}
