use std::fmt;

use crate::petscii;

const COLUMNS: usize = 16;

/// Write a hexdump of the provided byte slice, starting at `start`.  Each
/// row shows the offset, the bytes in hex, and their PETSCII rendering.
pub fn hexdump(
    f: &mut fmt::Formatter,
    prefix: &str,
    buffer: &[u8],
    start: usize,
) -> std::result::Result<(), std::fmt::Error> {
    let mut offset = start;
    if offset >= buffer.len() {
        // Print at least an offset rather than nothing.
        write!(f, "{}{:02x}: ", prefix, offset)?;
    }
    while offset < buffer.len() {
        write!(f, "{}{:02x}: ", prefix, offset)?;

        let next_offset = offset + COLUMNS;
        let (row_size, padding) = if next_offset <= buffer.len() {
            (COLUMNS, 0)
        } else {
            (buffer.len() - offset, next_offset - buffer.len())
        };
        let row = &buffer[offset..offset + row_size];

        for b in row {
            write!(f, "{:02x} ", b)?;
        }
        for _ in 0..padding {
            write!(f, "   ")?;
        }

        for &b in row {
            let c = match petscii::to_ascii(b) {
                Some(c @ 0x20..=0x7e) => c as char,
                _ => '.',
            };
            write!(f, "{}", c)?;
        }

        offset = next_offset;
        if offset < buffer.len() {
            writeln!(f)?;
        }
    }
    Ok(())
}

pub struct Hex<'a> {
    bytes: &'a [u8],
    start: usize,
}

impl<'a> fmt::Display for Hex<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        hexdump(f, "", self.bytes, self.start)
    }
}

/// A hexdump that skips the bytes before `start`, for showing part of a
/// block.
pub fn hex_from(bytes: &[u8], start: usize) -> Hex {
    Hex { bytes, start }
}

/// Parse a number the way the tool's commands take them: decimal, or hex
/// with a `$` or `0x` prefix.
pub fn parse_number(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix('$').or_else(|| text.strip_prefix("0x")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}
