//! PETSCII text, as found in CBM file and disk names.
//!
//! Names typed on the host are converted with the usual "lowercase host
//! text is unshifted PETSCII" rule: ASCII `a`-`z` become PETSCII 0x41-0x5a
//! (the characters a C64 shows as uppercase), while ASCII `A`-`Z` become the
//! shifted range 0xc1-0xda.

use std::fmt;

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Petscii(Vec<u8>);

/// Convert a host (ASCII) byte to PETSCII.
pub fn from_ascii(c: u8) -> u8 {
    match c {
        b'a'..=b'z' => c - b'a' + 0x41,
        b'A'..=b'Z' => c - b'A' + 0xc1,
        _ => c,
    }
}

/// Convert a PETSCII byte to host (ASCII) text, if it has a printable
/// equivalent.
pub fn to_ascii(c: u8) -> Option<u8> {
    match c {
        0x41..=0x5a => Some(c - 0x41 + b'a'),
        0xc1..=0xda => Some(c - 0xc1 + b'A'),
        0x61..=0x7a => Some(c - 0x61 + b'A'),
        0x20..=0x40 | 0x5b | 0x5d => Some(c),
        0xa0 => Some(b' '),
        _ => None,
    }
}

impl Petscii {
    pub fn from_bytes(bytes: &[u8]) -> Petscii {
        Petscii(bytes.to_vec())
    }

    /// Build from a fixed-length field, dropping the trailing padding.
    pub fn from_padded_bytes(bytes: &[u8], pad: u8) -> Petscii {
        let end = bytes.iter().rposition(|&b| b != pad).map_or(0, |p| p + 1);
        Petscii(bytes[..end].to_vec())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Write into a fixed-length field, padding the remainder.  Text longer
    /// than the field is truncated.
    pub fn write_bytes_with_padding(&self, field: &mut [u8], pad: u8) {
        for (i, byte) in field.iter_mut().enumerate() {
            *byte = self.0.get(i).copied().unwrap_or(pad);
        }
    }

    /// Render as host text, with unprintable bytes escaped as `{$xx}`.
    pub fn to_escaped_string(&self) -> String {
        let mut string = String::with_capacity(self.0.len());
        for &c in &self.0 {
            match to_ascii(c) {
                Some(a) => string.push(a as char),
                None => string.push_str(&format!("{{${:02x}}}", c)),
            }
        }
        string
    }
}

impl<'a> From<&'a str> for Petscii {
    fn from(string: &'a str) -> Petscii {
        Petscii(string.bytes().map(from_ascii).collect())
    }
}

impl<'a> From<&'a [u8]> for Petscii {
    fn from(bytes: &'a [u8]) -> Petscii {
        Petscii::from_bytes(bytes)
    }
}

impl fmt::Display for Petscii {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_escaped_string())
    }
}

impl fmt::Debug for Petscii {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self.to_escaped_string())
    }
}
