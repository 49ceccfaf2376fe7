//! Parsing of the names given to OPEN.

use crate::vdrive::dir::{has_wildcards, FileType, NAME_LENGTH};
use crate::vdrive::status::DosCode;

/// Secondary addresses with fixed meanings.
pub const SA_LOAD: u8 = 0;
pub const SA_SAVE: u8 = 1;
pub const SA_COMMAND: u8 = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    Append,
    Modify,
}

/// A file name with its prefix and options separated out, e.g.
/// `@0:NAME,S,W`.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedName {
    pub name: Vec<u8>,
    pub drive: Option<u8>,
    pub replace: bool,
    pub file_type: Option<FileType>,
    /// A trailing `=X` on a name opened for reading, which only matches
    /// files of that type.
    pub type_filter: Option<FileType>,
    pub mode: AccessMode,
}

/// Split off a `drive:` prefix.  Text before the colon must be empty or a
/// drive number.
pub fn split_drive(text: &[u8]) -> Result<(Option<u8>, &[u8]), DosCode> {
    match text.iter().position(|&c| c == b':') {
        Some(colon) => {
            let prefix = &text[..colon];
            let drive = match prefix {
                [] => None,
                [d @ b'0'..=b'9'] => Some(d - b'0'),
                _ => return Err(DosCode::InvalidFilename),
            };
            Ok((drive, &text[colon + 1..]))
        }
        None => Ok((None, text)),
    }
}

/// Parse an OPEN name for a data channel.  Secondary address 0 always
/// reads and 1 always writes, whatever the options say.
pub fn parse(text: &[u8], secondary: u8) -> Result<ParsedName, DosCode> {
    let (replace, text) = match text.split_first() {
        Some((b'@', rest)) => (true, rest),
        _ => (false, text),
    };
    let (drive, text) = split_drive(text)?;

    let mut parts = text.split(|&c| c == b',');
    let mut name = parts.next().unwrap_or(&[]).to_vec();
    let mut file_type = None;
    let mut mode = None;
    for option in parts {
        match option.first() {
            Some(b'S') => file_type = Some(FileType::Seq),
            Some(b'P') => file_type = Some(FileType::Prg),
            Some(b'U') => file_type = Some(FileType::Usr),
            Some(b'L') => file_type = Some(FileType::Rel),
            Some(b'R') => mode = Some(AccessMode::Read),
            Some(b'W') => mode = Some(AccessMode::Write),
            Some(b'A') => mode = Some(AccessMode::Append),
            Some(b'M') => mode = Some(AccessMode::Modify),
            _ => return Err(DosCode::SyntaxError),
        }
    }

    let mode = match secondary {
        SA_LOAD => AccessMode::Read,
        SA_SAVE => AccessMode::Write,
        _ => mode.unwrap_or(AccessMode::Read),
    };
    if secondary == SA_SAVE && file_type.is_none() {
        file_type = Some(FileType::Prg);
    }

    let mut type_filter = None;
    if mode == AccessMode::Read || mode == AccessMode::Modify {
        if let [.., b'=', letter] = name[..] {
            if let Some(filter) = FileType::from_letter(letter) {
                type_filter = Some(filter);
                name.truncate(name.len() - 2);
            }
        }
    }

    if name.is_empty() {
        return Err(DosCode::NoFilename);
    }
    if name.len() > NAME_LENGTH {
        return Err(DosCode::InvalidFilename);
    }
    if mode != AccessMode::Read && mode != AccessMode::Modify && has_wildcards(&name) {
        return Err(DosCode::InvalidFilename);
    }
    if file_type == Some(FileType::Rel) {
        return Err(DosCode::Unimplemented);
    }

    Ok(ParsedName {
        name,
        drive,
        replace,
        file_type,
        type_filter,
        mode,
    })
}
