//! The disk maintenance tool.
//!
//! A `Session` owns four virtual drives (units 8 to 11) and runs
//! c1541-style commands against them, one command line at a time.  Files on
//! a unit other than the current one are addressed as `@<unit>:name`.

pub mod lynx;
pub mod zipcode;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, LevelFilter};
use thiserror::Error;

use crate::disk::{DiskError, DiskImage, ImageType, BLOCK_SIZE};
use crate::petscii::Petscii;
use crate::util;
use crate::vdrive::{DirEntry, DosCode, DosStatus, FileType, Pattern, VirtualDrive};

pub const FIRST_UNIT: u8 = 8;
pub const UNIT_COUNT: usize = 4;

/// Failures of tool commands.  Each prints as one line.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Drive not ready.")]
    NotReady,
    #[error("Image file has changed on disk.")]
    Changed,
    #[error("Cannot read file.")]
    NotRd,
    #[error("Cannot write file.")]
    NotWrt,
    #[error("Floppy write failed.")]
    WrtErr,
    #[error("Floppy read failed.")]
    RdErr,
    #[error("Incompatible DOS version.")]
    Incomp,
    #[error("Invalid image.")]
    BadImage,
    #[error("Invalid filename.")]
    BadName,
    #[error("Illegal value.")]
    BadVal,
    #[error("Illegal device number.")]
    BadDev,
    #[error("Inaccessible Track or Sector.")]
    BadTs,
    #[error("{0}")]
    Dos(#[from] DosCode),
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ToolError {
    /// Classify a failure to open or attach an image.
    fn from_image(e: io::Error) -> ToolError {
        match DiskError::from_io_error(&e) {
            Some(DiskError::UnknownFormat)
            | Some(DiskError::InvalidHeader)
            | Some(DiskError::Unsupported(_)) => ToolError::BadImage,
            _ => ToolError::Io(e),
        }
    }
}

/// Whether the session goes on after a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct CommandInfo {
    pub name: &'static str,
    pub syntax: &'static str,
    pub description: &'static str,
    min_args: usize,
    max_args: usize,
}

const MANY: usize = usize::MAX;

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo {
        name: "@",
        syntax: "@ [<command>]",
        description: "Execute specified CBM DOS command and print the current status of the\n\
                      drive.  If no <command> is specified, just print the status.",
        min_args: 0,
        max_args: 1,
    },
    CommandInfo {
        name: "?",
        syntax: "? [<command>]",
        description: "Explain specified command.  If no command is specified, list available\n\
                      ones.",
        min_args: 0,
        max_args: 1,
    },
    CommandInfo {
        name: "attach",
        syntax: "attach <diskimage> [<unit>]",
        description: "Attach <diskimage> to <unit> (default is the current unit).",
        min_args: 1,
        max_args: 2,
    },
    CommandInfo {
        name: "bcopy",
        syntax: "bcopy <track> <sector> <track2> <sector2> [<unit>]",
        description: "Copy one block over another.",
        min_args: 4,
        max_args: 5,
    },
    CommandInfo {
        name: "bfill",
        syntax: "bfill <track> <sector> <value> [<unit>]",
        description: "Fill a block with the byte <value>.",
        min_args: 3,
        max_args: 4,
    },
    CommandInfo {
        name: "block",
        syntax: "block <track> <sector> [<disp>] [<unit>]",
        description: "Show specified disk block in hex form.",
        min_args: 2,
        max_args: 4,
    },
    CommandInfo {
        name: "bread",
        syntax: "bread <filename> <track> <sector> [<unit>]",
        description: "Read a block into the host file <filename>.",
        min_args: 3,
        max_args: 4,
    },
    CommandInfo {
        name: "bwrite",
        syntax: "bwrite <filename> <track> <sector> [<unit>]",
        description: "Write the host file <filename> into a block.",
        min_args: 3,
        max_args: 4,
    },
    CommandInfo {
        name: "copy",
        syntax: "copy <source1> [<source2> ... <sourceN>] <destination>",
        description: "Copy `source1' ... `sourceN' into destination.  If N > 1, `destination'\n\
                      must be a simple drive specifier (@n:).",
        min_args: 2,
        max_args: MANY,
    },
    CommandInfo {
        name: "delete",
        syntax: "delete <file1> [<file2> ... <fileN>]",
        description: "Delete the specified files.",
        min_args: 1,
        max_args: MANY,
    },
    CommandInfo {
        name: "detach",
        syntax: "detach [<unit>]",
        description: "Detach the image in <unit> (default is the current unit).",
        min_args: 0,
        max_args: 1,
    },
    CommandInfo {
        name: "dir",
        syntax: "dir [<pattern>]",
        description: "List files matching <pattern> (default is all files).",
        min_args: 0,
        max_args: 1,
    },
    CommandInfo {
        name: "exit",
        syntax: "exit",
        description: "Exit (same as `quit').",
        min_args: 0,
        max_args: 0,
    },
    CommandInfo {
        name: "extract",
        syntax: "extract [<unit>]",
        description: "Extract all the files to the file system.",
        min_args: 0,
        max_args: 1,
    },
    CommandInfo {
        name: "format",
        syntax: "format <diskname,id> [<type> <imagename>] [<unit>]",
        description: "If <unit> is specified, format the disk in unit <unit>.\n\
                      If <type> and <imagename> are specified, create a new image named\n\
                      <imagename>, attach it to unit 8 (or <unit>) and format it.  <type> is\n\
                      a disk image type: d64, d67, d71, d81, d80, d82, g64, g71 or x64.\n\
                      Otherwise, format the disk in the current unit, if any.",
        min_args: 1,
        max_args: 4,
    },
    CommandInfo {
        name: "help",
        syntax: "help [<command>]",
        description: "Explain specified command.  If no command is specified, list available\n\
                      ones.",
        min_args: 0,
        max_args: 1,
    },
    CommandInfo {
        name: "info",
        syntax: "info [<unit>]",
        description: "Display information about unit <unit> (if unspecified, use the current\n\
                      one).",
        min_args: 0,
        max_args: 1,
    },
    CommandInfo {
        name: "list",
        syntax: "list [<pattern>]",
        description: "List files matching <pattern> (default is all files).",
        min_args: 0,
        max_args: 1,
    },
    CommandInfo {
        name: "name",
        syntax: "name <diskname>[,<id>] [<unit>]",
        description: "Change image name.",
        min_args: 1,
        max_args: 2,
    },
    CommandInfo {
        name: "quit",
        syntax: "quit",
        description: "Exit (same as `exit').",
        min_args: 0,
        max_args: 0,
    },
    CommandInfo {
        name: "read",
        syntax: "read <source> [<destination>]",
        description: "Read <source> from the disk image and copy it into <destination> in\n\
                      the file system.  If <destination> is not specified, copy it into a\n\
                      file with the same name as <source>.  A <destination> of `-' prints\n\
                      the file.",
        min_args: 1,
        max_args: 2,
    },
    CommandInfo {
        name: "rename",
        syntax: "rename <oldname> <newname>",
        description: "Rename <oldname> into <newname>.  The files must be on the same drive.",
        min_args: 2,
        max_args: 2,
    },
    CommandInfo {
        name: "unit",
        syntax: "unit <number>",
        description: "Make unit <number> the current unit.",
        min_args: 1,
        max_args: 1,
    },
    CommandInfo {
        name: "unlynx",
        syntax: "unlynx <lynxname> [<unit>]",
        description: "Extract the specified Lynx image file into the specified unit (default\n\
                      is the current unit).",
        min_args: 1,
        max_args: 2,
    },
    CommandInfo {
        name: "validate",
        syntax: "validate [<unit>]",
        description: "Validate the disk in unit <unit>.  If <unit> is not specified, validate\n\
                      the disk in the current unit.",
        min_args: 0,
        max_args: 1,
    },
    CommandInfo {
        name: "verbose",
        syntax: "verbose",
        description: "Enable verbose output.",
        min_args: 0,
        max_args: 0,
    },
    CommandInfo {
        name: "write",
        syntax: "write <source> [<destination>]",
        description: "Write <source> from the file system into <destination> on a disk image.",
        min_args: 1,
        max_args: 2,
    },
    CommandInfo {
        name: "zcreate",
        syntax: "zcreate <d64name> <zipname> [<label,id>]",
        description: "Create a D64 disk image out of a set of four Zipcoded files named\n\
                      `1!<zipname>', `2!<zipname>', `3!<zipname>' and `4!<zipname>'.",
        min_args: 2,
        max_args: 3,
    },
];

/// Find a command by name or by an unambiguous prefix of its name.
pub fn lookup(name: &str) -> Result<&'static CommandInfo, ToolError> {
    if let Some(command) = COMMANDS.iter().find(|c| c.name == name) {
        return Ok(command);
    }
    let mut candidates = COMMANDS.iter().filter(|c| c.name.starts_with(name));
    match (candidates.next(), candidates.next()) {
        (Some(command), None) if !name.is_empty() => Ok(command),
        (Some(_), Some(_)) => Err(ToolError::Usage(format!("Command `{}' is ambiguous.", name))),
        _ => Err(ToolError::Usage(format!("Unknown command `{}'.", name))),
    }
}

/// Split a command line into words.  Double quotes group words, and a
/// backslash takes the next character literally.
pub fn split_args(line: &str) -> Result<Vec<String>, ToolError> {
    let mut args = vec![];
    let mut current: Option<String> = None;
    let mut quoted = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().unwrap_or('\\');
                current.get_or_insert_with(String::new).push(escaped);
            }
            '"' => {
                quoted = !quoted;
                current.get_or_insert_with(String::new);
            }
            c if c.is_whitespace() && !quoted => {
                if let Some(word) = current.take() {
                    args.push(word);
                }
            }
            c => current.get_or_insert_with(String::new).push(c),
        }
    }
    if quoted {
        return Err(ToolError::Usage("Unbalanced quotes.".to_string()));
    }
    args.extend(current);
    Ok(args)
}

/// Split an `@<unit>:` prefix off a file argument.  `@9:` alone names the
/// drive only, giving an empty name.
fn split_unit(arg: &str) -> Result<(Option<usize>, &str), ToolError> {
    if let Some(rest) = arg.strip_prefix('@') {
        if let Some(colon) = rest.find(':') {
            let unit = &rest[..colon];
            if !unit.is_empty() && unit.bytes().all(|c| c.is_ascii_digit()) {
                return Ok((Some(unit_index(unit)?), &rest[colon + 1..]));
            }
        }
    }
    Ok((None, arg))
}

fn unit_index(arg: &str) -> Result<usize, ToolError> {
    match util::parse_number(arg) {
        Some(unit) if unit >= FIRST_UNIT as u32 && unit < FIRST_UNIT as u32 + UNIT_COUNT as u32 => {
            Ok((unit - FIRST_UNIT as u32) as usize)
        }
        _ => Err(ToolError::BadDev),
    }
}

fn is_valid_cbm_name(name: &str) -> bool {
    !name.contains(':')
}

fn petscii(text: &str) -> Vec<u8> {
    Petscii::from(text).as_bytes().to_vec()
}

/// The option letter that writes a file of the given type.
fn type_option(file_type: FileType) -> u8 {
    match file_type {
        FileType::Seq => b'S',
        FileType::Usr => b'U',
        _ => b'P',
    }
}

/// Split `name,id` at the last comma, with the ID reduced to its first two
/// characters.
fn split_label(label: &str) -> Result<(Vec<u8>, Option<[u8; 2]>), ToolError> {
    match label.rfind(',') {
        Some(comma) => {
            let id = petscii(&label[comma + 1..]);
            if id.len() < 2 {
                return Err(ToolError::BadVal);
            }
            Ok((petscii(&label[..comma]), Some([id[0], id[1]])))
        }
        None => Ok((petscii(label), None)),
    }
}

fn track_sector(track: &str, sector: &str) -> Result<(u8, u8), ToolError> {
    match (util::parse_number(track), util::parse_number(sector)) {
        (Some(t), Some(s)) if t <= 0xff && s <= 0xff => Ok((t as u8, s as u8)),
        _ => Err(ToolError::BadTs),
    }
}

/// A running tool session.
pub struct Session<W: Write> {
    drives: [VirtualDrive; UNIT_COUNT],
    current: usize,
    host_dir: PathBuf,
    out: W,
}

impl<W: Write> Session<W> {
    /// A session with no images attached, printing to `out`.  Host files
    /// are taken relative to the working directory.
    pub fn new(out: W) -> Session<W> {
        Session {
            drives: std::array::from_fn(|i| VirtualDrive::new(FIRST_UNIT + i as u8, 0)),
            current: 0,
            host_dir: PathBuf::new(),
            out,
        }
    }

    /// Resolve host file names against `dir` instead.
    pub fn set_host_dir<P: AsRef<Path>>(&mut self, dir: P) {
        self.host_dir = dir.as_ref().to_path_buf();
    }

    pub fn current_unit(&self) -> u8 {
        FIRST_UNIT + self.current as u8
    }

    pub fn drive(&self, unit: u8) -> Option<&VirtualDrive> {
        self.drives.get(unit.checked_sub(FIRST_UNIT)? as usize)
    }

    pub fn drive_mut(&mut self, unit: u8) -> Option<&mut VirtualDrive> {
        self.drives.get_mut(unit.checked_sub(FIRST_UNIT)? as usize)
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Attach an image file, falling back to read-only access when the file
    /// cannot be written.
    pub fn attach<P: AsRef<Path>>(&mut self, path: P, unit: u8) -> Result<(), ToolError> {
        let index = unit_index(&unit.to_string())?;
        let path = self.host_path(path);
        let image = match DiskImage::open(&path, None, false) {
            Err(ref e) if e.kind() == io::ErrorKind::PermissionDenied => {
                info!("{} is not writable; attaching read-only", path.display());
                DiskImage::open(&path, None, true)
            }
            result => result,
        }
        .map_err(ToolError::from_image)?;
        self.drives[index].attach(image).map_err(ToolError::from_image)
    }

    /// Split a line into words and execute it.
    pub fn execute_line(&mut self, line: &str) -> Result<Flow, ToolError> {
        let mut args = split_args(line)?;
        if args.is_empty() {
            return Ok(Flow::Continue);
        }
        // `@cmd` is short for `@ cmd`.
        if args[0].len() > 1 && args[0].starts_with('@') {
            let command = args[0][1..].to_string();
            args[0].truncate(1);
            args.insert(1, command);
        }
        self.execute(&args)
    }

    /// Execute a command given as its name followed by its arguments.
    pub fn execute(&mut self, args: &[String]) -> Result<Flow, ToolError> {
        let (name, args) = match args.split_first() {
            Some((name, args)) => (name, args),
            None => return Ok(Flow::Continue),
        };
        let command = lookup(name)?;
        if args.len() < command.min_args || args.len() > command.max_args {
            return Err(ToolError::Usage(format!(
                "Wrong number of arguments.\nSyntax: {}",
                command.syntax
            )));
        }
        debug!("command {} {:?}", command.name, args);
        match command.name {
            "@" => self.raw(args),
            "?" | "help" => self.help(args),
            "attach" => self.attach_cmd(args),
            "bcopy" => self.bcopy(args),
            "bfill" => self.bfill(args),
            "block" => self.block(args),
            "bread" => self.bread(args),
            "bwrite" => self.bwrite(args),
            "copy" => self.copy(args),
            "delete" => self.delete(args),
            "detach" => self.detach(args),
            "dir" | "list" => self.list(args),
            "exit" | "quit" => return self.quit(),
            "extract" => self.extract(args),
            "format" => self.format(args),
            "info" => self.info(args),
            "name" => self.name(args),
            "read" => self.read(args),
            "rename" => self.rename(args),
            "unit" => self.unit(args),
            "unlynx" => self.unlynx(args),
            "validate" => self.validate(args),
            "verbose" => self.verbose(),
            "write" => self.write(args),
            "zcreate" => self.zcreate(args),
            _ => Err(ToolError::Usage(format!("Unknown command `{}'.", name))),
        }?;
        Ok(Flow::Continue)
    }

    fn host_path<P: AsRef<Path>>(&self, name: P) -> PathBuf {
        self.host_dir.join(name)
    }

    /// The unit given by an optional argument, or the current one.
    fn unit_arg(&self, arg: Option<&String>) -> Result<usize, ToolError> {
        arg.map_or(Ok(self.current), |a| unit_index(a))
    }

    fn ready(&mut self, index: usize) -> Result<&mut VirtualDrive, ToolError> {
        let drive = &mut self.drives[index];
        if drive.is_attached() {
            Ok(drive)
        } else {
            Err(ToolError::NotReady)
        }
    }

    /// Run a DOS command, failing on an error status.
    fn dos_command(&mut self, index: usize, command: &[u8]) -> Result<DosStatus, ToolError> {
        let status = self.ready(index)?.execute_command(command);
        if status.code.code() >= 20 {
            Err(ToolError::Dos(status.code))
        } else {
            Ok(status)
        }
    }

    fn read_block(&mut self, index: usize, track: u8, sector: u8) -> Result<Vec<u8>, ToolError> {
        let drive = self.ready(index)?;
        let image = drive.image().ok_or(ToolError::NotReady)?;
        image.check_sector(track, sector).map_err(|_| ToolError::BadTs)?;
        let mut block = vec![0u8; BLOCK_SIZE];
        drive.read_sector(track, sector, &mut block).map_err(|code| {
            debug!("cannot read track {} sector {}: {}", track, sector, code);
            ToolError::RdErr
        })?;
        Ok(block)
    }

    fn write_block(
        &mut self,
        index: usize,
        track: u8,
        sector: u8,
        block: &[u8],
    ) -> Result<(), ToolError> {
        let drive = self.ready(index)?;
        let image = drive.image().ok_or(ToolError::NotReady)?;
        image.check_sector(track, sector).map_err(|_| ToolError::BadTs)?;
        drive.write_sector(track, sector, block).map_err(|code| match code {
            DosCode::WriteProtect => ToolError::Dos(code),
            _ => ToolError::WrtErr,
        })
    }

    fn raw(&mut self, args: &[String]) -> Result<(), ToolError> {
        let index = self.current;
        let drive = self.ready(index)?;
        let status = match args.first() {
            Some(command) => drive.execute_command(&petscii(command)),
            None => drive.status(),
        };
        writeln!(self.out, "{}", status.line().trim_end())?;
        Ok(())
    }

    fn help(&mut self, args: &[String]) -> Result<(), ToolError> {
        match args.first() {
            None => {
                writeln!(self.out, "Available commands are:")?;
                for command in COMMANDS {
                    writeln!(self.out, "  {}", command.syntax)?;
                }
            }
            Some(name) => {
                let command = lookup(name)?;
                writeln!(self.out, "Syntax: {}\n{}", command.syntax, command.description)?;
            }
        }
        Ok(())
    }

    fn attach_cmd(&mut self, args: &[String]) -> Result<(), ToolError> {
        let index = self.unit_arg(args.get(1))?;
        self.attach(&args[0], FIRST_UNIT + index as u8)
    }

    fn detach(&mut self, args: &[String]) -> Result<(), ToolError> {
        let index = self.unit_arg(args.first())?;
        if let Some(image) = self.drives[index].detach() {
            image.close()?;
        }
        Ok(())
    }

    fn block(&mut self, args: &[String]) -> Result<(), ToolError> {
        let (track, sector) = track_sector(&args[0], &args[1])?;
        let disp = match args.get(2) {
            Some(disp) => match util::parse_number(disp) {
                Some(d) if (d as usize) < BLOCK_SIZE => d as usize,
                _ => return Err(ToolError::BadVal),
            },
            None => 0,
        };
        let index = self.unit_arg(args.get(3))?;
        let block = self.read_block(index, track, sector)?;
        writeln!(self.out, "<{:2}: {:2} {:2}>", FIRST_UNIT as usize + index, track, sector)?;
        writeln!(self.out, "{}", util::hex_from(&block, disp))?;
        Ok(())
    }

    fn bread(&mut self, args: &[String]) -> Result<(), ToolError> {
        let (track, sector) = track_sector(&args[1], &args[2])?;
        let index = self.unit_arg(args.get(3))?;
        let block = self.read_block(index, track, sector)?;
        fs::write(self.host_path(&args[0]), &block).map_err(|e| {
            debug!("{}: {}", args[0], e);
            ToolError::NotWrt
        })?;
        Ok(())
    }

    fn bwrite(&mut self, args: &[String]) -> Result<(), ToolError> {
        let (track, sector) = track_sector(&args[1], &args[2])?;
        let index = self.unit_arg(args.get(3))?;
        let mut block = fs::read(self.host_path(&args[0])).map_err(|e| {
            debug!("{}: {}", args[0], e);
            ToolError::NotRd
        })?;
        block.resize(BLOCK_SIZE, 0);
        self.write_block(index, track, sector, &block)
    }

    fn bfill(&mut self, args: &[String]) -> Result<(), ToolError> {
        let (track, sector) = track_sector(&args[0], &args[1])?;
        let value = match util::parse_number(&args[2]) {
            Some(v) if v <= 0xff => v as u8,
            _ => return Err(ToolError::BadVal),
        };
        let index = self.unit_arg(args.get(3))?;
        self.write_block(index, track, sector, &[value; BLOCK_SIZE])
    }

    fn bcopy(&mut self, args: &[String]) -> Result<(), ToolError> {
        let (track, sector) = track_sector(&args[0], &args[1])?;
        let (to_track, to_sector) = track_sector(&args[2], &args[3])?;
        let index = self.unit_arg(args.get(4))?;
        let block = self.read_block(index, track, sector)?;
        self.write_block(index, to_track, to_sector, &block)
    }

    /// Look up a file's directory entry.
    fn entry(&mut self, index: usize, name: &[u8]) -> Result<DirEntry, ToolError> {
        let pattern = Pattern {
            name: name.to_vec(),
            file_type: None,
        };
        self.ready(index)?
            .find(&pattern)?
            .ok_or(ToolError::Dos(DosCode::FileNotFound))
    }

    fn copy(&mut self, args: &[String]) -> Result<(), ToolError> {
        let (sources, destination) = args.split_at(args.len() - 1);
        let (dest_unit, dest_name) = split_unit(&destination[0])?;
        let dest_index = dest_unit.unwrap_or(self.current);
        let dest_name = if dest_name.is_empty() && dest_unit.is_some() {
            None
        } else {
            Some(dest_name)
        };
        if dest_name.is_some() && sources.len() > 1 {
            return Err(ToolError::Usage(
                "The destination must be a drive if multiple sources are specified.".to_string(),
            ));
        }
        if let Some(name) = dest_name {
            if !is_valid_cbm_name(name) {
                writeln!(self.out, "`{}' is not a valid CBM DOS file name.", name)?;
                return Err(ToolError::BadName);
            }
        }
        self.ready(dest_index)?;

        for source in sources {
            let (src_unit, src_name) = split_unit(source)?;
            let src_index = src_unit.unwrap_or(self.current);
            if !is_valid_cbm_name(src_name) {
                writeln!(self.out, "`{}' is not a valid CBM DOS file name: ignored.", src_name)?;
                continue;
            }
            let entry = self.entry(src_index, &petscii(src_name))?;
            let data = match self.ready(src_index)?.read_file(entry.name.as_bytes()) {
                Ok(data) => data,
                Err(code) => {
                    writeln!(self.out, "Cannot read `{}'.", src_name)?;
                    debug!("{}: {}", src_name, code);
                    return Err(ToolError::RdErr);
                }
            };
            let mut name = match dest_name {
                Some(name) => petscii(name),
                None => entry.name.as_bytes().to_vec(),
            };
            name.extend_from_slice(&[b',', type_option(entry.file_type)]);
            writeln!(self.out, "Copying `{}'...", source)?;
            self.ready(dest_index)?.write_file(&name, &data)?;
        }
        Ok(())
    }

    fn delete(&mut self, args: &[String]) -> Result<(), ToolError> {
        self.ready(self.current)?;
        for arg in args {
            let (unit, name) = split_unit(arg)?;
            let index = unit.unwrap_or(self.current);
            if !is_valid_cbm_name(name) {
                writeln!(self.out, "`{}' is not a valid CBM DOS file name: ignored.", name)?;
                continue;
            }
            let mut command = b"S:".to_vec();
            command.extend(petscii(name));
            writeln!(self.out, "Deleting `{}' on unit {}.", name, FIRST_UNIT as usize + index)?;
            let status = self.ready(index)?.execute_command(&command);
            writeln!(self.out, "{}", status.line().trim_end())?;
        }
        Ok(())
    }

    fn list(&mut self, args: &[String]) -> Result<(), ToolError> {
        let (index, pattern) = match args.first() {
            Some(arg) => {
                let (unit, pattern) = split_unit(arg)?;
                (unit.unwrap_or(self.current), pattern)
            }
            None => (self.current, ""),
        };
        let drive = self.ready(index)?;
        let entries = drive.entries()?;
        let name = drive.disk_name().unwrap_or_default();
        let id = Petscii::from_bytes(&drive.disk_id().unwrap_or_default());
        let version = Petscii::from_bytes(&drive.bam().map(|b| b.dos_version()).unwrap_or_default());
        let blocks_free = drive.blocks_free();

        writeln!(self.out, "0 {:18} {} {}", format!("\"{}\"", name), id, version)?;
        if entries.is_empty() {
            writeln!(self.out, "Empty image")?;
        } else {
            let pattern = Pattern::parse(&petscii(pattern));
            for entry in entries.iter().filter(|e| pattern.matches(e)) {
                writeln!(self.out, "{}", entry)?;
            }
        }
        if let Some(blocks) = blocks_free {
            writeln!(self.out, "{} blocks free.", blocks)?;
        }
        Ok(())
    }

    fn quit(&mut self) -> Result<Flow, ToolError> {
        for drive in self.drives.iter_mut() {
            if let Some(image) = drive.detach() {
                image.close()?;
            }
        }
        Ok(Flow::Quit)
    }

    fn extract(&mut self, args: &[String]) -> Result<(), ToolError> {
        let index = self.unit_arg(args.first())?;
        let entries = self.ready(index)?.entries()?;
        for entry in entries {
            let extractable = matches!(
                entry.file_type,
                FileType::Seq | FileType::Prg | FileType::Usr
            );
            if !extractable || !entry.closed {
                continue;
            }
            let name = entry.name.to_string();
            writeln!(self.out, "{}", name)?;
            let data = match self.ready(index)?.read_file(entry.name.as_bytes()) {
                Ok(data) => data,
                Err(code) => {
                    writeln!(
                        self.out,
                        "Cannot open `{}' on unit {}: {}.",
                        name,
                        FIRST_UNIT as usize + index,
                        code
                    )?;
                    continue;
                }
            };
            let host_name = name.replace('/', "_");
            if let Err(e) = fs::write(self.host_path(&host_name), &data) {
                writeln!(self.out, "Cannot create file `{}': {}.", host_name, e)?;
            }
        }
        Ok(())
    }

    fn format(&mut self, args: &[String]) -> Result<(), ToolError> {
        let index = match args.len() {
            1 => self.current,
            2 => unit_index(&args[1])?,
            _ => {
                let image_type = ImageType::from_name(&args[1]).ok_or(ToolError::BadVal)?;
                let index = match args.get(3) {
                    Some(unit) => unit_index(unit)?,
                    None => 0,
                };
                let path = self.host_path(&args[2]);
                DiskImage::create(&path, image_type).map_err(ToolError::from_image)?;
                self.attach(&path, FIRST_UNIT + index as u8)?;
                index
            }
        };
        if !args[0].contains(',') {
            return Err(ToolError::Usage("There must be ID on the name.".to_string()));
        }
        writeln!(self.out, "Formatting in unit {}...", FIRST_UNIT as usize + index)?;
        let mut command = b"N:".to_vec();
        command.extend(petscii(&args[0]));
        self.dos_command(index, &command)?;
        Ok(())
    }

    fn info(&mut self, args: &[String]) -> Result<(), ToolError> {
        let index = self.unit_arg(args.first())?;
        let drive = self.ready(index)?;
        let format = drive.format().ok_or(ToolError::NotReady)?;
        let image = drive.image().ok_or(ToolError::NotReady)?;
        let error_block = if image.image_type().is_flux() {
            None
        } else {
            Some(image.has_error_info())
        };
        let tracks = image.tracks();
        let read_only = image.read_only();

        writeln!(self.out, "Description: None.")?;
        writeln!(self.out, "Disk Format: {}.", format.name())?;
        writeln!(self.out, "Tracks\t   : {}.", tracks)?;
        match error_block {
            Some(true) => writeln!(self.out, "Error Block present.")?,
            Some(false) => writeln!(self.out, "No Error Block.")?,
            None => {}
        }
        writeln!(self.out, "Write protect: {}.", if read_only { "On" } else { "Off" })?;
        Ok(())
    }

    fn name(&mut self, args: &[String]) -> Result<(), ToolError> {
        let index = self.unit_arg(args.get(1))?;
        let (name, id) = split_label(&args[0])?;
        self.ready(index)?.set_disk_label(&name, id)?;
        Ok(())
    }

    fn read(&mut self, args: &[String]) -> Result<(), ToolError> {
        let (unit, name) = split_unit(&args[0])?;
        let index = unit.unwrap_or(self.current);
        self.ready(index)?;
        if !is_valid_cbm_name(name) {
            writeln!(self.out, "`{}' is not a valid CBM DOS file name.", name)?;
            return Err(ToolError::BadName);
        }
        let entry = self.entry(index, &petscii(name))?;
        let data = match self.ready(index)?.read_file(entry.name.as_bytes()) {
            Ok(data) => data,
            Err(code) => {
                writeln!(self.out, "Cannot read `{}' on unit {}.", name, FIRST_UNIT as usize + index)?;
                return Err(code.into());
            }
        };
        match args.get(1).map(String::as_str) {
            Some("-") => self.out.write_all(&data)?,
            destination => {
                let destination = match destination {
                    Some(d) => d.to_string(),
                    None => entry.name.to_string(),
                };
                writeln!(self.out, "Reading file `{}' from unit {}.", name, FIRST_UNIT as usize + index)?;
                fs::write(self.host_path(&destination), &data).map_err(|e| {
                    debug!("{}: {}", destination, e);
                    ToolError::NotWrt
                })?;
            }
        }
        Ok(())
    }

    fn rename(&mut self, args: &[String]) -> Result<(), ToolError> {
        let (old_unit, old_name) = split_unit(&args[0])?;
        let (new_unit, new_name) = split_unit(&args[1])?;
        let old_index = old_unit.unwrap_or(self.current);
        let new_index = new_unit.unwrap_or(self.current);
        if old_index != new_index {
            return Err(ToolError::Usage(
                "The two files must be on the same drive.".to_string(),
            ));
        }
        if !is_valid_cbm_name(old_name) || !is_valid_cbm_name(new_name) {
            return Err(ToolError::BadName);
        }
        writeln!(
            self.out,
            "Renaming `{}' to `{}' on unit {}.",
            old_name,
            new_name,
            FIRST_UNIT as usize + old_index
        )?;
        let mut command = b"R:".to_vec();
        command.extend(petscii(new_name));
        command.push(b'=');
        command.extend(petscii(old_name));
        self.dos_command(old_index, &command)?;
        Ok(())
    }

    fn unit(&mut self, args: &[String]) -> Result<(), ToolError> {
        self.current = unit_index(&args[0])?;
        Ok(())
    }

    fn unlynx(&mut self, args: &[String]) -> Result<(), ToolError> {
        let index = self.unit_arg(args.get(1))?;
        self.ready(index)?;
        let archive = fs::read(self.host_path(&args[0])).map_err(|e| {
            debug!("{}: {}", args[0], e);
            ToolError::NotRd
        })?;
        for entry in lynx::parse(&archive)? {
            writeln!(
                self.out,
                "Writing file `{}' to unit {}.",
                entry.name,
                FIRST_UNIT as usize + index
            )?;
            let mut name = entry.name.as_bytes().to_vec();
            name.extend_from_slice(&[b',', type_option(entry.file_type)]);
            self.ready(index)?.write_file(&name, &entry.data)?;
        }
        Ok(())
    }

    fn validate(&mut self, args: &[String]) -> Result<(), ToolError> {
        let index = self.unit_arg(args.first())?;
        writeln!(self.out, "Validating in unit {}...", FIRST_UNIT as usize + index)?;
        self.ready(index)?.validate()?;
        Ok(())
    }

    fn verbose(&mut self) -> Result<(), ToolError> {
        log::set_max_level(LevelFilter::Debug);
        Ok(())
    }

    fn write(&mut self, args: &[String]) -> Result<(), ToolError> {
        let source = Path::new(&args[0]);
        let (unit, name) = match args.get(1) {
            Some(destination) => split_unit(destination)?,
            None => (None, ""),
        };
        let index = unit.unwrap_or(self.current);
        let name = if name.is_empty() {
            source
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or(ToolError::BadName)?
        } else {
            name
        };
        if !is_valid_cbm_name(name) {
            writeln!(self.out, "`{}' is not a valid CBM DOS file name.", name)?;
            return Err(ToolError::BadName);
        }
        self.ready(index)?;
        let data = fs::read(self.host_path(source)).map_err(|e| {
            debug!("{}: {}", source.display(), e);
            ToolError::NotRd
        })?;
        writeln!(
            self.out,
            "Writing file `{}' as `{}' to unit {}.",
            source.display(),
            name,
            FIRST_UNIT as usize + index
        )?;
        let mut cbm_name = petscii(name);
        cbm_name.extend_from_slice(b",P");
        self.ready(index)?.write_file(&cbm_name, &data)?;
        Ok(())
    }

    fn zcreate(&mut self, args: &[String]) -> Result<(), ToolError> {
        let sectors = zipcode::load(&self.host_path(&args[1]))?;
        let label = args.get(2).map(|l| split_label(l)).transpose()?;
        let path = self.host_path(&args[0]);
        DiskImage::create(&path, ImageType::D64).map_err(ToolError::from_image)?;
        let index = self.current;
        self.attach(&path, FIRST_UNIT + index as u8)?;
        writeln!(self.out, "Copying blocks to image...")?;
        for sector in &sectors {
            self.write_block(index, sector.track, sector.sector, &sector.data)?;
        }
        self.dos_command(index, b"I")?;
        if let Some((name, id)) = label {
            self.ready(index)?.set_disk_label(&name, id)?;
        }
        Ok(())
    }
}
