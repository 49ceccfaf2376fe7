use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use cbmdisk::attach::{AttachConfig, AttachError, AttachManager, DeviceKind, Hooks};
use cbmdisk::disk::{DiskError, DiskImage, ImageType, BLOCK_SIZE};
use cbmdisk::drive::DriveModel;
use cbmdisk::tool::{Flow, Session, ToolError};
use cbmdisk::vdrive::{DosCode, FileType, Pattern, VirtualDrive};
use cbmdisk::Petscii;
use rand::{Rng, XorShiftRng};

const ITERATIONS: usize = 3;
const OPERATIONS_PER_IMAGE: usize = 200;
const MIN_FILE_SIZE: usize = 1;
const MAX_FILE_SIZE: usize = 8 * 1024;
const MAX_LIVE_FILES: usize = 40;
const DELETE_CHANCE: f32 = 0.33;
const ADD_CHANCE: f32 = 0.66;
const RNG_SEED: [u8; 16] = [
    0x04, 0xC1, 0x1D, 0xB7, 0x1E, 0xDC, 0x6F, 0x41, 0x74, 0x1B, 0x8C, 0xD7, 0x32, 0x58, 0x34, 0x99,
];

const CONTENT_BYTES_PER_BLOCK: usize = 254;

static IMAGE_TYPES: &[(ImageType, u32)] = &[
    (ImageType::D64, 664),
    (ImageType::D71, 1328),
    (ImageType::D81, 3160),
];

fn deterministic_rng() -> XorShiftRng {
    rand::SeedableRng::from_seed(RNG_SEED)
}

/// Letters and digits only, so that no name is mistaken for a pattern or
/// carries options.
fn random_name(rng: &mut impl Rng) -> Petscii {
    const MIN_NAME_SIZE: usize = 1;
    const MAX_NAME_SIZE: usize = 16;
    static ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let name_size = rng.gen_range(MIN_NAME_SIZE, MAX_NAME_SIZE + 1);
    let bytes: Vec<u8> = (0..name_size)
        .map(|_| ALPHABET[rng.gen_range(0, ALPHABET.len())])
        .collect();
    Petscii::from_bytes(&bytes)
}

fn random_file_type(rng: &mut impl Rng) -> FileType {
    static LINEAR_FILE_TYPES: &[FileType] = &[FileType::Prg, FileType::Seq, FileType::Usr];
    LINEAR_FILE_TYPES[rng.gen_range(0, LINEAR_FILE_TYPES.len())]
}

fn type_option(file_type: FileType) -> &'static [u8] {
    match file_type {
        FileType::Seq => b",S",
        FileType::Usr => b",U",
        _ => b",P",
    }
}

fn formatted_drive(rng: &mut impl Rng, image_type: ImageType) -> VirtualDrive {
    let mut drive = VirtualDrive::new(8, 0);
    drive.attach(DiskImage::memory(image_type).unwrap()).unwrap();
    let name = random_name(rng);
    let mut id = [0u8; 2];
    rng.fill(&mut id);
    drive.format_disk(name.as_bytes(), Some(id)).unwrap();
    drive
}

struct RandomFile {
    name: Petscii,
    file_type: FileType,
    contents: Vec<u8>,
}

impl RandomFile {
    fn new(rng: &mut XorShiftRng, taken: &HashSet<Petscii>) -> RandomFile {
        let name = loop {
            let name = random_name(rng);
            if !taken.contains(&name) {
                break name;
            }
        };
        let size: usize = rng.gen_range(MIN_FILE_SIZE, MAX_FILE_SIZE);
        let file_type = random_file_type(rng);
        let mut contents = vec![0u8; size];
        rng.fill(&mut contents[..]);
        RandomFile {
            name,
            file_type,
            contents,
        }
    }

    fn blocks(&self) -> usize {
        (self.contents.len() + CONTENT_BYTES_PER_BLOCK - 1) / CONTENT_BYTES_PER_BLOCK
    }

    fn write(&self, drive: &mut VirtualDrive) -> Result<(), DosCode> {
        let mut name = self.name.as_bytes().to_vec();
        name.extend_from_slice(type_option(self.file_type));
        drive.write_file(&name, &self.contents)
    }

    fn verify(&self, drive: &mut VirtualDrive) {
        assert_eq!(drive.read_file(self.name.as_bytes()).unwrap(), self.contents);

        let pattern = Pattern {
            name: self.name.as_bytes().to_vec(),
            file_type: None,
        };
        let entry = drive.find(&pattern).unwrap().unwrap();
        assert_eq!(entry.name, self.name);
        assert_eq!(entry.blocks, self.blocks() as u16);
        assert_eq!(entry.file_type, self.file_type);
        assert!(!entry.locked);
        assert!(entry.closed);
    }
}

impl fmt::Debug for RandomFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "RandomFile {{ name: {:?}, size: {}, file_type: {} }}",
            self.name,
            self.contents.len(),
            self.file_type
        )
    }
}

fn verify_disk_state(drive: &VirtualDrive, total_blocks: u32, files: &[RandomFile]) {
    let blocks_written: usize = files.iter().map(|f| f.blocks()).sum();
    assert_eq!(drive.blocks_free(), Some(total_blocks - blocks_written as u32));
    assert_eq!(drive.entries().unwrap().len(), files.len());
}

/// Directory and BAM stay consistent through random writes and scratches,
/// through validation, and across a detach and re-attach.
#[test]
fn directory_and_bam_consistency() {
    let mut rng = deterministic_rng();

    for i in 0..ITERATIONS {
        for &(image_type, total_blocks) in IMAGE_TYPES {
            println!("Iteration: {} image type: {:?}", i, image_type);

            let mut drive = formatted_drive(&mut rng, image_type);
            assert!(drive.entries().unwrap().is_empty());
            assert_eq!(drive.blocks_free(), Some(total_blocks));

            let mut written_files: Vec<RandomFile> = vec![];
            for _ in 0..OPERATIONS_PER_IMAGE {
                if rng.gen::<f32>() < ADD_CHANCE && written_files.len() < MAX_LIVE_FILES {
                    let taken = written_files.iter().map(|f| f.name.clone()).collect();
                    let random_file = RandomFile::new(&mut rng, &taken);
                    if random_file.blocks() as u32 > drive.blocks_free().unwrap() {
                        continue;
                    }
                    random_file.write(&mut drive).unwrap();
                    random_file.verify(&mut drive);
                    written_files.push(random_file);
                    verify_disk_state(&drive, total_blocks, &written_files);
                }

                if rng.gen::<f32>() < DELETE_CHANCE && !written_files.is_empty() {
                    let target_index = rng.gen_range(0, written_files.len());
                    let target = written_files.remove(target_index);
                    assert_eq!(drive.scratch(target.name.as_bytes()), Ok(1));
                    verify_disk_state(&drive, total_blocks, &written_files);
                }
            }

            drive.validate().unwrap();
            verify_disk_state(&drive, total_blocks, &written_files);

            // Write, close, and read back through a fresh attach.
            let image = drive.detach().unwrap();
            let mut drive = VirtualDrive::new(8, 0);
            drive.attach(image).unwrap();
            for file in &written_files {
                file.verify(&mut drive);
            }
            verify_disk_state(&drive, total_blocks, &written_files);

            for file in written_files.drain(..) {
                assert_eq!(drive.scratch(file.name.as_bytes()), Ok(1));
            }
            verify_disk_state(&drive, total_blocks, &written_files);
        }
    }
}

fn new_image(dir: &Path, name: &str, image_type: ImageType) -> std::path::PathBuf {
    let path = dir.join(name);
    DiskImage::create(&path, image_type).unwrap();
    path
}

fn manager() -> AttachManager {
    AttachManager::new(AttachConfig::default(), Hooks::default())
}

#[test]
fn scenario_write_detach_reattach() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_image(dir.path(), "work.d64", ImageType::D64);
    let mut contents = vec![0u8; 1000];
    deterministic_rng().fill(&mut contents[..]);

    let mut manager = manager();
    manager.attach_disk(8, 0, &path).unwrap();
    {
        let drive = manager.vdrive_mut(8, 0).unwrap();
        drive.format_disk(b"SCENARIO", Some(*b"SA")).unwrap();
        drive.write_file(b"DATA FILE", &contents).unwrap();
    }
    manager.detach_disk(8, 0).unwrap();
    assert!(manager.vdrive(8, 0).map_or(true, |d| !d.is_attached()));

    manager.attach_disk(8, 0, &path).unwrap();
    let drive = manager.vdrive_mut(8, 0).unwrap();
    assert_eq!(drive.read_file(b"DATA FILE").unwrap(), contents);
    assert_eq!(drive.disk_id(), Some(*b"SA"));
}

#[test]
fn scenario_incompatible_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strange.d64");
    fs::write(&path, vec![0u8; 1000]).unwrap();

    let mut config = AttachConfig::default();
    config.unit_mut(9).unwrap().device_kind = DeviceKind::None;
    let mut manager = AttachManager::new(config, Hooks::default());
    match manager.attach_disk(9, 0, &path) {
        Err(AttachError::Io(ref e)) => {
            assert_eq!(e, &DiskError::UnknownFormat);
            assert_eq!(e.to_string(), "incompatible image");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(manager.device_kind(9), Some(DeviceKind::None));
    assert!(manager.image(9, 0).is_none());
    assert!(manager.disk_name(9, 0).is_none());
}

#[test]
fn scenario_empty_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.d64");
    fs::write(&path, b"").unwrap();

    let mut manager = manager();
    match manager.attach_disk(8, 0, &path) {
        Err(AttachError::Io(ref e)) => assert_eq!(e.to_string(), "incompatible image"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(manager.image(8, 0).is_none());

    let mut session = Session::new(vec![]);
    session.set_host_dir(dir.path());
    assert!(matches!(session.attach("empty.d64", 8), Err(ToolError::BadImage)));
}

#[test]
fn scenario_incompatible_drive_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_image(dir.path(), "flux.g64", ImageType::G64);

    let mut manager = manager();
    manager.set_drive_model(8, 0, DriveModel::Cbm1581).unwrap();
    manager.set_true_drive_emulation(8, true).unwrap();
    manager.attach_disk(8, 0, &path).unwrap();
    assert!(manager.image(8, 0).is_some());
    assert!(manager.drive_context(8, 0).unwrap().bound().is_none());
}

#[test]
fn read_only_leaves_backing_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_image(dir.path(), "locked.d64", ImageType::D64);

    let mut manager = manager();
    manager.attach_disk(8, 0, &path).unwrap();
    {
        let drive = manager.vdrive_mut(8, 0).unwrap();
        drive.format_disk(b"LOCKED", Some(*b"RO")).unwrap();
        drive.write_file(b"KEEP", b"original").unwrap();
    }
    manager.detach_disk(8, 0).unwrap();
    let before = fs::read(&path).unwrap();

    manager.set_read_only(8, 0, true).unwrap();
    manager.attach_disk(8, 0, &path).unwrap();
    assert!(manager.image(8, 0).unwrap().read_only());
    {
        let drive = manager.vdrive_mut(8, 0).unwrap();
        assert_eq!(drive.write_sector(1, 0, &[0x55; BLOCK_SIZE]), Err(DosCode::WriteProtect));
        assert_eq!(drive.write_file(b"NEW", b"rejected"), Err(DosCode::WriteProtect));
        assert_eq!(drive.scratch(b"KEEP"), Err(DosCode::WriteProtect));
        assert_eq!(drive.read_file(b"KEEP").unwrap(), b"original");
    }
    manager.detach_disk(8, 0).unwrap();

    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn flux_detach_flush() {
    let dir = tempfile::tempdir().unwrap();
    let modified = new_image(dir.path(), "modified.g64", ImageType::G64);
    let untouched = new_image(dir.path(), "untouched.g64", ImageType::G64);
    let original = fs::read(&untouched).unwrap();

    let mut manager = manager();
    manager.attach_disk(8, 0, &modified).unwrap();
    manager.attach_disk(9, 0, &untouched).unwrap_or_else(|e| panic!("{}", e));
    let block: Vec<u8> = (0..BLOCK_SIZE).map(|i| (i * 7) as u8).collect();
    manager
        .vdrive_mut(8, 0)
        .unwrap()
        .write_sector(17, 3, &block)
        .unwrap();
    let mut buffer = [0u8; BLOCK_SIZE];
    manager
        .vdrive_mut(9, 0)
        .unwrap()
        .read_sector(17, 3, &mut buffer)
        .unwrap();
    manager.detach_all().unwrap();

    let image = DiskImage::open(&modified, None, true).unwrap();
    assert!(image.read_sector(17, 3, &mut buffer).unwrap().is_ok());
    assert_eq!(&buffer[..], &block[..]);
    assert_eq!(fs::read(&untouched).unwrap(), original);
}

#[test]
fn exclusive_attach_across_units() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_image(dir.path(), "shared.d71", ImageType::D71);

    let mut manager = manager();
    manager.attach_disk(8, 1, &path).unwrap();
    match manager.attach_disk(10, 0, dir.path().join(".").join("shared.d71")) {
        Err(AttachError::AlreadyMounted { unit, drive, .. }) => assert_eq!((unit, drive), (8, 1)),
        other => panic!("unexpected {:?}", other),
    }
    manager.attach_disk(8, 1, &path).unwrap();
    manager.detach_disk(8, 1).unwrap();
    manager.attach_disk(10, 0, &path).unwrap();
    assert_eq!(manager.disk_name(10, 0), Some(path.as_path()));
}

/// Encode a D64 image as the four parts of a Zipcode archive, using plain
/// sector records.
fn zipcode_parts(image: &DiskImage) -> [Vec<u8>; 4] {
    const PART_STARTS: [u8; 5] = [1, 9, 17, 26, 36];
    let mut parts: [Vec<u8>; 4] = Default::default();
    for (index, part) in parts.iter_mut().enumerate() {
        part.extend_from_slice(&[0x00, 0x04]);
        if index == 0 {
            part.extend_from_slice(&image.header_id().unwrap());
        }
        for track in PART_STARTS[index]..PART_STARTS[index + 1] {
            for sector in 0..ImageType::D64.sectors_in_track(track) {
                let mut block = [0u8; BLOCK_SIZE];
                image.read_sector(track, sector, &mut block).unwrap();
                part.push(track);
                part.push(sector);
                part.extend_from_slice(&block);
            }
        }
    }
    parts
}

#[test]
fn tool_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(vec![]);
    session.set_host_dir(dir.path());

    let mut contents = vec![0u8; 3000];
    deterministic_rng().fill(&mut contents[..]);
    fs::write(dir.path().join("program.prg"), &contents).unwrap();

    for line in &[
        "format \"tool disk,td\" d64 first.d64 8",
        "format \"other,ot\" d71 second.d71 9",
        "write program.prg",
        "copy program.prg @9:",
        "unit 9",
        "read program.prg back.prg",
        "delete @8:program.prg",
        "validate",
    ] {
        assert_eq!(session.execute_line(line).unwrap(), Flow::Continue, "{}", line);
    }
    assert_eq!(session.current_unit(), 9);
    assert_eq!(fs::read(dir.path().join("back.prg")).unwrap(), contents);
    assert!(session.drive(8).unwrap().entries().unwrap().is_empty());

    // Rebuild unit 9's disk from a Zipcode archive of it.
    let parts = {
        let mut drive = VirtualDrive::new(8, 0);
        drive.attach(DiskImage::memory(ImageType::D64).unwrap()).unwrap();
        drive.format_disk(b"ZIPPED", Some(*b"ZC")).unwrap();
        drive.write_file(b"INSIDE,S", &contents).unwrap();
        let parts = zipcode_parts(drive.image().unwrap());
        drive.detach();
        parts
    };
    for (index, part) in parts.iter().enumerate() {
        fs::write(dir.path().join(format!("{}!archive", index + 1)), part).unwrap();
    }
    session
        .execute_line("zcreate unpacked.d64 archive \"renamed,rn\"")
        .unwrap();
    let drive = session.drive_mut(9).unwrap();
    assert_eq!(drive.read_file(b"INSIDE").unwrap(), contents);
    assert_eq!(drive.disk_name(), Some(Petscii::from("renamed")));
    assert_eq!(drive.disk_id(), Some(*b"RN"));

    assert_eq!(session.execute_line("quit").unwrap(), Flow::Quit);
    let output = String::from_utf8(session.output().clone()).unwrap();
    assert!(output.contains("Formatting in unit 9...\n"));
    assert!(output.contains("Deleting `program.prg' on unit 8.\n01,FILES SCRATCHED,01,00\n"));
}
