//! The attach manager: the per-unit lifecycle of attached disk images.
//!
//! Units 8 through 11 each have two drive slots.  The manager decides what
//! kind of device answers at each unit, opens images and binds them to the
//! unit's virtual drive (and, with true drive emulation, to the emulated
//! mechanism), and keeps any one image file from being attached twice.
//! All transitions take `&mut self`, so no two can interleave.

pub mod config;
pub mod hooks;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use crate::disk::DiskImage;
use crate::drive::{DriveContext, DriveModel};
use crate::vdrive::{DosCode, VirtualDrive};

pub use self::config::{
    unit_index, AttachConfig, DeviceKind, UnitConfig, DRIVES_PER_UNIT, FIRST_UNIT, UNIT_COUNT,
};
pub use self::hooks::Hooks;

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("invalid unit {0}")]
    InvalidUnit(u8),
    #[error("invalid drive {0}")]
    InvalidDrive(u8),
    #[error("event playback is active")]
    PlaybackActive,
    #[error("{} is already attached to unit {unit} drive {drive}", .path.display())]
    AlreadyMounted { path: PathBuf, unit: u8, drive: u8 },
    #[error("unit {0} is a real device")]
    RealDevice(u8),
    #[error("drive status: {0}")]
    Dos(#[from] DosCode),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Everything the manager keeps for one unit.
pub struct UnitState {
    unit: u8,
    config: UnitConfig,
    drives: [VirtualDrive; DRIVES_PER_UNIT],
    contexts: [DriveContext; DRIVES_PER_UNIT],
    /// Canonical paths of the attached images.
    mounted: [Option<PathBuf>; DRIVES_PER_UNIT],
}

impl UnitState {
    fn new(unit: u8, config: UnitConfig) -> UnitState {
        UnitState {
            unit,
            config,
            drives: [VirtualDrive::new(unit, 0), VirtualDrive::new(unit, 1)],
            contexts: [
                DriveContext::new(unit, 0, config.drive_model[0]),
                DriveContext::new(unit, 1, config.drive_model[1]),
            ],
            mounted: [None, None],
        }
    }

    #[inline]
    pub fn unit(&self) -> u8 {
        self.unit
    }

    #[inline]
    pub fn config(&self) -> &UnitConfig {
        &self.config
    }

    fn is_mounted(&self) -> bool {
        self.mounted.iter().any(Option::is_some)
    }
}

pub struct AttachManager {
    units: [UnitState; UNIT_COUNT],
    hooks: Hooks,
}

impl AttachManager {
    pub fn new(config: AttachConfig, hooks: Hooks) -> AttachManager {
        let units = std::array::from_fn(|index| {
            UnitState::new(FIRST_UNIT + index as u8, config.units[index])
        });
        let mut manager = AttachManager { units, hooks };
        for index in 0..UNIT_COUNT {
            manager.publish_device_kind(index);
        }
        manager
    }

    /// The current settings of all units.
    pub fn config(&self) -> AttachConfig {
        let mut config = AttachConfig::default();
        for (unit_config, state) in config.units.iter_mut().zip(&self.units) {
            *unit_config = state.config;
        }
        config
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    pub fn unit(&self, unit: u8) -> Option<&UnitState> {
        unit_index(unit).map(|index| &self.units[index])
    }

    fn slot(&self, unit: u8, drive: u8) -> Result<(usize, usize), AttachError> {
        let index = unit_index(unit).ok_or(AttachError::InvalidUnit(unit))?;
        if drive as usize >= DRIVES_PER_UNIT {
            return Err(AttachError::InvalidDrive(drive));
        }
        Ok((index, drive as usize))
    }

    /// Tell the bus what the unit currently is.
    fn publish_device_kind(&mut self, index: usize) {
        let state = &self.units[index];
        if state.is_mounted() {
            self.hooks.bus.set_device_type(state.unit, DeviceKind::Virtual);
            self.hooks.bus.set_serial_hooks(state.unit, false);
        } else {
            let kind = state.config.device_kind;
            self.hooks.bus.set_device_type(state.unit, kind);
            self.hooks
                .bus
                .set_serial_hooks(state.unit, kind == DeviceKind::FileSystem);
        }
    }

    /// Release whatever is bound to a slot.  Modified tracks held by the
    /// drive mechanism are written back and the image is closed.  Returns
    /// whether anything was attached.
    fn unbind(&mut self, index: usize, drive: usize) -> bool {
        let clock = self.hooks.clock.now();
        let state = &mut self.units[index];
        if let Some(image) = state.drives[drive].image_mut() {
            if let Err(e) = state.contexts[drive].detach(image, clock) {
                warn!("unit {} drive {}: {}", state.unit, drive, e);
            }
        }
        if let Some(image) = state.drives[drive].detach() {
            if let Err(e) = image.close() {
                warn!("unit {} drive {}: closing image: {}", state.unit, drive, e);
            }
        }
        state.mounted[drive].take().is_some()
    }

    /// Change what answers on the bus at a unit.  Images attached to the
    /// unit are detached first.  If the real-device driver cannot be
    /// enabled, the unit falls back to the host filesystem.
    pub fn set_device_kind(&mut self, unit: u8, kind: DeviceKind) -> Result<(), AttachError> {
        let index = unit_index(unit).ok_or(AttachError::InvalidUnit(unit))?;
        let old = self.units[index].config.device_kind;
        if old == kind {
            return Ok(());
        }
        for drive in 0..DRIVES_PER_UNIT {
            if self.unbind(index, drive) {
                self.hooks.ui.display_image(unit, drive as u8, None);
            }
        }
        if old == DeviceKind::Real {
            self.hooks.real_device.disable();
        }
        let kind = match kind {
            DeviceKind::Real => match self.hooks.real_device.enable() {
                Ok(()) => kind,
                Err(e) => {
                    warn!(
                        "unit {}: cannot enable the real device ({}), using the filesystem instead",
                        unit, e
                    );
                    DeviceKind::FileSystem
                }
            },
            _ => kind,
        };
        self.units[index].config.device_kind = kind;
        self.publish_device_kind(index);
        info!("unit {}: device kind {} -> {}", unit, old, kind);
        Ok(())
    }

    /// Open an image file and attach it to a drive slot.
    ///
    /// Attaching the file that is already in the slot does nothing; a file
    /// attached anywhere else is refused.  If the file cannot be opened for
    /// writing, it is attached read-only.  The slot's previous image is
    /// detached only once the new one has opened successfully.
    pub fn attach_disk<P: AsRef<Path>>(
        &mut self,
        unit: u8,
        drive: u8,
        path: P,
    ) -> Result<(), AttachError> {
        let path = path.as_ref();
        if self.hooks.event_log.playback_active() {
            return Err(AttachError::PlaybackActive);
        }
        let (index, slot) = self.slot(unit, drive)?;
        if self.hooks.network.connected() {
            debug!("unit {}: forwarding attach of {}", unit, path.display());
            self.hooks.network.forward_attach(unit, drive, path);
            return Ok(());
        }
        if !self.units[index].config.device_kind.accepts_images() {
            return Err(AttachError::RealDevice(unit));
        }

        let canonical = fs::canonicalize(path)?;
        for state in &self.units {
            for (other, mounted) in state.mounted.iter().enumerate() {
                if mounted.as_ref() != Some(&canonical) {
                    continue;
                }
                if state.unit == unit && other == slot {
                    debug!("unit {} drive {}: {} already attached", unit, drive, path.display());
                    return Ok(());
                }
                return Err(AttachError::AlreadyMounted {
                    path: path.to_path_buf(),
                    unit: state.unit,
                    drive: other as u8,
                });
            }
        }

        let read_only = self.units[index].config.read_only[slot];
        let image = match DiskImage::open(path, None, read_only) {
            Ok(image) => image,
            Err(ref e) if !read_only && e.kind() == io::ErrorKind::PermissionDenied => {
                warn!("{}: not writable, attaching read-only", path.display());
                DiskImage::open(path, None, true)?
            }
            Err(e) => return Err(e.into()),
        };

        let bam = VirtualDrive::read_bam(&image)?;
        self.unbind(index, slot);
        let clock = self.hooks.clock.now();
        let state = &mut self.units[index];
        state.drives[slot].mount(image, bam);
        if state.config.true_drive_emulation {
            if let Some(image) = state.drives[slot].image() {
                if let Err(e) = state.contexts[slot].attach(image, clock) {
                    warn!("unit {} drive {}: drive emulation: {}", unit, drive, e);
                }
            }
        }
        let read_only = state.drives[slot].image().map_or(read_only, DiskImage::read_only);
        state.mounted[slot] = Some(canonical);

        self.publish_device_kind(index);
        self.hooks.ui.display_image(unit, drive, Some(path));
        self.hooks.event_log.record_attach(unit, drive, path, read_only);
        info!("unit {} drive {}: attached {}", unit, drive, path.display());
        Ok(())
    }

    /// Detach the image in a drive slot, if any.
    pub fn detach_disk(&mut self, unit: u8, drive: u8) -> Result<(), AttachError> {
        if self.hooks.event_log.playback_active() {
            return Err(AttachError::PlaybackActive);
        }
        let (index, slot) = self.slot(unit, drive)?;
        if self.hooks.network.connected() {
            self.hooks.network.forward_detach(unit, drive);
            return Ok(());
        }
        self.detach_slot(index, slot);
        Ok(())
    }

    /// Detach the images in every slot of every unit.
    pub fn detach_all(&mut self) -> Result<(), AttachError> {
        if self.hooks.event_log.playback_active() {
            return Err(AttachError::PlaybackActive);
        }
        for index in 0..UNIT_COUNT {
            for slot in 0..DRIVES_PER_UNIT {
                let unit = self.units[index].unit;
                if self.hooks.network.connected() {
                    self.hooks.network.forward_detach(unit, slot as u8);
                } else {
                    self.detach_slot(index, slot);
                }
            }
        }
        Ok(())
    }

    fn detach_slot(&mut self, index: usize, slot: usize) {
        let unit = self.units[index].unit;
        if self.unbind(index, slot) {
            self.hooks.ui.display_image(unit, slot as u8, None);
            info!("unit {} drive {}: detached", unit, slot);
        }
        self.publish_device_kind(index);
        self.hooks.event_log.record_detach(unit, slot as u8);
    }

    /// Change whether a slot attaches images read-only.  An attached image
    /// is detached and attached again under the new setting.
    pub fn set_read_only(&mut self, unit: u8, drive: u8, read_only: bool) -> Result<(), AttachError> {
        let (index, slot) = self.slot(unit, drive)?;
        if self.units[index].config.read_only[slot] == read_only {
            return Ok(());
        }
        let path = self.units[index].drives[slot]
            .image()
            .and_then(DiskImage::path)
            .map(Path::to_path_buf);
        let path = match path {
            Some(path) => path,
            None => {
                self.units[index].config.read_only[slot] = read_only;
                return Ok(());
            }
        };
        self.detach_disk(unit, drive)?;
        self.units[index].config.read_only[slot] = read_only;
        self.attach_disk(unit, drive, &path)
    }

    /// Select the drive model for a slot.  It takes effect at the next
    /// attach.
    pub fn set_drive_model(&mut self, unit: u8, drive: u8, model: DriveModel) -> Result<(), AttachError> {
        let (index, slot) = self.slot(unit, drive)?;
        let state = &mut self.units[index];
        state.config.drive_model[slot] = model;
        state.contexts[slot].set_model(model);
        Ok(())
    }

    pub fn set_true_drive_emulation(&mut self, unit: u8, enabled: bool) -> Result<(), AttachError> {
        let index = unit_index(unit).ok_or(AttachError::InvalidUnit(unit))?;
        self.units[index].config.true_drive_emulation = enabled;
        Ok(())
    }

    /// Release everything at exit.  Real devices are disabled and all
    /// images are detached without recording events.
    pub fn shutdown(&mut self) {
        for index in 0..UNIT_COUNT {
            if self.units[index].config.device_kind == DeviceKind::Real {
                self.hooks.real_device.disable();
            }
            for slot in 0..DRIVES_PER_UNIT {
                self.unbind(index, slot);
            }
        }
    }

    pub fn device_kind(&self, unit: u8) -> Option<DeviceKind> {
        self.unit(unit).map(|state| state.config.device_kind)
    }

    pub fn read_only(&self, unit: u8, drive: u8) -> Option<bool> {
        let (index, slot) = self.slot(unit, drive).ok()?;
        Some(self.units[index].config.read_only[slot])
    }

    pub fn vdrive(&self, unit: u8, drive: u8) -> Option<&VirtualDrive> {
        let (index, slot) = self.slot(unit, drive).ok()?;
        Some(&self.units[index].drives[slot])
    }

    pub fn vdrive_mut(&mut self, unit: u8, drive: u8) -> Option<&mut VirtualDrive> {
        let (index, slot) = self.slot(unit, drive).ok()?;
        Some(&mut self.units[index].drives[slot])
    }

    pub fn drive_context(&self, unit: u8, drive: u8) -> Option<&DriveContext> {
        let (index, slot) = self.slot(unit, drive).ok()?;
        Some(&self.units[index].contexts[slot])
    }

    pub fn drive_context_mut(&mut self, unit: u8, drive: u8) -> Option<&mut DriveContext> {
        let (index, slot) = self.slot(unit, drive).ok()?;
        Some(&mut self.units[index].contexts[slot])
    }

    pub fn image(&self, unit: u8, drive: u8) -> Option<&DiskImage> {
        self.vdrive(unit, drive)?.image()
    }

    /// The file name of the image attached to a slot.
    pub fn disk_name(&self, unit: u8, drive: u8) -> Option<&Path> {
        self.image(unit, drive)?.path()
    }

    pub fn bam_disk_id(&self, unit: u8, drive: u8) -> Option<[u8; 2]> {
        self.vdrive(unit, drive)?.disk_id()
    }

    pub fn set_bam_disk_id(&mut self, unit: u8, drive: u8, id: [u8; 2]) -> Result<(), AttachError> {
        let (index, slot) = self.slot(unit, drive)?;
        Ok(self.units[index].drives[slot].set_disk_id(id)?)
    }
}

impl Default for AttachManager {
    fn default() -> AttachManager {
        AttachManager::new(AttachConfig::default(), Hooks::default())
    }
}

impl Drop for AttachManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::disk::{DiskError, ImageType};
    use crate::vdrive::DosStatus;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder(Log);

    impl hooks::Ui for Recorder {
        fn display_image(&mut self, unit: u8, drive: u8, path: Option<&Path>) {
            let name = path.map_or(String::new(), |p| p.display().to_string());
            self.0.borrow_mut().push(format!("ui {}:{} {}", unit, drive, name));
        }
    }

    impl hooks::EventLog for Recorder {
        fn record_attach(&mut self, unit: u8, drive: u8, _path: &Path, read_only: bool) {
            self.0
                .borrow_mut()
                .push(format!("attach {}:{} ro={}", unit, drive, read_only));
        }

        fn record_detach(&mut self, unit: u8, drive: u8) {
            self.0.borrow_mut().push(format!("detach {}:{}", unit, drive));
        }
    }

    impl hooks::Bus for Recorder {
        fn set_device_type(&mut self, unit: u8, kind: DeviceKind) {
            self.0.borrow_mut().push(format!("type {} {}", unit, kind));
        }

        fn set_serial_hooks(&mut self, unit: u8, filesystem: bool) {
            self.0.borrow_mut().push(format!("hooks {} {}", unit, filesystem));
        }
    }

    struct Playback;

    impl hooks::EventLog for Playback {
        fn playback_active(&self) -> bool {
            true
        }
    }

    struct NoDriver;

    impl hooks::RealDevice for NoDriver {
        fn enable(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no driver"))
        }
    }

    fn formatted_image(dir: &Path, name: &str, image_type: ImageType) -> PathBuf {
        let path = dir.join(name);
        DiskImage::create(&path, image_type).unwrap();
        let mut drive = VirtualDrive::new(8, 0);
        drive
            .attach(DiskImage::open(&path, None, false).unwrap())
            .unwrap();
        drive.format_disk(b"TEST", Some(*b"01")).unwrap();
        drive.detach().unwrap().close().unwrap();
        path
    }

    #[test]
    fn test_attach_and_detach() {
        let dir = tempfile::tempdir().unwrap();
        let path = formatted_image(dir.path(), "a.d64", ImageType::D64);
        let log = Log::default();
        let mut hooks = Hooks::default();
        hooks.ui = Box::new(Recorder(log.clone()));
        hooks.event_log = Box::new(Recorder(log.clone()));
        let mut manager = AttachManager::new(AttachConfig::default(), hooks);

        manager.attach_disk(8, 0, &path).unwrap();
        assert_eq!(manager.disk_name(8, 0), Some(path.as_path()));
        assert_eq!(manager.bam_disk_id(8, 0), Some(*b"01"));
        assert_eq!(
            manager.vdrive(8, 0).unwrap().status(),
            DosStatus::new(DosCode::DosVersion, 0, 0)
        );
        manager.set_bam_disk_id(8, 0, *b"ZZ").unwrap();
        assert_eq!(manager.bam_disk_id(8, 0), Some(*b"ZZ"));

        manager.detach_disk(8, 0).unwrap();
        assert!(manager.image(8, 0).is_none());
        assert_eq!(manager.bam_disk_id(8, 0), None);
        assert_eq!(
            *log.borrow(),
            vec![
                format!("ui 8:0 {}", path.display()),
                "attach 8:0 ro=false".to_string(),
                "ui 8:0 ".to_string(),
                "detach 8:0".to_string(),
            ]
        );

        manager.attach_disk(8, 0, &path).unwrap();
        assert_eq!(manager.bam_disk_id(8, 0), Some(*b"ZZ"));
    }

    #[test]
    fn test_unknown_image_leaves_slot_alone() {
        let dir = tempfile::tempdir().unwrap();
        let good = formatted_image(dir.path(), "good.d64", ImageType::D64);
        let bad = dir.path().join("bad.d64");
        fs::write(&bad, vec![0u8; 1000]).unwrap();

        let mut manager = AttachManager::default();
        manager.attach_disk(8, 0, &good).unwrap();
        let error = manager.attach_disk(8, 0, &bad).unwrap_err();
        match error {
            AttachError::Io(ref e) => assert!(*e == DiskError::UnknownFormat),
            ref other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(error.to_string(), "incompatible image");
        assert_eq!(manager.disk_name(8, 0), Some(good.as_path()));
        assert!(manager.vdrive(8, 0).unwrap().is_attached());
    }

    #[test]
    fn test_unreadable_bam_leaves_slot_alone() {
        let dir = tempfile::tempdir().unwrap();
        let good = formatted_image(dir.path(), "good.d64", ImageType::D64);
        // An X64 image with a single track has no directory track to read.
        let short = dir.path().join("short.x64");
        let mut bytes = vec![0u8; 64 + 21 * 256];
        bytes[..4].copy_from_slice(&[0x43, 0x15, 0x41, 0x64]);
        bytes[7] = 1;
        fs::write(&short, bytes).unwrap();

        let log = Log::default();
        let mut hooks = Hooks::default();
        hooks.ui = Box::new(Recorder(log.clone()));
        hooks.event_log = Box::new(Recorder(log.clone()));
        let mut manager = AttachManager::new(AttachConfig::default(), hooks);
        manager.attach_disk(8, 0, &good).unwrap();
        log.borrow_mut().clear();

        match manager.attach_disk(8, 0, &short) {
            Err(AttachError::Io(ref e)) => assert!(*e == DiskError::BadTrack),
            result => panic!("unexpected result {:?}", result),
        }
        assert_eq!(manager.disk_name(8, 0), Some(good.as_path()));
        assert_eq!(manager.bam_disk_id(8, 0), Some(*b"01"));
        assert!(log.borrow().is_empty());

        // The old image stays usable, and the new file is free to attach
        // elsewhere later.
        let drive = manager.vdrive_mut(8, 0).unwrap();
        drive.write_file(b"STILL HERE", b"yes").unwrap();
        assert_eq!(drive.read_file(b"STILL HERE").unwrap(), b"yes".to_vec());
    }

    #[test]
    fn test_empty_file_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.d64");
        fs::write(&empty, b"").unwrap();

        let mut manager = AttachManager::default();
        let error = manager.attach_disk(8, 0, &empty).unwrap_err();
        match error {
            AttachError::Io(ref e) => assert!(*e == DiskError::UnknownFormat),
            ref other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(error.to_string(), "incompatible image");
        assert!(manager.image(8, 0).is_none());
    }

    #[test]
    fn test_exclusive_attach() {
        let dir = tempfile::tempdir().unwrap();
        let path = formatted_image(dir.path(), "a.d71", ImageType::D71);
        let mut manager = AttachManager::default();
        manager.attach_disk(8, 0, &path).unwrap();

        let other = dir.path().join(".").join("a.d71");
        match manager.attach_disk(9, 1, &other) {
            Err(AttachError::AlreadyMounted { unit: 8, drive: 0, .. }) => {}
            result => panic!("unexpected result {:?}", result),
        }
        assert!(manager.image(9, 1).is_none());

        // Attaching the same file to the same slot again is allowed.
        manager.attach_disk(8, 0, &other).unwrap();
        assert_eq!(manager.disk_name(8, 0), Some(path.as_path()));

        assert!(matches!(
            manager.attach_disk(12, 0, &path),
            Err(AttachError::InvalidUnit(12))
        ));
        assert!(matches!(
            manager.attach_disk(8, 2, &path),
            Err(AttachError::InvalidDrive(2))
        ));
    }

    #[test]
    fn test_read_only_reattach() {
        let dir = tempfile::tempdir().unwrap();
        let path = formatted_image(dir.path(), "a.d81", ImageType::D81);
        let mut manager = AttachManager::default();

        manager.set_read_only(9, 0, true).unwrap();
        assert_eq!(manager.read_only(9, 0), Some(true));
        manager.set_read_only(9, 0, false).unwrap();

        manager.attach_disk(9, 0, &path).unwrap();
        assert!(!manager.image(9, 0).unwrap().read_only());
        manager.set_read_only(9, 0, true).unwrap();
        assert!(manager.image(9, 0).unwrap().read_only());
        assert_eq!(manager.disk_name(9, 0), Some(path.as_path()));

        let drive = manager.vdrive_mut(9, 0).unwrap();
        assert_eq!(drive.write_file(b"NOPE", b"data"), Err(DosCode::WriteProtect));
    }

    #[test]
    fn test_device_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = formatted_image(dir.path(), "a.d64", ImageType::D64);
        let mut manager = AttachManager::default();
        manager.attach_disk(10, 0, &path).unwrap();

        manager.set_device_kind(10, DeviceKind::Real).unwrap();
        assert_eq!(manager.device_kind(10), Some(DeviceKind::Real));
        assert!(manager.image(10, 0).is_none());
        assert!(matches!(
            manager.attach_disk(10, 0, &path),
            Err(AttachError::RealDevice(10))
        ));

        manager.hooks_mut().real_device = Box::new(NoDriver);
        manager.set_device_kind(11, DeviceKind::Real).unwrap();
        assert_eq!(manager.device_kind(11), Some(DeviceKind::FileSystem));

        // A mounted unit that falls back goes back to the filesystem on the
        // bus too.
        let log = Log::default();
        manager.hooks_mut().bus = Box::new(Recorder(log.clone()));
        manager.attach_disk(8, 0, &path).unwrap();
        manager.set_device_kind(8, DeviceKind::Real).unwrap();
        assert_eq!(manager.device_kind(8), Some(DeviceKind::FileSystem));
        assert!(manager.image(8, 0).is_none());
        assert_eq!(
            log.borrow()[log.borrow().len() - 2..].to_vec(),
            vec![
                format!("type 8 {}", DeviceKind::FileSystem),
                "hooks 8 true".to_string(),
            ]
        );

        manager.set_device_kind(10, DeviceKind::Virtual).unwrap();
        manager.attach_disk(10, 0, &path).unwrap();
        assert!(manager.image(10, 0).is_some());
    }

    #[test]
    fn test_playback_refuses_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = formatted_image(dir.path(), "a.d64", ImageType::D64);
        let mut manager = AttachManager::default();
        manager.attach_disk(8, 0, &path).unwrap();
        manager.hooks_mut().event_log = Box::new(Playback);
        assert!(matches!(
            manager.detach_disk(8, 0),
            Err(AttachError::PlaybackActive)
        ));
        assert!(matches!(manager.detach_all(), Err(AttachError::PlaybackActive)));
        assert!(manager.image(8, 0).is_some());
    }

    #[test]
    fn test_drive_emulation_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = formatted_image(dir.path(), "a.d64", ImageType::D64);
        let mut manager = AttachManager::default();
        manager.set_true_drive_emulation(8, true).unwrap();
        manager.set_drive_model(8, 0, DriveModel::Cbm1581).unwrap();

        manager.attach_disk(8, 0, &path).unwrap();
        assert!(manager.vdrive(8, 0).unwrap().is_attached());
        assert_eq!(manager.drive_context(8, 0).unwrap().bound(), None);

        manager.detach_disk(8, 0).unwrap();
        manager.set_drive_model(8, 0, DriveModel::Cbm1541II).unwrap();
        manager.attach_disk(8, 0, &path).unwrap();
        let bound = manager.drive_context(8, 0).unwrap().bound().unwrap();
        assert_eq!(bound.image_type, ImageType::D64);
    }
}
