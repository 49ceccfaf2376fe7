use std::fmt;

use crate::drive::DriveModel;

/// The first bus address served by the attach manager.
pub const FIRST_UNIT: u8 = 8;
pub const UNIT_COUNT: usize = 4;
pub const DRIVES_PER_UNIT: usize = 2;

/// How a unit appears on the peripheral bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    /// Nothing answers at this address.
    None,
    /// A virtual drive serving attached disk images.
    Virtual,
    /// A host directory exposed as files.  Images may still be attached,
    /// which switches the unit's bus hooks over to the virtual drive.
    FileSystem,
    /// Pass-through to a physical drive.
    Real,
}

impl DeviceKind {
    pub fn name(self) -> &'static str {
        match self {
            DeviceKind::None => "none",
            DeviceKind::Virtual => "virtual",
            DeviceKind::FileSystem => "fs",
            DeviceKind::Real => "real",
        }
    }

    pub fn from_name(name: &str) -> Option<DeviceKind> {
        match name.to_lowercase().as_str() {
            "none" => Some(DeviceKind::None),
            "virtual" | "vdrive" => Some(DeviceKind::Virtual),
            "fs" | "filesystem" => Some(DeviceKind::FileSystem),
            "real" => Some(DeviceKind::Real),
            _ => None,
        }
    }

    /// Can an image be attached while the unit is of this kind?
    pub fn accepts_images(self) -> bool {
        self != DeviceKind::Real
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings for one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnitConfig {
    pub device_kind: DeviceKind,
    /// Attach images to each drive slot read-only.
    pub read_only: [bool; DRIVES_PER_UNIT],
    pub drive_model: [DriveModel; DRIVES_PER_UNIT],
    /// Also bind images to the emulated drive mechanism.
    pub true_drive_emulation: bool,
}

impl Default for UnitConfig {
    fn default() -> UnitConfig {
        UnitConfig {
            device_kind: DeviceKind::None,
            read_only: [false; DRIVES_PER_UNIT],
            drive_model: [DriveModel::default(); DRIVES_PER_UNIT],
            true_drive_emulation: false,
        }
    }
}

/// Settings for all units, 8 through 11.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachConfig {
    pub units: [UnitConfig; UNIT_COUNT],
}

impl AttachConfig {
    pub fn unit(&self, unit: u8) -> Option<&UnitConfig> {
        unit_index(unit).map(|index| &self.units[index])
    }

    pub fn unit_mut(&mut self, unit: u8) -> Option<&mut UnitConfig> {
        unit_index(unit).map(move |index| &mut self.units[index])
    }
}

impl Default for AttachConfig {
    fn default() -> AttachConfig {
        let mut units = [UnitConfig::default(); UNIT_COUNT];
        units[0].device_kind = DeviceKind::FileSystem;
        AttachConfig { units }
    }
}

/// Map a bus address to an index into the unit array.
pub fn unit_index(unit: u8) -> Option<usize> {
    let index = unit.checked_sub(FIRST_UNIT)? as usize;
    if index < UNIT_COUNT {
        Some(index)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AttachConfig::default();
        assert_eq!(config.unit(8).unwrap().device_kind, DeviceKind::FileSystem);
        assert_eq!(config.unit(11).unwrap().device_kind, DeviceKind::None);
        assert_eq!(config.unit(8).unwrap().drive_model[1], DriveModel::Cbm1541);
        assert!(!config.unit(9).unwrap().true_drive_emulation);
        assert!(config.unit(7).is_none());
        assert!(config.unit(12).is_none());
        assert_eq!(DeviceKind::from_name("FS"), Some(DeviceKind::FileSystem));
    }
}
