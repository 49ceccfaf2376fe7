//! The attach manager's collaborators.
//!
//! Every method has a default that does nothing, so a host implements only
//! the parts of the system it actually has.

use std::io;
use std::path::Path;

use crate::attach::config::DeviceKind;

/// The peripheral bus the units sit on.
pub trait Bus {
    /// Make the unit answer on the bus as the given kind of device.
    fn set_device_type(&mut self, _unit: u8, _kind: DeviceKind) {}

    /// Route the unit's traffic to the host filesystem handler (`true`) or
    /// to the virtual drive (`false`).
    fn set_serial_hooks(&mut self, _unit: u8, _filesystem: bool) {}
}

/// The driver for physical drives connected to the host.
pub trait RealDevice {
    fn enable(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn disable(&mut self) {}
}

/// Event-log recording and playback.
pub trait EventLog {
    /// While a recorded session plays back, attach and detach requests
    /// from elsewhere are refused.
    fn playback_active(&self) -> bool {
        false
    }

    fn record_attach(&mut self, _unit: u8, _drive: u8, _path: &Path, _read_only: bool) {}

    fn record_detach(&mut self, _unit: u8, _drive: u8) {}
}

/// The user interface's drive status display.
pub trait Ui {
    fn display_image(&mut self, _unit: u8, _drive: u8, _path: Option<&Path>) {}
}

/// A multi-peer session.  When connected, attach and detach requests are
/// forwarded to the session owner rather than applied locally.
pub trait Network {
    fn connected(&self) -> bool {
        false
    }

    fn forward_attach(&mut self, _unit: u8, _drive: u8, _path: &Path) {}

    fn forward_detach(&mut self, _unit: u8, _drive: u8) {}
}

/// The emulated machine's cycle counter.
pub trait Clock {
    fn now(&self) -> u64 {
        0
    }
}

/// A collaborator that is not there.
#[derive(Clone, Copy, Debug, Default)]
pub struct Absent;

impl Bus for Absent {}
impl RealDevice for Absent {}
impl EventLog for Absent {}
impl Ui for Absent {}
impl Network for Absent {}
impl Clock for Absent {}

/// The set of collaborators an attach manager talks to.
pub struct Hooks {
    pub bus: Box<dyn Bus>,
    pub real_device: Box<dyn RealDevice>,
    pub event_log: Box<dyn EventLog>,
    pub ui: Box<dyn Ui>,
    pub network: Box<dyn Network>,
    pub clock: Box<dyn Clock>,
}

impl Default for Hooks {
    fn default() -> Hooks {
        Hooks {
            bus: Box::new(Absent),
            real_device: Box::new(Absent),
            event_log: Box::new(Absent),
            ui: Box::new(Absent),
            network: Box::new(Absent),
            clock: Box::new(Absent),
        }
    }
}
