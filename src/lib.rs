//! This is a Rust library for emulating the disk drives of Commodore Business
//! Machines (CBM) computers from the 1980's, from the PET through the C128.
//! It sits between an emulated machine's peripheral bus and the disk image
//! files on the host.
//!
//! Features:
//!
//! * Open, create, and write D64, D67, D71, D81, D80, D82, X64, G64, and G71
//!   disk images.  (P64 images are recognized but not decoded.)
//! * Encode and decode GCR (Group Coded Recording) tracks, including the
//!   read errors recorded in a D64/D71/D81 error table.
//! * A virtual drive that speaks CBM DOS: data channels, the command
//!   channel, the directory, and the Block Availability Map (BAM).
//! * Drive-level attach and detach for cycle-exact drive emulation, which
//!   works on GCR tracks instead of sectors.
//! * An attach manager for units 8-11, which keeps the bus, the user
//!   interface, and event recording informed of what is mounted where.
//! * A sample `cdisk` program, modeled on VICE's `c1541`, for maintaining
//!   disk images from the command line.  It can also unpack Lynx and
//!   Zipcode archives.
//!
//! # Example
//!
//! The following example attaches a disk image to unit 8 and lists the
//! directory:
//!
//! ```no_run
//! use cbmdisk::attach::AttachManager;
//! # fn list(disk_image_filename: &str) -> Result<(), Box<dyn std::error::Error>> {
//!
//! let mut manager = AttachManager::default();
//! manager.attach_disk(8, 0, disk_image_filename)?;
//! if let Some(drive) = manager.vdrive(8, 0) {
//!     for entry in drive.entries()? {
//!         println!("{}", entry);
//!     }
//!     println!("{} blocks free.", drive.blocks_free().unwrap_or(0));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Design of disk image access
//!
//! Support for disk images was built using a layered scheme:
//!
//! 1. `gcr` converts between sector contents and the bit stream on a disk
//!    surface.
//! 2. `DiskImage` owns an image file (or an in-memory copy) and reads and
//!    writes sectors, whatever the underlying storage: sector images
//!    directly, flux images through the GCR codec.
//! 3. `VirtualDrive` interprets the sectors as a CBM DOS filesystem.
//! 4. `DriveContext` holds the GCR tracks a cycle-exact drive rotates
//!    under its head while an image is attached.
//! 5. `AttachManager` owns the drives of units 8-11 and performs attach and
//!    detach transitions.
//!
//! Each image has exactly one owner at a time.  Attaching moves the image
//! into a virtual drive, and detaching hands it back so it can be flushed
//! and closed.
//!
//! # License
//!
//! Cbmdisk is distributed under the terms of both the MIT license and the
//! Apache License (Version 2.0).
//!
//! See LICENSE-APACHE and LICENSE-MIT for details.

pub mod attach;
pub mod disk;
pub mod drive;
pub mod gcr;
pub mod tool;
pub mod vdrive;

mod petscii;
mod util;

pub use crate::petscii::Petscii;
