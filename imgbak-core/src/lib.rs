//! The core, UI-agnostic library for the `imgbak` backup utility.
//!
//! `imgbak-core` backs up a block device or partition to an image file by
//! driving `dd`, and can be used by any front end, whether it's a command-line
//! interface (like `imgbak`) or a graphical one. It handles reading the disk
//! topology from `fdisk`, supervising the copy and turning `dd`'s progress
//! output into status updates.
//!
//! The library is structured into several key modules:
//! - [`topology`]: Parses `fdisk -l` output into [`Device`]s and [`Partition`]s.
//! - [`progress`]: Parses one `dd` progress line into a [`ProgressSample`].
//! - [`eta`]: Extrapolates the total duration of a copy.
//! - [`monitor`]: Runs `dd` and reports progress via a callback.
//! - [`units`]: Human-readable sizes and durations.
//! - [`space`]: Free space on the filesystem receiving the image.
//!
//! The primary entry points are [`topology::list_devices`] and
//! [`monitor::run`]. Progress is reported through a closure, allowing the
//! calling application to display it in any way it chooses.
//!
//! ## Example: Backing up a Device with Progress Reporting
//!
//! ```rust,no_run
//! use imgbak_core::{ToolConfig, monitor, topology};
//!
//! fn main() -> imgbak_core::Result<()> {
//!     let config = ToolConfig::default();
//!     let devices = topology::list_devices(&config)?;
//!     let source = "/dev/sdb";
//!     let size = topology::resolve_size(&devices, source).unwrap_or(0);
//!
//!     let command = monitor::CopyCommand::new(source, "backup.img", &config);
//!     let report = monitor::run(&command, size, |row| {
//!         print!("\r{row}");
//!     })?;
//!
//!     if !report.is_success() {
//!         eprintln!("dd ended with {}, verify the image", report.exit);
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod error;
pub mod eta;
pub mod monitor;
pub mod progress;
pub mod space;
pub mod topology;
pub mod units;

pub use config::{DEFAULT_BLOCK_SIZE, ToolConfig};
pub use error::{Error, Result};
pub use progress::ProgressSample;
pub use topology::{Device, Partition};
