//! Free-space lookup for the filesystem an image will be written to.
use crate::error::{Error, Result};
use crate::units::to_human;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use sysinfo::Disks;

/// Capacity of one mounted filesystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpaceInfo {
    pub mount_point: PathBuf,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl SpaceInfo {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }
}

impl fmt::Display for SpaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} free of {} on {}",
            to_human(self.available_bytes, true, true, true),
            to_human(self.total_bytes, true, true, true),
            self.mount_point.display()
        )
    }
}

/// Finds the mounted filesystem that will hold `image_path`.
///
/// The image itself does not need to exist yet; its directory does.
pub fn space_for(image_path: &Path) -> Result<SpaceInfo> {
    let dir = match image_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let dir = dir.canonicalize()?;

    let disks = Disks::new_with_refreshed_list();
    let mounts: Vec<SpaceInfo> = disks
        .iter()
        .map(|disk| SpaceInfo {
            mount_point: disk.mount_point().to_path_buf(),
            total_bytes: disk.total_space(),
            available_bytes: disk.available_space(),
        })
        .collect();

    containing_mount(&dir, &mounts).cloned().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no mounted filesystem holds {}", dir.display()),
        )
        .into()
    })
}

/// The mount with the longest mount point that is a prefix of `dir`.
fn containing_mount<'a>(dir: &Path, mounts: &'a [SpaceInfo]) -> Option<&'a SpaceInfo> {
    mounts
        .iter()
        .filter(|mount| dir.starts_with(&mount.mount_point))
        .max_by_key(|mount| mount.mount_point.components().count())
}

/// Fails unless `needed` bytes fit with `margin` bytes to spare.
pub fn ensure_free_space(info: &SpaceInfo, needed: u64, margin: u64) -> Result<()> {
    if info.available_bytes.saturating_sub(margin) <= needed {
        return Err(Error::InsufficientSpace {
            needed,
            available: info.available_bytes,
        });
    }
    Ok(())
}
