//! Running snapshot statistics and human-readable sizes.

use std::fmt;
use std::iter::Sum;
use std::ops::{AddAssign, SubAssign};

use serde::{Deserialize, Serialize};

/// Counters aggregated over a snapshot's archives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Regular files stored
    pub files: u64,
    /// Directories stored
    pub dirs: u64,
    /// Symbolic links stored
    pub symlinks: u64,
    /// Logical bytes of all files
    pub size: u64,
    /// Encoded bytes of chunks first written by this snapshot
    pub storage_size: u64,
    /// Items that could not be read
    pub errors: u64,
}

impl Stats {
    /// Logical bytes per stored byte; 0 when nothing was stored.
    pub fn savings_ratio(&self) -> f64 {
        if self.storage_size == 0 {
            0.0
        } else {
            self.size as f64 / self.storage_size as f64
        }
    }
}

impl AddAssign for Stats {
    fn add_assign(&mut self, other: Self) {
        self.files += other.files;
        self.dirs += other.dirs;
        self.symlinks += other.symlinks;
        self.size += other.size;
        self.storage_size += other.storage_size;
        self.errors += other.errors;
    }
}

impl SubAssign for Stats {
    fn sub_assign(&mut self, other: Self) {
        self.files = self.files.saturating_sub(other.files);
        self.dirs = self.dirs.saturating_sub(other.dirs);
        self.symlinks = self.symlinks.saturating_sub(other.symlinks);
        self.size = self.size.saturating_sub(other.size);
        self.storage_size = self.storage_size.saturating_sub(other.storage_size);
        self.errors = self.errors.saturating_sub(other.errors);
    }
}

impl Sum for Stats {
    fn sum<I: Iterator<Item = Stats>>(iter: I) -> Self {
        iter.fold(Stats::default(), |mut total, s| {
            total += s;
            total
        })
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files, {} dirs, {} symlinks, {} ({} stored)",
            self.files,
            self.dirs,
            self.symlinks,
            format_size(self.size),
            format_size(self.storage_size)
        )?;
        if self.errors > 0 {
            write!(f, ", {} errors", self.errors)?;
        }
        Ok(())
    }
}

/// Binary-prefixed size, e.g. `10.0 MiB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
