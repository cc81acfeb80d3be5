//! User namespace ID mapping.
//!
//! Maps UIDs/GIDs inside a new user namespace onto host IDs, enabling
//! unprivileged namespace creation. The map contents are rendered up front
//! so that [`IdMapWriter::apply`] can run in a forked child.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use nsbox_common::error::{NsboxError, Result};

const SETGROUPS_PATH: &str = "/proc/self/setgroups";
const UID_MAP_PATH: &str = "/proc/self/uid_map";
const GID_MAP_PATH: &str = "/proc/self/gid_map";

/// One contiguous range of a UID or GID map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapping {
    /// First ID inside the namespace.
    pub inside: u32,
    /// First ID on the host.
    pub outside: u32,
    /// Number of consecutive IDs mapped.
    pub count: u32,
}

impl IdMapping {
    /// Maps a single host ID to root inside the namespace.
    #[must_use]
    pub const fn root_as(outside: u32) -> Self {
        Self {
            inside: 0,
            outside,
            count: 1,
        }
    }
}

impl fmt::Display for IdMapping {
    /// Renders the line format expected by `uid_map` and `gid_map`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} {}", self.inside, self.outside, self.count)
    }
}

impl FromStr for IdMapping {
    type Err = NsboxError;

    /// Parses `inside:outside:count`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || NsboxError::Config {
            message: format!("invalid id mapping {s:?}, expected inside:outside:count"),
        };
        let mut parts = s.split(':').map(|p| p.trim().parse::<u32>());
        let (Some(Ok(inside)), Some(Ok(outside)), Some(Ok(count)), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if count == 0 {
            return Err(invalid());
        }
        Ok(Self {
            inside,
            outside,
            count,
        })
    }
}

/// Pre-rendered UID/GID maps for the calling process's new user namespace.
#[derive(Debug, Clone, Default)]
pub struct IdMapWriter {
    uid_map: Option<Vec<u8>>,
    gid_map: Option<Vec<u8>>,
}

impl IdMapWriter {
    /// Renders the given mappings.
    #[must_use]
    pub fn new(uid: Option<IdMapping>, gid: Option<IdMapping>) -> Self {
        Self {
            uid_map: uid.map(|m| m.to_string().into_bytes()),
            gid_map: gid.map(|m| m.to_string().into_bytes()),
        }
    }

    /// Returns whether there is nothing to write.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.uid_map.is_none() && self.gid_map.is_none()
    }

    /// Writes the maps for the calling process.
    ///
    /// `setgroups` is denied before the GID map is written, as the kernel
    /// requires for unprivileged writers. Fork-safe.
    ///
    /// # Errors
    ///
    /// Returns the OS error of the first failing write.
    pub fn apply(&self) -> std::io::Result<()> {
        if let Some(uid_map) = &self.uid_map {
            write_proc_file(UID_MAP_PATH, uid_map)?;
        }
        if let Some(gid_map) = &self.gid_map {
            write_proc_file(SETGROUPS_PATH, b"deny")?;
            write_proc_file(GID_MAP_PATH, gid_map)?;
        }
        Ok(())
    }
}

fn write_proc_file(path: &str, contents: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.write_all(contents)
}
