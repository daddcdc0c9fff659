//! Perf map files.
//!
//! When started with `DOTNET_PerfMapEnabled=1` CoreCLR writes every jitted
//! method into `/tmp/perf-<pid>.map`, one `<start> <size> <name>` line per
//! method (hex numbers without prefix).

use crate::muted_error;
use crate::target::address::RelocatedAddress;
use crate::target::error::Error;
use nix::unistd::Pid;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Default directory where runtimes put perf maps.
pub const DEFAULT_PERF_MAP_DIR: &str = "/tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfMapEntry {
    pub start: RelocatedAddress,
    pub size: u64,
    pub name: String,
}

impl PerfMapEntry {
    fn contains(&self, addr: RelocatedAddress) -> bool {
        addr >= self.start && addr.as_u64() - self.start.as_u64() < self.size
    }
}

/// Address ordered jitted code descriptions.
#[derive(Debug, Default)]
pub struct PerfMap {
    entries: Vec<PerfMapEntry>,
}

impl PerfMap {
    /// Return path to perf map of a process.
    pub fn path(dir: &Path, pid: Pid) -> PathBuf {
        dir.join(format!("perf-{pid}.map"))
    }

    /// Load perf map of a process. Return `None` if process has no perf map.
    pub fn load(dir: &Path, pid: Pid) -> Result<Option<Self>, Error> {
        let file = Self::path(dir, pid);
        let data = match fs::read_to_string(&file) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Self::parse(&file, &data)))
    }

    /// Parse perf map content. Malformed lines are skipped, runtime appends
    /// to a map while it runs, so the last line may be incomplete.
    ///
    /// # Arguments
    ///
    /// * `file`: file name, used in error messages
    /// * `data`: perf map text
    pub fn parse(file: &Path, data: &str) -> Self {
        let mut entries: Vec<PerfMapEntry> = data
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(num, line)| muted_error!(Self::parse_line(file, num, line)))
            .collect();

        // code can be re-jitted, latest entry wins for same start address
        entries.reverse();
        entries.sort_by_key(|e| e.start);
        entries.dedup_by_key(|e| e.start);

        PerfMap { entries }
    }

    fn parse_line(file: &Path, num: usize, line: &str) -> Result<PerfMapEntry, Error> {
        let format_err = || Error::PerfMapFormat {
            file: file.to_path_buf(),
            line: num + 1,
        };

        let mut parts = line.splitn(3, ' ');
        let (Some(start), Some(size), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(format_err());
        };
        let start = u64::from_str_radix(start.trim_start_matches("0x"), 16)
            .map_err(|_| format_err())?;
        let size =
            u64::from_str_radix(size.trim_start_matches("0x"), 16).map_err(|_| format_err())?;

        Ok(PerfMapEntry {
            start: RelocatedAddress::from(start),
            size,
            name: name.trim_end().to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find method containing an address.
    pub fn find(&self, addr: RelocatedAddress) -> Option<&PerfMapEntry> {
        let idx = self.entries.partition_point(|e| e.start <= addr);
        let candidate = self.entries.get(idx.checked_sub(1)?)?;
        candidate.contains(addr).then_some(candidate)
    }
}
