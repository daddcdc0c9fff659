use crate::target::address::RelocatedAddress;
use crate::target::error::Error;
use crate::target::{ClrInfo, FrameKind};
use crate::version::Version;
use nix::unistd::Pid;
use proc_maps::MapRange;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main runtime module, one per CLR instance.
pub const CLR_MODULE: &str = "libcoreclr.so";

/// Modules whose code is considered a part of the runtime.
const RUNTIME_MODULES: &[&str] = &[CLR_MODULE, "libclrjit.so"];

/// Origin of a mapped memory region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    /// Region mapped from a regular file.
    File(PathBuf),
    /// Anonymous region.
    Anonymous,
    /// Executable code double mapped through a `memfd` (W^X mode of the runtime).
    DoubleMapped,
    /// Kernel provided or named region (`[stack]`, `[vdso]`, `[anon:...]`).
    Special(String),
}

impl Backing {
    fn from_pathname(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Backing::Anonymous;
        };

        let name = path.to_string_lossy();
        if name.starts_with("/memfd:doublemapper") {
            Backing::DoubleMapped
        } else if name.starts_with('[') {
            Backing::Special(name.into_owned())
        } else if name.is_empty() {
            Backing::Anonymous
        } else {
            Backing::File(path.to_path_buf())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub start: usize,
    pub end: usize,
    pub executable: bool,
    pub backing: Backing,
}

impl From<&MapRange> for Mapping {
    fn from(range: &MapRange) -> Self {
        Mapping {
            start: range.start(),
            end: range.start() + range.size(),
            executable: range.is_exec(),
            backing: Backing::from_pathname(range.filename()),
        }
    }
}

impl Mapping {
    pub fn file(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(path) => Some(path.as_path()),
            _ => None,
        }
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

/// Snapshot of process memory regions.
#[derive(Debug, Default)]
pub struct ModuleMap {
    /// regions ordered by start address
    mappings: Vec<Mapping>,
    /// load address of every file backed module
    bases: HashMap<PathBuf, usize>,
}

impl ModuleMap {
    /// Read memory regions of a process.
    pub fn read(pid: Pid) -> Result<Self, Error> {
        let ranges: Vec<MapRange> =
            proc_maps::get_process_maps(pid.as_raw()).map_err(|e| Error::Mappings(pid, e))?;
        Ok(Self::new(ranges.iter().map(Mapping::from).collect()))
    }

    pub fn new(mut mappings: Vec<Mapping>) -> Self {
        mappings.sort_unstable_by_key(|m| m.start);

        let mut bases = HashMap::new();
        for mapping in &mappings {
            if let Backing::File(path) = &mapping.backing {
                bases
                    .entry(path.clone())
                    .and_modify(|base: &mut usize| *base = (*base).min(mapping.start))
                    .or_insert(mapping.start);
            }
        }

        Self { mappings, bases }
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// Find region containing an address.
    pub fn find(&self, addr: RelocatedAddress) -> Option<&Mapping> {
        let addr = addr.as_usize();
        let idx = self.mappings.partition_point(|m| m.start <= addr);
        let candidate = self.mappings.get(idx.checked_sub(1)?)?;
        candidate.contains(addr).then_some(candidate)
    }

    /// Return the lowest address where a module is mapped.
    pub fn base(&self, module: &Path) -> Option<usize> {
        self.bases.get(module).copied()
    }

    /// Classify code at address.
    ///
    /// # Arguments
    ///
    /// * `addr`: code address
    /// * `jitted`: true if address is known as a jitted method
    pub fn frame_kind(&self, addr: RelocatedAddress, jitted: bool) -> FrameKind {
        if jitted {
            return FrameKind::Managed;
        }

        match self.find(addr).map(|m| (&m.backing, m.executable)) {
            Some((Backing::File(path), _)) => match file_name(path) {
                Some(name) if RUNTIME_MODULES.contains(&name) => FrameKind::Runtime,
                _ => FrameKind::Native,
            },
            Some((Backing::DoubleMapped, true)) | Some((Backing::Anonymous, true)) => {
                FrameKind::Managed
            }
            _ => FrameKind::Native,
        }
    }

    /// Return all CLR instances loaded into the process, ordered by load address.
    pub fn clr_instances(&self) -> Vec<ClrInfo> {
        let mut instances: Vec<ClrInfo> = self
            .bases
            .iter()
            .filter(|(path, _)| file_name(path) == Some(CLR_MODULE))
            .map(|(path, base)| ClrInfo {
                version: Version::from_runtime_path(path),
                module: path.clone(),
                base: RelocatedAddress::from(*base),
            })
            .collect();
        instances.sort_unstable_by_key(|info| info.base);
        instances
    }
}
