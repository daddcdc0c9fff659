//! Process introspection capabilities required by a thread dump.
//!
//! A [`DataTarget`] attaches to a process and gives an [`AttachedTarget`]: a
//! session that knows which CLR instances live in the target. A session
//! creates [`ClrRuntime`] handles, they enumerate managed threads and walk
//! their stacks. Runtime handles borrow the session, so they never outlive
//! an attach.

pub mod address;
pub mod cache;
pub mod error;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod perfmap;
pub mod symbol;

pub use address::{GlobalAddress, RelocatedAddress};
pub use cache::{CacheOptions, StringCaching};
pub use error::Error;
pub use nix::unistd::Pid;
pub use symbol::{SymbolPath, DEFAULT_SYMBOL_PATH};

use crate::version::Version;
use fallible_iterator::FallibleIterator;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Single CLR instance loaded into a target process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClrInfo {
    /// Runtime version, if it can be derived.
    pub version: Option<Version>,
    /// Path to the runtime module (`libcoreclr.so`).
    pub module: PathBuf,
    /// Lowest address of the runtime module image.
    pub base: RelocatedAddress,
}

impl Display for ClrInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.version {
            Some(v) => write!(f, "CoreCLR {v} ({}) at {}", self.module.display(), self.base),
            None => write!(f, "CoreCLR ({}) at {}", self.module.display(), self.base),
        }
    }
}

/// Thread known to a runtime instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClrThread {
    pub os_thread_id: u32,
    pub is_alive: bool,
}

impl ClrThread {
    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.os_thread_id as i32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// JIT compiled (or ready-to-run) managed code.
    Managed,
    /// Code of the runtime itself (VM, JIT compiler).
    Runtime,
    /// Any other native code.
    Native,
}

/// Single frame of a thread stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    pub sp: RelocatedAddress,
    pub ip: RelocatedAddress,
    pub kind: FrameKind,
    /// Resolved method (symbol) name.
    pub method: Option<String>,
    /// Module containing `ip`, if `ip` is backed by a file.
    pub module: Option<PathBuf>,
    /// Offset of `ip` from the start of the resolved symbol.
    pub offset: u64,
}

impl StackFrame {
    pub fn unresolved(sp: RelocatedAddress, ip: RelocatedAddress, kind: FrameKind) -> Self {
        Self {
            sp,
            ip,
            kind,
            method: None,
            module: None,
            offset: 0,
        }
    }

    fn module_name(&self) -> Option<&str> {
        self.module
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
    }
}

impl Display for StackFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let place = match (self.module_name(), self.method.as_deref()) {
            (Some(module), Some(method)) => format!("{module}!{method}+{:#x}", self.offset),
            (None, Some(method)) => format!("{method}+{:#x}", self.offset),
            (Some(module), None) => module.to_string(),
            (None, None) => "???".to_string(),
        };

        match self.kind {
            FrameKind::Managed => match self.method.as_deref() {
                Some(method) => f.write_str(method),
                None => f.write_str("[Managed Code]"),
            },
            FrameKind::Runtime => write!(f, "[Runtime: {place}]"),
            FrameKind::Native => write!(f, "[Native: {place}]"),
        }
    }
}

/// Lazy sequence of thread frames, innermost frame first.
pub type FrameIter<'a> = Box<dyn FallibleIterator<Item = StackFrame, Error = Error> + 'a>;

/// Runtime instance inside an attached target.
pub trait ClrRuntime {
    /// Threads of the runtime in a stable (for the current attach) order.
    fn threads(&self) -> Result<Vec<ClrThread>, Error>;

    /// Walk a thread stack.
    ///
    /// # Arguments
    ///
    /// * `thread`: thread for walking
    /// * `include_internal`: if false only managed frames are produced,
    ///   runtime and native frames are included otherwise
    fn enumerate_stack_trace(
        &self,
        thread: &ClrThread,
        include_internal: bool,
    ) -> Result<FrameIter<'_>, Error>;
}

/// Process attached for inspection. Dropping a session detaches from the process.
pub trait AttachedTarget {
    type Runtime<'a>: ClrRuntime
    where
        Self: 'a;

    fn pid(&self) -> Pid;

    fn cache_options(&self) -> &CacheOptions;

    /// CLR instances found in the target.
    fn clr_versions(&self) -> &[ClrInfo];

    /// Set places where frame symbols are searched.
    fn set_symbol_path(&mut self, path: &SymbolPath) -> Result<(), Error>;

    fn create_runtime(&self, info: &ClrInfo) -> Result<Self::Runtime<'_>, Error>;
}

/// Attach facility.
pub trait DataTarget {
    type Session: AttachedTarget;

    /// Attach to a running process without changing its code or data.
    ///
    /// # Arguments
    ///
    /// * `pid`: target process pid
    /// * `cache`: caching strategy for the whole session
    fn attach(&self, pid: Pid, cache: CacheOptions) -> Result<Self::Session, Error>;
}
