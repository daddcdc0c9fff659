//! Linux (ptrace based) implementation of the introspection capabilities.

pub mod attach;
pub mod elf;
pub mod memory;
pub mod modules;
pub mod resolver;
pub mod unwind;

use crate::target::cache::CacheOptions;
use crate::target::error::Error;
use crate::target::linux::modules::ModuleMap;
use crate::target::linux::resolver::SymbolResolver;
use crate::target::linux::unwind::{FramePointerWalk, RawFrame, UnwindStrategy};
use crate::target::perfmap::{PerfMap, DEFAULT_PERF_MAP_DIR};
use crate::target::symbol::SymbolPath;
use crate::target::{
    AttachedTarget, ClrInfo, ClrRuntime, ClrThread, DataTarget, FrameIter, FrameKind, StackFrame,
};
use crate::weak_error;
use fallible_iterator::FallibleIterator;
use log::{debug, info, warn};
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use sysinfo::{RefreshKind, System};

/// Attach facility for processes of a local machine.
#[derive(Debug, Clone)]
pub struct LinuxTarget {
    perf_map_dir: PathBuf,
    unwind: UnwindStrategy,
}

impl Default for LinuxTarget {
    fn default() -> Self {
        Self {
            perf_map_dir: PathBuf::from(DEFAULT_PERF_MAP_DIR),
            unwind: UnwindStrategy::default(),
        }
    }
}

impl LinuxTarget {
    /// Set directory where runtime perf maps are searched.
    pub fn with_perf_map_dir(self, dir: impl Into<PathBuf>) -> Self {
        Self {
            perf_map_dir: dir.into(),
            ..self
        }
    }

    pub fn with_unwind_strategy(self, unwind: UnwindStrategy) -> Self {
        Self { unwind, ..self }
    }
}

impl DataTarget for LinuxTarget {
    type Session = LinuxSession;

    fn attach(&self, pid: Pid, cache: CacheOptions) -> Result<LinuxSession, Error> {
        let sys =
            System::new_with_specifics(RefreshKind::everything().without_cpu().without_memory());
        if System::process(&sys, sysinfo::Pid::from_u32(pid.as_raw() as u32)).is_none() {
            return Err(Error::AttachedProcessNotFound(pid));
        }

        attach::check_architecture(pid)?;

        let mut session = LinuxSession {
            pid,
            cache,
            threads: BTreeSet::new(),
            clr_versions: vec![],
            symbol_path: SymbolPath::default(),
            perf_map_dir: self.perf_map_dir.clone(),
            unwind: self.unwind,
        };
        // session is dropped (so stopped threads are released) on error
        attach::stop_all_threads(pid, &mut session.threads)?;
        info!(target: "target", "attached to {pid}, {} threads stopped", session.threads.len());

        if cache.cache_types || cache.cache_stack_roots {
            debug!(target: "target", "types and stack roots are never decoded, their cache options are ignored");
        }

        session.clr_versions = ModuleMap::read(pid)?.clr_instances();
        Ok(session)
    }
}

/// Attached process. All process threads are stopped while session exists.
pub struct LinuxSession {
    pid: Pid,
    cache: CacheOptions,
    threads: BTreeSet<Pid>,
    clr_versions: Vec<ClrInfo>,
    symbol_path: SymbolPath,
    perf_map_dir: PathBuf,
    unwind: UnwindStrategy,
}

impl LinuxSession {
    fn is_attached(&self, tid: Pid) -> bool {
        self.threads.contains(&tid)
    }
}

impl Drop for LinuxSession {
    fn drop(&mut self) {
        for tid in &self.threads {
            weak_error!(attach::detach(*tid), "detach:");
        }
        info!(target: "target", "detached from {}", self.pid);
    }
}

impl AttachedTarget for LinuxSession {
    type Runtime<'a> = LinuxRuntime<'a>;

    fn pid(&self) -> Pid {
        self.pid
    }

    fn cache_options(&self) -> &CacheOptions {
        &self.cache
    }

    fn clr_versions(&self) -> &[ClrInfo] {
        &self.clr_versions
    }

    fn set_symbol_path(&mut self, path: &SymbolPath) -> Result<(), Error> {
        for server in path.servers() {
            debug!(target: "target", "symbol server {server} is used as a symbol source only through its local store");
        }
        self.symbol_path = path.clone();
        Ok(())
    }

    fn create_runtime(&self, info: &ClrInfo) -> Result<LinuxRuntime<'_>, Error> {
        let modules = ModuleMap::read(self.pid)?;
        if modules.base(&info.module).is_none() {
            return Err(Error::RuntimeNotLoaded(info.module.clone()));
        }

        let perf_map = weak_error!(PerfMap::load(&self.perf_map_dir, self.pid)).flatten();
        match &perf_map {
            Some(map) => debug!(target: "target", "perf map loaded: {} methods", map.len()),
            None => warn!(
                target: "target",
                "no perf map at {:?}, jitted methods stay unresolved (run target with DOTNET_PerfMapEnabled=1)",
                PerfMap::path(&self.perf_map_dir, self.pid)
            ),
        }

        Ok(LinuxRuntime {
            session: self,
            resolver: SymbolResolver::new(modules, perf_map, &self.symbol_path, self.cache),
            traces: RefCell::default(),
        })
    }
}

/// Runtime instance of an attached process.
pub struct LinuxRuntime<'a> {
    session: &'a LinuxSession,
    resolver: SymbolResolver,
    /// complete walks, used if stack traces caching is enabled
    traces: RefCell<HashMap<(Pid, bool), Vec<StackFrame>>>,
}

impl<'a> LinuxRuntime<'a> {
    fn raw_frames(&self, tid: Pid) -> Result<RawFrames, Error> {
        let os_features = self.session.cache.use_os_memory_features;
        match self.session.unwind {
            UnwindStrategy::FramePointer => Ok(RawFrames::FramePointer(FramePointerWalk::new(
                tid,
                os_features,
            )?)),
            #[cfg(feature = "libunwind")]
            UnwindStrategy::Libunwind => {
                let (frames, error) = unwind::libunwind_backtrace(tid);
                Ok(RawFrames::Collected {
                    frames: frames.into_iter(),
                    error,
                })
            }
        }
    }

    fn walk(&self, tid: Pid, include_internal: bool) -> Result<StackWalk<'_>, Error> {
        Ok(StackWalk {
            raw: self.raw_frames(tid)?,
            resolver: &self.resolver,
            include_internal,
            innermost: true,
        })
    }
}

impl<'a> ClrRuntime for LinuxRuntime<'a> {
    fn threads(&self) -> Result<Vec<ClrThread>, Error> {
        let pid = self.session.pid;
        let threads = attach::list_tasks(pid)?
            .into_iter()
            .map(|task| ClrThread {
                os_thread_id: task.tid.as_raw() as u32,
                is_alive: task.alive,
            })
            .collect();
        Ok(threads)
    }

    fn enumerate_stack_trace(
        &self,
        thread: &ClrThread,
        include_internal: bool,
    ) -> Result<FrameIter<'_>, Error> {
        let tid = thread.pid();
        if !self.session.is_attached(tid) {
            return Err(Error::ThreadNotAttached(tid));
        }

        if !self.session.cache.cache_stack_traces {
            let walk = self.walk(tid, include_internal)?;
            return Ok(Box::new(walk));
        }

        let key = (tid, include_internal);
        if let Some(frames) = self.traces.borrow().get(&key) {
            return Ok(Box::new(Materialized::new(frames.clone(), None)));
        }

        let mut walk = self.walk(tid, include_internal)?;
        let mut frames = vec![];
        let error = loop {
            match walk.next() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break None,
                Err(e) => break Some(e),
            }
        };

        // incomplete walks are never cached
        if error.is_none() {
            self.traces.borrow_mut().insert(key, frames.clone());
        }
        Ok(Box::new(Materialized::new(frames, error)))
    }
}

enum RawFrames {
    FramePointer(FramePointerWalk),
    #[cfg(feature = "libunwind")]
    Collected {
        frames: std::vec::IntoIter<RawFrame>,
        error: Option<Error>,
    },
}

impl FallibleIterator for RawFrames {
    type Item = RawFrame;
    type Error = Error;

    fn next(&mut self) -> Result<Option<RawFrame>, Error> {
        match self {
            RawFrames::FramePointer(walk) => walk.next(),
            #[cfg(feature = "libunwind")]
            RawFrames::Collected { frames, error } => match frames.next() {
                Some(frame) => Ok(Some(frame)),
                None => error.take().map_or(Ok(None), Err),
            },
        }
    }
}

/// Lazy walk of a single thread stack.
struct StackWalk<'a> {
    raw: RawFrames,
    resolver: &'a SymbolResolver,
    include_internal: bool,
    /// next raw frame is the one where the thread is stopped
    innermost: bool,
}

impl<'a> FallibleIterator for StackWalk<'a> {
    type Item = StackFrame;
    type Error = Error;

    fn next(&mut self) -> Result<Option<StackFrame>, Error> {
        while let Some(raw) = self.raw.next()? {
            let frame = self.resolver.resolve(raw, self.innermost);
            self.innermost = false;
            if self.include_internal || frame.kind == FrameKind::Managed {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}

impl<'a> Drop for StackWalk<'a> {
    fn drop(&mut self) {
        self.resolver.release_tables();
    }
}

/// Already walked frames, error (if any) is returned after the last frame.
struct Materialized {
    frames: std::vec::IntoIter<StackFrame>,
    error: Option<Error>,
}

impl Materialized {
    fn new(frames: Vec<StackFrame>, error: Option<Error>) -> Self {
        Self {
            frames: frames.into_iter(),
            error,
        }
    }
}

impl FallibleIterator for Materialized {
    type Item = StackFrame;
    type Error = Error;

    fn next(&mut self) -> Result<Option<StackFrame>, Error> {
        match self.frames.next() {
            Some(frame) => Ok(Some(frame)),
            None => self.error.take().map_or(Ok(None), Err),
        }
    }
}
