use clrstack::target::{
    AttachedTarget, CacheOptions, ClrInfo, ClrRuntime, ClrThread, DataTarget, Error, FrameIter,
    FrameKind, Pid, RelocatedAddress, StackFrame, SymbolPath,
};
use clrstack::version::Version;
use nix::errno::Errno;
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;

/// Calls made by a dump to a scripted target.
#[derive(Default)]
pub struct TestLog {
    pub attaches: Cell<usize>,
    pub detaches: Cell<usize>,
    pub cache: Cell<Option<CacheOptions>>,
    pub symbol_paths: RefCell<Vec<SymbolPath>>,
    pub runtimes: Cell<usize>,
    /// thread ids in order of stack requests
    pub walked: RefCell<Vec<u32>>,
}

#[derive(Clone)]
pub struct ScriptedThread {
    pub thread: ClrThread,
    pub frames: Vec<StackFrame>,
    /// walk can't be started
    pub fail_start: bool,
    /// frame read error after this number of frames
    pub fail_after: Option<usize>,
}

impl ScriptedThread {
    pub fn live(tid: u32, frames: usize) -> Self {
        Self {
            thread: ClrThread {
                os_thread_id: tid,
                is_alive: true,
            },
            frames: (0..frames).map(|n| frame(tid, n)).collect(),
            fail_start: false,
            fail_after: None,
        }
    }

    pub fn dead(tid: u32, frames: usize) -> Self {
        let mut thread = Self::live(tid, frames);
        thread.thread.is_alive = false;
        thread
    }
}

/// Target behavior. Errors are produced with functions because [`Error`] isn't cloneable.
#[derive(Clone, Default)]
pub struct Script {
    pub attach_error: Option<fn() -> Error>,
    pub versions: Vec<ClrInfo>,
    pub symbol_path_error: Option<fn() -> Error>,
    pub runtime_error: Option<fn() -> Error>,
    pub threads_error: Option<fn() -> Error>,
    pub threads: Vec<ScriptedThread>,
}

pub struct ScriptedTarget {
    pub script: Script,
    pub log: Rc<TestLog>,
}

impl ScriptedTarget {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            log: Rc::default(),
        }
    }
}

impl DataTarget for ScriptedTarget {
    type Session = ScriptedSession;

    fn attach(&self, pid: Pid, cache: CacheOptions) -> Result<ScriptedSession, Error> {
        if let Some(error) = self.script.attach_error {
            return Err(error());
        }
        self.log.attaches.set(self.log.attaches.get() + 1);
        self.log.cache.set(Some(cache));
        Ok(ScriptedSession {
            pid,
            cache,
            script: self.script.clone(),
            log: self.log.clone(),
        })
    }
}

pub struct ScriptedSession {
    pid: Pid,
    cache: CacheOptions,
    script: Script,
    log: Rc<TestLog>,
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.log.detaches.set(self.log.detaches.get() + 1);
    }
}

impl AttachedTarget for ScriptedSession {
    type Runtime<'a> = ScriptedRuntime<'a>;

    fn pid(&self) -> Pid {
        self.pid
    }

    fn cache_options(&self) -> &CacheOptions {
        &self.cache
    }

    fn clr_versions(&self) -> &[ClrInfo] {
        &self.script.versions
    }

    fn set_symbol_path(&mut self, path: &SymbolPath) -> Result<(), Error> {
        self.log.symbol_paths.borrow_mut().push(path.clone());
        match self.script.symbol_path_error {
            Some(error) => Err(error()),
            None => Ok(()),
        }
    }

    fn create_runtime(&self, _: &ClrInfo) -> Result<ScriptedRuntime<'_>, Error> {
        if let Some(error) = self.script.runtime_error {
            return Err(error());
        }
        self.log.runtimes.set(self.log.runtimes.get() + 1);
        Ok(ScriptedRuntime { session: self })
    }
}

pub struct ScriptedRuntime<'a> {
    session: &'a ScriptedSession,
}

impl<'a> ClrRuntime for ScriptedRuntime<'a> {
    fn threads(&self) -> Result<Vec<ClrThread>, Error> {
        if let Some(error) = self.session.script.threads_error {
            return Err(error());
        }
        Ok(self.session.script.threads.iter().map(|t| t.thread).collect())
    }

    fn enumerate_stack_trace(
        &self,
        thread: &ClrThread,
        include_internal: bool,
    ) -> Result<FrameIter<'_>, Error> {
        self.session
            .log
            .walked
            .borrow_mut()
            .push(thread.os_thread_id);

        let scripted = self
            .session
            .script
            .threads
            .iter()
            .find(|t| t.thread == *thread)
            .ok_or(Error::ThreadNotAttached(thread.pid()))?;
        if scripted.fail_start {
            return Err(Error::Registers(thread.pid(), Errno::ESRCH));
        }

        let limit = scripted.fail_after.unwrap_or(scripted.frames.len());
        let mut frames: Vec<Result<StackFrame, Error>> = scripted
            .frames
            .iter()
            .filter(|f| include_internal || f.kind == FrameKind::Managed)
            .take(limit)
            .cloned()
            .map(Ok)
            .collect();
        if scripted.fail_after.is_some() {
            frames.push(Err(Error::ReadMemory {
                pid: thread.pid(),
                addr: 0xdead_0000,
                source: Errno::EFAULT,
            }));
        }

        Ok(Box::new(fallible_iterator::convert(frames.into_iter())))
    }
}

pub fn clr(base: usize) -> ClrInfo {
    ClrInfo {
        version: Some(Version((8, 0, 4))),
        module: PathBuf::from(format!(
            "/usr/share/dotnet{base:x}/shared/Microsoft.NETCore.App/8.0.4/libcoreclr.so"
        )),
        base: RelocatedAddress::from(base),
    }
}

/// Frame `n` of a thread: odd frames are runtime internals.
pub fn frame(tid: u32, n: usize) -> StackFrame {
    let sp = 0x7ffd_0000_0000_usize + (tid as usize) * 0x10000 + n * 0x40;
    let ip = 0x7f00_0000_0000_usize + n * 0x100;
    if n % 2 == 0 {
        let mut frame = StackFrame::unresolved(
            RelocatedAddress::from(sp),
            RelocatedAddress::from(ip),
            FrameKind::Managed,
        );
        frame.method = Some(format!("void [App] Worker::Step{n}()[Optimized]"));
        frame
    } else {
        let mut frame = StackFrame::unresolved(
            RelocatedAddress::from(sp),
            RelocatedAddress::from(ip),
            FrameKind::Runtime,
        );
        frame.module = Some(PathBuf::from("/usr/share/dotnet/libcoreclr.so"));
        frame.method = Some("ThreadNative::Sleep".to_string());
        frame.offset = 0x2a;
        frame
    }
}
