use crate::target::error::Error;
use log::debug;
use nix::errno::Errno;
use nix::sys;
use nix::sys::ptrace::Options;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use object::{Architecture, Object};
use std::collections::BTreeSet;
use std::fs;
use std::iter;
use std::path::PathBuf;
use sysinfo::{ProcessStatus, RefreshKind, System};

/// Architecture of a current process.
pub const HOST_ARCH: Architecture = Architecture::X86_64;

/// Thread of a traced process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Task {
    pub tid: Pid,
    /// false for zombie and dead threads
    pub alive: bool,
}

/// Return threads of a process in ascending tid order.
pub fn list_tasks(pid: Pid) -> Result<Vec<Task>, Error> {
    let sys = System::new_with_specifics(RefreshKind::everything().without_cpu().without_memory());
    let process = System::process(&sys, sysinfo::Pid::from_u32(pid.as_raw() as u32))
        .ok_or(Error::AttachedProcessNotFound(pid))?;

    // a task listed by its process but without own entry is considered alive
    let alive = |tid: sysinfo::Pid| {
        System::process(&sys, tid).map_or(true, |task| {
            !matches!(task.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
        })
    };

    let leader = sysinfo::Pid::from_u32(pid.as_raw() as u32);
    let mut tasks = iter::once(leader)
        .chain(process.tasks().into_iter().flatten().copied())
        .map(|tid| Task {
            tid: Pid::from_raw(tid.as_u32() as i32),
            alive: alive(tid),
        })
        .collect::<Vec<_>>();
    tasks.sort_unstable();
    tasks.dedup_by_key(|task| task.tid);
    Ok(tasks)
}

/// Check that a target executable has the same architecture as the host.
pub fn check_architecture(pid: Pid) -> Result<(), Error> {
    let exe = PathBuf::from(format!("/proc/{pid}/exe"));
    let file = fs::File::open(exe)?;
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    let object = object::File::parse(&*mmap)?;

    let target = object.architecture();
    if target != HOST_ARCH {
        return Err(Error::ArchitectureMismatch {
            target,
            host: HOST_ARCH,
        });
    }
    Ok(())
}

/// Seize a thread and stop it with `PTRACE_INTERRUPT`.
///
/// Return `false` if thread exits before it is stopped.
pub fn seize_and_stop(tid: Pid) -> Result<bool, Error> {
    match sys::ptrace::seize(tid, Options::empty()) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(false),
        Err(e) => return Err(Error::Attach(e)),
    }

    match sys::ptrace::interrupt(tid) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(false),
        Err(e) => return Err(Error::Attach(e)),
    }

    loop {
        match waitpid(tid, Some(WaitPidFlag::__WALL)) {
            Ok(WaitStatus::PtraceEvent(..)) | Ok(WaitStatus::Stopped(..)) => return Ok(true),
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => return Ok(false),
            Ok(status) => {
                debug!(target: "target", "thread {tid} unexpected status while attach: {status:?}");
            }
            Err(Errno::EINTR) => {}
            Err(Errno::ECHILD) => return Ok(false),
            Err(e) => return Err(Error::Attach(e)),
        }
    }
}

/// Detach from a stopped thread, thread continues its execution.
pub fn detach(tid: Pid) -> Result<(), Error> {
    match sys::ptrace::detach(tid, None) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::Attach(e)),
    }
}

/// Attach to every thread of a process.
/// Two rounds are made, threads that spawned at first round are stopped at second.
///
/// # Arguments
///
/// * `pid`: process pid
/// * `attached`: receives stopped threads, it is filled even if an error occurs, so
///   caller can release already stopped threads
pub fn stop_all_threads(pid: Pid, attached: &mut BTreeSet<Pid>) -> Result<(), Error> {
    for _ in 0..2 {
        let tasks = list_tasks(pid)?;
        let pending = tasks
            .into_iter()
            .map(|task| task.tid)
            .filter(|tid| !attached.contains(tid))
            .collect::<Vec<_>>();

        for tid in pending {
            if seize_and_stop(tid)? {
                attached.insert(tid);
            } else if tid == pid {
                return Err(Error::AttachedProcessNotFound(pid));
            } else {
                debug!(target: "target", "thread {tid} exited while attach");
            }
        }
    }

    Ok(())
}
