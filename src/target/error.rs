use nix::unistd::Pid;
use object::Architecture;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("object file parsing error: {0}")]
    ObjParsing(#[from] object::Error),

    // --------------------------------- attach errors ---------------------------------------------
    #[error("process pid {0} not found")]
    AttachedProcessNotFound(Pid),
    #[error("attach a running process: {0}")]
    Attach(nix::Error),
    #[error("target architecture {target:?} does not match host architecture {host:?}")]
    ArchitectureMismatch {
        target: Architecture,
        host: Architecture,
    },
    #[error("thread {0} is not attached")]
    ThreadNotAttached(Pid),

    // --------------------------------- remote memory errors --------------------------------------
    #[error("read memory at {addr:#x} of thread {pid}: {source}")]
    ReadMemory {
        pid: Pid,
        addr: usize,
        source: nix::Error,
    },
    #[error("read registers of thread {0}: {1}")]
    Registers(Pid, nix::Error),
    #[error("memory mappings of process {0}: {1}")]
    Mappings(Pid, std::io::Error),

    // --------------------------------- symbol errors ---------------------------------------------
    #[error("malformed symbol path element `{0}`")]
    SymbolPathFormat(String),
    #[error("malformed perf map line {line} in {file:?}")]
    PerfMapFormat { file: PathBuf, line: usize },
    #[error("runtime module {0:?} is not loaded")]
    RuntimeNotLoaded(PathBuf),

    // --------------------------------- unwind errors ---------------------------------------------
    #[error("unwind: too deep frame number")]
    UnwindTooDeepFrame,

    #[cfg(feature = "libunwind")]
    #[error("libunwind error: {0}")]
    LibUnwind(#[from] unwind::Error),
}

impl Error {
    /// Return a hint to a caller - continue a dump after error or abort it.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::ThreadNotAttached(_) => false,
            Error::ReadMemory { .. } => false,
            Error::Registers(_, _) => false,
            Error::SymbolPathFormat(_) => false,
            Error::PerfMapFormat { .. } => false,
            Error::RuntimeNotLoaded(_) => false,
            Error::UnwindTooDeepFrame => false,
            #[cfg(feature = "libunwind")]
            Error::LibUnwind(_) => false,

            // without these nothing can be read from a target
            Error::IO(_) => true,
            Error::ObjParsing(_) => true,
            Error::AttachedProcessNotFound(_) => true,
            Error::Attach(_) => true,
            Error::ArchitectureMismatch { .. } => true,
            Error::Mappings(_, _) => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "target", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "target", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
