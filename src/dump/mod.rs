//! Thread dump of a process: attach, detect a runtime, walk thread stacks and
//! render a report. Target access goes through [`DataTarget`], so the dump
//! never depends on a concrete introspection provider.

pub mod detect;
pub mod report;
pub mod walk;

pub use detect::Selection;
pub use report::DumpReport;
pub use walk::ThreadStack;

use crate::process::TargetProcess;
use crate::target::{AttachedTarget, CacheOptions, DataTarget, Error, SymbolPath};
use log::{debug, info, warn};

/// Dump parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DumpOptions {
    /// Where frame symbols are searched.
    pub symbol_path: SymbolPath,
    /// Walk runtime and native frames together with managed ones.
    pub include_internal_frames: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            symbol_path: SymbolPath::public_server(),
            include_internal_frames: true,
        }
    }
}

/// Dump thread stacks of a process with default options.
///
/// Only an attach failure is returned as an error, any other failure
/// degrades a report.
pub fn dump_threads<T: DataTarget>(
    target: &T,
    process: &TargetProcess,
) -> Result<DumpReport, Error> {
    dump_threads_with(target, process, &DumpOptions::default())
}

/// Dump thread stacks of a process.
///
/// # Arguments
///
/// * `target`: attach facility
/// * `process`: dumped process
/// * `options`: dump parameters
pub fn dump_threads_with<T: DataTarget>(
    target: &T,
    process: &TargetProcess,
    options: &DumpOptions,
) -> Result<DumpReport, Error> {
    // session detaches on drop, at any return below
    let mut session = target.attach(process.pid, CacheOptions::enabled())?;
    info!(target: "dump", "attached to {process}");
    debug!(target: "dump", "session of {} uses cache options {:?}", session.pid(), session.cache_options());

    let selection = detect::select(session.clr_versions());
    if selection == Selection::Native {
        info!(target: "dump", "no runtime in {process}");
        return Ok(DumpReport::native_fallback(&process.name));
    }

    if let Err(e) = session.set_symbol_path(&options.symbol_path) {
        warn!(target: "dump", "set symbol path `{}`: {e:#}", options.symbol_path);
    }

    let info = match selection {
        Selection::Single(info) => info,
        Selection::Ambiguous(count) => {
            warn!(target: "dump", "{count} runtimes are loaded side by side, none is dumped");
            return Ok(DumpReport::managed(&[]));
        }
        Selection::Native => return Ok(DumpReport::native_fallback(&process.name)),
    };
    debug!(target: "dump", "runtime: {info}");

    let runtime = match session.create_runtime(&info) {
        Ok(runtime) => runtime,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(target: "dump", "open runtime {info}: {e:#}");
            return Ok(DumpReport::managed(&[]));
        }
    };

    let stacks = walk::walk(&runtime, options.include_internal_frames);
    debug!(target: "dump", "{} threads walked", stacks.len());
    Ok(DumpReport::managed(&stacks))
}
