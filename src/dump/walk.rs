use crate::target::{ClrRuntime, ClrThread, StackFrame};
use fallible_iterator::FallibleIterator;
use log::{debug, warn};

/// Frames of a single thread, innermost first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadStack {
    pub thread: ClrThread,
    pub frames: Vec<StackFrame>,
}

/// Walk stacks of all live runtime threads in enumeration order.
///
/// A thread which walk can't be started is skipped, a frame read error ends
/// the thread stack (already read frames are kept). Both never stop the walk.
pub fn walk<R: ClrRuntime + ?Sized>(runtime: &R, include_internal: bool) -> Vec<ThreadStack> {
    let threads = match runtime.threads() {
        Ok(threads) => threads,
        Err(e) => {
            warn!(target: "dump", "enumerate threads: {e:#}");
            return vec![];
        }
    };

    threads
        .into_iter()
        .filter(|thread| {
            if !thread.is_alive {
                debug!(target: "dump", "skip dead thread {:X}", thread.os_thread_id);
            }
            thread.is_alive
        })
        .filter_map(|thread| {
            let mut trace = match runtime.enumerate_stack_trace(&thread, include_internal) {
                Ok(trace) => trace,
                Err(e) => {
                    warn!(target: "dump", "thread {:X}: walk stack: {e:#}", thread.os_thread_id);
                    return None;
                }
            };

            let mut frames = vec![];
            loop {
                match trace.next() {
                    Ok(Some(frame)) => frames.push(frame),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(
                            target: "dump",
                            "thread {:X}: read frame #{}: {e:#}",
                            thread.os_thread_id,
                            frames.len()
                        );
                        break;
                    }
                }
            }

            Some(ThreadStack { thread, frames })
        })
        .collect()
}
