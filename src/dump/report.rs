use crate::dump::walk::ThreadStack;
use crate::target::StackFrame;

/// Outcome of a thread dump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DumpReport {
    /// True if a runtime was found in a target, even if no frame was printed.
    pub succeeded: bool,
    pub text: String,
}

impl DumpReport {
    /// Report for a process without a runtime.
    pub fn native_fallback(process_name: &str) -> Self {
        Self {
            succeeded: false,
            text: format!("No CLR Versions found for {process_name}. Process is most likely native.\n"),
        }
    }

    /// Report for a process with a detected runtime.
    pub fn managed(stacks: &[ThreadStack]) -> Self {
        Self {
            succeeded: true,
            text: render(stacks),
        }
    }
}

/// Render thread blocks: a header with thread id and a line per frame.
/// Threads without frames are omitted.
pub fn render(stacks: &[ThreadStack]) -> String {
    let mut out = String::new();
    for stack in stacks.iter().filter(|s| !s.frames.is_empty()) {
        out.push_str(&format!("{:X}\n", stack.thread.os_thread_id));
        for frame in &stack.frames {
            out.push_str(&frame_line(frame));
            out.push('\n');
        }
    }
    out
}

fn frame_line(frame: &StackFrame) -> String {
    format!(
        "{:>12x} {:>12x} {} {}",
        frame.sp,
        frame.ip,
        frame.method.as_deref().unwrap_or(""),
        frame
    )
}
