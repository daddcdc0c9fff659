use crate::target::address::RelocatedAddress;
use crate::target::error::Error;
use crate::target::linux::memory::read_word;
use fallible_iterator::FallibleIterator;
use nix::sys;
use nix::unistd::Pid;
use serde::Deserialize;
use std::mem;
use strum_macros::{Display, EnumString};

/// Frames deeper than this are never walked.
pub const MAX_FRAMES: usize = 1024;

/// How thread stacks are unwound.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, EnumString, Display, Deserialize)]
pub enum UnwindStrategy {
    /// Follow the saved frame pointer chain, jitted code keeps frame pointers.
    #[default]
    #[strum(serialize = "frame-pointer")]
    #[serde(rename = "frame-pointer")]
    FramePointer,
    /// Use call frame information of native modules (libunwind).
    #[cfg(feature = "libunwind")]
    #[strum(serialize = "libunwind")]
    #[serde(rename = "libunwind")]
    Libunwind,
}

/// Unwound frame without any symbol information.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pub ip: RelocatedAddress,
    pub sp: RelocatedAddress,
}

/// Stack walker over a saved frame pointer (`rbp`) chain.
///
/// Each frame record is a pair of words: caller frame pointer and return address.
pub struct FramePointerWalk {
    pid: Pid,
    os_features: bool,
    /// frame produced by the next call
    next: Option<RawFrame>,
    bp: usize,
    depth: usize,
    /// error occurred while looking for the caller of a last produced frame
    error: Option<Error>,
}

impl FramePointerWalk {
    /// Start walking from the current registers of a stopped thread.
    pub fn new(pid: Pid, os_features: bool) -> Result<Self, Error> {
        let regs = sys::ptrace::getregs(pid).map_err(|e| Error::Registers(pid, e))?;
        Ok(Self::from_registers(
            pid,
            os_features,
            regs.rip as usize,
            regs.rsp as usize,
            regs.rbp as usize,
        ))
    }

    fn from_registers(pid: Pid, os_features: bool, ip: usize, sp: usize, bp: usize) -> Self {
        Self {
            pid,
            os_features,
            next: Some(RawFrame {
                ip: RelocatedAddress::from(ip),
                sp: RelocatedAddress::from(sp),
            }),
            bp,
            depth: 0,
            error: None,
        }
    }

    fn caller(&mut self, current: RawFrame) -> Result<Option<RawFrame>, Error> {
        let word = mem::size_of::<usize>();
        let bp = self.bp;
        if bp == 0 || bp % word != 0 || bp < current.sp.as_usize() {
            return Ok(None);
        }

        let caller_bp = read_word(self.pid, bp, self.os_features)?;
        let return_addr = read_word(self.pid, bp + word, self.os_features)?;
        if return_addr == 0 {
            return Ok(None);
        }

        // stack grows down, so caller frames must be higher
        self.bp = if caller_bp > bp { caller_bp } else { 0 };
        Ok(Some(RawFrame {
            ip: RelocatedAddress::from(return_addr),
            sp: RelocatedAddress::from(bp + 2 * word),
        }))
    }
}

impl FallibleIterator for FramePointerWalk {
    type Item = RawFrame;
    type Error = Error;

    fn next(&mut self) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        let Some(frame) = self.next.take() else {
            return Ok(None);
        };

        self.depth += 1;
        if self.depth > MAX_FRAMES {
            return Err(Error::UnwindTooDeepFrame);
        }

        match self.caller(frame) {
            Ok(caller) => self.next = caller,
            Err(e) => self.error = Some(e),
        }
        Ok(Some(frame))
    }
}

/// Unwind a thread with libunwind.
/// Frames collected before an unwind error are returned together with the error.
#[cfg(feature = "libunwind")]
pub fn libunwind_backtrace(pid: Pid) -> (Vec<RawFrame>, Option<Error>) {
    use unwind::{Accessors, AddressSpace, Byteorder, Cursor, PTraceState, RegNum};

    let mut frames = vec![];
    let mut walk = || -> unwind::Result<()> {
        let state = PTraceState::new(pid.as_raw() as u32)?;
        let address_space = AddressSpace::new(Accessors::ptrace(), Byteorder::DEFAULT)?;
        let mut cursor = Cursor::remote(&address_space, &state)?;

        loop {
            let ip = cursor.register(RegNum::IP)?;
            let sp = cursor.register(RegNum::SP)?;
            frames.push(RawFrame {
                ip: RelocatedAddress::from(ip),
                sp: RelocatedAddress::from(sp),
            });

            if frames.len() >= MAX_FRAMES || !cursor.step()? {
                break;
            }
        }
        Ok(())
    };

    let result = walk();
    (frames, result.err().map(Error::from))
}
