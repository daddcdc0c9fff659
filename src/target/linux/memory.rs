use crate::target::error::Error;
use nix::libc::c_void;
use nix::sys;
use nix::sys::uio::{self, RemoteIoVec};
use nix::unistd::Pid;
use std::io::IoSliceMut;
use std::mem;

/// Read one machine word from a stopped tracee.
///
/// # Arguments
///
/// * `pid`: thread id of a tracee
/// * `addr`: address in tracee address space
/// * `os_features`: read with `process_vm_readv` if true, `PTRACE_PEEKDATA` otherwise
pub fn read_word(pid: Pid, addr: usize, os_features: bool) -> Result<usize, Error> {
    let read_err = |source| Error::ReadMemory { pid, addr, source };

    if os_features {
        let mut buff = [0u8; mem::size_of::<usize>()];
        let remote_iov = RemoteIoVec {
            base: addr,
            len: buff.len(),
        };
        let read = uio::process_vm_readv(pid, &mut [IoSliceMut::new(&mut buff)], &[remote_iov])
            .map_err(read_err)?;
        if read != buff.len() {
            return Err(read_err(nix::Error::EFAULT));
        }
        Ok(usize::from_ne_bytes(buff))
    } else {
        let value = sys::ptrace::read(pid, addr as *mut c_void).map_err(read_err)?;
        Ok(value as usize)
    }
}
