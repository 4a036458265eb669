#![deny(unsafe_op_in_unsafe_fn)]

use core::ptr;

use nix::errno::Errno;
use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;

pub mod mmap;

/// Touch a location so the fetch goes through the memory subsystem, the
/// loaded value is discarded.
pub unsafe fn maccess<T>(p: *const T) {
    unsafe { ptr::read_volatile(p) };
}

/// Number of configured processors, as the scheduler sees them.
pub fn num_configured_cpus() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    if n < 1 {
        1
    } else {
        n as usize
    }
}

/// Restrict the calling process to a single logical CPU.
pub fn pin_to_cpu(cpu: usize) -> Result<(), Errno> {
    let mut set = CpuSet::new();
    set.set(cpu)?;
    sched_setaffinity(Pid::from_raw(0), &set)?;
    Ok(())
}

/// Adjust the scheduling priority of the calling process.
pub fn renice(prio: i32) -> Result<(), Errno> {
    if unsafe { libc::setpriority(libc::PRIO_PROCESS as _, 0, prio) } == -1 {
        return Err(Errno::last());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::num_configured_cpus;

    #[test]
    fn at_least_one_cpu() {
        assert!(num_configured_cpus() >= 1);
    }
}
