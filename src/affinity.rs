use std::io;

/// Pin the calling thread to a single logical CPU.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu_id: usize) -> io::Result<()> {
    if cpu_id >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("CPU {} exceeds CPU_SETSIZE", cpu_id),
        ));
    }

    let result = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu_id, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };

    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_cpu_id: usize) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "thread affinity is only supported on Linux",
    ))
}

/// Logical CPU the calling thread is currently running on, if the OS reports it.
#[cfg(target_os = "linux")]
pub fn current_cpu() -> Option<usize> {
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 { None } else { Some(cpu as usize) }
}

#[cfg(not(target_os = "linux"))]
pub fn current_cpu() -> Option<usize> {
    None
}
