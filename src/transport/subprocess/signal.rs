//! Signal delivery to child process groups

/// Send `SIGINT` to the process group led by `pid`
pub(crate) fn interrupt_group(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions
    let result = unsafe { libc::kill(-pgid, libc::SIGINT) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        log::debug!("interrupt of process group {pgid} failed: {err}");
    }
}
