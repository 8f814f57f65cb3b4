use std::io::{self, Write};

/// Flush standard output and every open C stdio stream before a diagnostic is written.
///
/// Failures are ignored: a closed or broken stdout must not stop the diagnostic.
pub(crate) fn flush_all() {
    if let Err(e) = io::stdout().flush() {
        log::debug!("ignoring stdout flush failure: {e}");
    }
    #[cfg(unix)]
    {
        // SAFETY: fflush(NULL) only touches streams that are currently open.
        let rc = unsafe { libc::fflush(std::ptr::null_mut()) };
        if rc != 0 {
            log::debug!("ignoring stdio flush failure: {}", io::Error::last_os_error());
        }
    }
}

/// Terminate the process through the normal exit path.
pub(crate) fn terminate(status: i32) -> ! {
    log::debug!("terminating with status {status}");
    std::process::exit(status)
}
