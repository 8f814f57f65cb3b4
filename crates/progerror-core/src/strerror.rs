use std::io;

/// Human-readable description of a system error code.
///
/// Uses the platform's `strerror_r`, so unknown codes come back with the C library's own
/// fallback text (`Unknown error 9999` on glibc, `No error information` on musl).
#[cfg(unix)]
pub fn describe(code: i32) -> String {
    use std::ffi::CStr;

    let mut buf = [0 as libc::c_char; 256];
    // SAFETY: the buffer is writable for its full length and zero-filled, so it holds a
    // NUL-terminated string whether or not strerror_r wrote into it.
    let rc = unsafe { libc::strerror_r(code, buf.as_mut_ptr(), buf.len()) };
    let text = unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned();
    if text.is_empty() {
        log::debug!("strerror_r({code}) returned {rc} without a description");
        return format!("Unknown error {code}");
    }
    text
}

#[cfg(not(unix))]
pub fn describe(code: i32) -> String {
    let text = io::Error::from_raw_os_error(code).to_string();
    let suffix = format!(" (os error {code})");
    match text.strip_suffix(&suffix) {
        Some(stripped) => stripped.to_string(),
        None => text,
    }
}

/// The calling thread's last OS error code (`errno`), or 0 when none is set.
pub fn last_os_error_code() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
