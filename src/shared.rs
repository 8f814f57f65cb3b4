use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, OnceLock};

use progerror_core::Arg;

use crate::reporter::{Message, PrognameHook, Reporter};

/// A [`Reporter`] behind a mutex, for use from several threads.
///
/// The lock is released before the process is terminated, so `atexit` handlers may
/// still report through the same reporter.
pub struct SharedReporter<W: Write = io::Stderr> {
    inner: Mutex<Reporter<W>>,
}

impl<W: Write> SharedReporter<W> {
    pub fn new(reporter: Reporter<W>) -> Self {
        Self {
            inner: Mutex::new(reporter),
        }
    }

    /// Lock the reporter. Its state stays consistent if a holder panicked, so a poisoned
    /// lock is taken over.
    pub fn lock(&self) -> MutexGuard<'_, Reporter<W>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn error(&self, status: i32, errnum: i32, format: &str, args: &[Arg<'_>]) {
        let disposition = self
            .lock()
            .emit(status, errnum, Message::printf(format, args));
        disposition.finish();
    }

    pub fn error_at_line(
        &self,
        status: i32,
        errnum: i32,
        file: &str,
        line: u32,
        format: &str,
        args: &[Arg<'_>],
    ) {
        let disposition =
            self.lock()
                .emit_at_line(status, errnum, file, line, Message::printf(format, args));
        disposition.finish();
    }

    pub fn error_fmt(&self, status: i32, errnum: i32, args: fmt::Arguments<'_>) {
        let disposition = self.lock().emit(status, errnum, Message::Fmt(args));
        disposition.finish();
    }

    pub fn error_at_line_fmt(
        &self,
        status: i32,
        errnum: i32,
        file: &str,
        line: u32,
        args: fmt::Arguments<'_>,
    ) {
        let disposition = self
            .lock()
            .emit_at_line(status, errnum, file, line, Message::Fmt(args));
        disposition.finish();
    }

    pub fn message_count(&self) -> u32 {
        self.lock().message_count()
    }

    pub fn into_inner(self) -> Reporter<W> {
        self.inner.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

/// The process-wide reporter behind the free functions and the `error!` macros.
///
/// Writes to standard error under the invocation name.
pub fn default_reporter() -> &'static SharedReporter {
    static DEFAULT: OnceLock<SharedReporter> = OnceLock::new();
    DEFAULT.get_or_init(|| SharedReporter::new(Reporter::stderr()))
}

/// Print `"<name>: <message>[: <error text>]"` to standard error, then exit with
/// `status` if it is non-zero.
pub fn error(status: i32, errnum: i32, format: &str, args: &[Arg<'_>]) {
    default_reporter().error(status, errnum, format, args)
}

/// Like [`error`], with a `"<file>:<line>: "` location after the program name.
pub fn error_at_line(
    status: i32,
    errnum: i32,
    file: &str,
    line: u32,
    format: &str,
    args: &[Arg<'_>],
) {
    default_reporter().error_at_line(status, errnum, file, line, format, args)
}

pub fn error_message_count() -> u32 {
    default_reporter().message_count()
}

pub fn error_one_per_line() -> bool {
    default_reporter().lock().one_per_line()
}

pub fn set_error_one_per_line(enabled: bool) {
    default_reporter().lock().set_one_per_line(enabled)
}

/// Install or remove the hook that prints the program-name portion of each diagnostic.
pub fn set_error_print_progname(hook: Option<PrognameHook>) {
    default_reporter().lock().set_progname_hook(hook)
}

/// Replace the name printed by the default reporter.
pub fn set_program_name(name: impl Into<String>) {
    default_reporter().lock().set_program_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn shared() -> SharedReporter<Vec<u8>> {
        SharedReporter::new(Reporter::new(Vec::new(), "prog").with_stream_flush(false))
    }

    #[test]
    fn concurrent_reports_keep_lines_whole() {
        let shared = Arc::new(shared());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    for i in 0..25 {
                        shared.error(0, 0, "worker %d step %d", &[Arg::from(t), Arg::from(i)]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let shared = Arc::try_unwrap(shared).ok().unwrap();
        assert_eq!(shared.message_count(), 100);
        let out = String::from_utf8(shared.into_inner().into_inner()).unwrap();
        assert_eq!(out.lines().count(), 100);
        assert!(out.lines().all(|l| l.starts_with("prog: worker ")));
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let shared = Arc::new(shared());
        let poisoner = Arc::clone(&shared);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock();
            panic!("holder panicked");
        })
        .join();
        shared.error_fmt(0, 0, format_args!("still {}", "working"));
        assert_eq!(shared.message_count(), 1);
    }

    #[test]
    fn default_reporter_counts_messages() {
        let before = error_message_count();
        error(0, 0, "default reporter %s", &["check".into()]);
        assert_eq!(error_message_count(), before + 1);

        set_error_one_per_line(true);
        assert!(error_one_per_line());
        let file = "shared.rs";
        error_at_line(0, 0, file, 1, "once", &[]);
        error_at_line(0, 0, file, 1, "once", &[]);
        assert_eq!(error_message_count(), before + 2);
        set_error_one_per_line(false);

        crate::error!(0, 0, "macro %s %d", "with", 2);
        crate::error_at_line!(0, 0, file, 9, "macro at %s", file);
        assert_eq!(error_message_count(), before + 4);
    }
}
