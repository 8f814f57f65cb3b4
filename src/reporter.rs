use std::fmt;
use std::io::{self, Write};

use progerror_core::{describe, sprintf, Arg};

use crate::progname::invocation_name;
use crate::stream;

/// Writes the program-name portion of a diagnostic in place of `"<name>: "`.
pub type PrognameHook = fn(&mut dyn Write) -> io::Result<()>;

/// How one-per-line mode decides that a location repeats the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationMatch {
    /// Same file-name slice (address and length) and same line number.
    #[default]
    Identity,
    /// Equal file-name text and same line number.
    Content,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LastLocation {
    Identity { addr: usize, len: usize, line: u32 },
    Content { file: String, line: u32 },
}

impl LastLocation {
    fn new(mode: LocationMatch, file: &str, line: u32) -> Self {
        match mode {
            LocationMatch::Identity => LastLocation::Identity {
                addr: file.as_ptr() as usize,
                len: file.len(),
                line,
            },
            LocationMatch::Content => LastLocation::Content {
                file: file.to_string(),
                line,
            },
        }
    }

    fn matches(&self, file: &str, line: u32) -> bool {
        match self {
            LastLocation::Identity { addr, len, line: l } => {
                *l == line && *addr == file.as_ptr() as usize && *len == file.len()
            }
            LastLocation::Content { file: f, line: l } => *l == line && f == file,
        }
    }
}

/// The message part of a diagnostic.
#[derive(Clone, Copy)]
pub enum Message<'a> {
    /// A C-style format string and its arguments.
    Printf {
        format: &'a str,
        args: &'a [Arg<'a>],
    },
    /// Arguments prepared by `format_args!`.
    Fmt(fmt::Arguments<'a>),
}

impl<'a> Message<'a> {
    pub fn printf(format: &'a str, args: &'a [Arg<'a>]) -> Self {
        Message::Printf { format, args }
    }

    /// Render the message text. A format string that cannot be rendered is emitted as is.
    fn render(&self) -> String {
        match self {
            Message::Printf { format, args } => sprintf(format, args).unwrap_or_else(|e| {
                log::warn!("cannot format diagnostic {format:?}: {e}");
                format.to_string()
            }),
            Message::Fmt(args) => args.to_string(),
        }
    }
}

/// What the caller should do after a diagnostic was handled.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Written; the caller continues.
    Continue,
    /// Written; the diagnostic asks for termination with this status.
    Exit(i32),
    /// Repeated location in one-per-line mode; nothing was written or counted.
    Suppressed,
}

impl Disposition {
    /// Terminate the process for [`Disposition::Exit`], otherwise return.
    pub fn finish(self) {
        if let Disposition::Exit(status) = self {
            stream::terminate(status);
        }
    }
}

/// A diagnostic reporter: writes `<name>: [<file>:<line>: ]<message>[: <error>]` lines.
///
/// All state (message count, one-per-line mode, last location) belongs to the value, so
/// several reporters can coexist. Operations take `&mut self`; see
/// [`SharedReporter`](crate::SharedReporter) for use across threads.
pub struct Reporter<W: Write = io::Stderr> {
    sink: W,
    program_name: String,
    message_count: u32,
    one_per_line: bool,
    location_match: LocationMatch,
    last_location: Option<LastLocation>,
    progname_hook: Option<PrognameHook>,
    flush_streams: bool,
}

impl Reporter<io::Stderr> {
    /// A reporter writing to standard error under the process invocation name.
    pub fn stderr() -> Self {
        Reporter::new(io::stderr(), invocation_name())
    }
}

impl Default for Reporter<io::Stderr> {
    fn default() -> Self {
        Self::stderr()
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(sink: W, program_name: impl Into<String>) -> Self {
        Self {
            sink,
            program_name: program_name.into(),
            message_count: 0,
            one_per_line: false,
            location_match: LocationMatch::default(),
            last_location: None,
            progname_hook: None,
            flush_streams: true,
        }
    }

    pub fn with_program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = name.into();
        self
    }

    pub fn with_one_per_line(mut self, enabled: bool) -> Self {
        self.set_one_per_line(enabled);
        self
    }

    pub fn with_location_match(mut self, mode: LocationMatch) -> Self {
        self.location_match = mode;
        self.last_location = None;
        self
    }

    pub fn with_progname_hook(mut self, hook: Option<PrognameHook>) -> Self {
        self.progname_hook = hook;
        self
    }

    /// Whether stdout and C stdio streams are flushed before each diagnostic (default on).
    pub fn with_stream_flush(mut self, enabled: bool) -> Self {
        self.flush_streams = enabled;
        self
    }

    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    pub fn set_program_name(&mut self, name: impl Into<String>) {
        self.program_name = name.into();
    }

    /// Number of diagnostics written so far. Never decreases.
    pub fn message_count(&self) -> u32 {
        self.message_count
    }

    pub fn one_per_line(&self) -> bool {
        self.one_per_line
    }

    /// Enable or disable one-per-line mode. Disabling forgets the last location.
    pub fn set_one_per_line(&mut self, enabled: bool) {
        self.one_per_line = enabled;
        if !enabled {
            self.last_location = None;
        }
    }

    pub fn location_match(&self) -> LocationMatch {
        self.location_match
    }

    pub fn set_progname_hook(&mut self, hook: Option<PrognameHook>) {
        self.progname_hook = hook;
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Report a diagnostic; terminates the process when `status` is non-zero.
    pub fn error(&mut self, status: i32, errnum: i32, format: &str, args: &[Arg<'_>]) {
        self.emit(status, errnum, Message::printf(format, args)).finish()
    }

    /// Report a diagnostic for `file:line`; terminates the process when `status` is
    /// non-zero and the diagnostic was not suppressed.
    pub fn error_at_line(
        &mut self,
        status: i32,
        errnum: i32,
        file: &str,
        line: u32,
        format: &str,
        args: &[Arg<'_>],
    ) {
        self.emit_at_line(status, errnum, file, line, Message::printf(format, args))
            .finish()
    }

    pub fn error_fmt(&mut self, status: i32, errnum: i32, args: fmt::Arguments<'_>) {
        self.emit(status, errnum, Message::Fmt(args)).finish()
    }

    pub fn error_at_line_fmt(
        &mut self,
        status: i32,
        errnum: i32,
        file: &str,
        line: u32,
        args: fmt::Arguments<'_>,
    ) {
        self.emit_at_line(status, errnum, file, line, Message::Fmt(args))
            .finish()
    }

    /// Write a diagnostic without acting on `status`; the returned [`Disposition`] carries it.
    pub fn emit(&mut self, status: i32, errnum: i32, message: Message<'_>) -> Disposition {
        self.write_diagnostic(status, errnum, None, message)
    }

    /// Write a diagnostic for `file:line` without acting on `status`.
    ///
    /// In one-per-line mode a call whose location matches the previous one (see
    /// [`LocationMatch`]) writes nothing and returns [`Disposition::Suppressed`].
    pub fn emit_at_line(
        &mut self,
        status: i32,
        errnum: i32,
        file: &str,
        line: u32,
        message: Message<'_>,
    ) -> Disposition {
        if self.one_per_line {
            if self
                .last_location
                .as_ref()
                .is_some_and(|last| last.matches(file, line))
            {
                log::trace!("suppressing repeated diagnostic at {file}:{line}");
                return Disposition::Suppressed;
            }
            self.last_location = Some(LastLocation::new(self.location_match, file, line));
        }
        self.write_diagnostic(status, errnum, Some((file, line)), message)
    }

    fn write_diagnostic(
        &mut self,
        status: i32,
        errnum: i32,
        location: Option<(&str, u32)>,
        message: Message<'_>,
    ) -> Disposition {
        // Rendered before flushing so `%m` sees the caller's errno.
        let text = message.render();
        if self.flush_streams {
            stream::flush_all();
        }

        let mut line = String::with_capacity(self.program_name.len() + text.len() + 16);
        if self.progname_hook.is_none() {
            line.push_str(&self.program_name);
            line.push_str(": ");
        }
        if let Some((file, lineno)) = location {
            line.push_str(&format!("{file}:{lineno}: "));
        }
        line.push_str(&text);
        if errnum != 0 {
            line.push_str(": ");
            line.push_str(&describe(errnum));
        }
        line.push('\n');

        if let Err(e) = self.write_line(&line) {
            log::debug!("diagnostic not written: {e}");
        }
        self.message_count = self.message_count.saturating_add(1);

        if status != 0 {
            Disposition::Exit(status)
        } else {
            Disposition::Continue
        }
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        if let Some(hook) = self.progname_hook {
            hook(&mut self.sink)?;
        }
        self.sink.write_all(line.as_bytes())?;
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter() -> Reporter<Vec<u8>> {
        Reporter::new(Vec::new(), "prog").with_stream_flush(false)
    }

    fn output(r: &Reporter<Vec<u8>>) -> &str {
        std::str::from_utf8(r.get_ref()).unwrap()
    }

    #[test]
    fn plain_message() {
        let mut r = reporter();
        let d = r.emit(0, 0, Message::printf("hello %s", &["world".into()]));
        assert_eq!(d, Disposition::Continue);
        assert_eq!(output(&r), "prog: hello world\n");
        assert_eq!(r.message_count(), 1);
    }

    #[test]
    fn error_code_appends_description() {
        let mut r = reporter();
        let _ = r.emit(0, 2, Message::printf("cannot open %s", &["a.txt".into()]));
        assert_eq!(
            output(&r),
            format!("prog: cannot open a.txt: {}\n", describe(2))
        );
    }

    #[test]
    fn nonzero_status_is_counted_before_exit() {
        let mut r = reporter();
        let d = r.emit(3, 0, Message::printf("fatal", &[]));
        assert_eq!(d, Disposition::Exit(3));
        assert_eq!(output(&r), "prog: fatal\n");
        assert_eq!(r.message_count(), 1);
    }

    #[test]
    fn format_args_messages() {
        let mut r = reporter();
        let _ = r.emit(0, 0, Message::Fmt(format_args!("{} items left", 3)));
        assert_eq!(output(&r), "prog: 3 items left\n");
    }

    #[test]
    fn at_line_repeats_without_one_per_line() {
        let mut r = reporter();
        let file = "main.c";
        for _ in 0..2 {
            let _ = r.emit_at_line(0, 0, file, 42, Message::printf("bad token", &[]));
        }
        assert_eq!(output(&r), "prog: main.c:42: bad token\nprog: main.c:42: bad token\n");
        assert_eq!(r.message_count(), 2);
    }

    #[test]
    fn one_per_line_collapses_identical_locations() {
        let mut r = reporter().with_one_per_line(true);
        let file = "main.c";
        let msg = Message::printf("x", &[]);
        assert_eq!(r.emit_at_line(0, 0, file, 1, msg), Disposition::Continue);
        assert_eq!(r.emit_at_line(0, 0, file, 1, msg), Disposition::Suppressed);
        assert_eq!(r.emit_at_line(0, 0, file, 2, msg), Disposition::Continue);
        assert_eq!(r.emit_at_line(0, 0, file, 1, msg), Disposition::Continue);
        assert_eq!(
            output(&r),
            "prog: main.c:1: x\nprog: main.c:2: x\nprog: main.c:1: x\n"
        );
        assert_eq!(r.message_count(), 3);
    }

    #[test]
    fn one_per_line_compares_file_by_identity() {
        let mut r = reporter().with_one_per_line(true);
        let a = String::from("main.c");
        let b = String::from("main.c");
        let msg = Message::printf("x", &[]);
        assert_eq!(r.emit_at_line(0, 0, &a, 1, msg), Disposition::Continue);
        assert_eq!(r.emit_at_line(0, 0, &b, 1, msg), Disposition::Continue);
        assert_eq!(r.emit_at_line(0, 0, &b, 1, msg), Disposition::Suppressed);
        assert_eq!(r.message_count(), 2);
    }

    #[test]
    fn distinct_file_reference_between_identical_calls_resets_suppression() {
        let mut r = reporter().with_one_per_line(true);
        let a = String::from("main.c");
        let b = String::from("main.c");
        let msg = Message::printf("x", &[]);
        for file in [&a, &b, &a] {
            assert_eq!(r.emit_at_line(0, 0, file, 1, msg), Disposition::Continue);
        }
        assert_eq!(output(&r), "prog: main.c:1: x\n".repeat(3));
        assert_eq!(r.message_count(), 3);
    }

    #[test]
    fn content_matching_is_opt_in() {
        let mut r = reporter()
            .with_one_per_line(true)
            .with_location_match(LocationMatch::Content);
        let a = String::from("main.c");
        let b = String::from("main.c");
        let msg = Message::printf("x", &[]);
        assert_eq!(r.emit_at_line(0, 0, &a, 1, msg), Disposition::Continue);
        assert_eq!(r.emit_at_line(0, 0, &b, 1, msg), Disposition::Suppressed);
    }

    #[test]
    fn suppressed_call_does_not_request_exit() {
        let mut r = reporter().with_one_per_line(true);
        let file = "io.c";
        let msg = Message::printf("x", &[]);
        assert_eq!(r.emit_at_line(0, 0, file, 7, msg), Disposition::Continue);
        assert_eq!(r.emit_at_line(9, 0, file, 7, msg), Disposition::Suppressed);
    }

    #[test]
    fn disabling_one_per_line_forgets_last_location() {
        let mut r = reporter().with_one_per_line(true);
        let file = "io.c";
        let msg = Message::printf("x", &[]);
        let _ = r.emit_at_line(0, 0, file, 7, msg);
        r.set_one_per_line(false);
        r.set_one_per_line(true);
        assert_eq!(r.emit_at_line(0, 0, file, 7, msg), Disposition::Continue);
        assert_eq!(r.message_count(), 2);
    }

    #[test]
    fn progname_hook_replaces_name_prefix() {
        fn hook(w: &mut dyn Write) -> io::Result<()> {
            w.write_all(b"[tool] ")
        }
        let mut r = reporter().with_progname_hook(Some(hook));
        let _ = r.emit(0, 0, Message::printf("one", &[]));
        let _ = r.emit_at_line(0, 0, "f.c", 3, Message::printf("two", &[]));
        assert_eq!(output(&r), "[tool] one\n[tool] f.c:3: two\n");
    }

    #[test]
    fn unrenderable_format_is_emitted_verbatim() {
        let mut r = reporter();
        let _ = r.emit(0, 0, Message::printf("count %d", &["many".into()]));
        assert_eq!(output(&r), "prog: count %d\n");
        assert_eq!(r.message_count(), 1);
    }

    #[test]
    fn write_failures_still_count() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut r = Reporter::new(Closed, "prog").with_stream_flush(false);
        let _ = r.emit(0, 0, Message::printf("lost", &[]));
        assert_eq!(r.message_count(), 1);
    }

    #[test]
    fn counter_only_grows() {
        let mut r = reporter().with_one_per_line(true);
        let file = "a.c";
        let mut last = 0;
        for line in [1, 1, 2, 2, 1] {
            let _ = r.emit_at_line(0, 0, file, line, Message::printf("x", &[]));
            let _ = r.emit(0, 0, Message::printf("y", &[]));
            assert!(r.message_count() >= last);
            last = r.message_count();
        }
        assert_eq!(last, 8);
    }
}
