//! progerror — program-name prefixed diagnostics
//!
//! This crate reports errors the way the C library's `error()` and `error_at_line()`
//! functions do: standard output is flushed, then a line of the form
//!
//! ```text
//! <program>: [<file>:<line>: ]<message>[: <system error text>]
//! ```
//!
//! goes to standard error, a message counter is bumped, and the process exits when a
//! non-zero status is given. Messages use C format directives (`%s`, `%d`, `%5.2f`, ...);
//! `format_args!` messages are accepted too.
//!
//! # Example
//!
//! ```
//! use progerror::{Arg, Disposition, Message, Reporter};
//!
//! let mut reporter = Reporter::new(Vec::new(), "mytool").with_stream_flush(false);
//! let file = "input.txt";
//! let args = [Arg::from("EOF")];
//! let d = reporter.emit_at_line(0, 0, file, 12, Message::printf("unexpected %s", &args));
//! assert_eq!(d, Disposition::Continue);
//! assert_eq!(reporter.get_ref().as_slice(), b"mytool: input.txt:12: unexpected EOF\n");
//! assert_eq!(reporter.message_count(), 1);
//! ```

mod progname;
mod reporter;
mod shared;
mod stream;

pub use progerror_core::{
    describe, expected_kinds, sprintf, write_printf, Arg, ArgKind, FormatError,
};
pub use progname::{invocation_name, invocation_short_name};
pub use reporter::{Disposition, LocationMatch, Message, PrognameHook, Reporter};
pub use shared::{
    default_reporter, error, error_at_line, error_message_count, error_one_per_line,
    set_error_one_per_line, set_error_print_progname, set_program_name, SharedReporter,
};

/// Report through the default reporter with C format directives.
///
/// `error!(status, errnum, format, args...)`; each argument goes through [`Arg::from`].
#[macro_export]
macro_rules! error {
    ($status:expr, $errnum:expr, $format:expr $(, $arg:expr)* $(,)?) => {
        $crate::error($status, $errnum, $format, &[$($crate::Arg::from($arg)),*])
    };
}

/// Report a located diagnostic through the default reporter.
///
/// `error_at_line!(status, errnum, file, line, format, args...)`. With one-per-line mode
/// on, repeats are detected by the identity of `file`, so pass the same `&str` (for
/// instance `file!()`) to collapse them.
#[macro_export]
macro_rules! error_at_line {
    ($status:expr, $errnum:expr, $file:expr, $line:expr, $format:expr $(, $arg:expr)* $(,)?) => {
        $crate::error_at_line(
            $status,
            $errnum,
            $file,
            $line,
            $format,
            &[$($crate::Arg::from($arg)),*],
        )
    };
}
