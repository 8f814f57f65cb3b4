//! progerror — program-name prefixed diagnostics (core library)
//!
//! This crate holds the pieces of `progerror` that have no process side effects:
//! the printf directive engine used to render diagnostic messages, and the lookup
//! of human-readable descriptions for system error codes.

mod printf;
mod strerror;

pub use printf::{expected_kinds, sprintf, write_printf, Arg, ArgKind};
pub use strerror::{describe, last_os_error_code};

use thiserror::Error;

/// Errors raised while rendering a printf-style format string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// A directive needs an argument that was not supplied (1-based index).
    #[error("missing argument {index} for `{directive}`")]
    MissingArgument { directive: String, index: usize },

    /// The argument supplied for a directive has the wrong kind.
    #[error("`{directive}` expects {expected}, got {found}")]
    TypeMismatch {
        directive: String,
        expected: ArgKind,
        found: ArgKind,
    },

    /// The directive is recognized but deliberately not implemented.
    #[error("unsupported conversion `{directive}`")]
    Unsupported { directive: String },

    /// The output writer refused the rendered text.
    #[error("formatter error")]
    Write(#[from] std::fmt::Error),
}
