//! Runtime and compile error implementation.

use crate::value::Value;

use core::fmt;
use thiserror::Error;

/// Script-level error taxonomy.
///
/// These are error *kinds*, not host types: a thrown script value carries
/// one of these as its `name` property, and the standard prompt formats
/// `<kind>: <message>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// Source could not be compiled.
    Syntax,
    /// A value had the wrong type for an operation.
    Type,
    /// A name could not be resolved, or a fiber was resumed after its end.
    Reference,
    /// A numeric or structural limit was exceeded.
    Range,
    /// A const or read-only location was written.
    Access,
    /// A null value was dereferenced.
    Null,
    /// An operating-system level failure.
    System,
    /// Allocation failed.
    NoMem,
}

impl ErrorKind {
    /// The script-visible name of the kind.
    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Range => "RangeError",
            ErrorKind::Access => "AccessError",
            ErrorKind::Null => "NullError",
            ErrorKind::System => "SystemError",
            ErrorKind::NoMem => "NoMemError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error raised by the runtime itself, before it is materialized as a
/// script value.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RtError {
    /// The taxonomy kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl RtError {
    /// Build an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// `TypeError` shorthand.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    /// `ReferenceError` shorthand.
    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reference, message)
    }

    /// `RangeError` shorthand.
    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Range, message)
    }

    /// `AccessError` shorthand.
    pub fn access_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Access, message)
    }

    /// `NullError` shorthand.
    pub fn null_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Null, message)
    }
}

/// An in-flight thrown condition travelling through the unwinder.
///
/// `throw` raises an arbitrary script [`Value`]; runtime failures raise an
/// [`RtError`] that is materialized into an error object when a catch
/// handler first observes it.
#[derive(Debug, Clone)]
pub enum Raised {
    /// A script value thrown by the `throw` opcode.
    Value(Value),
    /// A runtime-originated error.
    Error(RtError),
}

impl From<RtError> for Raised {
    fn from(e: RtError) -> Self {
        Raised::Error(e)
    }
}

/// One line of an uncaught-error stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Display name of the function, if it has one.
    pub name: Option<String>,
    /// Source line derived from the function's location table.
    pub line: u32,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(n) => write!(f, "at {n} (line {})", self.line),
            None => write!(f, "at <anonymous> (line {})", self.line),
        }
    }
}

/// A compile-time failure.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message} (line {line})")]
pub struct CompileError {
    /// The taxonomy kind (`Syntax`, `Range` or `Access`).
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Source line of the offending node.
    pub line: u32,
}

impl CompileError {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
        }
    }
}

/// Host-facing error of the virtual machine.
#[derive(Debug, Error)]
pub enum VmError {
    /// Compilation failed.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// A script error unwound past the outermost driver.
    #[error("{kind}: {message}")]
    Uncaught {
        /// The taxonomy kind derived from the thrown value.
        kind: ErrorKind,
        /// The stringified message of the thrown value.
        message: String,
        /// Frame chain at the throw point, innermost first.
        trace: Vec<TraceFrame>,
    },
}

impl VmError {
    /// The taxonomy kind of the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmError::Compile(e) => e.kind,
            VmError::Uncaught { kind, .. } => *kind,
        }
    }
}
