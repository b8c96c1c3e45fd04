//! The error type shared by every rill crate.
//!
//! Errors are built through constructor functions (`Error::undefined`,
//! `Error::malformed_structure`, ...) so call sites name the failure
//! class rather than spelling out enum variants.

use crate::Id;
use thiserror::Error as ThisError;

/// Convenience alias for results produced by rill components.
pub type RillResult<T> = Result<T, Error>;

/// A typed failure. The kind is boxed to keep `RillResult` small on the
/// happy path.
#[derive(Debug)]
pub struct Error {
    kind: Box<ErrorKind>,
    /// Optional context appended to the rendered message, e.g. the
    /// source location of the offending node.
    note: Option<String>,
}

#[derive(Debug, ThisError)]
enum ErrorKind {
    #[error("{0} `{1}' is undefined")]
    Undefined(String, Id),
    #[error("malformed structure: {0}")]
    MalformedStructure(String),
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not yet implemented: {0}")]
    Unimplemented(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("{0}")]
    Misc(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(note) = &self.note {
            write!(f, " ({})", note)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl Error {
    fn new(kind: ErrorKind) -> Self {
        Error {
            kind: Box::new(kind),
            note: None,
        }
    }

    /// A named entity was not found. `what` describes the entity class
    /// ("node", "function", ...).
    pub fn undefined<S: ToString>(what: S, name: Id) -> Self {
        Self::new(ErrorKind::Undefined(what.to_string(), name))
    }

    /// The input violates a structural invariant of the data model.
    pub fn malformed_structure<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::MalformedStructure(msg.to_string()))
    }

    /// A precondition of the requested operation does not hold.
    pub fn failed_precondition<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::FailedPrecondition(msg.to_string()))
    }

    /// The caller-supplied configuration is invalid.
    pub fn invalid_argument<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::InvalidArgument(msg.to_string()))
    }

    /// The input is valid but exercises a coverage gap, not a bug.
    pub fn unimplemented<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Unimplemented(msg.to_string()))
    }

    /// An invariant of our own bookkeeping broke.
    pub fn internal<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Internal(msg.to_string()))
    }

    /// A resource (device memory, ...) could not be obtained.
    pub fn resource_exhausted<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::ResourceExhausted(msg.to_string()))
    }

    /// An error that fits no other class.
    pub fn misc<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Misc(msg.to_string()))
    }

    /// Attach a context note rendered after the message.
    pub fn with_note<S: ToString>(mut self, note: S) -> Self {
        self.note = Some(note.to_string());
        self
    }

    /// True if this is an `unimplemented` error.
    pub fn is_unimplemented(&self) -> bool {
        matches!(*self.kind, ErrorKind::Unimplemented(_))
    }

    /// True if this is an `invalid_argument` error.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(*self.kind, ErrorKind::InvalidArgument(_))
    }

    /// True if this is a `failed_precondition` error.
    pub fn is_failed_precondition(&self) -> bool {
        matches!(*self.kind, ErrorKind::FailedPrecondition(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = Error::undefined("node", Id::new("x")).with_note("while importing");
        assert_eq!(err.to_string(), "node `x' is undefined (while importing)");
    }
}
