//! Error type shared by the compiler and the runtime
//!
//! Compile-time errors (expressions, sequence graph, manifest) are returned
//! before any caller state is touched. Runtime errors abort the sequence that
//! produced them.

use std::fmt;

/// Failures reported by a transport adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Fewer bytes went out than were handed to the transport
    ShortWrite { expected: usize, written: usize },
    /// Fewer bytes came back than were requested
    ShortRead { expected: usize, read: usize },
    /// No vsync arrived within the timeout
    VsyncTimeout { timeout_ms: u64 },
    /// Anything else the bus driver reports
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ShortWrite { expected, written } => {
                write!(f, "short write: {} of {} bytes", written, expected)
            }
            TransportError::ShortRead { expected, read } => {
                write!(f, "short read: {} of {} bytes", read, expected)
            }
            TransportError::VsyncTimeout { timeout_ms } => {
                write!(f, "vsync timeout after {}ms", timeout_ms)
            }
            TransportError::Io(msg) => write!(f, "transport I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Panel orchestration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed token adjacency or unbalanced grouping
    InvalidExpression { index: usize, reason: String },
    /// Expression tree nests deeper than the evaluator allows
    ExpressionTooDeep { limit: usize },
    /// A sequence embeds a sequence name that does not exist
    UnresolvedReference { sequence: String, target: String },
    /// Two sequences share a name
    DuplicateSequence(String),
    /// The sequence graph contains a cycle (path is closed: first == last)
    CycleDetected { path: Vec<String> },
    /// The computed order places a sequence before one it embeds
    OrderViolation { from: String, to: String },
    /// A single write does not fit into an empty command queue
    QueueOverflow { needed: usize, capacity: usize },
    /// A register offset too wide for an addressing entry
    OffsetOutOfRange { offset: u32, max: u32 },
    Transport(TransportError),
    PropertyNotFound(String),
    UnknownSequence(String),
    UnknownPacket(String),
    UnknownResource(String),
    UnknownMapTable(String),
    /// Nested sequences exceed the configured depth
    SequenceDepthExceeded { limit: usize },
    /// The panel manifest could not be parsed or failed validation
    Manifest(String),
    /// The device operation lock was poisoned by a panicking holder
    Poisoned,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidExpression { index, reason } => {
                write!(f, "invalid expression at token {}: {}", index, reason)
            }
            Error::ExpressionTooDeep { limit } => {
                write!(f, "expression nests deeper than {} levels", limit)
            }
            Error::UnresolvedReference { sequence, target } => write!(
                f,
                "sequence '{}' embeds unknown sequence '{}'",
                sequence, target
            ),
            Error::DuplicateSequence(name) => write!(f, "duplicate sequence '{}'", name),
            Error::CycleDetected { path } => {
                write!(f, "sequence cycle detected: {}", path.join(" -> "))
            }
            Error::OrderViolation { from, to } => write!(
                f,
                "sorted order places '{}' before its dependency '{}'",
                from, to
            ),
            Error::QueueOverflow { needed, capacity } => write!(
                f,
                "command queue overflow: {} slots needed, capacity {}",
                needed, capacity
            ),
            Error::OffsetOutOfRange { offset, max } => write!(
                f,
                "register offset {:#x} exceeds addressable range {:#x}",
                offset, max
            ),
            Error::Transport(e) => write!(f, "transport error: {}", e),
            Error::PropertyNotFound(name) => write!(f, "property '{}' not found", name),
            Error::UnknownSequence(name) => write!(f, "unknown sequence '{}'", name),
            Error::UnknownPacket(name) => write!(f, "unknown packet '{}'", name),
            Error::UnknownResource(name) => write!(f, "unknown resource '{}'", name),
            Error::UnknownMapTable(name) => write!(f, "unknown map table '{}'", name),
            Error::SequenceDepthExceeded { limit } => {
                write!(f, "nested sequences exceed depth {}", limit)
            }
            Error::Manifest(msg) => write!(f, "manifest error: {}", msg),
            Error::Poisoned => write!(f, "panel operation lock poisoned"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl Error {
    pub fn invalid_expression(index: usize, reason: impl Into<String>) -> Self {
        Error::InvalidExpression {
            index,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_cycle_display() {
        let err = Error::CycleDetected {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "sequence cycle detected: a -> b -> a");
    }

    #[test]
    fn test_transport_source_chain() {
        let err: Error = TransportError::ShortWrite {
            expected: 4,
            written: 2,
        }
        .into();
        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            "transport error: short write: 2 of 4 bytes"
        );
    }
}
