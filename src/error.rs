use crate::model::SourceCodeLocation;
use thiserror::Error;

/// Errors surfaced by the debugging engine.
///
/// Model and breakpoint errors abort the operation that produced them and
/// leave the running state untouched; transport errors additionally require
/// an explicit reconnect before further traffic.
#[derive(Debug, Error)]
pub enum DebuggerError {
    /// The source map / CFG disagrees with a live response. Not retried.
    #[error("source model inconsistency: {0}")]
    ModelInconsistency(String),

    /// An interrupt pin has no resolvable callback function.
    #[error("no callback function registered for interrupt pin {pin}")]
    UnknownCallbackTarget { pin: u32 },

    /// No frame on the live call stack yields a mappable return address.
    #[error("no frame on the current call stack yields a resolvable return address")]
    UnresolvableReturnPath,

    /// The target VM rejected one or more breakpoint installs/removes.
    /// Successfully applied changes are left in place.
    #[error("target VM rejected {} breakpoint operation(s)", failures.len())]
    BreakpointOperationFailed { failures: Vec<SourceCodeLocation> },

    /// An address maps to more than one strict-equal source location.
    #[error("address {address:#x} maps to {count} source locations")]
    AmbiguousLocation { address: u32, count: usize },

    /// A stepping query produced no destination while execution could still
    /// make source-level progress.
    #[error("no source-level stepping target from the current location")]
    NoSteppingTarget,

    /// The connected target lacks the capability for the requested operation.
    #[error("operation not supported by this target: {0}")]
    UnsupportedOperation(&'static str),

    /// A pending event could not be dequeued on the target.
    #[error("event at index {index} could not be handled")]
    EventNotHandled { index: usize },

    #[error("invalid debugger configuration: {0}")]
    InvalidConfiguration(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<std::io::Error> for DebuggerError {
    fn from(err: std::io::Error) -> Self {
        DebuggerError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DebuggerError>;
