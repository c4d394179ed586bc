//! Error type shared by the whole driver

/// Failure of a driver operation.
///
/// Two families matter to callers: [`EngineError::Protocol`] covers a
/// misbehaving or under-featured engine while the process is still alive,
/// and [`EngineError::Terminated`] covers the process going away (or any
/// call made after shutdown). The type is `Clone` because a single failure
/// may have to reach the command result, the analysis stream and the
/// analysis completion condition at once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The engine process exited while a command was in flight, or the
    /// driver was used after shutdown. Carries the exit code verbatim,
    /// `None` when the process was killed by a signal.
    #[error("engine process died unexpectedly (exit code: {code:?})")]
    Terminated { code: Option<i32> },

    /// The command was superseded by a newer one, or the caller abandoned
    /// its result, before the engine answered.
    #[error("engine command cancelled before completion")]
    Cancelled,

    /// Protocol-level fault: unsupported option or feature, invalid value,
    /// engine violating the protocol, or an operation the wire dialect
    /// cannot express.
    #[error("{0}")]
    Protocol(String),

    /// Talking to the engine process failed at the transport level.
    #[error("engine i/o failed: {0}")]
    Io(String),
}

impl EngineError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
