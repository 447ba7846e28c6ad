//! Engine-level error taxonomy.
//!
//! Supervisor retry policy matches on variant, not on string content, so the
//! distinction between "retry after backoff" and "retry immediately" is
//! structural rather than heuristic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer unreachable: {0}")]
    PeerUnreachable(&'static str),

    #[error("protocol desync: {0}")]
    Desync(&'static str),

    #[error("peer disconnected the session")]
    PeerDisconnected,

    #[error("unrecoverable gap at seq {seq}")]
    GapUnrecoverable { seq: u16 },

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl From<codec::Error> for Error {
    fn from(value: codec::Error) -> Self {
        match value {
            codec::Error::Desync(msg) => Self::Desync(msg),
        }
    }
}

impl Error {
    /// `true` if the supervisor should reconnect immediately instead of
    /// backing off (peer-initiated disconnects only, per the error taxonomy).
    pub fn requires_immediate_retry(&self) -> bool {
        matches!(self, Self::PeerDisconnected)
    }
}
