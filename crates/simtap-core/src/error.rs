//! ---
//! simtap_section: "01-telemetry-client"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Error taxonomy for the telemetry client."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---

/// Shared result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Failures reported by the native host transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No host process accepted the session.
    #[error("host unavailable: {0}")]
    Unavailable(String),
    /// The host refused a single call (unknown datum, bad definition, ...).
    #[error("host rejected {operation}: {reason}")]
    Rejected {
        /// Transport operation that was refused.
        operation: &'static str,
        /// Host supplied reason.
        reason: String,
    },
    /// The transport no longer belongs to a live session.
    #[error("transport session is closed")]
    Closed,
    /// The native layer faulted in a way that leaves the session unusable
    /// (access violation while reading a host packet).
    #[error("native layer reported corrupted process state: {0}")]
    ProcessStateCorrupted(String),
}

impl TransportError {
    /// Whether this fault must be downgraded to a disconnect.
    pub fn is_process_state_corrupted(&self) -> bool {
        matches!(self, TransportError::ProcessStateCorrupted(_))
    }
}

/// Reply payload could not be mapped onto the registered layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Payload is shorter than `slots * 8` bytes.
    #[error("reply truncated: {slots} slots need {expected} bytes, got {actual}")]
    Truncated {
        /// Number of registered slots.
        slots: usize,
        /// Required payload length.
        expected: usize,
        /// Received payload length.
        actual: usize,
    },
}

/// Errors surfaced by [`crate::TelemetryClient`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The operation needs an open host session.
    #[error("no open host session")]
    NotConnected,
    /// A request was issued before the reply layout was finalized.
    #[error("data definition has not been finalized for this session")]
    NotFinalized,
    /// Finalization was already requested on this client.
    #[error("data definition already finalized")]
    AlreadyFinalized,
    /// Transport level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
