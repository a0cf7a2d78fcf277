//! ---
//! simtap_section: "01-telemetry-client"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Single-stream request issue and reply matching."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::TransportError;
use crate::transport::{DefinitionId, HostTransport, RequestId};

/// Outcome of matching a reply against the client's request stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMatch {
    /// Reply belongs to our stream; latency is measured from the latest request.
    Expected { latency: Option<Duration> },
    /// Reply carries an id this client never issued.
    Unknown(RequestId),
}

/// Issues requests under one constant id and matches replies back to it.
///
/// Overlapping requests are not prevented: a second request before the first
/// reply simply restarts the latency clock.
#[derive(Debug)]
pub struct RequestCorrelator {
    request_id: RequestId,
    definition: DefinitionId,
    issued_at: Option<Instant>,
}

impl RequestCorrelator {
    pub fn new(request_id: RequestId, definition: DefinitionId) -> Self {
        Self {
            request_id,
            definition,
            issued_at: None,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn issue<T: HostTransport>(&mut self, transport: &mut T) -> Result<RequestId, TransportError> {
        transport.request_data_on_user_object(self.request_id, self.definition)?;
        self.issued_at = Some(Instant::now());
        trace!(request_id = %self.request_id, "data request issued");
        Ok(self.request_id)
    }

    pub fn correlate(&mut self, reply: RequestId) -> ReplyMatch {
        if reply != self.request_id {
            return ReplyMatch::Unknown(reply);
        }
        let latency = self.issued_at.take().map(|issued| issued.elapsed());
        ReplyMatch::Expected { latency }
    }

    /// Drop the latency clock; used when the session goes away.
    pub fn reset(&mut self) {
        self.issued_at = None;
    }
}
