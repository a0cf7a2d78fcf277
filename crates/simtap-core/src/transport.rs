//! ---
//! simtap_section: "02-transport-host"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Native host transport abstraction and host notification types."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
use std::fmt;

use bytes::Bytes;

use crate::error::TransportError;

/// Identifier of a data definition registered with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionId(pub u32);

/// Identifier correlating a data request with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque routing handle of the owning process (a window handle on the host
/// platform). The host posts its notifications to this owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerHandle(pub u64);

/// Object id of the user-controlled aircraft.
pub const USER_OBJECT_ID: u32 = 0;

/// A raw message taken off the owning process' message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage {
    /// Message id; host traffic uses the configured user message id.
    pub id: u32,
    pub wparam: u64,
    pub lparam: i64,
}

impl RawMessage {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            wparam: 0,
            lparam: 0,
        }
    }
}

/// Parameters for opening a host session.
#[derive(Debug, Clone, Copy)]
pub struct OpenRequest<'a> {
    pub application_name: &'a str,
    pub owner: OwnerHandle,
    pub user_message_id: u32,
}

/// Host handshake details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub application_name: String,
    pub version_major: u32,
    pub version_minor: u32,
}

/// Exception reported asynchronously by the host for an earlier call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostException {
    pub code: u32,
    /// Packet id of the offending call.
    pub send_id: u32,
    /// Parameter index the host complained about.
    pub index: u32,
}

/// Data reply for a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectData {
    pub request_id: RequestId,
    pub definition: DefinitionId,
    pub object_id: u32,
    /// Raw reply struct, see [`crate::decode`].
    pub payload: Bytes,
}

/// Typed notification decoded by the transport from pending host traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum HostNotification {
    Open(HostInfo),
    Quit,
    Exception(HostException),
    ObjectData(ObjectData),
}

impl HostNotification {
    pub fn kind(&self) -> &'static str {
        match self {
            HostNotification::Open(_) => "open",
            HostNotification::Quit => "quit",
            HostNotification::Exception(_) => "exception",
            HostNotification::ObjectData(_) => "object_data",
        }
    }
}

/// Opens sessions with the host.
pub trait HostConnector {
    /// Transport produced for every opened session.
    type Transport: HostTransport;

    /// Open a session. The host confirms asynchronously with
    /// [`HostNotification::Open`].
    fn open(&self, request: &OpenRequest<'_>) -> Result<Self::Transport, TransportError>;
}

/// One open session with the host.
pub trait HostTransport: Send {
    /// Drop every datum previously added to `definition`.
    fn clear_data_definition(&mut self, definition: DefinitionId) -> Result<(), TransportError>;

    /// Add a float64 datum to `definition`.
    fn add_to_data_definition(
        &mut self,
        definition: DefinitionId,
        datum_name: &str,
        units_name: &str,
    ) -> Result<(), TransportError>;

    /// Fix the reply layout of `definition` to `slots` consecutive float64 values.
    fn register_reply_layout(
        &mut self,
        definition: DefinitionId,
        slots: usize,
    ) -> Result<(), TransportError>;

    /// Ask for one sample of `definition` for the user-controlled object.
    fn request_data_on_user_object(
        &mut self,
        request: RequestId,
        definition: DefinitionId,
    ) -> Result<(), TransportError>;

    /// Decode all pending host traffic into notifications.
    fn receive_message(&mut self) -> Result<Vec<HostNotification>, TransportError>;

    /// Close the session. Pending and future traffic is dropped.
    fn close(&mut self);

    /// Human-readable transport name for logging.
    fn name(&self) -> &'static str;
}
