//! ---
//! simtap_section: "01-telemetry-client"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Telemetry client core: catalog, registration, correlation, decode and events."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
//! Flight simulator telemetry client.
//!
//! A [`TelemetryClient`] holds an ordered catalog of `(name, unit)` fields,
//! registers them with the host as one reply structure, issues data requests
//! and turns the host's packed float replies back into named values that are
//! fanned out through the [`EventBus`].

pub mod bus;
pub mod catalog;
pub mod client;
pub mod correlator;
pub mod decode;
pub mod error;
pub mod loopback;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod transport;

pub use bus::{ClientEvent, DataSample, EventBus, EventKind, Signal, Subscription};
pub use catalog::{FieldCatalog, FieldDeclaration, FieldValue, Unit};
pub use client::{TelemetryClient, DEFINITION_ID, REQUEST_ID};
pub use correlator::{ReplyMatch, RequestCorrelator};
pub use decode::{decode_slots, encode_slots, reply_len, SLOT_WIDTH};
pub use error::{ClientError, DecodeError, Result, TransportError};
pub use loopback::{LoopbackHost, LoopbackTransport};
pub use metrics::{ClientCounter, ClientMetrics, ClientMetricsExporter, ClientMetricsSnapshot};
pub use registry::{DataDefinitionRegistry, ReplyLayout};
pub use session::{ConnectionState, HostHandlers, Session};
pub use prometheus;
pub use transport::{
    DefinitionId, HostConnector, HostException, HostInfo, HostNotification, HostTransport,
    ObjectData, OpenRequest, OwnerHandle, RawMessage, RequestId, USER_OBJECT_ID,
};
