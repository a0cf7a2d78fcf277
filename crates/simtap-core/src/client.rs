//! ---
//! simtap_section: "01-telemetry-client"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Connection lifecycle manager and host notification dispatch."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use prometheus::Registry;
use simtap_common::config::{ClientConfig, FieldConfig};
use simtap_common::logging::{log_lifecycle_event, LifecycleOutcome, LogContext};
use tracing::{debug, trace, warn};

use crate::bus::{DataSample, EventBus};
use crate::catalog::FieldCatalog;
use crate::correlator::{ReplyMatch, RequestCorrelator};
use crate::decode::decode_slots;
use crate::error::{ClientError, Result};
use crate::metrics::{ClientCounter, ClientMetrics, ClientMetricsExporter, ClientMetricsSnapshot};
use crate::registry::{DataDefinitionRegistry, ReplyLayout};
use crate::session::{ConnectionState, Session};
use crate::transport::{
    DefinitionId, HostConnector, HostException, HostInfo, HostNotification, HostTransport,
    ObjectData, OpenRequest, OwnerHandle, RawMessage, RequestId,
};

/// Definition id of the single reply structure.
pub const DEFINITION_ID: DefinitionId = DefinitionId(0);
/// Request id of the single request stream.
pub const REQUEST_ID: RequestId = RequestId(0);

/// Telemetry client for one host.
///
/// Everything runs on the caller's thread: the owning process drives
/// requests from its own timer and hands every raw message to
/// [`TelemetryClient::forward_message`].
pub struct TelemetryClient<C: HostConnector> {
    connector: C,
    config: ClientConfig,
    catalog: FieldCatalog,
    session: Session<C::Transport>,
    registry: DataDefinitionRegistry,
    correlator: RequestCorrelator,
    bus: EventBus,
    metrics: ClientMetrics,
    samples: u64,
}

impl<C: HostConnector> TelemetryClient<C> {
    pub fn new(connector: C, config: ClientConfig) -> Self {
        Self {
            connector,
            config,
            catalog: FieldCatalog::new(),
            session: Session::new(),
            registry: DataDefinitionRegistry::new(DEFINITION_ID),
            correlator: RequestCorrelator::new(REQUEST_ID, DEFINITION_ID),
            bus: EventBus::new(),
            metrics: ClientMetrics::new(),
            samples: 0,
        }
    }

    /// Event bus; clone it to subscribe from elsewhere.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Declared fields with their most recently decoded values.
    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Identifier stamped on every data request.
    pub fn request_id(&self) -> RequestId {
        self.correlator.request_id()
    }

    /// Current lifecycle state of the host connection.
    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Whether the host has confirmed the current session.
    pub fn is_connected(&self) -> bool {
        self.session.is_open()
    }

    /// Layout registered with the current session, if finalized.
    pub fn layout(&self) -> Option<&ReplyLayout> {
        self.registry.layout()
    }

    /// Point-in-time copy of the client counters.
    pub fn metrics(&self) -> ClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Register the client counters and the request latency histogram with
    /// `registry`. Only activity after this call is exported.
    pub fn export_metrics(&mut self, registry: &Registry) -> std::result::Result<(), prometheus::Error> {
        let exporter = ClientMetricsExporter::register(registry)?;
        self.metrics.attach_exporter(exporter);
        Ok(())
    }

    /// Open a session bound to `owner`. `Connected` follows once the host
    /// confirms through the message queue. A second call while a transport
    /// exists is ignored.
    pub fn connect(&mut self, owner: OwnerHandle) -> Result<()> {
        if self.session.has_transport() {
            warn!(state = ?self.session.state(), "connect ignored; a host session already exists");
            return Ok(());
        }
        let request = OpenRequest {
            application_name: &self.config.application_name,
            owner,
            user_message_id: self.config.user_message_id,
        };
        match self.connector.open(&request) {
            Ok(transport) => {
                self.session.attach(transport);
                debug!(owner = owner.0, user_message_id = self.config.user_message_id, "host session requested");
                Ok(())
            }
            Err(err) => {
                let ctx = LogContext::new().with_application(&self.config.application_name);
                log_lifecycle_event(
                    Some(&ctx),
                    "session.connect",
                    &format!("unable to open host session: {err}"),
                    LifecycleOutcome::Fault,
                );
                Err(err.into())
            }
        }
    }

    /// Explicit close. No event is emitted; the catalog is kept.
    pub fn close_connection(&mut self) {
        if self.teardown() {
            let ctx = self.log_context();
            log_lifecycle_event(
                Some(&ctx),
                "session.close",
                "host session closed",
                LifecycleOutcome::Success,
            );
        }
    }

    /// Declare a field. Unknown unit tokens, and any declaration after
    /// finalization, are dropped and yield `None`.
    pub fn declare_field(&mut self, name: impl Into<String>, unit: &str) -> Option<usize> {
        let name = name.into();
        if self.registry.is_requested() {
            warn!(datum = %name, units = unit, "declaration after finalization ignored");
            return None;
        }
        self.catalog.declare(name, unit)
    }

    /// Declare an ordered list of fields; returns how many were accepted.
    pub fn declare_fields<'a, I>(&mut self, fields: I) -> usize
    where
        I: IntoIterator<Item = &'a FieldConfig>,
    {
        fields
            .into_iter()
            .filter_map(|field| self.declare_field(field.name.as_str(), &field.unit))
            .count()
    }

    /// Freeze the catalog. Registration with the host runs now if the
    /// session is open, otherwise as soon as it opens, and again for every
    /// later session.
    ///
    /// While an open session has no registered layout (the host failed the
    /// previous attempt) calling this again retries the registration.
    pub fn finalize_registration(&mut self) -> Result<()> {
        let first = self.registry.request_finalization();
        let retry = self.session.is_open() && self.registry.layout().is_none();
        if !first && !retry {
            return Err(ClientError::AlreadyFinalized);
        }
        if self.session.is_open() {
            self.register_definition()?;
        } else {
            debug!(fields = self.catalog.len(), "finalization deferred until the host session opens");
        }
        Ok(())
    }

    /// Ask the host for one sample of the registered layout.
    pub fn request_data(&mut self) -> Result<RequestId> {
        if !self.session.is_open() {
            return Err(ClientError::NotConnected);
        }
        if self.registry.layout().is_none() {
            return Err(ClientError::NotFinalized);
        }
        let Some(transport) = self.session.transport_mut() else {
            return Err(ClientError::NotConnected);
        };
        match self.correlator.issue(transport) {
            Ok(id) => {
                self.metrics.incr(ClientCounter::RequestsSent);
                Ok(id)
            }
            Err(err) => {
                warn!(request_id = %self.correlator.request_id(), error = %err, "data request failed");
                thread::sleep(self.config.fault_backoff);
                Err(err.into())
            }
        }
    }

    /// Entry point for every message the owning process receives.
    ///
    /// Returns `true` when the message was host traffic and has been
    /// consumed; `false` means the caller should fall through to its default
    /// handling. A corrupted-state fault in the native layer never escapes:
    /// the session is torn down, `Disconnected` is emitted and `false` is
    /// returned.
    pub fn forward_message(&mut self, message: &RawMessage) -> bool {
        if message.id != self.config.user_message_id {
            return false;
        }
        let Some(transport) = self.session.transport_mut() else {
            return false;
        };

        let received = panic::catch_unwind(AssertUnwindSafe(|| transport.receive_message()));
        let notifications = match received {
            Ok(Ok(notifications)) => notifications,
            Ok(Err(err)) if err.is_process_state_corrupted() => {
                self.fault_disconnect(&err.to_string());
                return false;
            }
            Ok(Err(err)) => {
                warn!(error = %err, "host message delivery failed; continuing");
                thread::sleep(self.config.fault_backoff);
                return true;
            }
            Err(payload) => {
                self.fault_disconnect(&panic_reason(payload.as_ref()));
                return false;
            }
        };

        for notification in notifications {
            self.dispatch(notification);
        }
        true
    }

    fn dispatch(&mut self, notification: HostNotification) {
        if !self.session.handles(&notification) {
            trace!(kind = notification.kind(), "no handler installed; notification dropped");
            return;
        }
        match notification {
            HostNotification::Open(info) => self.on_open(info),
            HostNotification::Quit => self.on_quit(),
            HostNotification::Exception(exception) => self.on_exception(exception),
            HostNotification::ObjectData(data) => self.on_object_data(data),
        }
    }

    fn on_open(&mut self, info: HostInfo) {
        let generation = self.session.mark_open();
        self.metrics.incr(ClientCounter::SessionsOpened);
        let ctx = self.log_context().with_session(generation);
        log_lifecycle_event(
            Some(&ctx),
            "session.open",
            &format!(
                "connected to {} {}.{}",
                info.application_name, info.version_major, info.version_minor
            ),
            LifecycleOutcome::Success,
        );
        if self.registry.is_requested() {
            if let Err(err) = self.register_definition() {
                warn!(error = %err, "data definition not registered for this session");
            }
        }
        self.bus.emit_connected();
    }

    fn on_quit(&mut self) {
        let ctx = self.log_context();
        log_lifecycle_event(
            Some(&ctx),
            "session.quit",
            "host ended the session",
            LifecycleOutcome::Success,
        );
        self.teardown();
        self.bus.emit_disconnected();
    }

    fn on_exception(&mut self, exception: HostException) {
        self.metrics.incr(ClientCounter::HostExceptions);
        warn!(
            code = exception.code,
            send_id = exception.send_id,
            index = exception.index,
            "host reported an exception"
        );
        thread::sleep(self.config.fault_backoff);
    }

    fn on_object_data(&mut self, data: ObjectData) {
        let latency = match self.correlator.correlate(data.request_id) {
            ReplyMatch::Expected { latency } => latency,
            ReplyMatch::Unknown(id) => {
                self.metrics.incr(ClientCounter::UnknownReplies);
                debug!(request_id = %id, expected = %self.correlator.request_id(), "reply for unknown request id");
                self.bus.emit_unknown_request_id(id);
                return;
            }
        };

        let Some(layout) = self.registry.layout() else {
            debug!("reply arrived before the layout was registered; dropped");
            return;
        };
        let values = match decode_slots(&data.payload, layout.slot_count()) {
            Ok(values) => values,
            Err(err) => {
                self.metrics.incr(ClientCounter::DecodeFailures);
                warn!(request_id = %data.request_id, error = %err, "discarding malformed reply");
                return;
            }
        };

        self.catalog.apply(layout.catalog_indices(), &values);
        let fields = self.catalog.select(layout.catalog_indices());
        self.metrics.incr(ClientCounter::SamplesDecoded);
        if let Some(latency) = latency {
            self.metrics.observe_latency(latency);
        }
        self.samples += 1;
        let sample = DataSample {
            sequence: self.samples,
            fields,
            latency,
        };
        trace!(sequence = sample.sequence, slots = sample.fields.len(), "sample decoded");
        self.bus.emit_received_data(&sample);
    }

    fn register_definition(&mut self) -> Result<()> {
        let Some(transport) = self.session.transport_mut() else {
            return Err(ClientError::NotConnected);
        };
        match self
            .registry
            .register(transport, &self.catalog, self.config.fault_backoff, &self.metrics)
        {
            Ok(_) => {
                self.session.install_data_handler();
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn fault_disconnect(&mut self, reason: &str) {
        self.metrics.incr(ClientCounter::TransportFaults);
        let ctx = self.log_context();
        log_lifecycle_event(
            Some(&ctx),
            "session.fault",
            &format!("native transport fault while receiving: {reason}"),
            LifecycleOutcome::Fault,
        );
        self.teardown();
        self.bus.emit_disconnected();
    }

    fn teardown(&mut self) -> bool {
        let torn_down = self.session.mark_closed();
        self.registry.reset_session();
        self.correlator.reset();
        torn_down
    }

    fn log_context(&self) -> LogContext<'_> {
        LogContext::new()
            .with_application(&self.config.application_name)
            .with_session(self.session.generation())
            .with_request_id(self.correlator.request_id().0)
    }
}

impl<C: HostConnector> Drop for TelemetryClient<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        (*reason).to_owned()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "native layer panicked".to_owned()
    }
}
