//! ---
//! simtap_section: "01-telemetry-client"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Two-phase data definition registration with the host."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::catalog::FieldCatalog;
use crate::decode::reply_len;
use crate::error::TransportError;
use crate::metrics::{ClientCounter, ClientMetrics};
use crate::transport::{DefinitionId, HostTransport};

/// Reply layout agreed with the host: slot `i` carries catalog field
/// `catalog_indices()[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyLayout {
    fields: Vec<usize>,
}

impl ReplyLayout {
    pub fn slot_count(&self) -> usize {
        self.fields.len()
    }

    pub fn byte_len(&self) -> usize {
        reply_len(self.fields.len())
    }

    pub fn catalog_indices(&self) -> &[usize] {
        &self.fields
    }
}

/// Tracks whether finalization was requested and the layout registered for
/// the current session.
#[derive(Debug)]
pub struct DataDefinitionRegistry {
    definition: DefinitionId,
    requested: bool,
    layout: Option<ReplyLayout>,
}

impl DataDefinitionRegistry {
    pub fn new(definition: DefinitionId) -> Self {
        Self {
            definition,
            requested: false,
            layout: None,
        }
    }

    pub fn definition(&self) -> DefinitionId {
        self.definition
    }

    /// Record that the catalog is complete. Only the first call counts.
    pub fn request_finalization(&mut self) -> bool {
        !std::mem::replace(&mut self.requested, true)
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }

    /// Layout registered for the current session.
    pub fn layout(&self) -> Option<&ReplyLayout> {
        self.layout.as_ref()
    }

    /// Forget the session's layout; the request flag survives for the next session.
    pub fn reset_session(&mut self) {
        self.layout = None;
    }

    /// Declare every catalog field, then finalize the reply layout.
    ///
    /// Fields the host refuses are skipped and never populate. A failure to
    /// finalize leaves the session without a layout.
    pub fn register<T: HostTransport>(
        &mut self,
        transport: &mut T,
        catalog: &FieldCatalog,
        backoff: Duration,
        metrics: &ClientMetrics,
    ) -> Result<&ReplyLayout, TransportError> {
        self.layout = None;
        // A previous attempt in this session may have left datums behind.
        transport.clear_data_definition(self.definition)?;
        let mut accepted = Vec::with_capacity(catalog.len());
        for (index, field) in catalog.iter().enumerate() {
            let units = field.unit().wire_name();
            match transport.add_to_data_definition(self.definition, field.name(), &units) {
                Ok(()) => {
                    debug!(datum = field.name(), units = %units, slot = accepted.len(), "datum declared");
                    accepted.push(index);
                }
                Err(err) => {
                    warn!(datum = field.name(), units = %units, error = %err, "host rejected datum; skipping");
                    metrics.incr(ClientCounter::RegistrationFailures);
                    thread::sleep(backoff);
                }
            }
        }

        if let Err(err) = transport.register_reply_layout(self.definition, accepted.len()) {
            warn!(definition = self.definition.0, error = %err, "reply layout registration failed");
            thread::sleep(backoff);
            return Err(err);
        }

        let layout = ReplyLayout { fields: accepted };
        info!(
            definition = self.definition.0,
            slots = layout.slot_count(),
            bytes = layout.byte_len(),
            declared = catalog.len(),
            "data definition finalized"
        );
        Ok(self.layout.insert(layout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{HostNotification, RequestId};

    #[derive(Default)]
    struct RecordingTransport {
        declared: Vec<(String, String)>,
        reject: Vec<&'static str>,
        layout: Option<usize>,
        fail_layout: bool,
    }

    impl HostTransport for RecordingTransport {
        fn clear_data_definition(&mut self, _definition: DefinitionId) -> Result<(), TransportError> {
            self.declared.clear();
            self.layout = None;
            Ok(())
        }

        fn add_to_data_definition(
            &mut self,
            _definition: DefinitionId,
            datum_name: &str,
            units_name: &str,
        ) -> Result<(), TransportError> {
            if self.reject.contains(&datum_name) {
                return Err(TransportError::Rejected {
                    operation: "add_to_data_definition",
                    reason: format!("unknown datum {datum_name}"),
                });
            }
            self.declared
                .push((datum_name.to_owned(), units_name.to_owned()));
            Ok(())
        }

        fn register_reply_layout(
            &mut self,
            _definition: DefinitionId,
            slots: usize,
        ) -> Result<(), TransportError> {
            if self.fail_layout {
                return Err(TransportError::Closed);
            }
            self.layout = Some(slots);
            Ok(())
        }

        fn request_data_on_user_object(
            &mut self,
            _request: RequestId,
            _definition: DefinitionId,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        fn receive_message(&mut self) -> Result<Vec<HostNotification>, TransportError> {
            Ok(Vec::new())
        }

        fn close(&mut self) {}

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn catalog() -> FieldCatalog {
        let mut catalog = FieldCatalog::new();
        catalog.declare("AIRSPEED INDICATED", "KNOTS");
        catalog.declare("VERTICAL SPEED", "FEET_PER_SECOND");
        catalog.declare("FLAPS HANDLE PERCENT", "PERCENT_OVER_100");
        catalog
    }

    #[test]
    fn units_are_space_normalised_on_the_wire() {
        let mut registry = DataDefinitionRegistry::new(DefinitionId(0));
        let mut transport = RecordingTransport::default();
        let metrics = ClientMetrics::new();
        let layout = registry
            .register(&mut transport, &catalog(), Duration::ZERO, &metrics)
            .expect("registration succeeds")
            .clone();

        assert_eq!(layout.slot_count(), 3);
        assert_eq!(layout.byte_len(), 24);
        assert_eq!(transport.layout, Some(3));
        assert_eq!(transport.declared[1].1, "FEET PER SECOND");
        assert_eq!(transport.declared[2].1, "PERCENT OVER 100");
    }

    #[test]
    fn rejected_datums_are_skipped_not_fatal() {
        let mut registry = DataDefinitionRegistry::new(DefinitionId(0));
        let mut transport = RecordingTransport {
            reject: vec!["VERTICAL SPEED"],
            ..RecordingTransport::default()
        };
        let metrics = ClientMetrics::new();
        registry
            .register(&mut transport, &catalog(), Duration::ZERO, &metrics)
            .expect("registration succeeds");

        let layout = registry.layout().expect("layout registered");
        assert_eq!(layout.catalog_indices(), &[0, 2]);
        assert_eq!(transport.layout, Some(2));
        assert_eq!(metrics.snapshot().registration_failures, 1);
    }

    #[test]
    fn empty_catalog_finalizes_zero_sized_layout() {
        let mut registry = DataDefinitionRegistry::new(DefinitionId(0));
        let mut transport = RecordingTransport::default();
        let metrics = ClientMetrics::new();
        let layout = registry
            .register(&mut transport, &FieldCatalog::new(), Duration::ZERO, &metrics)
            .expect("registration succeeds");
        assert_eq!(layout.byte_len(), 0);
        assert_eq!(transport.layout, Some(0));
    }

    #[test]
    fn failed_finalization_leaves_no_layout() {
        let mut registry = DataDefinitionRegistry::new(DefinitionId(0));
        let mut transport = RecordingTransport {
            fail_layout: true,
            ..RecordingTransport::default()
        };
        let metrics = ClientMetrics::new();
        let result = registry.register(&mut transport, &catalog(), Duration::ZERO, &metrics);
        assert_eq!(result.unwrap_err(), TransportError::Closed);
        assert!(registry.layout().is_none());
    }

    #[test]
    fn retry_after_failed_finalization_starts_from_a_clean_definition() {
        let mut registry = DataDefinitionRegistry::new(DefinitionId(0));
        let mut transport = RecordingTransport {
            fail_layout: true,
            ..RecordingTransport::default()
        };
        let metrics = ClientMetrics::new();
        assert!(registry
            .register(&mut transport, &catalog(), Duration::ZERO, &metrics)
            .is_err());

        transport.fail_layout = false;
        let layout = registry
            .register(&mut transport, &catalog(), Duration::ZERO, &metrics)
            .expect("second attempt succeeds");
        assert_eq!(layout.slot_count(), 3);
        assert_eq!(transport.declared.len(), 3);
    }

    #[test]
    fn finalization_request_counts_once() {
        let mut registry = DataDefinitionRegistry::new(DefinitionId(0));
        assert!(registry.request_finalization());
        assert!(!registry.request_finalization());
        assert!(registry.is_requested());
        registry.reset_session();
        assert!(registry.is_requested());
    }
}
