//! ---
//! simtap_section: "01-telemetry-client"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Connection state holder and installed host handlers."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
use tracing::debug;

use crate::transport::{HostNotification, HostTransport};

/// Lifecycle state of the host connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Open,
}

/// Host notifications the client currently handles.
///
/// Session handlers (open, quit, exception) are installed when a transport is
/// attached; the data handler only once the reply layout is finalized.
/// Anything without an installed handler is dropped on delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostHandlers {
    pub open: bool,
    pub quit: bool,
    pub exception: bool,
    pub object_data: bool,
}

impl HostHandlers {
    fn session() -> Self {
        Self {
            open: true,
            quit: true,
            exception: true,
            object_data: false,
        }
    }

    pub fn handles(&self, notification: &HostNotification) -> bool {
        match notification {
            HostNotification::Open(_) => self.open,
            HostNotification::Quit => self.quit,
            HostNotification::Exception(_) => self.exception,
            HostNotification::ObjectData(_) => self.object_data,
        }
    }
}

/// Owns the transport (if any) and the connection state.
///
/// The named transitions are the only mutators.
#[derive(Debug)]
pub struct Session<T> {
    transport: Option<T>,
    state: ConnectionState,
    handlers: HostHandlers,
    generation: u64,
}

impl<T> Default for Session<T> {
    fn default() -> Self {
        Self {
            transport: None,
            state: ConnectionState::Closed,
            handlers: HostHandlers::default(),
            generation: 0,
        }
    }
}

impl<T: HostTransport> Session<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a freshly opened transport and install the session handlers.
    pub fn attach(&mut self, transport: T) {
        debug!(transport = transport.name(), "transport attached");
        self.transport = Some(transport);
        self.handlers = HostHandlers::session();
    }

    /// Host confirmed the session. Returns the new session generation.
    pub fn mark_open(&mut self) -> u64 {
        self.state = ConnectionState::Open;
        self.generation += 1;
        self.generation
    }

    /// Detach every handler, then close and drop the transport.
    ///
    /// Returns `false` when there was nothing to tear down.
    pub fn mark_closed(&mut self) -> bool {
        self.handlers = HostHandlers::default();
        self.state = ConnectionState::Closed;
        match self.transport.take() {
            Some(mut transport) => {
                transport.close();
                debug!(transport = transport.name(), "transport closed");
                true
            }
            None => false,
        }
    }

    /// Route object-data replies to the client. No-op without a transport,
    /// so a layout registered after teardown never enables the handler.
    pub fn install_data_handler(&mut self) {
        if self.transport.is_some() {
            self.handlers.object_data = true;
        }
    }

    /// Whether a handler is installed for `notification`.
    pub fn handles(&self, notification: &HostNotification) -> bool {
        self.handlers.handles(notification)
    }

    pub fn handlers(&self) -> HostHandlers {
        self.handlers
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True once the host has confirmed the session.
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Number of sessions opened so far; bumped by [`Session::mark_open`].
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Transport of the attached session, if any.
    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.transport.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{DefinitionId, HostInfo, RequestId};

    #[derive(Default)]
    struct CountingTransport {
        closed: bool,
    }

    impl HostTransport for CountingTransport {
        fn clear_data_definition(&mut self, _definition: DefinitionId) -> Result<(), TransportError> {
            Ok(())
        }

        fn add_to_data_definition(
            &mut self,
            _definition: DefinitionId,
            _datum_name: &str,
            _units_name: &str,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        fn register_reply_layout(
            &mut self,
            _definition: DefinitionId,
            _slots: usize,
        ) -> Result<(), TransportError> {
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

        fn close(&mut self) {
            self.closed = true;
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn open_notification() -> HostNotification {
        HostNotification::Open(HostInfo {
            application_name: "host".into(),
            version_major: 1,
            version_minor: 0,
        })
    }

    #[test]
    fn attach_installs_session_handlers_only() {
        let mut session = Session::new();
        session.attach(CountingTransport::default());
        assert!(session.handles(&open_notification()));
        assert!(session.handles(&HostNotification::Quit));
        assert!(!session.handlers().object_data);
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[test]
    fn open_and_close_transitions() {
        let mut session = Session::new();
        session.attach(CountingTransport::default());
        assert_eq!(session.mark_open(), 1);
        session.install_data_handler();
        assert!(session.is_open());
        assert!(session.handlers().object_data);

        assert!(session.mark_closed());
        assert!(!session.is_open());
        assert!(!session.has_transport());
        assert_eq!(session.handlers(), HostHandlers::default());
        assert!(!session.mark_closed());
    }

    #[test]
    fn data_handler_needs_a_transport() {
        let mut session: Session<CountingTransport> = Session::new();
        session.install_data_handler();
        assert!(!session.handlers().object_data);
    }

    #[test]
    fn generation_counts_every_open() {
        let mut session = Session::new();
        session.attach(CountingTransport::default());
        session.mark_open();
        session.mark_closed();
        session.attach(CountingTransport::default());
        assert_eq!(session.mark_open(), 2);
        assert_eq!(session.generation(), 2);
    }
}
