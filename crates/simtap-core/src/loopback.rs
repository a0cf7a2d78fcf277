//! ---
//! simtap_section: "01-telemetry-client"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "In-process host used by the daemon's simulated mode and the test suites."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
//! The loopback host behaves like the native one from the client's point of
//! view: opening a session posts a wake-up message to the owner's queue,
//! notifications are only visible through [`HostTransport::receive_message`],
//! and exceptions for bad requests arrive asynchronously.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::decode::encode_slots;
use crate::error::TransportError;
use crate::transport::{
    DefinitionId, HostConnector, HostException, HostInfo, HostNotification, HostTransport,
    ObjectData, OpenRequest, OwnerHandle, RawMessage, RequestId, USER_OBJECT_ID,
};

/// Host exception codes produced by the loopback host.
pub mod exception {
    pub const ERROR: u32 = 1;
    pub const UNRECOGNIZED_ID: u32 = 3;
    pub const NAME_UNRECOGNIZED: u32 = 7;
}

const HOST_NAME: &str = "Loopback Flight Simulator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiveFault {
    Corrupt,
    Panic,
}

#[derive(Debug, Default)]
struct Definition {
    datums: Vec<(String, String)>,
    slots: Option<usize>,
}

#[derive(Debug)]
struct ActiveSession {
    id: u64,
    owner: OwnerHandle,
    user_message_id: u32,
    pending: VecDeque<HostNotification>,
    definitions: BTreeMap<DefinitionId, Definition>,
}

#[derive(Debug)]
struct HostState {
    running: bool,
    sessions: u64,
    send_id: u32,
    session: Option<ActiveSession>,
    window: VecDeque<RawMessage>,
    values: HashMap<String, f64>,
    rejected: HashSet<String>,
    fault: Option<ReceiveFault>,
    reply_id_override: Option<RequestId>,
    truncate_to: Option<usize>,
    reject_layouts: usize,
}

impl HostState {
    fn next_send_id(&mut self) -> u32 {
        self.send_id = self.send_id.wrapping_add(1);
        self.send_id
    }

    fn session_mut(&mut self, id: u64) -> Result<&mut ActiveSession, TransportError> {
        match self.session.as_mut() {
            Some(session) if session.id == id => Ok(session),
            _ => Err(TransportError::Closed),
        }
    }

    /// Queue a notification for the active session and wake its owner.
    fn notify(&mut self, notification: HostNotification) {
        if let Some(session) = self.session.as_mut() {
            session.pending.push_back(notification);
            let mut message = RawMessage::new(session.user_message_id);
            message.wparam = session.owner.0;
            self.window.push_back(message);
        }
    }
}

/// Shared handle to an in-process host. Clones observe the same host.
#[derive(Debug, Clone)]
pub struct LoopbackHost {
    state: Arc<Mutex<HostState>>,
}

impl Default for LoopbackHost {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHost {
    /// A running host with no session and every datum reading zero.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState {
                running: true,
                sessions: 0,
                send_id: 0,
                session: None,
                window: VecDeque::new(),
                values: HashMap::new(),
                rejected: HashSet::new(),
                fault: None,
                reply_id_override: None,
                truncate_to: None,
                reject_layouts: 0,
            })),
        }
    }

    /// Drain the owner's message queue.
    pub fn pump(&self) -> Vec<RawMessage> {
        self.state.lock().window.drain(..).collect()
    }

    /// Post an arbitrary message to the owner's queue.
    pub fn post(&self, message: RawMessage) {
        self.state.lock().window.push_back(message);
    }

    pub fn set_value(&self, datum: &str, value: f64) {
        self.state.lock().values.insert(datum.to_owned(), value);
    }

    pub fn value(&self, datum: &str) -> f64 {
        self.state.lock().values.get(datum).copied().unwrap_or(0.0)
    }

    /// Refuse any later declaration of `datum`.
    pub fn reject_datum(&self, datum: &str) {
        self.state.lock().rejected.insert(datum.to_owned());
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Start or stop accepting new sessions.
    pub fn set_running(&self, running: bool) {
        self.state.lock().running = running;
    }

    /// Simulator shutdown: the active session receives a quit notification and
    /// new sessions are refused until [`LoopbackHost::set_running`].
    pub fn quit(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.notify(HostNotification::Quit);
    }

    /// Raise an asynchronous exception against the active session.
    pub fn raise_exception(&self, code: u32) {
        let mut state = self.state.lock();
        let send_id = state.next_send_id();
        state.notify(HostNotification::Exception(HostException {
            code,
            send_id,
            index: 0,
        }));
    }

    /// Next receive reports corrupted process state.
    pub fn corrupt_next_receive(&self) {
        self.state.lock().fault = Some(ReceiveFault::Corrupt);
    }

    /// Next receive panics inside the transport.
    pub fn panic_next_receive(&self) {
        self.state.lock().fault = Some(ReceiveFault::Panic);
    }

    /// Stamp replies with `request_id` instead of the requested id.
    pub fn reply_with_request_id(&self, request_id: Option<RequestId>) {
        self.state.lock().reply_id_override = request_id;
    }

    /// Cut reply payloads to `len` bytes.
    pub fn truncate_replies_to(&self, len: Option<usize>) {
        self.state.lock().truncate_to = len;
    }

    /// Refuse the next reply layout registration.
    pub fn reject_next_layout(&self) {
        self.state.lock().reject_layouts += 1;
    }

    /// Number of sessions opened since the host was created.
    pub fn sessions_opened(&self) -> u64 {
        self.state.lock().sessions
    }

    pub fn has_session(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// Datums `(name, units)` declared on `definition` in the active session.
    pub fn declared_datums(&self, definition: DefinitionId) -> Vec<(String, String)> {
        self.state
            .lock()
            .session
            .as_ref()
            .and_then(|session| session.definitions.get(&definition))
            .map(|definition| definition.datums.clone())
            .unwrap_or_default()
    }

    /// Slot count fixed for `definition` in the active session.
    pub fn registered_slots(&self, definition: DefinitionId) -> Option<usize> {
        self.state
            .lock()
            .session
            .as_ref()
            .and_then(|session| session.definitions.get(&definition))
            .and_then(|definition| definition.slots)
    }
}

impl HostConnector for LoopbackHost {
    type Transport = LoopbackTransport;

    fn open(&self, request: &OpenRequest<'_>) -> Result<LoopbackTransport, TransportError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(TransportError::Unavailable(format!(
                "{HOST_NAME} is not running"
            )));
        }
        state.sessions += 1;
        let id = state.sessions;
        state.session = Some(ActiveSession {
            id,
            owner: request.owner,
            user_message_id: request.user_message_id,
            pending: VecDeque::new(),
            definitions: BTreeMap::new(),
        });
        state.notify(HostNotification::Open(HostInfo {
            application_name: HOST_NAME.to_owned(),
            version_major: 1,
            version_minor: 0,
        }));
        debug!(session = id, client = request.application_name, "loopback session opened");
        Ok(LoopbackTransport {
            host: self.clone(),
            session: id,
        })
    }
}

/// Transport bound to one loopback session.
#[derive(Debug)]
pub struct LoopbackTransport {
    host: LoopbackHost,
    session: u64,
}

impl HostTransport for LoopbackTransport {
    fn clear_data_definition(&mut self, definition: DefinitionId) -> Result<(), TransportError> {
        let mut state = self.host.state.lock();
        let session = state.session_mut(self.session)?;
        session.definitions.remove(&definition);
        Ok(())
    }

    fn add_to_data_definition(
        &mut self,
        definition: DefinitionId,
        datum_name: &str,
        units_name: &str,
    ) -> Result<(), TransportError> {
        let mut state = self.host.state.lock();
        if state.rejected.contains(datum_name) {
            return Err(TransportError::Rejected {
                operation: "add_to_data_definition",
                reason: format!("unrecognized datum {datum_name}"),
            });
        }
        let session = state.session_mut(self.session)?;
        let entry = session.definitions.entry(definition).or_default();
        if entry.slots.is_some() {
            return Err(TransportError::Rejected {
                operation: "add_to_data_definition",
                reason: format!("definition {} is already registered", definition.0),
            });
        }
        entry
            .datums
            .push((datum_name.to_owned(), units_name.to_owned()));
        Ok(())
    }

    fn register_reply_layout(
        &mut self,
        definition: DefinitionId,
        slots: usize,
    ) -> Result<(), TransportError> {
        let mut state = self.host.state.lock();
        if state.reject_layouts > 0 {
            state.reject_layouts -= 1;
            return Err(TransportError::Rejected {
                operation: "register_reply_layout",
                reason: format!("definition {} refused by the host", definition.0),
            });
        }
        let session = state.session_mut(self.session)?;
        let entry = session.definitions.entry(definition).or_default();
        if entry.datums.len() != slots {
            return Err(TransportError::Rejected {
                operation: "register_reply_layout",
                reason: format!(
                    "definition {} holds {} datums, layout declares {slots}",
                    definition.0,
                    entry.datums.len()
                ),
            });
        }
        entry.slots = Some(slots);
        Ok(())
    }

    fn request_data_on_user_object(
        &mut self,
        request: RequestId,
        definition: DefinitionId,
    ) -> Result<(), TransportError> {
        let mut state = self.host.state.lock();
        let session = state.session_mut(self.session)?;
        let datums: Option<Vec<String>> = session
            .definitions
            .get(&definition)
            .filter(|definition| definition.slots.is_some())
            .map(|definition| definition.datums.iter().map(|(name, _)| name.clone()).collect());

        let Some(datums) = datums else {
            let send_id = state.next_send_id();
            state.notify(HostNotification::Exception(HostException {
                code: exception::UNRECOGNIZED_ID,
                send_id,
                index: 2,
            }));
            return Ok(());
        };

        let values: Vec<f64> = datums
            .iter()
            .map(|name| state.values.get(name).copied().unwrap_or(0.0))
            .collect();
        let mut payload = encode_slots(&values);
        if let Some(len) = state.truncate_to {
            payload.truncate(len);
        }
        let request_id = state.reply_id_override.unwrap_or(request);
        state.notify(HostNotification::ObjectData(ObjectData {
            request_id,
            definition,
            object_id: USER_OBJECT_ID,
            payload,
        }));
        Ok(())
    }

    fn receive_message(&mut self) -> Result<Vec<HostNotification>, TransportError> {
        let fault = self.host.state.lock().fault.take();
        match fault {
            Some(ReceiveFault::Corrupt) => {
                return Err(TransportError::ProcessStateCorrupted(
                    "access violation reading host packet".to_owned(),
                ))
            }
            Some(ReceiveFault::Panic) => panic!("loopback receive fault"),
            None => {}
        }
        let mut state = self.host.state.lock();
        let session = state.session_mut(self.session)?;
        Ok(session.pending.drain(..).collect())
    }

    fn close(&mut self) {
        let mut state = self.host.state.lock();
        if state
            .session
            .as_ref()
            .is_some_and(|session| session.id == self.session)
        {
            state.session = None;
            debug!(session = self.session, "loopback session closed");
        }
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}
