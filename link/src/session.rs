//! The client session core.
//!
//! One session owns one transport, the table of in-flight requests keyed by a
//! strictly increasing identifier, and the settings that govern discovery,
//! draining and the unload guard. The state machine is observable through
//! [`Session::status`]: `Closed` is terminal; transport loss forgets the
//! handle and the next operation rediscovers and reconnects.

use crate::discovery::Discovery;
use crate::error::{LinkError, Result};
use crate::frames::{encode_frame, error_from_payload, parse_inbound, InboundMessage, ResultPayload};
use crate::settings::{Settings, WaitPolicy};
use crate::transport::{Frame, ReadyState, Transport, TransportConnector, WsConnector};
use crate::unload::{self, PendingReporter};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use trellis_commons::protocol::{Command, PROTOCOL_MAJOR, PROTOCOL_MINOR};
use trellis_commons::{validate, Fingerprint, ParamMap, Query, Validator};

/// Cadence of the cooperative ready/drain polling loops.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Terminally closed; any further use fails.
    Closed,
    /// No live transport; the next operation reconnects.
    NotConnected,
    Connecting,
    Open,
    /// Open with buffered bytes or outstanding requests.
    Active,
}

/// Wall-clock source, injectable for tests.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// The default clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

struct PendingRequest {
    command: Command,
    tx: oneshot::Sender<Result<ResultPayload>>,
}

struct ConnState {
    transport: Option<Arc<dyn Transport>>,
    connected_at: u64,
    last_id: u64,
    hello_sent: bool,
}

pub(crate) struct SessionShared {
    settings: Settings,
    connector: Arc<dyn TransportConnector>,
    discovery: Discovery,
    clock: Arc<dyn Clock>,
    conn: Mutex<ConnState>,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    closed: AtomicBool,
}

/// A Trellis client session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Create a session over the production websocket transport.
    pub fn new(settings: Settings) -> Result<Session> {
        Self::with_parts(settings, Arc::new(WsConnector), Arc::new(SystemClock))
    }

    /// Create a session with an explicit transport connector and clock.
    pub fn with_parts(
        settings: Settings,
        connector: Arc<dyn TransportConnector>,
        clock: Arc<dyn Clock>,
    ) -> Result<Session> {
        settings.validate()?;
        let discovery = Discovery::new(&settings);
        let shared = Arc::new(SessionShared {
            settings,
            connector,
            discovery,
            clock,
            conn: Mutex::new(ConnState {
                transport: None,
                connected_at: 0,
                last_id: 0,
                hello_sent: false,
            }),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let reporter: Arc<dyn PendingReporter> = shared.clone();
        unload::register_session(Arc::downgrade(&reporter));

        // Kick off discovery so the first operation finds a warm cache.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared_bg = shared.clone();
            handle.spawn(async move {
                let _ = shared_bg.discovery.hosts().await;
            });
        }

        Ok(Session { shared })
    }

    /// Current session status.
    pub fn status(&self) -> Status {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Status::Closed;
        }
        let conn = self.shared.conn.lock();
        let Some(transport) = &conn.transport else {
            return Status::NotConnected;
        };
        match transport.ready_state() {
            ReadyState::Connecting => Status::Connecting,
            ReadyState::Closing | ReadyState::Closed => Status::NotConnected,
            ReadyState::Open => {
                if transport.buffered_bytes() > 0 || !self.shared.pending.lock().is_empty() {
                    Status::Active
                } else {
                    Status::Open
                }
            }
        }
    }

    /// Execute a whitelisted query.
    pub async fn query(&self, query: &Query, params: ParamMap) -> Result<ResultPayload> {
        self.query_validated(query, params, &[]).await
    }

    /// Execute a whitelisted query, running validators locally first.
    pub async fn query_validated(
        &self,
        query: &Query,
        params: ParamMap,
        validators: &[Arc<dyn Validator>],
    ) -> Result<ResultPayload> {
        if query.fingerprint.is_invalid() || query.fingerprint.is_dynamic() {
            return Err(LinkError::UncompiledQuery);
        }
        if let Some(errors) = validate(&query.params, &params, validators).await {
            return Err(LinkError::Validation(errors));
        }

        let fragments: Vec<&str> = query.fragments.iter().map(|f| f.as_str()).collect();
        let args = json!({ "params": params, "fragments": fragments });
        self.send_request(Command::Query, query.fingerprint.as_str(), args)
            .await
    }

    /// Invoke a server-side procedure by name.
    pub async fn call(&self, name: &str, args: Vec<JsonValue>) -> Result<ResultPayload> {
        let target = Fingerprint::of_symbol(name);
        self.send_request(Command::Call, target.as_str(), JsonValue::Array(args))
            .await
    }

    /// Wait until the session is quiescent under `policy`, polling at 5 ms.
    pub async fn drain(&self, policy: WaitPolicy) {
        loop {
            if self.is_quiescent(policy) {
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Terminally close the session. All pending requests are rejected with
    /// the connection-closed error; further use fails.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let transport = self.shared.conn.lock().transport.take();
        if let Some(transport) = transport {
            transport.close();
        }
        SessionShared::reject_all(&self.shared, || LinkError::ConnectionClosed);
        unload::reevaluate();
    }

    /// Outstanding request count, for diagnostics.
    pub fn outstanding(&self) -> usize {
        self.shared.pending.lock().len()
    }

    fn is_quiescent(&self, policy: WaitPolicy) -> bool {
        match policy {
            WaitPolicy::Never => true,
            WaitPolicy::WaitForSend => self.buffered_bytes() == 0,
            WaitPolicy::WaitForAck => {
                self.buffered_bytes() == 0 && self.shared.pending.lock().is_empty()
            }
        }
    }

    fn buffered_bytes(&self) -> usize {
        self.shared
            .conn
            .lock()
            .transport
            .as_ref()
            .map(|t| t.buffered_bytes())
            .unwrap_or(0)
    }

    /// Allocate the next request identifier:
    /// `max(last_id + 1, now − connected_at)`, strictly increasing and
    /// encoding millisecond offset since connect.
    fn alloc_id(&self) -> u64 {
        let mut conn = self.shared.conn.lock();
        let elapsed = self
            .shared
            .clock
            .now_millis()
            .saturating_sub(conn.connected_at);
        let id = std::cmp::max(conn.last_id + 1, elapsed);
        conn.last_id = id;
        id
    }

    async fn send_request(
        &self,
        command: Command,
        target: &str,
        args: JsonValue,
    ) -> Result<ResultPayload> {
        let transport = self.ready().await?;
        let id = self.alloc_id();

        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .insert(id, PendingRequest { command, tx });

        let frame = encode_frame(command, id, target, &args);
        let send_result = transport.send_text(frame).await;
        unload::reevaluate();
        if let Err(e) = send_result {
            self.shared.pending.lock().remove(&id);
            SessionShared::forget_transport(&self.shared, &transport);
            return Err(e);
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(LinkError::ConnectionClosed),
        }
    }

    /// The ready barrier: ensure a transport exists and has reached the open
    /// state (polling at 5 ms), emitting HELLO once per connection.
    async fn ready(&self) -> Result<Arc<dyn Transport>> {
        loop {
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(LinkError::ConnectionClosed);
            }

            let existing = self.shared.conn.lock().transport.clone();
            let transport = match existing {
                Some(transport) => transport,
                None => self.connect().await?,
            };

            match transport.ready_state() {
                ReadyState::Open => {
                    let emit_hello = {
                        let mut conn = self.shared.conn.lock();
                        if conn.hello_sent {
                            false
                        } else {
                            conn.hello_sent = true;
                            true
                        }
                    };
                    if emit_hello {
                        let version = self.shared.settings.version.clone().unwrap_or_default();
                        let args = json!([PROTOCOL_MAJOR, PROTOCOL_MINOR, version]);
                        let frame = encode_frame(Command::Hello, 0, "", &args);
                        transport.send_text(frame).await?;
                        unload::reevaluate();
                    }
                    return Ok(transport);
                }
                ReadyState::Connecting => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                ReadyState::Closing | ReadyState::Closed => {
                    SessionShared::forget_transport(&self.shared, &transport);
                }
            }
        }
    }

    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        let hosts = self.shared.discovery.hosts().await?;
        let mut last_error = None;

        for host in &hosts {
            let url = Discovery::ws_url(host);
            match self.shared.connector.connect(&url).await {
                Ok(transport) => {
                    {
                        let mut conn = self.shared.conn.lock();
                        conn.transport = Some(transport.clone());
                        conn.connected_at = self.shared.clock.now_millis();
                        conn.last_id = 0;
                        conn.hello_sent = false;
                    }
                    if let Some(inbound) = transport.take_inbound() {
                        let weak = Arc::downgrade(&self.shared);
                        if let Ok(handle) = tokio::runtime::Handle::try_current() {
                            handle.spawn(pump(weak, inbound));
                        }
                    }
                    return Ok(transport);
                }
                Err(e) => {
                    log::warn!("[trellis-link] Connection to {} failed: {}", url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| LinkError::NetworkError("no servers to connect to".to_string())))
    }
}

impl SessionShared {
    /// Drop a lost transport and reject everything in flight.
    fn forget_transport(shared: &Arc<SessionShared>, transport: &Arc<dyn Transport>) {
        {
            let mut conn = shared.conn.lock();
            if let Some(current) = &conn.transport {
                if Arc::ptr_eq(current, transport) {
                    conn.transport = None;
                }
            }
        }
        Self::reject_all(shared, || LinkError::ConnectionClosed);
        unload::reevaluate();
    }

    fn reject_all(shared: &Arc<SessionShared>, make_error: impl Fn() -> LinkError) {
        let drained: Vec<PendingRequest> = shared.pending.lock().drain().map(|(_, p)| p).collect();
        for pending in drained {
            log::debug!(
                "[trellis-link] Rejecting in-flight {:?} request on teardown",
                pending.command
            );
            let _ = pending.tx.send(Err(make_error()));
        }
    }

    fn handle_frame(shared: &Arc<SessionShared>, frame: Frame) {
        match frame {
            Frame::Text(text) => {
                match parse_inbound(&text, shared.settings.json_reviver.as_ref()) {
                    Ok(message) => Self::dispatch(shared, message),
                    Err(e) => {
                        log::error!("[trellis-link] {}", e);
                    }
                }
                unload::reevaluate();
            }
            Frame::Binary => {
                log::error!("[trellis-link] Binary inbound frame: protocol error");
                if let Some(transport) = shared.conn.lock().transport.clone() {
                    transport.close();
                    Self::forget_transport(shared, &transport);
                }
            }
            Frame::Closed => {
                let transport = shared.conn.lock().transport.clone();
                if let Some(transport) = transport {
                    Self::forget_transport(shared, &transport);
                } else {
                    Self::reject_all(shared, || LinkError::ConnectionClosed);
                    unload::reevaluate();
                }
            }
        }
    }

    fn dispatch(shared: &Arc<SessionShared>, message: InboundMessage) {
        match message.id {
            // Id zero is the HELLO acknowledgement.
            Some(0) => {
                log::debug!("[trellis-link] HELLO acknowledged");
            }
            Some(id) => {
                let entry = shared.pending.lock().remove(&id);
                match entry {
                    Some(pending) => {
                        let outcome = match message.error {
                            Some(payload) => {
                                Err(error_from_payload(message.error_type, &payload))
                            }
                            None => Ok(message
                                .result
                                .unwrap_or(ResultPayload::Value(JsonValue::Null))),
                        };
                        let _ = pending.tx.send(outcome);
                    }
                    // Correlation miss: a server-initiated push.
                    None => Self::handle_push(shared, &message),
                }
            }
            None => Self::handle_push(shared, &message),
        }
    }

    fn handle_push(shared: &Arc<SessionShared>, message: &InboundMessage) {
        match message.event_type() {
            Some("V") => {
                log::info!("[trellis-link] Server pushed a version change");
                match &shared.settings.version_change_handler {
                    Some(handler) => handler(),
                    None => {
                        log::warn!(
                            "[trellis-link] No version-change handler configured; application should reload"
                        );
                    }
                }
            }
            Some("D") => {
                // DataChange pushes are reserved.
                log::debug!("[trellis-link] Ignoring reserved DataChange push");
            }
            Some(other) => {
                log::error!("[trellis-link] Unknown push event type {:?}", other);
            }
            None => {
                log::error!(
                    "[trellis-link] Unrecognized push without a pending request: protocol error"
                );
            }
        }
    }
}

impl PendingReporter for SessionShared {
    fn reports_pending(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let buffered = self
            .conn
            .lock()
            .transport
            .as_ref()
            .map(|t| t.buffered_bytes())
            .unwrap_or(0);
        match self.settings.prevent_unload {
            WaitPolicy::Never => false,
            WaitPolicy::WaitForSend => buffered > 0,
            WaitPolicy::WaitForAck => buffered > 0 || !self.pending.lock().is_empty(),
        }
    }
}

async fn pump(shared: std::sync::Weak<SessionShared>, mut inbound: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = inbound.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        SessionShared::handle_frame(&shared, frame);
    }
}
