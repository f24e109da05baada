//! AVRCP engine
//!
//! The engine ties the crate together: it owns one [`Session`] per
//! connected peer, drives outbound commands through the [`Transport`],
//! routes inbound frames to pending transactions or the
//! [`HandlerRegistry`], and expires overdue transactions from a single
//! reactor loop.
//!
//! ## Command flow
//!
//! Every outbound command allocates a transaction label, records a
//! pending entry with a deadline and returns a [`ResponseHandle`]
//! immediately; nothing blocks on the peer. The response resolves the
//! entry only when both the label and the PDU id match, so a late reply
//! arriving after its label was reused cannot reach the wrong caller.
//!
//! ## Peer-initiated traffic
//!
//! Commands from the peer are dispatched by PDU id through the handler
//! registry. Every command is answered: commands nothing handles get a
//! NotImplemented or GeneralReject response rather than silence.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, ExhaustedPolicy};
use crate::error::{AvrcpError, RejectReason, Result};
use crate::handler::{CommandHandler, HandlerRegistry};
use crate::protocol::address::BtAddr;
use crate::protocol::frame::{
    BrowseFrame, ControlBody, ControlFrame, PassthroughFrame, VendorDependentFrame,
    VENDOR_HEADER_LEN,
};
use crate::protocol::items::TextLimit;
use crate::protocol::params::{BrowsePdu, ControlCommand, ControlResponse, NotificationEvent};
use crate::protocol::types::{
    AttributeRequest, AvcPanelKey, CType, Direction, EventId, KeyState, PacketType, PduId,
    ResponseCode, Scope, StatusCode, Uid,
};
use crate::protocol::{BT_SIG_COMPANY_ID, OPCODE_VENDOR_DEPENDENT, SUBUNIT_PANEL};
use crate::session::{BrowsingCursor, QueuedControl, Session, SubscriptionState};
use crate::transport::{RemoteFeatures, Transport, TransportEvent};

const CR_RESPONSE_BIT: u8 = 0x02;

/// Receiver for the outcome of one outbound command
///
/// Delivered exactly once: the decoded response, `TimedOut`, or
/// `Cancelled` on session teardown.
#[derive(Debug)]
pub struct ResponseHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> ResponseHandle<T> {
    fn new(rx: oneshot::Receiver<Result<T>>) -> Self {
        Self { rx }
    }

    /// Wait for the outcome
    pub async fn wait(self) -> Result<T> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(AvrcpError::Cancelled),
        }
    }

    /// Take the outcome if it has already arrived
    pub fn try_take(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(AvrcpError::Cancelled)),
        }
    }
}

/// Events the engine surfaces to its consumer
#[derive(Debug, Clone)]
pub enum EngineEvent {
    SessionConnected { addr: BtAddr },
    SessionDisconnected { addr: BtAddr },
    BrowseChannel { addr: BtAddr, connected: bool },
    RemoteFeatures { addr: BtAddr, features: RemoteFeatures },
    /// A registered notification fired
    Notification { addr: BtAddr, event: NotificationEvent },
    /// The peer sent a passthrough key event
    KeyEvent { addr: BtAddr, key: u8, state: KeyState },
}

/// The AVRCP session engine
pub struct AvrcpEngine {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    sessions: Arc<RwLock<HashMap<BtAddr, Session>>>,
    handlers: Arc<RwLock<HandlerRegistry>>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl AvrcpEngine {
    /// Create an engine and the event stream it reports on
    pub fn new(
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        info!("creating AVRCP engine");
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                transport,
                sessions: Arc::new(RwLock::new(HashMap::new())),
                handlers: Arc::new(RwLock::new(HandlerRegistry::new())),
                events_tx,
            },
            events_rx,
        )
    }

    /// Register a handler for peer-initiated commands
    pub async fn register_handler(&self, handler: Box<dyn CommandHandler>) -> Result<()> {
        self.handlers.write().await.register(handler).await
    }

    /// Remove a handler
    pub async fn unregister_handler(&self, name: &str) -> Result<()> {
        self.handlers.write().await.unregister(name).await
    }

    /// Peers with a live control channel
    pub async fn connected_peers(&self) -> Vec<BtAddr> {
        self.sessions.read().await.keys().copied().collect()
    }

    pub async fn is_connected(&self, addr: BtAddr) -> bool {
        self.sessions.read().await.contains_key(&addr)
    }

    /// Tear down every session and handler
    pub async fn shutdown(&self) -> Result<()> {
        info!("shutting down AVRCP engine");
        let mut sessions = self.sessions.write().await;
        for session in sessions.values_mut() {
            session.teardown();
        }
        sessions.clear();
        drop(sessions);
        self.handlers.write().await.shutdown_all().await
    }

    fn text_limit(&self) -> TextLimit {
        TextLimit {
            max_len: self.config.max_attribute_text_len,
            policy: self.config.oversize_text_policy,
        }
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.response_timeout
    }

    // ---- outbound commands -------------------------------------------------

    /// Query the events the peer can notify on
    pub async fn get_capabilities(
        &self,
        addr: BtAddr,
    ) -> Result<ResponseHandle<ControlResponse>> {
        self.submit_control(addr, ControlCommand::GetCapabilities {
            capability_id: crate::protocol::params::CAPABILITY_EVENTS_SUPPORTED,
        })
        .await
    }

    /// Query playback position and status
    pub async fn get_play_status(&self, addr: BtAddr) -> Result<ResponseHandle<ControlResponse>> {
        self.submit_control(addr, ControlCommand::GetPlayStatus).await
    }

    /// Query metadata of the playing element
    pub async fn get_element_attributes(
        &self,
        addr: BtAddr,
        attrs: AttributeRequest,
    ) -> Result<ResponseHandle<ControlResponse>> {
        self.submit_control(addr, ControlCommand::GetElementAttributes {
            identifier: 0,
            attrs,
        })
        .await
    }

    /// Set the peer's absolute volume (7-bit)
    pub async fn set_absolute_volume(
        &self,
        addr: BtAddr,
        volume: u8,
    ) -> Result<ResponseHandle<ControlResponse>> {
        self.submit_control(addr, ControlCommand::SetAbsoluteVolume {
            volume: volume & 0x7f,
        })
        .await
    }

    /// Pick the player control commands address
    pub async fn set_addressed_player(
        &self,
        addr: BtAddr,
        player_id: u16,
    ) -> Result<ResponseHandle<ControlResponse>> {
        self.submit_control(addr, ControlCommand::SetAddressedPlayer { player_id })
            .await
    }

    /// Start playback of a browsed item
    pub async fn play_item(
        &self,
        addr: BtAddr,
        scope: Scope,
        uid: Uid,
    ) -> Result<ResponseHandle<ControlResponse>> {
        let uid_counter = self.current_uid_counter(addr).await?;
        self.submit_control(addr, ControlCommand::PlayItem {
            scope,
            uid,
            uid_counter,
        })
        .await
    }

    /// Append a browsed item to the now-playing list
    pub async fn add_to_now_playing(
        &self,
        addr: BtAddr,
        scope: Scope,
        uid: Uid,
    ) -> Result<ResponseHandle<ControlResponse>> {
        let uid_counter = self.current_uid_counter(addr).await?;
        self.submit_control(addr, ControlCommand::AddToNowPlaying {
            scope,
            uid,
            uid_counter,
        })
        .await
    }

    /// Subscribe to a notification event
    ///
    /// The handle resolves with the interim value; the eventual state
    /// change arrives as [`EngineEvent::Notification`] and consumes the
    /// registration, after which re-registering is the caller's move.
    ///
    /// # Errors
    ///
    /// `Rejected(AlreadyPending)` while a registration for the same
    /// event is outstanding.
    pub async fn register_notification(
        &self,
        addr: BtAddr,
        event: EventId,
        playback_interval: u32,
    ) -> Result<ResponseHandle<ControlResponse>> {
        let deadline = self.deadline();
        let (label, rx) = {
            let mut sessions = self.sessions.write().await;
            let session = Self::session_mut(&mut sessions, addr)?;
            if session.notifications().is_registered(event) {
                return Err(AvrcpError::Rejected(RejectReason::AlreadyPending));
            }
            let (label, rx) = session.begin_control(PduId::RegisterNotification, deadline)?;
            session
                .notifications_mut()
                .register(event, label, playback_interval)?;
            (label, rx)
        };
        let command = ControlCommand::RegisterNotification {
            event,
            playback_interval,
        };
        let sent = match encode_control_command(label, &command) {
            Ok(bytes) => self.transport.send_control_frame(addr, bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(&addr) {
                session.resolve_control(label, PduId::RegisterNotification, Err(AvrcpError::Cancelled));
                session.notification_aborted(label);
            }
            return Err(e);
        }
        Ok(ResponseHandle::new(rx))
    }

    /// Send a passthrough key event
    ///
    /// Fire and forget: the AV/C acceptance response is not surfaced.
    pub async fn send_key_event(
        &self,
        addr: BtAddr,
        key: AvcPanelKey,
        state: KeyState,
    ) -> Result<()> {
        self.send_raw_key_event(addr, key.raw(), state).await
    }

    /// Send a passthrough key event by raw key code
    pub async fn send_raw_key_event(&self, addr: BtAddr, key: u8, state: KeyState) -> Result<()> {
        let label = {
            let mut sessions = self.sessions.write().await;
            Self::session_mut(&mut sessions, addr)?.allocate_label()?
        };
        let frame = ControlFrame {
            label,
            is_response: false,
            body: ControlBody::Passthrough(PassthroughFrame {
                code: CType::Control.raw(),
                key: key & 0x7f,
                state,
            }),
        };
        let sent = match frame.encode() {
            Ok(bytes) => self.transport.send_control_frame(addr, bytes).await,
            Err(e) => Err(e),
        };
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&addr) {
            session.release_label(label);
        }
        sent
    }

    /// Select the player the browsing channel navigates
    pub async fn set_browsed_player(
        &self,
        addr: BtAddr,
        player_id: u16,
    ) -> Result<ResponseHandle<BrowsePdu>> {
        self.submit_browse(addr, BrowsePdu::SetBrowsedPlayerCommand { player_id })
            .await
    }

    /// List items in the given scope, inclusive 0-based index range
    ///
    /// The range is validated locally; a backwards range fails without
    /// contacting the peer.
    pub async fn get_folder_items(
        &self,
        addr: BtAddr,
        scope: Scope,
        start: u32,
        end: u32,
        attrs: AttributeRequest,
    ) -> Result<ResponseHandle<BrowsePdu>> {
        BrowsingCursor::validate_range(start, end, None)?;
        self.submit_browse(addr, BrowsePdu::GetFolderItemsCommand {
            scope,
            start,
            end,
            attrs,
        })
        .await
    }

    /// Move the browsing cursor one folder up or down
    ///
    /// The move commits only when the peer confirms it; until then the
    /// cursor keeps its old position. `folder_uid` names the folder to
    /// descend into and is ignored for Up.
    pub async fn change_path(
        &self,
        addr: BtAddr,
        direction: Direction,
        folder_uid: Option<Uid>,
    ) -> Result<ResponseHandle<BrowsePdu>> {
        let deadline = self.deadline();
        let (label, rx, command) = {
            let mut sessions = self.sessions.write().await;
            let session = Self::session_mut(&mut sessions, addr)?;
            session.cursor_mut().begin_move(direction, folder_uid)?;
            let command = BrowsePdu::ChangePathCommand {
                uid_counter: session.cursor().uid_counter(),
                direction,
                folder_uid: folder_uid.unwrap_or(Uid::ZERO),
            };
            match session.begin_browse(PduId::ChangePath, deadline) {
                Ok((label, rx)) => (label, rx, command),
                Err(e) => {
                    session.cursor_mut().rollback_move();
                    return Err(e);
                }
            }
        };
        if let Err(e) = self.send_browse_pdu(addr, label, false, &command).await {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(&addr) {
                session.cursor_mut().rollback_move();
                session.resolve_browse(label, PduId::ChangePath, Err(AvrcpError::Cancelled));
            }
            return Err(e);
        }
        Ok(ResponseHandle::new(rx))
    }

    /// Query attributes of one browsed item
    pub async fn get_item_attributes(
        &self,
        addr: BtAddr,
        scope: Scope,
        uid: Uid,
        attrs: AttributeRequest,
    ) -> Result<ResponseHandle<BrowsePdu>> {
        let uid_counter = self.current_uid_counter(addr).await?;
        self.submit_browse(addr, BrowsePdu::GetItemAttributesCommand {
            scope,
            uid,
            uid_counter,
            attrs,
        })
        .await
    }

    /// Query the item count of a scope
    pub async fn get_total_number_of_items(
        &self,
        addr: BtAddr,
        scope: Scope,
    ) -> Result<ResponseHandle<BrowsePdu>> {
        self.submit_browse(addr, BrowsePdu::GetTotalNumberOfItemsCommand { scope })
            .await
    }

    /// Search the browsed player from its root folder
    pub async fn search(&self, addr: BtAddr, text: String) -> Result<ResponseHandle<BrowsePdu>> {
        self.submit_browse(addr, BrowsePdu::SearchCommand { text }).await
    }

    async fn current_uid_counter(&self, addr: BtAddr) -> Result<u16> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(&addr)
            .ok_or_else(|| AvrcpError::not_connected(addr.to_string()))?;
        Ok(session.cursor().uid_counter())
    }

    fn session_mut(
        sessions: &mut HashMap<BtAddr, Session>,
        addr: BtAddr,
    ) -> Result<&mut Session> {
        sessions
            .get_mut(&addr)
            .ok_or_else(|| AvrcpError::not_connected(addr.to_string()))
    }

    async fn submit_control(
        &self,
        addr: BtAddr,
        command: ControlCommand,
    ) -> Result<ResponseHandle<ControlResponse>> {
        let deadline = self.deadline();
        let pdu_id = command.pdu_id();
        let (label, rx) = {
            let mut sessions = self.sessions.write().await;
            let session = Self::session_mut(&mut sessions, addr)?;
            match session.begin_control(pdu_id, deadline) {
                Ok(pair) => pair,
                Err(AvrcpError::LabelsExhausted)
                    if self.config.exhausted_policy == ExhaustedPolicy::QueueCommand =>
                {
                    let (tx, rx) = oneshot::channel();
                    session.enqueue_control(QueuedControl {
                        command,
                        responder: tx,
                    });
                    return Ok(ResponseHandle::new(rx));
                }
                Err(e) => return Err(e),
            }
        };
        let sent = match encode_control_command(label, &command) {
            Ok(bytes) => self.transport.send_control_frame(addr, bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(&addr) {
                session.resolve_control(label, pdu_id, Err(AvrcpError::Cancelled));
            }
            return Err(e);
        }
        Ok(ResponseHandle::new(rx))
    }

    async fn submit_browse(
        &self,
        addr: BtAddr,
        command: BrowsePdu,
    ) -> Result<ResponseHandle<BrowsePdu>> {
        let deadline = self.deadline();
        let pdu_id = command.pdu_id();
        let (label, rx) = {
            let mut sessions = self.sessions.write().await;
            Self::session_mut(&mut sessions, addr)?.begin_browse(pdu_id, deadline)?
        };
        if let Err(e) = self.send_browse_pdu(addr, label, false, &command).await {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(&addr) {
                session.resolve_browse(label, pdu_id, Err(AvrcpError::Cancelled));
            }
            return Err(e);
        }
        Ok(ResponseHandle::new(rx))
    }

    async fn send_browse_pdu(
        &self,
        addr: BtAddr,
        label: u8,
        is_response: bool,
        pdu: &BrowsePdu,
    ) -> Result<()> {
        let frame = BrowseFrame {
            label,
            is_response,
            pdu_id: pdu.pdu_id(),
            params: pdu.encode()?,
        };
        let bytes = frame.encode()?;
        // the browsing channel cannot fragment; nothing over the MTU goes out
        if bytes.len() > self.config.browse_mtu {
            return Err(AvrcpError::fragmentation(format!(
                "browse frame of {} bytes exceeds the {}-byte browse MTU",
                bytes.len(),
                self.config.browse_mtu
            )));
        }
        self.transport.send_browse_frame(addr, bytes).await
    }

    // ---- inbound events ----------------------------------------------------

    /// Process one transport event
    ///
    /// Decode failures in peer traffic are contained: they are logged,
    /// answered negatively where the peer expects an answer, and never
    /// propagate out of this method as errors.
    pub async fn handle_event(&self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::ConnectionState { addr, connected } => {
                self.handle_connection_state(addr, connected).await;
                Ok(())
            }
            TransportEvent::BrowseConnectionState { addr, connected } => {
                let mut sessions = self.sessions.write().await;
                match sessions.get_mut(&addr) {
                    Some(session) => {
                        session.set_browse_connected(connected);
                        let _ = self
                            .events_tx
                            .send(EngineEvent::BrowseChannel { addr, connected });
                    }
                    None => warn!(%addr, "browsing channel event for unknown peer"),
                }
                Ok(())
            }
            TransportEvent::RemoteFeatures { addr, features } => {
                debug!(%addr, ?features, "peer reported features");
                let _ = self
                    .events_tx
                    .send(EngineEvent::RemoteFeatures { addr, features });
                Ok(())
            }
            TransportEvent::ControlFrame { addr, payload } => {
                self.handle_control_frame(addr, payload).await
            }
            TransportEvent::BrowseFrame { addr, payload } => {
                self.handle_browse_frame(addr, payload).await
            }
        }
    }

    async fn handle_connection_state(&self, addr: BtAddr, connected: bool) {
        let mut sessions = self.sessions.write().await;
        if connected {
            if sessions.contains_key(&addr) {
                debug!(%addr, "peer already connected");
                return;
            }
            sessions.insert(addr, Session::new(addr));
            let _ = self.events_tx.send(EngineEvent::SessionConnected { addr });
        } else if let Some(mut session) = sessions.remove(&addr) {
            session.teardown();
            let _ = self
                .events_tx
                .send(EngineEvent::SessionDisconnected { addr });
        }
    }

    async fn handle_control_frame(&self, addr: BtAddr, payload: Vec<u8>) -> Result<()> {
        let frame = match ControlFrame::decode(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%addr, error = %e, "dropping undecodable control frame");
                // a command still gets an answer, even one we cannot parse
                if let Some(reject) = raw_not_implemented(&payload) {
                    self.transport.send_control_frame(addr, reject).await?;
                }
                return Ok(());
            }
        };
        if frame.is_response {
            self.handle_control_response(addr, frame).await
        } else {
            self.handle_peer_command(addr, frame).await
        }
    }

    async fn handle_control_response(&self, addr: BtAddr, frame: ControlFrame) -> Result<()> {
        let label = frame.label;
        let vd = match frame.body {
            ControlBody::VendorDependent(vd) => vd,
            ControlBody::Passthrough(_) => {
                debug!(%addr, label, "passthrough response, nothing pending on it");
                return Ok(());
            }
        };
        let code = match ResponseCode::try_from(vd.code) {
            Ok(code) => code,
            Err(_) => {
                warn!(%addr, code = vd.code, "unknown response code, dropping frame");
                return Ok(());
            }
        };

        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&addr) else {
            debug!(%addr, "response from peer with no session");
            return Ok(());
        };

        let vd = match session.reassembler_mut().push(vd) {
            Ok(Some(complete)) => complete,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(%addr, error = %e, "fragment sequence violation, reassembly dropped");
                return Ok(());
            }
        };

        let pdu_id = vd.pdu_id;
        if pdu_id == PduId::RegisterNotification {
            self.handle_notification_response(session, addr, label, code, &vd.params);
        } else {
            let reply = match code {
                ResponseCode::Rejected => Err(peer_rejection(&vd.params)),
                ResponseCode::NotImplemented => Err(AvrcpError::Rejected(RejectReason::Policy(
                    "not implemented by peer".to_string(),
                ))),
                _ => ControlResponse::decode(pdu_id, &vd.params, &self.text_limit()),
            };
            if !session.resolve_control(label, pdu_id, reply) {
                debug!(%addr, label, ?pdu_id, "late or mismatched response dropped");
            }
        }

        let sends = self.prepare_queued(session);
        drop(sessions);
        for bytes in sends {
            self.transport.send_control_frame(addr, bytes).await?;
        }
        Ok(())
    }

    fn handle_notification_response(
        &self,
        session: &mut Session,
        addr: BtAddr,
        label: u8,
        code: ResponseCode,
        params: &[u8],
    ) {
        match code {
            ResponseCode::Interim => match NotificationEvent::decode(params) {
                Ok(event) => {
                    let event_id = event.event_id();
                    session.notification_interim(
                        label,
                        event_id,
                        Ok(ControlResponse::Notification(event)),
                    );
                }
                Err(e) => {
                    session.resolve_control(label, PduId::RegisterNotification, Err(e));
                    session.notification_aborted(label);
                }
            },
            ResponseCode::Changed => match NotificationEvent::decode(params) {
                Ok(event) => {
                    let event_id = event.event_id();
                    if let Some(sub) = session.notification_fired(event_id) {
                        if sub.state == SubscriptionState::Requested {
                            // the peer skipped the interim; the register
                            // command is still pending on this label
                            session.resolve_control(
                                sub.label,
                                PduId::RegisterNotification,
                                Ok(ControlResponse::Notification(event.clone())),
                            );
                        }
                        if let NotificationEvent::UidsChanged { uid_counter } = event {
                            // stale counter already resets the cursor here
                            let _ = session.cursor_mut().observe_uid_counter(uid_counter);
                        }
                        let _ = self.events_tx.send(EngineEvent::Notification { addr, event });
                    }
                }
                Err(e) => warn!(%addr, error = %e, "undecodable notification change"),
            },
            ResponseCode::Rejected | ResponseCode::NotImplemented => {
                session.resolve_control(
                    label,
                    PduId::RegisterNotification,
                    Err(peer_rejection(params)),
                );
                session.notification_aborted(label);
            }
            other => {
                warn!(%addr, ?other, "unexpected response code for a notification");
            }
        }
    }

    async fn handle_peer_command(&self, addr: BtAddr, frame: ControlFrame) -> Result<()> {
        match frame.body {
            ControlBody::Passthrough(pt) => {
                let _ = self.events_tx.send(EngineEvent::KeyEvent {
                    addr,
                    key: pt.key,
                    state: pt.state,
                });
                let handlers = self.handlers.read().await;
                if let Err(e) = handlers.route_key_event(addr, pt.key, pt.state).await {
                    debug!(%addr, error = %e, "key event not consumed");
                }
                drop(handlers);
                let reply = ControlFrame {
                    label: frame.label,
                    is_response: true,
                    body: ControlBody::Passthrough(PassthroughFrame {
                        code: ResponseCode::Accepted.raw(),
                        key: pt.key,
                        state: pt.state,
                    }),
                };
                self.transport.send_control_frame(addr, reply.encode()?).await
            }
            ControlBody::VendorDependent(vd) => {
                let (code, response) = match ControlCommand::decode(vd.pdu_id, &vd.params) {
                    Ok(command) => {
                        let handlers = self.handlers.read().await;
                        match handlers.route_command(addr, &command).await {
                            Ok(rejection @ ControlResponse::Rejected { .. }) => {
                                (ResponseCode::Rejected, rejection)
                            }
                            Ok(response) => (final_code_for(&command), response),
                            Err(e) => {
                                warn!(%addr, pdu_id = ?vd.pdu_id, error = %e, "peer command rejected");
                                (
                                    ResponseCode::Rejected,
                                    ControlResponse::Rejected {
                                        status: StatusCode::InvalidCommand,
                                    },
                                )
                            }
                        }
                    }
                    Err(e) => {
                        warn!(%addr, pdu_id = ?vd.pdu_id, error = %e, "malformed peer command");
                        (
                            ResponseCode::Rejected,
                            ControlResponse::Rejected {
                                status: StatusCode::ParameterContentError,
                            },
                        )
                    }
                };
                let params = match response.encode() {
                    Ok(params) => params,
                    Err(e) => {
                        error!(%addr, error = %e, "failed to encode response");
                        vec![StatusCode::InternalError.raw()]
                    }
                };
                let reply = ControlFrame {
                    label: frame.label,
                    is_response: true,
                    body: ControlBody::VendorDependent(VendorDependentFrame {
                        code: code.raw(),
                        pdu_id: vd.pdu_id,
                        packet_type: PacketType::Single,
                        params,
                    }),
                };
                for chunk in reply.encode_fragmented(self.config.control_mtu)? {
                    self.transport.send_control_frame(addr, chunk).await?;
                }
                Ok(())
            }
        }
    }

    async fn handle_browse_frame(&self, addr: BtAddr, payload: Vec<u8>) -> Result<()> {
        let frame = match BrowseFrame::decode(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%addr, error = %e, "dropping undecodable browse frame");
                if let Some(reject) = raw_general_reject(&payload) {
                    self.transport.send_browse_frame(addr, reject).await?;
                }
                return Ok(());
            }
        };

        if !frame.is_response {
            // browsing controller role: peer commands are not served
            debug!(%addr, pdu_id = ?frame.pdu_id, "rejecting peer browse command");
            let reject = BrowsePdu::GeneralReject {
                status: StatusCode::InvalidCommand,
            };
            return self.send_browse_pdu(addr, frame.label, true, &reject).await;
        }

        let label = frame.label;
        let pdu = match BrowsePdu::decode(frame.pdu_id, true, &frame.params, &self.text_limit()) {
            Ok(pdu) => pdu,
            Err(e) => {
                let mut sessions = self.sessions.write().await;
                if let Some(session) = sessions.get_mut(&addr) {
                    session.resolve_browse(label, frame.pdu_id, Err(e));
                }
                return Ok(());
            }
        };

        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&addr) else {
            debug!(%addr, "browse response from peer with no session");
            return Ok(());
        };
        self.resolve_browse_response(session, addr, label, pdu);
        Ok(())
    }

    fn resolve_browse_response(
        &self,
        session: &mut Session,
        addr: BtAddr,
        label: u8,
        pdu: BrowsePdu,
    ) {
        let pdu_id = pdu.pdu_id();
        let reply = match &pdu {
            BrowsePdu::GeneralReject { status } => {
                debug!(%addr, label, ?status, "peer sent GeneralReject");
                session.fail_browse_label(
                    label,
                    AvrcpError::Rejected(RejectReason::PeerStatus(status.raw())),
                );
                return;
            }
            BrowsePdu::ChangePathResponse { status, .. } => {
                if *status == StatusCode::Success {
                    session.cursor_mut().commit_move();
                    Ok(pdu)
                } else {
                    session.cursor_mut().rollback_move();
                    Err(browse_status_error(*status, session.cursor_mut()))
                }
            }
            BrowsePdu::SetBrowsedPlayerResponse {
                status,
                uid_counter,
                ..
            } => {
                if *status == StatusCode::Success {
                    // the browsed player starts at its root folder
                    let counter = *uid_counter;
                    session.cursor_mut().invalidate();
                    let _ = session.cursor_mut().observe_uid_counter(counter);
                    Ok(pdu)
                } else {
                    Err(browse_status_error(*status, session.cursor_mut()))
                }
            }
            BrowsePdu::GetFolderItemsResponse {
                status,
                uid_counter,
                ..
            }
            | BrowsePdu::SearchResponse {
                status,
                uid_counter,
                ..
            }
            | BrowsePdu::GetTotalNumberOfItemsResponse {
                status,
                uid_counter,
                ..
            } => {
                if *status == StatusCode::Success {
                    match session.cursor_mut().observe_uid_counter(*uid_counter) {
                        Ok(()) => Ok(pdu),
                        Err(stale) => Err(stale),
                    }
                } else {
                    Err(browse_status_error(*status, session.cursor_mut()))
                }
            }
            BrowsePdu::GetItemAttributesResponse { status, .. } => {
                if *status == StatusCode::Success {
                    Ok(pdu)
                } else {
                    Err(browse_status_error(*status, session.cursor_mut()))
                }
            }
            other => {
                warn!(%addr, ?other, "command-layout PDU flagged as response, dropping");
                return;
            }
        };
        if !session.resolve_browse(label, pdu_id, reply) {
            debug!(%addr, label, ?pdu_id, "late or mismatched browse response dropped");
        }
    }

    fn prepare_queued(&self, session: &mut Session) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        if !session.is_control_connected() {
            return out;
        }
        let deadline = self.deadline();
        while let Some(queued) = session.pop_queued() {
            let pdu_id = queued.command.pdu_id();
            match session.begin_control_with(pdu_id, deadline, queued.responder) {
                Ok(label) => match encode_control_command(label, &queued.command) {
                    Ok(bytes) => out.push(bytes),
                    Err(e) => {
                        session.resolve_control(label, pdu_id, Err(e));
                    }
                },
                Err(e) => {
                    // responder dropped; the caller sees Cancelled
                    warn!(error = %e, "failed to dispatch queued command");
                    break;
                }
            }
        }
        out
    }

    // ---- reactor -----------------------------------------------------------

    /// Drive the engine until the transport event stream closes
    ///
    /// Interleaves event handling with transaction expiry; the loop
    /// sleeps until the earliest outstanding deadline.
    pub async fn run(&self, mut events: mpsc::Receiver<TransportEvent>) {
        info!("engine reactor started");
        loop {
            let deadline = self.earliest_deadline().await;
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            warn!(error = %e, "transport event handling failed");
                        }
                    }
                    None => break,
                },
                _ = sleep_until_next(deadline) => self.expire_overdue_now().await,
            }
        }
        info!("engine reactor stopped");
    }

    async fn earliest_deadline(&self) -> Option<Instant> {
        self.sessions
            .read()
            .await
            .values()
            .filter_map(Session::next_deadline)
            .min()
    }

    /// Expire every overdue transaction across all sessions
    pub async fn expire_overdue_now(&self) {
        let now = Instant::now();
        let mut sends: Vec<(BtAddr, Vec<u8>)> = Vec::new();
        {
            let mut sessions = self.sessions.write().await;
            for (addr, session) in sessions.iter_mut() {
                let expired = session.expire_overdue(now);
                if !expired.is_empty() {
                    debug!(%addr, count = expired.len(), "transactions timed out");
                    for bytes in self.prepare_queued(session) {
                        sends.push((*addr, bytes));
                    }
                }
            }
        }
        for (addr, bytes) in sends {
            if let Err(e) = self.transport.send_control_frame(addr, bytes).await {
                warn!(%addr, error = %e, "failed to send queued command");
            }
        }
    }
}

async fn sleep_until_next(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn encode_control_command(label: u8, command: &ControlCommand) -> Result<Vec<u8>> {
    ControlFrame {
        label,
        is_response: false,
        body: ControlBody::VendorDependent(VendorDependentFrame {
            code: command.ctype().raw(),
            pdu_id: command.pdu_id(),
            packet_type: PacketType::Single,
            params: command.encode(),
        }),
    }
    .encode()
}

/// Map an AV/C rejection payload (one status byte) to an error
fn peer_rejection(params: &[u8]) -> AvrcpError {
    let status = params
        .first()
        .copied()
        .unwrap_or_else(|| StatusCode::InternalError.raw());
    AvrcpError::Rejected(RejectReason::PeerStatus(status))
}

fn browse_status_error(status: StatusCode, cursor: &mut BrowsingCursor) -> AvrcpError {
    match status {
        StatusCode::RangeOutOfBounds => {
            AvrcpError::range("peer reported the requested range out of bounds")
        }
        StatusCode::InvalidDirection => AvrcpError::InvalidDirection,
        StatusCode::UidChanged => {
            // content regenerated; the stored counter is void
            cursor.invalidate();
            AvrcpError::Rejected(RejectReason::PeerStatus(status.raw()))
        }
        other => AvrcpError::Rejected(RejectReason::PeerStatus(other.raw())),
    }
}

/// The response code a successful reply to this command carries
fn final_code_for(command: &ControlCommand) -> ResponseCode {
    match command.ctype() {
        CType::Control => ResponseCode::Accepted,
        CType::Status => ResponseCode::Stable,
        CType::Notify => ResponseCode::Interim,
    }
}

/// Synthesize a NotImplemented response for a command frame that could
/// not be decoded, echoing its label and PDU id
fn raw_not_implemented(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() < VENDOR_HEADER_LEN
        || payload[0] & CR_RESPONSE_BIT != 0
        || payload[3] != OPCODE_VENDOR_DEPENDENT
    {
        return None;
    }
    let mut out = Vec::with_capacity(VENDOR_HEADER_LEN);
    out.push(payload[0] | CR_RESPONSE_BIT);
    out.push(ResponseCode::NotImplemented.raw());
    out.push(SUBUNIT_PANEL);
    out.push(OPCODE_VENDOR_DEPENDENT);
    out.extend_from_slice(&BT_SIG_COMPANY_ID);
    out.push(payload[7]);
    out.push(PacketType::Single.raw());
    out.extend_from_slice(&0u16.to_be_bytes());
    Some(out)
}

/// Synthesize a GeneralReject for a browse command frame that could not
/// be decoded
fn raw_general_reject(payload: &[u8]) -> Option<Vec<u8>> {
    let first = *payload.first()?;
    if first & CR_RESPONSE_BIT != 0 {
        return None;
    }
    let frame = BrowseFrame {
        label: first >> 4,
        is_response: true,
        pdu_id: PduId::GeneralReject,
        params: vec![StatusCode::InvalidCommand.raw()],
    };
    frame.encode().ok()
}
