//! Per-device session state
//!
//! One `Session` exists per connected peer and owns everything with
//! session lifetime: the transaction label allocator, the pending
//! transaction tables for the control and browsing channels, the
//! notification registry, the browsing cursor and the fragment
//! reassembler.
//!
//! The session is a synchronous core. It never performs I/O and takes
//! explicit `Instant`s for anything time-based, so every state
//! transition is directly testable; `AvrcpEngine` drives it from the
//! async side.

pub mod browsing;
pub mod label;
pub mod notification;
pub mod transaction;

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{AvrcpError, Result};
use crate::protocol::address::BtAddr;
use crate::protocol::frame::Reassembler;
use crate::protocol::params::{BrowsePdu, ControlCommand, ControlResponse};
use crate::protocol::types::{EventId, PduId};

pub use browsing::BrowsingCursor;
pub use label::LabelAllocator;
pub use notification::{NotificationRegistry, Subscription, SubscriptionState};
pub use transaction::TransactionTable;

/// A command held back because all transaction labels were in use
///
/// Only exists under `ExhaustedPolicy::QueueCommand`; the engine drains
/// the queue as labels free up.
#[derive(Debug)]
pub struct QueuedControl {
    pub command: ControlCommand,
    pub responder: oneshot::Sender<Result<ControlResponse>>,
}

/// All state for one peer connection
#[derive(Debug)]
pub struct Session {
    addr: BtAddr,
    control_connected: bool,
    browse_connected: bool,
    labels: LabelAllocator,
    control: TransactionTable<ControlResponse>,
    browse: TransactionTable<BrowsePdu>,
    notifications: NotificationRegistry,
    cursor: BrowsingCursor,
    reassembler: Reassembler,
    queued: VecDeque<QueuedControl>,
}

impl Session {
    /// Create session state for a newly connected peer
    pub fn new(addr: BtAddr) -> Self {
        info!(%addr, "session created");
        Self {
            addr,
            control_connected: true,
            browse_connected: false,
            labels: LabelAllocator::new(),
            control: TransactionTable::new(),
            browse: TransactionTable::new(),
            notifications: NotificationRegistry::new(),
            cursor: BrowsingCursor::new(),
            reassembler: Reassembler::new(),
            queued: VecDeque::new(),
        }
    }

    pub fn addr(&self) -> BtAddr {
        self.addr
    }

    pub fn is_control_connected(&self) -> bool {
        self.control_connected
    }

    pub fn is_browse_connected(&self) -> bool {
        self.browse_connected
    }

    pub fn set_control_connected(&mut self, connected: bool) {
        self.control_connected = connected;
    }

    pub fn set_browse_connected(&mut self, connected: bool) {
        debug!(addr = %self.addr, connected, "browsing channel state changed");
        self.browse_connected = connected;
    }

    /// Start an outbound control-channel transaction
    ///
    /// Allocates a label and records the pending entry. The caller
    /// encodes and sends the frame with the returned label.
    ///
    /// # Errors
    ///
    /// `LabelsExhausted` when all 16 labels are outstanding,
    /// `NotConnected` when the control channel is down.
    pub fn begin_control(
        &mut self,
        pdu_id: PduId,
        deadline: Instant,
    ) -> Result<(u8, oneshot::Receiver<Result<ControlResponse>>)> {
        if !self.control_connected {
            return Err(AvrcpError::not_connected(self.addr.to_string()));
        }
        let label = self.labels.allocate().ok_or(AvrcpError::LabelsExhausted)?;
        let rx = self.control.insert(label, pdu_id, deadline);
        Ok((label, rx))
    }

    /// Start a control transaction delivering on an existing sender
    ///
    /// Used when dispatching a previously queued command whose caller
    /// already holds the receiver.
    pub fn begin_control_with(
        &mut self,
        pdu_id: PduId,
        deadline: Instant,
        responder: oneshot::Sender<Result<ControlResponse>>,
    ) -> Result<u8> {
        if !self.control_connected {
            return Err(AvrcpError::not_connected(self.addr.to_string()));
        }
        let label = self.labels.allocate().ok_or(AvrcpError::LabelsExhausted)?;
        self.control.insert_with(label, pdu_id, deadline, responder);
        Ok(label)
    }

    /// Start an outbound browsing-channel transaction
    pub fn begin_browse(
        &mut self,
        pdu_id: PduId,
        deadline: Instant,
    ) -> Result<(u8, oneshot::Receiver<Result<BrowsePdu>>)> {
        if !self.browse_connected {
            return Err(AvrcpError::not_connected(format!(
                "{} (browsing channel)",
                self.addr
            )));
        }
        let label = self.labels.allocate().ok_or(AvrcpError::LabelsExhausted)?;
        let rx = self.browse.insert(label, pdu_id, deadline);
        Ok((label, rx))
    }

    /// Deliver a control-channel response and free its label
    ///
    /// Returns true when a pending transaction matched; mismatched or
    /// unknown responses are dropped by the table.
    pub fn resolve_control(
        &mut self,
        label: u8,
        pdu_id: PduId,
        reply: Result<ControlResponse>,
    ) -> bool {
        let resolved = self.control.resolve(label, pdu_id, reply);
        if resolved {
            self.labels.release(label);
        }
        resolved
    }

    /// Deliver a browsing-channel response and free its label
    pub fn resolve_browse(&mut self, label: u8, pdu_id: PduId, reply: Result<BrowsePdu>) -> bool {
        let resolved = self.browse.resolve(label, pdu_id, reply);
        if resolved {
            self.labels.release(label);
        }
        resolved
    }

    /// Fail the browsing transaction on `label` regardless of PDU id
    ///
    /// GeneralReject responses carry no echo of the rejected PDU.
    pub fn fail_browse_label(&mut self, label: u8, err: AvrcpError) -> bool {
        let failed = self.browse.fail(label, err);
        if failed {
            self.labels.release(label);
        }
        failed
    }

    /// Deliver the interim response to a RegisterNotification command
    ///
    /// Resolves the transaction but keeps the label allocated: the peer
    /// reuses it for the eventual Changed response. The registration
    /// moves from Requested to Active.
    pub fn notification_interim(
        &mut self,
        label: u8,
        event: EventId,
        reply: Result<ControlResponse>,
    ) -> bool {
        let resolved = self.control.resolve(label, PduId::RegisterNotification, reply);
        if resolved {
            self.notifications.mark_active(event);
        }
        resolved
    }

    /// Consume the registration for a fired notification
    ///
    /// Frees the label the registration was holding. Returns the
    /// subscription, or None when the peer sent a Changed response for
    /// an event nothing registered for.
    pub fn notification_fired(&mut self, event: EventId) -> Option<Subscription> {
        let sub = self.notifications.on_event_fired(event)?;
        self.labels.release(sub.label);
        Some(sub)
    }

    /// Drop the registration carried on `label` after a rejection
    ///
    /// Covers both phases: a Requested registration whose command was
    /// rejected, and an Active one the peer rejected instead of firing.
    /// The label frees either way.
    pub fn notification_aborted(&mut self, label: u8) -> Option<Subscription> {
        let sub = self.notifications.cancel_by_label(label)?;
        self.labels.release(sub.label);
        Some(sub)
    }

    /// Fail every transaction past its deadline and free the labels
    ///
    /// A timed-out RegisterNotification also drops its Requested
    /// registration. Returns the expired labels.
    pub fn expire_overdue(&mut self, now: Instant) -> Vec<u8> {
        let mut expired = self.control.expire_overdue(now);
        expired.extend(self.browse.expire_overdue(now));
        for &label in &expired {
            self.labels.release(label);
            self.notifications.cancel_by_label(label);
        }
        expired
    }

    /// The earliest deadline across both channels
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.control.next_deadline(), self.browse.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Allocate a label outside the transaction tables
    ///
    /// Passthrough commands are fire-and-forget: their label is released
    /// right after the frame goes out and any response is dropped by the
    /// tables as unknown.
    pub fn allocate_label(&mut self) -> Result<u8> {
        if !self.control_connected {
            return Err(AvrcpError::not_connected(self.addr.to_string()));
        }
        self.labels.allocate().ok_or(AvrcpError::LabelsExhausted)
    }

    pub fn release_label(&mut self, label: u8) {
        self.labels.release(label);
    }

    /// Hold a command back until a label frees up
    pub fn enqueue_control(&mut self, queued: QueuedControl) {
        debug!(addr = %self.addr, pdu_id = ?queued.command.pdu_id(), "labels exhausted, command queued");
        self.queued.push_back(queued);
    }

    /// Next queued command, if a label is available for it
    pub fn pop_queued(&mut self) -> Option<QueuedControl> {
        if self.labels.outstanding() >= u32::from(label::LABEL_COUNT) {
            return None;
        }
        self.queued.pop_front()
    }

    pub fn reassembler_mut(&mut self) -> &mut Reassembler {
        &mut self.reassembler
    }

    pub fn notifications(&self) -> &NotificationRegistry {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationRegistry {
        &mut self.notifications
    }

    pub fn cursor(&self) -> &BrowsingCursor {
        &self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut BrowsingCursor {
        &mut self.cursor
    }

    /// Number of labels currently allocated
    pub fn outstanding_labels(&self) -> u32 {
        self.labels.outstanding()
    }

    /// Tear the session down
    ///
    /// Every pending and queued command fails with `Cancelled`, all
    /// labels free, registrations and browsing state drop.
    pub fn teardown(&mut self) {
        info!(addr = %self.addr, "session torn down");
        self.control.cancel_all();
        self.browse.cancel_all();
        for queued in self.queued.drain(..) {
            let _ = queued.responder.send(Err(AvrcpError::Cancelled));
        }
        self.labels.clear();
        self.notifications.clear();
        self.cursor.invalidate();
        self.reassembler.reset();
        self.control_connected = false;
        self.browse_connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr() -> BtAddr {
        BtAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_control_roundtrip_frees_label() {
        let mut session = Session::new(addr());
        let (label, mut rx) = session.begin_control(PduId::GetPlayStatus, far()).unwrap();
        assert_eq!(session.outstanding_labels(), 1);

        let reply = ControlResponse::PlayStatus {
            song_length_ms: 1000,
            song_position_ms: 10,
            status: crate::protocol::types::PlayStatus::Playing,
        };
        assert!(session.resolve_control(label, PduId::GetPlayStatus, Ok(reply)));
        assert_eq!(session.outstanding_labels(), 0);
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_exhaustion_yields_error() {
        let mut session = Session::new(addr());
        let mut receivers = Vec::new();
        for _ in 0..16 {
            receivers.push(session.begin_control(PduId::GetPlayStatus, far()).unwrap());
        }
        assert!(matches!(
            session.begin_control(PduId::GetPlayStatus, far()),
            Err(AvrcpError::LabelsExhausted)
        ));
    }

    #[test]
    fn test_timeout_frees_label_and_requested_registration() {
        let mut session = Session::new(addr());
        let now = Instant::now();
        let (label, mut rx) = session
            .begin_control(PduId::RegisterNotification, now)
            .unwrap();
        session
            .notifications_mut()
            .register(EventId::TrackChanged, label, 0)
            .unwrap();

        let expired = session.expire_overdue(now + Duration::from_millis(1));
        assert_eq!(expired, vec![label]);
        assert_eq!(session.outstanding_labels(), 0);
        assert!(!session.notifications().is_registered(EventId::TrackChanged));
        assert!(matches!(rx.try_recv().unwrap(), Err(AvrcpError::TimedOut)));
    }

    #[test]
    fn test_interim_keeps_label_until_event_fires() {
        let mut session = Session::new(addr());
        let (label, mut rx) = session
            .begin_control(PduId::RegisterNotification, far())
            .unwrap();
        session
            .notifications_mut()
            .register(EventId::VolumeChanged, label, 0)
            .unwrap();

        let interim = ControlResponse::Notification(
            crate::protocol::params::NotificationEvent::VolumeChanged(0x30),
        );
        assert!(session.notification_interim(label, EventId::VolumeChanged, Ok(interim)));
        assert!(rx.try_recv().unwrap().is_ok());
        // label still held for the Changed response
        assert_eq!(session.outstanding_labels(), 1);
        assert_eq!(
            session.notifications().state(EventId::VolumeChanged),
            Some(SubscriptionState::Active)
        );

        let sub = session.notification_fired(EventId::VolumeChanged).unwrap();
        assert_eq!(sub.label, label);
        assert_eq!(session.outstanding_labels(), 0);
    }

    #[test]
    fn test_browse_requires_channel() {
        let mut session = Session::new(addr());
        assert!(matches!(
            session.begin_browse(PduId::GetFolderItems, far()),
            Err(AvrcpError::NotConnected(_))
        ));

        session.set_browse_connected(true);
        assert!(session.begin_browse(PduId::GetFolderItems, far()).is_ok());
    }

    #[test]
    fn test_teardown_cancels_everything() {
        let mut session = Session::new(addr());
        session.set_browse_connected(true);
        let (_, mut rx_c) = session.begin_control(PduId::GetPlayStatus, far()).unwrap();
        let (_, mut rx_b) = session.begin_browse(PduId::GetFolderItems, far()).unwrap();

        session.teardown();
        assert!(matches!(
            rx_c.try_recv().unwrap(),
            Err(AvrcpError::Cancelled)
        ));
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            Err(AvrcpError::Cancelled)
        ));
        assert_eq!(session.outstanding_labels(), 0);
        assert!(!session.is_control_connected());
    }

    #[test]
    fn test_queued_command_waits_for_free_label() {
        let mut session = Session::new(addr());
        let mut receivers = Vec::new();
        for _ in 0..16 {
            receivers.push(session.begin_control(PduId::GetPlayStatus, far()).unwrap());
        }

        let (tx, _rx) = oneshot::channel();
        session.enqueue_control(QueuedControl {
            command: ControlCommand::GetPlayStatus,
            responder: tx,
        });
        assert!(session.pop_queued().is_none());

        let (label, _) = receivers.remove(0);
        session.resolve_control(
            label,
            PduId::GetPlayStatus,
            Err(AvrcpError::decode("test")),
        );
        assert!(session.pop_queued().is_some());
    }
}
