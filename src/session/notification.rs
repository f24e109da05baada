//! Notification registry
//!
//! Tracks which events the peer has registered for, with at most one
//! outstanding registration per event id. AVRCP notifications are
//! one-shot: a registration is answered Interim immediately, then a
//! single Changed response fires it, after which the peer must register
//! again.
//!
//! Per event id the state machine is:
//!
//! ```text
//! Idle -> Requested -> Active -> Idle (on fire)
//! ```
//!
//! `Requested` covers the window between accepting the registration and
//! sending the Interim response; an event firing in that window completes
//! the registration the same way.

use crate::error::{AvrcpError, RejectReason, Result};
use crate::protocol::types::EventId;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Where a subscription is in its one-shot life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Registration accepted, Interim response not yet sent
    Requested,
    /// Interim sent; the next event fire consumes the subscription
    Active,
}

/// One outstanding registration
#[derive(Debug, Clone)]
pub struct Subscription {
    pub event: EventId,
    /// Transaction label of the peer's RegisterNotification command; the
    /// Interim and Changed responses are addressed to it
    pub label: u8,
    /// Playback-position granularity in ms, zero for other events
    pub interval: u32,
    pub state: SubscriptionState,
}

/// Per-session registry of peer notification registrations
#[derive(Debug, Default)]
pub struct NotificationRegistry {
    subscriptions: HashMap<EventId, Subscription>,
}

impl NotificationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a registration for `event`
    ///
    /// # Errors
    ///
    /// `AvrcpError::Rejected(AlreadyPending)` if a registration for this
    /// event is already Requested or Active.
    pub fn register(&mut self, event: EventId, label: u8, interval: u32) -> Result<()> {
        if self.subscriptions.contains_key(&event) {
            debug!(?event, "duplicate registration rejected");
            return Err(AvrcpError::Rejected(RejectReason::AlreadyPending));
        }
        self.subscriptions.insert(
            event,
            Subscription {
                event,
                label,
                interval,
                state: SubscriptionState::Requested,
            },
        );
        debug!(?event, label, "notification registered");
        Ok(())
    }

    /// Record that the Interim response for `event` went out
    ///
    /// Returns false (and logs) if no registration is Requested.
    pub fn mark_active(&mut self, event: EventId) -> bool {
        match self.subscriptions.get_mut(&event) {
            Some(sub) if sub.state == SubscriptionState::Requested => {
                sub.state = SubscriptionState::Active;
                true
            }
            _ => {
                warn!(?event, "interim sent for event with no requested registration");
                false
            }
        }
    }

    /// Consume the subscription for a fired event
    ///
    /// Returns the subscription so the caller can address the Changed
    /// response; the event returns to Idle. A fire for an unregistered
    /// event is a protocol violation: logged and ignored, no state change.
    pub fn on_event_fired(&mut self, event: EventId) -> Option<Subscription> {
        match self.subscriptions.remove(&event) {
            Some(sub) => {
                debug!(?event, "notification fired, registration consumed");
                Some(sub)
            }
            None => {
                warn!(?event, "event fired with no registration; ignoring");
                None
            }
        }
    }

    /// Drop the registration for `event`, if any
    pub fn cancel(&mut self, event: EventId) -> Option<Subscription> {
        let removed = self.subscriptions.remove(&event);
        if removed.is_some() {
            debug!(?event, "notification registration cancelled");
        }
        removed
    }

    /// Drop the registration carried on `label`, if any
    ///
    /// Used when the transaction that carried the RegisterNotification
    /// command times out or the session tears down.
    pub fn cancel_by_label(&mut self, label: u8) -> Option<Subscription> {
        let event = self
            .subscriptions
            .iter()
            .find(|(_, sub)| sub.label == label)
            .map(|(event, _)| *event)?;
        self.cancel(event)
    }

    /// Whether `event` has a Requested or Active registration
    pub fn is_registered(&self, event: EventId) -> bool {
        self.subscriptions.contains_key(&event)
    }

    /// The state of the registration for `event`, if any
    pub fn state(&self, event: EventId) -> Option<SubscriptionState> {
        self.subscriptions.get(&event).map(|s| s.state)
    }

    /// Events with an outstanding registration
    pub fn registered_events(&self) -> Vec<EventId> {
        self.subscriptions.keys().copied().collect()
    }

    /// Number of outstanding registrations
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Drop every registration (session teardown)
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_then_fire_cycle() {
        let mut registry = NotificationRegistry::new();
        registry.register(EventId::TrackChanged, 3, 0).unwrap();
        assert_eq!(
            registry.state(EventId::TrackChanged),
            Some(SubscriptionState::Requested)
        );

        assert!(registry.mark_active(EventId::TrackChanged));
        assert_eq!(
            registry.state(EventId::TrackChanged),
            Some(SubscriptionState::Active)
        );

        let sub = registry.on_event_fired(EventId::TrackChanged).unwrap();
        assert_eq!(sub.label, 3);
        assert!(!registry.is_registered(EventId::TrackChanged));

        // back to Idle: re-registration succeeds
        registry.register(EventId::TrackChanged, 7, 0).unwrap();
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let mut registry = NotificationRegistry::new();
        registry
            .register(EventId::PlaybackStatusChanged, 0, 0)
            .unwrap();
        let err = registry
            .register(EventId::PlaybackStatusChanged, 1, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            AvrcpError::Rejected(RejectReason::AlreadyPending)
        ));

        // still rejected once Active
        registry.mark_active(EventId::PlaybackStatusChanged);
        let err = registry
            .register(EventId::PlaybackStatusChanged, 2, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            AvrcpError::Rejected(RejectReason::AlreadyPending)
        ));
    }

    #[test]
    fn test_fire_without_registration_is_ignored() {
        let mut registry = NotificationRegistry::new();
        assert!(registry.on_event_fired(EventId::VolumeChanged).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_fire_while_requested_consumes() {
        let mut registry = NotificationRegistry::new();
        registry.register(EventId::UidsChanged, 9, 0).unwrap();
        // event fires before the interim went out
        let sub = registry.on_event_fired(EventId::UidsChanged).unwrap();
        assert_eq!(sub.state, SubscriptionState::Requested);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_and_clear() {
        let mut registry = NotificationRegistry::new();
        registry.register(EventId::TrackChanged, 1, 0).unwrap();
        registry.register(EventId::VolumeChanged, 2, 0).unwrap();

        assert!(registry.cancel(EventId::TrackChanged).is_some());
        assert!(registry.cancel(EventId::TrackChanged).is_none());
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_mark_active_requires_requested() {
        let mut registry = NotificationRegistry::new();
        assert!(!registry.mark_active(EventId::TrackChanged));

        registry.register(EventId::TrackChanged, 0, 0).unwrap();
        assert!(registry.mark_active(EventId::TrackChanged));
        // already active
        assert!(!registry.mark_active(EventId::TrackChanged));
    }
}
