//! Transport boundary
//!
//! The engine does not open L2CAP channels itself; an adapter owns the
//! control and browsing channels and hands completed AVCTP payloads in
//! as [`TransportEvent`]s while the engine sends through the
//! [`Transport`] trait. This keeps the session logic independent of the
//! Bluetooth stack underneath.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::address::BtAddr;

/// Feature bits a peer reports when its control channel comes up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteFeatures(pub u8);

impl RemoteFeatures {
    pub const NONE: RemoteFeatures = RemoteFeatures(0);
    pub const METADATA: u8 = 0x01;
    pub const ABSOLUTE_VOLUME: u8 = 0x02;
    pub const BROWSING: u8 = 0x04;

    pub fn supports_metadata(&self) -> bool {
        self.0 & Self::METADATA != 0
    }

    pub fn supports_absolute_volume(&self) -> bool {
        self.0 & Self::ABSOLUTE_VOLUME != 0
    }

    pub fn supports_browsing(&self) -> bool {
        self.0 & Self::BROWSING != 0
    }
}

/// Outbound half of the transport boundary
///
/// Frames are fully encoded AVCTP payloads; the adapter only moves
/// bytes. Send failures surface as `Io`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a frame on the control channel
    async fn send_control_frame(&self, addr: BtAddr, frame: Vec<u8>) -> Result<()>;

    /// Send a frame on the browsing channel
    async fn send_browse_frame(&self, addr: BtAddr, frame: Vec<u8>) -> Result<()>;
}

/// Inbound half of the transport boundary
///
/// The adapter feeds these to [`AvrcpEngine::handle_event`] in arrival
/// order per peer.
///
/// [`AvrcpEngine::handle_event`]: crate::engine::AvrcpEngine::handle_event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Control channel came up or went down
    ConnectionState { addr: BtAddr, connected: bool },

    /// Browsing channel came up or went down
    BrowseConnectionState { addr: BtAddr, connected: bool },

    /// The peer reported its feature bits
    RemoteFeatures { addr: BtAddr, features: RemoteFeatures },

    /// A complete frame arrived on the control channel
    ControlFrame { addr: BtAddr, payload: Vec<u8> },

    /// A complete frame arrived on the browsing channel
    BrowseFrame { addr: BtAddr, payload: Vec<u8> },
}

impl TransportEvent {
    /// The peer the event concerns
    pub fn addr(&self) -> BtAddr {
        match self {
            TransportEvent::ConnectionState { addr, .. }
            | TransportEvent::BrowseConnectionState { addr, .. }
            | TransportEvent::RemoteFeatures { addr, .. }
            | TransportEvent::ControlFrame { addr, .. }
            | TransportEvent::BrowseFrame { addr, .. } => *addr,
        }
    }

    pub fn is_frame(&self) -> bool {
        matches!(
            self,
            TransportEvent::ControlFrame { .. } | TransportEvent::BrowseFrame { .. }
        )
    }

    pub fn is_connection_change(&self) -> bool {
        matches!(
            self,
            TransportEvent::ConnectionState { .. } | TransportEvent::BrowseConnectionState { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_bits() {
        let features = RemoteFeatures(RemoteFeatures::METADATA | RemoteFeatures::BROWSING);
        assert!(features.supports_metadata());
        assert!(features.supports_browsing());
        assert!(!features.supports_absolute_volume());
        assert!(!RemoteFeatures::NONE.supports_metadata());
    }

    #[test]
    fn test_event_accessors() {
        let addr = BtAddr::new([1, 2, 3, 4, 5, 6]);
        let event = TransportEvent::ControlFrame {
            addr,
            payload: vec![0x00],
        };
        assert_eq!(event.addr(), addr);
        assert!(event.is_frame());
        assert!(!event.is_connection_change());

        let event = TransportEvent::ConnectionState {
            addr,
            connected: true,
        };
        assert!(event.is_connection_change());
    }
}
