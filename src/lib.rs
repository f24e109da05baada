//! avrcp-session-core
//!
//! AVRCP (Audio/Video Remote Control Profile) session engine in Rust.
//! Speaks the controller side of AVRCP 1.6 over channels an external
//! Bluetooth stack provides.
//!
//! ## Architecture
//!
//! The crate splits into a pure protocol layer and a stateful session
//! layer, tied together by an event-driven engine:
//!
//! - `protocol`: wire codec (frames, PDU parameters, browsed items)
//! - `session`: per-peer state (labels, transactions, notifications,
//!   browsing cursor)
//! - `handler`: dispatch of peer-initiated commands
//! - `transport`: the boundary to the Bluetooth stack
//! - `engine`: the `AvrcpEngine` reactor and public command API
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use avrcp_session_core::{AvrcpEngine, EngineConfig};
//! use avrcp_session_core::protocol::{AvcPanelKey, BtAddr, KeyState};
//! # use avrcp_session_core::transport::{Transport, TransportEvent};
//! # async fn example(transport: Arc<dyn Transport>) -> avrcp_session_core::Result<()> {
//! let (engine, _events) = AvrcpEngine::new(transport, EngineConfig::default());
//!
//! let peer: BtAddr = "AA:BB:CC:DD:EE:FF".parse()?;
//! engine
//!     .handle_event(TransportEvent::ConnectionState { addr: peer, connected: true })
//!     .await?;
//! engine.send_key_event(peer, AvcPanelKey::Play, KeyState::Pressed).await?;
//! engine.send_key_event(peer, AvcPanelKey::Play, KeyState::Released).await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used types
pub use config::{EngineConfig, ExhaustedPolicy, OversizeTextPolicy};
pub use engine::{AvrcpEngine, EngineEvent, ResponseHandle};
pub use error::{AvrcpError, RejectReason, Result};
pub use protocol::address::BtAddr;

// Public modules
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod session;
pub mod transport;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AVRCP_VERSION: &str = "1.6";
