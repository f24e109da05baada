//! Command handler system
//!
//! Dispatch seam for peer-initiated traffic. A connected peer does not
//! only answer commands: it sends its own (SetAbsoluteVolume when it is
//! the volume master, RegisterNotification for events this side emits,
//! passthrough key presses from a remote control surface). Each such
//! command is routed to a registered [`CommandHandler`] by PDU id.
//!
//! ## Components
//!
//! - [`CommandHandler`] - Trait a handler implements, one per concern
//! - [`HandlerRegistry`] - Registration, lifecycle and per-PDU routing
//!
//! Exactly one handler owns a PDU id; registering a second for the same
//! id fails. Commands with no handler are answered negatively by the
//! engine, never silently dropped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{AvrcpError, Result};
use crate::protocol::address::BtAddr;
use crate::protocol::params::{ControlCommand, ControlResponse};
use crate::protocol::types::{KeyState, PduId};

/// Handler for peer-initiated commands
///
/// Implementations declare the PDU ids they own and produce the response
/// for each incoming command. The registry serializes access, so `&mut
/// self` state needs no internal locking.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handler name, unique within a registry
    fn name(&self) -> &str;

    /// PDU ids this handler owns
    fn handled_pdus(&self) -> Vec<PduId>;

    /// Produce the response for a peer command
    ///
    /// An error response is expressed as `Ok(ControlResponse::Rejected
    /// { .. })`; `Err` means the handler itself failed and the engine
    /// answers with a generic rejection.
    async fn handle_command(
        &mut self,
        addr: BtAddr,
        command: &ControlCommand,
    ) -> Result<ControlResponse>;

    /// Observe a passthrough key event from the peer
    ///
    /// Broadcast to every handler; the default ignores it.
    async fn handle_key_event(&mut self, _addr: BtAddr, _key: u8, _state: KeyState) -> Result<()> {
        Ok(())
    }

    /// Set up handler resources
    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release handler resources
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Registry routing peer commands to their handlers
pub struct HandlerRegistry {
    /// Registered handlers indexed by name
    handlers: HashMap<String, Arc<RwLock<Box<dyn CommandHandler>>>>,

    /// PDU id to handler name mapping for routing
    routes: HashMap<PduId, String>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    /// Register a handler and claim its PDU ids
    ///
    /// Calls the handler's `initialize()`.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` - name or one of the PDU ids is already taken
    /// - `Handler` - initialization failed
    pub async fn register(&mut self, mut handler: Box<dyn CommandHandler>) -> Result<()> {
        let name = handler.name().to_string();

        if self.handlers.contains_key(&name) {
            return Err(AvrcpError::AlreadyExists(format!(
                "handler '{}' is already registered",
                name
            )));
        }

        let pdus = handler.handled_pdus();
        for pdu in &pdus {
            if let Some(owner) = self.routes.get(pdu) {
                return Err(AvrcpError::AlreadyExists(format!(
                    "PDU {:?} is already handled by '{}'",
                    pdu, owner
                )));
            }
        }

        info!(handler = %name, "registering command handler");

        handler.initialize().await.map_err(|e| {
            AvrcpError::handler(format!("failed to initialize handler '{}': {}", name, e))
        })?;

        for pdu in pdus {
            self.routes.insert(pdu, name.clone());
        }
        self.handlers
            .insert(name.clone(), Arc::new(RwLock::new(handler)));

        Ok(())
    }

    /// Remove a handler and release its PDU ids
    ///
    /// Calls the handler's `shutdown()`.
    pub async fn unregister(&mut self, name: &str) -> Result<()> {
        let handler = self.handlers.remove(name).ok_or_else(|| {
            AvrcpError::handler(format!("handler '{}' not found", name))
        })?;

        let mut guard = handler.write().await;
        guard.shutdown().await.map_err(|e| {
            AvrcpError::handler(format!("failed to shut down handler '{}': {}", name, e))
        })?;

        self.routes.retain(|_, owner| owner != name);
        debug!(handler = name, "command handler unregistered");

        Ok(())
    }

    /// Route a peer command to its handler and return the response
    ///
    /// # Errors
    ///
    /// `Handler` when no handler owns the PDU id or the handler failed;
    /// the engine turns either into a negative response to the peer.
    pub async fn route_command(
        &self,
        addr: BtAddr,
        command: &ControlCommand,
    ) -> Result<ControlResponse> {
        let pdu_id = command.pdu_id();

        let name = self.routes.get(&pdu_id).ok_or_else(|| {
            warn!(?pdu_id, "no handler for peer command");
            AvrcpError::handler(format!("no handler for PDU {:?}", pdu_id))
        })?;

        let handler = self.handlers.get(name).ok_or_else(|| {
            error!(handler = %name, "handler missing from registry");
            AvrcpError::handler(format!("handler '{}' not found", name))
        })?;

        debug!(?pdu_id, handler = %name, "dispatching peer command");

        let mut guard = handler.write().await;
        guard.handle_command(addr, command).await.map_err(|e| {
            error!(handler = %name, ?pdu_id, error = %e, "handler failed");
            AvrcpError::handler(format!("handler '{}' failed: {}", name, e))
        })
    }

    /// Broadcast a passthrough key event to every handler
    pub async fn route_key_event(&self, addr: BtAddr, key: u8, state: KeyState) -> Result<()> {
        debug!(key, ?state, "dispatching passthrough key event");
        for (name, handler) in &self.handlers {
            let mut guard = handler.write().await;
            if let Err(e) = guard.handle_key_event(addr, key, state).await {
                error!(handler = %name, error = %e, "key-event handler failed");
                return Err(AvrcpError::handler(format!(
                    "handler '{}' failed on key event: {}",
                    name, e
                )));
            }
        }
        Ok(())
    }

    /// Whether any handler owns `pdu_id`
    pub fn handles(&self, pdu_id: PduId) -> bool {
        self.routes.contains_key(&pdu_id)
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Shut every handler down
    ///
    /// Continues past failures and returns the first error encountered.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("shutting down all command handlers");

        let mut first_error = None;
        let names: Vec<String> = self.handlers.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.unregister(&name).await {
                error!(handler = %name, error = %e, "handler shutdown failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VolumeHandler {
        volume: u8,
        keys_seen: usize,
    }

    impl VolumeHandler {
        fn new() -> Self {
            Self {
                volume: 0x40,
                keys_seen: 0,
            }
        }
    }

    #[async_trait]
    impl CommandHandler for VolumeHandler {
        fn name(&self) -> &str {
            "volume"
        }

        fn handled_pdus(&self) -> Vec<PduId> {
            vec![PduId::SetAbsoluteVolume]
        }

        async fn handle_command(
            &mut self,
            _addr: BtAddr,
            command: &ControlCommand,
        ) -> Result<ControlResponse> {
            match command {
                ControlCommand::SetAbsoluteVolume { volume } => {
                    self.volume = *volume;
                    Ok(ControlResponse::AbsoluteVolume { volume: *volume })
                }
                _ => Err(AvrcpError::handler("unexpected command")),
            }
        }

        async fn handle_key_event(
            &mut self,
            _addr: BtAddr,
            _key: u8,
            _state: KeyState,
        ) -> Result<()> {
            self.keys_seen += 1;
            Ok(())
        }
    }

    fn addr() -> BtAddr {
        BtAddr::new([1, 2, 3, 4, 5, 6])
    }

    #[tokio::test]
    async fn test_register_and_route() {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(VolumeHandler::new())).await.unwrap();

        assert!(registry.handles(PduId::SetAbsoluteVolume));
        assert!(!registry.handles(PduId::GetPlayStatus));

        let response = registry
            .route_command(addr(), &ControlCommand::SetAbsoluteVolume { volume: 0x25 })
            .await
            .unwrap();
        assert!(matches!(
            response,
            ControlResponse::AbsoluteVolume { volume: 0x25 }
        ));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(VolumeHandler::new())).await.unwrap();

        let result = registry.register(Box::new(VolumeHandler::new())).await;
        assert!(matches!(result, Err(AvrcpError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_unrouted_pdu_is_an_error() {
        let registry = HandlerRegistry::new();
        let result = registry
            .route_command(addr(), &ControlCommand::GetPlayStatus)
            .await;
        assert!(matches!(result, Err(AvrcpError::Handler(_))));
    }

    #[tokio::test]
    async fn test_key_events_broadcast() {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(VolumeHandler::new())).await.unwrap();

        registry
            .route_key_event(addr(), 0x44, KeyState::Pressed)
            .await
            .unwrap();
        registry
            .route_key_event(addr(), 0x44, KeyState::Released)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unregister_releases_routes() {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(VolumeHandler::new())).await.unwrap();
        registry.unregister("volume").await.unwrap();

        assert!(!registry.has_handler("volume"));
        assert!(!registry.handles(PduId::SetAbsoluteVolume));
        assert_eq!(registry.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(VolumeHandler::new())).await.unwrap();

        registry.shutdown_all().await.unwrap();
        assert_eq!(registry.handler_count(), 0);
    }
}
