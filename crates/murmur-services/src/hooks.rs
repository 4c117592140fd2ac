//! Lifecycle hooks: observers notified as connections come and go.
//!
//! Hooks run inline on the task that triggered them. Anything slow should
//! be spawned.

use std::sync::Arc;

use crate::connection::PeerConnection;
use crate::error::SessionError;

pub trait ConnectionHooks: Send + Sync {
    /// A connection was created, inbound or outbound.
    fn on_connect(&self, _connection: &Arc<PeerConnection>) {}

    /// A connection was closed. Fires once per connection.
    fn on_disconnect(&self, _connection: &PeerConnection) {}

    /// A send on this connection failed at the transport.
    fn on_transport_error(&self, _connection: &PeerConnection, _error: &SessionError) {}
}

/// Ordered set of hooks, notified in registration order.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn ConnectionHooks>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Arc<dyn ConnectionHooks>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub(crate) fn connect(&self, connection: &Arc<PeerConnection>) {
        for hook in &self.hooks {
            hook.on_connect(connection);
        }
    }

    pub(crate) fn disconnect(&self, connection: &PeerConnection) {
        for hook in &self.hooks {
            hook.on_disconnect(connection);
        }
    }

    pub(crate) fn transport_error(&self, connection: &PeerConnection, error: &SessionError) {
        for hook in &self.hooks {
            hook.on_transport_error(connection, error);
        }
    }
}
