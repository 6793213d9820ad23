//! Dispatcher: routes decoded messages to the registered handler.
//!
//! The handler is a capability set. [`Xmitter`] has one method per message
//! kind and each method defaults to doing nothing, so a consumer only
//! implements the notifications it cares about. The listener side
//! implements the same trait on [`Transmitter`](crate::Transmitter), so
//! producer and consumer agree on one shape.

use crate::protocol::Message;

/// Lifecycle notifications exchanged between device and daemon.
pub trait Xmitter {
    /// The device finished initializing.
    fn device_ready(&mut self) {}

    /// An audio client attached to the device.
    fn client_connected(&mut self, client_id: u32, process_id: i32) {
        let _ = (client_id, process_id);
    }

    /// An audio client detached from the device.
    fn client_disconnected(&mut self, client_id: u32, process_id: i32) {
        let _ = (client_id, process_id);
    }

    /// A client started IO.
    fn client_started_io(&mut self, client_id: u32) {
        let _ = client_id;
    }

    /// A client stopped IO.
    fn client_stopped_io(&mut self, client_id: u32) {
        let _ = client_id;
    }
}

/// Holds at most one handler and invokes it synchronously.
#[derive(Default)]
pub struct Dispatcher {
    handler: Option<Box<dyn Xmitter + Send>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registered", &self.handler.is_some())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher with no handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler`. The last registration wins.
    pub fn register(&mut self, handler: Box<dyn Xmitter + Send>) {
        if self.handler.is_some() {
            log::warn!("[dispatch] overwriting a previously registered handler");
        }
        self.handler = Some(handler);
    }

    /// Returns true once a handler has been registered.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Invoke the handler method matching `message`.
    ///
    /// Returns false if no handler is registered.
    pub fn dispatch(&mut self, message: Message) -> bool {
        let Some(handler) = self.handler.as_mut() else {
            return false;
        };
        deliver(handler.as_mut(), message);
        true
    }
}

/// Call the method of `target` that corresponds to `message`.
pub fn deliver<X: Xmitter + ?Sized>(target: &mut X, message: Message) {
    match message {
        Message::Ready => target.device_ready(),
        Message::ClientConnected {
            client_id,
            process_id,
        } => {
            target.client_connected(client_id, process_id);
        }
        Message::ClientDisconnected {
            client_id,
            process_id,
        } => {
            target.client_disconnected(client_id, process_id);
        }
        Message::ClientStartedIo { client_id } => target.client_started_io(client_id),
        Message::ClientStoppedIo { client_id } => target.client_stopped_io(client_id),
    }
}
