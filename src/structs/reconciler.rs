use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::session::SessionListener;
use super::view::ViewState;
use super::{CartItem, OrderRecord};
use crate::debug::Scope;
use crate::debug_log;
use crate::errors::StorefrontError;

/// Event received on the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Full order record.
    OrderUpdated(Value),
    /// `{"cart": [...]}`.
    CartUpdated(Value),
    /// The server refused or dropped the channel.
    ConnectError(Value),
    /// Any event this client does not consume.
    Other(String),
}

impl PushEvent {
    pub fn from_wire(name: &str, data: Value) -> Self {
        match name {
            "order_updated" => PushEvent::OrderUpdated(data),
            "cart_updated" => PushEvent::CartUpdated(data),
            "connect_error" => PushEvent::ConnectError(data),
            other => PushEvent::Other(other.to_string()),
        }
    }
}

/// Opens push channels.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open a channel for the session identified by `token`.
    async fn connect(&self, token: &str) -> Result<Box<dyn PushConnection>, StorefrontError>;
}

/// An open push channel.
#[async_trait]
pub trait PushConnection: Send {
    /// Wait for the next event. Any error means the channel is gone.
    async fn next_event(&mut self) -> Result<PushEvent, StorefrontError>;
    async fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

struct Shared {
    transport: Arc<dyn PushTransport>,
    view: Arc<ViewState>,
    state: watch::Sender<ChannelState>,
    reconnect_delay: Duration,
    debug: bool,
}

impl Shared {
    /// Once cancelled only `Disconnected` may be published.
    fn transition(&self, cancel: &CancellationToken, next: ChannelState) -> bool {
        if cancel.is_cancelled() && next != ChannelState::Disconnected {
            return false;
        }
        self.state.send_replace(next);
        true
    }

    /// Publish `Disconnected` unless that is already the state.
    fn disconnect(&self) {
        self.state.send_if_modified(|state| {
            std::mem::replace(state, ChannelState::Disconnected) != ChannelState::Disconnected
        });
    }

    async fn run(self: Arc<Self>, token: String, cancel: CancellationToken) {
        loop {
            if !self.transition(&cancel, ChannelState::Connecting) {
                break;
            }

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.transport.connect(&token) => result,
            };

            match connected {
                Ok(mut connection) => {
                    if !self.transition(&cancel, ChannelState::Connected) {
                        connection.close().await;
                        break;
                    }
                    debug_log!(self.debug, Scope::Live, "Push channel connected.");

                    loop {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                connection.close().await;
                                self.disconnect();
                                return;
                            }
                            event = connection.next_event() => match event {
                                Ok(PushEvent::ConnectError(data)) => {
                                    debug_log!(self.debug, Scope::Live, error, "Push channel error: {}", data);
                                    break;
                                }
                                Ok(event) => {
                                    apply(&self.view, event, self.debug);
                                }
                                Err(err) => {
                                    debug_log!(self.debug, Scope::Live, error, "Push channel error: {}", err);
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    debug_log!(self.debug, Scope::Live, error, "Push channel connection error: {}", err);
                }
            }

            self.transition(&cancel, ChannelState::Disconnected);
            debug_log!(
                self.debug,
                Scope::Live,
                "Reconnecting in {}s.",
                self.reconnect_delay.as_secs_f32()
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.disconnect();
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Keeps the cached cart and orders in step with server pushes.
///
/// One channel at a time. Transport errors drop back to `Disconnected` and a
/// single reconnect is scheduled after the fixed delay, forever, until
/// [`Reconciler::shutdown`].
pub struct Reconciler {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl Reconciler {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        view: Arc<ViewState>,
        reconnect_delay: Duration,
        debug: bool,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                transport,
                view,
                state,
                reconnect_delay,
                debug,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|r| !r.cancel.is_cancelled() && !r.task.is_finished())
            .unwrap_or(false)
    }

    /// Open the channel for `token`. A no-op while a channel is already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, token: &str) -> Result<(), StorefrontError> {
        let mut running = self.running.lock();
        if let Some(current) = running.as_ref() {
            if !current.cancel.is_cancelled() && !current.task.is_finished() {
                return Ok(());
            }
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| StorefrontError::Config(format!("push channel needs a tokio runtime: {}", e)))?;

        let cancel = CancellationToken::new();
        let task = handle.spawn(self.shared.clone().run(token.to_string(), cancel.clone()));
        *running = Some(Running { cancel, task });
        Ok(())
    }

    /// Close the channel and cancel any pending reconnect. Idempotent.
    pub fn shutdown(&self) {
        if let Some(running) = self.running.lock().take() {
            running.cancel.cancel();
            debug_log!(self.shared.debug, Scope::Live, "Push channel closed.");
        }
        self.shared.disconnect();
    }
}

impl SessionListener for Reconciler {
    fn on_logout(&self) {
        self.shutdown();
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

/// Merge one pushed event into the view. Returns whether the view changed.
pub fn apply(view: &ViewState, event: PushEvent, debug: bool) -> bool {
    match event {
        PushEvent::OrderUpdated(data) => match serde_json::from_value::<OrderRecord>(data) {
            Ok(order) => view.apply_order(order),
            Err(err) => {
                debug_log!(debug, Scope::Live, "Ignoring order_updated without a full record: {}", err);
                false
            }
        },
        PushEvent::CartUpdated(data) => {
            let cart = match data.get("cart") {
                None | Some(Value::Null) => Vec::new(),
                Some(cart) => match serde_json::from_value::<Vec<CartItem>>(cart.clone()) {
                    Ok(cart) => cart,
                    Err(err) => {
                        debug_log!(debug, Scope::Live, warn, "Ignoring malformed cart_updated: {}", err);
                        return false;
                    }
                },
            };
            if view.cart() == cart {
                return false;
            }
            view.replace_cart(cart);
            true
        }
        PushEvent::ConnectError(_) | PushEvent::Other(_) => false,
    }
}
