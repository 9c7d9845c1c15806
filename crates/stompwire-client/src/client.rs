//! Public client handle and builder.
//!
//! A [`Client`] is a cheap, cloneable handle onto one event loop task. The
//! loop owns the live session, the reconnect timer, and the lifecycle state;
//! every method here only posts a command to it.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use stompwire_frame::{Body, Frame, Headers};
use stompwire_transport::{CloseEvent, Connector};
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::callbacks::Callbacks;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::event_loop::EventLoop;
use crate::handle::{Command, Event, Handle};
use crate::ids::{CounterIds, IdGenerator};
use crate::message::{Message, Subscription, Transaction};

/// Lifecycle of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationState {
    /// Connecting, connected, or waiting to reconnect.
    Active,
    /// `deactivate` called; waiting for the socket to close.
    Deactivating,
    /// Initial and terminal state.
    Inactive,
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivationState::Active => "active",
            ActivationState::Deactivating => "deactivating",
            ActivationState::Inactive => "inactive",
        };
        f.write_str(name)
    }
}

/// Arguments to [`Client::publish`].
#[derive(Debug, Clone, Default)]
pub struct PublishParams {
    pub destination: String,
    /// Extra headers. A `destination` entry here overrides the field above.
    pub headers: Headers,
    pub body: Body,
    pub skip_content_length_header: bool,
}

impl PublishParams {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_skip_content_length_header(mut self, skip: bool) -> Self {
        self.skip_content_length_header = skip;
        self
    }
}

/// Arguments to [`Client::deactivate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeactivateOptions {
    /// Discard the socket instead of the DISCONNECT handshake.
    pub force: bool,
}

impl DeactivateOptions {
    pub fn force() -> Self {
        Self { force: true }
    }
}

/// Configures and spawns a [`Client`].
///
/// ```no_run
/// # async fn demo() -> stompwire_client::Result<()> {
/// use stompwire_client::{ClientBuilder, ClientConfig};
///
/// let config = ClientConfig::default().with_broker_url("ws://localhost:15674/ws");
/// let client = ClientBuilder::new(config)
///     .on_connect(|frame| println!("connected: {:?}", frame.header("version")))
///     .build()?;
/// client.activate()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    ids: Arc<dyn IdGenerator>,
    callbacks: Callbacks,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connector: None,
            ids: Arc::new(CounterIds::new()),
            callbacks: Callbacks::default(),
        }
    }

    /// Socket factory used for every connection attempt. Without one the
    /// client dials `broker_url` over WebSocket (feature `websocket`).
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn with_id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn on_connect(mut self, f: impl Fn(&Frame) + Send + Sync + 'static) -> Self {
        self.callbacks.on_connect = Arc::new(f);
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn(&Frame) + Send + Sync + 'static) -> Self {
        self.callbacks.on_disconnect = Arc::new(f);
        self
    }

    /// Broker ERROR frames.
    pub fn on_stomp_error(mut self, f: impl Fn(&Frame) + Send + Sync + 'static) -> Self {
        self.callbacks.on_stomp_error = Arc::new(f);
        self
    }

    pub fn on_websocket_close(mut self, f: impl Fn(&CloseEvent) + Send + Sync + 'static) -> Self {
        self.callbacks.on_websocket_close = Arc::new(f);
        self
    }

    pub fn on_websocket_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks.on_websocket_error = Arc::new(f);
        self
    }

    /// Messages for a subscription with no registered callback.
    pub fn on_unhandled_message(mut self, f: impl Fn(Message) + Send + Sync + 'static) -> Self {
        self.callbacks.on_unhandled_message = Arc::new(f);
        self
    }

    pub fn on_unhandled_receipt(mut self, f: impl Fn(&Frame) + Send + Sync + 'static) -> Self {
        self.callbacks.on_unhandled_receipt = Arc::new(f);
        self
    }

    pub fn on_unhandled_frame(mut self, f: impl Fn(&Frame) + Send + Sync + 'static) -> Self {
        self.callbacks.on_unhandled_frame = Arc::new(f);
        self
    }

    pub fn on_heartbeat_received(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.callbacks.on_heartbeat_received = Arc::new(f);
        self
    }

    pub fn on_heartbeat_lost(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.callbacks.on_heartbeat_lost = Arc::new(f);
        self
    }

    pub fn on_change_state(mut self, f: impl Fn(ActivationState) + Send + Sync + 'static) -> Self {
        self.callbacks.on_change_state = Arc::new(f);
        self
    }

    /// Awaited before every connection attempt, reconnects included.
    pub fn before_connect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks.set_before_connect(hook);
        self
    }

    /// Spawn the event loop on the current tokio runtime.
    ///
    /// The client starts inactive; call [`Client::activate`] to connect.
    pub fn build(self) -> Result<Client> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ClientError::Config("a tokio runtime is required".to_string()))?;

        if self.connector.is_none() && self.config.broker_url.is_none() {
            return Err(ClientError::Config(
                "either a connector or broker_url must be set".to_string(),
            ));
        }

        let (handle, rx) = Handle::new(self.ids);
        let event_loop = EventLoop::new(
            self.config,
            self.connector,
            Arc::new(self.callbacks),
            handle.clone(),
            rx,
        );
        runtime.spawn(event_loop.run());
        debug!("client event loop started");

        Ok(Client {
            inner: Arc::new(ClientInner { handle }),
        })
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("connector", &self.connector.is_some())
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

struct ClientInner {
    handle: Handle,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.handle.mark_closed();
        self.handle.notify(Event::Shutdown);
    }
}

/// Handle to a running STOMP client.
///
/// Dropping the last clone shuts the client down: a live socket is
/// discarded and outstanding [`Subscription`], [`Transaction`], and
/// [`Message`] handles start failing with [`ClientError::Closed`].
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Start connecting, and keep reconnecting until deactivated.
    pub fn activate(&self) -> Result<()> {
        self.handle().post(Command::Activate)
    }

    /// Stop the client.
    ///
    /// The returned future resolves once the socket has closed, or at once if
    /// the client is already inactive. Calling again while a shutdown is in
    /// progress joins it; `force` on a later call escalates to a discard.
    pub fn deactivate(&self, options: DeactivateOptions) -> impl Future<Output = Result<()>> + Send + 'static {
        let (done, wait) = oneshot::channel();
        let posted = self.handle().post(Command::Deactivate {
            force: options.force,
            done,
        });
        async move {
            posted?;
            // A dropped sender means the loop shut down, which is inactive too.
            let _ = wait.await;
            Ok(())
        }
    }

    /// Close the socket without the DISCONNECT handshake. The client stays
    /// active and reconnects if configured to.
    pub fn force_disconnect(&self) -> Result<()> {
        self.handle().post(Command::ForceDisconnect)
    }

    /// Send a message with SEND.
    pub fn publish(&self, params: PublishParams) -> Result<()> {
        self.handle().request(Command::Publish(params))
    }

    /// Subscribe to `destination`.
    ///
    /// An `id` entry in `headers` names the subscription; otherwise one is
    /// generated.
    pub fn subscribe(
        &self,
        destination: impl Into<String>,
        callback: impl Fn(Message) + Send + Sync + 'static,
        mut headers: Headers,
    ) -> Result<Subscription> {
        if !self.connected() {
            return Err(self.not_ready());
        }
        let id = match headers.remove("id") {
            Some(id) => id,
            None => self.handle().next_id("sub"),
        };
        self.handle().request(Command::Subscribe {
            id: id.clone(),
            destination: destination.into(),
            headers,
            callback: Arc::new(callback),
        })?;
        Ok(Subscription::new(id, self.handle().clone()))
    }

    pub fn unsubscribe(&self, id: impl Into<String>, headers: Headers) -> Result<()> {
        self.handle().request(Command::Unsubscribe {
            id: id.into(),
            headers,
        })
    }

    /// Start a transaction, generating an id when none is given.
    pub fn begin(&self, transaction_id: Option<&str>) -> Result<Transaction> {
        if !self.connected() {
            return Err(self.not_ready());
        }
        let id = match transaction_id {
            Some(id) => id.to_string(),
            None => self.handle().next_id("tx"),
        };
        self.handle().request(Command::Begin { id: id.clone() })?;
        Ok(Transaction::new(id, self.handle().clone()))
    }

    pub fn commit(&self, transaction_id: impl Into<String>) -> Result<()> {
        self.handle().request(Command::Commit {
            id: transaction_id.into(),
        })
    }

    pub fn abort(&self, transaction_id: impl Into<String>) -> Result<()> {
        self.handle().request(Command::Abort {
            id: transaction_id.into(),
        })
    }

    pub fn ack(
        &self,
        message_id: impl Into<String>,
        subscription_id: impl Into<String>,
        headers: Headers,
    ) -> Result<()> {
        self.acknowledge(message_id.into(), subscription_id.into(), headers, false)
    }

    pub fn nack(
        &self,
        message_id: impl Into<String>,
        subscription_id: impl Into<String>,
        headers: Headers,
    ) -> Result<()> {
        self.acknowledge(message_id.into(), subscription_id.into(), headers, true)
    }

    fn acknowledge(&self, message_id: String, subscription: String, headers: Headers, nack: bool) -> Result<()> {
        self.handle().request(Command::Ack {
            session: None,
            message_id,
            subscription,
            headers,
            nack,
        })
    }

    /// Run `callback` once when a RECEIPT with this `receipt-id` arrives.
    ///
    /// Register before sending the frame that carries the `receipt` header.
    pub fn watch_for_receipt(
        &self,
        receipt_id: impl Into<String>,
        callback: impl FnOnce(&Frame) + Send + 'static,
    ) -> Result<()> {
        self.handle().request(Command::WatchForReceipt {
            receipt_id: receipt_id.into(),
            callback: Box::new(callback),
        })
    }

    /// True while a STOMP session is established.
    pub fn connected(&self) -> bool {
        self.handle().is_connected()
    }

    /// True in [`ActivationState::Active`].
    pub fn active(&self) -> bool {
        self.state() == ActivationState::Active
    }

    pub fn state(&self) -> ActivationState {
        self.handle().state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ActivationState> {
        self.handle().subscribe_state()
    }

    /// Change the configuration. Takes effect from the next connection attempt.
    pub fn update_config(&self, update: impl FnOnce(&mut ClientConfig) + Send + 'static) -> Result<()> {
        self.handle().post(Command::UpdateConfig(Box::new(update)))
    }

    /// A handle that does not keep the client alive, for use inside callbacks.
    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn not_ready(&self) -> ClientError {
        if self.handle().is_closed() {
            ClientError::Closed
        } else {
            ClientError::NotConnected
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("connected", &self.connected())
            .finish()
    }
}

/// Non-owning [`Client`] reference.
#[derive(Clone)]
pub struct WeakClient {
    inner: Weak<ClientInner>,
}

impl WeakClient {
    pub fn upgrade(&self) -> Option<Client> {
        self.inner.upgrade().map(|inner| Client { inner })
    }
}

impl fmt::Debug for WeakClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakClient")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use stompwire_transport::memory;

    use super::*;

    #[test]
    fn publish_params_builder() {
        let params = PublishParams::new("/queue/a")
            .with_header("priority", "9")
            .with_body("hi")
            .with_skip_content_length_header(true);
        assert_eq!(params.destination, "/queue/a");
        assert_eq!(params.headers.get("priority"), Some("9"));
        assert_eq!(params.body.as_text(), "hi");
        assert!(params.skip_content_length_header);
    }

    #[test]
    fn state_display() {
        assert_eq!(ActivationState::Deactivating.to_string(), "deactivating");
    }

    #[test]
    fn build_requires_runtime() {
        let (connector, _server) = memory::channel("memory://test");
        let err = ClientBuilder::new(ClientConfig::default())
            .with_connector(connector)
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[tokio::test]
    async fn build_requires_connector_or_url() {
        let err = ClientBuilder::new(ClientConfig::default()).build().unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[tokio::test]
    async fn inactive_client_rejects_connection_operations() {
        let (connector, _server) = memory::channel("memory://test");
        let client = ClientBuilder::new(ClientConfig::default())
            .with_connector(connector)
            .build()
            .unwrap();

        assert_eq!(client.state(), ActivationState::Inactive);
        assert!(!client.connected());
        assert!(matches!(
            client.publish(PublishParams::new("/queue/a")),
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.subscribe("/queue/a", |_| {}, Headers::new()),
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(client.begin(None), Err(ClientError::NotConnected)));

        // Deactivating an inactive client resolves at once.
        client.deactivate(DeactivateOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn weak_client_does_not_keep_client_alive() {
        let (connector, _server) = memory::channel("memory://test");
        let client = ClientBuilder::new(ClientConfig::default())
            .with_connector(connector)
            .build()
            .unwrap();
        let weak = client.downgrade();
        assert!(weak.upgrade().is_some());
        drop(client);
        assert!(weak.upgrade().is_none());
    }
}
