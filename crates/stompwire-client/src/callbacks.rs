use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use stompwire_frame::Frame;
use stompwire_transport::CloseEvent;
use tracing::error;

use crate::client::ActivationState;
use crate::message::Message;

pub type FrameCallback = Arc<dyn Fn(&Frame) + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;
pub type ReceiptCallback = Box<dyn FnOnce(&Frame) + Send>;
pub type CloseCallback = Arc<dyn Fn(&CloseEvent) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type NotifyCallback = Arc<dyn Fn() + Send + Sync>;
pub type StateCallback = Arc<dyn Fn(ActivationState) + Send + Sync>;
pub type BeforeConnectHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Event sinks invoked from the client's event loop, one per event kind.
///
/// Every sink defaults to a no-op. Sinks run on the event loop task and
/// must not block.
#[derive(Clone)]
pub struct Callbacks {
    pub(crate) on_connect: FrameCallback,
    pub(crate) on_disconnect: FrameCallback,
    pub(crate) on_stomp_error: FrameCallback,
    pub(crate) on_websocket_close: CloseCallback,
    pub(crate) on_websocket_error: ErrorCallback,
    pub(crate) on_unhandled_message: MessageCallback,
    pub(crate) on_unhandled_receipt: FrameCallback,
    pub(crate) on_unhandled_frame: FrameCallback,
    pub(crate) on_heartbeat_received: NotifyCallback,
    pub(crate) on_heartbeat_lost: NotifyCallback,
    pub(crate) on_change_state: StateCallback,
    pub(crate) before_connect: Option<BeforeConnectHook>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            on_connect: Arc::new(|_| {}),
            on_disconnect: Arc::new(|_| {}),
            on_stomp_error: Arc::new(|_| {}),
            on_websocket_close: Arc::new(|_| {}),
            on_websocket_error: Arc::new(|_| {}),
            on_unhandled_message: Arc::new(|_| {}),
            on_unhandled_receipt: Arc::new(|_| {}),
            on_unhandled_frame: Arc::new(|_| {}),
            on_heartbeat_received: Arc::new(|| {}),
            on_heartbeat_lost: Arc::new(|| {}),
            on_change_state: Arc::new(|_| {}),
            before_connect: None,
        }
    }
}

impl Callbacks {
    pub(crate) fn set_before_connect<F, Fut>(&mut self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.before_connect = Some(Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(hook()) }));
    }
}

/// Run a user callback on the event loop. A panic is logged and swallowed.
pub(crate) fn guarded(callback: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(callback, "user callback panicked");
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("before_connect", &self.before_connect.is_some())
            .finish_non_exhaustive()
    }
}
