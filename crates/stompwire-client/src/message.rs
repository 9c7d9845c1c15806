use std::fmt;
use std::ops::Deref;

use stompwire_frame::{Frame, Headers};

use crate::error::Result;
use crate::handle::{Command, Handle};

/// A MESSAGE frame delivered to a subscription.
///
/// Dereferences to the underlying [`Frame`].
pub struct Message {
    frame: Frame,
    handle: Handle,
    session: u64,
    message_id: String,
    subscription: String,
}

impl Message {
    pub(crate) fn new(
        frame: Frame,
        handle: Handle,
        session: u64,
        message_id: String,
        subscription: String,
    ) -> Self {
        Self {
            frame,
            handle,
            session,
            message_id,
            subscription,
        }
    }

    /// Id used when acknowledging: the `ack` header under 1.2, otherwise
    /// `message-id`.
    pub fn ack_id(&self) -> &str {
        &self.message_id
    }

    /// The `subscription` header.
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }

    /// Send ACK for this message.
    pub fn ack(&self, headers: Headers) -> Result<()> {
        self.acknowledge(headers, false)
    }

    /// Send NACK for this message.
    pub fn nack(&self, headers: Headers) -> Result<()> {
        self.acknowledge(headers, true)
    }

    /// ACK/NACK go out only on the connection that delivered the message;
    /// after a reconnect they are dropped.
    fn acknowledge(&self, headers: Headers, nack: bool) -> Result<()> {
        self.handle.request(Command::Ack {
            session: Some(self.session),
            message_id: self.message_id.clone(),
            subscription: self.subscription.clone(),
            headers,
            nack,
        })
    }
}

impl Deref for Message {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("subscription", &self.subscription)
            .field("ack_id", &self.message_id)
            .field("frame", &self.frame)
            .finish()
    }
}

/// Handle returned by `Client::subscribe`.
#[derive(Clone)]
pub struct Subscription {
    id: String,
    handle: Handle,
}

impl Subscription {
    pub(crate) fn new(id: String, handle: Handle) -> Self {
        Self { id, handle }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Send UNSUBSCRIBE for this subscription.
    pub fn unsubscribe(&self, headers: Headers) -> Result<()> {
        self.handle.request(Command::Unsubscribe {
            id: self.id.clone(),
            headers,
        })
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Handle returned by `Client::begin`.
#[derive(Clone)]
pub struct Transaction {
    id: String,
    handle: Handle,
}

impl Transaction {
    pub(crate) fn new(id: String, handle: Handle) -> Self {
        Self { id, handle }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn commit(&self) -> Result<()> {
        self.handle.request(Command::Commit {
            id: self.id.clone(),
        })
    }

    pub fn abort(&self) -> Result<()> {
        self.handle.request(Command::Abort {
            id: self.id.clone(),
        })
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).finish()
    }
}
