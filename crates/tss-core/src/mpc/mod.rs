//! MPC coordination utilities

use crate::{Error, Message, PartyId, Result};
use tokio::sync::mpsc;

pub use ::async_trait::async_trait;

/// One participant's protocol state machine.
///
/// Outgoing messages and the terminal result are not returned from these
/// calls; the party pushes them into the [`PartyChannels`] it was built with.
#[async_trait]
pub trait Party: Send + Sync + 'static {
    /// Engine-specific message content
    type Payload: Send + Sync + 'static;
    /// Terminal result of the round
    type Output: Send + 'static;

    /// This party's identity
    fn id(&self) -> &PartyId;

    /// Begin the state machine
    async fn start(&self) -> Result<()>;

    /// Advance the state machine with an inbound message
    async fn consume(&self, message: &Message<Self::Payload>) -> Result<()>;
}

/// Sending halves of a session's outgoing-message and terminal-result streams
pub struct PartyChannels<T, O> {
    outgoing: mpsc::UnboundedSender<Message<T>>,
    terminal: mpsc::UnboundedSender<O>,
}

impl<T, O> PartyChannels<T, O> {
    pub fn new(
        outgoing: mpsc::UnboundedSender<Message<T>>,
        terminal: mpsc::UnboundedSender<O>,
    ) -> Self {
        Self { outgoing, terminal }
    }

    /// Hand an outgoing message to the session
    pub fn send(&self, message: Message<T>) -> Result<()> {
        self.outgoing.send(message).map_err(|_| Error::SessionClosed)
    }

    /// Report this party's terminal result
    pub fn finish(&self, output: O) -> Result<()> {
        self.terminal.send(output).map_err(|_| Error::SessionClosed)
    }
}

impl<T, O> Clone for PartyChannels<T, O> {
    fn clone(&self) -> Self {
        Self {
            outgoing: self.outgoing.clone(),
            terminal: self.terminal.clone(),
        }
    }
}

mod completion;
mod router;

pub use completion::CompletionTracker;
pub use router::Router;
