//! In-process message routing between the parties of one session

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use super::Party;
use crate::{Error, Message, Result};

/// Delivers outgoing messages to their recipients.
///
/// Each delivery runs as its own task so a slow recipient never blocks the
/// sender or the session loop. Delivery failures are reported on the
/// session's error stream.
pub struct Router<P: Party> {
    /// Session participants, indexed by `PartyId::index`
    parties: Arc<[Arc<P>]>,
    /// Session error stream
    errors: mpsc::UnboundedSender<Error>,
    /// Spawned deliveries
    deliveries: JoinSet<()>,
    /// Deliveries that have not finished yet
    in_flight: Arc<AtomicUsize>,
}

impl<P: Party> Router<P> {
    pub fn new(parties: Arc<[Arc<P>]>, errors: mpsc::UnboundedSender<Error>) -> Self {
        Self {
            parties,
            errors,
            deliveries: JoinSet::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Route one message; returns the number of deliveries dispatched.
    ///
    /// A message addressed to its own sender fails with
    /// [`Error::SelfRouting`] and nothing is delivered.
    pub fn route(&mut self, message: Message<P::Payload>) -> Result<usize> {
        let targets = self.resolve(&message)?;
        let message = Arc::new(message);

        for party in &targets {
            let party = party.clone();
            let message = message.clone();
            let errors = self.errors.clone();
            let in_flight = self.in_flight.clone();

            in_flight.fetch_add(1, Ordering::AcqRel);
            self.deliveries.spawn(async move {
                if let Err(e) = party.consume(&message).await {
                    let _ = errors.send(e);
                }
                in_flight.fetch_sub(1, Ordering::AcqRel);
            });
        }

        debug!(
            from = %message.from,
            broadcast = message.is_broadcast(),
            deliveries = targets.len(),
            in_flight = self.in_flight(),
            "Message routed"
        );

        Ok(targets.len())
    }

    /// Deliveries dispatched but not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Abort every outstanding delivery
    pub fn shutdown(&mut self) {
        trace!(in_flight = self.in_flight(), "Aborting deliveries");
        self.deliveries.abort_all();
    }

    fn resolve(&self, message: &Message<P::Payload>) -> Result<Vec<Arc<P>>> {
        let from = &message.from;

        let sender_known = self
            .parties
            .get(from.index)
            .map_or(false, |p| p.id().share_id == from.share_id);
        if !sender_known {
            return Err(Error::InvalidMessage {
                party: from.to_string(),
                reason: "sender is not a session participant".into(),
            });
        }

        let Some(to) = &message.to else {
            return Ok(self
                .parties
                .iter()
                .filter(|p| p.id().index != from.index)
                .cloned()
                .collect());
        };

        if to.is_empty() {
            return Err(Error::InvalidMessage {
                party: from.to_string(),
                reason: "empty recipient list".into(),
            });
        }

        if to.iter().any(|dest| dest.share_id == from.share_id) {
            return Err(Error::SelfRouting {
                party: from.to_string(),
            });
        }

        to.iter()
            .map(|dest| {
                self.parties
                    .get(dest.index)
                    .filter(|p| p.id().share_id == dest.share_id)
                    .cloned()
                    .ok_or_else(|| Error::InvalidMessage {
                        party: from.to_string(),
                        reason: format!("unknown recipient {}", dest),
                    })
            })
            .collect()
    }

    /// Wait for every dispatched delivery to finish
    #[cfg(test)]
    pub(crate) async fn flush(&mut self) {
        while self.deliveries.join_next().await.is_some() {}
    }
}
