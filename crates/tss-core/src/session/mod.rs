//! Session orchestration
//!
//! A [`Session`] owns one protocol round: the party handles, the channels they
//! report on, the router and the completion tracker. [`SessionController`]
//! builds sessions for keygen and signing and commits their results.

mod controller;

pub use controller::SessionController;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::mpc::{CompletionTracker, Party, PartyChannels, Router};
use crate::{Error, Message, PartyId, Result, SessionKind, SessionSettings, SessionState};

/// One run-to-completion protocol round
pub struct Session<P: Party> {
    id: Uuid,
    kind: SessionKind,
    state: SessionState,
    settings: SessionSettings,
    parties: Arc<[Arc<P>]>,
    outgoing: mpsc::UnboundedReceiver<Message<P::Payload>>,
    terminal: mpsc::UnboundedReceiver<P::Output>,
    errors_tx: mpsc::UnboundedSender<Error>,
    errors: mpsc::UnboundedReceiver<Error>,
}

impl<P: Party> Session<P> {
    /// Build every party handle and the session's channels.
    ///
    /// `participants[i].index` must be `i`.
    pub fn build<F>(
        kind: SessionKind,
        participants: Vec<PartyId>,
        settings: &SessionSettings,
        mut make_party: F,
    ) -> Result<Self>
    where
        F: FnMut(PartyId, PartyChannels<P::Payload, P::Output>) -> Result<P>,
    {
        if participants.len() < 2 {
            return Err(Error::InvalidConfig(format!(
                "a {} session needs at least 2 parties, got {}",
                kind,
                participants.len()
            )));
        }
        if let Some((i, p)) = participants.iter().enumerate().find(|(i, p)| p.index != *i) {
            return Err(Error::InvalidConfig(format!("party {} listed at position {}", p, i)));
        }

        let (outgoing_tx, outgoing) = mpsc::unbounded_channel();
        let (terminal_tx, terminal) = mpsc::unbounded_channel();
        let (errors_tx, errors) = mpsc::unbounded_channel();
        let channels = PartyChannels::new(outgoing_tx, terminal_tx);

        let parties = participants
            .into_iter()
            .map(|id| make_party(id, channels.clone()).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        let session = Self {
            id: Uuid::new_v4(),
            kind,
            state: SessionState::Initializing,
            settings: settings.clone(),
            parties: parties.into(),
            outgoing,
            terminal,
            errors_tx,
            errors,
        };
        debug!(session_id = %session.id, kind = %kind, parties = session.parties.len(), "Session initialized");
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session_id = %self.id, from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    /// Start every party and drive the round until all of them report a
    /// terminal result, one of them fails, or the timeout expires.
    ///
    /// On failure every start call and outstanding delivery is aborted.
    #[instrument(skip(self), fields(session_id = %self.id, kind = %self.kind))]
    pub async fn run(mut self) -> Result<Vec<P::Output>> {
        let started = Instant::now();
        let kind = self.kind;
        let expected = self.parties.len();

        let mut workers = JoinSet::new();
        for party in self.parties.iter().cloned() {
            let errors = self.errors_tx.clone();
            workers.spawn(async move {
                if let Err(e) = party.start().await {
                    let _ = errors.send(e);
                }
            });
        }
        self.transition(SessionState::Running);

        let mut router = Router::new(self.parties.clone(), self.errors_tx.clone());
        let tracker = CompletionTracker::new(expected);
        let mut results = Vec::with_capacity(expected);

        let deadline = tokio::time::sleep(self.settings.timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            // The timer only fires when the loop goes idle
            if started.elapsed() >= self.settings.timeout {
                break Err(Error::SessionTimeout { kind, elapsed: started.elapsed() });
            }

            tokio::select! {
                biased;

                Some(err) = self.errors.recv() => break Err(err),

                Some(message) = self.outgoing.recv() => {
                    if let Err(e) = router.route(message) {
                        break Err(e);
                    }
                }

                Some(output) = self.terminal.recv() => {
                    results.push(output);
                    match tracker.record() {
                        Ok(true) => break Ok(()),
                        Ok(false) => debug!(finished = tracker.recorded(), expected, "Party finished"),
                        Err(e) => break Err(e),
                    }
                }

                _ = &mut deadline => {
                    break Err(Error::SessionTimeout { kind, elapsed: started.elapsed() });
                }
            }
        };

        // Nothing a party does from here on can affect the result
        router.shutdown();
        workers.abort_all();

        match outcome {
            Ok(()) => {
                self.transition(SessionState::Completed);
                info!(parties = expected, elapsed = ?started.elapsed(), "Session completed");
                Ok(results)
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                warn!(
                    error = %e,
                    finished = tracker.recorded(),
                    expected,
                    elapsed = ?started.elapsed(),
                    "Session failed, round aborted"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::async_trait;
    use crate::ShareId;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Behaviour {
        /// Broadcast once, finish after hearing from everyone else
        Gossip,
        FailStart,
        MessageSelf,
        Silent,
    }

    struct TestParty {
        id: PartyId,
        n_parties: usize,
        behaviour: Behaviour,
        heard: std::sync::Mutex<usize>,
        channels: PartyChannels<usize, usize>,
    }

    #[async_trait]
    impl Party for TestParty {
        type Payload = usize;
        type Output = usize;

        fn id(&self) -> &PartyId {
            &self.id
        }

        async fn start(&self) -> Result<()> {
            match self.behaviour {
                Behaviour::Gossip => self.channels.send(Message::broadcast(self.id.clone(), self.id.index)),
                Behaviour::FailStart => Err(Error::protocol(&self.id, "refusing to start")),
                Behaviour::MessageSelf => self.channels.send(Message::direct(
                    self.id.clone(),
                    self.id.clone(),
                    self.id.index,
                )),
                Behaviour::Silent => Ok(()),
            }
        }

        async fn consume(&self, _message: &Message<usize>) -> Result<()> {
            let done = {
                let mut heard = self.heard.lock().unwrap();
                *heard += 1;
                *heard == self.n_parties - 1
            };
            if done {
                self.channels.finish(self.id.index)?;
            }
            Ok(())
        }
    }

    fn ids(n: usize) -> Vec<PartyId> {
        (0..n)
            .map(|i| PartyId::new(ShareId::from_u64(i as u64 + 1), (i + 1).to_string(), i))
            .collect()
    }

    fn session(n: usize, timeout: Duration, behaviour: impl Fn(usize) -> Behaviour) -> Session<TestParty> {
        let settings = SessionSettings::default().with_timeout(timeout);
        Session::build(SessionKind::Keygen, ids(n), &settings, |id, channels| {
            Ok(TestParty {
                behaviour: behaviour(id.index),
                id,
                n_parties: n,
                heard: std::sync::Mutex::new(0),
                channels,
            })
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_all_parties_finish() {
        let session = session(4, Duration::from_secs(5), |_| Behaviour::Gossip);
        assert_eq!(session.state(), SessionState::Initializing);

        let mut outputs = session.run().await.unwrap();
        outputs.sort();
        assert_eq!(outputs, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_start_failure_fails_session() {
        let session = session(3, Duration::from_secs(5), |i| {
            if i == 1 {
                Behaviour::FailStart
            } else {
                Behaviour::Gossip
            }
        });

        let result = session.run().await;
        assert!(matches!(result, Err(Error::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_self_addressed_message_fails_session() {
        let session = session(3, Duration::from_secs(5), |i| {
            if i == 2 {
                Behaviour::MessageSelf
            } else {
                Behaviour::Gossip
            }
        });

        let result = session.run().await;
        assert!(matches!(result, Err(Error::SelfRouting { .. })));
    }

    #[tokio::test]
    async fn test_stalled_session_times_out() {
        let session = session(3, Duration::from_millis(100), |_| Behaviour::Silent);

        let result = session.run().await;
        assert!(matches!(
            result,
            Err(Error::SessionTimeout { kind: SessionKind::Keygen, .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_timeout_fails_busy_session() {
        let session = session(4, Duration::ZERO, |_| Behaviour::Gossip);

        let result = session.run().await;
        assert!(matches!(result, Err(Error::SessionTimeout { .. })));
    }

    #[test]
    fn test_build_validates_participants() {
        let settings = SessionSettings::default();
        let make = |id: PartyId, channels: PartyChannels<usize, usize>| -> Result<TestParty> {
            Ok(TestParty {
                id,
                n_parties: 2,
                behaviour: Behaviour::Silent,
                heard: std::sync::Mutex::new(0),
                channels,
            })
        };

        let single = Session::build(SessionKind::Signing, ids(1), &settings, make);
        assert!(matches!(single, Err(Error::InvalidConfig(_))));

        let mut shuffled = ids(3);
        shuffled.swap(0, 2);
        let misordered = Session::build(SessionKind::Signing, shuffled, &settings, make);
        assert!(matches!(misordered, Err(Error::InvalidConfig(_))));

        let failing = Session::<TestParty>::build(SessionKind::Signing, ids(2), &settings, |id, _| {
            Err(Error::InvalidConfig(format!("cannot build {}", id)))
        });
        assert!(matches!(failing, Err(Error::InvalidConfig(_))));
    }
}
