//! DKG protocol implementation

use std::collections::BTreeMap;
use std::sync::Arc;

use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{DkgRound1Message, DkgRound2Message, KeygenMessage};
use crate::curve;
use crate::mpc::{async_trait, Party, PartyChannels};
use crate::{Error, KeyShare, Message, PartyId, Result, ShareId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Round {
    NotStarted,
    /// Waiting for every participant's commitments
    Commitments,
    /// Shares sent, waiting for every participant's share
    Shares,
    Done,
}

struct DkgState {
    round: Round,
    /// Secret polynomial, degree `threshold`
    polynomial: Vec<Scalar>,
    commitments: BTreeMap<ShareId, Vec<ProjectivePoint>>,
    shares: BTreeMap<ShareId, Scalar>,
}

/// One participant of a keygen session
pub struct KeygenParty {
    id: PartyId,
    participants: Arc<[PartyId]>,
    threshold: usize,
    channels: PartyChannels<KeygenMessage, KeyShare>,
    state: Mutex<DkgState>,
}

impl KeygenParty {
    /// Create a party for `participants` (which must contain `id`).
    ///
    /// Every party of a session shares the same participant list.
    pub fn new(
        id: PartyId,
        participants: Arc<[PartyId]>,
        threshold: usize,
        channels: PartyChannels<KeygenMessage, KeyShare>,
    ) -> Result<Self> {
        if !participants.contains(&id) {
            return Err(Error::InvalidConfig(format!("party {} is not a participant", id)));
        }
        if threshold == 0 || threshold >= participants.len() {
            return Err(Error::InvalidConfig(format!(
                "threshold {} is invalid for {} parties",
                threshold,
                participants.len()
            )));
        }

        Ok(Self {
            id,
            participants,
            threshold,
            channels,
            state: Mutex::new(DkgState {
                round: Round::NotStarted,
                polynomial: Vec::new(),
                commitments: BTreeMap::new(),
                shares: BTreeMap::new(),
            }),
        })
    }

    fn n_parties(&self) -> usize {
        self.participants.len()
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::protocol(&self.id, reason)
    }

    /// Check the sender belongs to this session and is not us
    fn sender(&self, from: &PartyId) -> Result<ShareId> {
        if from.share_id == self.id.share_id {
            return Err(self.error("received own message"));
        }
        if !self.participants.iter().any(|p| p.share_id == from.share_id) {
            return Err(self.error(format!("message from unknown party {}", from)));
        }
        Ok(from.share_id)
    }

    /// Progress through as many rounds as the buffered messages allow
    fn advance(&self, state: &mut DkgState) -> Result<()> {
        if state.round == Round::Commitments && state.commitments.len() == self.n_parties() {
            debug!(party = %self.id, "DKG Round 2: Secret sharing");

            for peer in self.participants.iter().filter(|p| **p != self.id) {
                let share = curve::evaluate_polynomial(&state.polynomial, &peer.share_id.to_scalar());
                let message = KeygenMessage::Share(DkgRound2Message {
                    share: curve::scalar_to_bytes(&share).to_vec(),
                });
                self.channels
                    .send(Message::direct(self.id.clone(), peer.clone(), message))?;
            }
            state.round = Round::Shares;
        }

        if state.round == Round::Shares && state.shares.len() == self.n_parties() {
            debug!(party = %self.id, "DKG Round 3: Verification");

            let key_share = self.finalize(state)?;
            state.round = Round::Done;
            state.polynomial.clear();

            info!(
                party = %self.id,
                public_key = hex::encode(&key_share.public_key),
                "DKG completed successfully"
            );
            self.channels.finish(key_share)?;
        }

        Ok(())
    }

    /// Verify received shares and compute this party's key share
    fn finalize(&self, state: &DkgState) -> Result<KeyShare> {
        let my_x = self.id.share_id.to_scalar();

        for (from, share) in &state.shares {
            let commitments = state
                .commitments
                .get(from)
                .ok_or_else(|| self.error(format!("missing commitments from {}", from)))?;

            let expected = ProjectivePoint::GENERATOR * share;
            if expected != curve::evaluate_commitments(commitments, &my_x) {
                return Err(self.error(format!(
                    "share from party {} does not match commitment",
                    from
                )));
            }
        }

        let secret_share = state.shares.values().fold(Scalar::ZERO, |acc, s| acc + s);

        // Coefficient-wise sum of all commitments commits to the joint polynomial
        let mut joint = vec![ProjectivePoint::IDENTITY; self.threshold + 1];
        for commitments in state.commitments.values() {
            for (acc, c) in joint.iter_mut().zip(commitments) {
                *acc += c;
            }
        }

        let public_key = joint[0];
        if public_key == ProjectivePoint::IDENTITY {
            return Err(self.error("aggregated public key is the identity"));
        }

        let public_shares: BTreeMap<ShareId, Vec<u8>> = self
            .participants
            .iter()
            .map(|p| {
                let point = curve::evaluate_commitments(&joint, &p.share_id.to_scalar());
                (p.share_id, curve::encode_point(&point))
            })
            .collect();

        Ok(KeyShare::new(
            self.id.share_id,
            self.n_parties(),
            self.threshold,
            &secret_share,
            curve::encode_point(&public_key),
            public_shares,
        ))
    }
}

#[async_trait]
impl Party for KeygenParty {
    type Payload = KeygenMessage;
    type Output = KeyShare;

    fn id(&self) -> &PartyId {
        &self.id
    }

    async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.round != Round::NotStarted {
            return Err(self.error("already started"));
        }

        info!(
            party = %self.id,
            n_parties = self.n_parties(),
            threshold = self.threshold,
            "Starting DKG"
        );

        // Round 1: Generate and commit to secret polynomial
        debug!(party = %self.id, "DKG Round 1: Commitment");
        let polynomial = generate_secret_polynomial(self.threshold);
        let commitments: Vec<ProjectivePoint> = polynomial
            .iter()
            .map(|coef| ProjectivePoint::GENERATOR * coef)
            .collect();

        let own_share = curve::evaluate_polynomial(&polynomial, &self.id.share_id.to_scalar());
        let message = KeygenMessage::Commitment(DkgRound1Message {
            commitments: commitments.iter().map(curve::encode_point).collect(),
        });

        state.commitments.insert(self.id.share_id, commitments);
        state.shares.insert(self.id.share_id, own_share);
        state.polynomial = polynomial;
        state.round = Round::Commitments;

        self.channels.send(Message::broadcast(self.id.clone(), message))?;
        self.advance(&mut state)
    }

    async fn consume(&self, message: &Message<KeygenMessage>) -> Result<()> {
        let from = self.sender(&message.from)?;
        let mut state = self.state.lock().await;

        if state.round == Round::Done {
            return Err(self.error(format!("message from {} after completion", message.from)));
        }

        match &message.payload {
            KeygenMessage::Commitment(round1) => {
                if round1.commitments.len() != self.threshold + 1 {
                    return Err(self.error(format!(
                        "party {} committed to {} coefficients, expected {}",
                        message.from,
                        round1.commitments.len(),
                        self.threshold + 1
                    )));
                }
                if state.commitments.contains_key(&from) {
                    return Err(self.error(format!("duplicate commitment from {}", message.from)));
                }

                let points = round1
                    .commitments
                    .iter()
                    .map(|bytes| curve::decode_point(bytes))
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| self.error(format!("bad commitment from {}: {}", message.from, e)))?;
                state.commitments.insert(from, points);
            }
            KeygenMessage::Share(round2) => {
                if message.is_broadcast() {
                    return Err(self.error(format!("share from {} was broadcast", message.from)));
                }
                if state.shares.contains_key(&from) {
                    return Err(self.error(format!("duplicate share from {}", message.from)));
                }

                let share = curve::scalar_from_slice(&round2.share)
                    .ok_or_else(|| self.error("Invalid share length"))?;
                state.shares.insert(from, share);
            }
        }

        self.advance(&mut state)
    }
}

/// Generate a random secret polynomial of degree `threshold`
fn generate_secret_polynomial(threshold: usize) -> Vec<Scalar> {
    let mut rng = OsRng;
    (0..=threshold).map(|_| Scalar::random(&mut rng)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn participants(n: usize) -> Vec<PartyId> {
        (0..n)
            .map(|i| PartyId::new(ShareId::from_u64(10 + i as u64), (i + 1).to_string(), i))
            .collect()
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let ids = participants(3);
        let (out, _) = mpsc::unbounded_channel();
        let (end, _) = mpsc::unbounded_channel();
        let channels = PartyChannels::new(out, end);

        assert!(KeygenParty::new(ids[0].clone(), ids.clone().into(), 3, channels.clone()).is_err());
        assert!(KeygenParty::new(ids[0].clone(), ids.clone().into(), 0, channels.clone()).is_err());
        assert!(KeygenParty::new(ids[0].clone(), ids.into(), 2, channels).is_ok());
    }

    #[tokio::test]
    async fn test_start_broadcasts_commitments() {
        let ids = participants(3);
        let (out, mut out_rx) = mpsc::unbounded_channel();
        let (end, _end_rx) = mpsc::unbounded_channel();
        let party = KeygenParty::new(ids[0].clone(), ids.into(), 2, PartyChannels::new(out, end)).unwrap();

        party.start().await.unwrap();

        let message = out_rx.recv().await.unwrap();
        assert!(message.is_broadcast());
        match message.payload {
            KeygenMessage::Commitment(m) => assert_eq!(m.commitments.len(), 3),
            other => panic!("unexpected payload {:?}", other),
        }
        assert!(party.start().await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_malformed_and_duplicate_commitments() {
        let ids = participants(3);
        let (out, _out_rx) = mpsc::unbounded_channel();
        let (end, _end_rx) = mpsc::unbounded_channel();
        let party = KeygenParty::new(ids[0].clone(), ids.clone().into(), 1, PartyChannels::new(out, end)).unwrap();

        let short = Message::broadcast(
            ids[1].clone(),
            KeygenMessage::Commitment(DkgRound1Message {
                commitments: vec![curve::encode_point(&ProjectivePoint::GENERATOR)],
            }),
        );
        assert!(matches!(party.consume(&short).await, Err(Error::Protocol { .. })));

        let good = Message::broadcast(
            ids[1].clone(),
            KeygenMessage::Commitment(DkgRound1Message {
                commitments: vec![curve::encode_point(&ProjectivePoint::GENERATOR); 2],
            }),
        );
        party.consume(&good).await.unwrap();
        assert!(matches!(party.consume(&good).await, Err(Error::Protocol { .. })));

        let stranger = PartyId::new(ShareId::from_u64(1), "x", 5);
        let foreign = Message::broadcast(stranger, good.payload.clone());
        assert!(matches!(party.consume(&foreign).await, Err(Error::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_bad_share_fails_verification() {
        let ids = participants(2);
        let (out, mut out_rx) = mpsc::unbounded_channel();
        let (end, mut end_rx) = mpsc::unbounded_channel();
        let party = KeygenParty::new(ids[0].clone(), ids.clone().into(), 1, PartyChannels::new(out, end)).unwrap();

        party.start().await.unwrap();
        let _ = out_rx.recv().await;

        // Peer commits to f(x) = 1 + x but sends a share that is off by one
        let commitments = vec![
            curve::encode_point(&ProjectivePoint::GENERATOR),
            curve::encode_point(&ProjectivePoint::GENERATOR),
        ];
        party
            .consume(&Message::broadcast(
                ids[1].clone(),
                KeygenMessage::Commitment(DkgRound1Message { commitments }),
            ))
            .await
            .unwrap();

        // Our share to the peer goes out once all commitments are in
        let outgoing = out_rx.recv().await.unwrap();
        assert_eq!(outgoing.to, Some(vec![ids[1].clone()]));

        let wrong = Scalar::ONE + ids[0].share_id.to_scalar() + Scalar::ONE;
        let result = party
            .consume(&Message::direct(
                ids[1].clone(),
                ids[0].clone(),
                KeygenMessage::Share(DkgRound2Message {
                    share: curve::scalar_to_bytes(&wrong).to_vec(),
                }),
            ))
            .await;

        assert!(matches!(result, Err(Error::Protocol { .. })));
        assert!(end_rx.try_recv().is_err());
    }
}
