//! DSG protocol implementation

use std::collections::BTreeMap;

use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{DsgPartialMessage, DsgRound1Message, DsgRound2Message, SigningMessage};
use crate::curve;
use crate::mpc::{async_trait, Party, PartyChannels};
use crate::{Error, KeyShare, Message, PartyId, Result, ShareId, Signature};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Round {
    NotStarted,
    /// Waiting for every nonce commitment
    Commit,
    /// Waiting for every nonce reveal
    Reveal,
    /// Waiting for every partial signature
    Respond,
    Done,
}

struct DsgState {
    round: Round,
    nonce: Scalar,
    commitments: BTreeMap<ShareId, [u8; 32]>,
    nonce_points: BTreeMap<ShareId, ProjectivePoint>,
    partials: BTreeMap<ShareId, Scalar>,
    /// Aggregate nonce R and challenge e, fixed once all reveals are in
    aggregate: Option<(ProjectivePoint, Scalar)>,
}

/// One signer of a signing session
pub struct SigningParty {
    id: PartyId,
    key_share: KeyShare,
    quorum: Vec<PartyId>,
    digest: [u8; 32],
    public_key: ProjectivePoint,
    channels: PartyChannels<SigningMessage, Signature>,
    state: Mutex<DsgState>,
}

impl SigningParty {
    /// Create a signer holding `key_share` for a quorum of `threshold + 1`
    pub fn new(
        id: PartyId,
        key_share: KeyShare,
        quorum: Vec<PartyId>,
        digest: [u8; 32],
        channels: PartyChannels<SigningMessage, Signature>,
    ) -> Result<Self> {
        if quorum.len() != key_share.threshold + 1 {
            return Err(Error::InvalidConfig(format!(
                "quorum of {} signers, threshold requires {}",
                quorum.len(),
                key_share.threshold + 1
            )));
        }
        if id.share_id != key_share.share_id {
            return Err(Error::InvalidConfig(format!(
                "party {} does not hold share {}",
                id, key_share.share_id
            )));
        }
        if !quorum.contains(&id) {
            return Err(Error::InvalidConfig(format!("party {} is not in the quorum", id)));
        }
        for member in &quorum {
            if !key_share.public_shares.contains_key(&member.share_id) {
                return Err(Error::InvalidConfig(format!(
                    "quorum member {} is not a wallet participant",
                    member
                )));
            }
        }

        let public_key = key_share.public_key_point()?;

        Ok(Self {
            id,
            key_share,
            quorum,
            digest,
            public_key,
            channels,
            state: Mutex::new(DsgState {
                round: Round::NotStarted,
                nonce: Scalar::ZERO,
                commitments: BTreeMap::new(),
                nonce_points: BTreeMap::new(),
                partials: BTreeMap::new(),
                aggregate: None,
            }),
        })
    }

    fn quorum_size(&self) -> usize {
        self.quorum.len()
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::protocol(&self.id, reason)
    }

    fn sender(&self, from: &PartyId) -> Result<ShareId> {
        if from.share_id == self.id.share_id {
            return Err(self.error("received own message"));
        }
        if !self.quorum.iter().any(|p| p.share_id == from.share_id) {
            return Err(self.error(format!("message from non-signer {}", from)));
        }
        Ok(from.share_id)
    }

    /// Lagrange coefficient of `share_id` over the quorum
    fn lagrange(&self, share_id: &ShareId) -> Result<Scalar> {
        let xs: Vec<Scalar> = self.quorum.iter().map(|p| p.share_id.to_scalar()).collect();
        curve::lagrange_at_zero(&share_id.to_scalar(), &xs)
            .ok_or_else(|| self.error("duplicate share ids in quorum"))
    }

    fn advance(&self, state: &mut DsgState) -> Result<()> {
        if state.round == Round::Commit && state.commitments.len() == self.quorum_size() {
            debug!(party = %self.id, "DSG Round 2: Nonce reveal");

            let nonce_point = ProjectivePoint::GENERATOR * state.nonce;
            state.nonce_points.insert(self.id.share_id, nonce_point);
            state.round = Round::Reveal;

            let message = SigningMessage::Reveal(DsgRound2Message {
                nonce_point: curve::encode_point(&nonce_point),
            });
            self.channels.send(Message::broadcast(self.id.clone(), message))?;
        }

        if state.round == Round::Reveal && state.nonce_points.len() == self.quorum_size() {
            debug!(party = %self.id, "DSG Round 3: Partial signature");

            let mut r_point = ProjectivePoint::IDENTITY;
            for (from, point) in &state.nonce_points {
                let committed = state
                    .commitments
                    .get(from)
                    .ok_or_else(|| self.error(format!("missing nonce commitment from {}", from)))?;
                if curve::commit_point(point) != *committed {
                    return Err(self.error(format!("nonce from {} does not match commitment", from)));
                }
                r_point += point;
            }
            if r_point == ProjectivePoint::IDENTITY {
                return Err(self.error("aggregate nonce is the identity"));
            }

            let e = curve::challenge(&r_point, &self.public_key, &self.digest);
            let lambda = self.lagrange(&self.id.share_id)?;

            // s_i = k_i + e * lambda_i * x_i
            let sigma_share = state.nonce + e * lambda * self.key_share.secret_scalar();
            state.nonce = Scalar::ZERO;
            state.partials.insert(self.id.share_id, sigma_share);
            state.aggregate = Some((r_point, e));
            state.round = Round::Respond;

            let message = SigningMessage::Partial(DsgPartialMessage {
                sigma_share: curve::scalar_to_bytes(&sigma_share).to_vec(),
            });
            self.channels.send(Message::broadcast(self.id.clone(), message))?;
        }

        if state.round == Round::Respond && state.partials.len() == self.quorum_size() {
            let signature = self.combine(state)?;
            state.round = Round::Done;

            info!(
                party = %self.id,
                signature = signature.to_hex(),
                "DSG completed successfully"
            );
            self.channels.finish(signature)?;
        }

        Ok(())
    }

    /// Verify every partial signature and combine them
    fn combine(&self, state: &DsgState) -> Result<Signature> {
        let (r_point, e) = state
            .aggregate
            .ok_or_else(|| self.error("partials combined before nonces were aggregated"))?;

        let mut s = Scalar::ZERO;
        for (from, sigma) in &state.partials {
            let nonce_point = state
                .nonce_points
                .get(from)
                .ok_or_else(|| self.error(format!("missing nonce from {}", from)))?;
            let public_share = self.key_share.public_share_point(from)?;
            let lambda = self.lagrange(from)?;

            // s_j·G == R_j + e·λ_j·X_j
            if ProjectivePoint::GENERATOR * sigma != *nonce_point + public_share * (e * lambda) {
                return Err(self.error(format!("partial signature from {} is invalid", from)));
            }
            s += sigma;
        }

        let signature = Signature::new(&r_point, &s);
        signature
            .verify(&self.public_key, &self.digest)
            .map_err(|e| self.error(e.to_string()))?;

        Ok(signature)
    }
}

#[async_trait]
impl Party for SigningParty {
    type Payload = SigningMessage;
    type Output = Signature;

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
            signers = self.quorum_size(),
            digest = hex::encode(self.digest),
            "Starting DSG"
        );

        // Round 1: Generate random k_i and broadcast commitment
        debug!(party = %self.id, "DSG Round 1: Commitment");
        let nonce = Scalar::random(&mut OsRng);
        let nonce_commitment = curve::commit_point(&(ProjectivePoint::GENERATOR * nonce));

        state.nonce = nonce;
        state.commitments.insert(self.id.share_id, nonce_commitment);
        state.round = Round::Commit;

        let message = SigningMessage::Commitment(DsgRound1Message { nonce_commitment });
        self.channels.send(Message::broadcast(self.id.clone(), message))?;
        self.advance(&mut state)
    }

    async fn consume(&self, message: &Message<SigningMessage>) -> Result<()> {
        let from = self.sender(&message.from)?;
        let mut state = self.state.lock().await;

        if state.round == Round::Done {
            return Err(self.error(format!("message from {} after completion", message.from)));
        }

        match &message.payload {
            SigningMessage::Commitment(round1) => {
                if state.commitments.contains_key(&from) {
                    return Err(self.error(format!("duplicate commitment from {}", message.from)));
                }
                state.commitments.insert(from, round1.nonce_commitment);
            }
            SigningMessage::Reveal(round2) => {
                if state.nonce_points.contains_key(&from) {
                    return Err(self.error(format!("duplicate nonce from {}", message.from)));
                }
                let point = curve::decode_point(&round2.nonce_point)
                    .map_err(|e| self.error(format!("bad nonce from {}: {}", message.from, e)))?;
                state.nonce_points.insert(from, point);
            }
            SigningMessage::Partial(partial) => {
                if state.partials.contains_key(&from) {
                    return Err(self.error(format!("duplicate partial from {}", message.from)));
                }
                let sigma = curve::scalar_from_slice(&partial.sigma_share)
                    .ok_or_else(|| self.error("Invalid sigma_share length"))?;
                state.partials.insert(from, sigma);
            }
        }

        self.advance(&mut state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::tests::dealt_wallet;
    use tokio::sync::mpsc;

    fn deal(n: usize, threshold: usize) -> (Vec<PartyId>, Vec<KeyShare>) {
        let shares = dealt_wallet(n, threshold).key_shares().to_vec();
        let ids = shares
            .iter()
            .enumerate()
            .map(|(i, s)| PartyId::new(s.share_id, (i + 1).to_string(), i))
            .collect();
        (ids, shares)
    }

    struct Harness {
        parties: Vec<SigningParty>,
        out_rx: mpsc::UnboundedReceiver<Message<SigningMessage>>,
        end_rx: mpsc::UnboundedReceiver<Signature>,
    }

    fn harness(quorum: Vec<PartyId>, shares: Vec<KeyShare>, digest: [u8; 32]) -> Harness {
        let (out, out_rx) = mpsc::unbounded_channel();
        let (end, end_rx) = mpsc::unbounded_channel();
        let channels = PartyChannels::new(out, end);

        let parties = quorum
            .iter()
            .zip(shares)
            .map(|(id, share)| SigningParty::new(id.clone(), share, quorum.clone(), digest, channels.clone()).unwrap())
            .collect();

        Harness { parties, out_rx, end_rx }
    }

    /// Deliver messages in FIFO order until the stream runs dry
    async fn pump(h: &mut Harness, tamper: impl Fn(&mut Message<SigningMessage>)) -> Result<()> {
        while let Ok(mut message) = h.out_rx.try_recv() {
            tamper(&mut message);
            for party in h.parties.iter().filter(|p| p.id().share_id != message.from.share_id) {
                party.consume(&message).await?;
            }
        }
        Ok(())
    }

    fn reindex(quorum: &[PartyId]) -> Vec<PartyId> {
        quorum
            .iter()
            .enumerate()
            .map(|(i, p)| PartyId::new(p.share_id, p.moniker.clone(), i))
            .collect()
    }

    #[tokio::test]
    async fn test_quorum_produces_valid_signature() {
        let (ids, shares) = deal(4, 2);
        let digest = [42u8; 32];

        // Signers 1, 3 and 4
        let quorum = reindex(&[ids[0].clone(), ids[2].clone(), ids[3].clone()]);
        let signer_shares = vec![shares[0].clone(), shares[2].clone(), shares[3].clone()];
        let public_key = shares[0].public_key_point().unwrap();

        let mut h = harness(quorum, signer_shares, digest);
        for party in &h.parties {
            party.start().await.unwrap();
        }
        pump(&mut h, |_| {}).await.unwrap();

        let mut signatures = Vec::new();
        while let Ok(signature) = h.end_rx.try_recv() {
            signatures.push(signature);
        }

        assert_eq!(signatures.len(), 3);
        assert!(signatures.iter().all(|s| *s == signatures[0]));
        signatures[0].verify(&public_key, &digest).unwrap();
    }

    #[tokio::test]
    async fn test_tampered_partial_is_rejected() {
        let (ids, shares) = deal(3, 1);
        let quorum = reindex(&ids[..2]);
        let mut h = harness(quorum.clone(), shares[..2].to_vec(), [1u8; 32]);

        for party in &h.parties {
            party.start().await.unwrap();
        }

        let victim = quorum[0].share_id;
        let result = pump(&mut h, |message| {
            if message.from.share_id != victim {
                if let SigningMessage::Partial(partial) = &mut message.payload {
                    partial.sigma_share = curve::scalar_to_bytes(&Scalar::ONE).to_vec();
                }
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_reveal_must_match_commitment() {
        let (ids, shares) = deal(3, 1);
        let quorum = reindex(&ids[1..]);
        let mut h = harness(quorum, shares[1..].to_vec(), [2u8; 32]);

        for party in &h.parties {
            party.start().await.unwrap();
        }

        let result = pump(&mut h, |message| {
            if let SigningMessage::Reveal(reveal) = &mut message.payload {
                reveal.nonce_point = curve::encode_point(&ProjectivePoint::GENERATOR);
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Protocol { .. })));
    }

    #[test]
    fn test_rejects_wrong_quorum_size() {
        let (ids, shares) = deal(4, 2);
        let (out, _) = mpsc::unbounded_channel();
        let (end, _) = mpsc::unbounded_channel();
        let quorum = reindex(&ids[..2]);

        let result = SigningParty::new(quorum[0].clone(), shares[0].clone(), quorum, [0u8; 32], PartyChannels::new(out, end));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
