//! Signing quorum selection

use std::collections::BTreeSet;
use std::sync::Mutex;

use rand::{seq::index, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::wallet::Wallet;
use crate::{Error, KeyShare, PartyId, Result};

/// Signers chosen for one signing session
#[derive(Debug, Clone)]
pub struct Quorum {
    /// Signer identities sorted by share id; `index` is the position in this list
    pub parties: Vec<PartyId>,
    /// Key shares aligned with `parties`
    pub key_shares: Vec<KeyShare>,
}

/// Pick `threshold + 1` distinct shares from `wallet`.
///
/// Sampling is a partial shuffle over the wallet's distinct shares, so it
/// always terminates. Signers are sorted ascending by share id and each is
/// named after its 1-based position in the wallet.
pub fn select<R: Rng + ?Sized>(wallet: &Wallet, rng: &mut R) -> Result<Quorum> {
    let required = wallet.threshold + 1;

    // First occurrence of each share id
    let mut seen = BTreeSet::new();
    let candidates: Vec<usize> = wallet
        .key_shares
        .iter()
        .enumerate()
        .filter(|(_, share)| seen.insert(share.share_id))
        .map(|(position, _)| position)
        .collect();

    if candidates.len() < required {
        return Err(Error::QuorumSelection {
            required,
            available: candidates.len(),
        });
    }

    let mut chosen: Vec<usize> = index::sample(rng, candidates.len(), required)
        .into_iter()
        .map(|i| candidates[i])
        .collect();
    chosen.sort_by_key(|&position| wallet.key_shares[position].share_id);

    let parties = chosen
        .iter()
        .enumerate()
        .map(|(index, &position)| {
            PartyId::new(
                wallet.key_shares[position].share_id,
                (position + 1).to_string(),
                index,
            )
        })
        .collect();
    let key_shares = chosen
        .iter()
        .map(|&position| wallet.key_shares[position].clone())
        .collect();

    Ok(Quorum {
        parties,
        key_shares,
    })
}

/// Quorum selection with an owned, injectable source of randomness
pub struct QuorumSelector {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl QuorumSelector {
    pub fn new(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Reproducible selection for tests
    pub fn seeded(seed: u64) -> Self {
        Self::new(ChaCha20Rng::seed_from_u64(seed))
    }

    pub fn select(&self, wallet: &Wallet) -> Result<Quorum> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| Error::Internal("quorum rng lock poisoned".into()))?;
        select(wallet, &mut **rng)
    }
}

impl Default for QuorumSelector {
    fn default() -> Self {
        Self::new(ChaCha20Rng::from_entropy())
    }
}
