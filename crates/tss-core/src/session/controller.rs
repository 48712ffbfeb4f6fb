//! Keygen and signing entry points

use std::collections::BTreeSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use super::Session;
use crate::keygen::KeygenParty;
use crate::sign::{Quorum, QuorumSelector, SigningParty};
use crate::wallet::{Wallet, WalletRegistry};
use crate::{
    address, Error, PartyId, Result, SessionKind, SessionSettings, ShareId, Signature,
    MAX_PARTICIPANTS,
};

/// Runs keygen and signing rounds against a wallet registry
pub struct SessionController {
    registry: Arc<WalletRegistry>,
    selector: QuorumSelector,
    settings: SessionSettings,
}

impl SessionController {
    pub fn new(registry: Arc<WalletRegistry>, settings: SessionSettings) -> Self {
        Self {
            registry,
            selector: QuorumSelector::default(),
            settings,
        }
    }

    /// Replace the quorum selector (e.g. a seeded one in tests)
    pub fn with_selector(mut self, selector: QuorumSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn registry(&self) -> &Arc<WalletRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Run distributed key generation and store the resulting wallet.
    ///
    /// Returns the new wallet's address. Nothing is stored unless every
    /// participant completes and they agree on the public key.
    #[instrument(skip(self))]
    pub async fn run_keygen(&self, participants: usize, threshold: usize) -> Result<String> {
        if !(2..=MAX_PARTICIPANTS).contains(&participants) {
            return Err(Error::InvalidConfig(format!(
                "participants must be in 2..={}, got {}",
                MAX_PARTICIPANTS, participants
            )));
        }
        if threshold == 0 || threshold >= participants {
            return Err(Error::InvalidConfig(format!(
                "threshold must be in 1..{}, got {}",
                participants, threshold
            )));
        }

        let ids = keygen_party_ids(participants);
        let shared: Arc<[PartyId]> = ids.clone().into();
        let session = Session::build(SessionKind::Keygen, ids, &self.settings, |id, channels| {
            KeygenParty::new(id, shared.clone(), threshold, channels)
        })?;
        let session_id = session.id();

        let mut key_shares = session.run().await?;
        key_shares.sort_by_key(|share| share.share_id);

        let public_key = key_shares
            .first()
            .map(|share| share.public_key.clone())
            .ok_or_else(|| Error::Internal("keygen produced no key shares".into()))?;
        if let Some(share) = key_shares.iter().find(|share| share.public_key != public_key) {
            return Err(Error::protocol(
                share.share_id,
                "parties disagree on the aggregated public key",
            ));
        }

        let address = address::from_public_key(&public_key)?;
        let wallet = Wallet::new(address.clone(), key_shares, threshold, participants)?;
        self.registry.put(&address, wallet)?;

        info!(
            %session_id,
            address = %address,
            participants,
            threshold,
            public_key = hex::encode(&public_key),
            "Wallet created"
        );

        Ok(address)
    }

    /// Sign the SHA-256 digest of `message` with a quorum of the wallet's shares
    #[instrument(skip(self, message), fields(message_len = message.len()))]
    pub async fn run_signing(&self, address: &str, message: &[u8]) -> Result<Signature> {
        let wallet = self
            .registry
            .get(address)
            .ok_or_else(|| Error::WalletNotFound(address.to_string()))?;

        let digest: [u8; 32] = Sha256::digest(message).into();
        let Quorum { parties, key_shares } = self.selector.select(&wallet)?;

        info!(
            address,
            signers = ?parties.iter().map(|p| p.moniker.as_str()).collect::<Vec<_>>(),
            "Quorum selected"
        );

        let session = Session::build(SessionKind::Signing, parties.clone(), &self.settings, |id, channels| {
            let key_share = key_shares
                .get(id.index)
                .cloned()
                .ok_or_else(|| Error::Internal(format!("no key share for signer {}", id)))?;
            SigningParty::new(id, key_share, parties.clone(), digest, channels)
        })?;
        let session_id = session.id();

        let signatures = session.run().await?;
        let signature = signatures
            .first()
            .cloned()
            .ok_or_else(|| Error::Internal("signing produced no signature".into()))?;
        if signatures.iter().any(|s| *s != signature) {
            return Err(Error::protocol("quorum", "signers disagree on the signature"));
        }
        signature.verify(&wallet.public_key_point()?, &digest)?;

        info!(%session_id, address, signature = signature.to_hex(), "Data signed");

        Ok(signature)
    }

    /// Addresses of every stored wallet
    pub fn list_addresses(&self) -> Vec<String> {
        self.registry.list_addresses()
    }
}

/// Fresh distinct share ids, sorted ascending, with 1-based monikers
fn keygen_party_ids(participants: usize) -> Vec<PartyId> {
    let mut share_ids = BTreeSet::new();
    while share_ids.len() < participants {
        share_ids.insert(ShareId::random());
    }

    share_ids
        .into_iter()
        .enumerate()
        .map(|(index, share_id)| PartyId::new(share_id, (index + 1).to_string(), index))
        .collect()
}
