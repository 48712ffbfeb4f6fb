//! Wallet records and the process-wide wallet registry

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use k256::ProjectivePoint;
use tracing::debug;

use crate::address;
use crate::{Error, KeyShare, Result};

/// A threshold wallet: the key shares produced by one keygen round
#[derive(Debug, Clone)]
pub struct Wallet {
    pub(crate) address: String,
    pub(crate) key_shares: Vec<KeyShare>,
    pub(crate) threshold: usize,
    pub(crate) participants: usize,
}

impl Wallet {
    /// Build a wallet, checking the record is internally consistent
    pub fn new(
        address: String,
        key_shares: Vec<KeyShare>,
        threshold: usize,
        participants: usize,
    ) -> Result<Self> {
        if threshold == 0 || threshold >= participants {
            return Err(Error::InvalidWalletRecord(format!(
                "threshold {} is invalid for {} participants",
                threshold, participants
            )));
        }
        if key_shares.len() != participants {
            return Err(Error::InvalidWalletRecord(format!(
                "{} key shares for {} participants",
                key_shares.len(),
                participants
            )));
        }

        let distinct: BTreeSet<_> = key_shares.iter().map(|s| s.share_id).collect();
        if distinct.len() != key_shares.len() {
            return Err(Error::InvalidWalletRecord("duplicate share ids".into()));
        }

        let public_key = &key_shares[0].public_key;
        for share in &key_shares {
            if share.public_key != *public_key {
                return Err(Error::InvalidWalletRecord(format!(
                    "share {} has a different public key",
                    share.share_id
                )));
            }
            if share.threshold != threshold || share.n_parties != participants {
                return Err(Error::InvalidWalletRecord(format!(
                    "share {} was generated for {}-of-{}",
                    share.share_id,
                    share.threshold + 1,
                    share.n_parties
                )));
            }
        }

        if address::from_public_key(public_key)? != address {
            return Err(Error::InvalidWalletRecord(format!(
                "address {} does not match the public key",
                address
            )));
        }

        Ok(Self {
            address,
            key_shares,
            threshold,
            participants,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Key shares in the wallet's participant order
    pub fn key_shares(&self) -> &[KeyShare] {
        &self.key_shares
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Aggregated public key (compressed)
    pub fn public_key(&self) -> Result<&[u8]> {
        self.key_shares
            .first()
            .map(|s| s.public_key.as_slice())
            .ok_or_else(|| Error::InvalidWalletRecord(format!("wallet {} has no shares", self.address)))
    }

    pub fn public_key_point(&self) -> Result<ProjectivePoint> {
        crate::curve::decode_point(self.public_key()?)
    }
}

/// Concurrent store of wallets keyed by address.
///
/// Wallets are inserted once and never updated or removed.
#[derive(Default)]
pub struct WalletRegistry {
    wallets: DashMap<String, Arc<Wallet>>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a wallet; an address that is already present is rejected
    pub fn put(&self, address: &str, wallet: Wallet) -> Result<Arc<Wallet>> {
        if wallet.address != address {
            return Err(Error::InvalidWalletRecord(format!(
                "record for {} stored under {}",
                wallet.address, address
            )));
        }

        match self.wallets.entry(address.to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicateWallet(address.to_string())),
            Entry::Vacant(vacant) => {
                let wallet = Arc::new(wallet);
                vacant.insert(wallet.clone());
                debug!(address, "Wallet stored");
                Ok(wallet)
            }
        }
    }

    pub fn get(&self, address: &str) -> Option<Arc<Wallet>> {
        self.wallets.get(address).map(|entry| entry.value().clone())
    }

    /// Every stored address, in no particular order
    pub fn list_addresses(&self) -> Vec<String> {
        self.wallets.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{curve, ShareId};
    use k256::{elliptic_curve::Field, Scalar};
    use rand::rngs::OsRng;
    use std::collections::BTreeMap;

    /// Trusted-dealer wallet for tests that do not need a keygen round
    pub(crate) fn dealt_wallet(participants: usize, threshold: usize) -> Wallet {
        let polynomial: Vec<Scalar> = (0..=threshold).map(|_| Scalar::random(&mut OsRng)).collect();
        let ids: Vec<ShareId> = (0..participants).map(|_| ShareId::random()).collect();

        let public_key = curve::encode_point(&(ProjectivePoint::GENERATOR * polynomial[0]));
        let secrets: Vec<Scalar> = ids
            .iter()
            .map(|id| curve::evaluate_polynomial(&polynomial, &id.to_scalar()))
            .collect();
        let public_shares: BTreeMap<ShareId, Vec<u8>> = ids
            .iter()
            .zip(&secrets)
            .map(|(id, x)| (*id, curve::encode_point(&(ProjectivePoint::GENERATOR * x))))
            .collect();

        let key_shares = ids
            .iter()
            .zip(&secrets)
            .map(|(id, x)| {
                KeyShare::new(*id, participants, threshold, x, public_key.clone(), public_shares.clone())
            })
            .collect();

        let address = address::from_public_key(&public_key).unwrap();
        Wallet::new(address, key_shares, threshold, participants).unwrap()
    }

    #[test]
    fn test_wallet_invariants() {
        let wallet = dealt_wallet(4, 2);
        let shares = wallet.key_shares().to_vec();
        let address = wallet.address().to_string();

        assert!(Wallet::new(address.clone(), shares.clone(), 2, 4).is_ok());
        assert!(matches!(
            Wallet::new(address.clone(), shares.clone(), 4, 4),
            Err(Error::InvalidWalletRecord(_))
        ));
        assert!(matches!(
            Wallet::new(address.clone(), shares[..3].to_vec(), 2, 4),
            Err(Error::InvalidWalletRecord(_))
        ));

        let mut duplicated = shares.clone();
        duplicated[1] = duplicated[0].clone();
        assert!(matches!(
            Wallet::new(address, duplicated, 2, 4),
            Err(Error::InvalidWalletRecord(_))
        ));

        assert!(matches!(
            Wallet::new("0x0000000000000000000000000000000000000000".into(), shares, 2, 4),
            Err(Error::InvalidWalletRecord(_))
        ));
    }

    #[test]
    fn test_registry_put_get_list() {
        let registry = WalletRegistry::new();
        assert!(registry.is_empty());

        let wallet = dealt_wallet(3, 1);
        let address = wallet.address().to_string();

        registry.put(&address, wallet.clone()).unwrap();
        assert_eq!(registry.get(&address).unwrap().address(), address);
        assert!(registry.get("0xmissing").is_none());
        assert_eq!(registry.list_addresses(), vec![address.clone()]);

        assert!(matches!(
            registry.put(&address, wallet.clone()),
            Err(Error::DuplicateWallet(_))
        ));
        assert!(matches!(
            registry.put("0xother", wallet),
            Err(Error::InvalidWalletRecord(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registry_concurrent_writers_and_readers() {
        let registry = Arc::new(WalletRegistry::new());
        let wallets: Vec<Wallet> = (0..8).map(|_| dealt_wallet(2, 1)).collect();

        let handles: Vec<_> = wallets
            .iter()
            .cloned()
            .map(|wallet| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let address = wallet.address().to_string();
                    registry.put(&address, wallet).unwrap();
                    registry.list_addresses();
                    registry.get(&address).is_some()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let mut listed = registry.list_addresses();
        listed.sort();
        let mut expected: Vec<String> = wallets.iter().map(|w| w.address().to_string()).collect();
        expected.sort();
        assert_eq!(listed, expected);
    }
}
