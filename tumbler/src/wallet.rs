//! Deterministic wallet derivation, electrum style.
//!
//! Per-sale addresses are derived from the master *public* key and a
//! 128-bit random index; the matching private keys are derived from the
//! master secret by the collector alone. Leaking one child private key
//! together with `(mpk, index)` compromises the master, which is why the
//! index is drawn from a CSRNG rather than a counter.

use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{All, PublicKey, Scalar, Secp256k1, SecretKey};
use bitcoin::{Address, Network, PublicKey as BitcoinPublicKey};
use conquer_once::Lazy;
use std::fmt;

pub(crate) static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

#[derive(Debug, thiserror::Error)]
pub enum DerivationError {
    #[error("master key is not a valid secp256k1 key")]
    BadKey,
    #[error("derived tweak is out of range for index {0}")]
    BadTweak(u128),
    #[error(transparent)]
    Secp(#[from] bitcoin::secp256k1::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MasterPublicKey(PublicKey);

impl MasterPublicKey {
    pub fn from_hex(hex_str: &str) -> Result<Self, DerivationError> {
        let bytes = hex::decode(hex_str).map_err(|_| DerivationError::BadKey)?;
        let key = PublicKey::from_slice(&bytes).map_err(|_| DerivationError::BadKey)?;

        Ok(Self(key))
    }

    /// The per-sale address for `index`: P2PKH over `mpk + tweak(index)·G`.
    pub fn derive_address(
        &self,
        index: u128,
        network: Network,
    ) -> Result<Address, DerivationError> {
        let tweak = index_tweak(&self.0, index)?;
        let child = self.0.add_exp_tweak(&SECP, &tweak)?;

        Ok(Address::p2pkh(
            &BitcoinPublicKey::new_uncompressed(child),
            network,
        ))
    }
}

impl fmt::Display for MasterPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0.serialize_uncompressed().as_ref()))
    }
}

#[derive(Clone)]
pub struct MasterPrivateKey(SecretKey);

impl MasterPrivateKey {
    pub fn from_hex(hex_str: &str) -> Result<Self, DerivationError> {
        let bytes = hex::decode(hex_str).map_err(|_| DerivationError::BadKey)?;
        let key = SecretKey::from_slice(&bytes).map_err(|_| DerivationError::BadKey)?;

        Ok(Self(key))
    }

    pub fn public(&self) -> MasterPublicKey {
        MasterPublicKey(PublicKey::from_secret_key(&SECP, &self.0))
    }

    /// The private key matching `public().derive_address(index, _)`.
    pub fn derive_child(&self, index: u128) -> Result<SecretKey, DerivationError> {
        let tweak = index_tweak(&self.public().0, index)?;

        Ok(self.0.add_tweak(&tweak)?)
    }
}

impl fmt::Debug for MasterPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterPrivateKey(..)")
    }
}

/// `SHA-256d("{index}:0:" ‖ uncompressed mpk)`, as a curve scalar.
fn index_tweak(mpk: &PublicKey, index: u128) -> Result<Scalar, DerivationError> {
    let mut preimage = format!("{}:0:", index).into_bytes();
    preimage.extend_from_slice(&mpk.serialize_uncompressed());

    let digest = sha256d::Hash::hash(&preimage);

    Scalar::from_be_bytes(digest.into_inner()).map_err(|_| DerivationError::BadTweak(index))
}
