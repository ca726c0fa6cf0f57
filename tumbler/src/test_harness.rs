//! Shared fixtures for the unit tests.
//!
//! RSA key generation is by far the slowest thing the tests do, so the
//! protocol keys are generated once per test binary and shared. 2048-bit
//! keys keep the OAEP block at 256 bytes, which means the envelope only
//! fits with reduced `x` entropy. The protocol is otherwise identical to
//! the production parameters.

use crate::params::Params;
use crate::sign::SigningKey;
use conquer_once::Lazy;
use rsa::{RsaPrivateKey, RsaPublicKey};

pub const TEST_KEY_BITS: usize = 2048;
pub const TEST_X_ENTROPY_BYTES: usize = 24;

static SIGNING_KEY: Lazy<RsaPrivateKey> = Lazy::new(|| {
    RsaPrivateKey::new(&mut rand::rngs::OsRng, TEST_KEY_BITS).expect("failed to generate RSA key")
});

static OAEP_KEY: Lazy<RsaPrivateKey> = Lazy::new(|| {
    RsaPrivateKey::new(&mut rand::rngs::OsRng, TEST_KEY_BITS).expect("failed to generate RSA key")
});

pub fn signing_key() -> SigningKey {
    SigningKey::new(&SIGNING_KEY)
}

pub fn params() -> Params {
    params_with_entropy(TEST_X_ENTROPY_BYTES)
}

pub fn params_with_entropy(x_entropy_bytes: usize) -> Params {
    let public = RsaPublicKey::from(&*SIGNING_KEY);

    Params::new(&public, OAEP_KEY.clone(), x_entropy_bytes).expect("envelope fits the OAEP block")
}
