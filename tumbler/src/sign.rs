//! The signer: raw RSA private-key exponentiation of blinded tokens.
//!
//! This is the only component that ever touches the private exponent, and
//! the only operation it performs is `token^d mod n`: deterministic,
//! textbook, no padding. All padding lives inside the client-built `m`;
//! the same token always yields the bit-identical protobond.

use crate::{MintError, Protobond, Token};
use anyhow::{Context, Result};
use num_bigint::BigUint;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;
use std::fmt;

pub struct SigningKey {
    n: BigUint,
    d: BigUint,
}

impl SigningKey {
    pub fn new(key: &RsaPrivateKey) -> Self {
        Self {
            n: BigUint::from_bytes_be(&key.n().to_bytes_be()),
            d: BigUint::from_bytes_be(&key.d().to_bytes_be()),
        }
    }

    /// Load the signing key from its PKCS#8 PEM form, as stored under the
    /// key directory only the signer can traverse.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem).context("failed to parse signing key")?;

        Ok(SigningKey::new(&key))
    }

    /// `protobond = token^d mod n`.
    pub fn sign(&self, token: &Token) -> Result<Protobond, MintError> {
        let token = token.to_int().map_err(|_| MintError::BadToken)?;

        Ok(Protobond::from_int(&token.modpow(&self.d, &self.n)))
    }
}

#[async_trait::async_trait]
impl crate::seller::SignToken for SigningKey {
    async fn sign(&self, token: &Token) -> Result<Protobond, MintError> {
        SigningKey::sign(self, token)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("n", &self.n)
            .field("d", &"..")
            .finish()
    }
}
