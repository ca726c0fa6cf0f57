//! The public cryptographic parameters of a mint.
//!
//! Everything in here is public material: the signing modulus and exponent,
//! and the OAEP keypair. The OAEP key is *not* used for confidentiality;
//! its private half is published on purpose. It exists only to give the
//! envelope OAEP's all-or-nothing property, which is why it has to be a
//! second keypair and never the signing key itself.

use anyhow::{ensure, Context, Result};
use num_bigint::BigUint;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha512};

/// The recognizable prefix of the random seed `x`.
pub const X_PREFIX: &[u8] = b"[[BITCOIN BOND]]";

/// The prefix of the OAEP plaintext, for a cheap first validation step.
pub const MSG_PREFIX: &[u8] = X_PREFIX;

/// Entropy drawn into `x` in production.
pub const X_ENTROPY_BYTES: usize = 256;

#[derive(Clone, Debug)]
pub struct Params {
    n: BigUint,
    e: BigUint,
    n_bytes: Vec<u8>,
    oaep_private: RsaPrivateKey,
    oaep_public: RsaPublicKey,
    x_entropy_bytes: usize,
}

impl Params {
    /// Assemble parameters from the signing public key and the OAEP keypair.
    ///
    /// `x_entropy_bytes` is 256 in production; tests shrink it together with
    /// the key size so that the envelope still fits the OAEP input limit,
    /// which this constructor enforces.
    pub fn new(
        signing_public: &RsaPublicKey,
        oaep: RsaPrivateKey,
        x_entropy_bytes: usize,
    ) -> Result<Self> {
        let n = BigUint::from_bytes_be(&signing_public.n().to_bytes_be());
        let e = BigUint::from_bytes_be(&signing_public.e().to_bytes_be());
        let n_bytes = n.to_bytes_be();

        let envelope_len = MSG_PREFIX.len() + Sha512::output_size() + X_PREFIX.len() + x_entropy_bytes;
        let oaep_limit = oaep
            .size()
            .checked_sub(2 * Sha512::output_size() + 2)
            .context("OAEP modulus is too small for SHA-512 padding")?;
        ensure!(
            envelope_len <= oaep_limit,
            "envelope of {} bytes exceeds the OAEP input limit of {} bytes",
            envelope_len,
            oaep_limit,
        );

        let oaep_public = RsaPublicKey::from(&oaep);

        Ok(Params {
            n,
            e,
            n_bytes,
            oaep_private: oaep,
            oaep_public,
            x_entropy_bytes,
        })
    }

    /// Production parameters from PEM-encoded key material: the signing
    /// public key (SPKI) and the full OAEP keypair (PKCS#8).
    pub fn from_pem(signing_public_pem: &str, oaep_pem: &str) -> Result<Self> {
        let signing_public = RsaPublicKey::from_public_key_pem(signing_public_pem)
            .context("failed to parse signing public key")?;
        let oaep =
            RsaPrivateKey::from_pkcs8_pem(oaep_pem).context("failed to parse OAEP keypair")?;

        Params::new(&signing_public, oaep, X_ENTROPY_BYTES)
    }

    pub fn n(&self) -> &BigUint {
        &self.n
    }

    pub fn e(&self) -> &BigUint {
        &self.e
    }

    pub fn x_entropy_bytes(&self) -> usize {
        self.x_entropy_bytes
    }

    /// Total length of `x`, prefix included.
    pub fn x_len(&self) -> usize {
        X_PREFIX.len() + self.x_entropy_bytes
    }

    /// Length in bytes of an OAEP block, i.e. of the OAEP modulus.
    pub fn oaep_cipher_len(&self) -> usize {
        self.oaep_public.size()
    }

    /// `SHA-512(bytes_of_n ‖ x)`, fed sequentially.
    pub fn hash_x(&self, x: &[u8]) -> Vec<u8> {
        let mut hasher = Sha512::new();
        hasher.update(&self.n_bytes);
        hasher.update(x);
        hasher.finalize().to_vec()
    }

    pub fn oaep_encrypt(&self, msg: &[u8]) -> Result<Vec<u8>, rsa::Error> {
        self.oaep_public
            .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha512>(), msg)
    }

    pub fn oaep_decrypt(&self, block: &[u8]) -> Result<Vec<u8>, rsa::Error> {
        self.oaep_private.decrypt(Oaep::new::<Sha512>(), block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness;

    #[test]
    fn rejects_an_envelope_that_cannot_fit_the_oaep_block() {
        // 2048-bit OAEP with SHA-512 leaves 126 bytes of input; production
        // entropy blows straight through that.
        let result = std::panic::catch_unwind(|| test_harness::params_with_entropy(X_ENTROPY_BYTES));

        assert!(result.is_err());
    }

    #[test]
    fn accepts_a_shrunken_envelope() {
        let params = test_harness::params();

        assert_eq!(params.x_len(), 40);
        assert_eq!(params.oaep_cipher_len(), 256);
    }

    #[test]
    fn hash_is_sixty_four_bytes_and_keyed_on_x() {
        let params = test_harness::params();

        let h1 = params.hash_x(b"one");
        let h2 = params.hash_x(b"two");

        assert_eq!(h1.len(), 64);
        assert_ne!(h1, h2);
    }
}
