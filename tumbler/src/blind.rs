//! Token construction and unblinding, the client half of the blind
//! signature.
//!
//! A token is `(m · r^e) mod n` for an envelope `m = OAEP(msg_prefix ‖
//! SHA-512(bytes_of_n ‖ x) ‖ x)` and a fresh nonce `r`. The signer raises
//! the token to `d` without ever seeing `m`; multiplying the result by
//! `r^{-1}` leaves `m^d`, a plain RSA signature anyone can check.

use crate::codec::Token;
use crate::params::{Params, MSG_PREFIX, X_PREFIX};
use crate::secret::BlindingSecret;
use crate::{Bond, Protobond};
use num_bigint::{BigUint, RandBigInt};
use rand::{CryptoRng, RngCore};

/// How often to redraw `x` before concluding the OAEP and signing moduli
/// are mismatched. Each draw fails with probability below one half when the
/// moduli have the same bit length.
const MAX_OAEP_DRAWS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("OAEP output does not fit below the signing modulus")]
    BadOaepMod,
    #[error("OAEP padding failed: {0}")]
    Oaep(#[from] rsa::Error),
    #[error("protobond is not a base64-of-hex integer")]
    BadEncoding,
}

/// Generate a fresh token together with the secret needed to later unblind
/// the protobond it buys.
pub fn gen_token<R>(params: &Params, rng: &mut R) -> Result<(Token, BlindingSecret), TokenError>
where
    R: RngCore + CryptoRng,
{
    let n = params.n();

    // The OAEP block read as an integer must fall below the signing
    // modulus; redraw x until it does.
    let mut m = None;
    for _ in 0..MAX_OAEP_DRAWS {
        let x = draw_x(params, rng);
        let h = params.hash_x(&x);

        let mut envelope = Vec::with_capacity(MSG_PREFIX.len() + h.len() + x.len());
        envelope.extend_from_slice(MSG_PREFIX);
        envelope.extend_from_slice(&h);
        envelope.extend_from_slice(&x);

        let candidate = BigUint::from_bytes_be(&params.oaep_encrypt(&envelope)?);
        if &candidate < n {
            m = Some(candidate);
            break;
        }
    }
    let m = m.ok_or(TokenError::BadOaepMod)?;

    // The nonce must be invertible mod n. r itself does not outlive this
    // loop; only the inverse leaves, inside the zeroizing container.
    let (r_e, inv) = loop {
        let r = rng.gen_biguint_below(n);
        if let Some(inv) = r.modinv(n) {
            break (r.modpow(params.e(), n), inv);
        }
    };
    let secret = BlindingSecret::new(inv.to_bytes_be());

    let token = (m * r_e) % n;

    Ok((Token::from_int(&token), secret))
}

/// Turn a protobond into a bond: `(protobond · r^{-1}) mod n`.
///
/// Consumes the blinding secret; the inverse is wiped once the bond exists.
pub fn unblind(
    params: &Params,
    protobond: &Protobond,
    secret: BlindingSecret,
) -> Result<Bond, TokenError> {
    let protobond = protobond.to_int().map_err(|_| TokenError::BadEncoding)?;
    let bond = (protobond * secret.inverse()) % params.n();

    Ok(Bond::from_int(&bond))
}

fn draw_x<R>(params: &Params, rng: &mut R) -> Vec<u8>
where
    R: RngCore + CryptoRng,
{
    let mut x = vec![0u8; params.x_len()];
    x[..X_PREFIX.len()].copy_from_slice(X_PREFIX);
    rng.fill_bytes(&mut x[X_PREFIX.len()..]);

    x
}
