//! Full bond verification: raise to `e`, strip the OAEP padding, check the
//! envelope. Used by the redemption path and by the client as a self-check
//! before it writes a `.bond` file.

use crate::params::{Params, MSG_PREFIX, X_PREFIX};
use crate::Bond;

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
pub enum VerifyError {
    #[error("bond does not decode to an integer")]
    BadEncoding,
    #[error("OAEP unpadding failed")]
    Oaep,
    #[error("message prefix missing")]
    MsgPrefix,
    #[error("x prefix missing")]
    XPrefix,
    #[error("hash mismatch")]
    Hash,
}

/// Check that `bond` is `m^d mod n` for a well-formed envelope `m`.
pub fn verify(params: &Params, bond: &Bond) -> Result<(), VerifyError> {
    let bond = bond.to_int().map_err(|_| VerifyError::BadEncoding)?;

    // bond^e = m^(d·e) = m
    let m = bond.modpow(params.e(), params.n());

    // OAEP is all-or-nothing, so the leading zero bytes of the block are
    // significant and must be restored before unpadding.
    let cipher_len = params.oaep_cipher_len();
    let mut bytes = m.to_bytes_be();
    if bytes.len() > cipher_len {
        return Err(VerifyError::Oaep);
    }
    let mut block = vec![0u8; cipher_len - bytes.len()];
    block.append(&mut bytes);

    let envelope = params
        .oaep_decrypt(&block)
        .map_err(|_| VerifyError::Oaep)?;

    if !envelope.starts_with(MSG_PREFIX) {
        return Err(VerifyError::MsgPrefix);
    }
    let tail = &envelope[MSG_PREFIX.len()..];

    let split = tail
        .len()
        .checked_sub(params.x_len())
        .ok_or(VerifyError::XPrefix)?;
    let (h, x) = tail.split_at(split);

    if !x.starts_with(X_PREFIX) {
        return Err(VerifyError::XPrefix);
    }

    if h != params.hash_x(x).as_slice() {
        return Err(VerifyError::Hash);
    }

    Ok(())
}
