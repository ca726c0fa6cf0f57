use num_bigint::BigUint;
use std::fmt;
use zeroize::Zeroizing;

/// The client half of a blinding: `r^{-1} mod n`, held until the protobond
/// comes back.
///
/// The nonce `r` itself never leaves [`crate::blind::gen_token`]; only its
/// inverse survives, in a container that wipes itself on drop. Unblinding
/// consumes the secret, so once a bond exists the inverse is gone too.
pub struct BlindingSecret {
    inv: Zeroizing<Vec<u8>>,
}

impl BlindingSecret {
    pub(crate) fn new(inv_bytes: Vec<u8>) -> Self {
        Self {
            inv: Zeroizing::new(inv_bytes),
        }
    }

    pub(crate) fn inverse(&self) -> BigUint {
        BigUint::from_bytes_be(&self.inv)
    }
}

impl fmt::Debug for BlindingSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlindingSecret(..)")
    }
}
