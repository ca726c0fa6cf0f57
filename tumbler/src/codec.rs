//! The wire encoding for large integers.
//!
//! Tokens, protobonds and bonds all travel as `base64(hex(z))` where `hex`
//! is the `0x`-prefixed lowercase form. Both steps have to match on every
//! side or the redeemer database keys stop being byte-stable.

use enum_as_inner::EnumAsInner;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
#[error("string is not a base64-of-hex integer")]
pub struct BadEncoding;

pub fn encode_long(z: &BigUint) -> String {
    base64::encode(format!("{:#x}", z))
}

pub fn decode_long(s: &str) -> Result<BigUint, BadEncoding> {
    let bytes = base64::decode(s).map_err(|_| BadEncoding)?;
    let hex = String::from_utf8(bytes).map_err(|_| BadEncoding)?;

    let digits = hex.strip_prefix("0x").ok_or(BadEncoding)?;
    if digits.is_empty() {
        return Err(BadEncoding);
    }

    BigUint::parse_bytes(digits.as_bytes(), 16).ok_or(BadEncoding)
}

/// Whether `s` could have been produced by [`encode_long`] at all, i.e. is
/// plain standard-alphabet base64. Used to cheaply reject garbage uploads
/// before any bignum work happens.
pub fn is_wire_charset(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

macro_rules! wire_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_int(z: &BigUint) -> Self {
                Self(encode_long(z))
            }

            pub fn to_int(&self) -> Result<BigUint, BadEncoding> {
                decode_long(&self.0)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

wire_newtype! {
    /// A blinded message `m · r^e mod n`, as sent to the signer.
    Token
}

wire_newtype! {
    /// A blinded signature `(m · r^e)^d mod n`, as returned by the signer.
    Protobond
}

wire_newtype! {
    /// An unblinded signature `m^d mod n`, the thing the mint redeems.
    Bond
}

/// Outcome of asking the seller for a protobond.
#[derive(Clone, Debug, PartialEq, EnumAsInner)]
pub enum ProtobondStatus {
    /// Payment has not been seen yet; ask again later.
    Pending,
    Ready(Protobond),
}
