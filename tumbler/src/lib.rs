#![warn(
    unused_extern_crates,
    missing_debug_implementations,
    missing_copy_implementations,
    rust_2018_idioms,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::fallible_impl_from,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::dbg_macro
)]
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![forbid(unsafe_code)]

pub mod blind;
pub mod chain;
pub mod codec;
pub mod collector;
pub mod db;
pub mod dispenser;
mod error;
pub mod params;
pub mod redeemer;
pub mod rpc;
mod secret;
pub mod seller;
pub mod services;
pub mod sign;
pub mod verify;
pub mod wallet;

#[cfg(test)]
mod test_harness;

pub use ::bitcoin;

pub use crate::{
    codec::{Bond, Protobond, ProtobondStatus, Token},
    error::MintError,
    params::Params,
    secret::BlindingSecret,
};

/// Price of a bond quote, in satoshi.
pub const BOND_PRICE: u64 = 14_000;

/// Amount paid out for a redeemed bond, in satoshi.
pub const BOND_VALUE: u64 = 10_000;

/// Flat fee used for all transactions involved in the protocol, in satoshi.
pub const TX_FEE: u64 = 20_000;

/// Upper bound on the encoded length of a token.
///
/// A token is `base64(hex(z))` for `z < 2^4096`, which comes out at 1372
/// bytes. Anything longer is not a token.
pub const MAX_TOKEN_LEN: usize = 1372;

/// Interval at which the collector sweeps paid-for sale addresses.
pub const COLLECT_PERIOD_SECS: u64 = 5;

/// Interval at which the dispenser pays out redeemed bonds.
pub const DISPENSE_PERIOD_SECS: u64 = 60;
