//! Redemption: verify a bond, then burn it.
//!
//! Ordering matters here. The cheap syntactic checks run first, the
//! cryptographic verification second, and the database insert last. The
//! insert is the atomic commit of "this bond is now spent", so nothing that
//! can still fail is allowed to happen after it.

use crate::db::RedemptionRow;
use crate::verify::verify;
use crate::{codec, Bond, MintError, Params, MAX_TOKEN_LEN};
use async_trait::async_trait;
use bitcoin::{Address, Network};
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait RedeemerStore: Send + Sync {
    async fn try_to_redeem(&self, bond: &Bond, address: &str) -> Result<bool, MintError>;
    async fn mark_fulfilled(&self, bond: &Bond) -> Result<(), MintError>;
    async fn unfulfilled_rows(&self) -> Result<Vec<RedemptionRow>, MintError>;
}

#[async_trait]
impl<T> RedeemerStore for Arc<T>
where
    T: RedeemerStore + ?Sized,
{
    async fn try_to_redeem(&self, bond: &Bond, address: &str) -> Result<bool, MintError> {
        (**self).try_to_redeem(bond, address).await
    }

    async fn mark_fulfilled(&self, bond: &Bond) -> Result<(), MintError> {
        (**self).mark_fulfilled(bond).await
    }

    async fn unfulfilled_rows(&self) -> Result<Vec<RedemptionRow>, MintError> {
        (**self).unfulfilled_rows().await
    }
}

/// Syntactic address check; the redemption surface accepts uploads and must
/// shed garbage before doing any real work.
pub fn valid_address(address: &str, network: Network) -> Option<Address> {
    let address = Address::from_str(address).ok()?;
    if !network_matches(address.network, network) {
        return None;
    }

    Some(address)
}

/// Testnet, signet and regtest share legacy address prefixes, so a parsed
/// address cannot always name the exact network it was made for.
fn network_matches(parsed: Network, expected: Network) -> bool {
    match (parsed, expected) {
        (a, b) if a == b => true,
        (Network::Testnet, Network::Regtest)
        | (Network::Regtest, Network::Testnet)
        | (Network::Testnet, Network::Signet)
        | (Network::Signet, Network::Testnet) => true,
        _ => false,
    }
}

/// Length and byte-set bound on an uploaded bond.
pub fn bond_sane(bond: &Bond) -> bool {
    bond.as_str().len() <= MAX_TOKEN_LEN && codec::is_wire_charset(bond.as_str())
}

#[derive(Debug)]
pub struct BondRedeemer<S> {
    params: Arc<Params>,
    store: S,
    network: Network,
}

impl<S> BondRedeemer<S>
where
    S: RedeemerStore,
{
    pub fn new(params: Arc<Params>, store: S, network: Network) -> Self {
        Self {
            params,
            store,
            network,
        }
    }

    /// Accept `bond` for payout to `address`, at most once ever.
    pub async fn bond_redeem(&self, bond: &Bond, address: &str) -> Result<(), MintError> {
        if valid_address(address, self.network).is_none() {
            return Err(MintError::BadAddress);
        }
        if !bond_sane(bond) {
            return Err(MintError::BadBond);
        }
        verify(&self.params, bond).map_err(|_| MintError::InvalidBond)?;

        if self.store.try_to_redeem(bond, address).await? {
            Ok(())
        } else {
            Err(MintError::BondAlreadyUsed)
        }
    }
}
