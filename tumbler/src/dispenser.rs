//! The dispenser pays out every unfulfilled redemption row.
//!
//! A row is marked fulfilled *before* its payout is broadcast. A crash in
//! between loses that payout; the other order would risk paying the same
//! bond twice on a retry, which the whole single-use design exists to rule
//! out. Operators: see the crash-window note in the README.

use crate::chain::{self, Blockchain};
use crate::redeemer::{valid_address, RedeemerStore};
use crate::{BOND_VALUE, TX_FEE};
use anyhow::{ensure, Context, Result};
use bitcoin::secp256k1::SecretKey;
use bitcoin::Network;
use std::fmt;
use std::time::Duration;

pub struct Dispenser<C, S> {
    chain: C,
    store: S,
    key: SecretKey,
    network: Network,
}

impl<C, S> Dispenser<C, S>
where
    C: Blockchain,
    S: RedeemerStore,
{
    pub fn new(chain: C, store: S, key: SecretKey, network: Network) -> Self {
        Self {
            chain,
            store,
            key,
            network,
        }
    }

    pub async fn run(&self, period: Duration) -> Result<()> {
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "dispense pass failed");
            }
        }
    }

    /// One payout pass over the unfulfilled rows.
    pub async fn tick(&self) -> Result<()> {
        for row in self.store.unfulfilled_rows().await? {
            ensure!(!row.fulfilled, "work list returned a fulfilled row");

            self.store.mark_fulfilled(&row.bond).await?;

            let to = match valid_address(&row.address, self.network) {
                Some(address) => address,
                None => {
                    // The redeemer validated this address on the way in; a
                    // bad one here is corruption, and the row stays burned.
                    tracing::error!(address = %row.address, "unpayable redemption row");
                    continue;
                }
            };

            let from = chain::key_address(&self.key, self.network);
            let utxos = self.chain.unspent(&from).await?;
            let payout = chain::send(&utxos, &self.key, &to, BOND_VALUE, TX_FEE, self.network)
                .context("failed to build payout")?;

            let txid = self.chain.broadcast(payout).await?;
            tracing::info!(address = %to, %txid, "dispensed bond value");
        }

        Ok(())
    }
}

impl<C, S> fmt::Debug for Dispenser<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispenser").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_support::FakeChain;
    use crate::db::RedeemerDb;
    use crate::Bond;
    use rand::RngCore;
    use std::sync::Arc;

    fn key() -> SecretKey {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);

        SecretKey::from_slice(&bytes).unwrap()
    }

    fn payout_address() -> String {
        chain::key_address(&key(), Network::Regtest).to_string()
    }

    #[tokio::test]
    async fn pays_each_unfulfilled_row_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(RedeemerDb::open(&dir.path().join("redeemer")).unwrap());
        let chain = FakeChain::default();
        let dispenser_key = key();
        chain.fund(
            &chain::key_address(&dispenser_key, Network::Regtest),
            1_000_000,
        );

        let to = payout_address();
        db.try_to_redeem(&Bond::from("Ym9uZA=="), &to).await.unwrap();

        let dispenser = Dispenser::new(chain.clone(), db.clone(), dispenser_key, Network::Regtest);
        dispenser.tick().await.unwrap();

        let broadcasts = chain.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].output[0].value, BOND_VALUE);
        assert!(db.unfulfilled_rows().await.unwrap().is_empty());

        // A second pass has nothing left to do.
        dispenser.tick().await.unwrap();
        assert_eq!(chain.broadcasts().len(), 1);
    }

    #[tokio::test]
    async fn the_row_is_burned_even_if_the_payout_cannot_be_built() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(RedeemerDb::open(&dir.path().join("redeemer")).unwrap());
        let chain = FakeChain::default(); // dispenser wallet is empty

        db.try_to_redeem(&Bond::from("Ym9uZA=="), &payout_address())
            .await
            .unwrap();

        let dispenser = Dispenser::new(chain.clone(), db.clone(), key(), Network::Regtest);

        assert!(dispenser.tick().await.is_err());
        assert!(db.unfulfilled_rows().await.unwrap().is_empty());
        assert!(chain.broadcasts().is_empty());
    }
}
