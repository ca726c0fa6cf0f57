//! The collector sweeps paid-for sale addresses into the mixing wallet.
//!
//! It is the only principal holding the master *private* key. Before it
//! signs anything it re-derives the stored address from `(mpk, index)`.
//! A mismatch means the seller DB no longer says what the wallet thinks,
//! and that is a fatal integrity error, not something to skip over.

use crate::chain::{self, Blockchain};
use crate::seller::SellerStore;
use crate::wallet::MasterPrivateKey;
use crate::TX_FEE;
use anyhow::{ensure, Context, Result};
use bitcoin::{Address, Network};
use std::time::Duration;

#[derive(Debug)]
pub struct Collector<C, S> {
    chain: C,
    store: S,
    master: MasterPrivateKey,
    mixin: Address,
    network: Network,
}

impl<C, S> Collector<C, S>
where
    C: Blockchain,
    S: SellerStore,
{
    pub fn new(
        chain: C,
        store: S,
        master: MasterPrivateKey,
        mixin: Address,
        network: Network,
    ) -> Self {
        Self {
            chain,
            store,
            master,
            mixin,
            network,
        }
    }

    pub async fn run(&self, period: Duration) -> Result<()> {
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "collection pass failed");
            }
        }
    }

    /// One collection pass over every row whose protobond went out.
    pub async fn tick(&self) -> Result<()> {
        for row in self.store.rows_with_protobond_sent().await? {
            let address = self
                .master
                .public()
                .derive_address(row.address_index, self.network)?;
            ensure!(
                address.to_string() == row.address,
                "stored address {} does not match its derivation",
                row.address
            );

            // Double-check that payment actually sits there before signing.
            if !chain::check(&self.chain, &address, row.price).await? {
                continue;
            }

            let key = self.master.derive_child(row.address_index)?;
            let utxos = self.chain.unspent(&address).await?;
            let sweep = chain::sweep(&utxos, &key, &self.mixin, TX_FEE)
                .context("failed to build sweep")?;

            let txid = self.chain.broadcast(sweep).await?;
            tracing::info!(address = %address, %txid, "swept sale address");
        }

        Ok(())
    }
}
