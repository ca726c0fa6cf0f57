//! The two halves of a sale.
//!
//! `GenQuote` turns a token into a payment address and a price;
//! `IssueProtobond` turns a paid-for token into a blinded signature. The
//! row lifecycle in the seller DB enforces their ordering: no row, no
//! protobond.

use crate::db::SaleRow;
use crate::wallet::MasterPublicKey;
use crate::{codec, MintError, Protobond, Token, BOND_PRICE, MAX_TOKEN_LEN};
use async_trait::async_trait;
use bitcoin::Network;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait SellerStore: Send + Sync {
    async fn get(&self, token: &Token) -> Result<Option<SaleRow>, MintError>;
    async fn put(
        &self,
        token: &Token,
        address_index: u128,
        address: &str,
        price: u64,
    ) -> Result<(), MintError>;
    async fn mark_protobond_sent(&self, token: &Token) -> Result<bool, MintError>;
    async fn rows_with_protobond_sent(&self) -> Result<Vec<SaleRow>, MintError>;
}

#[async_trait]
impl<T> SellerStore for std::sync::Arc<T>
where
    T: SellerStore + ?Sized,
{
    async fn get(&self, token: &Token) -> Result<Option<SaleRow>, MintError> {
        (**self).get(token).await
    }

    async fn put(
        &self,
        token: &Token,
        address_index: u128,
        address: &str,
        price: u64,
    ) -> Result<(), MintError> {
        (**self).put(token, address_index, address, price).await
    }

    async fn mark_protobond_sent(&self, token: &Token) -> Result<bool, MintError> {
        (**self).mark_protobond_sent(token).await
    }

    async fn rows_with_protobond_sent(&self) -> Result<Vec<SaleRow>, MintError> {
        (**self).rows_with_protobond_sent().await
    }
}

#[async_trait]
pub trait SignToken: Send + Sync {
    async fn sign(&self, token: &Token) -> Result<Protobond, MintError>;
}

#[async_trait]
pub trait PaymentCheck: Send + Sync {
    async fn check(&self, address: &str, price: u64) -> Result<bool, MintError>;
}

/// Nobody gets to submit a 15 MB GIF as a token.
pub fn sane_token(token: &Token) -> bool {
    token.as_str().len() <= MAX_TOKEN_LEN && codec::is_wire_charset(token.as_str())
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Quote {
    pub address: String,
    pub price: u64,
}

#[derive(Debug)]
pub struct GenQuote<S> {
    store: S,
    mpk: MasterPublicKey,
    network: Network,
}

impl<S> GenQuote<S>
where
    S: SellerStore,
{
    pub fn new(store: S, mpk: MasterPublicKey, network: Network) -> Self {
        Self {
            store,
            mpk,
            network,
        }
    }

    /// Quote a price and a fresh payment address for `token`.
    ///
    /// Quotes are idempotent per token: asking again returns the stored
    /// address, re-derived and cross-checked first.
    pub async fn gen_quote(&self, token: &Token) -> Result<Quote, MintError> {
        if !sane_token(token) {
            return Err(MintError::BadToken);
        }

        if let Some(row) = self.store.get(token).await? {
            return self.existing_quote(row);
        }

        let index: u128 = rand::Rng::gen(&mut rand::rngs::OsRng);
        let address = self
            .mpk
            .derive_address(index, self.network)
            .map_err(MintError::internal)?
            .to_string();

        match self.store.put(token, index, &address, BOND_PRICE).await {
            Ok(()) => Ok(Quote {
                address,
                price: BOND_PRICE,
            }),
            // Lost a race on the primary key; the first writer's quote wins.
            Err(MintError::DuplicateToken) => {
                let row = self
                    .store
                    .get(token)
                    .await?
                    .ok_or_else(|| MintError::Internal("duplicate token has no row".into()))?;

                self.existing_quote(row)
            }
            Err(e) => Err(e),
        }
    }

    fn existing_quote(&self, row: SaleRow) -> Result<Quote, MintError> {
        let derived = self
            .mpk
            .derive_address(row.address_index, self.network)
            .map_err(MintError::internal)?;
        if derived.to_string() != row.address {
            return Err(MintError::Internal(
                "stored address does not match its derivation".into(),
            ));
        }

        Ok(Quote {
            address: row.address,
            price: row.price,
        })
    }
}

#[derive(Debug)]
pub struct IssueProtobond<S, C, K> {
    store: S,
    check: C,
    sign: K,
}

impl<S, C, K> IssueProtobond<S, C, K>
where
    S: SellerStore,
    C: PaymentCheck,
    K: SignToken,
{
    pub fn new(store: S, check: C, sign: K) -> Self {
        Self { store, check, sign }
    }

    /// Sign `token` once its quoted address has been paid.
    pub async fn issue_protobond(&self, token: &Token) -> Result<Protobond, MintError> {
        let row = self
            .store
            .get(token)
            .await?
            .ok_or(MintError::NoSuchToken)?;

        if !self.check.check(&row.address, row.price).await? {
            return Err(MintError::Unpaid);
        }

        let protobond = self.sign.sign(token).await?;

        // Best effort: signing is deterministic, so a caller that re-asks
        // after a crash here simply receives the same protobond again.
        let _ = self.store.mark_protobond_sent(token).await;

        Ok(protobond)
    }
}
