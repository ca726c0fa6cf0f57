//! The typed RPC schema: one dispatcher and one client stub per service.
//!
//! Every service exposes a fixed set of methods with typed kwargs; the
//! stubs on the calling side implement the same collaborator traits the
//! in-process versions do, so a component neither knows nor cares whether
//! its store or signer lives across a socket.

use crate::chain::{self, Blockchain};
use crate::db::{index_string, RedeemerDb, RedemptionRow, SaleRow, SellerDb};
use crate::redeemer::{BondRedeemer, RedeemerStore};
use crate::rpc::{socket_path, Handler, RpcClient};
use crate::seller::{GenQuote, IssueProtobond, PaymentCheck, Quote, SellerStore, SignToken};
use crate::sign::SigningKey;
use crate::{Bond, MintError, Protobond, Token};
use async_trait::async_trait;
use bitcoin::{Address, Network};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;

/// The directory names under `rpc/`, one per service.
pub mod service_name {
    pub const SELLER_DB: &str = "SellerDB";
    pub const REDEEMER_DB: &str = "RedeemerDB";
    pub const SIGN: &str = "Sign";
    pub const CHECK: &str = "Check";
    pub const GEN_QUOTE: &str = "GenQuote";
    pub const ISSUE_PROTOBOND: &str = "IssueProtobond";
    pub const BOND_REDEEMER: &str = "BondRedeemer";
}

fn args<T>(kwargs: Value) -> Result<T, MintError>
where
    T: DeserializeOwned,
{
    serde_json::from_value(kwargs).map_err(|e| MintError::Internal(format!("bad kwargs: {}", e)))
}

fn reply<T>(value: &T) -> Result<Value, MintError>
where
    T: Serialize,
{
    serde_json::to_value(value).map_err(MintError::internal)
}

fn unknown(method: &str) -> MintError {
    MintError::Internal(format!("unknown method: {}", method))
}

#[derive(Debug, Deserialize, Serialize)]
struct TokenArgs {
    token: Token,
}

#[derive(Debug, Deserialize, Serialize)]
struct PutArgs {
    token: Token,
    #[serde(with = "index_string")]
    index: u128,
    address: String,
    price: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct CheckArgs {
    address: String,
    price: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct BondArgs {
    bond: Bond,
}

#[derive(Debug, Deserialize, Serialize)]
struct RedeemArgs {
    bond: Bond,
    address: String,
}

// ---- dispatchers ----------------------------------------------------------

#[derive(Debug)]
pub struct SellerDbService {
    db: SellerDb,
}

impl SellerDbService {
    pub fn new(db: SellerDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Handler for SellerDbService {
    async fn handle(&self, method: &str, kwargs: Value) -> Result<Value, MintError> {
        match method {
            "get" => {
                let TokenArgs { token } = args(kwargs)?;
                reply(&self.db.get(&token)?)
            }
            "put" => {
                let PutArgs {
                    token,
                    index,
                    address,
                    price,
                } = args(kwargs)?;
                self.db.put(&token, index, &address, price)?;
                reply(&true)
            }
            "mark_protobond_sent" => {
                let TokenArgs { token } = args(kwargs)?;
                reply(&self.db.mark_protobond_sent(&token)?)
            }
            "get_rows_with_protobond_sent" => reply(&self.db.rows_with_protobond_sent()?),
            _ => Err(unknown(method)),
        }
    }
}

#[derive(Debug)]
pub struct RedeemerDbService {
    db: RedeemerDb,
}

impl RedeemerDbService {
    pub fn new(db: RedeemerDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Handler for RedeemerDbService {
    async fn handle(&self, method: &str, kwargs: Value) -> Result<Value, MintError> {
        match method {
            "try_to_redeem" => {
                let RedeemArgs { bond, address } = args(kwargs)?;
                reply(&self.db.try_to_redeem(&bond, &address)?)
            }
            "mark_fulfilled" => {
                let BondArgs { bond } = args(kwargs)?;
                self.db.mark_fulfilled(&bond)?;
                reply(&true)
            }
            "get_unfulfilled_rows" => reply(&self.db.unfulfilled_rows()?),
            _ => Err(unknown(method)),
        }
    }
}

#[derive(Debug)]
pub struct SignService {
    key: SigningKey,
}

impl SignService {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }
}

#[async_trait]
impl Handler for SignService {
    async fn handle(&self, method: &str, kwargs: Value) -> Result<Value, MintError> {
        match method {
            "sign" => {
                let TokenArgs { token } = args(kwargs)?;
                reply(&self.key.sign(&token)?)
            }
            _ => Err(unknown(method)),
        }
    }
}

#[derive(Debug)]
pub struct CheckService<C> {
    chain: C,
}

impl<C> CheckService<C>
where
    C: Blockchain + 'static,
{
    pub fn new(chain: C) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl<C> Handler for CheckService<C>
where
    C: Blockchain + 'static,
{
    async fn handle(&self, method: &str, kwargs: Value) -> Result<Value, MintError> {
        match method {
            "check" => {
                let CheckArgs { address, price } = args(kwargs)?;
                let address = Address::from_str(&address).map_err(MintError::internal)?;
                let paid = chain::check(&self.chain, &address, price)
                    .await
                    .map_err(MintError::internal)?;
                reply(&paid)
            }
            _ => Err(unknown(method)),
        }
    }
}

#[derive(Debug)]
pub struct GenQuoteService<S> {
    inner: GenQuote<S>,
}

impl<S> GenQuoteService<S>
where
    S: SellerStore + 'static,
{
    pub fn new(inner: GenQuote<S>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> Handler for GenQuoteService<S>
where
    S: SellerStore + 'static,
{
    async fn handle(&self, method: &str, kwargs: Value) -> Result<Value, MintError> {
        match method {
            "gen_quote" => {
                let TokenArgs { token } = args(kwargs)?;
                reply(&self.inner.gen_quote(&token).await?)
            }
            _ => Err(unknown(method)),
        }
    }
}

#[derive(Debug)]
pub struct IssueProtobondService<S, C, K> {
    inner: IssueProtobond<S, C, K>,
}

impl<S, C, K> IssueProtobondService<S, C, K>
where
    S: SellerStore + 'static,
    C: PaymentCheck + 'static,
    K: SignToken + 'static,
{
    pub fn new(inner: IssueProtobond<S, C, K>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S, C, K> Handler for IssueProtobondService<S, C, K>
where
    S: SellerStore + 'static,
    C: PaymentCheck + 'static,
    K: SignToken + 'static,
{
    async fn handle(&self, method: &str, kwargs: Value) -> Result<Value, MintError> {
        match method {
            "issue_protobond" => {
                let TokenArgs { token } = args(kwargs)?;
                reply(&self.inner.issue_protobond(&token).await?)
            }
            _ => Err(unknown(method)),
        }
    }
}

#[derive(Debug)]
pub struct BondRedeemerService<S> {
    inner: BondRedeemer<S>,
}

impl<S> BondRedeemerService<S>
where
    S: RedeemerStore + 'static,
{
    pub fn new(inner: BondRedeemer<S>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> Handler for BondRedeemerService<S>
where
    S: RedeemerStore + 'static,
{
    async fn handle(&self, method: &str, kwargs: Value) -> Result<Value, MintError> {
        match method {
            "bond_redeem" => {
                let RedeemArgs { bond, address } = args(kwargs)?;
                self.inner.bond_redeem(&bond, &address).await?;
                reply(&true)
            }
            _ => Err(unknown(method)),
        }
    }
}

// ---- client stubs ---------------------------------------------------------

macro_rules! stub {
    ($name:ident, $service:path) => {
        #[derive(Debug)]
        pub struct $name {
            rpc: Mutex<RpcClient>,
        }

        impl $name {
            pub async fn connect(root: &Path) -> anyhow::Result<Self> {
                let rpc = RpcClient::connect(&socket_path(root, $service)).await?;

                Ok(Self {
                    rpc: Mutex::new(rpc),
                })
            }

            async fn call<T>(&self, method: &str, kwargs: Value) -> Result<T, MintError>
            where
                T: DeserializeOwned,
            {
                let result = self.rpc.lock().await.call(method, kwargs).await?;

                serde_json::from_value(result).map_err(MintError::internal)
            }
        }
    };
}

stub!(SellerDbClient, service_name::SELLER_DB);
stub!(RedeemerDbClient, service_name::REDEEMER_DB);
stub!(SignClient, service_name::SIGN);
stub!(CheckClient, service_name::CHECK);
stub!(GenQuoteClient, service_name::GEN_QUOTE);
stub!(IssueProtobondClient, service_name::ISSUE_PROTOBOND);
stub!(BondRedeemerClient, service_name::BOND_REDEEMER);

#[async_trait]
impl SellerStore for SellerDbClient {
    async fn get(&self, token: &Token) -> Result<Option<SaleRow>, MintError> {
        self.call(
            "get",
            reply(&TokenArgs {
                token: token.clone(),
            })?,
        )
        .await
    }

    async fn put(
        &self,
        token: &Token,
        address_index: u128,
        address: &str,
        price: u64,
    ) -> Result<(), MintError> {
        let _: bool = self
            .call(
                "put",
                reply(&PutArgs {
                    token: token.clone(),
                    index: address_index,
                    address: address.to_owned(),
                    price,
                })?,
            )
            .await?;

        Ok(())
    }

    async fn mark_protobond_sent(&self, token: &Token) -> Result<bool, MintError> {
        self.call(
            "mark_protobond_sent",
            reply(&TokenArgs {
                token: token.clone(),
            })?,
        )
        .await
    }

    async fn rows_with_protobond_sent(&self) -> Result<Vec<SaleRow>, MintError> {
        self.call("get_rows_with_protobond_sent", Value::Object(Default::default()))
            .await
    }
}

#[async_trait]
impl RedeemerStore for RedeemerDbClient {
    async fn try_to_redeem(&self, bond: &Bond, address: &str) -> Result<bool, MintError> {
        self.call(
            "try_to_redeem",
            reply(&RedeemArgs {
                bond: bond.clone(),
                address: address.to_owned(),
            })?,
        )
        .await
    }

    async fn mark_fulfilled(&self, bond: &Bond) -> Result<(), MintError> {
        let _: bool = self
            .call("mark_fulfilled", reply(&BondArgs { bond: bond.clone() })?)
            .await?;

        Ok(())
    }

    async fn unfulfilled_rows(&self) -> Result<Vec<RedemptionRow>, MintError> {
        self.call("get_unfulfilled_rows", Value::Object(Default::default()))
            .await
    }
}

#[async_trait]
impl SignToken for SignClient {
    async fn sign(&self, token: &Token) -> Result<Protobond, MintError> {
        self.call(
            "sign",
            reply(&TokenArgs {
                token: token.clone(),
            })?,
        )
        .await
    }
}

#[async_trait]
impl PaymentCheck for CheckClient {
    async fn check(&self, address: &str, price: u64) -> Result<bool, MintError> {
        self.call(
            "check",
            reply(&CheckArgs {
                address: address.to_owned(),
                price,
            })?,
        )
        .await
    }
}

impl GenQuoteClient {
    pub async fn gen_quote(&self, token: &Token) -> Result<Quote, MintError> {
        self.call(
            "gen_quote",
            reply(&TokenArgs {
                token: token.clone(),
            })?,
        )
        .await
    }
}

impl IssueProtobondClient {
    pub async fn issue_protobond(&self, token: &Token) -> Result<Protobond, MintError> {
        self.call(
            "issue_protobond",
            reply(&TokenArgs {
                token: token.clone(),
            })?,
        )
        .await
    }
}

impl BondRedeemerClient {
    pub async fn bond_redeem(&self, bond: &Bond, address: &str) -> Result<(), MintError> {
        let _: bool = self
            .call(
                "bond_redeem",
                reply(&RedeemArgs {
                    bond: bond.clone(),
                    address: address.to_owned(),
                })?,
            )
            .await?;

        Ok(())
    }
}

/// A [`Network`] parsed from its lowercase name; what both daemons put on
/// the command line.
pub fn parse_network(name: &str) -> anyhow::Result<Network> {
    Network::from_str(name).map_err(|_| anyhow::anyhow!("unknown network: {}", name))
}
