//! The two persistent stores of the mint.
//!
//! Both are single-purpose sled databases with CBOR-encoded rows, each
//! owned exclusively by its DB service process. The primary keys are kept
//! byte-stable: a sale is keyed by the token text as sent on the wire, a
//! redemption by the hex of the bond text, so that equality in the store is
//! exactly equality of what the client submitted.

use crate::{Bond, MintError, Token};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Serialize a 128-bit wallet index as a decimal string; CBOR and JSON both
/// stop at 64 bits.
pub(crate) mod index_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(index: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(index)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        s.parse().map_err(de::Error::custom)
    }
}

/// One sale, keyed by its token.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SaleRow {
    pub token: Token,
    #[serde(with = "index_string")]
    pub address_index: u128,
    pub address: String,
    pub price: u64,
    pub timestamp: u64,
    pub protobond_sent: u64,
}

/// One redemption, keyed by its bond.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RedemptionRow {
    pub bond: Bond,
    pub address: String,
    pub fulfilled: bool,
}

#[derive(Debug)]
pub struct SellerDb {
    db: sled::Db,
}

impl SellerDb {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let db = sled::open(path)
            .with_context(|| format!("could not open the seller DB at {}", path.display()))?;

        Ok(SellerDb { db })
    }

    /// Insert a fresh sale. Fails with `DuplicateToken` if the token is
    /// already quoted.
    pub fn put(
        &self,
        token: &Token,
        address_index: u128,
        address: &str,
        price: u64,
    ) -> Result<(), MintError> {
        let row = SaleRow {
            token: token.clone(),
            address_index,
            address: address.to_owned(),
            price,
            timestamp: unix_now(),
            protobond_sent: 0,
        };
        let value = serde_cbor::to_vec(&row).map_err(MintError::internal)?;

        self.db
            .compare_and_swap(token.as_str(), Option::<&[u8]>::None, Some(value))
            .map_err(MintError::internal)?
            .map_err(|_| MintError::DuplicateToken)?;
        self.db.flush().map_err(MintError::internal)?;

        Ok(())
    }

    pub fn get(&self, token: &Token) -> Result<Option<SaleRow>, MintError> {
        match self.db.get(token.as_str()).map_err(MintError::internal)? {
            None => Ok(None),
            Some(value) => Ok(Some(
                serde_cbor::from_slice(&value).map_err(MintError::internal)?,
            )),
        }
    }

    /// Atomically bump `protobond_sent`. Returns `false` when the token is
    /// unknown.
    pub fn mark_protobond_sent(&self, token: &Token) -> Result<bool, MintError> {
        loop {
            let old = match self.db.get(token.as_str()).map_err(MintError::internal)? {
                None => return Ok(false),
                Some(value) => value,
            };

            let mut row: SaleRow = serde_cbor::from_slice(&old).map_err(MintError::internal)?;
            row.protobond_sent += 1;
            let new = serde_cbor::to_vec(&row).map_err(MintError::internal)?;

            let swapped = self
                .db
                .compare_and_swap(token.as_str(), Some(&old), Some(new))
                .map_err(MintError::internal)?;

            if swapped.is_ok() {
                self.db.flush().map_err(MintError::internal)?;
                return Ok(true);
            }
        }
    }

    /// Every sale whose protobond went out: the collector's work list.
    pub fn rows_with_protobond_sent(&self) -> Result<Vec<SaleRow>, MintError> {
        self.db
            .iter()
            .map(|item| {
                let (_, value) = item.map_err(MintError::internal)?;
                serde_cbor::from_slice::<SaleRow>(&value).map_err(MintError::internal)
            })
            .filter(|row| !matches!(row, Ok(row) if row.protobond_sent == 0))
            .collect()
    }
}

#[derive(Debug)]
pub struct RedeemerDb {
    db: sled::Db,
}

impl RedeemerDb {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let db = sled::open(path)
            .with_context(|| format!("could not open the redeemer DB at {}", path.display()))?;

        Ok(RedeemerDb { db })
    }

    /// The linearization point of redemption: the first insert for a bond
    /// wins, every later one observes the occupied key and returns `false`.
    pub fn try_to_redeem(&self, bond: &Bond, address: &str) -> Result<bool, MintError> {
        let row = RedemptionRow {
            bond: bond.clone(),
            address: address.to_owned(),
            fulfilled: false,
        };
        let value = serde_cbor::to_vec(&row).map_err(MintError::internal)?;

        let swapped = self
            .db
            .compare_and_swap(bond_key(bond), Option::<&[u8]>::None, Some(value))
            .map_err(MintError::internal)?;

        if swapped.is_ok() {
            self.db.flush().map_err(MintError::internal)?;
        }

        Ok(swapped.is_ok())
    }

    /// Idempotent; unknown bonds are ignored.
    pub fn mark_fulfilled(&self, bond: &Bond) -> Result<(), MintError> {
        loop {
            let old = match self.db.get(bond_key(bond)).map_err(MintError::internal)? {
                None => return Ok(()),
                Some(value) => value,
            };

            let mut row: RedemptionRow =
                serde_cbor::from_slice(&old).map_err(MintError::internal)?;
            if row.fulfilled {
                return Ok(());
            }
            row.fulfilled = true;
            let new = serde_cbor::to_vec(&row).map_err(MintError::internal)?;

            let swapped = self
                .db
                .compare_and_swap(bond_key(bond), Some(&old), Some(new))
                .map_err(MintError::internal)?;

            if swapped.is_ok() {
                self.db.flush().map_err(MintError::internal)?;
                return Ok(());
            }
        }
    }

    pub fn unfulfilled_rows(&self) -> Result<Vec<RedemptionRow>, MintError> {
        self.db
            .iter()
            .map(|item| {
                let (_, value) = item.map_err(MintError::internal)?;
                serde_cbor::from_slice::<RedemptionRow>(&value).map_err(MintError::internal)
            })
            .filter(|row| !matches!(row, Ok(row) if row.fulfilled))
            .collect()
    }
}

#[async_trait::async_trait]
impl crate::seller::SellerStore for SellerDb {
    async fn get(&self, token: &Token) -> Result<Option<SaleRow>, MintError> {
        SellerDb::get(self, token)
    }

    async fn put(
        &self,
        token: &Token,
        address_index: u128,
        address: &str,
        price: u64,
    ) -> Result<(), MintError> {
        SellerDb::put(self, token, address_index, address, price)
    }

    async fn mark_protobond_sent(&self, token: &Token) -> Result<bool, MintError> {
        SellerDb::mark_protobond_sent(self, token)
    }

    async fn rows_with_protobond_sent(&self) -> Result<Vec<SaleRow>, MintError> {
        SellerDb::rows_with_protobond_sent(self)
    }
}

#[async_trait::async_trait]
impl crate::redeemer::RedeemerStore for RedeemerDb {
    async fn try_to_redeem(&self, bond: &Bond, address: &str) -> Result<bool, MintError> {
        RedeemerDb::try_to_redeem(self, bond, address)
    }

    async fn mark_fulfilled(&self, bond: &Bond) -> Result<(), MintError> {
        RedeemerDb::mark_fulfilled(self, bond)
    }

    async fn unfulfilled_rows(&self) -> Result<Vec<RedemptionRow>, MintError> {
        RedeemerDb::unfulfilled_rows(self)
    }
}

fn bond_key(bond: &Bond) -> Vec<u8> {
    hex::encode(bond.as_str()).into_bytes()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seller_db() -> (tempfile::TempDir, SellerDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = SellerDb::open(&dir.path().join("seller")).unwrap();

        (dir, db)
    }

    fn redeemer_db() -> (tempfile::TempDir, RedeemerDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = RedeemerDb::open(&dir.path().join("redeemer")).unwrap();

        (dir, db)
    }

    #[test]
    fn get_returns_what_put_stored() {
        let (_guard, db) = seller_db();
        let token = Token::from("dG9rZW4=");

        db.put(&token, 42u128 << 64, "1BitcoinEaterAddressDontSendf59kuE", 14_000)
            .unwrap();
        let row = db.get(&token).unwrap().unwrap();

        assert_eq!(row.address_index, 42u128 << 64);
        assert_eq!(row.address, "1BitcoinEaterAddressDontSendf59kuE");
        assert_eq!(row.price, 14_000);
        assert_eq!(row.protobond_sent, 0);
    }

    #[test]
    fn get_of_an_unknown_token_is_none() {
        let (_guard, db) = seller_db();

        assert_eq!(db.get(&Token::from("bm9wZQ==")).unwrap(), None);
    }

    #[test]
    fn second_put_for_the_same_token_fails() {
        let (_guard, db) = seller_db();
        let token = Token::from("dG9rZW4=");

        db.put(&token, 1, "addr_one", 14_000).unwrap();
        let result = db.put(&token, 2, "addr_two", 14_000);

        assert_eq!(result, Err(MintError::DuplicateToken));
        assert_eq!(db.get(&token).unwrap().unwrap().address, "addr_one");
    }

    #[test]
    fn protobond_sent_is_monotone() {
        let (_guard, db) = seller_db();
        let token = Token::from("dG9rZW4=");
        db.put(&token, 1, "addr", 14_000).unwrap();

        assert!(db.mark_protobond_sent(&token).unwrap());
        assert!(db.mark_protobond_sent(&token).unwrap());

        assert_eq!(db.get(&token).unwrap().unwrap().protobond_sent, 2);
    }

    #[test]
    fn marking_an_unknown_token_reports_failure() {
        let (_guard, db) = seller_db();

        assert!(!db.mark_protobond_sent(&Token::from("bm9wZQ==")).unwrap());
    }

    #[test]
    fn collector_work_list_only_contains_sent_rows() {
        let (_guard, db) = seller_db();
        let sent = Token::from("c2VudA==");
        let unsent = Token::from("dW5zZW50");
        db.put(&sent, 1, "addr_sent", 14_000).unwrap();
        db.put(&unsent, 2, "addr_unsent", 14_000).unwrap();
        db.mark_protobond_sent(&sent).unwrap();

        let rows = db.rows_with_protobond_sent().unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].token, sent);
    }

    #[test]
    fn first_redemption_wins() {
        let (_guard, db) = redeemer_db();
        let bond = Bond::from("Ym9uZA==");

        assert!(db.try_to_redeem(&bond, "addr_one").unwrap());
        assert!(!db.try_to_redeem(&bond, "addr_two").unwrap());

        let rows = db.unfulfilled_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address, "addr_one");
    }

    #[test]
    fn fulfilled_rows_leave_the_work_list() {
        let (_guard, db) = redeemer_db();
        let bond = Bond::from("Ym9uZA==");
        db.try_to_redeem(&bond, "addr").unwrap();

        db.mark_fulfilled(&bond).unwrap();
        db.mark_fulfilled(&bond).unwrap();

        assert!(db.unfulfilled_rows().unwrap().is_empty());
    }

    #[test]
    fn mark_fulfilled_ignores_unknown_bonds() {
        let (_guard, db) = redeemer_db();

        assert_eq!(db.mark_fulfilled(&Bond::from("bm9wZQ==")), Ok(()));
    }

    #[test]
    fn redemptions_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redeemer");
        let bond = Bond::from("Ym9uZA==");

        {
            let db = RedeemerDb::open(&path).unwrap();
            assert!(db.try_to_redeem(&bond, "addr_one").unwrap());
        }

        let db = RedeemerDb::open(&path).unwrap();
        assert!(!db.try_to_redeem(&bond, "addr_two").unwrap());
    }
}
