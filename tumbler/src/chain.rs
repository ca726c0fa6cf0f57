//! Chain access and transaction plumbing.
//!
//! The services only ever need three things from the Bitcoin side: the
//! unspent outputs of an address, a way to broadcast a signed transaction,
//! and (from those two) "has this address received at least this much".
//! Everything else (explorer choice, retries, confirmation policy) stays
//! behind the [`Blockchain`] trait.

use crate::wallet::SECP;
use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, PublicKey, SecretKey};
use bitcoin::util::sighash::SighashCache;
use bitcoin::{
    Address, EcdsaSighashType, Network, OutPoint, PackedLockTime, PublicKey as BitcoinPublicKey,
    Script, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use serde::Deserialize;

/// An unspent output as reported by the chain backend.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
}

#[async_trait]
pub trait Blockchain: Send + Sync {
    async fn unspent(&self, address: &Address) -> Result<Vec<Utxo>>;
    async fn broadcast(&self, transaction: Transaction) -> Result<Txid>;
}

/// Sum of the unspent outputs of `address`, in satoshi.
pub async fn balance<C>(chain: &C, address: &Address) -> Result<u64>
where
    C: Blockchain + ?Sized,
{
    let utxos = chain.unspent(address).await?;

    Ok(utxos.iter().map(|utxo| utxo.value).sum())
}

/// Whether `address` has received at least `price` satoshi.
pub async fn check<C>(chain: &C, address: &Address, price: u64) -> Result<bool>
where
    C: Blockchain + ?Sized,
{
    Ok(balance(chain, address).await? >= price)
}

/// An esplora-backed [`Blockchain`].
#[derive(Clone, Debug)]
pub struct EsploraClient {
    base_url: String,
    client: reqwest::Client,
}

impl EsploraClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Blockchain for EsploraClient {
    async fn unspent(&self, address: &Address) -> Result<Vec<Utxo>> {
        self.client
            .get(&format!("{}/address/{}/utxo", self.base_url, address))
            .send()
            .await
            .context("failed to fetch UTXOs")?
            .json()
            .await
            .context("failed to deserialize UTXO response")
    }

    async fn broadcast(&self, transaction: Transaction) -> Result<Txid> {
        let hex = hex::encode(bitcoin::consensus::encode::serialize(&transaction));

        let txid = self
            .client
            .post(&format!("{}/tx", self.base_url))
            .body(hex)
            .send()
            .await
            .context("failed to broadcast transaction")?
            .text()
            .await
            .context("failed to read broadcast response")?;

        txid.trim().parse().context("backend returned no txid")
    }
}

/// The P2PKH address controlled by `key` (uncompressed, like everything the
/// deterministic wallet derives).
pub fn key_address(key: &SecretKey, network: Network) -> Address {
    let public = BitcoinPublicKey::new_uncompressed(PublicKey::from_secret_key(&SECP, key));

    Address::p2pkh(&public, network)
}

/// Spend the *entire* balance of `utxos` to `to`, minus `fee`.
pub fn sweep(utxos: &[Utxo], key: &SecretKey, to: &Address, fee: u64) -> Result<Transaction> {
    let total: u64 = utxos.iter().map(|utxo| utxo.value).sum();
    ensure!(
        total > fee,
        "balance of {} sat does not cover the fee of {} sat",
        total,
        fee
    );

    let outputs = vec![TxOut {
        value: total - fee,
        script_pubkey: to.script_pubkey(),
    }];

    build_signed(utxos, key, outputs)
}

/// Pay `value` to `to`, returning the change to the key's own address.
pub fn send(
    utxos: &[Utxo],
    key: &SecretKey,
    to: &Address,
    value: u64,
    fee: u64,
    network: Network,
) -> Result<Transaction> {
    let total: u64 = utxos.iter().map(|utxo| utxo.value).sum();
    ensure!(
        total >= value + fee,
        "balance of {} sat does not cover {} sat plus the fee of {} sat",
        total,
        value,
        fee
    );

    let mut outputs = vec![TxOut {
        value,
        script_pubkey: to.script_pubkey(),
    }];
    let change = total - value - fee;
    if change > 0 {
        outputs.push(TxOut {
            value: change,
            script_pubkey: key_address(key, network).script_pubkey(),
        });
    }

    build_signed(utxos, key, outputs)
}

fn build_signed(utxos: &[Utxo], key: &SecretKey, outputs: Vec<TxOut>) -> Result<Transaction> {
    ensure!(!utxos.is_empty(), "nothing to spend");

    let public = BitcoinPublicKey::new_uncompressed(PublicKey::from_secret_key(&SECP, key));
    let spent_script = Script::new_p2pkh(&public.pubkey_hash());

    let inputs = utxos
        .iter()
        .map(|utxo| TxIn {
            previous_output: OutPoint::new(utxo.txid, utxo.vout),
            script_sig: Script::new(),
            sequence: Sequence::MAX,
            witness: Witness::default(),
        })
        .collect();

    let mut transaction = Transaction {
        version: 1,
        lock_time: PackedLockTime::ZERO,
        input: inputs,
        output: outputs,
    };

    let sighashes = {
        let mut cache = SighashCache::new(&transaction);
        (0..utxos.len())
            .map(|index| {
                let sighash = cache
                    .legacy_signature_hash(index, &spent_script, EcdsaSighashType::All.to_u32())
                    .context("failed to compute sighash")?;

                Message::from_slice(&sighash.into_inner()).context("sighash is not a message")
            })
            .collect::<Result<Vec<_>>>()?
    };

    for (input, message) in transaction.input.iter_mut().zip(sighashes) {
        let signature = SECP.sign_ecdsa(&message, key);

        let mut sig_bytes = signature.serialize_der().to_vec();
        sig_bytes.push(1); // SIGHASH_ALL

        input.script_sig = Builder::new()
            .push_slice(&sig_bytes)
            .push_slice(&public.to_bytes())
            .into_script();
    }

    Ok(transaction)
}


#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use std::str::FromStr;

    fn random_key() -> SecretKey {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);

        SecretKey::from_slice(&bytes).unwrap()
    }

    fn utxo(value: u64) -> Utxo {
        Utxo {
            txid: Txid::from_str(
                "0000000000000000000000000000000000000000000000000000000000000001",
            )
            .unwrap(),
            vout: 0,
            value,
        }
    }

    #[test]
    fn sweep_spends_everything_minus_the_fee() {
        let key = random_key();
        let to = key_address(&random_key(), Network::Regtest);

        let transaction = sweep(&[utxo(50_000), utxo(30_000)], &key, &to, 20_000).unwrap();

        assert_eq!(transaction.input.len(), 2);
        assert_eq!(transaction.output.len(), 1);
        assert_eq!(transaction.output[0].value, 60_000);
        assert_eq!(transaction.output[0].script_pubkey, to.script_pubkey());
    }

    #[test]
    fn sweep_refuses_a_balance_below_the_fee() {
        let key = random_key();
        let to = key_address(&key, Network::Regtest);

        assert!(sweep(&[utxo(10_000)], &key, &to, 20_000).is_err());
    }

    #[test]
    fn send_returns_change_to_the_sender() {
        let key = random_key();
        let to = key_address(&random_key(), Network::Regtest);

        let transaction = send(
            &[utxo(100_000)],
            &key,
            &to,
            10_000,
            20_000,
            Network::Regtest,
        )
        .unwrap();

        assert_eq!(transaction.output.len(), 2);
        assert_eq!(transaction.output[0].value, 10_000);
        assert_eq!(transaction.output[1].value, 70_000);
        assert_eq!(
            transaction.output[1].script_pubkey,
            key_address(&key, Network::Regtest).script_pubkey()
        );
    }

    #[test]
    fn inputs_are_signed() {
        let key = random_key();
        let to = key_address(&random_key(), Network::Regtest);

        let transaction = sweep(&[utxo(50_000)], &key, &to, 20_000).unwrap();

        // sig push + pubkey push
        assert!(!transaction.input[0].script_sig.is_empty());
        assert!(transaction.input[0].script_sig.len() > 65);
    }

    #[test]
    fn send_refuses_an_underfunded_payout() {
        let key = random_key();
        let to = key_address(&key, Network::Regtest);

        assert!(send(
            &[utxo(25_000)],
            &key,
            &to,
            10_000,
            20_000,
            Network::Regtest
        )
        .is_err());
    }
}
