//! Harness for the end-to-end tests: shared protocol keys, an in-memory
//! chain, and helpers to bring up the RPC services inside a scratch jail.

use anyhow::Result;
use async_trait::async_trait;
use conquer_once::Lazy;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tumbler::bitcoin::{Address, Network, Transaction, Txid};
use tumbler::chain::{Blockchain, Utxo};
use tumbler::rpc::{serve, socket_path, wait_for_socket, Handler};
use tumbler::sign::SigningKey;
use tumbler::wallet::MasterPrivateKey;
use tumbler::Params;

/// 2048-bit keys keep the OAEP block at 256 bytes; the envelope fits with
/// 24 bytes of x entropy. Protocol-identical to production otherwise.
pub const TEST_X_ENTROPY_BYTES: usize = 24;

pub const NETWORK: Network = Network::Regtest;

static SIGNING_KEY: Lazy<RsaPrivateKey> = Lazy::new(|| {
    RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).expect("failed to generate RSA key")
});

static OAEP_KEY: Lazy<RsaPrivateKey> = Lazy::new(|| {
    RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).expect("failed to generate RSA key")
});

pub fn params() -> Params {
    let public = RsaPublicKey::from(&*SIGNING_KEY);

    Params::new(&public, OAEP_KEY.clone(), TEST_X_ENTROPY_BYTES)
        .expect("envelope fits the OAEP block")
}

pub fn signing_key() -> SigningKey {
    SigningKey::new(&SIGNING_KEY)
}

pub fn master_key() -> MasterPrivateKey {
    let mut bytes = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);

    MasterPrivateKey::from_hex(&hex::encode(bytes)).expect("random bytes make a key")
}

/// Bring up one RPC service in the jail at `root` and wait for its socket.
pub async fn start_service(root: &Path, name: &str, handler: Arc<dyn Handler>) {
    let path = socket_path(root, name);
    std::fs::create_dir_all(path.parent().expect("sock has a parent")).expect("mkdir rpc dir");

    let server_path = path.clone();
    tokio::spawn(async move { serve(&server_path, handler).await });

    wait_for_socket(&path, Duration::from_secs(5))
        .await
        .expect("service came up");
}

/// An in-memory chain with fundable balances.
#[derive(Clone, Debug, Default)]
pub struct FakeChain {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    utxos: Mutex<HashMap<String, Vec<Utxo>>>,
    broadcasts: Mutex<Vec<Transaction>>,
    counter: AtomicU64,
}

impl FakeChain {
    pub fn fund(&self, address: &Address, value: u64) {
        let n = self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let txid = Txid::from_str(&format!("{:064x}", n)).expect("64 hex chars");

        self.inner
            .utxos
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push(Utxo {
                txid,
                vout: 0,
                value,
            });
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.inner.broadcasts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Blockchain for FakeChain {
    async fn unspent(&self, address: &Address) -> Result<Vec<Utxo>> {
        Ok(self
            .inner
            .utxos
            .lock()
            .unwrap()
            .get(&address.to_string())
            .cloned()
            .unwrap_or_default())
    }

    async fn broadcast(&self, transaction: Transaction) -> Result<Txid> {
        let txid = transaction.txid();
        self.inner.broadcasts.lock().unwrap().push(transaction);

        Ok(txid)
    }
}
