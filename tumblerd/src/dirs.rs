//! The jail layout.
//!
//! Every long-term secret lives in its own directory under `data/`, one
//! file per directory, so that directory traversal alone decides who can
//! read what. Sockets live under `rpc/<Service>/sock` the same way.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tumbler::bitcoin::secp256k1::SecretKey;
use tumbler::bitcoin::{Address, Network};
use tumbler::sign::SigningKey;
use tumbler::wallet::{MasterPrivateKey, MasterPublicKey};
use tumbler::Params;

#[derive(Clone, Debug)]
pub struct Dirs {
    root: PathBuf,
}

impl Dirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn seller_db(&self) -> PathBuf {
        self.root.join("data").join("seller_database")
    }

    pub fn redeemer_db(&self) -> PathBuf {
        self.root.join("data").join("redeemer_database")
    }

    fn read(&self, name: &str, extension: &str) -> Result<String> {
        let path = self
            .root
            .join("data")
            .join(name)
            .join(format!("{}.{}", name, extension));

        std::fs::read_to_string(&path)
            .with_context(|| format!("could not read {}", path.display()))
    }

    pub fn signing_key(&self) -> Result<SigningKey> {
        SigningKey::from_pkcs8_pem(&self.read("signing_private_key", "pem")?)
    }

    pub fn params(&self) -> Result<Params> {
        Params::from_pem(
            &self.read("signing_public_key", "pem")?,
            &self.read("oaep_key", "pem")?,
        )
    }

    pub fn master_public_key(&self) -> Result<MasterPublicKey> {
        MasterPublicKey::from_hex(self.read("collector_master_public_key", "txt")?.trim())
            .context("master public key is not valid hex")
    }

    pub fn master_private_key(&self) -> Result<MasterPrivateKey> {
        MasterPrivateKey::from_hex(self.read("collector_master_private_key", "txt")?.trim())
            .context("master private key is not valid hex")
    }

    pub fn dispenser_key(&self) -> Result<SecretKey> {
        use tumbler::bitcoin::hashes::hex::FromHex;

        let hex_str = self.read("dispenser_private_key", "txt")?;
        let bytes = Vec::<u8>::from_hex(hex_str.trim()).context("dispenser key is not valid hex")?;

        SecretKey::from_slice(&bytes).context("dispenser key is not a valid secp256k1 key")
    }

    pub fn mixin_address(&self, network: Network) -> Result<Address> {
        let contents = self.read("mixin_address", "txt")?;

        tumbler::redeemer::valid_address(contents.trim(), network)
            .context("mixin address does not parse for this network")
    }
}
