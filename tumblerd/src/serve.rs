//! `tumblerd serve <Service>`: run one RPC service on its socket.
//!
//! Each arm only constructs what its principal is allowed to touch: the
//! signer loads the signing key and nothing else, the quote generator gets
//! a DB stub and the master *public* key, and so on. Connecting to a
//! socket we were not granted fails at the filesystem, not here.

use crate::dirs::Dirs;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tumbler::bitcoin::Network;
use tumbler::chain::EsploraClient;
use tumbler::db::{RedeemerDb, SellerDb};
use tumbler::redeemer::BondRedeemer;
use tumbler::rpc::{serve, socket_path};
use tumbler::seller::{GenQuote, IssueProtobond};
use tumbler::services::{
    service_name, BondRedeemerService, CheckClient, CheckService, GenQuoteService,
    IssueProtobondService, RedeemerDbService, SellerDbClient, SellerDbService, SignClient,
    SignService,
};

pub async fn run_service(
    dirs: &Dirs,
    service: &str,
    network: Network,
    esplora_url: &str,
) -> Result<()> {
    let root = dirs.root();
    let sock = socket_path(root, service);

    match service {
        service_name::SELLER_DB => {
            let db = SellerDb::open(&dirs.seller_db())?;
            serve(&sock, Arc::new(SellerDbService::new(db))).await
        }
        service_name::REDEEMER_DB => {
            let db = RedeemerDb::open(&dirs.redeemer_db())?;
            serve(&sock, Arc::new(RedeemerDbService::new(db))).await
        }
        service_name::SIGN => {
            let key = dirs.signing_key()?;
            serve(&sock, Arc::new(SignService::new(key))).await
        }
        service_name::CHECK => {
            let chain = EsploraClient::new(esplora_url);
            serve(&sock, Arc::new(CheckService::new(chain))).await
        }
        service_name::GEN_QUOTE => {
            let store = SellerDbClient::connect(root)
                .await
                .context("GenQuote needs the SellerDB socket")?;
            let mpk = dirs.master_public_key()?;
            let gen_quote = GenQuote::new(store, mpk, network);
            serve(&sock, Arc::new(GenQuoteService::new(gen_quote))).await
        }
        service_name::ISSUE_PROTOBOND => {
            let store = SellerDbClient::connect(root)
                .await
                .context("IssueProtobond needs the SellerDB socket")?;
            let check = CheckClient::connect(root)
                .await
                .context("IssueProtobond needs the Check socket")?;
            let sign = SignClient::connect(root)
                .await
                .context("IssueProtobond needs the Sign socket")?;
            let issue = IssueProtobond::new(store, check, sign);
            serve(&sock, Arc::new(IssueProtobondService::new(issue))).await
        }
        service_name::BOND_REDEEMER => {
            let params = Arc::new(dirs.params()?);
            let store = tumbler::services::RedeemerDbClient::connect(root)
                .await
                .context("BondRedeemer needs the RedeemerDB socket")?;
            let redeemer = BondRedeemer::new(params, store, network);
            serve(&sock, Arc::new(BondRedeemerService::new(redeemer))).await
        }
        other => bail!("unknown service: {}", other),
    }
}
