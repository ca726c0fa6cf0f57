mod harness;

use harness::{master_key, params, signing_key, start_service, FakeChain, NETWORK};
use std::sync::Arc;
use tumbler::blind::{gen_token, unblind};
use tumbler::collector::Collector;
use tumbler::db::{RedeemerDb, SellerDb};
use tumbler::dispenser::Dispenser;
use tumbler::redeemer::{BondRedeemer, RedeemerStore};
use tumbler::seller::{GenQuote, IssueProtobond, SellerStore};
use tumbler::services::{
    service_name, BondRedeemerClient, BondRedeemerService, CheckClient, CheckService,
    GenQuoteClient, GenQuoteService, IssueProtobondClient, IssueProtobondService,
    RedeemerDbClient, RedeemerDbService, SellerDbClient, SellerDbService, SignClient,
    SignService,
};
use tumbler::verify::verify;
use tumbler::wallet::MasterPrivateKey;
use tumbler::{chain, Bond, MintError, Token, BOND_PRICE, BOND_VALUE, TX_FEE};

/// The seller side of the mint, served over real sockets in a scratch
/// jail, backed by an in-memory chain.
struct SellerMint {
    _jail: tempfile::TempDir,
    chain: FakeChain,
    master: MasterPrivateKey,
    gen_quote: GenQuoteClient,
    issue_protobond: IssueProtobondClient,
    seller_db: SellerDbClient,
}

async fn start_seller_mint() -> SellerMint {
    let jail = tempfile::tempdir().unwrap();
    let root = jail.path();
    let chain = FakeChain::default();
    let master = master_key();

    let db = SellerDb::open(&root.join("data").join("seller_database")).unwrap();
    start_service(
        root,
        service_name::SELLER_DB,
        Arc::new(SellerDbService::new(db)),
    )
    .await;

    start_service(
        root,
        service_name::SIGN,
        Arc::new(SignService::new(signing_key())),
    )
    .await;

    start_service(
        root,
        service_name::CHECK,
        Arc::new(CheckService::new(chain.clone())),
    )
    .await;

    let store = SellerDbClient::connect(root).await.unwrap();
    start_service(
        root,
        service_name::GEN_QUOTE,
        Arc::new(GenQuoteService::new(GenQuote::new(
            store,
            master.public(),
            NETWORK,
        ))),
    )
    .await;

    let store = SellerDbClient::connect(root).await.unwrap();
    let check = CheckClient::connect(root).await.unwrap();
    let sign = SignClient::connect(root).await.unwrap();
    start_service(
        root,
        service_name::ISSUE_PROTOBOND,
        Arc::new(IssueProtobondService::new(IssueProtobond::new(
            store, check, sign,
        ))),
    )
    .await;

    let gen_quote = GenQuoteClient::connect(root).await.unwrap();
    let issue_protobond = IssueProtobondClient::connect(root).await.unwrap();
    let seller_db = SellerDbClient::connect(root).await.unwrap();

    SellerMint {
        _jail: jail,
        chain,
        master,
        gen_quote,
        issue_protobond,
        seller_db,
    }
}

struct RedeemerMint {
    _jail: tempfile::TempDir,
    redeemer: BondRedeemerClient,
    redeemer_db: RedeemerDbClient,
}

async fn start_redeemer_mint() -> RedeemerMint {
    let jail = tempfile::tempdir().unwrap();
    let root = jail.path();

    let db = RedeemerDb::open(&root.join("data").join("redeemer_database")).unwrap();
    start_service(
        root,
        service_name::REDEEMER_DB,
        Arc::new(RedeemerDbService::new(db)),
    )
    .await;

    let store = RedeemerDbClient::connect(root).await.unwrap();
    start_service(
        root,
        service_name::BOND_REDEEMER,
        Arc::new(BondRedeemerService::new(BondRedeemer::new(
            Arc::new(params()),
            store,
            NETWORK,
        ))),
    )
    .await;

    let redeemer = BondRedeemerClient::connect(root).await.unwrap();
    let redeemer_db = RedeemerDbClient::connect(root).await.unwrap();
    RedeemerMint {
        _jail: jail,
        redeemer,
        redeemer_db,
    }
}

fn payout_address() -> String {
    chain::key_address(&master_key().derive_child(1).unwrap(), NETWORK).to_string()
}

/// Buy a bond against an already-running seller mint, funding the quoted
/// address along the way.
async fn buy_bond(mint: &SellerMint) -> (Token, Bond) {
    let params = params();
    let (token, secret) = gen_token(&params, &mut rand::rngs::OsRng).unwrap();

    let quote = mint.gen_quote.gen_quote(&token).await.unwrap();
    mint.chain
        .fund(&quote.address.parse().unwrap(), quote.price);

    let protobond = mint.issue_protobond.issue_protobond(&token).await.unwrap();
    let bond = unblind(&params, &protobond, secret).unwrap();

    (token, bond)
}

#[tokio::test]
async fn a_paid_token_becomes_a_valid_bond() {
    let mint = start_seller_mint().await;
    let params = params();
    let (token, secret) = gen_token(&params, &mut rand::rngs::OsRng).unwrap();

    let quote = mint.gen_quote.gen_quote(&token).await.unwrap();
    assert_eq!(quote.price, BOND_PRICE);

    mint.chain
        .fund(&quote.address.parse().unwrap(), BOND_PRICE);

    let protobond = mint.issue_protobond.issue_protobond(&token).await.unwrap();
    let bond = unblind(&params, &protobond, secret).unwrap();

    assert_eq!(verify(&params, &bond), Ok(()));

    let rows = mint.seller_db.rows_with_protobond_sent().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].token, token);
    assert_eq!(rows[0].protobond_sent, 1);
}

#[tokio::test]
async fn an_unpaid_token_gets_no_protobond() {
    let mint = start_seller_mint().await;
    let (token, _secret) = gen_token(&params(), &mut rand::rngs::OsRng).unwrap();

    mint.gen_quote.gen_quote(&token).await.unwrap();

    let result = mint.issue_protobond.issue_protobond(&token).await;

    assert_eq!(result, Err(MintError::Unpaid));
    let row = mint.seller_db.get(&token).await.unwrap().unwrap();
    assert_eq!(row.protobond_sent, 0);
    assert!(mint
        .seller_db
        .rows_with_protobond_sent()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn quotes_are_idempotent_per_token() {
    let mint = start_seller_mint().await;
    let (token, _secret) = gen_token(&params(), &mut rand::rngs::OsRng).unwrap();

    let one = mint.gen_quote.gen_quote(&token).await.unwrap();
    let two = mint.gen_quote.gen_quote(&token).await.unwrap();

    assert_eq!(one, two);

    // Still exactly one row behind the quote.
    let row = mint.seller_db.get(&token).await.unwrap().unwrap();
    assert_eq!(row.address, one.address);
    assert_eq!(row.protobond_sent, 0);
}

#[tokio::test]
async fn asking_for_a_protobond_with_an_unknown_token_fails() {
    let mint = start_seller_mint().await;
    let (token, _secret) = gen_token(&params(), &mut rand::rngs::OsRng).unwrap();

    let result = mint.issue_protobond.issue_protobond(&token).await;

    assert_eq!(result, Err(MintError::NoSuchToken));
}

#[tokio::test]
async fn a_bond_redeems_once_and_is_paid_out_by_the_dispenser() {
    let seller = start_seller_mint().await;
    let redeemer = start_redeemer_mint().await;
    let (_token, bond) = buy_bond(&seller).await;

    let addr_pay = payout_address();
    redeemer.redeemer.bond_redeem(&bond, &addr_pay).await.unwrap();

    // A second redemption, to a different address, bounces.
    let second = redeemer.redeemer.bond_redeem(&bond, &payout_address()).await;
    assert_eq!(second, Err(MintError::BondAlreadyUsed));

    let rows = redeemer.redeemer_db.unfulfilled_rows().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].address, addr_pay);

    // Fund the dispenser wallet and run one payout pass.
    let chain = FakeChain::default();
    let dispenser_key = master_key().derive_child(99).unwrap();
    chain.fund(&chain::key_address(&dispenser_key, NETWORK), 1_000_000);

    let dispenser = Dispenser::new(
        chain.clone(),
        RedeemerDbClient::connect(redeemer._jail.path()).await.unwrap(),
        dispenser_key,
        NETWORK,
    );
    dispenser.tick().await.unwrap();

    assert!(redeemer
        .redeemer_db
        .unfulfilled_rows()
        .await
        .unwrap()
        .is_empty());

    let broadcasts = chain.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].output[0].value, BOND_VALUE);
    let addr_pay: tumbler::bitcoin::Address = addr_pay.parse().unwrap();
    assert_eq!(
        broadcasts[0].output[0].script_pubkey,
        addr_pay.script_pubkey()
    );
}

#[tokio::test]
async fn a_forged_bond_is_rejected_and_leaves_no_trace() {
    let redeemer = start_redeemer_mint().await;
    let params = params();

    let forged = Bond::from_int(&num_bigint::RandBigInt::gen_biguint_below(
        &mut rand::rngs::OsRng,
        params.n(),
    ));

    let result = redeemer.redeemer.bond_redeem(&forged, &payout_address()).await;

    assert_eq!(result, Err(MintError::InvalidBond));
    assert!(redeemer
        .redeemer_db
        .unfulfilled_rows()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn the_collector_sweeps_a_finished_sale_into_the_mixing_wallet() {
    let mint = start_seller_mint().await;
    let (_token, _bond) = buy_bond(&mint).await;

    let mixin = chain::key_address(&master_key().derive_child(7).unwrap(), NETWORK);
    let collector = Collector::new(
        mint.chain.clone(),
        SellerDbClient::connect(mint._jail.path()).await.unwrap(),
        mint.master.clone(),
        mixin.clone(),
        NETWORK,
    );

    collector.tick().await.unwrap();

    let broadcasts = mint.chain.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].output.len(), 1);
    assert_eq!(broadcasts[0].output[0].value, BOND_PRICE - TX_FEE);
    assert_eq!(
        broadcasts[0].output[0].script_pubkey,
        mixin.script_pubkey()
    );
}

#[tokio::test]
async fn an_oversized_token_is_rejected_across_the_socket() {
    let mint = start_seller_mint().await;

    let oversized = Token::from("A".repeat(1373));

    assert_eq!(
        mint.gen_quote.gen_quote(&oversized).await,
        Err(MintError::BadToken)
    );
}
