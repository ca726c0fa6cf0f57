#![warn(
    unused_extern_crates,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::fallible_impl_from,
    clippy::dbg_macro
)]
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![forbid(unsafe_code)]

mod api;

use crate::api::{http_client, RedeemerApi, SellerApi};
use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;
use tumbler::blind::{gen_token, unblind};
use tumbler::verify::verify;
use tumbler::{Bond, Params, ProtobondStatus};

const BASE_URL: &str = "http://wringr4xxsgccsbec.onion/";
const REDEEMER_URL: &str = "http://wringr5redeemdndq.onion/";
const MOCK_BASE_URL: &str = "http://127.0.0.1:9001/";
const MOCK_REDEEMER_URL: &str = "http://127.0.0.1:9002/";

/// Time to wait between checks for the protobond.
const CHECK_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, StructOpt)]
#[structopt(name = "wringer", about = "Buy and redeem anonymous Bitcoin bonds")]
struct Opt {
    /// Do not write the bond to a .bond file; print it instead.
    #[structopt(long)]
    nosave: bool,

    /// Talk to a mint on localhost instead of the real one.
    #[structopt(long)]
    mock: bool,

    /// Skip the Tor SOCKS5 proxy. Your peering choices are your own.
    #[structopt(long)]
    bypasstor: bool,

    /// PEM file holding the mint's signing public key.
    #[structopt(long, default_value = "signing_public_key.pem", parse(from_os_str))]
    signing_public_key: PathBuf,

    /// PEM file holding the mint's OAEP keypair.
    #[structopt(long, default_value = "oaep_key.pem", parse(from_os_str))]
    oaep_key: PathBuf,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Generate a token, pay for it, and turn the protobond into a bond.
    Buy,
    /// Upload a bond for payout to an address of yours.
    Redeem {
        /// The .bond file to redeem.
        #[structopt(parse(from_os_str))]
        bond: PathBuf,

        /// The Bitcoin address the payout should go to.
        #[structopt(long = "to")]
        to_addr: String,
    },
}

fn main() {
    if let Err(e) = run() {
        println!("FAIL");
        println!();
        println!("{:#}", e);
        println!();
        std::process::exit(2);
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let opt = Opt::from_args();
    let params = load_params(&opt)?;
    let client = http_client(opt.bypasstor)?;

    match opt.command {
        Command::Buy => {
            let base_url = if opt.mock { MOCK_BASE_URL } else { BASE_URL };
            buy(&params, SellerApi::new(base_url, client), !opt.nosave, opt.mock).await
        }
        Command::Redeem { bond, to_addr } => {
            let base_url = if opt.mock {
                MOCK_REDEEMER_URL
            } else {
                REDEEMER_URL
            };
            redeem(&params, RedeemerApi::new(base_url, client), &bond, &to_addr).await
        }
    }
}

fn load_params(opt: &Opt) -> Result<Params> {
    let signing_public = std::fs::read_to_string(&opt.signing_public_key)
        .with_context(|| format!("could not read {}", opt.signing_public_key.display()))?;
    let oaep = std::fs::read_to_string(&opt.oaep_key)
        .with_context(|| format!("could not read {}", opt.oaep_key.display()))?;

    Params::from_pem(&signing_public, &oaep)
}

async fn buy(params: &Params, seller: SellerApi, save: bool, mock: bool) -> Result<()> {
    println!();
    println!("Now running: the wringer client");
    if mock {
        println!("ENTERING MOCK MODE");
    }

    printf("Testing connection to the mint.....");
    seller.connect().await?;
    println!("Done.");

    printf("Generating token.....");
    let (token, secret) = gen_token(params, &mut rand::rngs::OsRng)?;
    println!("Done.");

    printf("Sending token to server.....");
    let (addr, price) = seller.quote(&token).await?;
    println!("Done.");

    println!();
    println!("You have successfully submitted a token to the server.");
    println!(
        "To purchase the bond, please send {} satoshi to this address: {}",
        price, addr
    );
    println!();
    println!(
        "Checking for protobond every {} seconds:",
        CHECK_PERIOD.as_secs()
    );

    let protobond = loop {
        match seller.protobond(&token).await? {
            ProtobondStatus::Ready(protobond) => break protobond,
            ProtobondStatus::Pending => {
                printf("Bitcoin not yet received. Waiting.....");
                for _ in 0..CHECK_PERIOD.as_secs() {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    printf(".");
                }
                println!();
            }
        }
    };
    println!("Transaction cleared!");
    println!();

    printf("Generating bond.....");
    // Unblinding consumes the nonce inverse; nothing linking the token to
    // the bond survives this call.
    let bond = unblind(params, &protobond, secret)?;
    println!("Done.");

    printf("Validating bond.....");
    verify(params, &bond).map_err(|e| anyhow!("not a valid bond: {}", e))?;
    println!("Done.");

    println!();
    if save {
        printf("Saving bond.....");
        let filename = save_bond(&bond, mock)?;
        println!("Done.");
        println!();
        println!("Congrats! You have successfully purchased a bond. It has been stored here:");
        println!();
        println!("{}", filename.display());
    } else {
        println!("Congrats! You have successfully purchased a bond. Here it is:");
        println!();
        println!("{}", bond);
    }
    println!();
    println!("Remember to wait a few days before trying to redeem your bond.");
    println!();

    Ok(())
}

async fn redeem(
    params: &Params,
    redeemer: RedeemerApi,
    bond_file: &std::path::Path,
    to_addr: &str,
) -> Result<()> {
    let contents = std::fs::read_to_string(bond_file)
        .with_context(|| format!("could not read {}", bond_file.display()))?;
    let bond = Bond::from(contents.trim());

    printf("Validating bond.....");
    verify(params, &bond).map_err(|e| anyhow!("not a valid bond: {}", e))?;
    println!("Done.");

    printf("Submitting bond for redemption.....");
    redeemer.redeem(&bond, to_addr).await?;
    println!("Done.");

    println!();
    println!("The mint accepted the bond. Your payout will arrive at {}.", to_addr);
    println!();

    Ok(())
}

/// Store the bond under a random 16-byte hex filename with a .bond
/// extension and return the absolute path.
fn save_bond(bond: &Bond, mock: bool) -> Result<PathBuf> {
    let mut random = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut random);

    let mut filename = hex::encode_upper(random) + ".bond";
    if mock {
        filename = format!("mock-{}", filename);
    }

    std::fs::write(&filename, bond.as_str()).context("could not write the bond file")?;

    Ok(std::env::current_dir()?.join(filename))
}

/// Print without the automatic newline.
fn printf(s: &str) {
    print!("{}", s);
    let _ = std::io::stdout().flush();
}
