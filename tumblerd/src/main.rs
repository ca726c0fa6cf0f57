#![feature(setgroups)]
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

mod dirs;
mod http;
mod serve;
mod supervisor;

use crate::dirs::Dirs;
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;
use tumbler::chain::EsploraClient;
use tumbler::collector::Collector;
use tumbler::dispenser::Dispenser;
use tumbler::services::{parse_network, RedeemerDbClient, SellerDbClient};
use tumbler::{COLLECT_PERIOD_SECS, DISPENSE_PERIOD_SECS};

#[derive(Debug, StructOpt)]
#[structopt(name = "tumblerd", about = "A privilege-separated blind-signature bond mint")]
struct Opt {
    /// Jail root holding data/ and rpc/.
    #[structopt(long, default_value = ".", parse(from_os_str))]
    root: PathBuf,

    /// bitcoin, testnet, signet or regtest.
    #[structopt(long, default_value = "bitcoin")]
    network: String,

    /// Esplora API used for chain access.
    #[structopt(long, default_value = "https://blockstream.info/api")]
    esplora_url: String,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Print the UID/GID tables without launching anything.
    Permissions,
    /// Launch every component under its own identity. Needs root.
    Launch,
    /// Run a single RPC service on its socket.
    Serve { service: String },
    /// Serve the seller HTTP front-end.
    SellerHttp {
        #[structopt(long, default_value = "9001")]
        port: u16,
    },
    /// Serve the redeemer HTTP front-end.
    RedeemerHttp {
        #[structopt(long, default_value = "9002")]
        port: u16,
    },
    /// Sweep paid-for sale addresses into the mixing wallet.
    Collector,
    /// Pay out unfulfilled redemptions.
    Dispenser,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opt = Opt::from_args();
    let dirs = Dirs::new(&opt.root);
    let network = parse_network(&opt.network)?;

    match opt.command {
        Command::Permissions => {
            let plan = supervisor::plan(&dirs, &opt.network, &opt.esplora_url);
            supervisor::verify_plan(&plan)?;
            println!("{}", plan.format_tables());
        }
        Command::Launch => {
            let plan = supervisor::plan(&dirs, &opt.network, &opt.esplora_url);
            supervisor::verify_plan(&plan)?;
            plan.launch()?;
        }
        Command::Serve { service } => {
            serve::run_service(&dirs, &service, network, &opt.esplora_url).await?;
        }
        Command::SellerHttp { port } => {
            http::run_seller(dirs.root(), port).await?;
        }
        Command::RedeemerHttp { port } => {
            http::run_redeemer(dirs.root(), port).await?;
        }
        Command::Collector => {
            let chain = EsploraClient::new(&*opt.esplora_url);
            let store = SellerDbClient::connect(dirs.root()).await?;
            let master = dirs.master_private_key()?;
            let mixin = dirs.mixin_address(network)?;

            Collector::new(chain, store, master, mixin, network)
                .run(Duration::from_secs(COLLECT_PERIOD_SECS))
                .await?;
        }
        Command::Dispenser => {
            let chain = EsploraClient::new(&*opt.esplora_url);
            let store = RedeemerDbClient::connect(dirs.root()).await?;
            let key = dirs.dispenser_key()?;

            Dispenser::new(chain, store, key, network)
                .run(Duration::from_secs(DISPENSE_PERIOD_SECS))
                .await?;
        }
    }

    Ok(())
}
