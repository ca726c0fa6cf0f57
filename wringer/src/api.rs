//! HTTP bindings to the seller and redeemer front-ends.
//!
//! All traffic goes through Tor's SOCKS5 proxy unless explicitly bypassed;
//! `socks5h` keeps DNS resolution inside the proxy so onion addresses work
//! and nothing leaks.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tumbler::{Bond, Protobond, ProtobondStatus, Token};

const TOR_PROXY: &str = "socks5h://127.0.0.1:9150";

pub fn http_client(bypass_tor: bool) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if !bypass_tor {
        builder = builder.proxy(
            reqwest::Proxy::all(TOR_PROXY).context("could not configure the Tor proxy")?,
        );
    }

    builder.build().context("could not build the HTTP client")
}

#[derive(Debug)]
pub struct SellerApi {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    addr: Option<String>,
    price: Option<u64>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProtobondResponse {
    protobond: Option<String>,
    error: Option<String>,
}

impl SellerApi {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// Initial connectivity probe.
    pub async fn connect(&self) -> Result<()> {
        let response: ConnectResponse = self
            .client
            .post(&format!("{}connect", self.base_url))
            .form(&[("probe", "1")])
            .send()
            .await
            .context("unable to connect to the seller")?
            .json()
            .await
            .context("JSON error in returned data")?;

        if !response.success {
            bail!("the seller does not want to talk to us");
        }

        Ok(())
    }

    pub async fn quote(&self, token: &Token) -> Result<(String, u64)> {
        let response: QuoteResponse = self
            .client
            .post(&format!("{}quote", self.base_url))
            .form(&[("token", token.as_str())])
            .send()
            .await
            .context("unable to send the token to the seller")?
            .json()
            .await
            .context("JSON error in returned data")?;

        if let Some(error) = response.error {
            bail!("the seller rejected the token: {}", error);
        }

        match (response.addr, response.price) {
            (Some(addr), Some(price)) => Ok((addr, price)),
            _ => bail!("the seller sent an incomplete quote"),
        }
    }

    pub async fn protobond(&self, token: &Token) -> Result<ProtobondStatus> {
        let response: ProtobondResponse = self
            .client
            .post(&format!("{}protobond", self.base_url))
            .form(&[("token", token.as_str())])
            .send()
            .await
            .context("unable to check the seller for the protobond")?
            .json()
            .await
            .context("JSON error in returned data")?;

        if let Some(error) = response.error {
            bail!("the seller refused to issue a protobond: {}", error);
        }

        Ok(match response.protobond {
            Some(protobond) => ProtobondStatus::Ready(Protobond::from(protobond)),
            None => ProtobondStatus::Pending,
        })
    }
}

#[derive(Debug)]
pub struct RedeemerApi {
    base_url: String,
    client: reqwest::Client,
}

impl RedeemerApi {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    pub async fn redeem(&self, bond: &Bond, to_addr: &str) -> Result<()> {
        let form = reqwest::multipart::Form::new()
            .text("to_addr", to_addr.to_owned())
            .part(
                "bond_file",
                reqwest::multipart::Part::bytes(bond.as_str().as_bytes().to_vec())
                    .file_name("bond.bond"),
            );

        let response = self
            .client
            .post(&format!("{}bond", self.base_url))
            .multipart(form)
            .send()
            .await
            .context("unable to reach the redeemer")?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("the redeemer turned the bond down: {}", strip_tags(&body));
        }

        Ok(())
    }
}

/// The redeemer answers with tiny HTML pages; keep only the words.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }

    out.trim().to_owned()
}
