//! The two thin HTTP front-ends.
//!
//! They own no state and make no decisions: every request is translated
//! into one RPC call and the answer into JSON or HTML. Uploads are capped
//! at 10 KiB before any body is read; tokens are about a kilobyte, and
//! nobody gets to stream us a cat GIF.

use anyhow::Result;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use tumbler::services::{BondRedeemerClient, GenQuoteClient, IssueProtobondClient};
use tumbler::{Bond, MintError, ProtobondStatus, Token};
use warp::http::StatusCode;
use warp::{Buf, Filter, Rejection, Reply};

const MAX_UPLOAD_BYTES: u64 = 10 * 1024;

pub async fn run_seller(root: &Path, port: u16) -> Result<()> {
    let gen_quote = Arc::new(GenQuoteClient::connect(root).await?);
    let issue = Arc::new(IssueProtobondClient::connect(root).await?);

    tracing::info!(port, "seller front-end up");
    warp::serve(seller_routes(gen_quote, issue))
        .run(([127, 0, 0, 1], port))
        .await;

    Ok(())
}

pub async fn run_redeemer(root: &Path, port: u16) -> Result<()> {
    let redeemer = Arc::new(BondRedeemerClient::connect(root).await?);

    tracing::info!(port, "redeemer front-end up");
    warp::serve(redeemer_routes(redeemer))
        .run(([127, 0, 0, 1], port))
        .await;

    Ok(())
}

pub fn seller_routes(
    gen_quote: Arc<GenQuoteClient>,
    issue: Arc<IssueProtobondClient>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let connect = warp::path("connect")
        .and(warp::path::end())
        .and(warp::post())
        .map(|| warp::reply::json(&json!({ "success": true })));

    let quote = warp::path("quote")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_UPLOAD_BYTES))
        .and(warp::body::form::<HashMap<String, String>>())
        .and(with(gen_quote))
        .and_then(quote_handler);

    let protobond = warp::path("protobond")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_UPLOAD_BYTES))
        .and(warp::body::form::<HashMap<String, String>>())
        .and(with(issue))
        .and_then(protobond_handler);

    connect.or(quote).or(protobond).recover(handle_rejection)
}

pub fn redeemer_routes(
    redeemer: Arc<BondRedeemerClient>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .map(|| warp::reply::html(REDEEMER_PAGE));

    let bond = warp::path("bond")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_UPLOAD_BYTES))
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and(with(redeemer))
        .and_then(bond_handler);

    index.or(bond).recover(handle_rejection)
}

fn with<T>(
    value: Arc<T>,
) -> impl Filter<Extract = (Arc<T>,), Error = Infallible> + Clone
where
    T: Send + Sync,
{
    warp::any().map(move || value.clone())
}

async fn quote_handler(
    form: HashMap<String, String>,
    client: Arc<GenQuoteClient>,
) -> Result<warp::reply::Json, Infallible> {
    let token = match form.get("token") {
        Some(token) => Token::from(token.as_str()),
        None => return Ok(warp::reply::json(&json!({ "error": "missing token" }))),
    };

    let reply = match client.gen_quote(&token).await {
        Ok(quote) => json!({
            "token": token.as_str(),
            "addr": quote.address,
            "price": quote.price,
        }),
        Err(e) => json!({ "error": e.to_string() }),
    };

    Ok(warp::reply::json(&reply))
}

async fn protobond_handler(
    form: HashMap<String, String>,
    client: Arc<IssueProtobondClient>,
) -> Result<warp::reply::Json, Infallible> {
    let token = match form.get("token") {
        Some(token) => Token::from(token.as_str()),
        None => return Ok(warp::reply::json(&json!({ "error": "missing token" }))),
    };

    let status = match client.issue_protobond(&token).await {
        Ok(protobond) => ProtobondStatus::Ready(protobond),
        // Not paid yet is not an error to the polling client.
        Err(MintError::Unpaid) => ProtobondStatus::Pending,
        Err(e) => return Ok(warp::reply::json(&json!({ "error": e.to_string() }))),
    };

    let reply = match status {
        ProtobondStatus::Ready(protobond) => json!({ "protobond": protobond.as_str() }),
        ProtobondStatus::Pending => json!({ "protobond": null }),
    };

    Ok(warp::reply::json(&reply))
}

async fn bond_handler(
    form: warp::multipart::FormData,
    client: Arc<BondRedeemerClient>,
) -> Result<warp::reply::WithStatus<warp::reply::Html<String>>, Infallible> {
    let fields = match read_form(form).await {
        Ok(fields) => fields,
        Err(_) => return Ok(page(StatusCode::BAD_REQUEST, "The upload was malformed.")),
    };

    let bond = match fields.get("bond_file") {
        Some(bytes) => Bond::from(String::from_utf8_lossy(bytes).trim()),
        None => return Ok(page(StatusCode::BAD_REQUEST, "No bond file attached.")),
    };
    let to_addr = match fields.get("to_addr") {
        Some(bytes) => String::from_utf8_lossy(bytes).trim().to_owned(),
        None => return Ok(page(StatusCode::BAD_REQUEST, "No payout address given.")),
    };

    match client.bond_redeem(&bond, &to_addr).await {
        Ok(()) => Ok(page(
            StatusCode::OK,
            "Bond accepted. Your payout is on its way.",
        )),
        Err(e) => Ok(page(StatusCode::BAD_REQUEST, &e.to_string())),
    }
}

async fn read_form(form: warp::multipart::FormData) -> Result<HashMap<String, Vec<u8>>> {
    use futures::TryStreamExt;

    let parts: Vec<warp::multipart::Part> = form.try_collect().await?;
    let mut fields = HashMap::new();

    for part in parts {
        let name = part.name().to_owned();
        let value = part
            .stream()
            .try_fold(Vec::new(), |mut acc, mut buf| async move {
                while buf.has_remaining() {
                    let chunk = buf.chunk();
                    acc.extend_from_slice(chunk);
                    let advanced = chunk.len();
                    buf.advance(advanced);
                }
                Ok(acc)
            })
            .await?;
        fields.insert(name, value);
    }

    Ok(fields)
}

fn page(status: StatusCode, message: &str) -> warp::reply::WithStatus<warp::reply::Html<String>> {
    warp::reply::with_status(
        warp::reply::html(format!(
            "<!doctype html><html><body><p>{}</p><a href=\"/\">Back</a></body></html>",
            message
        )),
        status,
    )
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Rejection> {
    if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(warp::reply::with_status(
            "The upload was too large.".to_owned(),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }

    Err(rejection)
}

const REDEEMER_PAGE: &str = r#"<!doctype html>
<html>
  <body>
    <h1>Redeem a bond</h1>
    <form action="/bond" method="post" enctype="multipart/form-data">
      <label>Bond file: <input type="file" name="bond_file"></label>
      <label>Payout address: <input type="text" name="to_addr"></label>
      <input type="submit" value="Redeem">
    </form>
  </body>
</html>
"#;
