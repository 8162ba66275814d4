use crate::domain::keyspace::Account;
use crate::domain::payment::RawAmount;
use crate::domain::ports::LedgerClient;
use crate::domain::transfer::{BlockHash, Cursor, IncomingTransfer};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const RECEIVABLE_COUNT: &str = "64";

/// Ledger node reached over its JSON-RPC endpoint.
///
/// Queries the node's receivable set for the account. That set has no
/// stable order, so the `since` cursor only drops the one entry it names.
/// Every other entry is returned on each query and the scheduler
/// deduplicates them by block hash.
#[derive(Clone)]
pub struct NodeRpcClient {
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ReceivableEntry {
    amount: String,
}

impl NodeRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

/// Maps a `receivable` response body to transfers.
fn parse_receivable(body: &Value) -> Result<Vec<IncomingTransfer>> {
    if let Some(error) = body.get("error").and_then(Value::as_str) {
        // Never-opened accounts are reported as errors by some nodes
        if error.eq_ignore_ascii_case("account not found") {
            return Ok(Vec::new());
        }
        return Err(GatewayError::UpstreamUnavailable(format!(
            "ledger node error: {error}"
        )));
    }

    let blocks = match body.get("blocks") {
        Some(Value::Object(blocks)) => blocks,
        // The node answers `"blocks": ""` when there is nothing receivable
        Some(Value::String(_)) | None => return Ok(Vec::new()),
        Some(other) => {
            return Err(GatewayError::UpstreamUnavailable(format!(
                "unexpected blocks payload: {other}"
            )));
        }
    };

    blocks
        .iter()
        .map(|(hash, entry)| {
            let entry: ReceivableEntry = serde_json::from_value(entry.clone())
                .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
            let amount = entry.amount.parse::<u128>().map_err(|e| {
                GatewayError::UpstreamUnavailable(format!("bad amount {}: {e}", entry.amount))
            })?;
            Ok(IncomingTransfer {
                amount: RawAmount(amount),
                block_hash: BlockHash(hash.clone()),
                cursor: Cursor(hash.clone()),
            })
        })
        .collect()
}

/// Drops the entry named by `since`.
///
/// Entries come back keyed by block hash, not by arrival, so a new
/// transfer may sort before the cursor and must still be returned.
fn skip_cursor(
    mut transfers: Vec<IncomingTransfer>,
    since: Option<&Cursor>,
) -> Vec<IncomingTransfer> {
    if let Some(cursor) = since {
        transfers.retain(|t| &t.cursor != cursor);
    }
    transfers
}

#[async_trait]
impl LedgerClient for NodeRpcClient {
    async fn query_incoming(
        &self,
        account: &Account,
        since: Option<&Cursor>,
    ) -> Result<Vec<IncomingTransfer>> {
        let request = json!({
            "action": "receivable",
            "account": account.as_str(),
            "count": RECEIVABLE_COUNT,
            "source": "true",
        });
        let body: Value = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let transfers = skip_cursor(parse_receivable(&body)?, since);
        debug!(account = %account, found = transfers.len(), "queried receivable blocks");
        Ok(transfers)
    }
}
