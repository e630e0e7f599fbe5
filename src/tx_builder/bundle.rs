//! Bundle assembly and relay submission
//!
//! A bundle is an ordered set of signed legs that the relay lands in one
//! block or not at all. This module owns the three rules the relay cannot
//! check for us:
//! - every leg references the same recent blockhash
//! - the tip leg is last
//! - there are at most [`MAX_BUNDLE_TRANSACTIONS`] legs
//!
//! Submission goes through the [`BundleRelay`] trait. `JitoRelayClient` is the
//! block-engine JSON-RPC implementation.

use crate::tx_builder::{
    errors::BundleError,
    output::{LegKind, LegOutput},
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use solana_sdk::hash::Hash;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Largest bundle the relay accepts
pub const MAX_BUNDLE_TRANSACTIONS: usize = 5;

/// Opaque handle returned by the relay for a submitted bundle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BundleId(String);

impl BundleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a submitted bundle as seen by this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleStatus {
    /// Accepted by the relay, not polled yet
    Submitted,
    /// Polled, relay has nothing to report yet
    NotYetVisible,
    /// Relay reported a status payload
    Landed,
    /// Polling exhausted without a landing signal
    Failed,
}

impl BundleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleStatus::Submitted => "submitted",
            BundleStatus::NotYetVisible => "not_yet_visible",
            BundleStatus::Landed => "landed",
            BundleStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BundleStatus::Landed | BundleStatus::Failed)
    }
}

impl fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, immutable bundle
#[derive(Debug, Clone)]
pub struct Bundle {
    legs: Vec<LegOutput>,
    blockhash: Hash,
}

impl Bundle {
    pub fn legs(&self) -> &[LegOutput] {
        &self.legs
    }

    pub fn len(&self) -> usize {
        self.legs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub fn blockhash(&self) -> Hash {
        self.blockhash
    }

    /// The trailing tip leg
    pub fn tip(&self) -> Option<&LegOutput> {
        self.legs.last().filter(|leg| leg.kind == LegKind::Tip)
    }

    /// Wire encoding of every leg, in bundle order
    pub fn encoded(&self) -> Result<Vec<String>, BundleError> {
        self.legs.iter().map(LegOutput::encode).collect()
    }
}

/// Append-only builder for a [`Bundle`]
///
/// Trade legs are pushed as they are composed; `finish` appends the tip and
/// freezes the bundle. One slot is always held back for the tip.
#[derive(Debug)]
pub struct BundleAssembler {
    blockhash: Hash,
    legs: Vec<LegOutput>,
    max_transactions: usize,
}

impl BundleAssembler {
    pub fn new(blockhash: Hash) -> Self {
        Self::with_capacity(blockhash, MAX_BUNDLE_TRANSACTIONS)
    }

    pub fn with_capacity(blockhash: Hash, max_transactions: usize) -> Self {
        Self {
            blockhash,
            legs: Vec::with_capacity(max_transactions),
            max_transactions,
        }
    }

    pub fn trade_count(&self) -> usize {
        self.legs.len()
    }

    /// Room left for trade legs
    pub fn remaining_trade_slots(&self) -> usize {
        self.max_transactions
            .saturating_sub(1)
            .saturating_sub(self.legs.len())
    }

    fn check_blockhash(&self, leg: &LegOutput, index: usize) -> Result<(), BundleError> {
        let found = leg.blockhash();
        if found != self.blockhash {
            return Err(BundleError::BlockhashMismatch {
                index,
                expected: self.blockhash.to_string(),
                found: found.to_string(),
            });
        }
        Ok(())
    }

    /// Append a buy or sell leg
    pub fn push_trade(&mut self, leg: LegOutput) -> Result<(), BundleError> {
        if !leg.kind.is_trade() {
            return Err(BundleError::internal(
                "tip leg must be added through finish()",
            ));
        }
        if self.remaining_trade_slots() == 0 {
            return Err(BundleError::BundleSize {
                len: self.legs.len() + 2,
                max: self.max_transactions,
            });
        }
        self.check_blockhash(&leg, self.legs.len())?;
        self.legs.push(leg);
        Ok(())
    }

    /// Append the tip leg last and freeze the bundle
    pub fn finish(mut self, tip: LegOutput) -> Result<Bundle, BundleError> {
        if tip.kind != LegKind::Tip {
            return Err(BundleError::MissingTip);
        }
        if self.legs.is_empty() {
            return Err(BundleError::EmptyBundle);
        }
        self.check_blockhash(&tip, self.legs.len())?;
        self.legs.push(tip);

        Ok(Bundle {
            legs: self.legs,
            blockhash: self.blockhash,
        })
    }
}

/// Block-engine relay
#[async_trait]
pub trait BundleRelay: Send + Sync {
    /// Submit encoded transactions as one bundle, returns the relay's id
    async fn send_bundle(&self, transactions: &[String]) -> Result<BundleId, BundleError>;

    /// Landed status payload, `None` while the relay has nothing to report
    async fn get_bundle_status(&self, bundle_id: &BundleId) -> Result<Option<Value>, BundleError>;

    /// In-flight status payload, `None` while the relay has nothing to report
    async fn get_inflight_status(&self, bundle_id: &BundleId) -> Result<Option<Value>, BundleError>;
}

/// JSON-RPC client for the block-engine bundles endpoint
pub struct JitoRelayClient {
    client: reqwest::Client,
    url: String,
    request_id: u64,
}

impl JitoRelayClient {
    pub fn new(url: impl Into<String>, request_id: u64, timeout: Duration) -> Result<Self, BundleError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BundleError::relay(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            request_id,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one JSON-RPC call and return its `result` member
    async fn call(&self, method: &str, params: Value) -> Result<Value, BundleError> {
        let request_body = json!({
            "jsonrpc": "2.0",
            "id": self.request_id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| BundleError::relay(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(BundleError::relay(format!(
                "{} returned {}: {}",
                method, status, error_body
            )));
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|e| BundleError::relay(format!("{} returned invalid JSON: {}", method, e)))?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(BundleError::relay(format!("{} rejected: {}", method, error)));
        }

        match body.get_mut("result").map(Value::take) {
            Some(result) if !result.is_null() => Ok(result),
            _ => Err(BundleError::relay(format!("{} response has no result", method))),
        }
    }

    /// Non-null entries of `result.value`, `None` when there are none
    fn status_entries(result: &Value) -> Option<Value> {
        let entries: Vec<Value> = result
            .get("value")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter(|v| !v.is_null()).cloned().collect())
            .unwrap_or_default();

        if entries.is_empty() {
            None
        } else {
            Some(Value::Array(entries))
        }
    }
}

#[async_trait]
impl BundleRelay for JitoRelayClient {
    async fn send_bundle(&self, transactions: &[String]) -> Result<BundleId, BundleError> {
        let result = self.call("sendBundle", json!([transactions])).await?;
        let id = result
            .as_str()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BundleError::relay("sendBundle response has no bundle id"))?;
        Ok(BundleId::new(id))
    }

    async fn get_bundle_status(&self, bundle_id: &BundleId) -> Result<Option<Value>, BundleError> {
        let result = self
            .call("getBundleStatuses", json!([[bundle_id.as_str()]]))
            .await?;
        Ok(Self::status_entries(&result))
    }

    async fn get_inflight_status(&self, bundle_id: &BundleId) -> Result<Option<Value>, BundleError> {
        let result = self
            .call("getInflightBundleStatuses", json!([[bundle_id.as_str()]]))
            .await?;
        Ok(Self::status_entries(&result))
    }
}

/// Validates a bundle locally and hands it to the relay exactly once
pub struct BundleSubmitter<'a> {
    relay: &'a dyn BundleRelay,
}

impl<'a> BundleSubmitter<'a> {
    pub fn new(relay: &'a dyn BundleRelay) -> Self {
        Self { relay }
    }

    /// Submit encoded transactions in order
    ///
    /// # Errors
    ///
    /// `EmptyBundle`, `BundleSize` and `Encoding` are raised locally, before
    /// any request. Relay failures pass through; the submitter never retries.
    pub async fn submit(&self, transactions: &[String]) -> Result<BundleId, BundleError> {
        validate_encoded(transactions)?;

        debug!(transactions = transactions.len(), "Submitting bundle");
        let bundle_id = self.relay.send_bundle(transactions).await.map_err(|e| {
            warn!(error = %e, "Bundle submission failed");
            e
        })?;

        info!(bundle_id = %bundle_id, transactions = transactions.len(), "Bundle submitted");
        Ok(bundle_id)
    }

    /// Encode and submit a validated bundle
    pub async fn submit_bundle(&self, bundle: &Bundle) -> Result<BundleId, BundleError> {
        let encoded = bundle.encoded()?;
        self.submit(&encoded).await
    }
}

/// Size and encoding checks applied before a bundle leaves the process
pub fn validate_encoded(transactions: &[String]) -> Result<(), BundleError> {
    if transactions.is_empty() {
        return Err(BundleError::EmptyBundle);
    }
    if transactions.len() > MAX_BUNDLE_TRANSACTIONS {
        return Err(BundleError::BundleSize {
            len: transactions.len(),
            max: MAX_BUNDLE_TRANSACTIONS,
        });
    }
    if let Some(index) = transactions
        .iter()
        .position(|tx| tx.is_empty() || bs58::decode(tx).into_vec().is_err())
    {
        return Err(BundleError::Encoding { index });
    }
    Ok(())
}
