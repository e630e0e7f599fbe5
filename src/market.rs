//! Instruction source for the bonding-curve market
//!
//! Price-curve math and instruction layout belong to the market maker. The
//! pipeline only asks for quotes and for the instructions of one trade, via
//! [`MarketMaker`]. `HttpMarketMaker` talks to an instruction service that
//! wraps the market maker's SDK over JSON.

use crate::tx_builder::BundleError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Buy,
    Sell,
}

/// Parameters of a single trade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeParams {
    pub direction: TradeDirection,
    /// Wallet that signs and pays for the trade
    pub owner: Pubkey,
    /// Token amount in base units
    pub token_amount: u64,
    /// Collateral amount in lamports
    pub collateral_amount: u64,
    pub slippage_bps: u16,
}

/// Quotes and instructions for one market
#[async_trait]
pub trait MarketMaker: Send + Sync {
    /// Tokens received for `collateral_lamports`
    async fn quote_buy(&self, collateral_lamports: u64) -> Result<u64, BundleError>;

    /// Lamports received for `token_amount`
    async fn quote_sell(&self, token_amount: u64) -> Result<u64, BundleError>;

    /// Instructions executing the trade, in execution order
    async fn build_instructions(&self, params: &TradeParams) -> Result<Vec<Instruction>, BundleError>;
}

#[derive(Serialize)]
struct QuoteRequest<'a> {
    mint: &'a str,
    direction: TradeDirection,
    amount: u64,
}

#[derive(Deserialize)]
struct QuoteResponse {
    amount: u64,
}

#[derive(Serialize)]
struct InstructionsRequest<'a> {
    mint: &'a str,
    direction: TradeDirection,
    owner: String,
    token_amount: u64,
    collateral_amount: u64,
    slippage_bps: u16,
}

#[derive(Deserialize)]
struct InstructionsResponse {
    instructions: Vec<WireInstruction>,
}

#[derive(Deserialize)]
struct WireInstruction {
    program_id: String,
    accounts: Vec<WireAccountMeta>,
    /// Base64-encoded instruction data
    data: String,
}

#[derive(Deserialize)]
struct WireAccountMeta {
    pubkey: String,
    is_signer: bool,
    is_writable: bool,
}

fn parse_pubkey(value: &str) -> Result<Pubkey, BundleError> {
    Pubkey::from_str(value)
        .map_err(|e| BundleError::Market(format!("Invalid pubkey '{}': {}", value, e)))
}

impl WireInstruction {
    fn into_instruction(self) -> Result<Instruction, BundleError> {
        let program_id = parse_pubkey(&self.program_id)?;
        let accounts = self
            .accounts
            .into_iter()
            .map(|meta| {
                Ok(AccountMeta {
                    pubkey: parse_pubkey(&meta.pubkey)?,
                    is_signer: meta.is_signer,
                    is_writable: meta.is_writable,
                })
            })
            .collect::<Result<Vec<_>, BundleError>>()?;
        let data = BASE64_STANDARD
            .decode(&self.data)
            .map_err(|e| BundleError::Market(format!("Invalid instruction data: {}", e)))?;

        Ok(Instruction {
            program_id,
            accounts,
            data,
        })
    }
}

/// Market maker reached over an HTTP instruction service
pub struct HttpMarketMaker {
    client: reqwest::Client,
    base_url: String,
    mint: Pubkey,
}

impl HttpMarketMaker {
    pub fn new(base_url: impl Into<String>, mint: Pubkey, timeout: Duration) -> Result<Self, BundleError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BundleError::Market(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mint,
        })
    }

    pub fn mint(&self) -> &Pubkey {
        &self.mint
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, BundleError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| BundleError::Market(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BundleError::Market(format!(
                "Instruction service returned {}: {}",
                status, body
            )));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| BundleError::Market(format!("Invalid response from {}: {}", url, e)))
    }

    async fn quote(&self, direction: TradeDirection, amount: u64) -> Result<u64, BundleError> {
        let mint = self.mint.to_string();
        let response: QuoteResponse = self
            .post(
                "/quote",
                &QuoteRequest {
                    mint: &mint,
                    direction,
                    amount,
                },
            )
            .await?;
        debug!(?direction, amount, quoted = response.amount, "Market quote");
        Ok(response.amount)
    }
}

#[async_trait]
impl MarketMaker for HttpMarketMaker {
    async fn quote_buy(&self, collateral_lamports: u64) -> Result<u64, BundleError> {
        self.quote(TradeDirection::Buy, collateral_lamports).await
    }

    async fn quote_sell(&self, token_amount: u64) -> Result<u64, BundleError> {
        self.quote(TradeDirection::Sell, token_amount).await
    }

    async fn build_instructions(&self, params: &TradeParams) -> Result<Vec<Instruction>, BundleError> {
        let mint = self.mint.to_string();
        let request = InstructionsRequest {
            mint: &mint,
            direction: params.direction,
            owner: params.owner.to_string(),
            token_amount: params.token_amount,
            collateral_amount: params.collateral_amount,
            slippage_bps: params.slippage_bps,
        };

        let response: InstructionsResponse = self.post("/instructions", &request).await?;
        response
            .instructions
            .into_iter()
            .map(WireInstruction::into_instruction)
            .collect()
    }
}
