//! End-to-end pipeline tests
//!
//! The market instruction service and the block-engine relay are real HTTP
//! clients talking to mockito servers; wallets come from key files in a
//! temporary directory. Only the chain RPC is stubbed.

use async_trait::async_trait;
use bundle_bot::chain::{ChainState, SimulationOutcome};
use bundle_bot::checkpoint::read_checkpoint;
use bundle_bot::market::HttpMarketMaker;
use bundle_bot::pipeline::{BundlePipeline, PipelineSettings};
use bundle_bot::structured_logging::PipelineContext;
use bundle_bot::tx_builder::{
    decode_transaction, BundleError, FixedSelector, JitoRelayClient, LegPolicy, RecoveryStrategy,
    StatusPoller, TokioSleeper, TradeSizer, TransactionComposer,
};
use bundle_bot::wallet::{KeyDirectory, Wallet, WalletSource};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;
use solana_sdk::{
    account::Account,
    hash::Hash,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::VersionedTransaction,
};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BUNDLES_PATH: &str = "/api/v1/bundles";

/// Every account is funded, no token account exists, every simulation passes
struct StubChain {
    balance: u64,
    blockhashes: AtomicU8,
}

impl StubChain {
    fn funded(balance: u64) -> Self {
        Self {
            balance,
            blockhashes: AtomicU8::new(0),
        }
    }
}

#[async_trait]
impl ChainState for StubChain {
    async fn get_balance(&self, _account: &Pubkey) -> Result<u64, BundleError> {
        Ok(self.balance)
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, BundleError> {
        let n = self.blockhashes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Hash::new_from_array([n; 32]))
    }

    async fn get_account_info(&self, _account: &Pubkey) -> Result<Option<Account>, BundleError> {
        Ok(None)
    }

    async fn get_token_balance(&self, _token_account: &Pubkey) -> Result<u64, BundleError> {
        Ok(0)
    }

    async fn simulate(&self, _tx: &VersionedTransaction) -> Result<SimulationOutcome, BundleError> {
        Ok(SimulationOutcome::Success {
            logs: vec![],
            units_consumed: Some(42_000),
        })
    }
}

fn write_keypair(path: &Path) -> Pubkey {
    let keypair = Keypair::new();
    std::fs::write(path, serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap()).unwrap();
    keypair.pubkey()
}

struct Fixture {
    _dir: tempfile::TempDir,
    keys_dir: std::path::PathBuf,
    tip_payer_path: std::path::PathBuf,
    checkpoint_path: std::path::PathBuf,
    trader_keys: Vec<Pubkey>,
}

impl Fixture {
    fn new(traders: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let keys_dir = dir.path().join("keys");
        std::fs::create_dir_all(&keys_dir).unwrap();
        let trader_keys = (0..traders)
            .map(|i| write_keypair(&keys_dir.join(format!("wallet{}.json", i))))
            .collect();

        let tip_payer_path = dir.path().join("main.json");
        write_keypair(&tip_payer_path);
        let checkpoint_path = dir.path().join("assets").join("transactions.json");

        Self {
            keys_dir,
            tip_payer_path,
            checkpoint_path,
            trader_keys,
            _dir: dir,
        }
    }

    fn pipeline(
        &self,
        market_url: &str,
        relay_url: &str,
        recovery: Option<Arc<dyn RecoveryStrategy>>,
    ) -> BundlePipeline {
        let wallets = KeyDirectory::new(&self.keys_dir)
            .load_signers(self.trader_keys.len())
            .unwrap();
        let tip_payer = Wallet::from_file(&self.tip_payer_path).unwrap();
        let mint = Pubkey::new_unique();

        let policy = LegPolicy {
            min_trade_lamports: 10_000,
            buy_reserve_lamports: 2_039_280,
            sell_fee_reserve_lamports: 5_000,
            tip_lamports: 206_000,
            tip_fee_reserve_lamports: 5_000,
            compute_unit_price: 1_000,
            slippage_bps: 150,
            tip_accounts: vec![Pubkey::new_unique(), Pubkey::new_unique()],
        };
        let composer = TransactionComposer::new(
            mint,
            policy,
            TradeSizer::new(vec![0.15, 0.30], Box::new(FixedSelector::new(1))).unwrap(),
            TradeSizer::new(vec![1.0], Box::new(FixedSelector::new(0))).unwrap(),
        );

        let market =
            HttpMarketMaker::new(market_url.to_string(), mint, Duration::from_secs(2)).unwrap();
        let relay = JitoRelayClient::new(relay_url.to_string(), 1, Duration::from_secs(2)).unwrap();
        let poller = StatusPoller::new(2, Duration::from_millis(5), Arc::new(TokioSleeper));

        let pipeline = BundlePipeline::new(
            Arc::new(StubChain::funded(50_000_000)),
            Arc::new(market),
            Arc::new(relay),
            composer,
            poller,
            wallets,
            tip_payer,
        )
        .with_settings(PipelineSettings {
            checkpoint_path: Some(self.checkpoint_path.clone()),
            ..PipelineSettings::default()
        });

        match recovery {
            Some(recovery) => pipeline.with_recovery(recovery),
            None => pipeline,
        }
    }
}

async fn mock_market(server: &mut ServerGuard) -> (Mock, Mock) {
    let quote = server
        .mock("POST", "/quote")
        .with_status(200)
        .with_body(r#"{"amount": 1250000}"#)
        .create_async()
        .await;

    let program = Pubkey::new_unique().to_string();
    let curve = Pubkey::new_unique().to_string();
    let instructions = server
        .mock("POST", "/instructions")
        .with_status(200)
        .with_body(
            json!({
                "instructions": [{
                    "program_id": program,
                    "accounts": [{"pubkey": curve, "is_signer": false, "is_writable": true}],
                    "data": "AQID",
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    (quote, instructions)
}

#[tokio::test]
async fn test_run_lands_bundle_through_http_collaborators() {
    let fixture = Fixture::new(2);
    let mut market_server = Server::new_async().await;
    let _market = mock_market(&mut market_server).await;

    let mut relay_server = Server::new_async().await;
    let send = relay_server
        .mock("POST", BUNDLES_PATH)
        .match_body(Matcher::PartialJson(json!({"method": "sendBundle"})))
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"e2e-bundle"}"#)
        .expect(1)
        .create_async()
        .await;
    let status = relay_server
        .mock("POST", BUNDLES_PATH)
        .match_body(Matcher::PartialJson(json!({
            "method": "getBundleStatuses",
            "params": [["e2e-bundle"]],
        })))
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"context":{"slot":9},"value":[{"bundle_id":"e2e-bundle","slot":9,"confirmation_status":"confirmed"}]}}"#)
        .expect(1)
        .create_async()
        .await;

    let pipeline = fixture.pipeline(
        &market_server.url(),
        &format!("{}{}", relay_server.url(), BUNDLES_PATH),
        None,
    );
    let report = pipeline.run(&PipelineContext::new("e2e")).await.unwrap();

    assert_eq!(report.bundle_id.as_str(), "e2e-bundle");
    assert_eq!(report.status[0]["confirmation_status"], "confirmed");
    assert_eq!(report.legs.len(), 3);
    assert_eq!(report.legs[0].wallet, fixture.trader_keys[0].to_string());
    assert_eq!(report.legs[0].amount, 15_000_000);
    assert_eq!(report.legs[2].kind, "tip");
    send.assert_async().await;
    status.assert_async().await;

    // The checkpoint holds the submitted legs, tip last, one blockhash
    let encoded = read_checkpoint(&fixture.checkpoint_path, 5).await.unwrap();
    assert_eq!(encoded.len(), 3);
    let txs: Vec<VersionedTransaction> =
        encoded.iter().map(|tx| decode_transaction(tx).unwrap()).collect();
    let blockhash = *txs[0].message.recent_blockhash();
    assert!(txs.iter().all(|tx| *tx.message.recent_blockhash() == blockhash));
    assert_eq!(
        txs[2].message.static_account_keys()[0],
        Wallet::from_file(&fixture.tip_payer_path).unwrap().pubkey()
    );
}

#[tokio::test]
async fn test_market_failure_drops_every_leg() {
    let fixture = Fixture::new(2);
    let mut market_server = Server::new_async().await;
    let _quote = market_server
        .mock("POST", "/quote")
        .with_status(503)
        .with_body("curve unavailable")
        .create_async()
        .await;

    let mut relay_server = Server::new_async().await;
    let relay = relay_server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let pipeline = fixture.pipeline(
        &market_server.url(),
        &format!("{}{}", relay_server.url(), BUNDLES_PATH),
        None,
    );
    let result = pipeline.run(&PipelineContext::new("e2e")).await;

    assert!(matches!(result, Err(BundleError::EmptyBundle)));
    assert!(!fixture.checkpoint_path.exists());
    relay.assert_async().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_relay_refusal_runs_recovery_command() {
    use bundle_bot::tx_builder::CommandRecovery;

    let fixture = Fixture::new(1);
    let marker = fixture.keys_dir.join("recovered");
    let mut market_server = Server::new_async().await;
    let _market = mock_market(&mut market_server).await;

    let mut relay_server = Server::new_async().await;
    let _send = relay_server
        .mock("POST", BUNDLES_PATH)
        .match_body(Matcher::PartialJson(json!({"method": "sendBundle"})))
        .with_status(500)
        .with_body("block engine overloaded")
        .create_async()
        .await;
    let status = relay_server
        .mock("POST", BUNDLES_PATH)
        .match_body(Matcher::PartialJson(json!({"method": "getBundleStatuses"})))
        .expect(0)
        .create_async()
        .await;

    let recovery = CommandRecovery::new(
        "sh",
        vec![
            "-c".to_string(),
            format!("printf '%s' \"$BUNDLE_FAILURE_CATEGORY\" > '{}'", marker.display()),
        ],
    );
    let pipeline = fixture.pipeline(
        &market_server.url(),
        &format!("{}{}", relay_server.url(), BUNDLES_PATH),
        Some(Arc::new(recovery)),
    );
    let result = pipeline.run(&PipelineContext::new("e2e")).await;

    match result {
        Err(BundleError::Relay(msg)) => assert!(msg.contains("500")),
        other => panic!("Expected Relay error, got {:?}", other),
    }
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "relay");
    status.assert_async().await;
}

#[test]
fn test_key_directory_with_too_few_files() {
    let fixture = Fixture::new(2);
    let result = KeyDirectory::new(&fixture.keys_dir).load_signers(4);

    match result {
        Err(BundleError::Configuration(msg)) => {
            assert!(msg.contains("Found 2, but need 4"));
        }
        other => panic!("Expected Configuration error, got {:?}", other.map(|w| w.len())),
    }
}
