//! Test Utilities Module
//!
//! In-memory fakes for every collaborator of the pipeline: chain state,
//! market maker, relay, recovery and the poller's sleeper. All of them are
//! deterministic and record how they were called.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use crate::chain::{ChainState, SimulationOutcome};
use crate::market::{MarketMaker, TradeDirection, TradeParams};
use crate::tx_builder::{
    BundleError, BundleId, BundleRelay, RecoveryReason, RecoveryStrategy, Sleeper,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use solana_sdk::{
    account::Account,
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    transaction::VersionedTransaction,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory chain state
///
/// Every `get_latest_blockhash` call returns a new hash, so each cycle of
/// the pipeline sees a distinct blockhash.
#[derive(Default)]
pub struct FakeChain {
    balances: Mutex<HashMap<Pubkey, u64>>,
    token_balances: Mutex<HashMap<Pubkey, u64>>,
    accounts: Mutex<HashSet<Pubkey>>,
    failing_payers: Mutex<HashMap<Pubkey, String>>,
    unreachable_payers: Mutex<HashMap<Pubkey, String>>,
    simulated_blockhashes: Mutex<Vec<Hash>>,
    blockhash_calls: AtomicUsize,
    account_info_calls: AtomicUsize,
    simulate_calls: AtomicUsize,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, account: Pubkey, lamports: u64) {
        self.balances.lock().insert(account, lamports);
    }

    pub fn set_token_balance(&self, token_account: Pubkey, amount: u64) {
        self.token_balances.lock().insert(token_account, amount);
        self.add_account(token_account);
    }

    pub fn add_account(&self, account: Pubkey) {
        self.accounts.lock().insert(account);
    }

    /// Fail simulation of every transaction paid for by `payer`
    pub fn fail_simulation_for(&self, payer: Pubkey, error: &str) {
        self.failing_payers.lock().insert(payer, error.to_string());
    }

    /// Fail the simulate RPC call itself for transactions paid for by `payer`
    pub fn fail_simulate_rpc_for(&self, payer: Pubkey, error: &str) {
        self.unreachable_payers.lock().insert(payer, error.to_string());
    }

    pub fn blockhash_calls(&self) -> usize {
        self.blockhash_calls.load(Ordering::SeqCst)
    }

    pub fn account_info_calls(&self) -> usize {
        self.account_info_calls.load(Ordering::SeqCst)
    }

    pub fn simulate_calls(&self) -> usize {
        self.simulate_calls.load(Ordering::SeqCst)
    }

    /// Blockhash of every simulated transaction, in call order
    pub fn simulated_blockhashes(&self) -> Vec<Hash> {
        self.simulated_blockhashes.lock().clone()
    }
}

#[async_trait]
impl ChainState for FakeChain {
    async fn get_balance(&self, account: &Pubkey) -> Result<u64, BundleError> {
        Ok(self.balances.lock().get(account).copied().unwrap_or(0))
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, BundleError> {
        let n = self.blockhash_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Hash::new_from_array([n as u8; 32]))
    }

    async fn get_account_info(&self, account: &Pubkey) -> Result<Option<Account>, BundleError> {
        self.account_info_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .accounts
            .lock()
            .contains(account)
            .then(|| Account::new(2_039_280, 165, &spl_token::id())))
    }

    async fn get_token_balance(&self, token_account: &Pubkey) -> Result<u64, BundleError> {
        Ok(self.token_balances.lock().get(token_account).copied().unwrap_or(0))
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<SimulationOutcome, BundleError> {
        self.simulate_calls.fetch_add(1, Ordering::SeqCst);
        self.simulated_blockhashes.lock().push(*tx.message.recent_blockhash());

        let payer = tx.message.static_account_keys().first().copied();
        if let Some(error) = payer.and_then(|p| self.unreachable_payers.lock().get(&p).cloned()) {
            return Err(BundleError::rpc(error));
        }
        let failure = payer.and_then(|p| self.failing_payers.lock().get(&p).cloned());
        Ok(match failure {
            Some(error) => SimulationOutcome::Failed {
                logs: vec![format!("Program log: Error: {}", error)],
                error,
            },
            None => SimulationOutcome::Success {
                logs: vec!["Program log: ok".to_string()],
                units_consumed: Some(5_000),
            },
        })
    }
}

/// Market maker with a linear price and a single-instruction trade
#[derive(Default)]
pub struct FakeMarket {
    failing_owners: Mutex<HashSet<Pubkey>>,
    last_params: Mutex<Option<TradeParams>>,
    build_calls: AtomicUsize,
}

impl FakeMarket {
    pub const PROGRAM_ID: Pubkey = Pubkey::new_from_array([7u8; 32]);
    pub const CURVE_ACCOUNT: Pubkey = Pubkey::new_from_array([8u8; 32]);
    /// Tokens per lamport
    pub const PRICE: u64 = 10;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, owner: Pubkey) {
        self.failing_owners.lock().insert(owner);
    }

    pub fn build_calls(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<TradeParams> {
        self.last_params.lock().clone()
    }
}

#[async_trait]
impl MarketMaker for FakeMarket {
    async fn quote_buy(&self, collateral_lamports: u64) -> Result<u64, BundleError> {
        Ok(collateral_lamports * Self::PRICE)
    }

    async fn quote_sell(&self, token_amount: u64) -> Result<u64, BundleError> {
        Ok(token_amount / Self::PRICE)
    }

    async fn build_instructions(&self, params: &TradeParams) -> Result<Vec<Instruction>, BundleError> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock() = Some(params.clone());

        if self.failing_owners.lock().contains(&params.owner) {
            return Err(BundleError::Market(format!("curve rejected {}", params.owner)));
        }

        let tag = match params.direction {
            TradeDirection::Buy => 0u8,
            TradeDirection::Sell => 1u8,
        };
        let mut data = vec![tag];
        data.extend_from_slice(&params.token_amount.to_le_bytes());
        data.extend_from_slice(&params.collateral_amount.to_le_bytes());

        Ok(vec![Instruction {
            program_id: Self::PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(params.owner, true),
                AccountMeta::new(Self::CURVE_ACCOUNT, false),
            ],
            data,
        }])
    }
}

/// Scripted relay
///
/// Status responses are served from a queue; an empty queue answers "not
/// visible yet". Submissions succeed with `bundle-<n>` unless a failure was
/// queued.
#[derive(Default)]
pub struct FakeRelay {
    statuses: Mutex<VecDeque<Result<Option<Value>, String>>>,
    send_failures: Mutex<VecDeque<String>>,
    sent: Mutex<Vec<Vec<String>>>,
    status_calls: AtomicUsize,
    inflight_calls: AtomicUsize,
}

impl FakeRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: Option<Value>) {
        self.statuses.lock().push_back(Ok(status));
    }

    pub fn push_status_error(&self, error: &str) {
        self.statuses.lock().push_back(Err(error.to_string()));
    }

    /// Make the next submission fail with a relay error
    pub fn fail_next_send(&self, error: &str) {
        self.send_failures.lock().push_back(error.to_string());
    }

    /// Every submitted bundle, in order
    pub fn sent(&self) -> Vec<Vec<String>> {
        self.sent.lock().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn inflight_calls(&self) -> usize {
        self.inflight_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BundleRelay for FakeRelay {
    async fn send_bundle(&self, transactions: &[String]) -> Result<BundleId, BundleError> {
        if let Some(error) = self.send_failures.lock().pop_front() {
            return Err(BundleError::relay(error));
        }
        let mut sent = self.sent.lock();
        sent.push(transactions.to_vec());
        Ok(BundleId::new(format!("bundle-{}", sent.len())))
    }

    async fn get_bundle_status(&self, _bundle_id: &BundleId) -> Result<Option<Value>, BundleError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().pop_front() {
            Some(Ok(status)) => Ok(status),
            Some(Err(error)) => Err(BundleError::relay(error)),
            None => Ok(None),
        }
    }

    async fn get_inflight_status(&self, _bundle_id: &BundleId) -> Result<Option<Value>, BundleError> {
        self.inflight_calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// Records requested delays instead of sleeping
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

/// Records every recovery invocation
#[derive(Default)]
pub struct RecordingRecovery {
    reasons: Mutex<Vec<RecoveryReason>>,
    fail: bool,
}

impl RecordingRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recovery that records the call and then fails
    pub fn new_failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn reasons(&self) -> Vec<RecoveryReason> {
        self.reasons.lock().clone()
    }
}

#[async_trait]
impl RecoveryStrategy for RecordingRecovery {
    fn name(&self) -> &str {
        "recording"
    }

    async fn recover(&self, reason: &RecoveryReason) -> Result<(), BundleError> {
        self.reasons.lock().push(reason.clone());
        if self.fail {
            return Err(BundleError::Recovery("scripted failure".to_string()));
        }
        Ok(())
    }
}
