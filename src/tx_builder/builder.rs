//! Transaction Composer
//!
//! Turns a leg's instructions into a signed v0 transaction against the
//! cycle's blockhash, and applies the per-leg funding policies:
//!
//! - **Buy**: trade a randomly selected fraction of the wallet balance; the
//!   wallet must keep `buy_reserve_lamports` afterwards
//! - **Sell**: sell a randomly selected fraction of the wallet's tokens; the
//!   wallet must cover `sell_fee_reserve_lamports`
//! - **Tip**: transfer `tip_lamports` to a random tip account; the payer must
//!   hold the tip plus `tip_fee_reserve_lamports`
//!
//! Every policy check runs before the leg touches the market or the
//! simulator, so an underfunded wallet costs no network round trip.

use crate::chain::ChainState;
use crate::market::{MarketMaker, TradeDirection, TradeParams};
use crate::tx_builder::{
    compiler::compile_instructions,
    context::BundleContext,
    errors::BundleError,
    instructions::{
        plan_leg_instructions, sanity_check_ix_order, select_tip_account, tip_instruction,
    },
    output::{LegKind, LegOutput},
};
use crate::wallet::Wallet;
use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::VersionedMessage,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::VersionedTransaction,
};
use parking_lot::Mutex;
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account,
};
use tracing::debug;

/// Compile, sign and wrap instructions into a v0 transaction
///
/// The first signer pays the fee. Signatures are produced in the order of the
/// signer prefix of the account key table, which is the order of `signers`
/// with duplicates removed.
pub fn compose_transaction(
    instructions: &[Instruction],
    signers: &[&Keypair],
    blockhash: Hash,
) -> Result<VersionedTransaction, BundleError> {
    if signers.is_empty() {
        return Err(BundleError::compilation("at least one signer is required"));
    }

    let signer_keys: Vec<Pubkey> = signers.iter().map(|kp| kp.pubkey()).collect();
    let compiled = compile_instructions(instructions, &signer_keys)?;
    let num_signers = compiled.num_signers();
    let table_signers: Vec<Pubkey> = compiled.account_keys[..num_signers].to_vec();

    let message = VersionedMessage::V0(compiled.into_message(blockhash));
    let message_bytes = message.serialize();

    let signatures = table_signers
        .iter()
        .map(|key| {
            let keypair = signers
                .iter()
                .find(|kp| kp.pubkey() == *key)
                .ok_or_else(|| BundleError::Signing(format!("no keypair for signer {}", key)))?;
            keypair
                .try_sign_message(&message_bytes)
                .map_err(|e| BundleError::Signing(format!("{} failed to sign: {}", key, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(VersionedTransaction {
        signatures,
        message,
    })
}

/// Picks one fraction out of a candidate set
pub trait FractionSelector: Send + Sync {
    /// `fractions` is never empty
    fn select(&self, fractions: &[f64]) -> f64;
}

/// Uniform choice over the candidate set
pub struct UniformSelector {
    rng: Mutex<fastrand::Rng>,
}

impl UniformSelector {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
        }
    }
}

impl Default for UniformSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl FractionSelector for UniformSelector {
    fn select(&self, fractions: &[f64]) -> f64 {
        let mut rng = self.rng.lock();
        fractions[rng.usize(..fractions.len())]
    }
}

/// Always picks the candidate at `index` (wrapping)
#[derive(Debug, Clone, Copy)]
pub struct FixedSelector {
    index: usize,
}

impl FixedSelector {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

impl FractionSelector for FixedSelector {
    fn select(&self, fractions: &[f64]) -> f64 {
        fractions[self.index % fractions.len()]
    }
}

/// Randomized trade sizing over a fixed candidate set
pub struct TradeSizer {
    fractions: Vec<f64>,
    selector: Box<dyn FractionSelector>,
}

impl TradeSizer {
    pub fn new(fractions: Vec<f64>, selector: Box<dyn FractionSelector>) -> Result<Self, BundleError> {
        if fractions.is_empty() {
            return Err(BundleError::Configuration(
                "trade fractions must not be empty".to_string(),
            ));
        }
        if let Some(bad) = fractions.iter().find(|f| !(**f > 0.0 && **f <= 1.0)) {
            return Err(BundleError::Configuration(format!(
                "trade fraction {} outside (0, 1]",
                bad
            )));
        }
        Ok(Self {
            fractions,
            selector,
        })
    }

    pub fn fractions(&self) -> &[f64] {
        &self.fractions
    }

    /// Returns the selected fraction and `floor(total * fraction)`
    pub fn size(&self, total: u64) -> (f64, u64) {
        let fraction = self.selector.select(&self.fractions);
        let amount = (total as f64 * fraction).floor() as u64;
        (fraction, amount.min(total))
    }
}

impl std::fmt::Debug for TradeSizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeSizer")
            .field("fractions", &self.fractions)
            .finish()
    }
}

/// Independent funding thresholds for each leg kind
#[derive(Debug, Clone)]
pub struct LegPolicy {
    pub min_trade_lamports: u64,
    pub buy_reserve_lamports: u64,
    pub sell_fee_reserve_lamports: u64,
    pub tip_lamports: u64,
    pub tip_fee_reserve_lamports: u64,
    /// Micro-lamports per compute unit, 0 disables the instruction
    pub compute_unit_price: u64,
    pub slippage_bps: u16,
    pub tip_accounts: Vec<Pubkey>,
}

/// Builds the signed legs of one bundle
pub struct TransactionComposer {
    mint: Pubkey,
    policy: LegPolicy,
    buy_sizer: TradeSizer,
    sell_sizer: TradeSizer,
    tip_rng: Mutex<fastrand::Rng>,
}

impl TransactionComposer {
    pub fn new(mint: Pubkey, policy: LegPolicy, buy_sizer: TradeSizer, sell_sizer: TradeSizer) -> Self {
        Self {
            mint,
            policy,
            buy_sizer,
            sell_sizer,
            tip_rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    /// Seed the tip account selection
    pub fn with_tip_seed(mut self, seed: u64) -> Self {
        self.tip_rng = Mutex::new(fastrand::Rng::with_seed(seed));
        self
    }

    pub fn policy(&self) -> &LegPolicy {
        &self.policy
    }

    pub fn mint(&self) -> &Pubkey {
        &self.mint
    }

    /// Compose a buy leg for `wallet` from its observed balance
    ///
    /// `co_signer` adds a second required signature (the operator's main
    /// wallet) without making it the fee payer.
    pub async fn compose_buy_leg(
        &self,
        chain: &dyn ChainState,
        market: &dyn MarketMaker,
        wallet: &Wallet,
        co_signer: Option<&Keypair>,
        ctx: &BundleContext,
    ) -> Result<LegOutput, BundleError> {
        let owner = wallet.pubkey();
        let balance = wallet.observed_balance();
        let (fraction, amount) = self.buy_sizer.size(balance);

        if amount < self.policy.min_trade_lamports {
            return Err(BundleError::insufficient_funds(
                owner,
                self.policy.min_trade_lamports,
                amount,
            ));
        }
        if balance - amount < self.policy.buy_reserve_lamports {
            return Err(BundleError::insufficient_funds(
                owner,
                amount.saturating_add(self.policy.buy_reserve_lamports),
                balance,
            ));
        }

        debug!(wallet = %owner, balance, fraction, amount, "Sizing buy leg");

        let create_ata = self.token_account_creation(chain, &owner).await?;
        let token_amount = market.quote_buy(amount).await?;
        let market_ixs = market
            .build_instructions(&TradeParams {
                direction: TradeDirection::Buy,
                owner,
                token_amount,
                collateral_amount: amount,
                slippage_bps: self.policy.slippage_bps,
            })
            .await?;

        let plan = plan_leg_instructions(create_ata, self.policy.compute_unit_price, market_ixs)?;
        sanity_check_ix_order(&plan.instructions, plan.creates_token_account)?;

        let mut signers: Vec<&Keypair> = vec![wallet.keypair()];
        signers.extend(co_signer);
        let tx = compose_transaction(&plan.instructions, &signers, ctx.blockhash)?;

        Ok(LegOutput::new(LegKind::Buy, owner, amount, tx))
    }

    /// Compose a sell leg for `wallet` from its token balance
    pub async fn compose_sell_leg(
        &self,
        chain: &dyn ChainState,
        market: &dyn MarketMaker,
        wallet: &Wallet,
        ctx: &BundleContext,
    ) -> Result<LegOutput, BundleError> {
        let owner = wallet.pubkey();
        let balance = wallet.observed_balance();
        if balance < self.policy.sell_fee_reserve_lamports {
            return Err(BundleError::insufficient_funds(
                owner,
                self.policy.sell_fee_reserve_lamports,
                balance,
            ));
        }

        let token_account = get_associated_token_address(&owner, &self.mint);
        let token_balance = chain.get_token_balance(&token_account).await?;
        let (fraction, token_amount) = self.sell_sizer.size(token_balance);
        if token_amount == 0 {
            return Err(BundleError::insufficient_funds(token_account, 1, token_balance));
        }

        debug!(wallet = %owner, token_balance, fraction, token_amount, "Sizing sell leg");

        let collateral_amount = market.quote_sell(token_amount).await?;
        let market_ixs = market
            .build_instructions(&TradeParams {
                direction: TradeDirection::Sell,
                owner,
                token_amount,
                collateral_amount,
                slippage_bps: self.policy.slippage_bps,
            })
            .await?;

        let plan = plan_leg_instructions(None, self.policy.compute_unit_price, market_ixs)?;
        sanity_check_ix_order(&plan.instructions, plan.creates_token_account)?;

        let tx = compose_transaction(&plan.instructions, &[wallet.keypair()], ctx.blockhash)?;
        Ok(LegOutput::new(LegKind::Sell, owner, token_amount, tx))
    }

    /// Compose the tip leg; no network access
    pub fn compose_tip_leg(&self, payer: &Wallet, ctx: &BundleContext) -> Result<LegOutput, BundleError> {
        let owner = payer.pubkey();
        let balance = payer.observed_balance();
        let required = self
            .policy
            .tip_lamports
            .saturating_add(self.policy.tip_fee_reserve_lamports);
        if balance < required {
            return Err(BundleError::insufficient_funds(owner, required, balance));
        }

        let tip_account = {
            let mut rng = self.tip_rng.lock();
            select_tip_account(&self.policy.tip_accounts, &mut rng)
        }
        .ok_or_else(|| BundleError::Configuration("no tip accounts configured".to_string()))?;

        debug!(payer = %owner, tip_account = %tip_account, lamports = self.policy.tip_lamports, "Composing tip leg");

        let ix = tip_instruction(&owner, &tip_account, self.policy.tip_lamports);
        let tx = compose_transaction(&[ix], &[payer.keypair()], ctx.blockhash)?;
        Ok(LegOutput::new(LegKind::Tip, owner, self.policy.tip_lamports, tx))
    }

    async fn token_account_creation(
        &self,
        chain: &dyn ChainState,
        owner: &Pubkey,
    ) -> Result<Option<Instruction>, BundleError> {
        let token_account = get_associated_token_address(owner, &self.mint);
        if chain.get_account_info(&token_account).await?.is_some() {
            return Ok(None);
        }

        debug!(owner = %owner, token_account = %token_account, "Token account missing, adding creation");
        Ok(Some(create_associated_token_account(
            owner,
            owner,
            &self.mint,
            &spl_token::id(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat;
    use crate::test_utils::{FakeChain, FakeMarket};
    use solana_sdk::{
        compute_budget, instruction::AccountMeta, system_instruction, system_program,
    };

    const BUY_FRACTIONS: [f64; 6] = [0.15, 0.30, 0.45, 0.22, 0.40, 0.68];

    fn policy() -> LegPolicy {
        LegPolicy {
            min_trade_lamports: 10_000,
            buy_reserve_lamports: 2_039_280,
            sell_fee_reserve_lamports: 5_000,
            tip_lamports: 206_000,
            tip_fee_reserve_lamports: 5_000,
            compute_unit_price: 1_000,
            slippage_bps: 150,
            tip_accounts: vec![Pubkey::new_unique(), Pubkey::new_unique()],
        }
    }

    fn composer_with(policy: LegPolicy, buy_index: usize) -> TransactionComposer {
        TransactionComposer::new(
            Pubkey::new_unique(),
            policy,
            TradeSizer::new(BUY_FRACTIONS.to_vec(), Box::new(FixedSelector::new(buy_index))).unwrap(),
            TradeSizer::new(vec![1.0], Box::new(FixedSelector::new(0))).unwrap(),
        )
        .with_tip_seed(11)
    }

    fn ctx() -> BundleContext {
        BundleContext::new(Hash::new_from_array([5u8; 32]), 0)
    }

    #[test]
    fn test_compose_signs_in_table_order() {
        let payer = Keypair::new();
        let co_signer = Keypair::new();
        let ix = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[9],
            vec![
                AccountMeta::new(co_signer.pubkey(), true),
                AccountMeta::new(payer.pubkey(), true),
            ],
        );

        let tx = compose_transaction(&[ix], &[&payer, &co_signer], Hash::default()).unwrap();

        let signers = compat::get_required_signers(&tx.message);
        assert_eq!(signers, &[payer.pubkey(), co_signer.pubkey()]);
        assert_eq!(tx.signatures.len(), 2);
        assert!(compat::signatures_match_signers(&tx));
        assert!(tx.message.address_table_lookups().map_or(true, |l| l.is_empty()));
    }

    #[test]
    fn test_compose_transfer_header() {
        let payer = Keypair::new();
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);

        let tx = compose_transaction(&[ix], &[&payer], Hash::default()).unwrap();
        let header = compat::get_message_header(&tx.message);

        assert_eq!(header.num_required_signatures, 1);
        assert_eq!(header.num_readonly_signed_accounts, 0);
        // [payer, system program, destination]: the destination is writable
        assert_eq!(header.num_readonly_unsigned_accounts, 0);
        assert_eq!(compat::get_static_account_keys(&tx.message)[1], system_program::id());
    }

    #[test]
    fn test_compose_requires_signer() {
        let result = compose_transaction(&[], &[], Hash::default());
        assert!(matches!(result, Err(BundleError::Compilation(_))));
    }

    #[test]
    fn test_trade_sizer_floor_and_validation() {
        let sizer = TradeSizer::new(vec![0.15], Box::new(FixedSelector::new(0))).unwrap();
        assert_eq!(sizer.size(1_000_001), (0.15, 150_000));

        assert!(TradeSizer::new(vec![], Box::new(FixedSelector::new(0))).is_err());
        assert!(TradeSizer::new(vec![0.0], Box::new(FixedSelector::new(0))).is_err());
        assert!(TradeSizer::new(vec![1.5], Box::new(FixedSelector::new(0))).is_err());
    }

    #[test]
    fn test_uniform_selector_stays_in_candidate_set() {
        let selector = UniformSelector::with_seed(42);
        for _ in 0..64 {
            assert!(BUY_FRACTIONS.contains(&selector.select(&BUY_FRACTIONS)));
        }
    }

    #[test]
    fn test_fixed_selector_is_deterministic() {
        let selector = FixedSelector::new(7);
        assert_eq!(selector.select(&BUY_FRACTIONS), BUY_FRACTIONS[1]);
        assert_eq!(selector.select(&BUY_FRACTIONS), BUY_FRACTIONS[1]);
    }

    #[tokio::test]
    async fn test_buy_leg_below_reserve_fails_before_any_network_call() {
        let chain = FakeChain::new();
        let market = FakeMarket::new();
        let mut policy = policy();
        policy.buy_reserve_lamports = 900_000;
        let composer = composer_with(policy, 0);
        let wallet = Wallet::from_keypair(Keypair::new()).with_balance(1_000_000);

        let result = composer
            .compose_buy_leg(&chain, &market, &wallet, None, &ctx())
            .await;

        match result {
            Err(BundleError::InsufficientFunds {
                account,
                required,
                available,
            }) => {
                assert_eq!(account, wallet.pubkey());
                assert_eq!(required, 1_050_000);
                assert_eq!(available, 1_000_000);
            }
            other => panic!("Expected InsufficientFunds, got {:?}", other),
        }
        assert_eq!(chain.simulate_calls(), 0);
        assert_eq!(chain.account_info_calls(), 0);
        assert_eq!(market.build_calls(), 0);
    }

    #[tokio::test]
    async fn test_buy_leg_below_min_trade() {
        let chain = FakeChain::new();
        let market = FakeMarket::new();
        let mut policy = policy();
        policy.buy_reserve_lamports = 0;
        let composer = composer_with(policy, 0);
        let wallet = Wallet::from_keypair(Keypair::new()).with_balance(60_000);

        let result = composer
            .compose_buy_leg(&chain, &market, &wallet, None, &ctx())
            .await;
        assert!(matches!(result, Err(BundleError::InsufficientFunds { .. })));
    }

    #[tokio::test]
    async fn test_buy_leg_creates_token_account_first() {
        let chain = FakeChain::new();
        let market = FakeMarket::new();
        let composer = composer_with(policy(), 1);
        let wallet = Wallet::from_keypair(Keypair::new()).with_balance(10_000_000);

        let leg = composer
            .compose_buy_leg(&chain, &market, &wallet, None, &ctx())
            .await
            .unwrap();

        assert_eq!(leg.kind, LegKind::Buy);
        assert_eq!(leg.amount, 3_000_000);
        assert_eq!(leg.blockhash(), ctx().blockhash);
        assert_eq!(leg.required_signers(), &[wallet.pubkey()]);
        assert!(compat::signatures_match_signers(&leg.tx));

        let keys = compat::get_static_account_keys(&leg.tx.message);
        let programs: Vec<Pubkey> = leg
            .tx
            .message
            .instructions()
            .iter()
            .map(|ix| keys[ix.program_id_index as usize])
            .collect();
        assert_eq!(programs[0], spl_associated_token_account::id());
        assert_eq!(programs[1], compute_budget::id());
        assert_eq!(programs[2], FakeMarket::PROGRAM_ID);
        assert_eq!(market.last_params().unwrap().collateral_amount, 3_000_000);
    }

    #[tokio::test]
    async fn test_buy_leg_skips_existing_token_account_and_cosigns() {
        let composer = composer_with(policy(), 0);
        let wallet = Wallet::from_keypair(Keypair::new()).with_balance(10_000_000);
        let co_signer = Keypair::new();
        let chain = FakeChain::new();
        chain.add_account(get_associated_token_address(&wallet.pubkey(), composer.mint()));
        let market = FakeMarket::new();

        let leg = composer
            .compose_buy_leg(&chain, &market, &wallet, Some(&co_signer), &ctx())
            .await
            .unwrap();

        assert_eq!(leg.required_signers(), &[wallet.pubkey(), co_signer.pubkey()]);
        assert_eq!(leg.tx.signatures.len(), 2);
        assert_eq!(leg.tx.message.instructions().len(), 2);
    }

    #[tokio::test]
    async fn test_sell_leg_without_tokens() {
        let composer = composer_with(policy(), 0);
        let chain = FakeChain::new();
        let market = FakeMarket::new();
        let wallet = Wallet::from_keypair(Keypair::new()).with_balance(1_000_000);

        let result = composer.compose_sell_leg(&chain, &market, &wallet, &ctx()).await;
        assert!(matches!(result, Err(BundleError::InsufficientFunds { .. })));
    }

    #[tokio::test]
    async fn test_sell_leg_sells_token_balance() {
        let composer = composer_with(policy(), 0);
        let wallet = Wallet::from_keypair(Keypair::new()).with_balance(1_000_000);
        let chain = FakeChain::new();
        chain.set_token_balance(
            get_associated_token_address(&wallet.pubkey(), composer.mint()),
            777,
        );
        let market = FakeMarket::new();

        let leg = composer
            .compose_sell_leg(&chain, &market, &wallet, &ctx())
            .await
            .unwrap();

        assert_eq!(leg.kind, LegKind::Sell);
        assert_eq!(leg.amount, 777);
        let params = market.last_params().unwrap();
        assert_eq!(params.direction, TradeDirection::Sell);
        assert_eq!(params.token_amount, 777);
    }

    #[test]
    fn test_tip_leg_requires_tip_plus_fee_reserve() {
        let composer = composer_with(policy(), 0);
        let poor = Wallet::from_keypair(Keypair::new()).with_balance(210_999);

        match composer.compose_tip_leg(&poor, &ctx()) {
            Err(BundleError::InsufficientFunds { required, .. }) => assert_eq!(required, 211_000),
            other => panic!("Expected InsufficientFunds, got {:?}", other),
        }

        let payer = Wallet::from_keypair(Keypair::new()).with_balance(211_000);
        let leg = composer.compose_tip_leg(&payer, &ctx()).unwrap();
        assert_eq!(leg.kind, LegKind::Tip);
        assert_eq!(leg.amount, 206_000);

        let keys = compat::get_static_account_keys(&leg.tx.message);
        assert_eq!(keys[1], system_program::id());
        assert!(composer.policy().tip_accounts.contains(&keys[2]));
    }

    #[test]
    fn test_tip_leg_without_tip_accounts() {
        let mut policy = policy();
        policy.tip_accounts.clear();
        let composer = composer_with(policy, 0);
        let payer = Wallet::from_keypair(Keypair::new()).with_balance(1_000_000);

        assert!(matches!(
            composer.compose_tip_leg(&payer, &ctx()),
            Err(BundleError::Configuration(_))
        ));
    }
}
