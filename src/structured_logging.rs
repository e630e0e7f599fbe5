//! Structured logging and pipeline context

use uuid::Uuid;

/// Structured logger for pipeline events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    context_id: String,
}

impl StructuredLogger {
    pub fn new(context_id: String) -> Self {
        Self { context_id }
    }

    pub fn log_cycle_start(&self, cycle: u32, blockhash: &str, wallets: usize) {
        tracing::info!(
            context_id = %self.context_id,
            cycle = %cycle,
            blockhash = %blockhash,
            wallets = %wallets,
            "Bundle cycle started"
        );
    }

    pub fn log_balance(&self, wallet: &str, role: &str, lamports: u64) {
        tracing::info!(
            context_id = %self.context_id,
            wallet = %wallet,
            role = %role,
            lamports = %lamports,
            "Wallet balance"
        );
    }

    pub fn log_leg_prepared(&self, kind: &str, wallet: &str, amount: u64) {
        tracing::info!(
            context_id = %self.context_id,
            leg = %kind,
            wallet = %wallet,
            amount = %amount,
            "Leg prepared"
        );
    }

    pub fn log_leg_dropped(&self, kind: &str, wallet: &str, category: &str, error: &str) {
        tracing::warn!(
            context_id = %self.context_id,
            leg = %kind,
            wallet = %wallet,
            category = %category,
            error = %error,
            "Leg dropped"
        );
    }

    pub fn log_bundle_submitted(&self, bundle_id: &str, tx_count: usize, blockhash_age_ms: u128) {
        tracing::info!(
            context_id = %self.context_id,
            bundle_id = %bundle_id,
            tx_count = %tx_count,
            blockhash_age_ms = %blockhash_age_ms,
            "Bundle submitted"
        );
    }

    pub fn log_landed(&self, bundle_id: &str, latency_ms: u64) {
        tracing::info!(
            context_id = %self.context_id,
            bundle_id = %bundle_id,
            latency_ms = %latency_ms,
            "Bundle landed"
        );
    }

    pub fn log_exhausted(&self, bundle_id: &str, attempts: u32) {
        tracing::warn!(
            context_id = %self.context_id,
            bundle_id = %bundle_id,
            attempts = %attempts,
            "Bundle status unavailable, giving up on this bundle"
        );
    }

    pub fn log_restart(&self, restart: u32, max_restarts: u32) {
        tracing::warn!(
            context_id = %self.context_id,
            restart = %restart,
            max_restarts = %max_restarts,
            "Restarting pipeline with a fresh blockhash"
        );
    }

    pub fn log_fallback(&self, strategy: &str, category: &str, success: bool) {
        tracing::warn!(
            context_id = %self.context_id,
            strategy = %strategy,
            category = %category,
            success = %success,
            "Fallback recovery invoked"
        );
    }

    pub fn error(&self, message: &str) {
        tracing::error!(
            context_id = %self.context_id,
            message = %message,
            "Error"
        );
    }
}

/// Pipeline execution context
///
/// One root context per pipeline run; each cycle and leg gets a child that
/// shares the request id.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Unique request ID
    pub request_id: String,

    /// Span ID
    pub span_id: String,

    /// Parent span ID (if any)
    pub parent_span_id: Option<String>,

    /// Operation name
    pub operation: String,

    /// Structured logger instance
    pub logger: StructuredLogger,
}

impl PipelineContext {
    /// Create a new pipeline context
    pub fn new(operation: &str) -> Self {
        let request_id = Uuid::new_v4().to_string();

        Self {
            request_id: request_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: None,
            operation: operation.to_string(),
            logger: StructuredLogger::new(request_id),
        }
    }

    /// Create a child context
    pub fn child(&self, operation: &str) -> Self {
        Self {
            request_id: self.request_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: Some(self.span_id.clone()),
            operation: operation.to_string(),
            logger: self.logger.clone(),
        }
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new("default")
    }
}
