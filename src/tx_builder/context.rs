//! Build context for one bundle cycle
//!
//! A `BundleContext` carries the single recent blockhash fetched at the start
//! of a cycle. Every leg of the bundle is composed against it, so a restart
//! always means a new context and never a reused one.

use solana_sdk::hash::Hash;
use std::time::Instant;
use uuid::Uuid;

/// State shared by every leg composed within one cycle
///
/// # Lifecycle
///
/// 1. Created right after `getLatestBlockhash` at the start of a cycle
/// 2. Borrowed by the composer for every buy/sell leg and the tip leg
/// 3. Dropped after submission; a restart builds a fresh one
pub struct BundleContext {
    /// The recent blockhash every transaction of this bundle references
    pub blockhash: Hash,

    /// Restart counter, 0 for the first cycle
    pub cycle: u32,

    /// Correlation id shared by all log lines of this cycle
    pub cycle_id: Uuid,

    created_at: Instant,
}

impl std::fmt::Debug for BundleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleContext")
            .field("blockhash", &self.blockhash)
            .field("cycle", &self.cycle)
            .field("cycle_id", &self.cycle_id)
            .field("age_ms", &self.age_ms())
            .finish()
    }
}

impl BundleContext {
    pub fn new(blockhash: Hash, cycle: u32) -> Self {
        Self {
            blockhash,
            cycle,
            cycle_id: Uuid::new_v4(),
            created_at: Instant::now(),
        }
    }

    /// Milliseconds since the blockhash was fetched
    ///
    /// Composition latency eats into the blockhash validity window, so this
    /// is logged when the bundle is handed to the relay.
    pub fn age_ms(&self) -> u128 {
        self.created_at.elapsed().as_millis()
    }

    /// Whether a transaction was built against this cycle's blockhash
    pub fn matches(&self, blockhash: &Hash) -> bool {
        &self.blockhash == blockhash
    }
}
