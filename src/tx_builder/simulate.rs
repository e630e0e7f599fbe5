//! Preflight simulation of individual legs
//!
//! Each leg is simulated on its own before the bundle is assembled. The
//! outcome decides whether the leg is kept; the policy for a failed leg
//! (drop a trade leg, abort on the tip leg) lives in the pipeline.

use crate::chain::{ChainState, SimulationOutcome};
use crate::tx_builder::{errors::BundleError, output::LegOutput};
use tracing::{debug, warn};

/// Asks the chain state oracle whether a leg would execute right now
pub struct Simulator<'a> {
    chain: &'a dyn ChainState,
}

impl<'a> Simulator<'a> {
    pub fn new(chain: &'a dyn ChainState) -> Self {
        Self { chain }
    }

    /// Simulate one leg
    ///
    /// # Errors
    ///
    /// `BundleError::Simulation` carrying the reported error and the program
    /// log lines when the simulation fails; RPC errors pass through.
    pub async fn preflight(&self, leg: &LegOutput) -> Result<(), BundleError> {
        match self.chain.simulate(leg.tx_ref()).await? {
            SimulationOutcome::Success {
                logs,
                units_consumed,
            } => {
                debug!(
                    leg = %leg.kind,
                    wallet = %leg.wallet,
                    units_consumed = ?units_consumed,
                    log_lines = logs.len(),
                    "Simulation succeeded"
                );
                Ok(())
            }
            SimulationOutcome::Failed { error, logs } => {
                warn!(
                    leg = %leg.kind,
                    wallet = %leg.wallet,
                    error = %error,
                    "Simulation failed"
                );
                for line in &logs {
                    debug!(leg = %leg.kind, wallet = %leg.wallet, "{}", line);
                }
                Err(BundleError::simulation_failed(error, logs))
            }
        }
    }
}
