//! Fallback recovery
//!
//! When a bundle cannot be submitted (rejected locally, refused by the relay
//! or read back corrupt from the checkpoint) the pipeline hands control to an
//! out-of-band procedure once. The procedure is a capability passed into
//! the pipeline; the default runs an external command.

use crate::tx_builder::errors::BundleError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

/// Why recovery was invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReason {
    /// Cycle whose submission failed
    pub cycle_id: Uuid,
    /// Error category of the failure
    pub category: &'static str,
    /// Rendered error
    pub message: String,
}

impl RecoveryReason {
    pub fn from_error(cycle_id: Uuid, error: &BundleError) -> Self {
        Self {
            cycle_id,
            category: error.category(),
            message: error.to_string(),
        }
    }
}

#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Short name for logs and metrics
    fn name(&self) -> &str;

    async fn recover(&self, reason: &RecoveryReason) -> Result<(), BundleError>;
}

/// Does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecovery;

#[async_trait]
impl RecoveryStrategy for NoopRecovery {
    fn name(&self) -> &str {
        "noop"
    }

    async fn recover(&self, reason: &RecoveryReason) -> Result<(), BundleError> {
        info!(cycle_id = %reason.cycle_id, category = reason.category, "No recovery configured");
        Ok(())
    }
}

/// Runs an external command and waits for it
///
/// The failure is passed to the command through the `BUNDLE_FAILURE_CATEGORY`
/// and `BUNDLE_FAILURE_MESSAGE` environment variables.
#[derive(Debug, Clone)]
pub struct CommandRecovery {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandRecovery {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    /// Build from `[program, args...]`
    pub fn from_argv(argv: &[String]) -> Result<Self, BundleError> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            BundleError::Configuration("recovery command must not be empty".to_string())
        })?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl RecoveryStrategy for CommandRecovery {
    fn name(&self) -> &str {
        &self.program
    }

    async fn recover(&self, reason: &RecoveryReason) -> Result<(), BundleError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("BUNDLE_FAILURE_CATEGORY", reason.category)
            .env("BUNDLE_FAILURE_MESSAGE", &reason.message)
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        info!(
            cycle_id = %reason.cycle_id,
            program = %self.program,
            args = ?self.args,
            "Running recovery command"
        );

        let output = command.output().await.map_err(|e| {
            BundleError::Recovery(format!("Failed to run {}: {}", self.program, e))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            info!(program = %self.program, output = %stdout.trim(), "Recovery command output");
        }
        if !stderr.trim().is_empty() {
            warn!(program = %self.program, output = %stderr.trim(), "Recovery command error output");
        }

        if !output.status.success() {
            return Err(BundleError::Recovery(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        Ok(())
    }
}
