//! Sentiment scoring via an opaque external command.
//!
//! The scoring pipeline itself is an external collaborator: a configured
//! program that reads the text on stdin and prints a single JSON object
//! `{sentiment, score, confidence, journey}` on stdout. This module only
//! spawns it and parses the result; pipeline internals are out of scope.

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Hard ceiling on scorer runtime.
const SCORER_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one scoring run, passed through to the caller as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub sentiment: String,
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub journey: Value,
}

/// Scorer invocation failures.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("failed to run scorer: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("scorer exited with status {0}")]
    Failed(i32),
    #[error("scorer timed out")]
    TimedOut,
    #[error("scorer produced malformed output")]
    Malformed,
}

/// Handle to the configured external scoring command.
#[derive(Debug, Clone)]
pub struct Scorer {
    program: String,
    args: Vec<String>,
}

impl Scorer {
    /// Build a scorer from an argv-style command line.
    /// Returns `None` for an empty command.
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Scorer {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// Run the scorer over one text.
    pub async fn analyze(&self, text: &str) -> Result<ScoreResult, ScoringError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            drop(stdin);
        }

        let output = tokio::time::timeout(SCORER_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| ScoringError::TimedOut)??;

        if !output.status.success() {
            return Err(ScoringError::Failed(output.status.code().unwrap_or(-1)));
        }

        let result: ScoreResult =
            serde_json::from_slice(&output.stdout).map_err(|_| ScoringError::Malformed)?;
        debug!(sentiment = %result.sentiment, score = result.score, "scoring run complete");
        Ok(result)
    }
}
