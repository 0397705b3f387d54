//! Attestation verification through the GitHub CLI.
//!
//! The `gh attestation verify` subprocess is treated as an opaque oracle:
//! its exit status says whether the call worked, and its stdout carries the
//! verified attestations as a JSON array. No retries happen here; fallback
//! between authorities lives in [`crate::backfill`].

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::VerifyConfig;
use crate::error::VerifyError;
use crate::types::{Artifact, Evidence, FailureKind, SigningAuthority, VerificationOutcome};

/// `gh` exit status for "authentication required".
const GH_EXIT_AUTH_REQUIRED: i32 = 4;

/// Verification capability. `Err` is reserved for `CredentialsMissing`.
#[async_trait]
pub trait AttestationOracle: Send + Sync {
    /// Verify `artifact` against attestations signed by `authority`.
    async fn verify(
        &self,
        artifact: &Artifact,
        authority: &SigningAuthority,
    ) -> Result<VerificationOutcome, VerifyError>;
}

/// Oracle backed by `gh attestation verify`.
#[derive(Debug, Clone)]
pub struct GhCliOracle {
    program: String,
    timeout: Duration,
    token: Option<String>,
}

impl GhCliOracle {
    /// Create an oracle running `program` with a per-call timeout.
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            token: None,
        }
    }

    /// Pass `token` to the tool as `GH_TOKEN`.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Oracle configured from a `VerifyConfig`.
    pub fn from_config(config: &VerifyConfig) -> Self {
        Self::new(config.gh_program.clone(), config.oracle_timeout)
            .with_token(config.github_token.clone())
    }

    fn command(&self, path: &Path, authority: &SigningAuthority) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("attestation")
            .arg("verify")
            .arg(path)
            .arg("-R")
            .arg(authority.as_str())
            .arg("--format")
            .arg("json")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = &self.token {
            cmd.env("GH_TOKEN", token);
        }
        cmd
    }
}

#[async_trait]
impl AttestationOracle for GhCliOracle {
    #[instrument(
        skip(self, artifact),
        fields(path = %artifact.path.display(), authority = %authority)
    )]
    async fn verify(
        &self,
        artifact: &Artifact,
        authority: &SigningAuthority,
    ) -> Result<VerificationOutcome, VerifyError> {
        let run = self.command(&artifact.path, authority).output();
        let output = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Attestation tool timed out");
                return Ok(VerificationOutcome::unverified(
                    FailureKind::ExternalToolFailure,
                    format!("{} timed out after {}s", self.program, self.timeout.as_secs()),
                ));
            },
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VerificationOutcome::unverified(
                    FailureKind::ExternalToolFailure,
                    format!("{} not found; install the GitHub CLI", self.program),
                ));
            },
            Ok(Err(e)) => {
                return Ok(VerificationOutcome::unverified(
                    FailureKind::ExternalToolFailure,
                    format!("failed to run {}: {}", self.program, e),
                ));
            },
            Ok(Ok(output)) => output,
        };

        debug!(
            status = ?output.status.code(),
            stdout_len = output.stdout.len(),
            "Attestation tool finished"
        );
        classify(output.status.code(), &output.stdout, &output.stderr)
    }
}

/// Classify a finished tool invocation.
///
/// `status` is `None` when the process was killed by a signal.
pub fn classify(
    status: Option<i32>,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<VerificationOutcome, VerifyError> {
    let stderr = String::from_utf8_lossy(stderr);

    if status != Some(0) {
        if is_auth_failure(status, &stderr) {
            return Err(VerifyError::CredentialsMissing {
                message: last_line(&stderr)
                    .unwrap_or("authentication required")
                    .to_string(),
            });
        }
        let status_text = status.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"));
        let detail = match last_line(&stderr) {
            Some(line) => format!("exited with {status_text}: {line}"),
            None => format!("exited with {status_text}"),
        };
        return Ok(VerificationOutcome::unverified(
            FailureKind::ExternalToolFailure,
            detail,
        ));
    }

    let records: Vec<serde_json::Value> = match serde_json::from_slice(stdout) {
        Ok(records) => records,
        Err(e) => {
            return Ok(VerificationOutcome::unverified(
                FailureKind::MalformedEvidence,
                format!("failed to parse JSON: {e}"),
            ))
        },
    };
    if records.is_empty() {
        return Ok(VerificationOutcome::unverified(
            FailureKind::EvidenceEmpty,
            "attestation tool returned no attestations",
        ));
    }
    Ok(VerificationOutcome::Verified(Evidence(records)))
}

fn is_auth_failure(status: Option<i32>, stderr: &str) -> bool {
    status == Some(GH_EXIT_AUTH_REQUIRED)
        || stderr.contains("gh auth login")
        || stderr.contains("HTTP 401")
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}
