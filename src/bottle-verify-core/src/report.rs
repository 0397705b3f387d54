//! Result aggregation and output.
//!
//! Human mode writes one status line per unit as soon as it resolves.
//! Structured mode collects the evidence of every successful unit and writes
//! a single JSON array when the run finishes. Warnings go to a separate sink
//! in both modes so structured stdout stays parseable.

use std::io::Write;

use chrono::SecondsFormat;
use serde::Serialize;

use crate::error::VerifyError;
use crate::types::{Disposition, Evidence, FailureReason, UnitReport, VerificationUnit};

/// Output mode, fixed for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One status line per unit.
    Human,
    /// One JSON array of evidence at the end.
    Structured,
}

/// Counts of unit dispositions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Verified against the primary authority.
    pub verified: usize,
    /// Verified through backfill.
    pub backfilled: usize,
    /// Not verified, including fetch failures.
    pub failed: usize,
    /// Names or units skipped (casks, unpublished bottles).
    pub skipped: usize,
}

impl Summary {
    /// Whether any unit failed.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Collects unit dispositions and renders them.
pub struct Reporter<W: Write, E: Write> {
    mode: OutputMode,
    out: W,
    warnings: E,
    evidence: Vec<Evidence>,
    summary: Summary,
}

impl<W: Write, E: Write> Reporter<W, E> {
    /// Reporter writing results to `out` and warnings to `warnings`.
    pub fn new(mode: OutputMode, out: W, warnings: E) -> Self {
        Self {
            mode,
            out,
            warnings,
            evidence: Vec::new(),
            summary: Summary::default(),
        }
    }

    /// Output mode.
    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Counts so far.
    pub fn summary(&self) -> Summary {
        self.summary
    }

    /// Emit a warning line.
    pub fn warn(&mut self, message: &str) -> Result<(), VerifyError> {
        writeln!(self.warnings, "Warning: {}", message)?;
        Ok(())
    }

    /// A named package that cannot carry bottles.
    pub fn skipped_cask(&mut self, token: &str) -> Result<(), VerifyError> {
        self.summary.skipped += 1;
        self.warn(&format!(
            "Can only verify bottles, not casks. {} is a cask.",
            token
        ))
    }

    /// A unit with no bottle published for its platform.
    pub fn not_published(&mut self, unit: &VerificationUnit) -> Result<(), VerifyError> {
        self.summary.skipped += 1;
        self.warn(&format!(
            "Bottle for tag :{} is unavailable for {}.",
            unit.tag, unit.target.name
        ))
    }

    /// Record a resolved unit.
    pub fn record(&mut self, report: UnitReport) -> Result<(), VerifyError> {
        let UnitReport { unit, disposition } = report;
        match disposition {
            Disposition::Verified {
                authority,
                evidence,
            } => {
                self.summary.verified += 1;
                match self.mode {
                    OutputMode::Human => {
                        writeln!(self.out, "Verified {} against {}", unit, authority)?
                    },
                    OutputMode::Structured => self.evidence.push(evidence),
                }
            },
            Disposition::Backfilled {
                authority,
                evidence,
                signed_at,
            } => {
                self.summary.backfilled += 1;
                match self.mode {
                    OutputMode::Human => writeln!(
                        self.out,
                        "Verified {} via backfill against {} (signed {})",
                        unit,
                        authority,
                        signed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
                    )?,
                    OutputMode::Structured => self.evidence.push(evidence),
                }
            },
            Disposition::Failed(FailureReason::FetchFailed { message }) => {
                self.summary.failed += 1;
                self.warn(&format!("Failed to fetch {}: {}", unit, message))?;
            },
            Disposition::Failed(reason) => {
                self.summary.failed += 1;
                if self.mode == OutputMode::Human {
                    writeln!(self.out, "Failed to verify {}: {}", unit, reason)?;
                }
            },
        }
        Ok(())
    }

    /// Finish the run, writing the structured report if requested.
    pub fn finish(mut self) -> Result<Summary, VerifyError> {
        if self.mode == OutputMode::Structured {
            serde_json::to_writer_pretty(&mut self.out, &self.evidence).map_err(|e| {
                VerifyError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
            })?;
            writeln!(self.out)?;
        }
        self.out.flush()?;
        Ok(self.summary)
    }
}
