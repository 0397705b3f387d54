//! Verification run orchestration.
//!
//! Flow for one run:
//! 1. Platform selection validated (conflicts rejected before any I/O)
//! 2. Names resolved to targets, optionally with dependencies
//! 3. Targets crossed with platforms into units
//! 4. Each unit fetched, then settled against the primary/backfill authorities
//! 5. Dispositions reported in unit order
//!
//! Units run concurrently up to `jobs`. Results are consumed in unit order,
//! and the first `CredentialsMissing` drops the stream: in-flight units are
//! cancelled (their subprocesses are killed on drop) and pending units never
//! start.

use std::io::Write;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::backfill::{self, backfill_cutoff};
use crate::error::VerifyError;
use crate::expand::{expand_units, PlatformSelection};
use crate::fetch::{BottleFetcher, FetchOutcome};
use crate::oracle::AttestationOracle;
use crate::report::{Reporter, Summary};
use crate::resolve::{resolve_targets, PackageSource, ResolveOptions};
use crate::types::{Authorities, Disposition, FailureReason, UnitReport, VerificationUnit};

/// Parameters of one verification run.
#[derive(Debug, Clone, Default)]
pub struct VerifyRequest {
    /// Package names as given by the user.
    pub names: Vec<String>,
    /// Also verify transitive dependencies.
    pub include_dependencies: bool,
    /// Reject names that only match a cask.
    pub formulae_only: bool,
    /// Discard cached bottles before fetching.
    pub force: bool,
    /// Platforms to verify.
    pub platforms: PlatformSelection,
}

/// What happened to a unit before reporting.
#[derive(Debug)]
enum UnitResult {
    NotPublished(VerificationUnit),
    Settled(UnitReport),
}

/// The verification engine.
pub struct VerifyEngine<S, F, O> {
    source: S,
    fetcher: F,
    oracle: O,
    authorities: Authorities,
    cutoff: DateTime<Utc>,
    jobs: usize,
}

impl<S, F, O> VerifyEngine<S, F, O>
where
    S: PackageSource,
    F: BottleFetcher,
    O: AttestationOracle,
{
    /// Create an engine from its collaborators.
    pub fn new(source: S, fetcher: F, oracle: O, authorities: Authorities) -> Self {
        Self {
            source,
            fetcher,
            oracle,
            authorities,
            cutoff: backfill_cutoff(),
            jobs: 1,
        }
    }

    /// Process up to `jobs` units at once.
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Override the backfill cutoff.
    #[must_use]
    pub fn with_cutoff(mut self, cutoff: DateTime<Utc>) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// The attestation oracle in use.
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Units a request expands to, with host platforms resolved.
    pub fn plan(
        &self,
        request: &VerifyRequest,
    ) -> Result<(Vec<VerificationUnit>, Vec<String>), VerifyError> {
        let platforms = request.platforms.platforms()?;
        let options = ResolveOptions {
            include_dependencies: request.include_dependencies,
            formulae_only: request.formulae_only,
        };
        let resolution = resolve_targets(&self.source, &request.names, options)?;
        let units = expand_units(&resolution.targets, &platforms);
        Ok((units, resolution.skipped))
    }

    /// Run a request, reporting every unit.
    ///
    /// Returns `Err` only for conditions that abort the whole run.
    #[instrument(skip_all, fields(names = request.names.len(), jobs = self.jobs))]
    pub async fn run<W: Write, E: Write>(
        &self,
        request: &VerifyRequest,
        reporter: &mut Reporter<W, E>,
    ) -> Result<Summary, VerifyError> {
        let (units, skipped) = self.plan(request)?;
        for token in &skipped {
            reporter.skipped_cask(token)?;
        }
        info!(units = units.len(), "Starting verification");

        let mut results = stream::iter(units)
            .map(|unit| self.process(unit, request.force))
            .buffered(self.jobs);

        while let Some(result) = results.next().await {
            match result {
                Ok(UnitResult::NotPublished(unit)) => reporter.not_published(&unit)?,
                Ok(UnitResult::Settled(report)) => reporter.record(report)?,
                Err(e) => {
                    error!(error = %e, "Aborting verification run");
                    return Err(e);
                },
            }
        }

        let summary = reporter.summary();
        info!(
            verified = summary.verified,
            backfilled = summary.backfilled,
            failed = summary.failed,
            skipped = summary.skipped,
            "Verification finished"
        );
        Ok(summary)
    }

    async fn process(
        &self,
        unit: VerificationUnit,
        force: bool,
    ) -> Result<UnitResult, VerifyError> {
        debug!(unit = %unit, "Fetching bottle");
        let artifact = match self.fetcher.fetch(&unit.target, &unit.tag, force).await {
            Ok(FetchOutcome::Fetched(artifact)) => artifact,
            Ok(FetchOutcome::NotPublished) => {
                warn!(unit = %unit, "Bottle unavailable for tag");
                return Ok(UnitResult::NotPublished(unit));
            },
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(unit = %unit, error = %e, "Fetch failed");
                return Ok(UnitResult::Settled(UnitReport {
                    unit,
                    disposition: Disposition::Failed(FailureReason::FetchFailed {
                        message: e.to_string(),
                    }),
                }));
            },
        };

        let disposition =
            backfill::settle(&self.oracle, &artifact, &self.authorities, self.cutoff).await?;
        debug!(unit = %unit, success = disposition.is_success(), "Unit settled");
        Ok(UnitResult::Settled(UnitReport { unit, disposition }))
    }
}
