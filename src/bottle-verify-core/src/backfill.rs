//! Primary/backfill fallback policy.
//!
//! Bottles published before attestations existed were signed after the fact
//! by a separate backfill authority. A backfilled signature is only trusted
//! when it predates [`backfill_cutoff`]; anything newer must carry a primary
//! attestation.
//!
//! ```text
//! primary ──Verified──────────────────────────────▶ Verified
//!    │
//!    ├──Unverified(MalformedEvidence|EvidenceEmpty)▶ Failed
//!    │
//!    └──Unverified(ExternalToolFailure)
//!             │
//!          backfill ──Unverified──────────────────▶ Failed
//!             │
//!             └──Verified ── timestamp < cutoff ──▶ Backfilled
//!                        ├── timestamp ≥ cutoff ──▶ Failed(TooRecent)
//!                        └── no timestamp ────────▶ Failed(NoTimestamp)
//! ```

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::VerifyError;
use crate::oracle::AttestationOracle;
use crate::types::{
    Artifact, Authorities, Disposition, Evidence, FailureKind, FailureReason,
    VerificationOutcome,
};

/// Backfill cutoff, 2024-03-14T00:00:00Z, as Unix seconds.
pub const BACKFILL_CUTOFF_UNIX: i64 = 1_710_374_400;

/// JSON pointer to the signing timestamp inside the first attestation record.
pub const TIMESTAMP_POINTER: &str = "/verificationResult/verifiedTimestamps/0/timestamp";

/// Backfilled signatures at or after this instant are rejected.
pub fn backfill_cutoff() -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(BACKFILL_CUTOFF_UNIX * 1_000_000_000)
}

/// Verdict on backfill evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillDecision {
    /// Signed strictly before the cutoff.
    Accepted {
        /// Recovered signing time.
        signed_at: DateTime<Utc>,
    },
    /// No usable timestamp in the evidence.
    RejectedNoTimestamp,
    /// Signed on or after the cutoff.
    RejectedTooRecent {
        /// Recovered signing time.
        signed_at: DateTime<Utc>,
    },
}

/// Signing timestamp of the first attestation record, if present and RFC 3339.
pub fn extract_timestamp(evidence: &Evidence) -> Option<DateTime<Utc>> {
    let raw = evidence.records().first()?.pointer(TIMESTAMP_POINTER)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Judge a recovered timestamp against `cutoff`.
pub fn judge(signed_at: Option<DateTime<Utc>>, cutoff: DateTime<Utc>) -> BackfillDecision {
    match signed_at {
        None => BackfillDecision::RejectedNoTimestamp,
        Some(signed_at) if signed_at < cutoff => BackfillDecision::Accepted { signed_at },
        Some(signed_at) => BackfillDecision::RejectedTooRecent { signed_at },
    }
}

/// Judge backfill evidence against `cutoff`.
pub fn decide(evidence: &Evidence, cutoff: DateTime<Utc>) -> BackfillDecision {
    judge(extract_timestamp(evidence), cutoff)
}

/// Run the primary/backfill state machine for one artifact.
///
/// Only `CredentialsMissing` escapes as an error.
pub async fn settle<O: AttestationOracle + ?Sized>(
    oracle: &O,
    artifact: &Artifact,
    authorities: &Authorities,
    cutoff: DateTime<Utc>,
) -> Result<Disposition, VerifyError> {
    let primary = &authorities.primary;
    let detail = match oracle.verify(artifact, primary).await? {
        VerificationOutcome::Verified(evidence) => {
            return Ok(Disposition::Verified {
                authority: primary.clone(),
                evidence,
            });
        },
        VerificationOutcome::Unverified {
            kind: FailureKind::ExternalToolFailure,
            detail,
        } => detail,
        VerificationOutcome::Unverified { kind, detail } => {
            debug!(%kind, "Primary verification failed; no fallback for this kind");
            return Ok(Disposition::Failed(FailureReason::Unverified {
                authority: primary.clone(),
                kind,
                detail,
            }));
        },
    };

    let backfill = &authorities.backfill;
    debug!(primary_detail = %detail, backfill = %backfill, "Trying backfill authority");
    let evidence = match oracle.verify(artifact, backfill).await? {
        VerificationOutcome::Verified(evidence) => evidence,
        VerificationOutcome::Unverified { kind, detail } => {
            return Ok(Disposition::Failed(FailureReason::Unverified {
                authority: backfill.clone(),
                kind,
                detail,
            }));
        },
    };

    Ok(match decide(&evidence, cutoff) {
        BackfillDecision::Accepted { signed_at } => {
            info!(%signed_at, "Accepted backfilled attestation");
            Disposition::Backfilled {
                authority: backfill.clone(),
                evidence,
                signed_at,
            }
        },
        BackfillDecision::RejectedNoTimestamp => {
            warn!("Backfilled attestation has no signing timestamp");
            Disposition::Failed(FailureReason::BackfillNoTimestamp {
                authority: backfill.clone(),
            })
        },
        BackfillDecision::RejectedTooRecent { signed_at } => {
            warn!(%signed_at, "Backfilled attestation signed after cutoff");
            Disposition::Failed(FailureReason::BackfillTooRecent {
                authority: backfill.clone(),
                signed_at,
            })
        },
    })
}
