//! Shared data model for verification runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::PlatformTag;

/// One published bottle file for a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleFile {
    /// Download URL.
    pub url: String,
    /// Expected SHA-256, lowercase hex.
    pub sha256: String,
}

/// A named package to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Canonical package name.
    pub name: String,
    /// Stable version, including any `_<revision>` suffix.
    pub version: String,
    /// Bottle rebuild counter.
    pub rebuild: u32,
    /// Published bottles keyed by tag symbol.
    pub bottles: BTreeMap<String, BottleFile>,
    /// Names of direct runtime dependencies, in declaration order.
    pub dependencies: Vec<String>,
}

impl Target {
    /// Bottle published for a tag, falling back to the `all` bottle.
    ///
    /// Returns the tag key the bottle is published under.
    pub fn bottle_for(&self, tag: &PlatformTag) -> Option<(&str, &BottleFile)> {
        self.bottles
            .get_key_value(&tag.symbol())
            .or_else(|| self.bottles.get_key_value("all"))
            .map(|(key, file)| (key.as_str(), file))
    }
}

/// A (target, platform) pair awaiting fetch and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationUnit {
    /// Package being verified.
    pub target: Arc<Target>,
    /// Platform whose bottle is verified.
    pub tag: PlatformTag,
}

impl fmt::Display for VerificationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.target.name, self.tag)
    }
}

/// A fetched bottle on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Path to the cached bottle.
    pub path: PathBuf,
    /// SHA-256 of the file, lowercase hex.
    pub sha256: String,
}

/// Identity whose signature the attestation tool checks against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigningAuthority(pub String);

impl SigningAuthority {
    /// Create an authority from a repository slug.
    pub fn new(repo: impl Into<String>) -> Self {
        Self(repo.into())
    }

    /// Repository slug, e.g. `Homebrew/homebrew-core`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SigningAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The primary/backfill pair of authorities used for every unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorities {
    /// Tried first.
    pub primary: SigningAuthority,
    /// Tried only when the primary call itself failed.
    pub backfill: SigningAuthority,
}

/// Attestation records returned by a successful verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Evidence(pub Vec<serde_json::Value>);

impl Evidence {
    /// Raw attestation records.
    pub fn records(&self) -> &[serde_json::Value] {
        &self.0
    }
}

/// Why a single verification attempt did not produce evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The tool exited non-zero, could not be spawned, or timed out.
    ExternalToolFailure,
    /// The tool succeeded but its output was not an evidence array.
    MalformedEvidence,
    /// The tool succeeded but returned no attestations.
    EvidenceEmpty,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ExternalToolFailure => "attestation tool failed",
            Self::MalformedEvidence => "malformed attestation output",
            Self::EvidenceEmpty => "no attestations found",
        })
    }
}

/// Result of one call to the attestation tool.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    /// Attestations were found and verified.
    Verified(Evidence),
    /// No evidence was produced.
    Unverified {
        /// Failure class.
        kind: FailureKind,
        /// Diagnostic detail.
        detail: String,
    },
}

impl VerificationOutcome {
    /// Shorthand for an `Unverified` outcome.
    pub fn unverified(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Unverified {
            kind,
            detail: detail.into(),
        }
    }
}

/// Why a unit ended in failure.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// The last attempted authority did not verify the bottle.
    Unverified {
        /// Authority of the last attempt.
        authority: SigningAuthority,
        /// Failure class.
        kind: FailureKind,
        /// Diagnostic detail.
        detail: String,
    },
    /// Backfill evidence carried no usable timestamp.
    BackfillNoTimestamp {
        /// Backfill authority.
        authority: SigningAuthority,
    },
    /// Backfill evidence was signed on or after the cutoff.
    BackfillTooRecent {
        /// Backfill authority.
        authority: SigningAuthority,
        /// Signing time recovered from the evidence.
        signed_at: DateTime<Utc>,
    },
    /// The bottle could not be fetched.
    FetchFailed {
        /// Error message.
        message: String,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unverified {
                authority,
                kind,
                detail,
            } => write!(f, "{kind} for {authority}: {detail}"),
            Self::BackfillNoTimestamp { authority } => write!(
                f,
                "backfill attestation from {authority} has no signing timestamp"
            ),
            Self::BackfillTooRecent {
                authority,
                signed_at,
            } => write!(
                f,
                "backfill attestation from {authority} is too recent (signed {})",
                signed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            Self::FetchFailed { message } => write!(f, "fetch failed: {message}"),
        }
    }
}

/// Final disposition of one unit after fallback resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Verified against the primary authority.
    Verified {
        /// Authority that verified.
        authority: SigningAuthority,
        /// Evidence returned.
        evidence: Evidence,
    },
    /// Verified against the backfill authority before the cutoff.
    Backfilled {
        /// Authority that verified.
        authority: SigningAuthority,
        /// Evidence returned.
        evidence: Evidence,
        /// Signing time recovered from the evidence.
        signed_at: DateTime<Utc>,
    },
    /// Not verified.
    Failed(FailureReason),
}

impl Disposition {
    /// Evidence for successful dispositions.
    pub fn evidence(&self) -> Option<&Evidence> {
        match self {
            Self::Verified { evidence, .. } | Self::Backfilled { evidence, .. } => Some(evidence),
            Self::Failed(_) => None,
        }
    }

    /// Whether the unit is considered verified.
    pub fn is_success(&self) -> bool {
        self.evidence().is_some()
    }
}

/// Disposition of a unit, ready for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitReport {
    /// The unit.
    pub unit: VerificationUnit,
    /// Its final disposition.
    pub disposition: Disposition,
}
