//! # bottle-verify-core
//!
//! Build-provenance verification for Homebrew bottles. Bottles are fetched
//! and checked against GitHub artifact attestations through the `gh` CLI,
//! with a time-bounded fallback to a backfill signing authority for bottles
//! published before attestations existed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       VerifyEngine                           │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │ PackageIndex │─▶│   resolve    │─▶│    expand    │       │
//! │  │ (formulae)   │  │ (deps, dedup)│  │ (os × arch)  │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │                                             │                │
//! │                                             ▼ per unit       │
//! │  ┌──────────────────────────────────────────────────┐       │
//! │  │          HttpBottleFetcher (cache, sha256)        │       │
//! │  └──────────────────────────────────────────────────┘       │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐       │
//! │  │   backfill::settle ── GhCliOracle (gh attestation)│       │
//! │  │   primary ─▶ backfill (cutoff 2024-03-14)         │       │
//! │  └──────────────────────────────────────────────────┘       │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐       │
//! │  │        Reporter (status lines | JSON array)       │       │
//! │  └──────────────────────────────────────────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Handling
//!
//! - Unknown packages, conflicting options and missing credentials abort the run
//! - Everything else is recovered per unit and reported
//! - Backfilled signatures on or after the cutoff are never trusted

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod backfill;
pub mod config;
pub mod engine;
pub mod error;
pub mod expand;
pub mod fetch;
pub mod index;
pub mod oracle;
pub mod platform;
pub mod report;
pub mod resolve;
pub mod types;

pub use backfill::{backfill_cutoff, decide, settle, BackfillDecision, BACKFILL_CUTOFF_UNIX};
pub use config::VerifyConfig;
pub use engine::{VerifyEngine, VerifyRequest};
pub use error::VerifyError;
pub use expand::{expand_units, PlatformSelection, Selector};
pub use fetch::{BottleFetcher, FetchOutcome, HttpBottleFetcher};
pub use index::PackageIndex;
pub use oracle::{classify, AttestationOracle, GhCliOracle};
pub use platform::{Arch, OsVersion, PlatformTag};
pub use report::{OutputMode, Reporter, Summary};
pub use resolve::{resolve_targets, PackageSource, Resolution, ResolveOptions, Resolved};
pub use types::{
    Artifact, Authorities, BottleFile, Disposition, Evidence, FailureKind, FailureReason,
    SigningAuthority, Target, UnitReport, VerificationOutcome, VerificationUnit,
};
