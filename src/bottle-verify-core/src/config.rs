//! Configuration for verification runs.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::VerifyError;
use crate::types::{Authorities, SigningAuthority};

/// Repository whose attestations cover current bottles.
pub const PRIMARY_AUTHORITY: &str = "Homebrew/homebrew-core";

/// Repository that backfilled attestations for older bottles.
pub const BACKFILL_AUTHORITY: &str = "trailofbits/homebrew-brew-verify";

/// Default formula index.
pub const DEFAULT_FORMULA_INDEX: &str = "https://formulae.brew.sh/api/formula.json";

/// Configuration for bottle verification.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Attestation tool executable.
    pub gh_program: String,
    /// Primary signing authority.
    pub primary_authority: SigningAuthority,
    /// Backfill signing authority.
    pub backfill_authority: SigningAuthority,
    /// Per-invocation attestation tool timeout.
    pub oracle_timeout: Duration,
    /// Token handed to the attestation tool as `GH_TOKEN`.
    pub github_token: Option<String>,
    /// Formula index path or URL.
    pub formula_index: String,
    /// Optional cask index path or URL.
    pub cask_index: Option<String>,
    /// Bottle download cache.
    pub cache_dir: PathBuf,
    /// Download / index request timeout.
    pub http_timeout: Duration,
    /// Maximum units processed concurrently.
    pub jobs: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            gh_program: "gh".into(),
            primary_authority: SigningAuthority::new(PRIMARY_AUTHORITY),
            backfill_authority: SigningAuthority::new(BACKFILL_AUTHORITY),
            oracle_timeout: Duration::from_secs(120),
            github_token: None,
            formula_index: DEFAULT_FORMULA_INDEX.into(),
            cask_index: None,
            cache_dir: default_cache_dir(),
            http_timeout: Duration::from_secs(300),
            jobs: 1,
        }
    }
}

impl VerifyConfig {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Result<Self, VerifyError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, VerifyError> {
        let mut config = Self::default();

        if let Some(gh) = lookup("BOTTLE_VERIFY_GH") {
            config.gh_program = gh;
        }
        if let Some(index) = lookup("BOTTLE_VERIFY_FORMULA_INDEX") {
            config.formula_index = index;
        }
        if let Some(index) = lookup("BOTTLE_VERIFY_CASK_INDEX") {
            config.cask_index = Some(index);
        }
        if let Some(dir) = lookup("BOTTLE_VERIFY_CACHE") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(jobs) = lookup("BOTTLE_VERIFY_JOBS") {
            config.jobs = parse_number("BOTTLE_VERIFY_JOBS", &jobs)?;
        }
        if let Some(secs) = lookup("BOTTLE_VERIFY_ORACLE_TIMEOUT") {
            config.oracle_timeout =
                Duration::from_secs(parse_number("BOTTLE_VERIFY_ORACLE_TIMEOUT", &secs)?);
        }
        config.github_token = lookup("HOMEBREW_GITHUB_API_TOKEN")
            .or_else(|| lookup("GH_TOKEN"))
            .filter(|t| !t.is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot drive a run.
    pub fn validate(&self) -> Result<(), VerifyError> {
        if self.jobs == 0 {
            return Err(VerifyError::ConfigError {
                message: "jobs must be at least 1".into(),
            });
        }
        if self.oracle_timeout.is_zero() {
            return Err(VerifyError::ConfigError {
                message: "attestation timeout must be non-zero".into(),
            });
        }
        Ok(())
    }

    /// The primary/backfill authority pair.
    pub fn authorities(&self) -> Authorities {
        Authorities {
            primary: self.primary_authority.clone(),
            backfill: self.backfill_authority.clone(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, VerifyError> {
    raw.trim().parse().map_err(|_| VerifyError::ConfigError {
        message: format!("{key} must be a non-negative integer, got {raw:?}"),
    })
}

fn default_cache_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg).join("bottle-verify");
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".cache").join("bottle-verify"),
        None => std::env::temp_dir().join("bottle-verify"),
    }
}
