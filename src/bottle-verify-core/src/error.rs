//! Error types for verification runs.
//!
//! Only conditions that end the whole run travel as `VerifyError`. A bottle
//! that fails verification is a value ([`crate::types::Disposition`]), not an
//! error.

use thiserror::Error;

/// Errors that can occur while orchestrating a verification run.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// A named package does not exist in the package index.
    #[error("No available formula with the name \"{name}\"")]
    UnknownPackage {
        /// The name as given by the user.
        name: String,
    },

    /// The attestation tool reported that it has no usable credentials.
    #[error("Attestation credentials missing: {message}")]
    CredentialsMissing {
        /// Diagnostic captured from the tool.
        message: String,
    },

    /// Mutually exclusive options were combined.
    #[error("Conflicting options: {message}")]
    ConfigConflict {
        /// Which options conflict.
        message: String,
    },

    /// A bottle tag could not be parsed.
    #[error("Malformed bottle tag: {tag:?}")]
    MalformedTag {
        /// The offending tag.
        tag: String,
    },

    /// The host platform could not be mapped onto a bottle platform.
    #[error("Cannot determine host platform: {message}")]
    HostPlatform {
        /// Reason detection failed.
        message: String,
    },

    /// The package index could not be loaded or parsed.
    #[error("Package index error: {message}")]
    IndexError {
        /// Error message.
        message: String,
    },

    /// A bottle could not be downloaded or failed its checksum.
    #[error("Fetch error: {message}")]
    FetchError {
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Error message.
        message: String,
    },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VerifyError {
    /// Check if this error must abort the whole run.
    ///
    /// Everything else is recovered at the unit boundary.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownPackage { .. }
                | Self::CredentialsMissing { .. }
                | Self::ConfigConflict { .. }
                | Self::MalformedTag { .. }
                | Self::HostPlatform { .. }
                | Self::IndexError { .. }
                | Self::ConfigError { .. }
        )
    }

    /// User-facing guidance for errors the user can fix themselves.
    #[must_use]
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::CredentialsMissing { .. } => Some(
                "The GitHub CLI needs credentials to query attestations. \
                 Set HOMEBREW_GITHUB_API_TOKEN (or GH_TOKEN) to a token with \
                 no scopes, or run `gh auth login`.",
            ),
            Self::ConfigConflict { .. } => {
                Some("Pass either --bottle-tag or --os/--arch, not both.")
            },
            Self::HostPlatform { .. } => Some("Pass --os and --arch explicitly."),
            _ => None,
        }
    }
}
