//! Expansion of targets across requested platforms.

use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::error::VerifyError;
use crate::platform::{self, Arch, OsVersion, PlatformTag};
use crate::types::{Target, VerificationUnit};

/// One platform axis as requested by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector<T> {
    /// Not given: use the host value.
    Host,
    /// `all`: every supported value, invalid combinations dropped.
    All,
    /// A single explicit value.
    Only(T),
}

impl<T: FromStr<Err = String>> Selector<T> {
    fn parse(raw: Option<&str>, axis: &str) -> Result<Self, VerifyError> {
        match raw.map(str::trim) {
            None => Ok(Self::Host),
            Some(value) if value.eq_ignore_ascii_case("all") => Ok(Self::All),
            Some(value) => value.parse().map(Self::Only).map_err(|e| {
                VerifyError::ConfigError {
                    message: format!("invalid {axis}: {e}"),
                }
            }),
        }
    }
}

/// Which platforms to verify. An explicit tag and an OS/arch matrix cannot
/// both be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformSelection {
    /// A single explicit bottle tag.
    Explicit(PlatformTag),
    /// Cartesian product of the OS and architecture axes.
    Matrix {
        /// Operating systems.
        os: Selector<OsVersion>,
        /// Architectures.
        arch: Selector<Arch>,
    },
}

impl Default for PlatformSelection {
    fn default() -> Self {
        Self::Matrix {
            os: Selector::Host,
            arch: Selector::Host,
        }
    }
}

impl PlatformSelection {
    /// Build a selection from raw option values.
    ///
    /// A tag combined with an OS or architecture is a `ConfigConflict`.
    pub fn from_options(
        bottle_tag: Option<&str>,
        os: Option<&str>,
        arch: Option<&str>,
    ) -> Result<Self, VerifyError> {
        match (bottle_tag, os, arch) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(VerifyError::ConfigConflict {
                message: "--bottle-tag cannot be combined with --os or --arch".into(),
            }),
            (Some(tag), None, None) => Ok(Self::Explicit(PlatformTag::parse(tag)?)),
            (None, os, arch) => Ok(Self::Matrix {
                os: Selector::parse(os, "operating system")?,
                arch: Selector::parse(arch, "architecture")?,
            }),
        }
    }

    /// Platforms to verify, resolving `Host` against the running machine.
    pub fn platforms(&self) -> Result<Vec<PlatformTag>, VerifyError> {
        self.platforms_with(platform::host_os, platform::host_arch)
    }

    /// Platforms to verify, with injected host detection.
    ///
    /// OS order is outermost, architecture innermost.
    pub fn platforms_with(
        &self,
        host_os: impl FnOnce() -> Result<OsVersion, VerifyError>,
        host_arch: impl FnOnce() -> Result<Arch, VerifyError>,
    ) -> Result<Vec<PlatformTag>, VerifyError> {
        let (os, arch) = match self {
            Self::Explicit(tag) => return Ok(vec![tag.clone()]),
            Self::Matrix { os, arch } => (os, arch),
        };

        let filter_invalid = matches!(os, Selector::All) || matches!(arch, Selector::All);
        let oses = match os {
            Selector::Host => vec![host_os()?],
            Selector::All => OsVersion::ALL.to_vec(),
            Selector::Only(os) => vec![*os],
        };
        let arches = match arch {
            Selector::Host => vec![host_arch()?],
            Selector::All => Arch::ALL.to_vec(),
            Selector::Only(arch) => vec![*arch],
        };

        let tags: Vec<PlatformTag> = oses
            .iter()
            .flat_map(|&os| arches.iter().map(move |&arch| PlatformTag::from_parts(os, arch)))
            .filter(|tag| !filter_invalid || tag.is_valid_combination())
            .collect();
        debug!(count = tags.len(), "Expanded platform selection");
        Ok(tags)
    }
}

/// Cross every target with every platform, target order outermost.
pub fn expand_units(targets: &[Arc<Target>], platforms: &[PlatformTag]) -> Vec<VerificationUnit> {
    targets
        .iter()
        .flat_map(|target| {
            platforms.iter().map(move |tag| VerificationUnit {
                target: Arc::clone(target),
                tag: tag.clone(),
            })
        })
        .collect()
}
