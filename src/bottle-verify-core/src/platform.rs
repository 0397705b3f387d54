//! Platform tags identifying which build of a bottle to verify.
//!
//! A tag is either a decomposed (OS, architecture) pair or an opaque symbol
//! we could not decompose. The canonical symbol follows the bottle naming
//! used by the formula index: Intel macOS bottles are keyed by the bare
//! codename (`sonoma`), everything else by `<arch>_<os>` (`arm64_sonoma`,
//! `x86_64_linux`).

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::VerifyError;

/// Operating system a bottle is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OsVersion {
    /// macOS 26.
    Tahoe,
    /// macOS 15.
    Sequoia,
    /// macOS 14.
    Sonoma,
    /// macOS 13.
    Ventura,
    /// macOS 12.
    Monterey,
    /// macOS 11.
    BigSur,
    /// macOS 10.15.
    Catalina,
    /// Any glibc Linux.
    Linux,
}

impl OsVersion {
    /// Every supported OS, macOS releases newest first, then Linux.
    pub const ALL: [OsVersion; 8] = [
        Self::Tahoe,
        Self::Sequoia,
        Self::Sonoma,
        Self::Ventura,
        Self::Monterey,
        Self::BigSur,
        Self::Catalina,
        Self::Linux,
    ];

    /// Symbol used in bottle tags.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Tahoe => "tahoe",
            Self::Sequoia => "sequoia",
            Self::Sonoma => "sonoma",
            Self::Ventura => "ventura",
            Self::Monterey => "monterey",
            Self::BigSur => "big_sur",
            Self::Catalina => "catalina",
            Self::Linux => "linux",
        }
    }

    /// Look up an OS by its tag symbol.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|os| os.symbol() == symbol)
    }

    /// Whether this is a macOS release.
    pub fn is_macos(self) -> bool {
        self != Self::Linux
    }

    /// Map a macOS product version (`sw_vers -productVersion`) to a release.
    pub fn from_macos_version(version: &str) -> Option<Self> {
        let mut parts = version.trim().split('.');
        let major: u32 = parts.next()?.parse().ok()?;
        match major {
            26 => Some(Self::Tahoe),
            15 => Some(Self::Sequoia),
            14 => Some(Self::Sonoma),
            13 => Some(Self::Ventura),
            12 => Some(Self::Monterey),
            11 => Some(Self::BigSur),
            10 => match parts.next()?.parse::<u32>().ok()? {
                15 => Some(Self::Catalina),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for OsVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "macos" {
            return Ok(Self::ALL[0]);
        }
        Self::from_symbol(&s).ok_or_else(|| format!("unknown operating system: {s}"))
    }
}

/// CPU architecture a bottle is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arch {
    /// x86_64.
    Intel,
    /// arm64 / aarch64.
    Arm,
}

impl Arch {
    /// Every supported architecture.
    pub const ALL: [Arch; 2] = [Self::Intel, Self::Arm];

    /// Symbol used in bottle tags.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Intel => "x86_64",
            Self::Arm => "arm64",
        }
    }

    /// Look up an architecture by symbol or common alias.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "intel" | "x86_64" => Some(Self::Intel),
            "arm" | "arm64" | "aarch64" => Some(Self::Arm),
            _ => None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Self::from_symbol(&s).ok_or_else(|| format!("unknown architecture: {s}"))
    }
}

/// Identity of a verification platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlatformTag {
    /// A tag decomposed into its parts.
    Known {
        /// Operating system.
        os: OsVersion,
        /// CPU architecture.
        arch: Arch,
    },
    /// A well-formed tag we cannot decompose (e.g. `all`).
    Opaque(String),
}

impl PlatformTag {
    /// Build the canonical tag for an (OS, architecture) pair.
    pub fn from_parts(os: OsVersion, arch: Arch) -> Self {
        Self::Known { os, arch }
    }

    /// Parse an explicit tag symbol.
    ///
    /// `<arch>_<os>` and bare `<os>` (implying Intel) decompose when the OS
    /// is known. Other symbols made of `[a-z0-9_]` are kept opaque.
    pub fn parse(symbol: &str) -> Result<Self, VerifyError> {
        let s = symbol.trim();
        let well_formed = !s.is_empty()
            && s
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
        if !well_formed {
            return Err(VerifyError::MalformedTag {
                tag: symbol.to_string(),
            });
        }

        let decomposed = [Arch::Arm, Arch::Intel]
            .into_iter()
            .find_map(|arch| {
                s.strip_prefix(arch.symbol())
                    .and_then(|rest| rest.strip_prefix('_'))
                    .and_then(OsVersion::from_symbol)
                    .map(|os| (os, arch))
            })
            .or_else(|| OsVersion::from_symbol(s).map(|os| (os, Arch::Intel)));

        let tag = match decomposed {
            Some((os, arch)) => Self::from_parts(os, arch),
            None => Self::Opaque(s.to_string()),
        };
        debug!(input = %symbol, tag = %tag, "Parsed bottle tag");
        Ok(tag)
    }

    /// Canonical tag symbol as used for bottle lookup.
    pub fn symbol(&self) -> String {
        match self {
            Self::Known { os, arch } if os.is_macos() && *arch == Arch::Intel => {
                os.symbol().to_string()
            },
            Self::Known { os, arch } => format!("{}_{}", arch.symbol(), os.symbol()),
            Self::Opaque(s) => s.clone(),
        }
    }

    /// Operating system, when known.
    pub fn os(&self) -> Option<OsVersion> {
        match self {
            Self::Known { os, .. } => Some(*os),
            Self::Opaque(_) => None,
        }
    }

    /// Architecture, when known.
    pub fn arch(&self) -> Option<Arch> {
        match self {
            Self::Known { arch, .. } => Some(*arch),
            Self::Opaque(_) => None,
        }
    }

    /// Whether bottles can exist for this combination.
    ///
    /// Only consulted when expanding `all`; Apple Silicon starts at Big Sur.
    pub fn is_valid_combination(&self) -> bool {
        !matches!(
            self,
            Self::Known {
                os: OsVersion::Catalina,
                arch: Arch::Arm,
            }
        )
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol())
    }
}

/// Architecture of the running host.
pub fn host_arch() -> Result<Arch, VerifyError> {
    Arch::from_symbol(std::env::consts::ARCH).ok_or_else(|| VerifyError::HostPlatform {
        message: format!("unsupported architecture {}", std::env::consts::ARCH),
    })
}

/// Operating system release of the running host.
pub fn host_os() -> Result<OsVersion, VerifyError> {
    match std::env::consts::OS {
        "linux" => Ok(OsVersion::Linux),
        "macos" => {
            let output = std::process::Command::new("sw_vers")
                .arg("-productVersion")
                .output()
                .map_err(|e| VerifyError::HostPlatform {
                    message: format!("failed to run sw_vers: {e}"),
                })?;
            let version = String::from_utf8_lossy(&output.stdout);
            OsVersion::from_macos_version(&version).ok_or_else(|| VerifyError::HostPlatform {
                message: format!("unsupported macOS version {}", version.trim()),
            })
        },
        other => Err(VerifyError::HostPlatform {
            message: format!("unsupported operating system {other}"),
        }),
    }
}
