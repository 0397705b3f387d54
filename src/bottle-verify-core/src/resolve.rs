//! Target resolution: user-named packages to the set of bottles to check.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::VerifyError;
use crate::types::Target;

/// What a user-supplied name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A formula, which may have bottles.
    Formula(Arc<Target>),
    /// A cask. Casks have no bottles and are never verified.
    Cask(String),
}

/// Package resolution collaborator.
pub trait PackageSource: Send + Sync {
    /// Resolve a name. Unknown names are `VerifyError::UnknownPackage`.
    fn resolve(&self, name: &str) -> Result<Resolved, VerifyError>;

    /// Direct runtime dependencies of a target.
    fn dependencies_of(&self, target: &Target) -> Result<Vec<Arc<Target>>, VerifyError>;
}

/// Outcome of resolving the user's names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Distinct targets, first occurrence order.
    pub targets: Vec<Arc<Target>>,
    /// Names skipped because they are not bottle-bearing.
    pub skipped: Vec<String>,
}

/// How names are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Add the transitive dependencies of every named formula.
    pub include_dependencies: bool,
    /// Treat every name as a formula; a cask name is then unknown.
    pub formulae_only: bool,
}

/// Resolve names into distinct targets, optionally with their dependency closure.
///
/// Each direct argument is followed by its not-yet-seen transitive
/// dependencies, deepest first. A package reached through several paths is
/// listed once.
pub fn resolve_targets<S: PackageSource + ?Sized>(
    source: &S,
    names: &[String],
    options: ResolveOptions,
) -> Result<Resolution, VerifyError> {
    let mut resolution = Resolution::default();
    let mut seen: HashSet<String> = HashSet::new();

    for name in names {
        match source.resolve(name)? {
            Resolved::Formula(target) => {
                if seen.insert(target.name.clone()) {
                    resolution.targets.push(Arc::clone(&target));
                }
                if options.include_dependencies {
                    collect_dependencies(source, &target, &mut seen, &mut resolution.targets)?;
                }
            },
            Resolved::Cask(_) if options.formulae_only => {
                return Err(VerifyError::UnknownPackage { name: name.clone() });
            },
            Resolved::Cask(token) => {
                warn!(cask = %token, "Skipping cask; only bottles can be verified");
                if !resolution.skipped.contains(&token) {
                    resolution.skipped.push(token);
                }
            },
        }
    }

    info!(
        targets = resolution.targets.len(),
        skipped = resolution.skipped.len(),
        include_dependencies = options.include_dependencies,
        "Resolved verification targets"
    );
    Ok(resolution)
}

fn collect_dependencies<S: PackageSource + ?Sized>(
    source: &S,
    target: &Target,
    seen: &mut HashSet<String>,
    out: &mut Vec<Arc<Target>>,
) -> Result<(), VerifyError> {
    for dep in source.dependencies_of(target)? {
        if !seen.insert(dep.name.clone()) {
            continue;
        }
        debug!(dependency = %dep.name, parent = %target.name, "Expanding dependency");
        collect_dependencies(source, &dep, seen, out)?;
        out.push(dep);
    }
    Ok(())
}
