//! Formula and cask index backing package resolution.
//!
//! Reads the JSON API format published at `formulae.brew.sh` (an array of
//! formula objects, and optionally an array of cask objects). Only the fields
//! needed to locate bottles and walk dependencies are deserialized.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::error::VerifyError;
use crate::resolve::{PackageSource, Resolved};
use crate::types::{BottleFile, Target};

#[derive(Debug, Deserialize)]
struct FormulaRecord {
    name: String,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    oldnames: Vec<String>,
    #[serde(default)]
    versions: Versions,
    #[serde(default)]
    revision: u32,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    bottle: BottleSpec,
}

#[derive(Debug, Default, Deserialize)]
struct Versions {
    #[serde(default)]
    stable: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BottleSpec {
    #[serde(default)]
    stable: Option<StableBottle>,
}

#[derive(Debug, Deserialize)]
struct StableBottle {
    #[serde(default)]
    rebuild: u32,
    #[serde(default)]
    files: BTreeMap<String, BottleFile>,
}

#[derive(Debug, Deserialize)]
struct CaskRecord {
    token: String,
}

impl FormulaRecord {
    fn into_target(self) -> Target {
        let stable = self.versions.stable.unwrap_or_default();
        let version = if self.revision > 0 {
            format!("{}_{}", stable, self.revision)
        } else {
            stable
        };
        let (rebuild, bottles) = match self.bottle.stable {
            Some(b) => (b.rebuild, b.files),
            None => (0, BTreeMap::new()),
        };
        Target {
            name: self.name,
            version,
            rebuild,
            bottles,
            dependencies: self.dependencies,
        }
    }
}

/// In-memory package index.
#[derive(Debug, Default)]
pub struct PackageIndex {
    formulae: Vec<Arc<Target>>,
    by_name: HashMap<String, usize>,
    casks: HashSet<String>,
}

impl PackageIndex {
    /// Build an index from formula JSON and optional cask JSON.
    pub fn from_json(formulae: &str, casks: Option<&str>) -> Result<Self, VerifyError> {
        let records: Vec<FormulaRecord> =
            serde_json::from_str(formulae).map_err(|e| VerifyError::IndexError {
                message: format!("Failed to parse formula index: {}", e),
            })?;

        let mut index = Self::default();
        let mut secondary = Vec::new();
        for record in records {
            let slot = index.formulae.len();
            index.by_name.entry(record.name.clone()).or_insert(slot);
            let others: Vec<String> = record
                .full_name
                .iter()
                .chain(&record.aliases)
                .chain(&record.oldnames)
                .cloned()
                .collect();
            secondary.push((slot, others));
            index.formulae.push(Arc::new(record.into_target()));
        }
        // Canonical names always win over another formula's alias or old name.
        for (slot, names) in secondary {
            for name in names {
                index.by_name.entry(name).or_insert(slot);
            }
        }

        if let Some(raw) = casks {
            let records: Vec<CaskRecord> =
                serde_json::from_str(raw).map_err(|e| VerifyError::IndexError {
                    message: format!("Failed to parse cask index: {}", e),
                })?;
            index.casks = records.into_iter().map(|c| c.token).collect();
        }

        debug!(
            formulae = index.formulae.len(),
            casks = index.casks.len(),
            "Built package index"
        );
        Ok(index)
    }

    /// Load an index from local paths or `http(s)` URLs.
    #[instrument(skip(timeout))]
    pub async fn load(
        formulae: &str,
        casks: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, VerifyError> {
        let formula_json = read_source(formulae, timeout).await?;
        let cask_json = match casks {
            Some(source) => Some(read_source(source, timeout).await?),
            None => None,
        };
        let index = Self::from_json(&formula_json, cask_json.as_deref())?;
        info!(
            formulae = index.formulae.len(),
            casks = index.casks.len(),
            "Loaded package index"
        );
        Ok(index)
    }

    /// Number of formulae in the index.
    pub fn len(&self) -> usize {
        self.formulae.len()
    }

    /// Whether the index has no formulae.
    pub fn is_empty(&self) -> bool {
        self.formulae.is_empty()
    }

    fn lookup(&self, name: &str) -> Option<&Arc<Target>> {
        let short = name.strip_prefix("homebrew/core/").unwrap_or(name);
        [name, short]
            .into_iter()
            .find_map(|n| self.by_name.get(n))
            .map(|&slot| &self.formulae[slot])
    }
}

impl PackageSource for PackageIndex {
    fn resolve(&self, name: &str) -> Result<Resolved, VerifyError> {
        if let Some(target) = self.lookup(name) {
            return Ok(Resolved::Formula(Arc::clone(target)));
        }
        let token = name.strip_prefix("homebrew/cask/").unwrap_or(name);
        if self.casks.contains(token) {
            return Ok(Resolved::Cask(token.to_string()));
        }
        Err(VerifyError::UnknownPackage {
            name: name.to_string(),
        })
    }

    fn dependencies_of(&self, target: &Target) -> Result<Vec<Arc<Target>>, VerifyError> {
        target
            .dependencies
            .iter()
            .map(|dep| {
                self.lookup(dep)
                    .cloned()
                    .ok_or_else(|| VerifyError::UnknownPackage { name: dep.clone() })
            })
            .collect()
    }
}

async fn read_source(source: &str, timeout: Duration) -> Result<String, VerifyError> {
    if source.starts_with("https://") || source.starts_with("http://") {
        debug!("Fetching index from {}", source);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("bottle-verify/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VerifyError::IndexError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        let response = client
            .get(source)
            .send()
            .await
            .map_err(|e| VerifyError::IndexError {
                message: format!("Index request failed: {}", e),
            })?;
        if !response.status().is_success() {
            return Err(VerifyError::IndexError {
                message: format!("Index HTTP error: {} ({})", response.status(), source),
            });
        }
        response.text().await.map_err(|e| VerifyError::IndexError {
            message: format!("Failed to read index body: {}", e),
        })
    } else {
        tokio::fs::read_to_string(Path::new(source))
            .await
            .map_err(|e| VerifyError::IndexError {
                message: format!("Failed to read index {}: {}", source, e),
            })
    }
}
