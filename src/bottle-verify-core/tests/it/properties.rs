//! Property-based tests for target resolution, platform expansion and the
//! backfill cutoff.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Duration;
use proptest::prelude::*;

use bottle_verify_core::backfill::judge;
use bottle_verify_core::{
    backfill_cutoff, expand_units, resolve_targets, Arch, BackfillDecision, OsVersion,
    PackageSource, PlatformSelection, PlatformTag, ResolveOptions, Resolved, Selector, Target,
    VerifyError,
};

const WITH_DEPS: ResolveOptions = ResolveOptions {
    include_dependencies: true,
    formulae_only: false,
};

/// A dependency graph over `pkg0..pkgN`.
struct Graph {
    nodes: HashMap<String, Arc<Target>>,
}

impl Graph {
    fn new(size: usize, edges: &[(usize, usize)]) -> Self {
        let nodes = (0..size)
            .map(|i| {
                let dependencies = edges
                    .iter()
                    .filter(|(from, _)| *from % size == i)
                    .map(|(_, to)| pkg(*to % size))
                    .collect();
                let target = Target {
                    name: pkg(i),
                    version: "1.0".into(),
                    rebuild: 0,
                    bottles: BTreeMap::new(),
                    dependencies,
                };
                (pkg(i), Arc::new(target))
            })
            .collect();
        Self { nodes }
    }
}

impl PackageSource for Graph {
    fn resolve(&self, name: &str) -> Result<Resolved, VerifyError> {
        self.nodes
            .get(name)
            .cloned()
            .map(Resolved::Formula)
            .ok_or_else(|| VerifyError::UnknownPackage { name: name.into() })
    }

    fn dependencies_of(&self, target: &Target) -> Result<Vec<Arc<Target>>, VerifyError> {
        target
            .dependencies
            .iter()
            .map(|d| match self.resolve(d)? {
                Resolved::Formula(t) => Ok(t),
                Resolved::Cask(_) => unreachable!(),
            })
            .collect()
    }
}

fn pkg(i: usize) -> String {
    format!("pkg{}", i)
}

/// Strategy for a graph size, its edges (cycles allowed) and requested names.
fn graph_and_names() -> impl Strategy<Value = (usize, Vec<(usize, usize)>, Vec<usize>)> {
    (1usize..8).prop_flat_map(|size| {
        (
            Just(size),
            prop::collection::vec((0..size, 0..size), 0..16),
            prop::collection::vec(0..size, 1..6),
        )
    })
}

fn tag_strategy() -> impl Strategy<Value = PlatformTag> {
    (
        prop::sample::select(OsVersion::ALL.to_vec()),
        prop::sample::select(Arch::ALL.to_vec()),
    )
        .prop_map(|(os, arch)| PlatformTag::from_parts(os, arch))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    // ========================================================================
    // Resolution Properties
    // ========================================================================

    /// Without dependencies, targets are the requested names deduplicated in
    /// first-occurrence order.
    #[test]
    fn resolution_dedups_in_order((size, edges, picks) in graph_and_names()) {
        let graph = Graph::new(size, &edges);
        let names: Vec<String> = picks.iter().map(|&i| pkg(i)).collect();

        let resolution = resolve_targets(&graph, &names, ResolveOptions::default()).unwrap();
        let got: Vec<&str> = resolution.targets.iter().map(|t| t.name.as_str()).collect();

        let mut seen = HashSet::new();
        let expected: Vec<&str> = names
            .iter()
            .filter(|n| seen.insert(n.as_str()))
            .map(String::as_str)
            .collect();
        prop_assert_eq!(got, expected);
    }

    /// With dependencies, the target list is duplicate-free and closed under
    /// the dependency relation.
    #[test]
    fn resolution_with_dependencies_is_closed((size, edges, picks) in graph_and_names()) {
        let graph = Graph::new(size, &edges);
        let names: Vec<String> = picks.iter().map(|&i| pkg(i)).collect();

        let resolution = resolve_targets(&graph, &names, WITH_DEPS).unwrap();
        let included: HashSet<&str> =
            resolution.targets.iter().map(|t| t.name.as_str()).collect();

        prop_assert_eq!(included.len(), resolution.targets.len());
        for name in &names {
            prop_assert!(included.contains(name.as_str()));
        }
        for target in &resolution.targets {
            for dep in &target.dependencies {
                prop_assert!(included.contains(dep.as_str()), "{} missing", dep);
            }
        }
        prop_assert!(resolution.skipped.is_empty());
    }

    /// The first requested name always comes first.
    #[test]
    fn resolution_starts_with_first_name((size, edges, picks) in graph_and_names()) {
        let graph = Graph::new(size, &edges);
        let names: Vec<String> = picks.iter().map(|&i| pkg(i)).collect();
        let resolution = resolve_targets(&graph, &names, WITH_DEPS).unwrap();
        prop_assert_eq!(&resolution.targets[0].name, &names[0]);
    }

    // ========================================================================
    // Expansion Properties
    // ========================================================================

    /// Units are the full product, target outermost.
    #[test]
    fn expansion_is_target_major_product(
        targets in 0usize..6,
        platforms in prop::collection::vec(tag_strategy(), 0..6)
    ) {
        let graph = Graph::new(targets.max(1), &[]);
        let targets: Vec<Arc<Target>> = (0..targets)
            .map(|i| Arc::clone(&graph.nodes[&pkg(i)]))
            .collect();

        let units = expand_units(&targets, &platforms);
        prop_assert_eq!(units.len(), targets.len() * platforms.len());
        for (i, unit) in units.iter().enumerate() {
            let p = platforms.len();
            prop_assert_eq!(&unit.target.name, &targets[i / p].name);
            prop_assert_eq!(&unit.tag, &platforms[i % p]);
        }
    }

    /// Explicit OS and architecture never drop a combination, even an
    /// unsupported one.
    #[test]
    fn explicit_axes_are_kept(
        os in prop::sample::select(OsVersion::ALL.to_vec()),
        arch in prop::sample::select(Arch::ALL.to_vec())
    ) {
        let selection = PlatformSelection::Matrix {
            os: Selector::Only(os),
            arch: Selector::Only(arch),
        };
        let tags = selection
            .platforms_with(|| unreachable!(), || unreachable!())
            .unwrap();
        prop_assert_eq!(tags, vec![PlatformTag::from_parts(os, arch)]);
    }

    /// Expanding `all` on one axis yields only valid combinations.
    #[test]
    fn all_axis_yields_valid_tags(arch in prop::sample::select(Arch::ALL.to_vec())) {
        let selection = PlatformSelection::Matrix {
            os: Selector::All,
            arch: Selector::Only(arch),
        };
        let tags = selection
            .platforms_with(|| unreachable!(), || unreachable!())
            .unwrap();
        prop_assert!(tags.iter().all(PlatformTag::is_valid_combination));
        let expected = if arch == Arch::Arm {
            OsVersion::ALL.len() - 1
        } else {
            OsVersion::ALL.len()
        };
        prop_assert_eq!(tags.len(), expected);
    }

    // ========================================================================
    // Backfill Cutoff Properties
    // ========================================================================

    /// Acceptance is exactly "strictly before the cutoff".
    #[test]
    fn backfill_accepts_only_before_cutoff(offset_ms in -10_000_000_000i64..10_000_000_000) {
        let cutoff = backfill_cutoff();
        let signed_at = cutoff + Duration::milliseconds(offset_ms);
        let decision = judge(Some(signed_at), cutoff);
        if offset_ms < 0 {
            prop_assert_eq!(decision, BackfillDecision::Accepted { signed_at });
        } else {
            prop_assert_eq!(decision, BackfillDecision::RejectedTooRecent { signed_at });
        }
    }
}

#[test]
fn all_by_all_drops_only_arm_catalina() {
    let selection = PlatformSelection::from_options(None, Some("all"), Some("all")).unwrap();
    let tags = selection
        .platforms_with(|| unreachable!(), || unreachable!())
        .unwrap();
    assert_eq!(tags.len(), OsVersion::ALL.len() * Arch::ALL.len() - 1);
    assert!(!tags.contains(&PlatformTag::from_parts(OsVersion::Catalina, Arch::Arm)));
    assert_eq!(tags[0].symbol(), OsVersion::ALL[0].symbol());
}
