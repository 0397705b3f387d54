//! End-to-end runs of the verification engine against an in-memory index,
//! a local fetcher and a scripted attestation oracle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use bottle_verify_core::{
    Artifact, AttestationOracle, Authorities, BottleFetcher, Evidence, FailureKind, FetchOutcome,
    OutputMode, PackageIndex, PlatformSelection, PlatformTag, Reporter, SigningAuthority, Summary,
    Target, VerificationOutcome, VerifyEngine, VerifyError, VerifyRequest,
};

const PRIMARY: &str = "Homebrew/homebrew-core";
const BACKFILL: &str = "trailofbits/homebrew-brew-verify";

const FORMULAE: &str = r#"[
    {
        "name": "wget",
        "full_name": "wget",
        "versions": {"stable": "1.24.5"},
        "dependencies": ["openssl@3", "libidn2"],
        "bottle": {"stable": {"rebuild": 0, "files": {
            "arm64_sonoma": {
                "url": "https://ghcr.io/v2/homebrew/core/wget/blobs/sha256:aa",
                "sha256": "aa"
            },
            "x86_64_linux": {
                "url": "https://ghcr.io/v2/homebrew/core/wget/blobs/sha256:ab",
                "sha256": "ab"
            }
        }}}
    },
    {
        "name": "openssl@3",
        "versions": {"stable": "3.3.1"},
        "aliases": ["openssl"],
        "dependencies": ["ca-certificates"],
        "bottle": {"stable": {"rebuild": 1, "files": {
            "arm64_sonoma": {
                "url": "https://ghcr.io/v2/homebrew/core/openssl/3/blobs/sha256:bb",
                "sha256": "bb"
            }
        }}}
    },
    {
        "name": "ca-certificates",
        "versions": {"stable": "2024-07-02"},
        "bottle": {"stable": {"files": {
            "all": {
                "url": "https://ghcr.io/v2/homebrew/core/ca-certificates/blobs/sha256:cc",
                "sha256": "cc"
            }
        }}}
    },
    {
        "name": "libidn2",
        "versions": {"stable": "2.3.7"},
        "bottle": {"stable": {"files": {
            "arm64_sonoma": {
                "url": "https://ghcr.io/v2/homebrew/core/libidn2/blobs/sha256:dd",
                "sha256": "dd"
            }
        }}}
    }
]"#;

const CASKS: &str = r#"[{"token": "firefox"}]"#;

fn index() -> PackageIndex {
    PackageIndex::from_json(FORMULAE, Some(CASKS)).unwrap()
}

fn authorities() -> Authorities {
    Authorities {
        primary: SigningAuthority::new(PRIMARY),
        backfill: SigningAuthority::new(BACKFILL),
    }
}

/// Resolves artifacts to `/bottles/<name>.<tag key>` without touching disk.
struct LocalFetcher;

#[async_trait]
impl BottleFetcher for LocalFetcher {
    async fn fetch(
        &self,
        target: &Target,
        tag: &PlatformTag,
        _force: bool,
    ) -> Result<FetchOutcome, VerifyError> {
        Ok(match target.bottle_for(tag) {
            Some((key, file)) => FetchOutcome::Fetched(Artifact {
                path: PathBuf::from(format!("/bottles/{}.{}", target.name, key)),
                sha256: file.sha256.clone(),
            }),
            None => FetchOutcome::NotPublished,
        })
    }
}

#[derive(Clone)]
enum Answer {
    Outcome(VerificationOutcome),
    NoCredentials,
}

/// Oracle answering per (artifact path, authority), recording every call.
#[derive(Default)]
struct ScriptedOracle {
    answers: HashMap<(String, String), Answer>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedOracle {
    fn answer(mut self, path: &str, authority: &str, answer: Answer) -> Self {
        self.answers
            .insert((path.to_string(), authority.to_string()), answer);
        self
    }

    fn verified(self, path: &str, authority: &str, evidence: serde_json::Value) -> Self {
        self.answer(
            path,
            authority,
            Answer::Outcome(VerificationOutcome::Verified(Evidence(vec![evidence]))),
        )
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttestationOracle for ScriptedOracle {
    async fn verify(
        &self,
        artifact: &Artifact,
        authority: &SigningAuthority,
    ) -> Result<VerificationOutcome, VerifyError> {
        let key = (artifact.path.display().to_string(), authority.to_string());
        self.calls.lock().unwrap().push(key.clone());
        match self.answers.get(&key) {
            Some(Answer::Outcome(outcome)) => Ok(outcome.clone()),
            Some(Answer::NoCredentials) => Err(VerifyError::CredentialsMissing {
                message: "gh auth login required".into(),
            }),
            None => Ok(VerificationOutcome::unverified(
                FailureKind::ExternalToolFailure,
                "no attestations for subject",
            )),
        }
    }
}

fn request(names: &[&str], tag: &str) -> VerifyRequest {
    VerifyRequest {
        names: names.iter().map(|n| n.to_string()).collect(),
        platforms: PlatformSelection::from_options(Some(tag), None, None).unwrap(),
        ..VerifyRequest::default()
    }
}

struct RunOutput {
    result: Result<Summary, VerifyError>,
    stdout: String,
    warnings: String,
}

async fn run(
    engine: &VerifyEngine<PackageIndex, LocalFetcher, ScriptedOracle>,
    request: &VerifyRequest,
    mode: OutputMode,
) -> RunOutput {
    let mut stdout = Vec::new();
    let mut warnings = Vec::new();
    let result = {
        let mut reporter = Reporter::new(mode, &mut stdout, &mut warnings);
        match engine.run(request, &mut reporter).await {
            Ok(_) => reporter.finish(),
            Err(e) => Err(e),
        }
    };
    RunOutput {
        result,
        stdout: String::from_utf8(stdout).unwrap(),
        warnings: String::from_utf8(warnings).unwrap(),
    }
}

#[tokio::test]
async fn single_package_human_output() {
    let oracle = ScriptedOracle::default().verified(
        "/bottles/wget.arm64_sonoma",
        PRIMARY,
        json!({"bundle": "wget"}),
    );
    let engine = VerifyEngine::new(index(), LocalFetcher, oracle, authorities());

    let out = run(&engine, &request(&["wget"], "arm64_sonoma"), OutputMode::Human).await;

    assert_eq!(out.result.unwrap().verified, 1);
    assert_eq!(
        out.stdout,
        "Verified wget (arm64_sonoma) against Homebrew/homebrew-core\n"
    );
    assert!(out.warnings.is_empty());
}

#[tokio::test]
async fn single_package_structured_output() {
    let oracle = ScriptedOracle::default().verified(
        "/bottles/wget.arm64_sonoma",
        PRIMARY,
        json!({"bundle": "wget"}),
    );
    let engine = VerifyEngine::new(index(), LocalFetcher, oracle, authorities());

    let out = run(
        &engine,
        &request(&["wget"], "arm64_sonoma"),
        OutputMode::Structured,
    )
    .await;

    out.result.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&out.stdout).unwrap();
    assert_eq!(parsed, json!([[{"bundle": "wget"}]]));
}

#[tokio::test]
async fn dependencies_follow_their_parent() {
    let oracle = ScriptedOracle::default()
        .verified("/bottles/wget.arm64_sonoma", PRIMARY, json!({"n": "wget"}))
        .verified("/bottles/openssl@3.arm64_sonoma", PRIMARY, json!({"n": "openssl@3"}))
        .verified("/bottles/ca-certificates.all", PRIMARY, json!({"n": "ca-certificates"}))
        .verified("/bottles/libidn2.arm64_sonoma", PRIMARY, json!({"n": "libidn2"}));
    let engine = VerifyEngine::new(index(), LocalFetcher, oracle, authorities()).with_jobs(3);

    let mut req = request(&["wget", "openssl"], "arm64_sonoma");
    req.include_dependencies = true;
    let out = run(&engine, &req, OutputMode::Structured).await;

    assert_eq!(out.result.unwrap().verified, 4);
    let parsed: serde_json::Value = serde_json::from_str(&out.stdout).unwrap();
    assert_eq!(
        parsed,
        json!([
            [{"n": "wget"}],
            [{"n": "ca-certificates"}],
            [{"n": "openssl@3"}],
            [{"n": "libidn2"}]
        ])
    );
}

#[tokio::test]
async fn casks_are_skipped_with_warning() {
    let oracle = ScriptedOracle::default().verified(
        "/bottles/wget.x86_64_linux",
        PRIMARY,
        json!({}),
    );
    let engine = VerifyEngine::new(index(), LocalFetcher, oracle, authorities());

    let out = run(
        &engine,
        &request(&["firefox", "wget"], "x86_64_linux"),
        OutputMode::Human,
    )
    .await;

    let summary = out.result.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.verified, 1);
    assert!(out.warnings.contains("firefox is a cask"));
}

#[tokio::test]
async fn tool_failure_then_recent_backfill_fails() {
    let oracle = ScriptedOracle::default().verified(
        "/bottles/libidn2.arm64_sonoma",
        BACKFILL,
        json!({
            "verificationResult": {"verifiedTimestamps": [{"timestamp": "2024-05-01T12:00:00Z"}]}
        }),
    );
    let engine = VerifyEngine::new(index(), LocalFetcher, oracle, authorities());

    let out = run(
        &engine,
        &request(&["libidn2"], "arm64_sonoma"),
        OutputMode::Human,
    )
    .await;

    let summary = out.result.unwrap();
    assert_eq!(summary.failed, 1);
    assert!(summary.has_failures());
    assert_eq!(
        out.stdout.trim_end(),
        "Failed to verify libidn2 (arm64_sonoma): backfill attestation from \
         trailofbits/homebrew-brew-verify is too recent (signed 2024-05-01T12:00:00Z)"
    );
    assert_eq!(
        engine_calls(&engine),
        vec![
            ("/bottles/libidn2.arm64_sonoma".to_string(), PRIMARY.to_string()),
            ("/bottles/libidn2.arm64_sonoma".to_string(), BACKFILL.to_string()),
        ]
    );
}

#[tokio::test]
async fn tool_failure_then_old_backfill_succeeds() {
    let oracle = ScriptedOracle::default().verified(
        "/bottles/libidn2.arm64_sonoma",
        BACKFILL,
        json!({
            "verificationResult": {"verifiedTimestamps": [{"timestamp": "2023-09-30T08:15:00Z"}]}
        }),
    );
    let engine = VerifyEngine::new(index(), LocalFetcher, oracle, authorities());

    let out = run(
        &engine,
        &request(&["libidn2"], "arm64_sonoma"),
        OutputMode::Human,
    )
    .await;

    assert_eq!(out.result.unwrap().backfilled, 1);
    assert_eq!(
        out.stdout.trim_end(),
        "Verified libidn2 (arm64_sonoma) via backfill against \
         trailofbits/homebrew-brew-verify (signed 2023-09-30T08:15:00Z)"
    );
}

#[tokio::test]
async fn unpublished_bottle_warns_once() {
    let engine = VerifyEngine::new(
        index(),
        LocalFetcher,
        ScriptedOracle::default(),
        authorities(),
    );

    let out = run(
        &engine,
        &request(&["libidn2"], "x86_64_linux"),
        OutputMode::Human,
    )
    .await;

    let summary = out.result.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert!(out.stdout.is_empty());
    assert_eq!(
        out.warnings,
        "Warning: Bottle for tag :x86_64_linux is unavailable for libidn2.\n"
    );
    assert!(engine_calls(&engine).is_empty());
}

#[tokio::test]
async fn missing_credentials_abort_remaining_units() {
    let oracle = ScriptedOracle::default()
        .answer("/bottles/wget.arm64_sonoma", PRIMARY, Answer::NoCredentials)
        .verified("/bottles/libidn2.arm64_sonoma", PRIMARY, json!({}))
        .verified("/bottles/openssl@3.arm64_sonoma", PRIMARY, json!({}));
    let engine = VerifyEngine::new(index(), LocalFetcher, oracle, authorities()).with_jobs(1);

    let out = run(
        &engine,
        &request(&["wget", "libidn2", "openssl@3"], "arm64_sonoma"),
        OutputMode::Human,
    )
    .await;

    let err = out.result.unwrap_err();
    assert!(matches!(err, VerifyError::CredentialsMissing { .. }));
    assert!(err.is_fatal());
    assert!(err.remediation().is_some());
    assert_eq!(engine_calls(&engine).len(), 1);
    assert!(out.stdout.is_empty());
}

#[tokio::test]
async fn unknown_name_fails_before_any_verification() {
    let engine = VerifyEngine::new(
        index(),
        LocalFetcher,
        ScriptedOracle::default(),
        authorities(),
    );

    let out = run(
        &engine,
        &request(&["wget", "does-not-exist"], "arm64_sonoma"),
        OutputMode::Human,
    )
    .await;

    assert!(matches!(
        out.result,
        Err(VerifyError::UnknownPackage { ref name }) if name == "does-not-exist"
    ));
    assert!(engine_calls(&engine).is_empty());
}

#[tokio::test]
async fn formulae_only_rejects_cask_names() {
    let engine = VerifyEngine::new(
        index(),
        LocalFetcher,
        ScriptedOracle::default(),
        authorities(),
    );
    let mut req = request(&["firefox", "wget"], "x86_64_linux");
    req.formulae_only = true;

    let out = run(&engine, &req, OutputMode::Human).await;

    let err = out.result.unwrap_err();
    assert!(matches!(err, VerifyError::UnknownPackage { ref name } if name == "firefox"));
    assert_eq!(err.to_string(), "No available formula with the name \"firefox\"");
    assert!(out.warnings.is_empty());
    assert!(engine_calls(&engine).is_empty());
}

#[test]
fn conflicting_platform_options_are_rejected() {
    let err = PlatformSelection::from_options(Some("arm64_sonoma"), Some("sonoma"), None)
        .unwrap_err();
    assert!(matches!(err, VerifyError::ConfigConflict { .. }));
}

fn engine_calls(
    engine: &VerifyEngine<PackageIndex, LocalFetcher, ScriptedOracle>,
) -> Vec<(String, String)> {
    engine.oracle().calls()
}
