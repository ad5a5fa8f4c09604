//! Run manifest sidecar.
//!
//! A durable YAML snapshot written into the run workspace, loadable even
//! when the relational store is unavailable. Mirrors the decision log and
//! carries sha-256 checksums of the step artifacts.

use crate::error::{QaflowError, Result};
use crate::paths;
use crate::quality::QualityMetric;
use crate::run::{DecisionLogEntry, Run};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// EnvironmentFingerprint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentFingerprint {
    pub os: String,
    pub arch: String,
    pub runner_version: String,
}

impl EnvironmentFingerprint {
    pub fn capture() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            runner_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// RunManifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub project_id: String,
    pub status: String,
    pub agent_version: String,
    pub prompt_version: String,
    /// Artifact filename → sha-256 hex digest.
    #[serde(default)]
    pub artifact_checksums: BTreeMap<String, String>,
    /// Mirror of the run's decision log at write time.
    #[serde(default)]
    pub decision_log: Vec<DecisionLogEntry>,
    pub environment: EnvironmentFingerprint,
    /// Recorded degradation decisions (e.g. skipped evidence capture).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quality_metrics: Vec<QualityMetric>,
    pub written_at: DateTime<Utc>,
}

impl RunManifest {
    /// Build a manifest snapshot from a run and its workspace contents.
    pub fn snapshot(
        run: &Run,
        agent_version: impl Into<String>,
        prompt_version: impl Into<String>,
    ) -> Result<Self> {
        let workspace = Path::new(&run.workspace_path);
        Ok(Self {
            run_id: run.id.clone(),
            project_id: run.project_id.clone(),
            status: run.state.to_string(),
            agent_version: agent_version.into(),
            prompt_version: prompt_version.into(),
            artifact_checksums: collect_checksums(workspace)?,
            decision_log: run.decision_log.clone(),
            environment: EnvironmentFingerprint::capture(),
            degradations: collect_degradations(workspace),
            quality_metrics: run.quality_metrics.clone(),
            written_at: Utc::now(),
        })
    }

    pub fn load(workspace: &Path) -> Result<Self> {
        let path = paths::manifest_path(workspace);
        if !path.exists() {
            return Err(QaflowError::ManifestNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        let manifest: RunManifest = serde_yaml::from_str(&data)?;
        Ok(manifest)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = paths::manifest_path(workspace);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

const CHECKSUMMED: &[&str] = &[
    paths::REQUIREMENTS_FILE,
    paths::TEST_CASES_FILE,
    paths::EXECUTION_RESULTS_FILE,
    paths::REVIEW_RESULTS_FILE,
    paths::REPORT_FILE,
];

/// Degradation notes derived from the artifacts present at write time.
fn collect_degradations(workspace: &Path) -> Vec<String> {
    let mut notes = Vec::new();
    if let Ok(results) = crate::artifacts::load_execution_results(workspace) {
        let missing = results
            .assertions
            .iter()
            .filter(|a| a.evidence_path.is_none())
            .count();
        if missing > 0 {
            notes.push(format!("{missing} assertion(s) recorded without evidence"));
        }
    }
    notes
}

/// Sha-256 digests of every known step artifact present in `workspace`.
pub fn collect_checksums(workspace: &Path) -> Result<BTreeMap<String, String>> {
    let mut checksums = BTreeMap::new();
    for name in CHECKSUMMED {
        let path = workspace.join(name);
        if path.is_file() {
            let data = std::fs::read(&path)?;
            let digest = Sha256::digest(&data);
            checksums.insert((*name).to_string(), format!("{digest:x}"));
        }
    }
    Ok(checksums)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_run(workspace: &Path) -> Run {
        Run::new(
            "run-1",
            "proj",
            "docs/prd.md",
            workspace.display().to_string(),
        )
    }

    #[test]
    fn manifest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let run = make_run(dir.path());
        let manifest = RunManifest::snapshot(&run, "agent-1.4.0", "prompts-7").unwrap();
        manifest.save(dir.path()).unwrap();

        let loaded = RunManifest::load(dir.path()).unwrap();
        assert_eq!(loaded.run_id, "run-1");
        assert_eq!(loaded.status, "created");
        assert_eq!(loaded.agent_version, "agent-1.4.0");
        assert_eq!(loaded.environment.os, std::env::consts::OS);
    }

    #[test]
    fn load_missing_manifest_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            RunManifest::load(dir.path()),
            Err(QaflowError::ManifestNotFound(_))
        ));
    }

    #[test]
    fn checksums_cover_present_artifacts_only() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("requirements.json"), "[]").unwrap();
        std::fs::write(dir.path().join("execution-results.json"), "{}").unwrap();

        let sums = collect_checksums(dir.path()).unwrap();
        assert_eq!(sums.len(), 2);
        assert!(sums.contains_key("requirements.json"));
        assert!(!sums.contains_key("test-cases.json"));
        // Digest of "[]" is stable.
        assert_eq!(sums["requirements.json"].len(), 64);
    }

    #[test]
    fn checksums_change_with_content() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("requirements.json"), "[]").unwrap();
        let first = collect_checksums(dir.path()).unwrap();
        std::fs::write(dir.path().join("requirements.json"), "[{}]").unwrap();
        let second = collect_checksums(dir.path()).unwrap();
        assert_ne!(first["requirements.json"], second["requirements.json"]);
    }

    #[test]
    fn missing_evidence_is_recorded_as_degradation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("execution-results.json"),
            r#"{"run_id":"run-1","executed_at":"2026-08-01T00:00:00Z","assertions":[
                {"id":"A-1","case_id":"TC-1","kind":"url_matches","final_verdict":"pass"},
                {"id":"A-2","case_id":"TC-1","kind":"api_status","final_verdict":"pass","evidence_path":"evidence/traces/a2.zip"}
            ],"tested_routes":[]}"#,
        )
        .unwrap();
        let run = make_run(dir.path());
        let manifest = RunManifest::snapshot(&run, "a", "p").unwrap();
        assert_eq!(
            manifest.degradations,
            vec!["1 assertion(s) recorded without evidence"]
        );
    }

    #[test]
    fn manifest_mirrors_decision_log() {
        let dir = TempDir::new().unwrap();
        let mut run = make_run(dir.path());
        run.apply_transition(
            crate::types::RunState::Parsing,
            DecisionLogEntry {
                timestamp: Utc::now(),
                from_state: crate::types::RunState::Created,
                to_state: crate::types::RunState::Parsing,
                event: crate::types::RunEvent::StartParsing,
                reason: None,
                metadata: None,
            },
            None,
        );
        let manifest = RunManifest::snapshot(&run, "a", "p").unwrap();
        assert_eq!(manifest.decision_log.len(), 1);
        assert_eq!(manifest.status, "parsing");
    }
}
