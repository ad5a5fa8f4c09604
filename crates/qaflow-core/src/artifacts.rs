//! Step artifact readers.
//!
//! Shared by the pipeline runner and the CLI so gate math and diagnostics
//! always load artifacts the same way. Missing files surface as
//! `ArtifactNotFound` with the canonical artifact name.

use crate::error::{QaflowError, Result};
use crate::model::{ExecutionResults, Requirement, ReviewResults, TestCase};
use crate::paths;
use std::path::{Path, PathBuf};

pub fn load_requirements(workspace: &Path) -> Result<Vec<Requirement>> {
    let path = paths::requirements_path(workspace);
    if !path.exists() {
        return Err(QaflowError::ArtifactNotFound(
            paths::REQUIREMENTS_FILE.to_string(),
        ));
    }
    Ok(serde_json::from_slice(&std::fs::read(&path)?)?)
}

/// Test cases from either `test-cases.json` or the per-requirement
/// `test-cases/` directory, whichever is present.
pub fn load_cases(workspace: &Path) -> Result<Vec<TestCase>> {
    let file = paths::test_cases_path(workspace);
    if file.exists() {
        return Ok(serde_json::from_slice(&std::fs::read(&file)?)?);
    }
    let dir = paths::test_cases_dir(workspace);
    if !dir.is_dir() {
        return Err(QaflowError::ArtifactNotFound(
            paths::TEST_CASES_FILE.to_string(),
        ));
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
        .collect();
    entries.sort();
    let mut cases = Vec::new();
    for path in entries {
        let batch: Vec<TestCase> = serde_json::from_slice(&std::fs::read(&path)?)?;
        cases.extend(batch);
    }
    Ok(cases)
}

pub fn load_execution_results(workspace: &Path) -> Result<ExecutionResults> {
    let path = paths::execution_results_path(workspace);
    if !path.exists() {
        return Err(QaflowError::ArtifactNotFound(
            paths::EXECUTION_RESULTS_FILE.to_string(),
        ));
    }
    Ok(serde_json::from_slice(&std::fs::read(&path)?)?)
}

pub fn load_review_results(workspace: &Path) -> Result<ReviewResults> {
    let path = paths::review_results_path(workspace);
    if !path.exists() {
        return Err(QaflowError::ArtifactNotFound(
            paths::REVIEW_RESULTS_FILE.to_string(),
        ));
    }
    Ok(serde_json::from_slice(&std::fs::read(&path)?)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_cases_prefers_single_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("test-cases.json"),
            r#"[{"id":"TC-1","requirement_id":"R-1","title":"t"}]"#,
        )
        .unwrap();
        let cases = load_cases(dir.path()).unwrap();
        assert_eq!(cases.len(), 1);
    }

    #[test]
    fn load_cases_concatenates_directory() {
        let dir = TempDir::new().unwrap();
        let tc = dir.path().join("test-cases");
        std::fs::create_dir_all(&tc).unwrap();
        std::fs::write(
            tc.join("R-1.json"),
            r#"[{"id":"TC-1","requirement_id":"R-1","title":"a"}]"#,
        )
        .unwrap();
        std::fs::write(
            tc.join("R-2.json"),
            r#"[{"id":"TC-2","requirement_id":"R-2","title":"b"}]"#,
        )
        .unwrap();
        let cases = load_cases(dir.path()).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].id, "TC-1");
    }

    #[test]
    fn load_cases_missing_is_artifact_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_cases(dir.path()),
            Err(QaflowError::ArtifactNotFound(_))
        ));
    }

    #[test]
    fn load_requirements_missing_is_artifact_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_requirements(dir.path()),
            Err(QaflowError::ArtifactNotFound(_))
        ));
    }

    #[test]
    fn execution_results_roundtrip_through_loader() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("execution-results.json"),
            r#"{"run_id":"run-1","executed_at":"2026-08-01T00:00:00Z","assertions":[],"tested_routes":[]}"#,
        )
        .unwrap();
        let results = load_execution_results(dir.path()).unwrap();
        assert_eq!(results.run_id, "run-1");
    }
}
