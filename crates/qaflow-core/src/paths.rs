use crate::error::{QaflowError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Workspace layout constants
// ---------------------------------------------------------------------------

pub const SOURCE_CONTEXT_DIR: &str = "source-context";
pub const EVIDENCE_DIR: &str = "evidence";
pub const SCREENSHOTS_DIR: &str = "evidence/screenshots";
pub const TRACES_DIR: &str = "evidence/traces";

pub const REQUIREMENTS_FILE: &str = "requirements.json";
pub const TEST_CASES_FILE: &str = "test-cases.json";
pub const TEST_CASES_DIR: &str = "test-cases";
pub const EXECUTION_RESULTS_FILE: &str = "execution-results.json";
pub const REVIEW_RESULTS_FILE: &str = "codex-review-results.json";
pub const REPORT_FILE: &str = "report.md";
pub const MANIFEST_FILE: &str = "manifest.yaml";

pub const PRD_SUBDIR: &str = "docs";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn source_context_dir(workspace: &Path) -> PathBuf {
    workspace.join(SOURCE_CONTEXT_DIR)
}

pub fn screenshots_dir(workspace: &Path) -> PathBuf {
    workspace.join(SCREENSHOTS_DIR)
}

pub fn traces_dir(workspace: &Path) -> PathBuf {
    workspace.join(TRACES_DIR)
}

pub fn requirements_path(workspace: &Path) -> PathBuf {
    workspace.join(REQUIREMENTS_FILE)
}

pub fn test_cases_path(workspace: &Path) -> PathBuf {
    workspace.join(TEST_CASES_FILE)
}

pub fn test_cases_dir(workspace: &Path) -> PathBuf {
    workspace.join(TEST_CASES_DIR)
}

pub fn execution_results_path(workspace: &Path) -> PathBuf {
    workspace.join(EXECUTION_RESULTS_FILE)
}

pub fn review_results_path(workspace: &Path) -> PathBuf {
    workspace.join(REVIEW_RESULTS_FILE)
}

pub fn report_path(workspace: &Path) -> PathBuf {
    workspace.join(REPORT_FILE)
}

pub fn manifest_path(workspace: &Path) -> PathBuf {
    workspace.join(MANIFEST_FILE)
}

// ---------------------------------------------------------------------------
// Run id validation
// ---------------------------------------------------------------------------

static RUN_ID_RE: OnceLock<Regex> = OnceLock::new();

fn run_id_re() -> &'static Regex {
    RUN_ID_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

pub fn validate_run_id(run_id: &str) -> Result<()> {
    if run_id.is_empty() || run_id.len() > 64 || !run_id_re().is_match(run_id) {
        return Err(QaflowError::InvalidRunId(run_id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// PRD resolution
// ---------------------------------------------------------------------------

/// Resolve a PRD location by the fixed search order: an absolute path is
/// taken as-is; otherwise the project's `docs/` subdirectory, then a
/// canonical candidate list. When nothing exists the last candidate is
/// returned unchanged so the subsequent read fails with a clear error.
pub fn resolve_prd_path(project_root: &Path, workspace: &Path, spec: &str) -> PathBuf {
    let given = Path::new(spec);
    if given.is_absolute() {
        return given.to_path_buf();
    }

    let preferred = project_root.join(PRD_SUBDIR).join(spec);
    if preferred.exists() {
        return preferred;
    }

    let candidates = [
        project_root.join(spec),
        project_root.join(PRD_SUBDIR).join(spec),
        project_root.join("prd").join(spec),
        workspace.join(spec),
    ];
    for candidate in &candidates {
        if candidate.exists() {
            return candidate.clone();
        }
    }
    candidates[candidates.len() - 1].clone()
}

/// Read the PRD at `path`, erroring clearly when it is missing.
pub fn read_prd(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(QaflowError::PrdNotFound(path.display().to_string()));
    }
    Ok(std::fs::read_to_string(path)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn valid_run_ids() {
        for id in ["run-1", "a", "run-0af3c2d1", "x1"] {
            validate_run_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_run_ids() {
        for id in ["", "-leading", "trailing-", "has spaces", "UPPER", "a_b"] {
            assert!(validate_run_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn path_helpers() {
        let ws = Path::new("/tmp/ws");
        assert_eq!(
            requirements_path(ws),
            PathBuf::from("/tmp/ws/requirements.json")
        );
        assert_eq!(
            screenshots_dir(ws),
            PathBuf::from("/tmp/ws/evidence/screenshots")
        );
        assert_eq!(manifest_path(ws), PathBuf::from("/tmp/ws/manifest.yaml"));
    }

    #[test]
    fn absolute_prd_path_taken_as_is() {
        let root = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        let resolved = resolve_prd_path(root.path(), ws.path(), "/abs/prd.md");
        assert_eq!(resolved, PathBuf::from("/abs/prd.md"));
    }

    #[test]
    fn docs_subdir_preferred() {
        let root = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("docs")).unwrap();
        std::fs::write(root.path().join("docs/prd.md"), "# PRD").unwrap();
        std::fs::write(root.path().join("prd.md"), "# wrong").unwrap();

        let resolved = resolve_prd_path(root.path(), ws.path(), "prd.md");
        assert_eq!(resolved, root.path().join("docs/prd.md"));
    }

    #[test]
    fn root_candidate_found_when_docs_missing() {
        let root = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        std::fs::write(root.path().join("prd.md"), "# PRD").unwrap();
        let resolved = resolve_prd_path(root.path(), ws.path(), "prd.md");
        assert_eq!(resolved, root.path().join("prd.md"));
    }

    #[test]
    fn missing_prd_falls_through_to_reader() {
        let root = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        let resolved = resolve_prd_path(root.path(), ws.path(), "nope.md");
        // The resolver still hands back a path; the reader produces the error.
        assert!(matches!(
            read_prd(&resolved),
            Err(QaflowError::PrdNotFound(_))
        ));
    }

    #[test]
    fn read_prd_ok() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("prd.md");
        std::fs::write(&path, "# Product").unwrap();
        assert_eq!(read_prd(&path).unwrap(), "# Product");
    }
}
