//! Run workspace layout and the resume prerequisite validator.
//!
//! Resumability is decided on artifact **presence**, never content: a step
//! is safe to resume from when every artifact it consumes already exists in
//! the run's workspace.

use crate::error::{QaflowError, Result};
use crate::paths;
use crate::types::PipelineStep;
use std::fmt;
use std::path::Path;

// ---------------------------------------------------------------------------
// StepArtifact
// ---------------------------------------------------------------------------

/// A named artifact a pipeline step may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepArtifact {
    SourceContext,
    Requirements,
    TestCases,
    ExecutionResults,
    ReviewResults,
}

impl StepArtifact {
    /// True when the artifact exists in `workspace`. The test-case artifact
    /// is satisfied by either `test-cases.json` or a non-empty `test-cases/`
    /// directory of per-requirement files.
    pub fn is_present(self, workspace: &Path) -> bool {
        match self {
            StepArtifact::SourceContext => paths::source_context_dir(workspace).is_dir(),
            StepArtifact::Requirements => paths::requirements_path(workspace).is_file(),
            StepArtifact::TestCases => {
                if paths::test_cases_path(workspace).is_file() {
                    return true;
                }
                let dir = paths::test_cases_dir(workspace);
                dir.is_dir()
                    && std::fs::read_dir(&dir)
                        .map(|mut entries| {
                            entries.any(|e| {
                                e.map(|e| {
                                    e.path().extension().map(|x| x == "json").unwrap_or(false)
                                })
                                .unwrap_or(false)
                            })
                        })
                        .unwrap_or(false)
            }
            StepArtifact::ExecutionResults => paths::execution_results_path(workspace).is_file(),
            StepArtifact::ReviewResults => paths::review_results_path(workspace).is_file(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepArtifact::SourceContext => "source-context/",
            StepArtifact::Requirements => paths::REQUIREMENTS_FILE,
            StepArtifact::TestCases => "test-cases.json (or test-cases/)",
            StepArtifact::ExecutionResults => paths::EXECUTION_RESULTS_FILE,
            StepArtifact::ReviewResults => paths::REVIEW_RESULTS_FILE,
        }
    }
}

impl fmt::Display for StepArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifacts each step consumes. Steps early in the sequence depend on
/// nothing — they produce the artifacts later steps validate against.
pub fn required_artifacts(step: PipelineStep) -> &'static [StepArtifact] {
    match step {
        PipelineStep::Initialize | PipelineStep::SourceIndexing => &[],
        PipelineStep::PrdParsing => &[StepArtifact::SourceContext],
        PipelineStep::TestExecution => &[StepArtifact::Requirements, StepArtifact::TestCases],
        PipelineStep::CodexReview => &[StepArtifact::ExecutionResults],
        PipelineStep::CrossValidation | PipelineStep::ReportGeneration => {
            &[StepArtifact::ExecutionResults, StepArtifact::ReviewResults]
        }
        PipelineStep::QualityGate => &[
            StepArtifact::Requirements,
            StepArtifact::TestCases,
            StepArtifact::ExecutionResults,
        ],
    }
}

// ---------------------------------------------------------------------------
// Workspace initialization
// ---------------------------------------------------------------------------

/// Create the fixed per-run directory skeleton.
pub fn init_workspace(workspace: &Path) -> Result<()> {
    crate::io::ensure_dir(&paths::source_context_dir(workspace))?;
    crate::io::ensure_dir(&paths::screenshots_dir(workspace))?;
    crate::io::ensure_dir(&paths::traces_dir(workspace))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Prerequisite validation
// ---------------------------------------------------------------------------

/// Check that every artifact `step` depends on exists. On failure the error
/// enumerates each missing artifact so operators know what to restore.
pub fn validate_prerequisites(workspace: &Path, step: PipelineStep) -> Result<()> {
    let missing: Vec<String> = required_artifacts(step)
        .iter()
        .filter(|a| !a.is_present(workspace))
        .map(|a| a.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(QaflowError::MissingPrerequisites {
            step: step.to_string(),
            missing,
        })
    }
}

/// Every step whose prerequisites are currently satisfied in `workspace`.
pub fn resumable_steps(workspace: &Path) -> Vec<PipelineStep> {
    PipelineStep::all()
        .iter()
        .copied()
        .filter(|&step| validate_prerequisites(workspace, step).is_ok())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
