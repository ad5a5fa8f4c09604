//! Quality-gate metric calculators.
//!
//! Three independent, pure metrics: requirements coverage, assertion pass
//! rate, flaky rate. Each returns a [`QualityMetric`] snapshot; breakdown
//! accessors expose the raw counts so diagnostics never drift from the gate
//! math by recomputing differently.

use crate::model::{Assertion, ExecutionSample, Requirement, TestCase, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const COVERAGE_THRESHOLD: f64 = 0.85;
pub const PASS_RATE_THRESHOLD: f64 = 0.95;
pub const FLAKY_THRESHOLD: f64 = 0.05;

/// Minimum distinct historical runs before flakiness is computable.
pub const FLAKY_MIN_RUNS: usize = 3;
/// Minimum executions of a single case before it is tracked for flakiness.
pub const FLAKY_MIN_EXECUTIONS: usize = 3;

// ---------------------------------------------------------------------------
// QualityMetric
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetric {
    pub name: String,
    /// Computed value in [0, 1].
    pub value: f64,
    pub threshold: f64,
    pub passed: bool,
}

// ---------------------------------------------------------------------------
// Requirements coverage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageBreakdown {
    pub covered: Vec<String>,
    pub uncovered: Vec<String>,
}

/// RC = testable requirements with at least one test case / testable
/// requirements. A zero denominator is vacuously satisfied.
pub fn requirements_coverage(requirements: &[Requirement], cases: &[TestCase]) -> QualityMetric {
    let breakdown = coverage_breakdown(requirements, cases);
    let total = breakdown.covered.len() + breakdown.uncovered.len();
    let value = if total == 0 {
        1.0
    } else {
        breakdown.covered.len() as f64 / total as f64
    };
    QualityMetric {
        name: "requirements_coverage".to_string(),
        value,
        threshold: COVERAGE_THRESHOLD,
        passed: value >= COVERAGE_THRESHOLD,
    }
}

pub fn coverage_breakdown(requirements: &[Requirement], cases: &[TestCase]) -> CoverageBreakdown {
    let with_cases: BTreeSet<&str> = cases.iter().map(|c| c.requirement_id.as_str()).collect();
    let mut covered = Vec::new();
    let mut uncovered = Vec::new();
    for req in requirements.iter().filter(|r| r.testable) {
        if with_cases.contains(req.id.as_str()) {
            covered.push(req.id.clone());
        } else {
            uncovered.push(req.id.clone());
        }
    }
    CoverageBreakdown { covered, uncovered }
}

// ---------------------------------------------------------------------------
// Assertion pass rate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassRateBreakdown {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    /// Soft assertions excluded from both sides of the ratio.
    pub soft_excluded: usize,
}

/// APR over deterministic assertions only; `soft` is excluded from both the
/// numerator and the denominator. A zero denominator is vacuously satisfied.
pub fn assertion_pass_rate(assertions: &[Assertion]) -> QualityMetric {
    let b = pass_rate_breakdown(assertions);
    let total = b.passed + b.failed + b.errored;
    let value = if total == 0 {
        1.0
    } else {
        b.passed as f64 / total as f64
    };
    QualityMetric {
        name: "assertion_pass_rate".to_string(),
        value,
        threshold: PASS_RATE_THRESHOLD,
        passed: value >= PASS_RATE_THRESHOLD,
    }
}

pub fn pass_rate_breakdown(assertions: &[Assertion]) -> PassRateBreakdown {
    let mut b = PassRateBreakdown {
        passed: 0,
        failed: 0,
        errored: 0,
        soft_excluded: 0,
    };
    for a in assertions {
        if !a.kind.is_deterministic() {
            b.soft_excluded += 1;
            continue;
        }
        match a.final_verdict {
            Verdict::Pass => b.passed += 1,
            Verdict::Fail => b.failed += 1,
            Verdict::Error => b.errored += 1,
        }
    }
    b
}

// ---------------------------------------------------------------------------
// Flaky rate
// ---------------------------------------------------------------------------

/// FR over execution history. Requires at least [`FLAKY_MIN_RUNS`] distinct
/// runs and at least one case executed in [`FLAKY_MIN_EXECUTIONS`] of them;
/// otherwise the metric is not applicable and `None` is returned — never a
/// zero that would read as "nothing is flaky".
pub fn flaky_rate(history: &[ExecutionSample]) -> Option<QualityMetric> {
    let distinct_runs: BTreeSet<&str> = history.iter().map(|s| s.run_id.as_str()).collect();
    if distinct_runs.len() < FLAKY_MIN_RUNS {
        return None;
    }

    // Case id → pass/non-pass outcome per distinct run.
    let mut by_case: BTreeMap<&str, BTreeMap<&str, bool>> = BTreeMap::new();
    for s in history {
        by_case
            .entry(s.case_id.as_str())
            .or_default()
            .insert(s.run_id.as_str(), s.verdict == Verdict::Pass);
    }

    let tracked: Vec<&BTreeMap<&str, bool>> = by_case
        .values()
        .filter(|outcomes| outcomes.len() >= FLAKY_MIN_EXECUTIONS)
        .collect();
    if tracked.is_empty() {
        return None;
    }

    let flaky = tracked
        .iter()
        .filter(|outcomes| {
            let mut values = outcomes.values();
            let first = values.next().copied().unwrap_or(false);
            values.any(|&v| v != first)
        })
        .count();

    let value = flaky as f64 / tracked.len() as f64;
    Some(QualityMetric {
        name: "flaky_rate".to_string(),
        value,
        threshold: FLAKY_THRESHOLD,
        passed: value <= FLAKY_THRESHOLD,
    })
}

// ---------------------------------------------------------------------------
// Gate evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub metrics: Vec<QualityMetric>,
    pub passed: bool,
}

/// Combined gate verdict. The flaky metric is omitted (and does not block)
/// when history is insufficient.
pub fn evaluate_gate(
    requirements: &[Requirement],
    cases: &[TestCase],
    assertions: &[Assertion],
    history: &[ExecutionSample],
) -> GateReport {
    let mut metrics = vec![
        requirements_coverage(requirements, cases),
        assertion_pass_rate(assertions),
    ];
    if let Some(fr) = flaky_rate(history) {
        metrics.push(fr);
    }
    let passed = metrics.iter().all(|m| m.passed);
    GateReport { metrics, passed }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssertionKind, Priority};

    fn req(id: &str, testable: bool) -> Requirement {
        Requirement {
            id: id.to_string(),
            title: format!("requirement {id}"),
            priority: Priority::P1,
            testable,
            route: "/".to_string(),
        }
    }

    fn case(id: &str, req_id: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            requirement_id: req_id.to_string(),
            title: format!("case {id}"),
            steps: Vec::new(),
        }
    }

    fn assertion(id: &str, kind: AssertionKind, verdict: Verdict) -> Assertion {
        Assertion {
            id: id.to_string(),
            case_id: "TC-1".to_string(),
            kind,
            final_verdict: verdict,
            evidence_path: None,
        }
    }

    fn sample(run: &str, case: &str, verdict: Verdict) -> ExecutionSample {
        ExecutionSample {
            run_id: run.to_string(),
            case_id: case.to_string(),
            verdict,
        }
    }

    #[test]
    fn coverage_vacuously_passes_on_empty_input() {
        let m = requirements_coverage(&[], &[]);
        assert_eq!(m.value, 1.0);
        assert!(m.passed);
    }

    #[test]
    fn coverage_at_threshold_passes() {
        let requirements: Vec<Requirement> =
            (0..100).map(|i| req(&format!("R-{i}"), true)).collect();
        let cases: Vec<TestCase> = (0..85)
            .map(|i| case(&format!("TC-{i}"), &format!("R-{i}")))
            .collect();
        let m = requirements_coverage(&requirements, &cases);
        assert!((m.value - 0.85).abs() < 1e-9);
        assert!(m.passed);
    }

    #[test]
    fn coverage_below_threshold_fails() {
        let requirements: Vec<Requirement> =
            (0..100).map(|i| req(&format!("R-{i}"), true)).collect();
        let cases: Vec<TestCase> = (0..84)
            .map(|i| case(&format!("TC-{i}"), &format!("R-{i}")))
            .collect();
        let m = requirements_coverage(&requirements, &cases);
        assert!((m.value - 0.84).abs() < 1e-9);
        assert!(!m.passed);
    }

    #[test]
    fn coverage_ignores_untestable_requirements() {
        let requirements = vec![req("R-1", true), req("R-2", false)];
        let cases = vec![case("TC-1", "R-1")];
        let m = requirements_coverage(&requirements, &cases);
        assert_eq!(m.value, 1.0);
        let b = coverage_breakdown(&requirements, &cases);
        assert_eq!(b.covered, vec!["R-1"]);
        assert!(b.uncovered.is_empty());
    }

    #[test]
    fn coverage_breakdown_lists_uncovered() {
        let requirements = vec![req("R-1", true), req("R-2", true)];
        let cases = vec![case("TC-1", "R-1")];
        let b = coverage_breakdown(&requirements, &cases);
        assert_eq!(b.covered, vec!["R-1"]);
        assert_eq!(b.uncovered, vec!["R-2"]);
    }

    #[test]
    fn pass_rate_vacuously_passes_on_empty_input() {
        let m = assertion_pass_rate(&[]);
        assert_eq!(m.value, 1.0);
        assert!(m.passed);
    }

    #[test]
    fn pass_rate_excludes_soft() {
        let mut assertions: Vec<Assertion> = (0..95)
            .map(|i| {
                assertion(
                    &format!("A-{i}"),
                    AssertionKind::ElementVisible,
                    Verdict::Pass,
                )
            })
            .collect();
        for i in 95..100 {
            assertions.push(assertion(
                &format!("A-{i}"),
                AssertionKind::UrlMatches,
                Verdict::Fail,
            ));
        }
        // Failing soft assertions must not move the ratio.
        for i in 100..120 {
            assertions.push(assertion(&format!("A-{i}"), AssertionKind::Soft, Verdict::Fail));
        }
        let m = assertion_pass_rate(&assertions);
        assert!((m.value - 0.95).abs() < 1e-9);
        assert!(m.passed);

        let b = pass_rate_breakdown(&assertions);
        assert_eq!(b.passed, 95);
        assert_eq!(b.failed, 5);
        assert_eq!(b.soft_excluded, 20);
    }

    #[test]
    fn pass_rate_just_below_threshold_fails() {
        let mut assertions: Vec<Assertion> = (0..94)
            .map(|i| assertion(&format!("A-{i}"), AssertionKind::ApiStatus, Verdict::Pass))
            .collect();
        for i in 94..100 {
            assertions.push(assertion(
                &format!("A-{i}"),
                AssertionKind::ApiStatus,
                Verdict::Error,
            ));
        }
        let m = assertion_pass_rate(&assertions);
        assert!((m.value - 0.94).abs() < 1e-9);
        assert!(!m.passed);
    }

    #[test]
    fn flaky_rate_not_applicable_under_three_runs() {
        let history = vec![
            sample("run-1", "TC-1", Verdict::Pass),
            sample("run-2", "TC-1", Verdict::Fail),
        ];
        assert!(flaky_rate(&history).is_none());
    }

    #[test]
    fn flaky_rate_not_applicable_without_tracked_case() {
        // Three runs, but no single case executed in three of them.
        let history = vec![
            sample("run-1", "TC-1", Verdict::Pass),
            sample("run-2", "TC-2", Verdict::Pass),
            sample("run-3", "TC-3", Verdict::Pass),
        ];
        assert!(flaky_rate(&history).is_none());
    }

    #[test]
    fn flaky_rate_at_threshold_passes() {
        // 20 tracked cases, exactly one flaky → 0.05.
        let mut history = Vec::new();
        for c in 0..20 {
            for r in 0..3 {
                let verdict = if c == 0 && r == 1 {
                    Verdict::Fail
                } else {
                    Verdict::Pass
                };
                history.push(sample(&format!("run-{r}"), &format!("TC-{c}"), verdict));
            }
        }
        let m = flaky_rate(&history).unwrap();
        assert!((m.value - 0.05).abs() < 1e-9);
        assert!(m.passed);
    }

    #[test]
    fn flaky_rate_above_threshold_fails() {
        // 10 tracked cases, one flaky → 0.10.
        let mut history = Vec::new();
        for c in 0..10 {
            for r in 0..3 {
                let verdict = if c == 0 && r == 2 {
                    Verdict::Error
                } else {
                    Verdict::Pass
                };
                history.push(sample(&format!("run-{r}"), &format!("TC-{c}"), verdict));
            }
        }
        let m = flaky_rate(&history).unwrap();
        assert!((m.value - 0.10).abs() < 1e-9);
        assert!(!m.passed);
    }

    #[test]
    fn consistently_failing_case_is_not_flaky() {
        let mut history = Vec::new();
        for r in 0..3 {
            history.push(sample(&format!("run-{r}"), "TC-0", Verdict::Fail));
            history.push(sample(&format!("run-{r}"), "TC-1", Verdict::Pass));
        }
        let m = flaky_rate(&history).unwrap();
        assert_eq!(m.value, 0.0);
        assert!(m.passed);
    }

    #[test]
    fn gate_combines_metrics() {
        let requirements = vec![req("R-1", true)];
        let cases = vec![case("TC-1", "R-1")];
        let assertions = vec![assertion("A-1", AssertionKind::UrlMatches, Verdict::Pass)];
        let report = evaluate_gate(&requirements, &cases, &assertions, &[]);
        assert_eq!(report.metrics.len(), 2, "flaky omitted without history");
        assert!(report.passed);
    }

    #[test]
    fn gate_fails_when_any_metric_fails() {
        let requirements = vec![req("R-1", true), req("R-2", true)];
        let cases = vec![case("TC-1", "R-1")];
        let assertions = vec![assertion("A-1", AssertionKind::UrlMatches, Verdict::Pass)];
        let report = evaluate_gate(&requirements, &cases, &assertions, &[]);
        assert!(!report.passed, "coverage 0.5 must fail the gate");
    }
}
