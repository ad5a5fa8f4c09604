//! Traceability chain checker.
//!
//! Builds the requirement → case → assertion → evidence chain and classifies
//! every assertion into exactly one bucket. Assertions outside the
//! `complete` bucket are excluded from gate-facing pass-rate math so a
//! traceability gap can never silently count as a pass.

use crate::model::{Assertion, Requirement, TestCase};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ---------------------------------------------------------------------------
// TraceBucket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceBucket {
    /// Case and requirement both resolve and an evidence path is present.
    Complete,
    /// Chain resolves but no evidence path was recorded.
    Incomplete,
    /// Case or requirement does not resolve.
    Orphaned,
}

// ---------------------------------------------------------------------------
// TraceLink
// ---------------------------------------------------------------------------

/// Derived link for one assertion. Never stored — recomputed per evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceLink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    pub assertion_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_path: Option<String>,
    pub bucket: TraceBucket,
}

// ---------------------------------------------------------------------------
// TraceReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceReport {
    pub links: Vec<TraceLink>,
    /// Test cases whose requirement id does not resolve.
    pub dangling_cases: Vec<String>,
    pub complete: usize,
    pub incomplete: usize,
    pub orphaned: usize,
    /// complete / (complete + incomplete + orphaned), 1.0 when empty.
    pub completeness_rate: f64,
}

impl TraceReport {
    /// Assertion ids safe to feed into gate-facing pass-rate math.
    pub fn gateable_assertion_ids(&self) -> BTreeSet<&str> {
        self.links
            .iter()
            .filter(|l| l.bucket == TraceBucket::Complete)
            .map(|l| l.assertion_id.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Chain construction
// ---------------------------------------------------------------------------

pub fn build_trace(
    requirements: &[Requirement],
    cases: &[TestCase],
    assertions: &[Assertion],
) -> TraceReport {
    let req_ids: BTreeSet<&str> = requirements.iter().map(|r| r.id.as_str()).collect();
    let case_by_id: HashMap<&str, &TestCase> = cases.iter().map(|c| (c.id.as_str(), c)).collect();

    let dangling_cases: Vec<String> = cases
        .iter()
        .filter(|c| !req_ids.contains(c.requirement_id.as_str()))
        .map(|c| c.id.clone())
        .collect();

    let mut links = Vec::with_capacity(assertions.len());
    let (mut complete, mut incomplete, mut orphaned) = (0usize, 0usize, 0usize);

    for a in assertions {
        let case = case_by_id.get(a.case_id.as_str());
        let requirement_resolves = case
            .map(|c| req_ids.contains(c.requirement_id.as_str()))
            .unwrap_or(false);

        let bucket = if case.is_none() || !requirement_resolves {
            orphaned += 1;
            TraceBucket::Orphaned
        } else if a.evidence_path.is_none() {
            incomplete += 1;
            TraceBucket::Incomplete
        } else {
            complete += 1;
            TraceBucket::Complete
        };

        links.push(TraceLink {
            requirement_id: case
                .filter(|c| req_ids.contains(c.requirement_id.as_str()))
                .map(|c| c.requirement_id.clone()),
            case_id: case.map(|c| c.id.clone()),
            assertion_id: a.id.clone(),
            evidence_path: a.evidence_path.clone(),
            bucket,
        });
    }

    let total = complete + incomplete + orphaned;
    let completeness_rate = if total == 0 {
        1.0
    } else {
        complete as f64 / total as f64
    };

    TraceReport {
        links,
        dangling_cases,
        complete,
        incomplete,
        orphaned,
        completeness_rate,
    }
}

/// Filter `assertions` down to those the report marks gateable.
pub fn gateable_assertions<'a>(
    assertions: &'a [Assertion],
    report: &TraceReport,
) -> Vec<&'a Assertion> {
    let ids = report.gateable_assertion_ids();
    assertions
        .iter()
        .filter(|a| ids.contains(a.id.as_str()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
