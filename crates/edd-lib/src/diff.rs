//! Structural comparison of two reports.
//!
//! Matching is by `case_id` only; neither report's ordering matters and
//! neither report is mutated. Output lists are sorted so the same pair of
//! reports always yields the same diff.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::report::Report;

/// Per-case-id status transitions between a before and an after report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    /// Passed before, fails after.
    pub regressed: Vec<String>,
    /// Failed before, passes after.
    pub fixed: Vec<String>,
    pub unchanged_pass: Vec<String>,
    pub unchanged_fail: Vec<String>,
    /// Present only in the after report.
    pub added: Vec<String>,
    /// Present only in the before report.
    pub removed: Vec<String>,
}

impl Diff {
    pub fn is_clean(&self) -> bool {
        self.regressed.is_empty()
    }

    /// Aggregate counts in a fixed display order.
    pub fn counts(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("regressed", self.regressed.len()),
            ("fixed", self.fixed.len()),
            ("unchanged_pass", self.unchanged_pass.len()),
            ("unchanged_fail", self.unchanged_fail.len()),
            ("added", self.added.len()),
            ("removed", self.removed.len()),
        ]
    }
}

/// Classify every case id appearing in either report.
pub fn diff(before: &Report, after: &Report) -> Diff {
    let before_by_id: BTreeMap<&str, bool> = before
        .results
        .iter()
        .map(|r| (r.case_id.as_str(), r.passed))
        .collect();
    let after_by_id: BTreeMap<&str, bool> = after
        .results
        .iter()
        .map(|r| (r.case_id.as_str(), r.passed))
        .collect();

    let mut out = Diff::default();
    for (id, &was_passing) in &before_by_id {
        match after_by_id.get(id) {
            Some(&is_passing) => {
                let bucket = match (was_passing, is_passing) {
                    (true, false) => &mut out.regressed,
                    (false, true) => &mut out.fixed,
                    (true, true) => &mut out.unchanged_pass,
                    (false, false) => &mut out.unchanged_fail,
                };
                bucket.push((*id).to_string());
            }
            None => out.removed.push((*id).to_string()),
        }
    }
    for id in after_by_id.keys() {
        if !before_by_id.contains_key(id) {
            out.added.push((*id).to_string());
        }
    }
    // BTreeMap iteration already sorts each bucket by case id.
    out
}
