//! Run reports and threshold verdicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::case::EvalType;
use crate::engine::CaseResult;
use crate::error::EddResult;

/// The immutable outcome of one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub results: Vec<CaseResult>,
}

/// Pass/total counts for one eval type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Tally {
    pub passed: usize,
    pub total: usize,
}

impl Tally {
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            // No cases of this type cannot fail a threshold.
            1.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    pub fn percentage(&self) -> f64 {
        self.rate() * 100.0
    }
}

/// Minimum pass rates (fractions in `[0, 1]`) the run must meet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub regression: f64,
    pub capability: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            regression: 1.0,
            capability: 0.0,
        }
    }
}

/// Per-eval-type verdicts; `passed` requires both to hold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunVerdict {
    pub regression_met: bool,
    pub capability_met: bool,
    pub passed: bool,
}

impl Report {
    pub fn new(results: Vec<CaseResult>, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            results,
        }
    }

    pub fn from_json(content: &str) -> EddResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json(&self) -> EddResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Pass/total tallies keyed by eval type. Types with no cases are absent.
    pub fn summary(&self) -> BTreeMap<EvalType, Tally> {
        let mut tallies: BTreeMap<EvalType, Tally> = BTreeMap::new();
        for result in &self.results {
            let tally = tallies.entry(result.eval_type).or_default();
            tally.total += 1;
            if result.passed {
                tally.passed += 1;
            }
        }
        tallies
    }

    fn tally(&self, eval_type: EvalType) -> Tally {
        self.summary().get(&eval_type).copied().unwrap_or_default()
    }

    /// Judge the run against caller-supplied thresholds. An eval type with
    /// zero cases meets its threshold vacuously.
    pub fn verdict(&self, thresholds: &Thresholds) -> RunVerdict {
        let regression = self.tally(EvalType::Regression);
        let capability = self.tally(EvalType::Capability);
        let regression_met = regression.rate() >= thresholds.regression;
        let capability_met = capability.rate() >= thresholds.capability;

        info!(
            regression_rate = regression.rate(),
            capability_rate = capability.rate(),
            regression_met,
            capability_met,
            "Computed run verdict"
        );

        RunVerdict {
            regression_met,
            capability_met,
            passed: regression_met && capability_met,
        }
    }
}
