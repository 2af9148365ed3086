//! Terminal rendering of reports and diffs.

use edd_lib::case::EvalType;
use edd_lib::diff::Diff;
use edd_lib::report::{Report, RunVerdict, Thresholds};

/// Render a full run report as a human-readable summary.
pub fn render_report(report: &Report, thresholds: &Thresholds, verdict: &RunVerdict) -> String {
    let mut out = String::new();

    for result in &report.results {
        let icon = if result.passed { "✅" } else { "❌" };
        out.push_str(&format!(
            "{icon} {} [{}] ({:.1}s)\n",
            result.case_id,
            result.eval_type.as_str(),
            result.duration_s
        ));
        for check in &result.checks {
            if !check.passed {
                out.push_str(&format!("   └─ {}: {}\n", check.name, check.detail));
            }
        }
    }

    out.push('\n');
    let summary = report.summary();
    for (eval_type, tally) in &summary {
        let threshold = match eval_type {
            EvalType::Regression => thresholds.regression,
            EvalType::Capability => thresholds.capability,
        };
        out.push_str(&format!(
            "{}: {}/{} passed ({:.1}%, threshold {:.0}%)\n",
            eval_type.as_str(),
            tally.passed,
            tally.total,
            tally.percentage(),
            threshold * 100.0
        ));
    }

    out.push_str(if verdict.passed {
        "\nRESULT: PASS\n"
    } else {
        "\nRESULT: FAIL\n"
    });
    out
}

/// Render a diff classification table with aggregate counts.
pub fn render_diff(diff: &Diff) -> String {
    let mut out = String::new();
    let sections: [(&str, &[String]); 6] = [
        ("Regressed", &diff.regressed),
        ("Fixed", &diff.fixed),
        ("Unchanged (pass)", &diff.unchanged_pass),
        ("Unchanged (fail)", &diff.unchanged_fail),
        ("Added", &diff.added),
        ("Removed", &diff.removed),
    ];
    for (label, ids) in sections {
        if ids.is_empty() {
            continue;
        }
        out.push_str(&format!("{label}:\n"));
        for id in ids {
            out.push_str(&format!("  - {id}\n"));
        }
    }

    out.push('\n');
    let counts: Vec<String> = diff
        .counts()
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .map(|(label, n)| format!("{n} {label}"))
        .collect();
    if counts.is_empty() {
        out.push_str("No cases in either report.\n");
    } else {
        out.push_str(&format!("Summary: {}\n", counts.join(", ")));
    }
    out
}
