//! The assertion engine.
//!
//! [`evaluate`] is a pure function from (case, trace) to a [`CaseResult`]:
//! identical inputs always yield identical results, and nothing here touches
//! the outside world. Each declared assertion becomes one named check;
//! absent assertion kinds impose no constraint, so a case with no
//! expectations passes vacuously.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::case::{ArgValue, Assertion, Case, coerce_text};
use crate::trace::Trace;

/// One named, independently pass/fail check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn new(name: &str, passed: bool, detail: String) -> Self {
        Self {
            name: name.to_string(),
            passed,
            detail,
        }
    }
}

/// The outcome of evaluating one case against one trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseResult {
    pub case_id: String,
    pub eval_type: crate::case::EvalType,
    pub passed: bool,
    pub checks: Vec<Check>,
    pub duration_s: f64,
}

impl CaseResult {
    /// Result for a case whose window closed without a terminal response.
    /// Carries a single distinguished `timeout` check and no content checks.
    pub fn timed_out(case: &Case, duration: Duration) -> Self {
        Self {
            case_id: case.id.clone(),
            eval_type: case.eval_type,
            passed: false,
            checks: vec![Check::new(
                "timeout",
                false,
                format!("no terminal response within {}s", case.timeout_s),
            )],
            duration_s: duration.as_secs_f64(),
        }
    }

    /// Result for a case whose agent interaction could not be started at
    /// all (e.g. the driver failed to obtain a session id).
    pub fn driver_failed(case: &Case, detail: String, duration: Duration) -> Self {
        Self {
            case_id: case.id.clone(),
            eval_type: case.eval_type,
            passed: false,
            checks: vec![Check::new("driver", false, detail)],
            duration_s: duration.as_secs_f64(),
        }
    }
}

/// Evaluate one case against one trace. Checks are emitted in assertion
/// declaration order; overall `passed` is the AND of all emitted checks.
pub fn evaluate(case: &Case, trace: &Trace, duration: Duration) -> CaseResult {
    let checks: Vec<Check> = case
        .assertions()
        .iter()
        .map(|assertion| check_assertion(assertion, trace))
        .collect();
    let passed = checks.iter().all(|c| c.passed);

    debug!(
        case_id = %case.id,
        passed,
        checks = checks.len(),
        invocations = trace.invocations.len(),
        "Evaluated case"
    );

    CaseResult {
        case_id: case.id.clone(),
        eval_type: case.eval_type,
        passed,
        checks,
        duration_s: duration.as_secs_f64(),
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Greedy subsequence scan: how many leading `patterns` can be matched
/// against `items` in order, allowing other items to interleave.
fn subsequence_matched<T: ?Sized>(
    items: &[&T],
    patterns: &[String],
    matches: impl Fn(&T, &str) -> bool,
) -> usize {
    let mut idx = 0;
    for item in items {
        if idx < patterns.len() && matches(item, &patterns[idx]) {
            idx += 1;
        }
    }
    idx
}

fn check_assertion(assertion: &Assertion, trace: &Trace) -> Check {
    match assertion {
        Assertion::ToolsCalled(expected) => {
            let names = trace.tool_names();
            let missing: Vec<&str> = expected
                .iter()
                .map(String::as_str)
                .filter(|t| !names.contains(t))
                .collect();
            let passed = missing.is_empty();
            let detail = if passed {
                format!("all required tools called: {expected:?}")
            } else {
                format!(
                    "missing required tool calls: {} (saw: {names:?})",
                    missing.join(", ")
                )
            };
            Check::new("tool_called", passed, detail)
        }
        Assertion::ToolsOrdered(expected) => {
            let names = trace.tool_names();
            let matched = subsequence_matched(&names, expected, |name, pat| name == pat);
            let passed = matched == expected.len();
            let detail = if passed {
                format!("tools appeared in order: {expected:?}")
            } else {
                format!(
                    "tool order mismatch: matched {matched}/{} of {expected:?} (saw: {names:?})",
                    expected.len()
                )
            };
            Check::new("tool_ordered", passed, detail)
        }
        Assertion::ToolsForbidden(forbidden) => {
            let names = trace.tool_names();
            let violations: Vec<&str> = forbidden
                .iter()
                .map(String::as_str)
                .filter(|t| names.contains(t))
                .collect();
            let passed = violations.is_empty();
            let detail = if passed {
                format!("no forbidden tool called: {forbidden:?}")
            } else {
                format!("forbidden tool was called: {}", violations.join(", "))
            };
            Check::new("forbidden_tools", passed, detail)
        }
        Assertion::CommandsContain(patterns) => {
            let commands = trace.exec_commands();
            let missing: Vec<&str> = patterns
                .iter()
                .map(String::as_str)
                .filter(|pat| !commands.iter().any(|cmd| contains_ci(cmd, pat)))
                .collect();
            let passed = missing.is_empty();
            let detail = if passed {
                format!("all expected command patterns matched: {patterns:?}")
            } else {
                format!(
                    "missing expected command patterns: {} (exec commands: {commands:?})",
                    missing.join(", ")
                )
            };
            Check::new("commands", passed, detail)
        }
        Assertion::CommandsForbidden(patterns) => {
            let commands = trace.exec_commands();
            let violations: Vec<&str> = patterns
                .iter()
                .map(String::as_str)
                .filter(|pat| commands.iter().any(|cmd| contains_ci(cmd, pat)))
                .collect();
            let passed = violations.is_empty();
            let detail = if passed {
                format!("no forbidden command pattern matched: {patterns:?}")
            } else {
                format!("forbidden command patterns found: {}", violations.join(", "))
            };
            Check::new("forbidden_commands", passed, detail)
        }
        Assertion::CommandsOrdered(patterns) => {
            let commands = trace.exec_commands();
            let matched = subsequence_matched(&commands, patterns, contains_ci);
            let passed = matched == patterns.len();
            let detail = if passed {
                format!("command patterns matched in order: {patterns:?}")
            } else {
                format!(
                    "command order mismatch: matched {matched}/{} of {patterns:?} (exec commands: {commands:?})",
                    patterns.len()
                )
            };
            Check::new("commands_ordered", passed, detail)
        }
        Assertion::OutputContains(patterns) => {
            let missing: Vec<&str> = patterns
                .iter()
                .map(String::as_str)
                .filter(|pat| !contains_ci(&trace.final_text, pat))
                .collect();
            let passed = missing.is_empty();
            let detail = if passed {
                format!("output contains all expected fragments: {patterns:?}")
            } else if trace.final_text.is_empty() {
                format!("final text is empty; missing fragments: {}", missing.join(", "))
            } else {
                format!("output missing expected fragments: {}", missing.join(", "))
            };
            Check::new("output_contains", passed, detail)
        }
        Assertion::ToolArgs(expectations) => check_tool_args(expectations, trace),
    }
}

/// Compare expected arguments against the first invocation of each named
/// tool. Arguments not named in the case are never checked.
fn check_tool_args(
    expectations: &std::collections::BTreeMap<
        String,
        std::collections::BTreeMap<String, ArgValue>,
    >,
    trace: &Trace,
) -> Check {
    let mut failures = Vec::new();

    for (tool, expected_args) in expectations {
        let Some(invocation) = trace.invocations.iter().find(|i| &i.name == tool) else {
            failures.push(format!("tool `{tool}` was not called; cannot validate arguments"));
            continue;
        };
        for (key, expected) in expected_args {
            match invocation.args.get(key) {
                Some(actual) if expected.matches(actual) => {}
                Some(actual) => failures.push(format!(
                    "argument mismatch: {tool}.{key} expected {expected:?}, actual {}",
                    coerce_text(actual)
                )),
                None => failures.push(format!(
                    "argument mismatch: {tool}.{key} expected {expected:?}, argument absent"
                )),
            }
        }
    }

    let passed = failures.is_empty();
    let detail = if passed {
        "all tool argument expectations matched".to_string()
    } else {
        failures.join("; ")
    };
    Check::new("tool_args", passed, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CaseSpec;
    use chrono::Utc;
    use serde_json::json;

    fn trace_with(tools: &[(&str, serde_json::Value)], final_text: &str) -> Trace {
        Trace {
            session_id: "s1".to_string(),
            invocations: tools
                .iter()
                .enumerate()
                .map(|(position, (name, args))| crate::trace::ToolInvocation {
                    name: name.to_string(),
                    args: args.as_object().cloned().unwrap_or_default(),
                    output_summary: String::new(),
                    position,
                })
                .collect(),
            final_text: final_text.to_string(),
            window: (Utc::now(), Utc::now()),
        }
    }

    fn case(spec: CaseSpec) -> Case {
        CaseSpec {
            id: "c1".to_string(),
            message: "m".to_string(),
            ..spec
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn no_assertions_pass_vacuously() {
        let case = case(CaseSpec::default());
        let trace = trace_with(&[], "");
        let result = evaluate(&case, &trace, Duration::from_secs(1));
        assert!(result.passed);
        assert!(result.checks.is_empty());
    }

    #[test]
    fn evaluate_is_deterministic() {
        let case = case(CaseSpec {
            expect_tools: vec!["exec".to_string()],
            expect_output_contains: vec!["ok".to_string()],
            ..CaseSpec::default()
        });
        let trace = trace_with(&[("exec", json!({"command": "ls"}))], "OK then");
        let a = evaluate(&case, &trace, Duration::from_secs(2));
        let b = evaluate(&case, &trace, Duration::from_secs(2));
        assert_eq!(a, b);
    }

    #[test]
    fn first_invocation_wins_for_tool_args() {
        let case = case(CaseSpec {
            expect_tool_args: [(
                "exec".to_string(),
                [("command".to_string(), json!("check_health"))].into(),
            )]
            .into(),
            ..CaseSpec::default()
        });
        // The second exec would match, but the first is what gets compared.
        let trace = trace_with(
            &[
                ("exec", json!({"command": "query_metrics"})),
                ("exec", json!({"command": "check_health prod-01"})),
            ],
            "",
        );
        let result = evaluate(&case, &trace, Duration::from_secs(1));
        assert!(!result.passed);
        assert_eq!(result.checks[0].name, "tool_args");
    }

    #[test]
    fn timed_out_has_only_the_timeout_check() {
        let case = case(CaseSpec {
            expect_tools: vec!["exec".to_string()],
            timeout_s: 1,
            ..CaseSpec::default()
        });
        let result = CaseResult::timed_out(&case, Duration::from_secs(1));
        assert!(!result.passed);
        assert_eq!(result.checks.len(), 1);
        assert_eq!(result.checks[0].name, "timeout");
        assert!(!result.checks[0].passed);
    }
}
