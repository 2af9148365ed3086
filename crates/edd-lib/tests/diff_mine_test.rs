//! Diffing and mining over real report and log data.

use chrono::{TimeZone, Utc};
use edd_lib::case::EvalType;
use edd_lib::diff::diff;
use edd_lib::engine::{CaseResult, Check};
use edd_lib::event::read_log_dir;
use edd_lib::mine::{mine_sessions, MinerConfig};
use edd_lib::report::{Report, Thresholds};
use edd_lib::session::SessionStore;
use std::fs;

fn result(case_id: &str, passed: bool) -> CaseResult {
    CaseResult {
        case_id: case_id.to_string(),
        eval_type: EvalType::Regression,
        passed,
        checks: vec![Check {
            name: "tool_called".to_string(),
            passed,
            detail: String::new(),
        }],
        duration_s: 0.3,
    }
}

#[test]
fn diff_round_trip_through_report_json() {
    let before = Report::new(vec![result("a", true), result("b", false)], Utc::now());
    let after = Report::new(vec![result("a", false), result("b", true)], Utc::now());

    // Reports travel as JSON between runs; the diff must survive that.
    let before = Report::from_json(&before.to_json().unwrap()).unwrap();
    let after = Report::from_json(&after.to_json().unwrap()).unwrap();

    let forward = diff(&before, &after);
    let backward = diff(&after, &before);
    assert_eq!(forward.regressed, vec!["a"]);
    assert_eq!(forward.fixed, vec!["b"]);
    assert_eq!(forward.fixed, backward.regressed);
    assert_eq!(forward.regressed, backward.fixed);
}

#[test]
fn threshold_verdict_drives_run_outcome() {
    let report = Report::new(
        vec![result("a", true), result("b", true), result("c", false)],
        Utc::now(),
    );
    assert!(!report.verdict(&Thresholds::default()).passed);
    assert!(
        report
            .verdict(&Thresholds {
                regression: 0.6,
                capability: 0.0,
            })
            .passed
    );
}

fn write_session_log(dir: &std::path::Path) {
    let log = r#"{"timestamp":"2026-08-01T10:00:00Z","session_id":"sess-aaaa-1111","event_type":"tool_call","tool_name":"exec","input":{"command":"check_health"}}
{"timestamp":"2026-08-01T10:00:01Z","session_id":"sess-aaaa-1111","event_type":"tool_result","tool_name":"exec","output_summary":"green"}
{"timestamp":"2026-08-01T10:00:02Z","session_id":"sess-aaaa-1111","event_type":"tool_call","tool_name":"get_weather","input":{"city":"Shanghai"}}
{"timestamp":"2026-08-01T10:00:03Z","session_id":"sess-aaaa-1111","event_type":"response","text":"Production healthy, weather sunny"}
{"timestamp":"2026-08-01T10:00:04Z","session_id":"sess-bbbb-2222","event_type":"tool_call","tool_name":"exec","input":{"command":"ls"}}
"#;
    fs::write(dir.join("agent-2026-08-01.log"), log).unwrap();
}

fn mine_dir(dir: &std::path::Path, min_tools: usize) -> Vec<edd_lib::MinedCase> {
    let store = SessionStore::new();
    let (events, warnings) = read_log_dir(dir, "agent").unwrap();
    for event in events {
        store.append(event);
    }
    assert_eq!(warnings, 0);
    let extracted_at = Utc.with_ymd_and_hms(2026, 8, 2, 0, 0, 0).unwrap();
    mine_sessions(&store, &MinerConfig { min_tools }, extracted_at)
}

#[test]
fn mining_honors_the_invocation_minimum() {
    let dir = tempfile::tempdir().unwrap();
    write_session_log(dir.path());

    let mined = mine_dir(dir.path(), 2);
    assert_eq!(mined.len(), 1);
    let case = &mined[0].case;
    assert_eq!(mined[0].source_session_id, "sess-aaaa-1111");
    assert_eq!(case.expect_tools, vec!["exec", "get_weather"]);
    assert_eq!(case.expect_tools_ordered, vec!["exec", "get_weather"]);
    assert_eq!(mined[0].golden_tool_sequence.len(), 2);

    // min_tools 1 picks up the single-call session too, in sorted id order.
    let all = mine_dir(dir.path(), 1);
    assert_eq!(all.len(), 2);
    assert!(all[0].source_session_id < all[1].source_session_id);
}

#[test]
fn mining_an_unchanged_log_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write_session_log(dir.path());

    let first = mine_dir(dir.path(), 1);
    let second = mine_dir(dir.path(), 1);
    assert_eq!(first, second);
}

#[test]
fn mined_cases_validate_and_assert_output_fragments() {
    let dir = tempfile::tempdir().unwrap();
    write_session_log(dir.path());

    let mined = mine_dir(dir.path(), 2);
    let spec = mined[0].case.clone();
    assert!(!spec.expect_output_contains.is_empty());
    assert!(spec.expect_output_contains.len() <= 3);
    assert!(spec.validate().is_ok());
}
