//! Orchestration for the evaluation runner.
//!
//! The binary in `main.rs` handles flags and exit codes; the actual run
//! loop, offline replay, and mined-case export live here so integration
//! tests can drive them with a scripted [`driver::AgentDriver`].

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use edd_lib::case::Case;
use edd_lib::engine::{CaseResult, evaluate};
use edd_lib::mine::MinedCase;
use edd_lib::session::SessionStore;
use edd_lib::trace::Trace;

pub mod driver;
pub mod renderer;

use driver::AgentDriver;

/// How often the run loop checks for a terminal response.
pub const RESPONSE_POLL: Duration = Duration::from_millis(250);

/// Evaluate each case in order against a live agent: send the message,
/// wait (bounded by the case's timeout) for a terminal response to land in
/// the store, then evaluate the windowed trace. Driver failures and
/// timeouts become failing results; nothing here aborts the batch.
pub async fn run_cases(
    cases: &[Case],
    driver: &dyn AgentDriver,
    store: &SessionStore,
) -> Vec<CaseResult> {
    let mut results = Vec::with_capacity(cases.len());
    for case in cases {
        info!(case_id = %case.id, "Running case");
        results.push(run_one(case, driver, store).await);
    }
    results
}

async fn run_one(case: &Case, driver: &dyn AgentDriver, store: &SessionStore) -> CaseResult {
    let window_start = Utc::now();
    let started = Instant::now();

    let session_id = match driver.send(&case.message).await {
        Ok(id) => id,
        Err(e) => {
            warn!(case_id = %case.id, error = %e, "Driver failed to send message");
            return CaseResult::driver_failed(case, e.to_string(), started.elapsed());
        }
    };

    let budget = Duration::from_secs(case.timeout_s);
    loop {
        if store.has_terminal_response(&session_id, window_start) {
            break;
        }
        if started.elapsed() >= budget {
            return CaseResult::timed_out(case, started.elapsed());
        }
        tokio::time::sleep(RESPONSE_POLL).await;
    }

    // Nudge the window end past "now" so an event stamped this instant is
    // inside the half-open range.
    let window_end = Utc::now() + ChronoDuration::milliseconds(1);
    let trace = store.materialize(&session_id, (window_start, window_end));
    evaluate(case, &trace, started.elapsed())
}

/// Evaluate every case against one already-recorded trace, without driving
/// the agent. Durations are not meaningful offline and report as zero.
pub fn replay_cases(cases: &[Case], trace: &Trace) -> Vec<CaseResult> {
    cases
        .iter()
        .map(|case| evaluate(case, trace, Duration::ZERO))
        .collect()
}

#[derive(Serialize)]
struct MinedFile<'a> {
    cases: &'a [MinedCase],
}

/// Serialize mined cases as a loadable YAML case file. Provenance fields
/// ride along; the loader ignores them.
pub fn mined_to_yaml(mined: &[MinedCase]) -> Result<String> {
    Ok(serde_yaml::to_string(&MinedFile { cases: mined })?)
}

/// Serialize mined cases as golden-dataset JSONL, one record per line.
pub fn mined_to_jsonl(mined: &[MinedCase]) -> Result<String> {
    let mut out = String::new();
    for case in mined {
        out.push_str(&serde_json::to_string(&golden_record(case))?);
        out.push('\n');
    }
    Ok(out)
}

/// Project a mined case onto the golden-dataset record schema the loader
/// accepts back.
pub fn golden_record(mined: &MinedCase) -> Value {
    let mut asserts = Vec::new();
    for tool in &mined.case.expect_tools {
        asserts.push(json!({"type": "tool_called", "value": tool}));
    }
    if mined.case.expect_tools_ordered.len() > 1 {
        asserts.push(json!({"type": "tool_order", "value": mined.case.expect_tools_ordered}));
    }
    for fragment in &mined.case.expect_output_contains {
        asserts.push(json!({"type": "contains", "value": fragment}));
    }

    json!({
        "id": mined.case.id,
        "description": mined.case.description,
        "tags": mined.case.tags,
        "source_session_id": mined.source_session_id,
        "extracted_at": mined.extracted_at,
        "conversation": [{
            "turn": 1,
            "user": mined.case.message,
            "assert": asserts,
        }],
    })
}
