//! Case mining over historical sessions.
//!
//! The miner turns recorded traces into candidate cases: the observed tool
//! sequence becomes the golden baseline, and a handful of salient words from
//! the final response become an output assertion. Everything here is
//! deterministic so re-mining an unchanged log reproduces the same cases,
//! differing only in the extraction timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::case::CaseSpec;
use crate::session::SessionStore;
use crate::trace::Trace;

#[derive(Debug, Clone, Copy)]
pub struct MinerConfig {
    /// Minimum invocation count for a session to qualify.
    pub min_tools: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self { min_tools: 1 }
    }
}

/// One observed invocation preserved as baseline data alongside the case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenTool {
    pub name: String,
    pub args: Map<String, Value>,
    pub output_summary: String,
}

/// A synthesized case plus provenance. Generated, never hand-edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinedCase {
    #[serde(flatten)]
    pub case: CaseSpec,
    pub golden_tool_sequence: Vec<GoldenTool>,
    pub source_session_id: String,
    pub extracted_at: DateTime<Utc>,
}

/// Mine one full-session trace. Returns `None` when the session does not
/// meet the invocation minimum.
pub fn mine_trace(
    trace: &Trace,
    config: &MinerConfig,
    extracted_at: DateTime<Utc>,
) -> Option<MinedCase> {
    if trace.invocations.len() < config.min_tools {
        debug!(
            session_id = %trace.session_id,
            invocations = trace.invocations.len(),
            min_tools = config.min_tools,
            "Session below mining threshold"
        );
        return None;
    }

    let mut distinct_tools: Vec<String> = Vec::new();
    for invocation in &trace.invocations {
        if !distinct_tools.contains(&invocation.name) {
            distinct_tools.push(invocation.name.clone());
        }
    }
    let ordered: Vec<String> = trace.invocations.iter().map(|i| i.name.clone()).collect();

    let short_id: String = trace.session_id.chars().take(8).collect();
    let case = CaseSpec {
        id: format!("mined_{short_id}"),
        // The log carries no user-message events, so replay drives the
        // evaluation from the recorded session rather than a fresh prompt.
        message: format!("Replay session {short_id}"),
        expect_tools: distinct_tools,
        expect_tools_ordered: ordered,
        expect_output_contains: salient_fragments(&trace.final_text),
        tags: vec!["mined".to_string()],
        description: format!("Mined from session {}", trace.session_id),
        ..CaseSpec::default()
    };

    Some(MinedCase {
        case,
        golden_tool_sequence: trace
            .invocations
            .iter()
            .map(|i| GoldenTool {
                name: i.name.clone(),
                args: i.args.clone(),
                output_summary: i.output_summary.clone(),
            })
            .collect(),
        source_session_id: trace.session_id.clone(),
        extracted_at,
    })
}

/// Mine every buffered session, in sorted session-id order.
pub fn mine_sessions(
    store: &SessionStore,
    config: &MinerConfig,
    extracted_at: DateTime<Utc>,
) -> Vec<MinedCase> {
    let mut mined = Vec::new();
    for session_id in store.session_ids() {
        let trace = store.materialize_full(&session_id);
        if let Some(case) = mine_trace(&trace, config, extracted_at) {
            mined.push(case);
        }
    }
    info!(
        sessions = store.session_ids().len(),
        mined = mined.len(),
        min_tools = config.min_tools,
        "Mining scan complete"
    );
    mined
}

/// Up to three words longer than two characters from the final text, ranked
/// by frequency with first occurrence breaking ties.
fn salient_fragments(text: &str) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, raw) in text.split_whitespace().enumerate() {
        let word: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if word.len() <= 2 {
            continue;
        }
        let entry = counts.entry(word).or_insert((0, position));
        entry.0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(word, (count, first))| (word, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(3).map(|(word, _, _)| word).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::ToolInvocation;
    use serde_json::json;

    fn trace(session_id: &str, tools: &[&str], final_text: &str) -> Trace {
        Trace {
            session_id: session_id.to_string(),
            invocations: tools
                .iter()
                .enumerate()
                .map(|(position, name)| ToolInvocation {
                    name: (*name).to_string(),
                    args: json!({"command": "check_health"})
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    output_summary: "ok".to_string(),
                    position,
                })
                .collect(),
            final_text: final_text.to_string(),
            window: (Utc::now(), Utc::now()),
        }
    }

    #[test]
    fn below_minimum_yields_nothing() {
        let config = MinerConfig { min_tools: 2 };
        let t = trace("abc", &["exec"], "done");
        assert!(mine_trace(&t, &config, Utc::now()).is_none());
    }

    #[test]
    fn mined_case_captures_sequence_and_distinct_tools() {
        let t = trace(
            "0123456789",
            &["exec", "get_weather", "exec"],
            "All hosts healthy, no alerts firing",
        );
        let mined = mine_trace(&t, &MinerConfig::default(), Utc::now()).unwrap();

        assert_eq!(mined.case.id, "mined_01234567");
        assert_eq!(mined.case.expect_tools, vec!["exec", "get_weather"]);
        assert_eq!(
            mined.case.expect_tools_ordered,
            vec!["exec", "get_weather", "exec"]
        );
        assert_eq!(mined.golden_tool_sequence.len(), 3);
        assert_eq!(mined.source_session_id, "0123456789");
        assert!(mined.case.clone().validate().is_ok());
    }

    #[test]
    fn fragments_rank_by_frequency_then_first_occurrence() {
        // "ok" and "is" fall under the length floor; "the" wins the count-1
        // tie against "load" by appearing first.
        let fragments = salient_fragments("ok ok the cpu cpu cpu load is low low");
        assert_eq!(fragments, vec!["cpu", "low", "the"]);
    }

    #[test]
    fn mining_is_idempotent_apart_from_extraction_time() {
        let t = trace("abcdef", &["exec", "exec"], "service restarted cleanly");
        let at = Utc::now();
        let first = mine_trace(&t, &MinerConfig::default(), at).unwrap();
        let second = mine_trace(&t, &MinerConfig::default(), at).unwrap();
        assert_eq!(first, second);
    }
}
