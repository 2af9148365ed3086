//! Reconstructed execution traces.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// One tool invocation derived from paired `tool_call`/`tool_result` events.
/// A call with no matching result is still recorded, with an empty output.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub args: Map<String, Value>,
    pub output_summary: String,
    /// 0-based index within the owning trace.
    pub position: usize,
}

/// The ordered record of tool invocations and final text for one session
/// window. Invocation order is strictly the order `tool_call` events
/// occurred; ties on timestamp break by line sequence number.
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub session_id: String,
    pub invocations: Vec<ToolInvocation>,
    pub final_text: String,
    /// Half-open window `[start, end)` this trace was materialized over.
    pub window: (DateTime<Utc>, DateTime<Utc>),
}

impl Trace {
    /// Tool names in call order.
    pub fn tool_names(&self) -> Vec<&str> {
        self.invocations.iter().map(|i| i.name.as_str()).collect()
    }

    /// The `command` argument of every `exec` invocation, in call order.
    pub fn exec_commands(&self) -> Vec<&str> {
        self.invocations
            .iter()
            .filter(|i| i.name == "exec")
            .filter_map(|i| i.args.get("command").and_then(Value::as_str))
            .collect()
    }

    pub fn has_final_text(&self) -> bool {
        !self.final_text.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation(name: &str, args: Value, position: usize) -> ToolInvocation {
        ToolInvocation {
            name: name.to_string(),
            args: args.as_object().cloned().unwrap_or_default(),
            output_summary: String::new(),
            position,
        }
    }

    #[test]
    fn exec_commands_only_sees_the_exec_tool() {
        let trace = Trace {
            session_id: "s1".to_string(),
            invocations: vec![
                invocation("exec", json!({"command": "check_health prod-01"}), 0),
                invocation("get_weather", json!({"city": "Shanghai"}), 1),
                invocation("exec", json!({"command": "query_metrics"}), 2),
                invocation("exec", json!({}), 3),
            ],
            final_text: String::new(),
            window: (Utc::now(), Utc::now()),
        };
        assert_eq!(trace.exec_commands(), vec!["check_health prod-01", "query_metrics"]);
        assert_eq!(trace.tool_names(), vec!["exec", "get_weather", "exec", "exec"]);
    }
}
