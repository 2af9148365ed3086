//! Case file loading.
//!
//! Case files are a mapping with key `cases`, accepted in YAML or JSON with
//! identical schema; the engine is agnostic to which. JSONL golden-dataset
//! records (the Miner's export format) are also accepted and converted to
//! the same case shape. Any load or validation failure is a configuration
//! error and aborts before evaluation.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::case::{Case, CaseSpec};
use crate::error::{EddError, EddResult};

/// Top-level case file shape.
#[derive(Debug, Default, Deserialize, serde::Serialize)]
pub struct CaseFile {
    pub cases: Vec<CaseSpec>,
}

/// Load and validate a case file, selecting the serialization by extension
/// (`.yaml`/`.yml`, `.json`, or `.jsonl` for golden datasets).
pub fn load_cases(path: &Path) -> EddResult<Vec<Case>> {
    let content = fs::read_to_string(path)
        .map_err(|e| EddError::config(format!("cannot read case file {}: {e}", path.display())))?;

    let specs = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => cases_from_yaml(&content)?,
        Some("json") => cases_from_json(&content)?,
        Some("jsonl") => cases_from_golden_jsonl(&content)?,
        other => {
            return Err(EddError::config(format!(
                "unsupported case file extension {:?} for {}",
                other.unwrap_or(""),
                path.display()
            )))
        }
    };

    validate_all(specs)
}

pub fn cases_from_yaml(content: &str) -> EddResult<Vec<CaseSpec>> {
    let file: CaseFile = serde_yaml::from_str(content)?;
    Ok(file.cases)
}

pub fn cases_from_json(content: &str) -> EddResult<Vec<CaseSpec>> {
    let file: CaseFile = serde_json::from_str(content)?;
    Ok(file.cases)
}

fn validate_all(specs: Vec<CaseSpec>) -> EddResult<Vec<Case>> {
    let mut seen = HashSet::new();
    let mut cases = Vec::with_capacity(specs.len());
    for spec in specs {
        let case = spec.validate()?;
        if !seen.insert(case.id.clone()) {
            return Err(EddError::config(format!("duplicate case id `{}`", case.id)));
        }
        cases.push(case);
    }
    Ok(cases)
}

/// One golden-dataset record: a mined conversation with per-turn assertions.
#[derive(Debug, Deserialize)]
struct GoldenRecord {
    id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    conversation: Vec<GoldenTurn>,
}

#[derive(Debug, Deserialize)]
struct GoldenTurn {
    user: String,
    #[serde(default, rename = "assert")]
    asserts: Vec<GoldenAssert>,
}

#[derive(Debug, Deserialize)]
struct GoldenAssert {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    args: Option<BTreeMap<String, Value>>,
}

/// Convert golden-dataset JSONL records into case specs. A record with
/// several turns yields one case per turn, suffixed with the turn number.
pub fn cases_from_golden_jsonl(content: &str) -> EddResult<Vec<CaseSpec>> {
    let mut specs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: GoldenRecord = serde_json::from_str(line)?;
        let multi_turn = record.conversation.len() > 1;
        for (turn, conv) in record.conversation.into_iter().enumerate() {
            let id = if multi_turn {
                format!("{}_{}", record.id, turn + 1)
            } else {
                record.id.clone()
            };
            let mut spec = CaseSpec {
                id,
                message: conv.user,
                tags: record.tags.clone(),
                description: record.description.clone(),
                ..CaseSpec::default()
            };
            for assertion in conv.asserts {
                apply_golden_assert(&mut spec, assertion)?;
            }
            specs.push(spec);
        }
    }
    Ok(specs)
}

fn apply_golden_assert(spec: &mut CaseSpec, assertion: GoldenAssert) -> EddResult<()> {
    let as_string = |value: &Value| -> EddResult<String> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| EddError::config(format!("assertion value must be a string: {value}")))
    };
    let as_strings = |value: Value| -> EddResult<Vec<String>> {
        serde_json::from_value(value)
            .map_err(|e| EddError::config(format!("assertion value must be a string list: {e}")))
    };

    match assertion.kind.as_str() {
        "tool_called" => spec.expect_tools.push(as_string(&assertion.value)?),
        "not_tool_called" => spec.forbidden_tools.push(as_string(&assertion.value)?),
        "tool_order" => spec.expect_tools_ordered = as_strings(assertion.value)?,
        "contains" => spec.expect_output_contains.push(as_string(&assertion.value)?),
        "command_contains" => spec.expect_commands.push(as_string(&assertion.value)?),
        "not_command_contains" => spec.forbidden_commands.push(as_string(&assertion.value)?),
        "command_order" => spec.expect_commands_ordered = as_strings(assertion.value)?,
        "tool_args" => {
            let tool = assertion
                .tool
                .ok_or_else(|| EddError::config("tool_args assertion is missing `tool`"))?;
            let args = assertion.args.unwrap_or_default();
            spec.expect_tool_args.entry(tool).or_default().extend(args);
        }
        other => {
            warn!(kind = other, case_id = %spec.id, "Skipping unknown assertion type");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::EvalType;

    const YAML: &str = r#"
cases:
  - id: weather
    message: "What's the weather in Shanghai today?"
    expect_tools: [get_weather]
    expect_output_contains: ["Shanghai"]
  - id: chitchat
    message: "Hello"
    eval_type: capability
    forbidden_tools: [exec]
"#;

    #[test]
    fn yaml_and_json_share_one_schema() {
        let from_yaml = validate_all(cases_from_yaml(YAML).unwrap()).unwrap();
        let json = r#"{"cases":[
            {"id":"weather","message":"What's the weather in Shanghai today?",
             "expect_tools":["get_weather"],"expect_output_contains":["Shanghai"]},
            {"id":"chitchat","message":"Hello","eval_type":"capability","forbidden_tools":["exec"]}
        ]}"#;
        let from_json = validate_all(cases_from_json(json).unwrap()).unwrap();

        assert_eq!(from_yaml.len(), 2);
        assert_eq!(from_yaml[0].id, from_json[0].id);
        assert_eq!(from_yaml[1].eval_type, EvalType::Capability);
        assert_eq!(from_json[1].eval_type, EvalType::Capability);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let yaml = "cases:\n  - id: a\n    message: x\n  - id: a\n    message: y\n";
        let err = validate_all(cases_from_yaml(yaml).unwrap()).unwrap_err();
        assert!(err.to_string().contains("duplicate case id"));
    }

    #[test]
    fn golden_jsonl_converts_assertions() {
        let jsonl = r#"{"id":"mined_abc","tags":["mined"],"conversation":[{"turn":1,"user":"check prod","assert":[{"type":"tool_called","value":"exec"},{"type":"tool_order","value":["exec","exec"]},{"type":"not_tool_called","value":"rm"},{"type":"contains","value":"healthy"},{"type":"command_contains","value":"check_health"},{"type":"tool_args","tool":"exec","args":{"command":"check_health"}}]}]}"#;
        let specs = cases_from_golden_jsonl(jsonl).unwrap();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.id, "mined_abc");
        assert_eq!(spec.expect_tools, vec!["exec"]);
        assert_eq!(spec.expect_tools_ordered, vec!["exec", "exec"]);
        assert_eq!(spec.forbidden_tools, vec!["rm"]);
        assert_eq!(spec.expect_output_contains, vec!["healthy"]);
        assert_eq!(spec.expect_commands, vec!["check_health"]);
        assert!(spec.expect_tool_args.contains_key("exec"));
        assert!(spec.clone().validate().is_ok());
    }
}
