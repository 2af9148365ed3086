//! Declarative expectation sets.
//!
//! A case file is loosely typed on the wire ([`CaseSpec`]); validation and
//! conversion happen once at load time, producing a [`Case`] whose
//! expectations are tagged [`Assertion`] variants with explicit matcher
//! rules. The engine never interprets an untyped mapping at evaluation time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{EddError, EddResult};

/// How a case's pass/fail feeds into run verdicts.
///
/// Regression cases are expected to hold near-universally; capability cases
/// track a climb metric and are allowed a low pass rate. The distinction
/// never changes per-case evaluation, only report aggregation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EvalType {
    #[default]
    Regression,
    Capability,
}

impl EvalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalType::Regression => "regression",
            EvalType::Capability => "capability",
        }
    }
}

/// A closed value type for expected tool arguments. Matching rules are keyed
/// by variant: strings use case-insensitive substring search against the
/// actual value coerced to text, everything else requires exact equality.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    Str(String),
    Num(serde_json::Number),
    Bool(bool),
    Structured(Value),
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => ArgValue::Str(s),
            Value::Number(n) => ArgValue::Num(n),
            Value::Bool(b) => ArgValue::Bool(b),
            other => ArgValue::Structured(other),
        }
    }
}

impl ArgValue {
    /// Whether an observed argument value satisfies this expectation.
    /// Numbers compare exactly: an expected integer `3` is not matched by an
    /// actual `3.0`.
    pub fn matches(&self, actual: &Value) -> bool {
        match self {
            ArgValue::Str(expected) => coerce_text(actual)
                .to_lowercase()
                .contains(&expected.to_lowercase()),
            ArgValue::Num(expected) => matches!(actual, Value::Number(n) if n == expected),
            ArgValue::Bool(expected) => matches!(actual, Value::Bool(b) if b == expected),
            ArgValue::Structured(expected) => actual == expected,
        }
    }
}

/// Text rendering of an actual argument value for substring matching.
pub(crate) fn coerce_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One expectation, tagged by kind. Built once during validation; the
/// engine emits one named check per variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Assertion {
    /// Every named tool must appear at least once, order irrelevant.
    ToolsCalled(Vec<String>),
    /// The named tools must appear as an order-preserving, not necessarily
    /// contiguous subsequence of the invocations.
    ToolsOrdered(Vec<String>),
    /// None of the named tools may appear.
    ToolsForbidden(Vec<String>),
    /// Each pattern must be a case-insensitive substring of at least one
    /// `exec` command.
    CommandsContain(Vec<String>),
    /// No pattern may match any `exec` command.
    CommandsForbidden(Vec<String>),
    /// Patterns must match `exec` commands in order, by the same
    /// subsequence rule as `ToolsOrdered`.
    CommandsOrdered(Vec<String>),
    /// Each pattern must be a case-insensitive substring of the final text.
    OutputContains(Vec<String>),
    /// Per tool, per argument expectations checked against the first
    /// invocation of that tool. BTreeMaps keep iteration deterministic.
    ToolArgs(BTreeMap<String, BTreeMap<String, ArgValue>>),
}

fn default_eval_type() -> String {
    "regression".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Wire shape of one case, as it appears under the `cases` key of a case
/// file. Loose on purpose; [`CaseSpec::validate`] is the only way to obtain
/// an evaluatable [`Case`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_eval_type")]
    pub eval_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expect_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expect_tools_ordered: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expect_commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expect_commands_ordered: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expect_output_contains: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expect_tool_args: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default = "default_timeout")]
    pub timeout_s: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Default for CaseSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            message: String::new(),
            eval_type: default_eval_type(),
            expect_tools: Vec::new(),
            expect_tools_ordered: Vec::new(),
            forbidden_tools: Vec::new(),
            expect_commands: Vec::new(),
            forbidden_commands: Vec::new(),
            expect_commands_ordered: Vec::new(),
            expect_output_contains: Vec::new(),
            expect_tool_args: BTreeMap::new(),
            timeout_s: default_timeout(),
            tags: Vec::new(),
            description: String::new(),
        }
    }
}

impl CaseSpec {
    /// Validate and convert into an evaluatable case. Any failure here is a
    /// configuration error that aborts the run before evaluation.
    pub fn validate(self) -> EddResult<Case> {
        if self.id.is_empty() {
            return Err(EddError::config(format!(
                "case is missing `id` (message: {:?})",
                self.message
            )));
        }
        if self.message.is_empty() {
            return Err(EddError::config(format!(
                "case `{}` is missing `message`",
                self.id
            )));
        }
        let eval_type = match self.eval_type.as_str() {
            "regression" => EvalType::Regression,
            "capability" => EvalType::Capability,
            other => {
                return Err(EddError::config(format!(
                    "case `{}` has unknown eval_type `{other}` (expected `regression` or `capability`)",
                    self.id
                )))
            }
        };

        let mut assertions = Vec::new();
        if !self.expect_tools.is_empty() {
            assertions.push(Assertion::ToolsCalled(self.expect_tools));
        }
        if !self.expect_tools_ordered.is_empty() {
            assertions.push(Assertion::ToolsOrdered(self.expect_tools_ordered));
        }
        if !self.forbidden_tools.is_empty() {
            assertions.push(Assertion::ToolsForbidden(self.forbidden_tools));
        }
        if !self.expect_commands.is_empty() {
            assertions.push(Assertion::CommandsContain(self.expect_commands));
        }
        if !self.forbidden_commands.is_empty() {
            assertions.push(Assertion::CommandsForbidden(self.forbidden_commands));
        }
        if !self.expect_commands_ordered.is_empty() {
            assertions.push(Assertion::CommandsOrdered(self.expect_commands_ordered));
        }
        if !self.expect_output_contains.is_empty() {
            assertions.push(Assertion::OutputContains(self.expect_output_contains));
        }
        if !self.expect_tool_args.is_empty() {
            let args = self
                .expect_tool_args
                .into_iter()
                .map(|(tool, expected)| {
                    let expected = expected
                        .into_iter()
                        .map(|(key, value)| (key, ArgValue::from(value)))
                        .collect();
                    (tool, expected)
                })
                .collect();
            assertions.push(Assertion::ToolArgs(args));
        }

        Ok(Case {
            id: self.id,
            message: self.message,
            eval_type,
            timeout_s: self.timeout_s,
            tags: self.tags,
            description: self.description,
            assertions,
        })
    }
}

/// A validated, immutable case.
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub id: String,
    pub message: String,
    pub eval_type: EvalType,
    pub timeout_s: u64,
    pub tags: Vec<String>,
    pub description: String,
    assertions: Vec<Assertion>,
}

impl Case {
    /// The declared expectations, in check-emission order.
    pub fn assertions(&self) -> &[Assertion] {
        &self.assertions
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
