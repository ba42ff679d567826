//! Records produced from model output.
//!
//! Model output is untrusted: ids arrive as numbers, lists as single strings,
//! booleans as `"true"`. Every record is read leniently from a JSON value and
//! absent fields stay absent rather than failing the read.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version tag written with every trace row.
pub const TRACE_VERSION: &str = "v1";
/// Storage prefix for generated test files.
pub const TESTCASE_PREFIX: &str = "outputs/testcases/";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub req_id: Option<String>,
    pub description: Option<String>,
    pub hazard: Option<String>,
    pub invariant: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl Requirement {
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        Self {
            req_id: text_field(obj, "req_id"),
            description: text_field(obj, "description"),
            hazard: text_field(obj, "hazard"),
            invariant: text_field(obj, "invariant"),
            acceptance_criteria: list_field(obj, "acceptance_criteria"),
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub test_case_id: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub preconditions: Vec<String>,
    pub expected_result: Option<String>,
}

impl TestCase {
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        Self {
            test_case_id: text_field(obj, "test_case_id"),
            title: text_field(obj, "title"),
            steps: list_field(obj, "steps"),
            preconditions: list_field(obj, "preconditions"),
            expected_result: text_field(obj, "expected_result"),
        }
    }

    /// Test cases from model output.
    ///
    /// Accepts a bare sequence, a single mapping, or a mapping wrapping the
    /// sequence under `test_cases`.
    pub fn list_from_value(value: &Value) -> Vec<Self> {
        match value {
            Value::Array(items) => items.iter().map(Self::from_value).collect(),
            Value::Object(obj) => match obj.get("test_cases") {
                Some(Value::Array(items)) => items.iter().map(Self::from_value).collect(),
                _ if obj.is_empty() => Vec::new(),
                _ => vec![Self::from_value(value)],
            },
            _ => Vec::new(),
        }
    }
}

/// One audit verdict for a requirement/test-case pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFinding {
    pub req_id: Option<String>,
    pub test_case_id: Option<String>,
    pub compliant: Option<bool>,
    pub missing_elements: Option<String>,
    pub related_iso_refs: Option<String>,
    pub suggestions: Option<String>,
    pub validated_at: String,
}

impl ComplianceFinding {
    /// Read a finding, inheriting `req_id` from the requirement when absent.
    pub fn from_value(value: &Value, fallback_req_id: Option<&str>, at: DateTime<Utc>) -> Self {
        let empty = Map::new();
        let obj = value.as_object().unwrap_or(&empty);
        Self {
            req_id: text_field(obj, "req_id").or_else(|| fallback_req_id.map(str::to_string)),
            test_case_id: text_field(obj, "test_case_id"),
            compliant: bool_field(obj, "compliant"),
            missing_elements: text_field(obj, "missing_elements"),
            related_iso_refs: text_field(obj, "related_iso_refs"),
            suggestions: text_field(obj, "suggestions"),
            validated_at: at.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }

    /// Audit output as a sequence of findings.
    ///
    /// A single mapping becomes a one-element sequence; a sequence keeps its
    /// cardinality. Anything else (including the empty mapping left by a
    /// failed extraction) yields no findings.
    pub fn normalize(value: &Value, fallback_req_id: Option<&str>, at: DateTime<Utc>) -> Vec<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| Self::from_value(item, fallback_req_id, at))
                .collect(),
            Value::Object(obj) if !obj.is_empty() => {
                vec![Self::from_value(value, fallback_req_id, at)]
            }
            _ => Vec::new(),
        }
    }
}

/// Warehouse row linking a requirement to its design and hazard metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRow {
    pub req_id: Option<String>,
    pub design_ref: Option<String>,
    pub code_symbol: Option<String>,
    pub test_name: Option<String>,
    pub artifact_hash: String,
    pub version: String,
}

impl From<&Requirement> for TraceRow {
    fn from(req: &Requirement) -> Self {
        Self {
            req_id: req.req_id.clone(),
            design_ref: req.invariant.clone(),
            code_symbol: req.hazard.clone(),
            test_name: req.description.clone(),
            artifact_hash: req.acceptance_criteria.join("; "),
            version: TRACE_VERSION.to_string(),
        }
    }
}

/// Object path of a generated test file.
pub fn testcase_path(file_name: &str) -> String {
    format!("{TESTCASE_PREFIX}{file_name}")
}

/// A generated text blob bound for object storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub content: String,
}

impl Artifact {
    pub fn test_file(file_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }

    pub fn content_b64(&self) -> String {
        STANDARD.encode(self.content.as_bytes())
    }
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(scalar_text)
                .collect::<Vec<_>>()
                .join("; "),
        ),
        other => scalar_text(other).or_else(|| Some(other.to_string())),
    }
}

fn list_field(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    match obj.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| scalar_text(item).or_else(|| (!item.is_null()).then(|| item.to_string())))
            .collect(),
        Some(Value::String(text)) if !text.trim().is_empty() => vec![text.clone()],
        _ => Vec::new(),
    }
}

fn bool_field(obj: &Map<String, Value>, key: &str) -> Option<bool> {
    match obj.get(key)? {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(num) => Some(num.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
