//! Prompt templates.
//!
//! Templates live under `prompts/` and are compiled in; placeholders use
//! `{name}` and are filled in a single pass, so inserted text is never
//! scanned for further placeholders.
use crate::lm::{Prompt, PromptKind};
use serde_json::Value;

const CLASSIFY: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/classify.md"));
const NORMALIZE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/normalize.md"));
const TEST_CASES: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/test_cases.md"));
const ISO_AUDIT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/iso_audit.md"));
const TEST_FILE_SYSTEM: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/test_file_system.md"
));
const TEST_FILE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/test_file.md"));

/// Prompt used by `/tools/genai.generate_test` when the caller sends none.
pub const DEFAULT_TEST_PROMPT: &str = "Generate a pytest for insulin pump 1 unit/hour basal rate.";

pub fn classify(input: &str) -> Prompt {
    Prompt::new(PromptKind::Classify, fill(CLASSIFY, &[("input", input)]))
}

pub fn normalize(requirement: &str) -> Prompt {
    Prompt::new(
        PromptKind::Normalize,
        fill(NORMALIZE, &[("requirement", requirement)]),
    )
}

pub fn test_cases(requirement: &str) -> Prompt {
    Prompt::new(
        PromptKind::TestCases,
        fill(TEST_CASES, &[("requirement", requirement)]),
    )
}

/// Audit prompt embedding the extracted records as pretty JSON.
pub fn iso_audit(requirement: &Value, test_cases: &Value) -> Prompt {
    let requirement_json = pretty(requirement);
    let test_cases_json = pretty(test_cases);
    let text = fill(
        ISO_AUDIT,
        &[
            ("requirement_json", requirement_json.as_str()),
            ("test_cases_json", test_cases_json.as_str()),
        ],
    );
    Prompt::new(PromptKind::IsoAudit, text)
}

pub fn general(input: &str) -> Prompt {
    Prompt::new(PromptKind::General, input)
}

/// System policy plus the test-file template, sent as one user turn.
pub fn test_file(requirement: &str) -> Prompt {
    let user = fill(TEST_FILE, &[("requirement", requirement)]);
    Prompt::new(
        PromptKind::TestFile,
        format!("{}\n\n{}", TEST_FILE_SYSTEM.trim_end(), user),
    )
}

fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let hit = values.iter().find(|(name, _)| {
            tail.strip_prefix(*name)
                .is_some_and(|after| after.starts_with('}'))
        });
        match hit {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
