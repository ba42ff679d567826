//! Requirement normalization pipeline.
//!
//! Three generations run in a fixed order (normalize, test cases, audit) and
//! every one runs even when an earlier step produced nothing usable. The
//! record always carries all three slots; steps whose output could not be
//! parsed are listed under `anomalies` instead of vanishing silently.
use crate::config::QA_DATASET;
use crate::extract::{extract_structured, Extracted};
use crate::lm::{PromptKind, TextGenerator};
use crate::model::{ComplianceFinding, Requirement, TestCase, TraceRow};
use crate::prompts;
use crate::util::truncate_string;
use crate::warehouse::{to_rows, Warehouse, WarehouseStatus, ISO_VALIDATION_TABLE, TRACE_TABLE};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

const ANOMALY_PREVIEW_BYTES: usize = 2000;

/// Composite result of one normalization run.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizationRecord {
    pub requirement: Value,
    pub test_cases: Value,
    pub iso_validation: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bq_trace: Option<WarehouseStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bq_iso_validation: Option<WarehouseStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub anomalies: Vec<Anomaly>,
}

/// A step whose completion held no structured data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    pub step: PromptKind,
    pub raw_text: String,
}

pub struct RequirementNormalizer<'a> {
    generator: &'a dyn TextGenerator,
    warehouse: Option<&'a dyn Warehouse>,
}

impl<'a> RequirementNormalizer<'a> {
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self {
            generator,
            warehouse: None,
        }
    }

    /// Record trace rows and compliance findings after each run.
    pub fn with_warehouse(mut self, warehouse: &'a dyn Warehouse) -> Self {
        self.warehouse = Some(warehouse);
        self
    }

    pub fn run(&self, requirement_text: &str) -> NormalizationRecord {
        tracing::info!(bytes = requirement_text.len(), "normalizing requirement");
        let mut anomalies = Vec::new();

        let requirement = self.step(prompts::normalize(requirement_text), &mut anomalies);
        let test_cases = self.step(prompts::test_cases(requirement_text), &mut anomalies);
        let iso_validation = self.step(prompts::iso_audit(&requirement, &test_cases), &mut anomalies);

        tracing::info!(
            req_id = Requirement::from_value(&requirement).req_id.as_deref().unwrap_or("-"),
            test_cases = TestCase::list_from_value(&test_cases).len(),
            anomalies = anomalies.len(),
            "normalization complete"
        );

        let mut record = NormalizationRecord {
            requirement,
            test_cases,
            iso_validation,
            bq_trace: None,
            bq_iso_validation: None,
            anomalies,
        };
        if let Some(warehouse) = self.warehouse {
            record_to_warehouse(warehouse, &mut record);
        }
        record
    }

    fn step(&self, prompt: crate::lm::Prompt, anomalies: &mut Vec<Anomaly>) -> Value {
        let completion = self.generator.complete(&prompt);
        let extracted = extract_structured(&completion);
        if let Extracted::Unparsed(raw) = &extracted {
            tracing::warn!(step = %prompt.kind, bytes = raw.len(), "completion held no structured data");
            anomalies.push(Anomaly {
                step: prompt.kind,
                raw_text: truncate_string(raw, ANOMALY_PREVIEW_BYTES),
            });
        }
        extracted.into_value()
    }
}

/// Write the trace row and normalized findings; failures land in the record.
fn record_to_warehouse(warehouse: &dyn Warehouse, record: &mut NormalizationRecord) {
    let requirement = Requirement::from_value(&record.requirement);

    let trace_rows = row_values(&[TraceRow::from(&requirement)]);
    record.bq_trace = Some(WarehouseStatus::from_errors(
        warehouse.insert_rows(QA_DATASET, TRACE_TABLE, &trace_rows),
    ));

    let findings = ComplianceFinding::normalize(
        &record.iso_validation,
        requirement.req_id.as_deref(),
        Utc::now(),
    );
    if findings.is_empty() {
        return;
    }
    let finding_rows = row_values(&findings);
    record.bq_iso_validation = Some(WarehouseStatus::from_errors(warehouse.insert_rows(
        QA_DATASET,
        ISO_VALIDATION_TABLE,
        &finding_rows,
    )));
}

fn row_values<T: Serialize>(items: &[T]) -> Vec<Value> {
    to_rows(items).unwrap_or_else(|err| vec![json!({ "error": format!("{err:#}") })])
}
