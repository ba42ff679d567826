//! Append-only row inserts into analytics tables.
//!
//! Inserts never fail structurally: transport and schema problems come back
//! as entries in the returned error list, and an empty list means success.
use crate::config::Credential;
use crate::http;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

pub const TRACE_TABLE: &str = "trace";
pub const ISO_VALIDATION_TABLE: &str = "iso_validation";

const INSERT_TIMEOUT: Duration = Duration::from_secs(60);
const BIGQUERY_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";

pub trait Warehouse: Send + Sync {
    /// Insert flat rows; returns per-row errors reported by the service.
    fn try_insert(&self, dataset: &str, table: &str, rows: &[Value]) -> Result<Vec<Value>>;

    /// Insert rows, folding any failure into the returned error list.
    fn insert_rows(&self, dataset: &str, table: &str, rows: &[Value]) -> Vec<Value> {
        match self.try_insert(dataset, table, rows) {
            Ok(errors) => {
                if errors.is_empty() {
                    tracing::info!(dataset, table, rows = rows.len(), "warehouse insert");
                } else {
                    tracing::warn!(dataset, table, errors = errors.len(), "warehouse rejected rows");
                }
                errors
            }
            Err(err) => {
                tracing::error!(dataset, table, error = %err, "warehouse insert error");
                vec![json!({ "error": format!("{err:#}") })]
            }
        }
    }
}

/// Serialize typed rows for insertion.
pub fn to_rows<T: Serialize>(items: &[T]) -> Result<Vec<Value>> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).context("serialize warehouse row"))
        .collect()
}

/// Result of a warehouse write as reported to API clients.
#[derive(Debug, Clone, PartialEq)]
pub enum WarehouseStatus {
    Success,
    Failed(Vec<Value>),
}

impl WarehouseStatus {
    pub fn from_errors(errors: Vec<Value>) -> Self {
        if errors.is_empty() {
            Self::Success
        } else {
            Self::Failed(errors)
        }
    }
}

impl Serialize for WarehouseStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success => serializer.serialize_str("success"),
            Self::Failed(errors) => json!({ "errors": errors }).serialize(serializer),
        }
    }
}

/// Streaming inserts into the cloud analytics warehouse.
pub struct BigQueryWarehouse {
    agent: ureq::Agent,
    project_id: String,
    credential: Credential,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<Value>,
}

impl BigQueryWarehouse {
    pub fn new(project_id: String, credential: Credential) -> Self {
        Self {
            agent: http::agent(INSERT_TIMEOUT),
            project_id,
            credential,
        }
    }
}

impl Warehouse for BigQueryWarehouse {
    fn try_insert(&self, dataset: &str, table: &str, rows: &[Value]) -> Result<Vec<Value>> {
        let url = format!(
            "{BIGQUERY_BASE}/projects/{}/datasets/{dataset}/tables/{table}/insertAll",
            self.project_id
        );
        let body = json!({
            "rows": rows.iter().map(|row| json!({ "json": row })).collect::<Vec<_>>(),
        });
        let request = http::authorize(self.agent.post(url.as_str()), &self.credential);
        let mut response = request
            .send_json(&body)
            .with_context(|| format!("insert into {}.{dataset}.{table}", self.project_id))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.body_mut().read_to_string().unwrap_or_default();
            return Err(anyhow!(
                "insert into {}.{dataset}.{table} failed with status {}: {}",
                self.project_id,
                status.as_u16(),
                text.trim()
            ));
        }
        let parsed: InsertAllResponse = response
            .body_mut()
            .read_json()
            .context("decode insertAll response")?;
        Ok(parsed.insert_errors)
    }
}

/// One JSONL file per table under `<root>/<dataset>/<table>.jsonl`.
pub struct LocalWarehouse {
    root: PathBuf,
    lock: Mutex<()>,
}

impl LocalWarehouse {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            lock: Mutex::new(()),
        }
    }

    pub fn table_path(&self, dataset: &str, table: &str) -> PathBuf {
        self.root.join(dataset).join(format!("{table}.jsonl"))
    }
}

impl Warehouse for LocalWarehouse {
    fn try_insert(&self, dataset: &str, table: &str, rows: &[Value]) -> Result<Vec<Value>> {
        let mut errors = Vec::new();
        let mut lines = String::new();
        for (index, row) in rows.iter().enumerate() {
            if row.is_object() {
                lines.push_str(&serde_json::to_string(row).context("serialize row")?);
                lines.push('\n');
            } else {
                errors.push(json!({ "index": index, "errors": [{ "reason": "invalid", "message": "row is not a JSON object" }] }));
            }
        }
        if !errors.is_empty() {
            return Ok(errors);
        }

        let path = self.table_path(dataset, table);
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(lines.as_bytes())
            .with_context(|| format!("append {}", path.display()))?;
        Ok(Vec::new())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryWarehouse;
    use super::*;

    #[test]
    fn transport_failure_becomes_single_error_entry() {
        let warehouse = MemoryWarehouse {
            fail_with: Some("connection refused".into()),
            ..MemoryWarehouse::default()
        };
        let errors = warehouse.insert_rows("qa_metrics", TRACE_TABLE, &[json!({"req_id": "R1"})]);
        assert_eq!(errors, vec![json!({"error": "connection refused"})]);
    }

    #[test]
    fn local_warehouse_appends_one_line_per_row() {
        let root = tempfile::tempdir().unwrap();
        let warehouse = LocalWarehouse::new(root.path().to_path_buf());
        let rows = vec![json!({"req_id": "R1"}), json!({"req_id": "R2"})];
        assert!(warehouse.insert_rows("qa_metrics", TRACE_TABLE, &rows).is_empty());
        assert!(warehouse.insert_rows("qa_metrics", TRACE_TABLE, &rows[..1]).is_empty());
        let text = fs::read_to_string(warehouse.table_path("qa_metrics", TRACE_TABLE)).unwrap();
        let ids: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).unwrap()["req_id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("R1"), json!("R2"), json!("R1")]);
    }

    #[test]
    fn local_warehouse_rejects_non_object_rows() {
        let root = tempfile::tempdir().unwrap();
        let warehouse = LocalWarehouse::new(root.path().to_path_buf());
        let errors = warehouse.insert_rows("qa_metrics", TRACE_TABLE, &[json!({"a": 1}), json!(3)]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["index"], json!(1));
        assert!(!warehouse.table_path("qa_metrics", TRACE_TABLE).exists());
    }

    #[test]
    fn status_serializes_like_the_api() {
        assert_eq!(serde_json::to_value(WarehouseStatus::Success).unwrap(), json!("success"));
        let failed = WarehouseStatus::from_errors(vec![json!({"error": "boom"})]);
        assert_eq!(
            serde_json::to_value(failed).unwrap(),
            json!({"errors": [{"error": "boom"}]})
        );
    }

    #[test]
    fn insert_all_errors_decode() {
        let parsed: InsertAllResponse = serde_json::from_value(json!({
            "kind": "bigquery#tableDataInsertAllResponse",
            "insertErrors": [{"index": 0, "errors": [{"reason": "invalid"}]}]
        }))
        .unwrap();
        assert_eq!(parsed.insert_errors.len(), 1);
        let empty: InsertAllResponse =
            serde_json::from_value(json!({"kind": "bigquery#tableDataInsertAllResponse"})).unwrap();
        assert!(empty.insert_errors.is_empty());
    }
}
