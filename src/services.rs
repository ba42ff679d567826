//! Backend wiring.
//!
//! Picks the generator, object store, and warehouse for a [`Config`]:
//! a local LM command overrides the hosted model, and a local root swaps
//! cloud storage and the warehouse for directories on disk.
use crate::config::Config;
use crate::lm::{CommandGenerator, GeminiClient, LmInvocationLog, LoggedGenerator, TextGenerator};
use crate::storage::{GcsStore, LocalStore, ObjectStore};
use crate::warehouse::{BigQueryWarehouse, LocalWarehouse, Warehouse};
use anyhow::Result;

const LOCAL_STORAGE_DIR: &str = "storage";
const LOCAL_WAREHOUSE_DIR: &str = "warehouse";

pub struct Services {
    pub generator: Box<dyn TextGenerator>,
    pub store: Box<dyn ObjectStore>,
    pub warehouse: Box<dyn Warehouse>,
    pub bucket: String,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            generator: build_generator(config)?,
            store: build_store(config),
            warehouse: build_warehouse(config),
            bucket: config.bucket_or_default().to_string(),
        })
    }
}

fn build_generator(config: &Config) -> Result<Box<dyn TextGenerator>> {
    let base: Box<dyn TextGenerator> = match &config.lm_command {
        Some(command) => {
            tracing::info!(%command, "using local LM command");
            Box::new(CommandGenerator::parse(command)?)
        }
        None => {
            let client = GeminiClient::from_config(config);
            tracing::info!(
                model = %config.model.name,
                endpoint = client.endpoint(),
                "using hosted model"
            );
            Box::new(client)
        }
    };
    Ok(match &config.lm_log {
        Some(path) => Box::new(LoggedGenerator::new(base, LmInvocationLog::new(path.clone()))),
        None => base,
    })
}

fn build_store(config: &Config) -> Box<dyn ObjectStore> {
    match &config.local_root {
        Some(root) => Box::new(LocalStore::new(root.join(LOCAL_STORAGE_DIR))),
        None => Box::new(GcsStore::new(config.service_credential())),
    }
}

fn build_warehouse(config: &Config) -> Box<dyn Warehouse> {
    match &config.local_root {
        Some(root) => Box::new(LocalWarehouse::new(root.join(LOCAL_WAREHOUSE_DIR))),
        None => Box::new(BigQueryWarehouse::new(
            config.project_id.clone(),
            config.service_credential(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QA_DATASET;
    use crate::lm::{Prompt, PromptKind};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn local_root_and_command_stay_offline() {
        let root = tempfile::tempdir().unwrap();
        let log = root.path().join("lm_log.jsonl");
        let vars: BTreeMap<String, String> = [
            ("MEDREQ_LM_COMMAND", "cat".to_string()),
            ("MEDREQ_LOCAL_ROOT", root.path().display().to_string()),
            ("MEDREQ_LM_LOG", log.display().to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let config = Config::from_map(&vars).unwrap();
        let services = Services::from_config(&config).unwrap();

        let echoed = services
            .generator
            .generate(&Prompt::new(PromptKind::General, "ping"))
            .unwrap();
        assert_eq!(echoed, "ping");
        assert!(log.is_file());

        let location = services
            .store
            .put(&services.bucket, "uploads/a.txt", b"a")
            .unwrap();
        assert!(location.starts_with("file://"));
        assert!(root.path().join("storage").join(&services.bucket).join("uploads/a.txt").is_file());

        assert!(services
            .warehouse
            .insert_rows(QA_DATASET, "trace", &[json!({"req_id": "R1"})])
            .is_empty());
        assert!(root.path().join("warehouse/qa_metrics/trace.jsonl").is_file());
    }
}
