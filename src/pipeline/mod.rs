//! Test-generation workflow.
//!
//! Four stages run in a fixed line: generate a pytest file, store it, run the
//! remote test suite, then record the run in the warehouse. Each stage adds
//! fields to a shared [`PipelineState`] and the next stage requires them.
//! There are no conditional or retry edges: the first failing stage ends the
//! run and later fields stay unset.
mod tools;

pub use tools::{HttpToolHost, RunTestsRequest, ToolHost, WriteObjectRequest, WriteResultsRequest};

use crate::config::QA_DATASET;
use crate::extract::fenced_body;
use crate::lm::TextGenerator;
use crate::model::{testcase_path, Artifact, TESTCASE_PREFIX};
use crate::prompts;
use crate::util::tail_string;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;

const SUMMARY_TAIL_BYTES: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generate,
    StoreArtifact,
    RunRemoteTests,
    WriteWarehouse,
}

impl Stage {
    pub const FIRST: Stage = Stage::Generate;

    pub fn next(self) -> Option<Stage> {
        match self {
            Self::Generate => Some(Self::StoreArtifact),
            Self::StoreArtifact => Some(Self::RunRemoteTests),
            Self::RunRemoteTests => Some(Self::WriteWarehouse),
            Self::WriteWarehouse => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Generate => "gen_test",
            Self::StoreArtifact => "write_gcs",
            Self::RunRemoteTests => "run_pytest",
            Self::WriteWarehouse => "write_bq",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineState {
    pub req_text: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_code_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gs_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Stages that finished, in order.
    pub completed: Vec<Stage>,
}

impl PipelineState {
    pub fn new(req_text: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            req_text: req_text.into(),
            file_name: file_name.into(),
            ..Self::default()
        }
    }
}

fn require<'s>(field: &'s Option<String>, name: &str) -> Result<&'s str> {
    field
        .as_deref()
        .ok_or_else(|| anyhow!("pipeline state is missing {name}"))
}

pub struct PipelineDriver<'a> {
    generator: &'a dyn TextGenerator,
    tools: &'a dyn ToolHost,
    bucket: String,
}

impl<'a> PipelineDriver<'a> {
    pub fn new(generator: &'a dyn TextGenerator, tools: &'a dyn ToolHost, bucket: impl Into<String>) -> Self {
        Self {
            generator,
            tools,
            bucket: bucket.into(),
        }
    }

    /// Run every stage in order, stopping at the first failure.
    ///
    /// `state` keeps whatever the finished stages wrote, also on error.
    pub fn run(&self, state: &mut PipelineState) -> Result<()> {
        let mut stage = Some(Stage::FIRST);
        while let Some(current) = stage {
            tracing::info!(stage = %current, "pipeline stage start");
            self.run_stage(current, state)
                .with_context(|| format!("stage {current}"))?;
            state.completed.push(current);
            stage = current.next();
        }
        Ok(())
    }

    fn run_stage(&self, stage: Stage, state: &mut PipelineState) -> Result<()> {
        match stage {
            Stage::Generate => self.generate(state),
            Stage::StoreArtifact => self.store_artifact(state),
            Stage::RunRemoteTests => self.run_remote_tests(state),
            Stage::WriteWarehouse => self.write_warehouse(state),
        }
    }

    fn generate(&self, state: &mut PipelineState) -> Result<()> {
        let text = self.generator.generate(&prompts::test_file(&state.req_text))?;
        if text.trim().is_empty() {
            return Err(anyhow!("empty completion from model"));
        }
        let code = match fenced_body(&text) {
            Some(body) => format!("{}\n", body.trim()),
            None => text,
        };
        let artifact = Artifact::test_file(state.file_name.clone(), code);
        tracing::info!(file = %artifact.file_name, bytes = artifact.content.len(), "generated test file");
        state.test_code_b64 = Some(artifact.content_b64());
        Ok(())
    }

    fn store_artifact(&self, state: &mut PipelineState) -> Result<()> {
        let content_b64 = require(&state.test_code_b64, "test_code_b64")?;
        let request = WriteObjectRequest {
            bucket: self.bucket.clone(),
            path: testcase_path(&state.file_name),
            content_b64: content_b64.to_string(),
        };
        let response = self.tools.write_object(&request)?;
        state.gs_uri = Some(response.gs_uri);
        Ok(())
    }

    fn run_remote_tests(&self, state: &mut PipelineState) -> Result<()> {
        require(&state.gs_uri, "gs_uri")?;
        let response = self.tools.run_tests(&RunTestsRequest {
            bucket: self.bucket.clone(),
            tests_prefix: TESTCASE_PREFIX.to_string(),
        })?;
        let exit = response
            .exit_code
            .map_or_else(|| "none".to_string(), |code| code.to_string());
        state.summary = Some(format!(
            "run_id={} exit={exit} tests_stdout_tail={}",
            response.run_id,
            tail_string(&response.stdout_tail, SUMMARY_TAIL_BYTES)
        ));
        state.exit_code = response.exit_code;
        state.run_id = Some(response.run_id);
        Ok(())
    }

    fn write_warehouse(&self, state: &mut PipelineState) -> Result<()> {
        let run_id = require(&state.run_id, "run_id")?;
        self.tools.write_results(&WriteResultsRequest {
            bucket: self.bucket.clone(),
            dataset: QA_DATASET.to_string(),
            run_id: run_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::tools::{RunTestsResponse, WriteObjectResponse};
    use super::*;
    use crate::lm::testing::ScriptedGenerator;
    use crate::lm::PromptKind;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTools {
        calls: Mutex<Vec<String>>,
        written: Mutex<Option<WriteObjectRequest>>,
        fail_run: bool,
    }

    impl ToolHost for RecordingTools {
        fn write_object(&self, request: &WriteObjectRequest) -> Result<WriteObjectResponse> {
            self.calls.lock().unwrap().push("gcs.write".into());
            *self.written.lock().unwrap() = Some(request.clone());
            Ok(WriteObjectResponse {
                gs_uri: format!("gs://{}/{}", request.bucket, request.path),
            })
        }

        fn run_tests(&self, request: &RunTestsRequest) -> Result<RunTestsResponse> {
            self.calls.lock().unwrap().push("pytest.run".into());
            assert_eq!(request.tests_prefix, "outputs/testcases/");
            if self.fail_run {
                return Err(anyhow!("pytest.run failed with status 500: worker crashed"));
            }
            Ok(RunTestsResponse {
                run_id: "run-42".into(),
                exit_code: Some(0),
                stdout_tail: format!("{}3 passed in 0.02s", "x".repeat(200)),
            })
        }

        fn write_results(&self, request: &WriteResultsRequest) -> Result<()> {
            self.calls.lock().unwrap().push("bq.write_results".into());
            assert_eq!(request.dataset, "qa_metrics");
            assert_eq!(request.run_id, "run-42");
            Ok(())
        }
    }

    fn generator() -> ScriptedGenerator {
        ScriptedGenerator::new().reply(
            PromptKind::TestFile,
            "```python\ndef test_no_autonomous_bolus():\n    assert True\n```\nThis test checks...",
        )
    }

    #[test]
    fn linear_run_fills_every_field() {
        let generator = generator();
        let tools = RecordingTools::default();
        let driver = PipelineDriver::new(&generator, &tools, "assets");
        let mut state = PipelineState::new("REQ-006 low glucose alarm", "test_ip_req_006.py");
        driver.run(&mut state).unwrap();

        assert_eq!(
            state.completed,
            vec![
                Stage::Generate,
                Stage::StoreArtifact,
                Stage::RunRemoteTests,
                Stage::WriteWarehouse
            ]
        );
        assert_eq!(
            *tools.calls.lock().unwrap(),
            vec!["gcs.write", "pytest.run", "bq.write_results"]
        );
        assert_eq!(
            state.gs_uri.as_deref(),
            Some("gs://assets/outputs/testcases/test_ip_req_006.py")
        );
        let summary = state.summary.unwrap();
        assert!(summary.starts_with("run_id=run-42 exit=0 tests_stdout_tail="));
        assert!(summary.ends_with("3 passed in 0.02s"));
        assert_eq!(summary.len(), "run_id=run-42 exit=0 tests_stdout_tail=".len() + 120);
    }

    #[test]
    fn generated_code_is_unfenced_before_storage() {
        let generator = generator();
        let tools = RecordingTools::default();
        let mut state = PipelineState::new("req", "test_a.py");
        PipelineDriver::new(&generator, &tools, "assets")
            .run(&mut state)
            .unwrap();
        let written = tools.written.lock().unwrap().clone().unwrap();
        let code = String::from_utf8(STANDARD.decode(written.content_b64).unwrap()).unwrap();
        assert_eq!(code, "def test_no_autonomous_bolus():\n    assert True\n");
        let prompt = generator.prompt_for(PromptKind::TestFile).unwrap();
        assert!(prompt.contains("Never propose or permit autonomous bolus."));
    }

    #[test]
    fn failed_test_run_stops_before_warehouse() {
        let generator = generator();
        let tools = RecordingTools {
            fail_run: true,
            ..RecordingTools::default()
        };
        let mut state = PipelineState::new("req", "test_a.py");
        let err = PipelineDriver::new(&generator, &tools, "assets")
            .run(&mut state)
            .unwrap_err();

        assert!(format!("{err:#}").contains("stage run_pytest"));
        assert!(state.gs_uri.is_some());
        assert!(state.run_id.is_none());
        assert_eq!(state.completed, vec![Stage::Generate, Stage::StoreArtifact]);
        assert_eq!(*tools.calls.lock().unwrap(), vec!["gcs.write", "pytest.run"]);
    }

    #[test]
    fn empty_or_failed_generation_aborts_first_stage() {
        let tools = RecordingTools::default();
        let empty = ScriptedGenerator::new().reply(PromptKind::TestFile, "   ");
        let mut state = PipelineState::new("req", "test_a.py");
        assert!(PipelineDriver::new(&empty, &tools, "b").run(&mut state).is_err());

        let failed = ScriptedGenerator::new().fail(PromptKind::TestFile, "403 forbidden");
        let mut state = PipelineState::new("req", "test_a.py");
        let err = PipelineDriver::new(&failed, &tools, "b").run(&mut state).unwrap_err();
        assert!(format!("{err:#}").contains("403 forbidden"));
        assert!(state.test_code_b64.is_none());
        assert!(tools.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn stages_form_a_single_line() {
        let mut seen = vec![Stage::FIRST];
        while let Some(next) = seen.last().and_then(|stage| stage.next()) {
            seen.push(next);
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(seen.last(), Some(&Stage::WriteWarehouse));
    }
}
