//! Remote tool endpoints used by the pipeline stages.
use crate::http;
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const WRITE_OBJECT_TIMEOUT: Duration = Duration::from_secs(120);
/// Remote test runs are synchronous; the call blocks until pytest finishes.
const RUN_TESTS_TIMEOUT: Duration = Duration::from_secs(1800);
const WRITE_RESULTS_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteObjectRequest {
    pub bucket: String,
    pub path: String,
    pub content_b64: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteObjectResponse {
    #[serde(default)]
    pub gs_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTestsRequest {
    pub bucket: String,
    pub tests_prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTestsResponse {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub stdout_tail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResultsRequest {
    pub bucket: String,
    pub dataset: String,
    pub run_id: String,
}

/// The storage, test-execution, and warehouse tools a pipeline run calls.
pub trait ToolHost: Send + Sync {
    fn write_object(&self, request: &WriteObjectRequest) -> Result<WriteObjectResponse>;
    fn run_tests(&self, request: &RunTestsRequest) -> Result<RunTestsResponse>;
    fn write_results(&self, request: &WriteResultsRequest) -> Result<()>;
}

/// Tool host reached over HTTP at `<base>/tools/<name>`.
pub struct HttpToolHost {
    base_url: String,
}

impl HttpToolHost {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn call<Req: Serialize, Resp: DeserializeOwned + Default>(
        &self,
        tool: &str,
        body: &Req,
        timeout: Duration,
        expect_body: bool,
    ) -> Result<Resp> {
        let url = format!("{}/tools/{tool}", self.base_url);
        tracing::info!(%url, timeout_secs = timeout.as_secs(), "calling tool");
        let mut response = http::agent(timeout)
            .post(url.as_str())
            .send_json(body)
            .with_context(|| format!("POST {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.body_mut().read_to_string().unwrap_or_default();
            return Err(anyhow!(
                "{tool} failed with status {}: {}",
                status.as_u16(),
                text.trim()
            ));
        }
        if !expect_body {
            return Ok(Resp::default());
        }
        response
            .body_mut()
            .read_json()
            .with_context(|| format!("decode {tool} response"))
    }
}

impl ToolHost for HttpToolHost {
    fn write_object(&self, request: &WriteObjectRequest) -> Result<WriteObjectResponse> {
        self.call("gcs.write", request, WRITE_OBJECT_TIMEOUT, true)
    }

    fn run_tests(&self, request: &RunTestsRequest) -> Result<RunTestsResponse> {
        self.call("pytest.run", request, RUN_TESTS_TIMEOUT, true)
    }

    fn write_results(&self, request: &WriteResultsRequest) -> Result<()> {
        self.call::<_, ()>("bq.write_results", request, WRITE_RESULTS_TIMEOUT, false)
    }
}
