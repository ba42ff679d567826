//! Endpoint dispatch, independent of the HTTP listener.
use super::multipart;
use crate::lm::TextGenerator;
use crate::prompts;
use crate::router::RequestRouter;
use crate::services::Services;
use crate::storage::{upload_bytes, upload_file};
use crate::util::sanitize_filename;
use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

const UPLOAD_PREFIX: &str = "uploads";
const UPLOAD_FIELD: &str = "files";

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PromptBody {
    #[serde(default)]
    prompt: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WriteObjectBody {
    #[serde(default)]
    bucket: Option<String>,
    path: String,
    content_b64: String,
}

pub struct App {
    services: Services,
}

impl App {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    fn generator(&self) -> &dyn TextGenerator {
        self.services.generator.as_ref()
    }

    fn router(&self) -> RequestRouter<'_> {
        RequestRouter::new(self.generator(), Some(self.services.warehouse.as_ref()))
    }

    pub fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let path = request.path.split('?').next().unwrap_or_default();
        let method = request.method.to_ascii_uppercase();
        match (method.as_str(), path) {
            ("OPTIONS", _) => ApiResponse::ok(json!({ "status": "ok" })),
            ("GET", "/healthz") => ApiResponse::ok(json!({ "status": "ok" })),
            ("GET", "/sample-data") => {
                ApiResponse::ok(json!({ "status": "ok", "message": "Sample data endpoint" }))
            }
            ("POST", "/chat") => self.chat(request),
            ("POST", "/tools/normalize_requirement") => self.normalize_requirement(request),
            ("POST", "/tools/genai.generate_test") => self.generate_test(request),
            ("POST", "/tools/gcs.write") => self.write_object(request),
            ("POST", "/upload-docs") => self.upload_docs(request),
            (_, "/healthz" | "/sample-data" | "/chat" | "/tools/normalize_requirement"
            | "/tools/genai.generate_test" | "/tools/gcs.write" | "/upload-docs") => {
                ApiResponse::error(405, "method not allowed")
            }
            _ => ApiResponse::error(404, "not found"),
        }
    }

    fn chat(&self, request: &ApiRequest) -> ApiResponse {
        let Some(prompt) = required_prompt(request) else {
            tracing::warn!("/chat called with no prompt");
            return ApiResponse::error(400, "prompt required");
        };
        tracing::info!(bytes = prompt.len(), "/chat received prompt");
        let reply = self.router().route(&prompt);
        tracing::info!(intent = ?reply.intent(), "/chat answered");
        to_response(&reply)
    }

    fn normalize_requirement(&self, request: &ApiRequest) -> ApiResponse {
        let Some(prompt) = required_prompt(request) else {
            return ApiResponse::error(400, "prompt required");
        };
        to_response(&self.router().normalizer().run(&prompt))
    }

    fn generate_test(&self, request: &ApiRequest) -> ApiResponse {
        let prompt = required_prompt(request).unwrap_or_else(|| prompts::DEFAULT_TEST_PROMPT.to_string());
        let text = self.generator().complete(&prompts::general(&prompt));
        ApiResponse::ok(json!({ "text": text }))
    }

    fn write_object(&self, request: &ApiRequest) -> ApiResponse {
        let body: WriteObjectBody = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(err) => return ApiResponse::error(400, format!("invalid request: {err}")),
        };
        let bytes = match STANDARD.decode(body.content_b64.trim()) {
            Ok(bytes) => bytes,
            Err(err) => return ApiResponse::error(400, format!("content_b64 is not base64: {err}")),
        };
        let bucket = body.bucket.unwrap_or_else(|| self.services.bucket.clone());
        match upload_bytes(self.services.store.as_ref(), &bucket, &body.path, &bytes) {
            Ok(location) => ApiResponse::ok(json!({ "gs_uri": location })),
            Err(err) => internal_error(&err),
        }
    }

    fn upload_docs(&self, request: &ApiRequest) -> ApiResponse {
        let Some(boundary) = request.content_type.as_deref().and_then(multipart::boundary) else {
            return ApiResponse::error(400, "No files uploaded");
        };
        let parts = match multipart::parse(&request.body, &boundary) {
            Ok(parts) => parts,
            Err(err) => return ApiResponse::error(400, format!("invalid multipart body: {err}")),
        };
        let files: Vec<_> = parts
            .into_iter()
            .filter(|part| part.name == UPLOAD_FIELD && part.filename.is_some())
            .collect();
        if files.is_empty() {
            return ApiResponse::error(400, "No files uploaded");
        }

        match self.store_uploads(&files) {
            Ok(uploaded) => ApiResponse::ok(json!({ "status": "success", "uploaded": uploaded })),
            Err(err) => internal_error(&err),
        }
    }

    /// Spool each upload to a scratch file, then push it to the bucket.
    fn store_uploads(&self, files: &[multipart::FormPart]) -> Result<Vec<String>> {
        let scratch = tempfile::tempdir().context("create upload scratch dir")?;
        let mut uploaded = Vec::new();
        for file in files {
            let raw_name = file.filename.as_deref().unwrap_or_default();
            let name = sanitize_filename(raw_name)
                .ok_or_else(|| anyhow!("unusable upload file name: {raw_name:?}"))?;
            let local_path = scratch.path().join(&name);
            std::fs::write(&local_path, &file.data)
                .with_context(|| format!("spool {}", local_path.display()))?;
            let dest = format!("{UPLOAD_PREFIX}/{name}");
            uploaded.push(upload_file(
                self.services.store.as_ref(),
                &local_path,
                &self.services.bucket,
                &dest,
            )?);
        }
        Ok(uploaded)
    }
}

/// Non-empty `prompt` string from a JSON body; anything else counts as missing.
fn required_prompt(request: &ApiRequest) -> Option<String> {
    let body: PromptBody = serde_json::from_slice(&request.body).unwrap_or_default();
    match body.prompt? {
        Value::String(prompt) if !prompt.trim().is_empty() => Some(prompt),
        _ => None,
    }
}

fn to_response<T: serde::Serialize>(value: &T) -> ApiResponse {
    match serde_json::to_value(value) {
        Ok(body) => ApiResponse::ok(body),
        Err(err) => internal_error(&anyhow!(err).context("serialize response")),
    }
}

fn internal_error(err: &anyhow::Error) -> ApiResponse {
    tracing::error!(error = %format!("{err:#}"), "request failed");
    ApiResponse::error(500, format!("{err:#}"))
}
