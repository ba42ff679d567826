//! Hosted model client.
//!
//! Sends a single-turn `generateContent` request and returns the first text
//! part of the first candidate. With an API key the public endpoint is used;
//! otherwise the regional managed endpoint with a passthrough bearer token.
use super::{Prompt, TextGenerator};
use crate::config::{Config, Credential};
use crate::http;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);
const PUBLIC_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiClient {
    agent: ureq::Agent,
    endpoint: String,
    credential: Credential,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    fn first_text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .unwrap_or_default()
    }
}

impl GeminiClient {
    pub fn new(endpoint: String, credential: Credential) -> Self {
        Self {
            agent: http::agent(GENERATE_TIMEOUT),
            endpoint,
            credential,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let credential = config.genai_credential();
        let endpoint = endpoint_for(config, &credential);
        Self::new(endpoint, credential)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn endpoint_for(config: &Config, credential: &Credential) -> String {
    let model = &config.model.name;
    match credential {
        Credential::ApiKey(_) => format!("{PUBLIC_API_BASE}/models/{model}:generateContent"),
        Credential::Bearer(_) | Credential::None => {
            let location = &config.model.location;
            format!(
                "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:generateContent",
                project = config.project_id
            )
        }
    }
}

fn request_body(prompt: &str) -> GenerateRequest<'_> {
    GenerateRequest {
        contents: [Content {
            role: "user",
            parts: [Part { text: prompt }],
        }],
        generation_config: GenerationConfig {
            response_mime_type: "text/plain",
        },
    }
}

impl TextGenerator for GeminiClient {
    fn generate(&self, prompt: &Prompt) -> Result<String> {
        let request = self.agent.post(self.endpoint.as_str());
        let request = match &self.credential {
            Credential::ApiKey(key) => request.header("x-goog-api-key", key.as_str()),
            Credential::Bearer(token) => request.header("Authorization", format!("Bearer {token}")),
            Credential::None => return Err(anyhow!("no generative credential configured")),
        };

        let start = Instant::now();
        tracing::debug!(kind = %prompt.kind, prompt_bytes = prompt.text.len(), "generate request");
        let mut response = request
            .send_json(request_body(&prompt.text))
            .with_context(|| format!("POST {}", self.endpoint))?;
        let status = response.status();
        let elapsed_ms = start.elapsed().as_millis();

        if !status.is_success() {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            tracing::error!(kind = %prompt.kind, status = status.as_u16(), elapsed_ms, "generate failed");
            return Err(anyhow!("{body}"));
        }

        let parsed: GenerateResponse = response
            .body_mut()
            .read_json()
            .context("decode generateContent response")?;
        let text = parsed.first_text();
        tracing::info!(
            kind = %prompt.kind,
            elapsed_ms,
            prompt_bytes = prompt.text.len(),
            response_bytes = text.len(),
            "generate complete"
        );
        Ok(text)
    }
}
