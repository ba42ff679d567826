//! Text generation backends.
//!
//! Every backend implements [`TextGenerator`]: one prompt in, one completion
//! out, no conversational state. The structured [`TextGenerator::generate`]
//! reports failures as errors; [`TextGenerator::complete`] folds them into the
//! completion text so extraction downstream degrades to "no data".
mod command;
mod gemini;
mod log;

pub use command::CommandGenerator;
pub use gemini::GeminiClient;
pub use log::{LmInvocationLog, LoggedGenerator};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// What a prompt is for; carried into logs and tracing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Classify,
    Normalize,
    TestCases,
    IsoAudit,
    General,
    TestFile,
}

impl std::fmt::Display for PromptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Classify => "classify",
            Self::Normalize => "normalize",
            Self::TestCases => "test_cases",
            Self::IsoAudit => "iso_audit",
            Self::General => "general",
            Self::TestFile => "test_file",
        };
        f.write_str(name)
    }
}

/// A fully rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub text: String,
}

impl Prompt {
    pub fn new(kind: PromptKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

pub trait TextGenerator: Send + Sync {
    /// Produce a completion, failing on transport or provider errors.
    fn generate(&self, prompt: &Prompt) -> Result<String>;

    /// Produce a completion, rendering any failure as `Error: ...` text.
    fn complete(&self, prompt: &Prompt) -> String {
        match self.generate(prompt) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(kind = %prompt.kind, error = %err, "generation failed");
                format!("Error: {err:#}")
            }
        }
    }
}

impl<T: TextGenerator + ?Sized> TextGenerator for Box<T> {
    fn generate(&self, prompt: &Prompt) -> Result<String> {
        (**self).generate(prompt)
    }
}
