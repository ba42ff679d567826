//! LM invocation logging.
//!
//! Every call through a [`LoggedGenerator`] appends one JSON line to the
//! configured log file:
//!
//! ```jsonl
//! {"schema_version":1,"ts":1707900000000,"kind":"normalize","duration_ms":4200,"outcome":"success",...}
//! {"schema_version":1,"ts":1707900004300,"kind":"test_cases","duration_ms":3100,"outcome":"failed",...}
//! ```
use super::{Prompt, PromptKind, TextGenerator};
use crate::util::{now_epoch_ms, truncate_string};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

pub const LM_LOG_SCHEMA_VERSION: u32 = 1;

const PREVIEW_BYTES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LmOutcome {
    Success,
    /// The call returned, but with no text.
    Empty,
    Failed,
}

/// Single LM invocation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LmLogEntry {
    pub schema_version: u32,
    /// Unix timestamp in milliseconds when the invocation finished.
    pub ts: u64,
    pub kind: PromptKind,
    pub duration_ms: u64,
    pub outcome: LmOutcome,
    pub prompt_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prompt_preview: Option<String>,
}

/// Append-only JSONL log shared by server workers.
pub struct LmInvocationLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LmInvocationLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &LmLogEntry) -> Result<()> {
        let line = serde_json::to_string(entry).context("serialize lm log entry")?;
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open lm log for append: {}", self.path.display()))?;
        writeln!(file, "{line}").context("write lm log entry")?;
        Ok(())
    }

    /// Read all entries, skipping lines that do not parse.
    #[cfg(test)]
    pub fn load(&self) -> Result<Vec<LmLogEntry>> {
        use std::fs::File;
        use std::io::{BufRead, BufReader};

        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("open lm log: {}", self.path.display()))?;
        let mut entries = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("read line {} of lm log", line_num + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LmLogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    tracing::warn!(line = line_num + 1, error = %err, "skip corrupt lm log entry");
                }
            }
        }
        Ok(entries)
    }
}

/// Wraps a generator and records every call in an [`LmInvocationLog`].
pub struct LoggedGenerator<G> {
    inner: G,
    log: LmInvocationLog,
}

impl<G: TextGenerator> LoggedGenerator<G> {
    pub fn new(inner: G, log: LmInvocationLog) -> Self {
        Self { inner, log }
    }
}

impl<G: TextGenerator> TextGenerator for LoggedGenerator<G> {
    fn generate(&self, prompt: &Prompt) -> Result<String> {
        let start = Instant::now();
        let result = self.inner.generate(prompt);
        let (outcome, response_bytes, error) = match &result {
            Ok(text) if text.trim().is_empty() => (LmOutcome::Empty, Some(0), None),
            Ok(text) => (LmOutcome::Success, Some(text.len()), None),
            Err(err) => (LmOutcome::Failed, None, Some(format!("{err:#}"))),
        };
        let entry = LmLogEntry {
            schema_version: LM_LOG_SCHEMA_VERSION,
            ts: now_epoch_ms(),
            kind: prompt.kind,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcome,
            prompt_bytes: prompt.text.len(),
            response_bytes,
            error,
            prompt_preview: Some(truncate_string(&prompt.text, PREVIEW_BYTES)),
        };
        if let Err(err) = self.log.append(&entry) {
            tracing::warn!(path = %self.log.path().display(), error = %err, "lm log append failed");
        }
        result
    }
}
