//! Local command backend.
//!
//! Pipes the prompt to a user-configured command on stdin and reads the
//! completion from stdout. Any tool that accepts text and prints text works
//! (`llm`, `ollama run <model>`, a shell script replaying canned answers).
use super::{Prompt, TextGenerator};
use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    /// Parse a shell-style command line such as `ollama run llama3`.
    pub fn parse(command: &str) -> Result<Self> {
        let mut words =
            shell_words::split(command).with_context(|| format!("parse LM command: {command}"))?;
        if words.is_empty() {
            return Err(anyhow!("LM command is empty"));
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
        })
    }
}

impl TextGenerator for CommandGenerator {
    fn generate(&self, prompt: &Prompt) -> Result<String> {
        let start = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("MEDREQ_PROMPT_KIND", prompt.kind.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn LM command: {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.text.as_bytes())
                .context("write prompt to LM stdin")?;
        }

        let output = child.wait_with_output().context("wait for LM command")?;
        let elapsed_ms = start.elapsed().as_millis();

        tracing::info!(
            kind = %prompt.kind,
            elapsed_ms,
            prompt_bytes = prompt.text.len(),
            response_bytes = output.stdout.len(),
            "lm invoke complete"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "LM command failed with status {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        String::from_utf8(output.stdout).context("decode LM stdout as UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lm::PromptKind;

    #[test]
    fn parse_splits_quoted_arguments() {
        let generator = CommandGenerator::parse("sh -c 'cat -'").unwrap();
        assert_eq!(generator.program, "sh");
        assert_eq!(generator.args, vec!["-c".to_string(), "cat -".to_string()]);
    }

    #[test]
    fn parse_rejects_empty_command() {
        assert!(CommandGenerator::parse("   ").is_err());
        assert!(CommandGenerator::parse("sh -c 'unterminated").is_err());
    }

    #[test]
    fn echoes_prompt_through_cat() {
        let generator = CommandGenerator::parse("cat").unwrap();
        let text = generator
            .generate(&Prompt::new(PromptKind::General, "{\"ok\": true}"))
            .unwrap();
        assert_eq!(text, "{\"ok\": true}");
    }

    #[test]
    fn exposes_prompt_kind_to_command() {
        let generator = CommandGenerator::parse("sh -c 'cat >/dev/null; printf %s \"$MEDREQ_PROMPT_KIND\"'")
            .unwrap();
        let text = generator
            .generate(&Prompt::new(PromptKind::IsoAudit, "audit"))
            .unwrap();
        assert_eq!(text, "iso_audit");
    }

    #[test]
    fn failing_command_is_an_error_and_in_band_text() {
        let generator = CommandGenerator::parse("sh -c 'cat >/dev/null; echo boom >&2; exit 3'").unwrap();
        let prompt = Prompt::new(PromptKind::Normalize, "x");
        let err = generator.generate(&prompt).unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(generator.complete(&prompt).starts_with("Error: "));
    }
}
