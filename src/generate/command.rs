//! External command generator
//!
//! Runs a configured program once per attempt, writes the rendered prompt to
//! its stdin and takes the code block out of its stdout.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{CodeGenerator, GenerationRequest};
use crate::error::TransportError;
use crate::language::Language;

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?ms)^[ \t]*```[ \t]*([A-Za-z0-9_+-]*)[^\n]*\n(.*?)^[ \t]*```")
        .expect("valid fence regex")
});

/// Spawns `program args...` per request
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    model: Option<String>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            model: None,
        }
    }

    /// First element is the program, the rest are arguments
    pub fn from_command_line(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    /// Exported to the child as `BLUEPRINTS_MODEL`
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl CodeGenerator for CommandGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        let prompt = request.render_prompt();
        debug!(
            module = %request.module_id,
            attempt = request.attempt,
            program = %self.program,
            prompt_bytes = prompt.len(),
            "Spawning generator"
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("BLUEPRINTS_MODULE", request.module_id.as_str())
            .env("BLUEPRINTS_LANGUAGE", request.language.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(model) = &self.model {
            command.env("BLUEPRINTS_MODEL", model);
        }

        let mut child = command
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {}", self.program, e)))?;

        // fed concurrently so a child that writes before reading cannot stall on a full pipe
        let stdin = child.stdin.take();
        let feed = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TransportError::Other(format!("waiting for generator: {}", e)))?;

        let fed = feed
            .await
            .map_err(|e| TransportError::Other(format!("prompt writer failed: {}", e)))?;

        if !output.status.success() {
            return Err(TransportError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // a child may exit successfully without reading the whole prompt
        if let Err(e) = fed {
            debug!(module = %request.module_id, error = %e, "Prompt not fully consumed");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        extract_code(request.language, &stdout).ok_or(TransportError::EmptyResponse)
    }
}

/// Code from a model response: the first fenced block tagged with the
/// language, else the first fenced block, else the whole trimmed text
pub fn extract_code(language: Language, response: &str) -> Option<String> {
    let blocks: Vec<(String, String)> = FENCED_BLOCK
        .captures_iter(response)
        .filter_map(|caps| {
            let tag = caps.get(1)?.as_str().to_ascii_lowercase();
            let body = caps.get(2)?.as_str().to_string();
            Some((tag, body))
        })
        .collect();

    let tagged = blocks
        .iter()
        .find(|(tag, _)| tag.parse::<Language>().is_ok_and(|l| l == language));
    let code = match tagged.or_else(|| blocks.first()) {
        Some((_, body)) => body.trim_end().to_string(),
        None => response.trim().to_string(),
    };

    if code.trim().is_empty() {
        None
    } else {
        Some(format!("{}\n", code))
    }
}
