//! Local Python execution backend for chart rendering snippets.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{CodeExecutor, CodeOutput, CodeRequest, ToolError};

/// Environment variable pointing snippets at the directory they should write into
pub const CHART_DIR_ENV: &str = "CAROUSEL_CHART_DIR";

const SCRIPT_NAME: &str = "snippet.py";

/// Runs snippets with a local interpreter. The child is killed when the
/// invocation future is dropped, so the invoker's timeout and cancellation
/// reach the process.
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    interpreter: String,
}

impl Default for PythonSandbox {
    fn default() -> Self {
        Self::new("python3")
    }
}

impl PythonSandbox {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }
}

#[async_trait]
impl CodeExecutor for PythonSandbox {
    async fn execute_code(&self, request: &CodeRequest) -> Result<CodeOutput, ToolError> {
        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|e| ToolError::permanent(format!("cannot create output dir: {}", e)))?;

        let scratch = tempfile::tempdir()
            .map_err(|e| ToolError::transient(format!("cannot create scratch dir: {}", e)))?;
        let script = scratch.path().join(SCRIPT_NAME);
        tokio::fs::write(&script, &request.snippet)
            .await
            .map_err(|e| ToolError::transient(format!("cannot write snippet: {}", e)))?;

        let before = list_files(&request.output_dir).await?;

        debug!(
            interpreter = %self.interpreter,
            output_dir = %request.output_dir.display(),
            "Executing snippet"
        );

        let output = Command::new(&self.interpreter)
            .arg(&script)
            .current_dir(&request.output_dir)
            .env(CHART_DIR_ENV, &request.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ToolError::permanent(format!(
                    "interpreter '{}' not found",
                    self.interpreter
                )),
                _ => ToolError::transient(format!("failed to start interpreter: {}", e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::permanent(format!(
                "snippet exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let mut produced_files: Vec<PathBuf> = list_files(&request.output_dir)
            .await?
            .into_iter()
            .filter(|p| !before.contains(p))
            .collect();
        produced_files.sort();

        Ok(CodeOutput {
            produced_files,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

async fn list_files(dir: &Path) -> Result<HashSet<PathBuf>, ToolError> {
    let mut files = HashSet::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ToolError::permanent(format!("cannot read {}: {}", dir.display(), e)))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ToolError::transient(e.to_string()))?
    {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file {
            files.insert(entry.path());
        }
    }
    Ok(files)
}
