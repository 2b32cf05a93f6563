//! # Tool Runner
//!
//! Runs one external optimizer on a working copy. Stateless, no retries.
//! Output is never parsed: the caller only looks at the exit status and at
//! the size of the file the tool left behind.

use crate::config::Config;
use crate::error::{OptimizeError, Result};
use crate::tool_resolver::ToolPathResolver;
use crate::tools::{Convention, ToolDescriptor, ToolId};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

/// What a single tool invocation produced
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool: ToolId,
    pub success: bool,
    pub output_path: PathBuf,
    pub size_before: u64,
    pub size_after: u64,
}

#[derive(Debug, Clone)]
pub struct ToolRunner {
    resolver: Arc<ToolPathResolver>,
}

impl ToolRunner {
    pub fn new(resolver: Arc<ToolPathResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &ToolPathResolver {
        &self.resolver
    }

    /// Run `tool` reading `input` and leaving its result at `output`.
    ///
    /// Failures are logged and folded into `success = false`; they never
    /// abort the pipeline.
    pub async fn run(
        &self,
        tool: &ToolDescriptor,
        input: &Path,
        output: &Path,
        config: &Config,
    ) -> ToolResult {
        let size_before = tokio::fs::metadata(input)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let outcome = self.execute(tool, input, output, config).await;
        let size_after = tokio::fs::metadata(output)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let success = match outcome {
            Ok(()) if size_after > 0 => true,
            Ok(()) => {
                warn!("{} left an empty file for {}", tool.id, input.display());
                false
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        };

        ToolResult {
            tool: tool.id,
            success,
            output_path: output.to_path_buf(),
            size_before,
            size_after,
        }
    }

    async fn execute(
        &self,
        tool: &ToolDescriptor,
        input: &Path,
        output: &Path,
        config: &Config,
    ) -> Result<()> {
        let program = self
            .resolver
            .tool_path(tool.id)
            .ok_or_else(|| OptimizeError::ToolUnavailable(tool.id.to_string()))?;

        if tool.convention == Convention::InPlace {
            tokio::fs::copy(input, output).await?;
        }

        let args = tool.args(input, output, config);
        debug!("Running {} {:?}", program.display(), args);

        let start_time = std::time::Instant::now();
        let status = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| OptimizeError::ToolExecution {
                tool: tool.id.to_string(),
                path: input.to_path_buf(),
                reason: e.to_string(),
            })?;
        let elapsed = start_time.elapsed();

        if status.success() {
            debug!("{} finished {} in {:?}", tool.id, input.display(), elapsed);
            Ok(())
        } else {
            Err(OptimizeError::ToolExecution {
                tool: tool.id.to_string(),
                path: input.to_path_buf(),
                reason: format!("{} after {:?}", status, elapsed),
            })
        }
    }
}
