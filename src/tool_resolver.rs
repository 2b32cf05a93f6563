//! # Tool Path Resolver
//!
//! This module handles finding optimization tools:
//! - In an explicit tools directory (`--tools-dir` or `PICOPT_TOOLS_DIR`)
//! - In the system PATH
//!
//! Every enabled optimizer is resolved once at startup, so workers never
//! search PATH again and a missing tool is silently excluded from every
//! pipeline.

use crate::config::Config;
use crate::error::OptimizeError;
use crate::tools::{ToolId, REGISTRY};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment override for the tools directory
pub const TOOLS_DIR_ENV: &str = "PICOPT_TOOLS_DIR";

/// Tool path resolver
#[derive(Debug, Clone, Default)]
pub struct ToolPathResolver {
    /// Directory checked before PATH
    tools_dir: Option<PathBuf>,
    /// Resolved enabled optimizers
    resolved: HashMap<ToolId, PathBuf>,
}

impl ToolPathResolver {
    /// Resolve every enabled optimizer for this configuration
    pub fn probe(config: &Config) -> Self {
        let tools_dir = config
            .tools_dir
            .clone()
            .or_else(|| env::var_os(TOOLS_DIR_ENV).map(PathBuf::from))
            .filter(|dir| dir.is_dir());

        let mut resolver = Self {
            tools_dir,
            resolved: HashMap::new(),
        };

        for tool in REGISTRY {
            if !config.tools.is_enabled(tool.id) {
                debug!("{} disabled by configuration", tool.id);
                continue;
            }
            match resolver.resolve_program(tool.program) {
                Some(path) => {
                    debug!("Using {} -> {:?}", tool.id, path);
                    resolver.resolved.insert(tool.id, path);
                }
                None => {
                    if config.verbose > 1 {
                        info!("couldn't run {}", tool.program);
                    }
                }
            }
        }

        resolver
    }

    /// Resolve any program name (optimizers, `unrar`)
    pub fn resolve_program(&self, program: &str) -> Option<PathBuf> {
        if let Some(ref tools_dir) = self.tools_dir {
            let bundled_path = Self::get_bundled_tool_path(tools_dir, program);
            if bundled_path.is_file() {
                return Some(bundled_path);
            }
        }
        which::which(program).ok()
    }

    fn get_bundled_tool_path(tools_dir: &Path, program: &str) -> PathBuf {
        let extension = if cfg!(target_os = "windows") { ".exe" } else { "" };
        tools_dir.join(format!("{}{}", program, extension))
    }

    /// Path of an enabled, available optimizer
    pub fn tool_path(&self, id: ToolId) -> Option<&Path> {
        self.resolved.get(&id).map(PathBuf::as_path)
    }

    pub fn is_tool_available(&self, id: ToolId) -> bool {
        self.resolved.contains_key(&id)
    }

    /// Fail when no optimizer at all can run
    pub fn verify_tools(&self) -> Result<(), OptimizeError> {
        if self.resolved.is_empty() {
            Err(OptimizeError::Configuration(
                "All optimizers are not available or disabled.".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Get a report of tool availability
    pub fn get_tools_report(&self) -> String {
        let mut report = String::from("Optimizer availability:\n");
        if let Some(ref tools_dir) = self.tools_dir {
            report.push_str(&format!("Tools dir: {}\n", tools_dir.display()));
        }
        for tool in REGISTRY {
            match self.tool_path(tool.id) {
                Some(path) => report.push_str(&format!("  ✅ {} -> {}\n", tool.id, path.display())),
                None => report.push_str(&format!("  ❌ {}\n", tool.id)),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolToggles;
    use tempfile::TempDir;

    fn fake_tool(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "#!/bin/sh\nexit 0\n").unwrap();
    }

    #[test]
    fn test_tools_dir_wins_and_disabled_tools_are_skipped() {
        let dir = TempDir::new().unwrap();
        fake_tool(dir.path(), "optipng");
        fake_tool(dir.path(), "pngout");

        let config = Config {
            tools_dir: Some(dir.path().to_path_buf()),
            tools: ToolToggles {
                optipng: true,
                ..ToolToggles::none()
            },
            ..Config::default()
        };

        let resolver = ToolPathResolver::probe(&config);
        assert_eq!(
            resolver.tool_path(ToolId::Optipng),
            Some(dir.path().join("optipng").as_path())
        );
        assert!(!resolver.is_tool_available(ToolId::Pngout));
        assert!(resolver.verify_tools().is_ok());
        assert!(resolver.get_tools_report().contains("optipng"));
    }

    #[test]
    fn test_nothing_enabled_is_a_configuration_error() {
        let config = Config {
            tools: ToolToggles::none(),
            ..Config::default()
        };
        let resolver = ToolPathResolver::probe(&config);
        let err = resolver.verify_tools().unwrap_err();
        assert!(err.is_fatal());
    }
}
