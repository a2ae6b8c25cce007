//! Workspace configuration.
//!
//! Resolution order: the `GOPLS_WORKSPACES` environment variable (a
//! `,`- or `:`-separated list of directories), then a toml config file
//! (`GOPLS_BRIDGE_CONFIG` or `<config dir>/gopls-bridge/config.toml`),
//! then the current directory as the single workspace.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::error::Error;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Root directories of the Go workspaces to serve.
    #[serde(default)]
    pub workspaces: Vec<PathBuf>,
}

impl Config {
    /// Resolve the workspace list from the environment.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when a config file is present but unreadable
    /// or invalid, or when no workspace can be determined at all.
    pub fn load() -> Result<Self, Error> {
        if let Ok(raw) = std::env::var("GOPLS_WORKSPACES") {
            let config = Self {
                workspaces: parse_workspace_list(&raw),
            };
            if config.workspaces.is_empty() {
                return Err(Error::Config {
                    path: raw,
                    reason: "GOPLS_WORKSPACES is set but names no directories".into(),
                });
            }
            return Ok(config);
        }

        if let Some(path) = config_file_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        let cwd = std::env::current_dir().map_err(|e| Error::Config {
            path: ".".into(),
            reason: format!("cannot resolve current directory: {e}"),
        })?;
        Ok(Self {
            workspaces: vec![cwd],
        })
    }

    /// Parse a toml config file of the form `workspaces = ["/a", "/b"]`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.display().to_string(),
            reason: format!("cannot read config file: {e}"),
        })?;
        toml::from_str(&raw).map_err(|e| Error::Config {
            path: path.display().to_string(),
            reason: format!("invalid config file: {e}"),
        })
    }
}

fn parse_workspace_list(raw: &str) -> Vec<PathBuf> {
    raw.split([',', ':'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("GOPLS_BRIDGE_CONFIG") {
        return Some(PathBuf::from(explicit));
    }
    ProjectDirs::from("", "", "gopls-bridge").map(|dirs| dirs.config_dir().join("config.toml"))
}
