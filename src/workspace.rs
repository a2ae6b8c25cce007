//! Registry of per-workspace clients.
//!
//! One [`LspClient`] per configured workspace, keyed by the
//! canonicalized root path. The MCP façade selects a client by key and
//! never reaches the core for a workspace that does not exist.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::error::Error;
use crate::lsp_client::LspClient;

pub struct WorkspaceManager {
    clients: HashMap<String, Arc<LspClient>>,
}

impl WorkspaceManager {
    /// Build one idle client per configured workspace.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the list is empty or any workspace path
    /// is invalid.
    pub fn new(config: &Config) -> Result<Self, Error> {
        if config.workspaces.is_empty() {
            return Err(Error::Config {
                path: String::new(),
                reason: "no workspaces configured".into(),
            });
        }
        let mut clients = HashMap::new();
        for root in &config.workspaces {
            let client = LspClient::new(root)?;
            let key = client.paths().root().display().to_string();
            clients.entry(key).or_insert_with(|| Arc::new(client));
        }
        Ok(Self { clients })
    }

    /// Start every workspace's gopls under children of `cancel`.
    ///
    /// # Errors
    ///
    /// The first start failure is propagated; already-started
    /// workspaces keep running and are the caller's to stop.
    pub async fn start_all(&self, cancel: &CancellationToken) -> Result<(), Error> {
        for (key, client) in &self.clients {
            info!(workspace = %key, "starting workspace");
            client.start(cancel.child_token()).await?;
        }
        Ok(())
    }

    /// Look up a client. With no key, succeeds only when exactly one
    /// workspace is configured.
    pub fn select(&self, key: Option<&str>) -> Option<Arc<LspClient>> {
        match key {
            Some(raw) => self.clients.get(raw).cloned().or_else(|| {
                // Tolerate unnormalized paths (trailing slash, symlink).
                let canonical = std::fs::canonicalize(raw).ok()?;
                self.clients.get(&canonical.display().to_string()).cloned()
            }),
            None if self.clients.len() == 1 => self.clients.values().next().cloned(),
            None => None,
        }
    }

    /// Configured workspace keys, for error messages.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.clients.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Stop every client. Idempotent, like the stops it delegates to.
    pub async fn stop_all(&self) {
        for (key, client) in &self.clients {
            info!(workspace = %key, "stopping workspace");
            client.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config_for(paths: Vec<PathBuf>) -> Config {
        Config { workspaces: paths }
    }

    #[test]
    fn empty_config_is_rejected() {
        assert!(matches!(
            WorkspaceManager::new(&config_for(vec![])),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn invalid_workspace_path_is_rejected() {
        let config = config_for(vec![PathBuf::from("/nonexistent/workspace")]);
        assert!(matches!(
            WorkspaceManager::new(&config),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn select_by_canonical_key() {
        let dir = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(&config_for(vec![dir.path().to_path_buf()])).unwrap();

        let canonical = std::fs::canonicalize(dir.path()).unwrap();
        let key = canonical.display().to_string();
        assert!(manager.select(Some(&key)).is_some());
        assert!(manager.select(Some("/unknown/workspace")).is_none());
    }

    #[test]
    fn select_tolerates_unnormalized_paths() {
        let dir = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(&config_for(vec![dir.path().to_path_buf()])).unwrap();

        let with_slash = format!("{}/", dir.path().display());
        assert!(manager.select(Some(&with_slash)).is_some());
    }

    #[test]
    fn missing_key_selects_the_sole_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(&config_for(vec![dir.path().to_path_buf()])).unwrap();
        assert!(manager.select(None).is_some());
    }

    #[test]
    fn missing_key_is_ambiguous_with_two_workspaces() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(&config_for(vec![
            a.path().to_path_buf(),
            b.path().to_path_buf(),
        ]))
        .unwrap();
        assert!(manager.select(None).is_none());
        assert_eq!(manager.keys().len(), 2);
    }

    #[test]
    fn duplicate_workspaces_collapse_to_one_client() {
        let dir = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(&config_for(vec![
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
        ]))
        .unwrap();
        assert_eq!(manager.keys().len(), 1);
    }
}
