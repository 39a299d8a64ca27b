use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::ProviderError;

const SPAWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens a local file with the platform default application.
#[async_trait]
pub trait FileOpener: Send + Sync {
    async fn open(&self, path: &str) -> Result<Value, ProviderError>;
}

/// Live opener dispatching to the platform's open command.
pub struct PlatformOpener;

impl PlatformOpener {
    fn validate(path: &str) -> Result<(), ProviderError> {
        if path.is_empty() || path.contains('\0') {
            return Err(ProviderError::InvalidPath("empty or malformed path".into()));
        }
        let p = Path::new(path);
        if !p.is_absolute() {
            return Err(ProviderError::InvalidPath(format!(
                "path must be absolute: {path}"
            )));
        }
        if !p.exists() {
            return Err(ProviderError::InvalidPath(format!("no such file: {path}")));
        }
        Ok(())
    }

    fn command_for(path: &str) -> tokio::process::Command {
        #[cfg(target_os = "macos")]
        {
            let mut cmd = tokio::process::Command::new("open");
            cmd.arg(path);
            cmd
        }
        #[cfg(target_os = "windows")]
        {
            let mut cmd = tokio::process::Command::new("cmd");
            cmd.args(["/C", "start", "", path]);
            cmd
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            let mut cmd = tokio::process::Command::new("xdg-open");
            cmd.arg(path);
            cmd
        }
    }
}

#[async_trait]
impl FileOpener for PlatformOpener {
    async fn open(&self, path: &str) -> Result<Value, ProviderError> {
        Self::validate(path)?;

        let status = tokio::time::timeout(SPAWN_TIMEOUT, Self::command_for(path).status())
            .await
            .map_err(|_| ProviderError::CommandTimedOut(SPAWN_TIMEOUT))?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProviderError::NotInstalled("platform open command".into())
                } else {
                    ProviderError::CommandFailed {
                        exit_code: -1,
                        stderr: e.to_string(),
                    }
                }
            })?;

        if !status.success() {
            return Err(ProviderError::CommandFailed {
                exit_code: status.code().unwrap_or(-1),
                stderr: format!("opener exited with {status}"),
            });
        }

        tracing::info!(path = path, "Opened local file");
        Ok(json!({"success": true, "path": path}))
    }
}
