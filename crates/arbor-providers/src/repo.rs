use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::ProviderError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_LIST_LIMIT: u32 = 30;

// gh exits 4 when a command requires authentication.
const GH_EXIT_AUTH: i32 = 4;

/// Repository queries backed by a user-installed CLI.
#[async_trait]
pub trait RepoProvider: Send + Sync {
    fn is_available(&self) -> bool;

    async fn repo_view(&self, repo: &str) -> Result<Value, ProviderError>;
    async fn pr_list(&self, repo: Option<&str>, limit: Option<u32>) -> Result<Value, ProviderError>;
    async fn issue_list(&self, repo: Option<&str>, limit: Option<u32>)
        -> Result<Value, ProviderError>;
}

fn absent() -> ProviderError {
    ProviderError::Absent {
        code: "github_not_available",
        message: "The gh CLI was not found on PATH. Install it from https://cli.github.com and run `gh auth login` to enable github_* tools.".into(),
    }
}

/// Stub selected when the CLI is missing at startup.
pub struct AbsentRepo;

#[async_trait]
impl RepoProvider for AbsentRepo {
    fn is_available(&self) -> bool {
        false
    }

    async fn repo_view(&self, _repo: &str) -> Result<Value, ProviderError> {
        Err(absent())
    }

    async fn pr_list(&self, _repo: Option<&str>, _limit: Option<u32>) -> Result<Value, ProviderError> {
        Err(absent())
    }

    async fn issue_list(
        &self,
        _repo: Option<&str>,
        _limit: Option<u32>,
    ) -> Result<Value, ProviderError> {
        Err(absent())
    }
}

/// Live adapter shelling out to `gh`. Every invocation carries a timeout;
/// exit conditions are normalized into the provider error taxonomy.
pub struct GhCli {
    bin: String,
    timeout: Duration,
}

impl GhCli {
    pub fn new() -> Self {
        Self {
            bin: "gh".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_bin(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn installed() -> bool {
        which::which("gh").is_ok()
    }

    async fn run(&self, args: &[&str]) -> Result<Value, ProviderError> {
        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.bin)
                .args(args)
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| ProviderError::CommandTimedOut(self.timeout))?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProviderError::NotInstalled(self.bin.clone())
            } else {
                ProviderError::CommandFailed {
                    exit_code: -1,
                    stderr: e.to_string(),
                }
            }
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            if exit_code == GH_EXIT_AUTH || stderr.contains("gh auth login") {
                return Err(ProviderError::NotAuthenticated(
                    "run `gh auth login` to authenticate".into(),
                ));
            }
            return Err(ProviderError::CommandFailed {
                exit_code,
                stderr: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(json!({}));
        }
        // Subcommands are invoked with --json, so non-JSON output means the
        // CLI printed something unexpected.
        serde_json::from_str(trimmed)
            .map_err(|e| ProviderError::Api(format!("unparseable gh output: {e}")))
    }
}

impl Default for GhCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepoProvider for GhCli {
    fn is_available(&self) -> bool {
        which::which(&self.bin).is_ok()
    }

    async fn repo_view(&self, repo: &str) -> Result<Value, ProviderError> {
        let result = self
            .run(&[
                "repo",
                "view",
                repo,
                "--json",
                "name,description,defaultBranchRef,stargazerCount,url",
            ])
            .await?;
        Ok(json!({"success": true, "repo": result}))
    }

    async fn pr_list(&self, repo: Option<&str>, limit: Option<u32>) -> Result<Value, ProviderError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).to_string();
        let mut args = vec![
            "pr",
            "list",
            "--json",
            "number,title,author,headRefName,url",
            "--limit",
            limit.as_str(),
        ];
        if let Some(repo) = repo {
            args.extend_from_slice(&["--repo", repo]);
        }
        let result = self.run(&args).await?;
        Ok(json!({"success": true, "pullRequests": result}))
    }

    async fn issue_list(
        &self,
        repo: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Value, ProviderError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).to_string();
        let mut args = vec![
            "issue",
            "list",
            "--json",
            "number,title,author,labels,url",
            "--limit",
            limit.as_str(),
        ];
        if let Some(repo) = repo {
            args.extend_from_slice(&["--repo", repo]);
        }
        let result = self.run(&args).await?;
        Ok(json!({"success": true, "issues": result}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_repo_returns_structured_error() {
        let repo = AbsentRepo;
        let err = repo.pr_list(None, None).await.unwrap_err();
        assert_eq!(err.code(), "github_not_available");
        assert!(err.to_string().contains("gh auth login"));
    }

    #[tokio::test]
    async fn missing_binary_maps_to_not_installed() {
        let cli = GhCli::with_bin("definitely-not-a-real-binary-4451");
        let err = cli.repo_view("octo/repo").await.unwrap_err();
        assert_eq!(err.code(), "not_installed");
    }

    #[tokio::test]
    async fn nonzero_exit_maps_to_command_failed() {
        // `false` exits 1 with no output.
        let cli = GhCli::with_bin("false");
        let err = cli.run(&[]).await.unwrap_err();
        assert_eq!(err.code(), "command_failed");
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let cli = GhCli::with_bin("sleep").with_timeout(Duration::from_millis(50));
        let err = cli.run(&["5"]).await.unwrap_err();
        assert_eq!(err.code(), "command_timed_out");
    }

    #[tokio::test]
    async fn json_stdout_is_parsed() {
        // `echo` stands in for gh; run() only sees the process contract.
        let cli = GhCli::with_bin("echo");
        let value = cli.run(&[r#"{"number": 7}"#]).await.unwrap();
        assert_eq!(value["number"], 7);
    }

    #[tokio::test]
    async fn non_json_stdout_is_an_api_error() {
        let cli = GhCli::with_bin("echo");
        let err = cli.run(&["plain text"]).await.unwrap_err();
        assert_eq!(err.code(), "api_error");
    }
}
