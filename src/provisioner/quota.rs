//! XFS Project Quotas
//!
//! Drives `xfs_quota` in expert mode against the storage filesystem.

use crate::domain::ports::QuotaManager;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const XFS_QUOTA: &str = "xfs_quota";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// `xfs_quota -x [-D projects -P projid] -c <subcommand> <storage path>`
pub struct XfsQuota {
    storage_path: PathBuf,
    binary: String,
    ledgers: Option<(PathBuf, PathBuf)>,
}

impl XfsQuota {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            binary: XFS_QUOTA.to_string(),
            ledgers: None,
        }
    }

    /// Point the tool at the projects and projid files this process maintains
    pub fn with_ledgers(mut self, projects: impl Into<PathBuf>, projid: impl Into<PathBuf>) -> Self {
        self.ledgers = Some((projects.into(), projid.into()));
        self
    }

    /// Use a different executable, e.g. a wrapper script
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn args(&self, subcommand: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from("-x")];
        if let Some((projects, projid)) = &self.ledgers {
            args.push("-D".into());
            args.push(projects.into());
            args.push("-P".into());
            args.push(projid.into());
        }
        args.push("-c".into());
        args.push(subcommand.into());
        args.push(self.storage_path.clone().into());
        args
    }

    async fn run(&self, subcommand: String) -> Result<()> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(self.args(&subcommand));

        let failed = |reason: String| Error::QuotaCommand {
            command: subcommand.clone(),
            reason,
        };

        let output = match tokio::time::timeout(COMMAND_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(failed(e.to_string())),
            Err(_) => return Err(failed("timed out".to_string())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(failed(format!(
                "exit {}: {}{}",
                output.status.code().unwrap_or(-1),
                stderr.trim(),
                stdout.trim()
            )));
        }

        debug!(command = %subcommand, path = %self.storage_path.display(), "xfs_quota ok");
        Ok(())
    }
}

#[async_trait]
impl QuotaManager for XfsQuota {
    async fn create_project(&self, project: &str) -> Result<()> {
        self.run(format!("project -s {}", project)).await
    }

    async fn set_hard_limit(&self, project: &str, bytes: u64) -> Result<()> {
        self.run(format!("limit -p bhard={} {}", bytes, project)).await
    }

    async fn clear_project(&self, project: &str) -> Result<()> {
        self.run(format!("limit -p bsoft=0 bhard=0 {}", project)).await?;
        self.run(format!("project -C {}", project)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_arguments_passed_through() {
        // `echo` stands in for xfs_quota and always succeeds
        let quota = XfsQuota::new("/mnt/storage").with_binary("echo");
        quota.create_project("apps_data-x").await.unwrap();
        quota.set_hard_limit("apps_data-x", 1024).await.unwrap();
        quota.clear_project("apps_data-x").await.unwrap();
    }

    #[test]
    fn test_ledger_files_are_passed() {
        let quota = XfsQuota::new("/mnt/storage").with_ledgers("/host/projects", "/host/projid");
        let args: Vec<String> = quota
            .args("project -s p")
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            ["-x", "-D", "/host/projects", "-P", "/host/projid", "-c", "project -s p", "/mnt/storage"]
        );

        let plain = XfsQuota::new("/mnt/storage").args("project -s p");
        assert_eq!(plain.len(), 4);
    }

    #[tokio::test]
    async fn test_failure_is_reported() {
        let quota = XfsQuota::new("/mnt/storage").with_binary("false");
        let result = quota.create_project("apps_data-x").await;
        assert_matches!(result, Err(Error::QuotaCommand { command, .. }) if command == "project -s apps_data-x");
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let quota = XfsQuota::new("/mnt/storage").with_binary("/nonexistent/xfs_quota");
        assert_matches!(quota.create_project("p").await, Err(Error::QuotaCommand { .. }));
    }
}
