//! Command port — layer process control over a shell transport.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use vigil_types::Layer;

/// A failed remote command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn ssh: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("remote command exited with status {status}: {stderr}")]
    NonZero { status: i32, stderr: String },
}

/// Port through which the orchestrator controls layer processes.
///
/// Exit code 0 means success. Tests substitute recording
/// implementations.
#[async_trait]
pub trait CommandPort: Send + Sync {
    /// Stop the layer process on a host.
    async fn stop(&self, host: &str, layer: Layer) -> Result<(), CommandError>;

    /// Start the layer process as the genesis node.
    async fn start_genesis(&self, host: &str, layer: Layer) -> Result<(), CommandError>;

    /// Start the layer process and join the cluster through a seed.
    async fn start_and_join(
        &self,
        host: &str,
        layer: Layer,
        seed_host: &str,
    ) -> Result<(), CommandError>;
}

/// Shell command templates, parameterized by `{layer}` and `{seed}`.
#[derive(Debug, Clone)]
pub struct CommandTemplates {
    pub stop: String,
    pub start_genesis: String,
    pub start_and_join: String,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            stop: "sudo systemctl stop metagraph-{layer}".to_string(),
            start_genesis: "sudo /opt/metagraph/bin/start-{layer}.sh --genesis".to_string(),
            start_and_join: "sudo /opt/metagraph/bin/start-{layer}.sh --join {seed}".to_string(),
        }
    }
}

impl CommandTemplates {
    fn render(template: &str, layer: Layer, seed_host: Option<&str>) -> String {
        let rendered = template.replace("{layer}", layer.as_str());
        match seed_host {
            Some(seed) => rendered.replace("{seed}", seed),
            None => rendered,
        }
    }
}

/// [`CommandPort`] over the system `ssh` binary.
///
/// In dry-run mode the full command line is logged and nothing is
/// executed.
pub struct SshExecutor {
    user: String,
    key_path: PathBuf,
    connect_timeout: Duration,
    templates: CommandTemplates,
    dry_run: bool,
}

impl SshExecutor {
    pub fn new(user: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            key_path: key_path.into(),
            connect_timeout: Duration::from_secs(10),
            templates: CommandTemplates::default(),
            dry_run: false,
        }
    }

    pub fn with_templates(mut self, templates: CommandTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    async fn run(&self, host: &str, command: &str) -> Result<(), CommandError> {
        if self.dry_run {
            info!(%host, %command, "dry-run: remote command not executed");
            return Ok(());
        }

        debug!(%host, %command, "running remote command");
        let output = Command::new("ssh")
            .arg("-i")
            .arg(&self.key_path)
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
            .arg(format!("{}@{}", self.user, host))
            .arg(command)
            .output()
            .await?;

        if output.status.success() {
            debug!(%host, %command, "remote command succeeded");
            Ok(())
        } else {
            Err(CommandError::NonZero {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl CommandPort for SshExecutor {
    async fn stop(&self, host: &str, layer: Layer) -> Result<(), CommandError> {
        let command = CommandTemplates::render(&self.templates.stop, layer, None);
        self.run(host, &command).await
    }

    async fn start_genesis(&self, host: &str, layer: Layer) -> Result<(), CommandError> {
        let command = CommandTemplates::render(&self.templates.start_genesis, layer, None);
        self.run(host, &command).await
    }

    async fn start_and_join(
        &self,
        host: &str,
        layer: Layer,
        seed_host: &str,
    ) -> Result<(), CommandError> {
        let command =
            CommandTemplates::render(&self.templates.start_and_join, layer, Some(seed_host));
        self.run(host, &command).await
    }
}
