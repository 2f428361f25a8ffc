//! Dependency installation.
//!
//! InstallDependencies hands an opaque command to an external installer.
//! The engine only sees this trait: [`DeferredInstaller`] records the
//! command without running it, [`ShellInstaller`] runs it through a shell
//! inside the build rootfs and reports the paths it changed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use boxfile_core::config::InstallConfig;
use boxfile_core::error::{BuildError, Result};

use super::layer::DirSnapshot;

/// Default PATH for chrooted commands.
const CHROOT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// What the engine asks the installer to do.
#[derive(Debug)]
pub struct InstallRequest<'a> {
    /// Position of the InstallDependencies directive
    pub position: usize,
    /// Command with environment references expanded
    pub command: &'a str,
    /// Build rootfs on the host
    pub rootfs: &'a Path,
    /// Working directory inside the image
    pub workdir: &'a str,
    /// Environment accumulated so far
    pub env: &'a [(String, String)],
}

impl InstallRequest<'_> {
    /// Host path of the working directory.
    pub fn host_workdir(&self) -> PathBuf {
        self.rootfs.join(self.workdir.trim_start_matches('/'))
    }

    fn tool_error(&self, exit_code: Option<i32>, message: impl Into<String>) -> BuildError {
        BuildError::ExternalTool {
            position: self.position,
            command: self.command.to_string(),
            exit_code,
            message: message.into(),
        }
    }
}

/// What the installer did.
#[derive(Debug, Default)]
pub struct InstallOutcome {
    /// Whether the command actually ran
    pub executed: bool,
    /// Paths changed in the rootfs, relative to it
    pub changed: Vec<PathBuf>,
    /// Captured standard output
    pub stdout: String,
}

/// External dependency installer.
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Run (or record) an install command. Failures are `ExternalTool`
    /// errors carrying the tool's own message.
    async fn install(&self, request: &InstallRequest<'_>) -> Result<InstallOutcome>;
}

/// Records install commands without running them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredInstaller;

#[async_trait]
impl DependencyInstaller for DeferredInstaller {
    fn name(&self) -> &str {
        "deferred"
    }

    async fn install(&self, request: &InstallRequest<'_>) -> Result<InstallOutcome> {
        tracing::info!(
            position = request.position,
            command = request.command,
            "Install deferred, command recorded without running"
        );
        Ok(InstallOutcome::default())
    }
}

/// Runs install commands through a shell in the build rootfs.
#[derive(Debug, Clone)]
pub struct ShellInstaller {
    shell: Vec<String>,
    chroot: bool,
    timeout: Option<Duration>,
}

impl ShellInstaller {
    pub fn new(shell: Vec<String>) -> Self {
        Self {
            shell,
            chroot: false,
            timeout: None,
        }
    }

    pub fn from_config(config: &InstallConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            chroot: config.chroot,
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn with_chroot(mut self, chroot: bool) -> Self {
        self.chroot = chroot;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn command(&self, request: &InstallRequest<'_>) -> Result<tokio::process::Command> {
        let (program, args) = self
            .shell
            .split_first()
            .ok_or_else(|| request.tool_error(None, "no install shell configured"))?;

        let cmd = if self.chroot {
            // Inside the chroot the working directory has to be entered by the
            // shell. It is passed as `$1` so no quoting of the path is needed.
            let script = format!("cd \"$1\" && {}", request.command);
            let mut cmd = tokio::process::Command::new("chroot");
            cmd.arg(request.rootfs)
                .arg(program)
                .args(args)
                .arg(script)
                .arg(program)
                .arg(request.workdir);
            cmd.env_clear();
            cmd.env("PATH", CHROOT_PATH);
            cmd.env("HOME", "/root");
            cmd
        } else {
            let mut cmd = tokio::process::Command::new(program);
            cmd.args(args).arg(request.command);
            cmd.current_dir(request.host_workdir());
            cmd
        };
        Ok(cmd)
    }
}

impl Default for ShellInstaller {
    fn default() -> Self {
        Self::from_config(&InstallConfig::default())
    }
}

#[async_trait]
impl DependencyInstaller for ShellInstaller {
    fn name(&self) -> &str {
        if self.chroot {
            "chroot-shell"
        } else {
            "shell"
        }
    }

    async fn install(&self, request: &InstallRequest<'_>) -> Result<InstallOutcome> {
        let before = DirSnapshot::capture(request.rootfs)?;

        let mut cmd = self.command(request)?;
        for (key, value) in request.env {
            cmd.env(key, value);
        }
        cmd.kill_on_drop(true);

        tracing::debug!(
            position = request.position,
            command = request.command,
            chroot = self.chroot,
            "Running install command"
        );

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| {
                    request.tool_error(None, format!("timed out after {}s", limit.as_secs()))
                })?,
            None => cmd.output().await,
        }
        .map_err(|e| request.tool_error(None, format!("failed to spawn: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(request.tool_error(output.status.code(), stderr.trim()));
        }

        let after = DirSnapshot::capture(request.rootfs)?;
        Ok(InstallOutcome {
            executed: true,
            changed: before.diff(&after),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}
