//! Detached worker process launching.
//!
//! Spawned workers must outlive the orchestrator: they get their own process
//! group (a new console group on Windows), no stdin, and their output goes to
//! the worker log file or nowhere. The child handle is dropped right after
//! spawn without killing the process.

use async_trait::async_trait;
use lookout_core::{LookoutError, Result};
use std::fmt::Debug;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::types::WorkerDescriptor;

/// A process that was launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedProcess {
    pub pid: u32,
}

/// Launches worker processes.
///
/// Lifecycle tests substitute a fake that records launches without creating
/// real processes.
#[async_trait]
pub trait ProcessSpawner: Send + Sync + Debug {
    /// Launch the worker described by `descriptor`.
    ///
    /// Returns [`LookoutError::SpawnFailed`] when the process cannot be created.
    async fn spawn(&self, descriptor: &WorkerDescriptor) -> Result<SpawnedProcess>;
}

/// Spawns the configured command with tokio.
#[derive(Debug, Clone, Default)]
pub struct CommandSpawner;

impl CommandSpawner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessSpawner for CommandSpawner {
    #[instrument(level = "info", skip(self, descriptor), fields(worker = %descriptor.kind))]
    async fn spawn(&self, descriptor: &WorkerDescriptor) -> Result<SpawnedProcess> {
        let kind = descriptor.kind;
        let command = descriptor.command.as_ref().ok_or_else(|| {
            LookoutError::spawn_failed(kind, "no spawn command configured")
        })?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null());
        match &descriptor.log_file {
            Some(path) => {
                let (stdout, stderr) = open_log_file(path)
                    .await
                    .map_err(|e| LookoutError::spawn_failed(kind, format!("opening {}: {e}", path.display())))?;
                cmd.stdout(stdout).stderr(stderr);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        detach(&mut cmd);
        cmd.kill_on_drop(false);

        debug!(program = %command.program, args = ?command.args, "launching worker");

        let child = cmd
            .spawn()
            .map_err(|e| LookoutError::spawn_failed(kind, format!("{}: {e}", command.program)))?;
        let pid = child
            .id()
            .ok_or_else(|| LookoutError::spawn_failed(kind, "process exited before its pid was read"))?;

        info!(pid, "worker process launched");
        Ok(SpawnedProcess { pid })
    }
}

async fn open_log_file(path: &Path) -> std::io::Result<(Stdio, Stdio)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?
        .into_std()
        .await;
    let stderr = file.try_clone()?;
    Ok((Stdio::from(file), Stdio::from(stderr)))
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}
