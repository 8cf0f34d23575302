//! Process identifier files and unconditional termination.
//!
//! A pid file holds one positive decimal integer. Surrounding whitespace is
//! tolerated; anything else is malformed and never guessed at.

use lookout_core::{LookoutError, Result};
use std::path::Path;
use tracing::{debug, warn};

/// Read a pid file.
///
/// `Ok(None)` when the file does not exist. [`LookoutError::MalformedState`]
/// when it exists but does not hold a usable pid.
pub async fn read_pid(path: &Path) -> Result<Option<u32>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Err(LookoutError::malformed(path, "pid file is not valid UTF-8"));
        }
        Err(e) => return Err(LookoutError::io("reading pid file", path, e)),
    };

    parse_pid(&contents)
        .map(Some)
        .map_err(|message| LookoutError::malformed(path, message))
}

/// Validate pid file contents.
pub fn parse_pid(contents: &str) -> std::result::Result<u32, String> {
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Err("pid file is empty".to_string());
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("pid file does not hold a positive integer: {trimmed:?}"));
    }
    let pid: u32 = trimmed
        .parse()
        .map_err(|_| format!("pid out of range: {trimmed}"))?;
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(format!("pid out of range: {pid}"));
    }
    if pid == std::process::id() {
        return Err(format!("pid {pid} is the orchestrator itself"));
    }
    Ok(pid)
}

/// Remove a pid file, ignoring a file that is already gone.
pub async fn remove_pid_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed pid file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove pid file"),
    }
}

/// Deliver an unconditional termination signal to `pid`.
///
/// Returns `Ok(true)` when the signal was delivered and `Ok(false)` when the
/// process no longer exists.
#[cfg(unix)]
pub async fn terminate(pid: u32) -> Result<bool> {
    let raw = i32::try_from(pid).map_err(|_| LookoutError::SignalFailed {
        pid,
        message: "pid out of range".into(),
    })?;

    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(raw, libc::SIGKILL) };
    if rc == 0 {
        return Ok(true);
    }

    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(false),
        _ => Err(LookoutError::SignalFailed {
            pid,
            message: err.to_string(),
        }),
    }
}

/// Deliver an unconditional termination signal to `pid` and its children.
///
/// Returns `Ok(true)` when the process was terminated and `Ok(false)` when
/// it no longer exists.
#[cfg(windows)]
pub async fn terminate(pid: u32) -> Result<bool> {
    let output = tokio::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()
        .await
        .map_err(|e| LookoutError::SignalFailed {
            pid,
            message: format!("running taskkill: {e}"),
        })?;

    if output.status.success() {
        return Ok(true);
    }
    // taskkill exits with 128 when the process is not found
    if output.status.code() == Some(128) {
        return Ok(false);
    }
    Err(LookoutError::SignalFailed {
        pid,
        message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[cfg(not(any(unix, windows)))]
pub async fn terminate(pid: u32) -> Result<bool> {
    Err(LookoutError::SignalFailed {
        pid,
        message: "process termination is not supported on this platform".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_pid_accepts_whitespace() {
        assert_eq!(parse_pid("1234\n"), Ok(1234));
        assert_eq!(parse_pid("  42  "), Ok(42));
    }

    #[test]
    fn test_parse_pid_rejects_garbage() {
        assert!(parse_pid("abc").is_err());
        assert!(parse_pid("").is_err());
        assert!(parse_pid("12 34").is_err());
        assert!(parse_pid("-5").is_err());
        assert!(parse_pid("0").is_err());
        assert!(parse_pid("99999999999").is_err());
        assert!(parse_pid("1234\nextra").is_err());
    }

    #[test]
    fn test_parse_pid_rejects_own_pid() {
        assert!(parse_pid(&std::process::id().to_string()).is_err());
    }

    #[tokio::test]
    async fn test_read_pid_missing_file() {
        let dir = tempdir().unwrap();
        assert_eq!(read_pid(&dir.path().join("none.pid")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_pid_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.pid");
        tokio::fs::write(&path, "abc").await.unwrap();

        let err = read_pid(&path).await.unwrap_err();
        assert!(matches!(err, LookoutError::MalformedState { .. }));
    }

    #[tokio::test]
    async fn test_remove_pid_file_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.pid");
        tokio::fs::write(&path, "1234").await.unwrap();
        remove_pid_file(&path).await;
        remove_pid_file(&path).await;
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        assert!(terminate(pid).await.unwrap());
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }
}
