//! Project start/stop hooks.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::host::PROJECT_ENV;
use crate::{Error, Result};

/// Longest stderr excerpt carried in a failure reason.
const STDERR_EXCERPT: usize = 512;

/// How long stderr is drained after the hook exits. A process the hook
/// left in the background may hold the pipe open indefinitely.
const STDERR_DRAIN: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Start,
    Stop,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Start => "start",
            HookKind::Stop => "stop",
        }
    }
}

/// Run `command` through `sh -c` in `workdir`.
///
/// A hook still running after `limit` fails the call; it is killed if it
/// has not exited after a further `grace`.
pub async fn run_hook(
    kind: HookKind,
    command: &str,
    project: &str,
    workdir: Option<&Path>,
    limit: Duration,
    grace: Duration,
) -> Result<()> {
    let failure = |reason: String| Error::HookFailure {
        hook: kind.as_str().to_string(),
        reason,
    };

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .env(PROJECT_ENV, project)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }

    debug!(hook = kind.as_str(), project, command, "running hook");
    let mut child = cmd
        .spawn()
        .map_err(|e| failure(format!("could not run '{}': {}", command, e)))?;

    let stderr = child.stderr.take();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let mut collector = tokio::spawn(collect(stderr, Arc::clone(&captured)));

    let status = match timeout(limit, child.wait()).await {
        Ok(status) => status.map_err(|e| failure(e.to_string()))?,
        Err(_) => {
            warn!(hook = kind.as_str(), project, ?limit, "hook timed out");
            if timeout(grace, child.wait()).await.is_err() {
                warn!(hook = kind.as_str(), project, "killing hook after grace period");
                let _ = child.kill().await;
            }
            collector.abort();
            return Err(failure(format!("timed out after {:?}", limit)));
        }
    };

    if timeout(STDERR_DRAIN, &mut collector).await.is_err() {
        debug!(hook = kind.as_str(), project, "stderr still open, not waiting for it");
        collector.abort();
    }
    let stderr = match captured.lock() {
        Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
        Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
    };
    if status.success() {
        info!(hook = kind.as_str(), project, "hook finished");
        return Ok(());
    }

    let excerpt = excerpt(stderr.trim());
    let reason = if excerpt.is_empty() {
        format!("exited with {}", status)
    } else {
        format!("exited with {}: {}", status, excerpt)
    };
    warn!(hook = kind.as_str(), project, %reason, "hook failed");
    Err(failure(reason))
}

/// Append the hook's stderr to `captured` until EOF, keeping at most one
/// excerpt's worth.
async fn collect(stderr: Option<tokio::process::ChildStderr>, captured: Arc<Mutex<Vec<u8>>>) {
    let Some(mut stderr) = stderr else {
        return;
    };
    let mut chunk = [0u8; 1024];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut buf) = captured.lock() {
                    let room = (STDERR_EXCERPT * 4).saturating_sub(buf.len());
                    buf.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    }
}

fn excerpt(s: &str) -> &str {
    if s.len() <= STDERR_EXCERPT {
        return s;
    }
    let mut end = STDERR_EXCERPT;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
