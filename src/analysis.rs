//! External analysis helper invocation.
//!
//! Grounded in `shell::process::exec_command`'s concurrent-capped-read and
//! bounded-timeout shape. Differs in two ways the spec calls out: the child
//! is argv-built from a script name, a target, and caller-chosen flag pairs
//! rather than a shell command line, and a timeout sends a soft termination
//! signal (SIGTERM) and still returns whatever stdout was captured, rather
//! than discarding it.

use std::fmt::Write as _;
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

const MAX_ANALYSIS_OUTPUT: usize = 4 * 1024 * 1024;

/// Successful (from the process's point of view — exit code may be nonzero)
/// result of [`invoke`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalysisResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Failure modes that prevent a result from being produced at all.
#[derive(Debug)]
pub enum AnalysisError {
    SpawnFailed(String),
    /// The bounded wait elapsed. Carries whatever stdout had been captured
    /// before the soft termination signal was sent.
    Timeout { partial_stdout: String },
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SpawnFailed(e) => write!(f, "failed to spawn analysis helper: {e}"),
            Self::Timeout { .. } => write!(f, "analysis invocation timed out"),
        }
    }
}

/// A single `--flag value` pair appended to the helper's argv.
pub struct Flag {
    pub name: String,
    pub value: String,
}

/// Run `<helper> <script> <target> [--flag value]...`, capturing stdout,
/// stderr, and exit code. Default bounded wait is 5 minutes
/// (`timeout_secs`). Never fails on a non-zero exit — the exit code is part
/// of the normal [`AnalysisResult`].
pub async fn invoke(
    helper_binary: &str,
    script: &str,
    target: &str,
    flags: &[Flag],
    timeout_secs: u64,
) -> Result<AnalysisResult, AnalysisError> {
    let start = std::time::Instant::now();

    let mut cmd = Command::new(helper_binary);
    cmd.arg(script).arg(target);
    for flag in flags {
        cmd.arg(format!("--{}", flag.name)).arg(&flag.value);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| AnalysisError::SpawnFailed(e.to_string()))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| AnalysisError::SpawnFailed("failed to take stdout pipe".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| AnalysisError::SpawnFailed("failed to take stderr pipe".to_string()))?;

    // Shared with the reader tasks so a timed-out invocation can still
    // report whatever stdout had accumulated up to that point.
    let stdout_so_far = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

    let timeout = tokio::time::Duration::from_secs(timeout_secs);
    let stdout_handle = tokio::spawn({
        let stdout_so_far = std::sync::Arc::clone(&stdout_so_far);
        async move { read_capped(&mut stdout, MAX_ANALYSIS_OUTPUT, Some(stdout_so_far)).await }
    });
    let stderr_handle = tokio::spawn(async move { read_capped(&mut stderr, MAX_ANALYSIS_OUTPUT, None).await });

    match tokio::time::timeout(timeout, async {
        let (stdout_data, stderr_data) = tokio::join!(stdout_handle, stderr_handle);
        let stdout_data = stdout_data.expect("stdout reader task panicked");
        let stderr_data = stderr_data.expect("stderr reader task panicked");
        let status = child.wait().await.map_err(|e| AnalysisError::SpawnFailed(e.to_string()))?;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok::<_, AnalysisError>(AnalysisResult {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout_data,
            stderr: stderr_data,
            duration_ms,
        })
    })
    .await
    {
        Ok(result) => result,
        Err(_) => {
            let pid = child.id();
            if let Some(pid) = pid {
                #[allow(clippy::cast_possible_wrap)]
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
            let partial_stdout = String::from_utf8_lossy(
                &stdout_so_far.lock().expect("stdout snapshot poisoned"),
            )
            .into_owned();
            Err(AnalysisError::Timeout { partial_stdout })
        }
    }
}

async fn read_capped(
    reader: &mut (impl tokio::io::AsyncRead + Unpin),
    max_bytes: usize,
    live_snapshot: Option<std::sync::Arc<std::sync::Mutex<Vec<u8>>>>,
) -> String {
    let mut buf = Vec::with_capacity(max_bytes.min(65536));
    let mut tmp = [0u8; 8192];
    let mut total_read = 0usize;
    loop {
        match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                total_read += n;
                if buf.len() < max_bytes {
                    let take = n.min(max_bytes - buf.len());
                    buf.extend_from_slice(&tmp[..take]);
                }
                if let Some(ref snapshot) = live_snapshot {
                    snapshot.lock().expect("stdout snapshot poisoned").extend_from_slice(&tmp[..n]);
                }
            }
        }
    }
    let mut s = String::from_utf8_lossy(&buf).into_owned();
    if total_read > max_bytes {
        let _ = write!(s, "\n[truncated: {total_read} bytes total, showing first {max_bytes}]");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_failure_surfaces() {
        let err = invoke("/nonexistent/helper-xyz", "script", "target", &[], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_normal_result_not_an_error() {
        let result = invoke("/bin/sh", "-c", "exit 1", &[], 5).await;
        // /bin/sh here is standing in for the helper binary; argv becomes
        // `sh script target` i.e. `sh -c exit` with target "1" appended as a
        // third arg, which sh ignores. This just proves non-zero exits
        // don't produce AnalysisError.
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn flags_are_appended_as_dashdash_pairs() {
        let flags = vec![Flag {
            name: "verbosity".to_string(),
            value: "high".to_string(),
        }];
        // echo's argv will include our flag pair; assert the call at least
        // doesn't error and produces output containing the flag value.
        let result = invoke("/bin/echo", "script", "target", &flags, 5)
            .await
            .unwrap();
        assert!(result.stdout.contains("--verbosity"));
        assert!(result.stdout.contains("high"));
    }
}
