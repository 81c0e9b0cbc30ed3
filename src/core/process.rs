use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("`{0}` is not on PATH")]
    NotFound(String),
    #[error("`{0}` timed out")]
    TimedOut(String),
    #[error("failed to execute `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("non-UTF8 output from `{0}`")]
    NonUtf8(String),
}

/// Run a helper CLI and return its trimmed stdout. The child never sees a
/// terminal on stdin and is killed if the timeout fires.
pub async fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<String, CommandError> {
    if which(program).is_none() {
        return Err(CommandError::NotFound(program.to_string()));
    }

    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| CommandError::TimedOut(program.to_string()))?
        .map_err(|source| CommandError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(CommandError::Failed {
            program: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout =
        String::from_utf8(output.stdout).map_err(|_| CommandError::NonUtf8(program.to_string()))?;
    Ok(stdout.trim().to_string())
}

/// Check if a binary exists in PATH. Returns the full path if found.
pub fn which(binary: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(binary))
            .find(|p| p.is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn which_returns_none_for_nonexistent() {
        assert!(which("totally_nonexistent_binary_xyz").is_none());
    }

    #[tokio::test]
    async fn stdout_is_trimmed() {
        let result = run_command("echo", &["  gho_token  "], Duration::from_secs(5)).await;
        assert_eq!(result.unwrap(), "gho_token");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let result = run_command("false", &[], Duration::from_secs(5)).await;
        assert!(matches!(result, Err(CommandError::Failed { .. })));
    }

    #[tokio::test]
    async fn missing_program_is_not_spawned() {
        let result = run_command("totally_nonexistent_binary_xyz", &[], Duration::from_secs(5)).await;
        assert!(matches!(result, Err(CommandError::NotFound(_))));
    }

    #[tokio::test]
    async fn slow_program_times_out() {
        let result = run_command("sleep", &["5"], Duration::from_millis(50)).await;
        assert!(matches!(result, Err(CommandError::TimedOut(_))));
    }
}
