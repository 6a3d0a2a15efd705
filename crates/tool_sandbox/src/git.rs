use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use wait_timeout::ChildExt;

pub(crate) const GIT_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const GIT_MAX_OUTPUT_BYTES: usize = 100 * 1024;

/// Finished git invocation.
#[derive(Debug)]
pub(crate) struct GitOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `git <args>` inside `root`, killing it once `timeout` elapses.
pub(crate) fn run_git(root: &Path, args: &[&str], timeout: Duration) -> Result<GitOutput, String> {
    let mut child = Command::new("git")
        .arg("--no-pager")
        .args(args)
        .current_dir(root)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| format!("Failed to launch git: {error}"))?;

    // Drain both pipes while waiting so a chatty command cannot fill them and stall.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(format!(
                "git {} timed out after {}s",
                args.first().copied().unwrap_or_default(),
                timeout.as_secs()
            ));
        }
        Err(error) => {
            let _ = child.kill();
            return Err(format!("Failed waiting for git: {error}"));
        }
    };

    Ok(GitOutput {
        success: status.success(),
        status: format_exit_status(status),
        stdout: String::from_utf8_lossy(&join(stdout)).into_owned(),
        stderr: String::from_utf8_lossy(&join(stderr)).into_owned(),
    })
}

pub(crate) fn truncate_to_byte_limit(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !content.is_char_boundary(cutoff) {
        cutoff -= 1;
    }

    let mut truncated = content[..cutoff].to_string();
    truncated.push_str("\n[truncated]");
    truncated
}

fn drain(pipe: Option<impl Read + Send + 'static>) -> Option<thread::JoinHandle<Vec<u8>>> {
    let mut pipe = pipe?;
    Some(thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = pipe.read_to_end(&mut bytes);
        bytes
    }))
}

fn join(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn format_exit_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit_code={code}"),
        None => "exit_code=terminated_by_signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_keeps_char_boundaries() {
        let content = "é".repeat(10);
        let truncated = truncate_to_byte_limit(content, 5);
        assert_eq!(truncated, "éé\n[truncated]");
    }

    #[test]
    fn short_output_is_untouched() {
        assert_eq!(truncate_to_byte_limit("ok".to_string(), 10), "ok");
    }
}
