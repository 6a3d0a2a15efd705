use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chat_provider::{ToolCall, ToolDefinition};
use thiserror::Error;

use crate::call::SandboxCall;
use crate::catalog::tool_definitions;
use crate::git::{run_git, truncate_to_byte_limit, GIT_MAX_OUTPUT_BYTES, GIT_TIMEOUT};
use crate::paths::{display_relative, resolve_existing, resolve_for_write};
use crate::search::search_literal;
use crate::tree::file_tree_summary;

/// Largest file `read_file` will return.
pub const READ_MAX_BYTES: u64 = 1024 * 1024;

/// Which operations a sandbox offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxFlavor {
    /// Read-only access to a plain project directory.
    Project,
    /// A git checkout: adds writes, search and git operations.
    Repository,
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to resolve sandbox root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("sandbox root {path} is not a directory")]
    NotADirectory { path: PathBuf },
}

/// Result of one tool call, always representable as a `tool` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub ok: bool,
    pub content: String,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            ok: true,
            content: content.into(),
        }
    }

    /// Failure readable by the model; content is prefixed with `Error:`.
    pub fn fail(message: impl AsRef<str>) -> Self {
        Self {
            ok: false,
            content: format!("Error: {}", message.as_ref()),
        }
    }
}

/// Host-side executor for model tool calls.
pub trait ToolExecutor: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Runs one call. Blocking; never panics on bad input.
    fn execute(&self, call: &ToolCall) -> ToolOutput;
}

#[derive(Debug, Clone)]
pub struct ToolSandbox {
    root: PathBuf,
    flavor: SandboxFlavor,
    git_timeout: Duration,
    git_max_output_bytes: usize,
}

impl ToolSandbox {
    /// Opens a sandbox on `root`, choosing the repository flavor when the
    /// root contains a `.git` entry.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SandboxError> {
        let root = canonical_root(root.into())?;
        let flavor = if root.join(".git").exists() {
            SandboxFlavor::Repository
        } else {
            SandboxFlavor::Project
        };
        Ok(Self::from_canonical(root, flavor))
    }

    pub fn with_flavor(root: impl Into<PathBuf>, flavor: SandboxFlavor) -> Result<Self, SandboxError> {
        Ok(Self::from_canonical(canonical_root(root.into())?, flavor))
    }

    fn from_canonical(root: PathBuf, flavor: SandboxFlavor) -> Self {
        Self {
            root,
            flavor,
            git_timeout: GIT_TIMEOUT,
            git_max_output_bytes: GIT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn flavor(&self) -> SandboxFlavor {
        self.flavor
    }

    /// Indented outline of the root, at most `max_depth` levels deep.
    pub fn file_tree_summary(&self, max_depth: usize) -> String {
        file_tree_summary(&self.root, max_depth)
    }

    /// Runs an already-decoded call.
    pub fn run(&self, call: SandboxCall) -> ToolOutput {
        if call.requires_repository() && self.flavor != SandboxFlavor::Repository {
            return ToolOutput::fail(format!(
                "{} is only available inside a git repository",
                call.name()
            ));
        }

        match call {
            SandboxCall::ReadFile { path } => self.read_file(&path),
            SandboxCall::ListFiles { path } => self.list_files(&path),
            SandboxCall::WriteFile { path, content } => self.write_file(&path, &content),
            SandboxCall::SearchCode { query, path } => self.search_code(&query, path.as_deref()),
            SandboxCall::GitStatus => self.git(&["status", "--short", "--branch"]),
            SandboxCall::GitDiff { path, staged } => self.git_diff(path.as_deref(), staged),
            SandboxCall::GitBranch => self.git(&["branch", "--no-color"]),
            SandboxCall::GitCommit { message } => self.git_commit(&message),
            SandboxCall::GitLog { limit } => {
                let limit = limit.to_string();
                self.git(&["log", "--oneline", "--no-color", "-n", &limit])
            }
        }
    }

    fn read_file(&self, path: &str) -> ToolOutput {
        let resolved = match resolve_existing(&self.root, path) {
            Ok(resolved) => resolved,
            Err(error) => return ToolOutput::fail(error),
        };

        let metadata = match fs::metadata(&resolved) {
            Ok(metadata) => metadata,
            Err(error) => return ToolOutput::fail(format!("Failed to read {path}: {error}")),
        };
        if metadata.is_dir() {
            return ToolOutput::fail(format!("{path} is a directory, not a file"));
        }
        if metadata.len() > READ_MAX_BYTES {
            return ToolOutput::fail(format!(
                "File too large: {path} is {} bytes, the limit is {READ_MAX_BYTES} bytes",
                metadata.len()
            ));
        }

        match fs::read(&resolved) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(content) => ToolOutput::ok(content),
                Err(_) => ToolOutput::fail(format!("{path} is not valid UTF-8 text")),
            },
            Err(error) => ToolOutput::fail(format!("Failed to read {path}: {error}")),
        }
    }

    fn list_files(&self, path: &str) -> ToolOutput {
        let resolved = match resolve_existing(&self.root, path) {
            Ok(resolved) => resolved,
            Err(error) => return ToolOutput::fail(error),
        };
        if !resolved.is_dir() {
            return ToolOutput::fail(format!("{path} is not a directory"));
        }

        let entries = match fs::read_dir(&resolved) {
            Ok(entries) => entries,
            Err(error) => return ToolOutput::fail(format!("Failed to list {path}: {error}")),
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        names.sort();

        if names.is_empty() {
            return ToolOutput::ok("(empty directory)");
        }
        ToolOutput::ok(names.join("\n"))
    }

    fn write_file(&self, path: &str, content: &str) -> ToolOutput {
        let resolved = match resolve_for_write(&self.root, path) {
            Ok(resolved) => resolved,
            Err(error) => return ToolOutput::fail(error),
        };
        if resolved.is_dir() {
            return ToolOutput::fail(format!("{path} is a directory, not a file"));
        }

        if let Some(parent) = resolved.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                return ToolOutput::fail(format!(
                    "Failed to create parent directories for {path}: {error}"
                ));
            }
        }

        match fs::write(&resolved, content) {
            Ok(()) => ToolOutput::ok(format!(
                "Wrote {} bytes to {}",
                content.len(),
                display_relative(&self.root, &resolved)
            )),
            Err(error) => ToolOutput::fail(format!("Failed to write {path}: {error}")),
        }
    }

    fn search_code(&self, query: &str, path: Option<&str>) -> ToolOutput {
        if query.is_empty() {
            return ToolOutput::fail("query must not be empty");
        }

        let start = match path {
            Some(path) => match resolve_existing(&self.root, path) {
                Ok(start) => start,
                Err(error) => return ToolOutput::fail(error),
            },
            None => self.root.clone(),
        };

        ToolOutput::ok(search_literal(&self.root, &start, query))
    }

    fn git_diff(&self, path: Option<&str>, staged: bool) -> ToolOutput {
        // Deleted files have no canonical form, so only anchor the parent.
        let relative = match path.map(|path| resolve_for_write(&self.root, path)) {
            Some(Ok(resolved)) => Some(display_relative(&self.root, &resolved)),
            Some(Err(error)) => return ToolOutput::fail(error),
            None => None,
        };

        let mut args = vec!["diff", "--no-color"];
        if staged {
            args.push("--staged");
        }
        if let Some(relative) = relative.as_deref() {
            args.push("--");
            args.push(relative);
        }

        self.git(&args)
    }

    fn git_commit(&self, message: &str) -> ToolOutput {
        if message.trim().is_empty() {
            return ToolOutput::fail("Commit message must not be empty");
        }

        let staged = self.git(&["add", "--all"]);
        if !staged.ok {
            return staged;
        }
        self.git(&["commit", "-m", message])
    }

    fn git(&self, args: &[&str]) -> ToolOutput {
        match run_git(&self.root, args, self.git_timeout) {
            Ok(output) if output.success => {
                let text = if output.stdout.trim().is_empty() {
                    "(no output)".to_string()
                } else {
                    output.stdout
                };
                ToolOutput::ok(truncate_to_byte_limit(text, self.git_max_output_bytes))
            }
            Ok(output) => ToolOutput::fail(truncate_to_byte_limit(
                format!(
                    "git {} failed ({}): {}",
                    args.first().copied().unwrap_or_default(),
                    output.status,
                    output.stderr.trim()
                ),
                self.git_max_output_bytes,
            )),
            Err(error) => ToolOutput::fail(error),
        }
    }
}

impl ToolExecutor for ToolSandbox {
    fn definitions(&self) -> Vec<ToolDefinition> {
        tool_definitions(self.flavor)
    }

    fn execute(&self, call: &ToolCall) -> ToolOutput {
        let output = match SandboxCall::decode(&call.name, &call.arguments) {
            Ok(decoded) => self.run(decoded),
            Err(error) => ToolOutput::fail(error),
        };
        tracing::debug!(tool = %call.name, ok = output.ok, bytes = output.content.len(), "tool call finished");
        output
    }
}

fn canonical_root(root: PathBuf) -> Result<PathBuf, SandboxError> {
    let canonical = root
        .canonicalize()
        .map_err(|source| SandboxError::Root {
            path: root.clone(),
            source,
        })?;
    if !canonical.is_dir() {
        return Err(SandboxError::NotADirectory { path: canonical });
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_output_is_prefixed() {
        let output = ToolOutput::fail("nope");
        assert!(!output.ok);
        assert_eq!(output.content, "Error: nope");
    }

    #[test]
    fn missing_root_is_an_error() {
        let error = ToolSandbox::new("/definitely/not/here").expect_err("missing root");
        assert!(matches!(error, SandboxError::Root { .. }));
    }
}
