use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

const DEFAULT_LOG_LIMIT: u32 = 10;
const MAX_LOG_LIMIT: u32 = 100;

/// Typed form of one model-issued tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxCall {
    ReadFile { path: String },
    ListFiles { path: String },
    WriteFile { path: String, content: String },
    SearchCode { query: String, path: Option<String> },
    GitStatus,
    GitDiff { path: Option<String>, staged: bool },
    GitBranch,
    GitCommit { message: String },
    GitLog { limit: u32 },
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct ListArgs {
    #[serde(default = "current_dir")]
    path: String,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Deserialize)]
struct DiffArgs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    staged: bool,
}

#[derive(Deserialize)]
struct CommitArgs {
    message: String,
}

#[derive(Deserialize)]
struct LogArgs {
    #[serde(default)]
    limit: Option<u32>,
}

fn current_dir() -> String {
    ".".to_string()
}

impl SandboxCall {
    /// Decodes a tool name plus its untyped argument payload.
    ///
    /// Arguments may arrive as an object, as `null`, or as a JSON-encoded
    /// string holding an object. The error string is meant for the model.
    pub fn decode(name: &str, arguments: &Value) -> Result<Self, String> {
        let arguments = normalize_arguments(arguments)?;

        Ok(match name {
            "read_file" => {
                let args: PathArgs = typed(name, arguments)?;
                Self::ReadFile { path: args.path }
            }
            "list_files" => {
                let args: ListArgs = typed(name, arguments)?;
                Self::ListFiles { path: args.path }
            }
            "write_file" => {
                let args: WriteArgs = typed(name, arguments)?;
                Self::WriteFile {
                    path: args.path,
                    content: args.content,
                }
            }
            "search_code" => {
                let args: SearchArgs = typed(name, arguments)?;
                Self::SearchCode {
                    query: args.query,
                    path: args.path,
                }
            }
            "git_status" => Self::GitStatus,
            "git_diff" => {
                let args: DiffArgs = typed(name, arguments)?;
                Self::GitDiff {
                    path: args.path,
                    staged: args.staged,
                }
            }
            "git_branch" => Self::GitBranch,
            "git_commit" => {
                let args: CommitArgs = typed(name, arguments)?;
                Self::GitCommit {
                    message: args.message,
                }
            }
            "git_log" => {
                let args: LogArgs = typed(name, arguments)?;
                Self::GitLog {
                    limit: args
                        .limit
                        .unwrap_or(DEFAULT_LOG_LIMIT)
                        .clamp(1, MAX_LOG_LIMIT),
                }
            }
            other => return Err(format!("Unknown tool: {other}")),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => "read_file",
            Self::ListFiles { .. } => "list_files",
            Self::WriteFile { .. } => "write_file",
            Self::SearchCode { .. } => "search_code",
            Self::GitStatus => "git_status",
            Self::GitDiff { .. } => "git_diff",
            Self::GitBranch => "git_branch",
            Self::GitCommit { .. } => "git_commit",
            Self::GitLog { .. } => "git_log",
        }
    }

    /// True for operations only offered inside a source-control checkout.
    pub fn requires_repository(&self) -> bool {
        !matches!(self, Self::ReadFile { .. } | Self::ListFiles { .. })
    }
}

fn normalize_arguments(arguments: &Value) -> Result<Value, String> {
    match arguments {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(arguments.clone()),
        Value::String(encoded) if encoded.trim().is_empty() => Ok(Value::Object(Map::new())),
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => Ok(Value::Object(map)),
            _ => Err("Tool arguments must be a JSON object".to_string()),
        },
        _ => Err("Tool arguments must be a JSON object".to_string()),
    }
}

fn typed<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, String> {
    serde_json::from_value(arguments).map_err(|error| format!("Invalid arguments for {tool}: {error}"))
}
