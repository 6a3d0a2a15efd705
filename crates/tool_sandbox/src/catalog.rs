use chat_provider::ToolDefinition;
use serde_json::{json, Value};

use crate::sandbox::SandboxFlavor;

/// Tool definitions offered to the model for one sandbox flavor.
pub fn tool_definitions(flavor: SandboxFlavor) -> Vec<ToolDefinition> {
    let mut tools = vec![
        define(
            "read_file",
            "Read a UTF-8 text file relative to the project root.",
            object(json!({"path": string("File path relative to the project root.")}), &["path"]),
        ),
        define(
            "list_files",
            "List the entries of a directory relative to the project root.",
            object(
                json!({"path": string("Directory path relative to the project root. Defaults to the root.")}),
                &[],
            ),
        ),
    ];

    if flavor == SandboxFlavor::Repository {
        tools.extend([
            define(
                "write_file",
                "Create or overwrite a text file relative to the repository root.",
                object(
                    json!({
                        "path": string("File path relative to the repository root."),
                        "content": string("Full new file content."),
                    }),
                    &["path", "content"],
                ),
            ),
            define(
                "search_code",
                "Search tracked text files for a literal string.",
                object(
                    json!({
                        "query": string("Literal text to find."),
                        "path": string("Optional directory to limit the search to."),
                    }),
                    &["query"],
                ),
            ),
            define("git_status", "Show the working tree status.", object(json!({}), &[])),
            define(
                "git_diff",
                "Show unstaged changes, or staged changes when staged is true.",
                object(
                    json!({
                        "path": string("Optional path to limit the diff to."),
                        "staged": {"type": "boolean", "description": "Diff the index instead of the working tree."},
                    }),
                    &[],
                ),
            ),
            define("git_branch", "List local branches.", object(json!({}), &[])),
            define(
                "git_commit",
                "Stage all changes and commit them with the given message.",
                object(json!({"message": string("Commit message.")}), &["message"]),
            ),
            define(
                "git_log",
                "Show recent commits, one per line.",
                object(
                    json!({"limit": {"type": "integer", "description": "Number of commits (1-100, default 10)."}}),
                    &[],
                ),
            ),
        ]);
    }

    tools
}

fn define(name: &str, description: &str, parameters: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn string(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(flavor: SandboxFlavor) -> Vec<String> {
        tool_definitions(flavor)
            .into_iter()
            .map(|tool| tool.name)
            .collect()
    }

    #[test]
    fn project_flavor_only_reads() {
        assert_eq!(names(SandboxFlavor::Project), vec!["read_file", "list_files"]);
    }

    #[test]
    fn repository_flavor_adds_write_search_and_git() {
        let names = names(SandboxFlavor::Repository);
        for expected in [
            "write_file",
            "search_code",
            "git_status",
            "git_diff",
            "git_branch",
            "git_commit",
            "git_log",
        ] {
            assert!(names.iter().any(|name| name == expected), "missing {expected}");
        }
    }

    #[test]
    fn schemas_declare_required_fields() {
        let read = tool_definitions(SandboxFlavor::Project)
            .into_iter()
            .find(|tool| tool.name == "read_file")
            .expect("read_file definition");
        assert_eq!(read.parameters["required"], json!(["path"]));
        assert_eq!(read.parameters["type"], "object");
    }
}
