use std::fs;
use std::path::Path;

use ignore::WalkBuilder;

use crate::paths::display_relative;
use crate::sandbox::READ_MAX_BYTES;

pub(crate) const MAX_SEARCH_MATCHES: usize = 50;
const MAX_LINE_CHARS: usize = 200;

/// Literal, case-sensitive search over text files under `start`, honoring
/// ignore files. Results are reported relative to `root`.
pub(crate) fn search_literal(root: &Path, start: &Path, query: &str) -> String {
    let walker = WalkBuilder::new(start)
        .hidden(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .sort_by_file_name(|left, right| left.cmp(right))
        .build();

    let mut matches = Vec::new();
    let mut truncated = false;

    'files: for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }
        let too_large = entry
            .metadata()
            .is_ok_and(|metadata| metadata.len() > READ_MAX_BYTES);
        if too_large {
            continue;
        }
        let Ok(text) = fs::read_to_string(entry.path()) else {
            continue;
        };

        let relative = display_relative(root, entry.path());
        for (index, line) in text.lines().enumerate() {
            if !line.contains(query) {
                continue;
            }
            if matches.len() == MAX_SEARCH_MATCHES {
                truncated = true;
                break 'files;
            }
            matches.push(format!(
                "{relative}:{}: {}",
                index + 1,
                clip(line.trim())
            ));
        }
    }

    if matches.is_empty() {
        return format!("No matches for '{query}'");
    }

    let mut output = matches.join("\n");
    if truncated {
        output.push_str(&format!(
            "\n[truncated: showing the first {MAX_SEARCH_MATCHES} matches]"
        ));
    }
    output
}

fn clip(line: &str) -> String {
    if line.chars().count() <= MAX_LINE_CHARS {
        return line.to_string();
    }
    let mut clipped: String = line.chars().take(MAX_LINE_CHARS).collect();
    clipped.push_str("...");
    clipped
}
