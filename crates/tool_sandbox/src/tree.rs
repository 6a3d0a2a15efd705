use std::fmt::Write as _;
use std::path::Path;

use ignore::WalkBuilder;

pub const DEFAULT_TREE_DEPTH: usize = 3;
const MAX_TREE_ENTRIES: usize = 200;

/// Indented directory outline of `root`, used to orient the model in the
/// system prompt. Honors ignore files and skips `.git`.
pub(crate) fn file_tree_summary(root: &Path, max_depth: usize) -> String {
    let walker = WalkBuilder::new(root)
        .max_depth(Some(max_depth))
        .hidden(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .sort_by_file_name(|left, right| left.cmp(right))
        .build();

    let root_name = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());
    let mut summary = format!("{root_name}/\n");
    let mut listed = 0_usize;
    let mut skipped = 0_usize;

    for entry in walker.filter_map(Result::ok) {
        if entry.depth() == 0 {
            continue;
        }
        if listed == MAX_TREE_ENTRIES {
            skipped += 1;
            continue;
        }

        let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
        let indent = "  ".repeat(entry.depth());
        let name = entry.file_name().to_string_lossy();
        let _ = writeln!(summary, "{indent}{name}{}", if is_dir { "/" } else { "" });
        listed += 1;
    }

    if skipped > 0 {
        let _ = writeln!(summary, "  ... ({skipped} more entries)");
    }
    summary
}
