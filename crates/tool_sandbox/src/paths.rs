use std::fs;
use std::path::{Component, Path, PathBuf};

/// Joins `raw` onto `root` without touching the filesystem, refusing any
/// path that climbs above the root or names a different absolute location.
pub(crate) fn lexically_confined(root: &Path, raw: &str) -> Result<PathBuf, String> {
    if raw.trim().is_empty() {
        return Err("Path must not be empty".to_string());
    }

    let requested = Path::new(raw);
    let relative = if requested.is_absolute() {
        requested.strip_prefix(root).map_err(|_| access_denied(raw))?
    } else {
        requested
    };

    let mut normalized = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(access_denied(raw));
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(access_denied(raw)),
        }
    }

    Ok(root.join(normalized))
}

/// Resolves an existing path, following symlinks, and re-checks confinement.
pub(crate) fn resolve_existing(root: &Path, raw: &str) -> Result<PathBuf, String> {
    let candidate = lexically_confined(root, raw)?;
    let canonical = candidate
        .canonicalize()
        .map_err(|error| format!("Failed to resolve path {raw}: {error}"))?;

    ensure_inside(root, &canonical, raw)?;
    Ok(canonical)
}

/// Resolves a path that may not exist yet by anchoring on its nearest
/// existing ancestor.
pub(crate) fn resolve_for_write(root: &Path, raw: &str) -> Result<PathBuf, String> {
    let candidate = lexically_confined(root, raw)?;
    if candidate == root {
        return Err(format!("Path {raw} names the root directory"));
    }

    let parent = candidate
        .parent()
        .ok_or_else(|| format!("Path {raw} has no parent directory"))?;
    let anchor = canonicalize_existing_ancestor(parent)?;
    ensure_inside(root, &anchor, raw)?;

    // `exists()` follows links, so a dangling symlink would slip past it.
    if let Ok(metadata) = fs::symlink_metadata(&candidate) {
        let canonical = match candidate.canonicalize() {
            Ok(canonical) => canonical,
            Err(_) if metadata.file_type().is_symlink() => {
                tracing::warn!(path = raw, "sandbox denied dangling symlink");
                return Err(access_denied(raw));
            }
            Err(error) => return Err(format!("Failed to resolve path {raw}: {error}")),
        };
        ensure_inside(root, &canonical, raw)?;
    }

    Ok(candidate)
}

pub(crate) fn ensure_inside(root: &Path, canonical: &Path, raw: &str) -> Result<(), String> {
    if canonical.starts_with(root) {
        Ok(())
    } else {
        tracing::warn!(path = raw, "sandbox denied path outside root");
        Err(access_denied(raw))
    }
}

/// Path relative to `root` for messages shown to the model.
pub(crate) fn display_relative(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) if relative.as_os_str().is_empty() => ".".to_string(),
        Ok(relative) => relative.to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

fn canonicalize_existing_ancestor(path: &Path) -> Result<PathBuf, String> {
    for ancestor in path.ancestors() {
        // A dangling symlinked directory fails to canonicalize here instead
        // of being skipped over.
        if fs::symlink_metadata(ancestor).is_ok() {
            return ancestor.canonicalize().map_err(|error| {
                format!("Failed to resolve path {}: {error}", ancestor.display())
            });
        }
    }

    Err(format!(
        "No existing ancestor found for path {}",
        path.display()
    ))
}

fn access_denied(raw: &str) -> String {
    format!("Access denied: {raw} is outside the project root")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_components_inside_root_are_folded() {
        let root = Path::new("/srv/project");
        assert_eq!(
            lexically_confined(root, "src/../Cargo.toml").expect("inside root"),
            PathBuf::from("/srv/project/Cargo.toml")
        );
        assert_eq!(
            lexically_confined(root, "./").expect("root itself"),
            PathBuf::from("/srv/project")
        );
    }

    #[test]
    fn climbing_above_root_is_denied() {
        let root = Path::new("/srv/project");
        for raw in ["../../etc/passwd", "..", "src/../../secret"] {
            let error = lexically_confined(root, raw).expect_err("must be denied");
            assert!(error.starts_with("Access denied"), "{raw}: {error}");
        }
    }

    #[test]
    fn absolute_paths_must_live_under_root() {
        let root = Path::new("/srv/project");
        assert!(lexically_confined(root, "/etc/passwd").is_err());
        assert_eq!(
            lexically_confined(root, "/srv/project/src").expect("absolute inside root"),
            PathBuf::from("/srv/project/src")
        );
    }

    #[test]
    fn empty_path_is_rejected() {
        assert_eq!(
            lexically_confined(Path::new("/srv"), "  ").expect_err("empty"),
            "Path must not be empty"
        );
    }

    #[test]
    fn display_relative_uses_dot_for_root() {
        let root = Path::new("/srv/project");
        assert_eq!(display_relative(root, root), ".");
        assert_eq!(display_relative(root, &root.join("a/b.rs")), "a/b.rs");
    }
}
