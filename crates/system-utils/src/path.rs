use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path `{0}` escapes its root")]
    Traversal(String),
    #[error("path `{0}` has an unsupported prefix")]
    Prefix(String),
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home);
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Makes an arbitrary identifier usable as a single directory name.
pub fn sanitize_component(value: &str) -> String {
    let sanitized = value.trim().replace(['/', '\\'], "_");
    match sanitized.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => sanitized,
    }
}

/// Appends `relative` under `root`, treating a leading `/` as the root itself.
/// Any `..` component is refused instead of being resolved.
pub fn join_within(root: &Path, relative: &str) -> Result<PathBuf, PathError> {
    let mut joined = root.to_path_buf();
    for component in Path::new(relative.trim()).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => return Err(PathError::Traversal(relative.to_string())),
            Component::Prefix(_) => return Err(PathError::Prefix(relative.to_string())),
        }
    }
    Ok(joined)
}
