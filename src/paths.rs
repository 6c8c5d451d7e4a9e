//! Portable Path Helpers
//!
//! Knowledge files must be diff-stable across machines, so section headings
//! and footers never embed absolute paths. Paths under the project root are
//! rendered with a `{PROJECT_ROOT}` variable; paths outside it fall back to
//! their final component.

use std::path::{Path, PathBuf};

/// Path variable used in generated knowledge files
pub const PROJECT_ROOT_VAR: &str = "{PROJECT_ROOT}";

/// Render `path` relative to `project_root` using the portable variable.
///
/// The project root itself renders as `{PROJECT_ROOT}`; descendants render as
/// `{PROJECT_ROOT}/relative/path` with forward slashes on every platform.
pub fn portable_path(path: &Path, project_root: &Path) -> String {
    match path.strip_prefix(project_root) {
        Ok(rel) if rel.as_os_str().is_empty() => PROJECT_ROOT_VAR.to_string(),
        Ok(rel) => format!("{}/{}", PROJECT_ROOT_VAR, slashed(rel)),
        Err(_) => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned()),
    }
}

/// Like [`portable_path`] but with a trailing `/`, marking a directory.
pub fn portable_dir_path(path: &Path, project_root: &Path) -> String {
    let mut rendered = portable_path(path, project_root);
    if !rendered.ends_with('/') {
        rendered.push('/');
    }
    rendered
}

/// Relative path of `path` under `root`, or `None` when `path` escapes `root`.
pub fn relative_to(path: &Path, root: &Path) -> Option<PathBuf> {
    path.strip_prefix(root).ok().map(|p| p.to_path_buf())
}

/// Forward-slash rendering of a relative path
pub fn slashed(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
