//! Atomic JSON materialization and sandbox path safety.

use crate::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Serialize `value` with sorted keys and write it atomically: serialize to
/// `<path>.tmp`, then rename over `path`.
///
/// The value is routed through `serde_json::Value` so object keys land in
/// sorted order regardless of struct field order.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let value = serde_json::to_value(value)
        .map_err(|e| StoreError::Serialize { path: path.to_path_buf(), source: e })?;
    let mut body = serde_json::to_string_pretty(&value)
        .map_err(|e| StoreError::Serialize { path: path.to_path_buf(), source: e })?;
    body.push('\n');

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::fs(parent, e))?;
    }
    let tmp_path = PathBuf::from(format!("{}.tmp", path.display()));
    fs::write(&tmp_path, body).map_err(|e| StoreError::fs(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| StoreError::fs(path, e))?;
    Ok(())
}

/// Read a JSON document if the file exists. Missing files return None; an
/// unreadable or unparseable file returns None with a warning.
pub fn read_json_if_exists(path: &Path) -> Option<Value> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable artifact; treating as absent");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unparseable artifact; treating as absent");
            None
        }
    }
}

/// Read and deserialize a JSON document if present and well-shaped.
pub fn read_json_as<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let value = read_json_if_exists(path)?;
    match serde_json::from_value(value) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "artifact has unexpected shape; treating as absent");
            None
        }
    }
}

/// Resolve a path for containment checks: canonicalize when the path
/// exists; otherwise fold `.`/`..` lexically and canonicalize the deepest
/// existing ancestor so symlinked roots still compare correctly.
fn resolve_for_containment(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")).join(path)
    };
    let mut lexical = PathBuf::new();
    for component in absolute.components() {
        use std::path::Component::*;
        match component {
            CurDir => {}
            ParentDir => {
                lexical.pop();
            }
            other => lexical.push(other.as_os_str()),
        }
    }

    let mut current = lexical.as_path();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    loop {
        if let Ok(resolved) = fs::canonicalize(current) {
            let mut out = resolved;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                current = parent;
            }
            _ => return lexical,
        }
    }
}

/// True when `path` resolves to `root` or a descendant of it.
pub fn ensure_under(path: &Path, root: &Path) -> bool {
    let path = resolve_for_containment(path);
    let root = resolve_for_containment(root);
    path.starts_with(&root)
}

/// POSIX-normalized relative path of `path` under `root`, or PathEscape.
pub fn safe_relpath(path: &Path, root: &Path) -> Result<String, StoreError> {
    let resolved = resolve_for_containment(path);
    let resolved_root = resolve_for_containment(root);
    let rel = resolved
        .strip_prefix(&resolved_root)
        .map_err(|_| StoreError::PathEscape {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_sorts_keys_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &json!({"zeta": 1, "alpha": {"b": 2, "a": 1}})).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let alpha = raw.find("\"alpha\"").unwrap();
        let zeta = raw.find("\"zeta\"").unwrap();
        assert!(alpha < zeta, "keys must be sorted: {raw}");
        assert!(raw.ends_with('\n'));
        assert!(!dir.path().join("doc.json.tmp").exists());
    }

    #[test]
    fn atomic_write_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &json!({"v": 1})).unwrap();
        write_json_atomic(&path, &json!({"v": 2})).unwrap();
        let doc = read_json_if_exists(&path).unwrap();
        assert_eq!(doc["v"], 2);
    }

    #[test]
    fn missing_and_garbage_reads_are_none() {
        let dir = TempDir::new().unwrap();
        assert!(read_json_if_exists(&dir.path().join("nope.json")).is_none());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{not json").unwrap();
        assert!(read_json_if_exists(&bad).is_none());
    }

    #[test]
    fn relpath_inside_root() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b.txt");
        fs::create_dir_all(nested.parent().unwrap()).unwrap();
        fs::write(&nested, "x").unwrap();
        assert_eq!(safe_relpath(&nested, dir.path()).unwrap(), "a/b.txt");
    }

    #[test]
    fn relpath_escape_is_rejected() {
        let dir = TempDir::new().unwrap();
        let outside = dir.path().join("..").join("elsewhere.txt");
        let err = safe_relpath(&outside, dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::PathEscape { .. }));
    }

    #[test]
    fn ensure_under_handles_traversal_and_nonexistent() {
        let dir = TempDir::new().unwrap();
        let inside = dir.path().join("sub").join("file");
        assert!(ensure_under(&inside, dir.path()));
        assert!(ensure_under(dir.path(), dir.path()));

        let sneaky = dir.path().join("sub").join("..").join("..").join("out");
        assert!(!ensure_under(&sneaky, dir.path()));
    }
}
