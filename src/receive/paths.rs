//! Destination path resolution
//!
//! Upload paths arrive as `/`-separated segments relative to the served
//! root. Only plain names are accepted; anything that could step outside
//! the root is refused before the connection is upgraded.

use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// A validated upload destination under the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Final location of the file
    pub path: PathBuf,
    /// Existing directory that will hold it
    pub parent: PathBuf,
    /// File name (last segment)
    pub name: String,
}

impl UploadTarget {
    /// Scratch file written during the upload, next to the destination so
    /// the final rename stays on one filesystem
    pub fn temp_path(&self) -> PathBuf {
        self.parent
            .join(format!(".{}.{}.part", self.name, uuid::Uuid::new_v4().simple()))
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
        && !Path::new(segment).has_root()
}

/// Resolve `path` (as captured from the URL) under `root`
pub async fn resolve_destination(root: &Path, path: &str) -> Result<UploadTarget> {
    let path = path.strip_prefix('/').unwrap_or(path);
    if path.is_empty() {
        return Err(AppError::BadRequest("missing destination path".to_string()));
    }

    let segments: Vec<&str> = path.split('/').collect();
    if let Some(bad) = segments.iter().find(|s| !is_plain_segment(s)) {
        return Err(AppError::Forbidden((*bad).to_string()));
    }

    let (name, dirs) = segments
        .split_last()
        .ok_or_else(|| AppError::BadRequest("missing destination path".to_string()))?;

    let mut parent = root.to_path_buf();
    for dir in dirs {
        parent.push(dir);
        match tokio::fs::metadata(&parent).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(AppError::NotFound((*dir).to_string())),
        }
    }

    // Symlinked directories must still land under the root
    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|_| AppError::NotFound(root.display().to_string()))?;
    let parent = tokio::fs::canonicalize(&parent)
        .await
        .map_err(|_| AppError::NotFound(path.to_string()))?;
    if !parent.starts_with(&root) {
        return Err(AppError::Forbidden(path.to_string()));
    }

    let target = parent.join(name);
    if let Ok(meta) = tokio::fs::metadata(&target).await {
        if meta.is_dir() {
            return Err(AppError::Forbidden((*name).to_string()));
        }
    }

    Ok(UploadTarget {
        path: target,
        parent,
        name: (*name).to_string(),
    })
}
