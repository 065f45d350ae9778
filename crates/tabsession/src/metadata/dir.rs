use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{MetadataSource, WindowMetadata};
use crate::error::{Error, Result};

/// Window metadata stored as one file per window type under a directory tree.
///
/// Files are `<windowTypeId>.toml` or `<windowTypeId>.json`; a missing `id`
/// inside the file defaults to the file stem.
#[derive(Debug, Clone)]
pub struct DirMetadataSource {
    root: PathBuf,
    files: BTreeMap<String, PathBuf>,
}

impl DirMetadataSource {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::not_found(format!(
                "metadata dir {} does not exist",
                root.display()
            )));
        }

        let mut files = BTreeMap::new();
        for entry in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                Error::msg(format!("failed to scan metadata dir {}: {e}", root.display()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if ext != "toml" && ext != "json" {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(prev) = files.insert(stem.to_string(), path.to_path_buf()) {
                warn!(
                    window_id = stem,
                    shadowed = %prev.display(),
                    "duplicate window metadata file"
                );
            }
        }
        debug!(root = %root.display(), windows = files.len(), "indexed window metadata");
        Ok(Self { root, files })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn window_ids(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

fn parse_file(path: &Path, window_id: &str) -> Result<WindowMetadata> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");

    let mut value: serde_json::Value = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| Error::msg(format!("JSON parse error in {}: {e}", path.display())))?
    } else {
        let v: toml::Value = toml::from_str(&raw)
            .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;
        serde_json::to_value(v)?
    };
    if let Some(obj) = value.as_object_mut() {
        obj.entry("id")
            .or_insert_with(|| serde_json::Value::String(window_id.to_string()));
    }

    let mut meta: WindowMetadata = serde_json::from_value(value).map_err(|e| {
        Error::msg(format!(
            "invalid window metadata in {}: {e}",
            path.display()
        ))
    })?;
    for tab in &mut meta.tabs {
        if tab.window.is_empty() {
            tab.window = meta.id.clone();
        }
    }
    Ok(meta)
}

impl MetadataSource for DirMetadataSource {
    fn load_window_metadata(&self, window_id: &str) -> Result<WindowMetadata> {
        let Some(path) = self.files.get(window_id) else {
            return Err(Error::not_found(format!(
                "no metadata file for window '{window_id}' under {}",
                self.root.display()
            )));
        };
        debug!(window_id, path = %path.display(), "loading window metadata");
        parse_file(path, window_id)
    }
}
