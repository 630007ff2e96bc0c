//! Turns a final artifact into files on disk.
//!
//! The model returns one text blob in which every file sits in a fenced block
//! whose opening fence names the file:
//!
//! ````text
//! ```app.py
//! print("hello")
//! ```
//! ````
//!
//! [`parse_files`] recovers those files; [`package`] writes them under an
//! output root together with a `manifest.json`.

use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

const FENCE: &str = "```";

/// File name of the manifest written next to the packaged files.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Packaging failure. Files written before the failure stay on disk.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PackageError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PackageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Ordered mapping from relative path to file content.
///
/// Iteration follows the order in which paths were first seen. Inserting an
/// existing path replaces its content in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    entries: Vec<(String, String)>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns `true` when an earlier entry was replaced.
    pub fn insert(&mut self, path: String, content: String) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|(p, _)| *p == path) {
            entry.1 = content;
            true
        } else {
            self.entries.push((path, content));
            false
        }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, c)| c.as_str())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(p, _)| p.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Record of what a packaging run wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<String>,
    pub timestamp: String,
}

impl Manifest {
    fn from_files(files: &FileSet) -> Self {
        Self {
            files: files.paths().map(str::to_string).collect(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// The file named by a fence line, if any.
///
/// The info string after the fence may carry a language tag before the path
/// (```` ```python app.py ````) and trailing notes after it; the first token
/// containing a `.` wins.
fn file_marker(info: &str) -> Option<&str> {
    info.trim_matches('`')
        .split_whitespace()
        .find(|tok| tok.contains('.') && !tok.trim_matches('.').is_empty())
}

fn commit(files: &mut FileSet, path: &str, buf: &mut Vec<&str>) {
    if files.insert(path.to_string(), buf.join("\n")) {
        tracing::debug!(path, "Duplicate file marker, keeping the later block");
    }
    buf.clear();
}

/// Split an artifact into files. Never fails: unbalanced or stray fences
/// degrade to the closest sensible reading.
pub fn parse_files(text: &str) -> FileSet {
    let mut files = FileSet::new();
    let mut current: Option<&str> = None;
    let mut buf: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        let trimmed = line.trim();
        if let Some(info) = trimmed.strip_prefix(FENCE) {
            match (file_marker(info), current) {
                (Some(name), open) => {
                    if let Some(path) = open {
                        commit(&mut files, path, &mut buf);
                    }
                    current = Some(name);
                }
                (None, Some(path)) => {
                    commit(&mut files, path, &mut buf);
                    current = None;
                }
                (None, None) => {}
            }
            continue;
        }
        if current.is_some() {
            buf.push(line);
        }
    }

    if let Some(path) = current {
        tracing::debug!(path, "Artifact ended inside a file block");
        commit(&mut files, path, &mut buf);
    }

    files
}

/// Resolve `rel` under `root`, refusing anything that would land outside it.
fn resolve(root: &Path, rel: &str) -> io::Result<PathBuf> {
    let rel_path = Path::new(rel);
    let escapes = rel_path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || rel.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to write outside the output root: {rel:?}"),
        ));
    }
    Ok(root.join(rel_path))
}

/// Parse `artifact`, write every file under `output_root`, then write the
/// manifest. Existing files are overwritten. Nothing is rolled back on error.
pub async fn package(artifact: &str, output_root: &Path) -> Result<FileSet, PackageError> {
    let files = parse_files(artifact);
    tracing::info!(files = files.len(), root = %output_root.display(), "Packaging artifact");

    tokio::fs::create_dir_all(output_root)
        .await
        .map_err(|e| PackageError::io(output_root, e))?;

    for (rel, content) in files.iter() {
        let full = resolve(output_root, rel).map_err(|e| PackageError::io(rel, e))?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PackageError::io(parent, e))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| PackageError::io(&full, e))?;
        tracing::debug!(path = rel, bytes = content.len(), "Wrote file");
    }

    let manifest = Manifest::from_files(&files);
    let manifest_path = output_root.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| PackageError::io(&manifest_path, io::Error::other(e)))?;
    tokio::fs::write(&manifest_path, json)
        .await
        .map_err(|e| PackageError::io(&manifest_path, e))?;

    Ok(files)
}

/// Read a manifest written by [`package`].
pub async fn read_manifest(output_root: &Path) -> Result<Manifest, PackageError> {
    let path = output_root.join(MANIFEST_FILE);
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| PackageError::io(&path, e))?;
    serde_json::from_str(&raw).map_err(|e| PackageError::io(&path, io::Error::other(e)))
}
