//! Filesystem-backed document source and indexer.

use async_trait::async_trait;
use docindex_core::{DocumentId, DocumentSource, Indexer, SourceError};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Lists every file under `root` with one of the configured extensions.
pub struct FsDocumentSource {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FsDocumentSource {
    pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            extensions,
        }
    }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn enumerate(&self) -> Result<Vec<DocumentId>, SourceError> {
        let root = self.root.clone();
        let extensions = self.extensions.clone();
        tokio::task::spawn_blocking(move || collect_documents(&root, &extensions))
            .await
            .map_err(|e| SourceError::Enumeration(format!("walker task failed: {}", e)))?
    }
}

fn collect_documents(root: &Path, extensions: &[String]) -> Result<Vec<DocumentId>, SourceError> {
    if !root.is_dir() {
        return Err(SourceError::Enumeration(format!(
            "document root {} is not a readable directory",
            root.display()
        )));
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(SourceError::Enumeration(format!(
                    "cannot read {}: {}",
                    root.display(),
                    e
                )));
            }
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };

        if !entry.file_type().is_file() || !has_extension(entry.path(), extensions) {
            continue;
        }

        if let Some(id) = document_id(root, entry.path()) {
            documents.push(id);
        }
    }

    documents.sort();
    Ok(documents)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            extensions.iter().any(|allowed| *allowed == ext)
        })
        .unwrap_or(false)
}

/// `/`-separated path relative to the root.
fn document_id(root: &Path, path: &Path) -> Option<DocumentId> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(DocumentId::new(parts.join("/")))
}

/// Reads each document as UTF-8 text and rejects empty ones.
pub struct FsIndexer {
    root: PathBuf,
}

impl FsIndexer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Indexer for FsIndexer {
    async fn index(&self, document: &DocumentId) -> Result<(), String> {
        let path = document
            .as_str()
            .split('/')
            .fold(self.root.clone(), |path, part| path.join(part));

        let bytes = tokio::task::spawn_blocking(move || std::fs::read(path))
            .await
            .map_err(|e| format!("read error: {}", e))?
            .map_err(|e| format!("read error: {}", e))?;

        let text = String::from_utf8(bytes).map_err(|_| "parse error: not valid UTF-8".to_string())?;
        if text.trim().is_empty() {
            return Err("empty document".to_string());
        }

        Ok(())
    }
}
