//! Document discovery for the image pipeline.
//!
//! A batch root holds one directory per document, each containing that
//! document's rendered page images. Page numbers come from filename
//! order, 1-based, so deterministically named renders (`page_01.tiff`,
//! `page_02.tiff`, ...) map straight onto schema page numbers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{LayscanError, Result};

const PAGE_EXTENSIONS: [&str; 4] = ["tiff", "tif", "png", "jpg"];

/// One document's identifier and ordered page images.
#[derive(Debug, Clone)]
pub struct DocumentPages {
    /// Directory name, used as the record identifier.
    pub id: String,

    /// 1-based page number to image path.
    pub pages: BTreeMap<u32, PathBuf>,
}

impl DocumentPages {
    /// Path for a 1-based page number.
    pub fn page(&self, number: u32) -> Option<&Path> {
        self.pages.get(&number).map(PathBuf::as_path)
    }
}

/// Enumerate the documents under `root`, sorted by identifier.
pub fn discover_documents(root: &Path) -> Result<Vec<DocumentPages>> {
    let mut documents = Vec::new();

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let id = entry
            .file_name()
            .into_string()
            .map_err(|name| LayscanError::Document(format!("non-UTF-8 directory name {name:?}")))?;

        let mut files: Vec<PathBuf> = std::fs::read_dir(&path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| PAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        let pages: BTreeMap<u32, PathBuf> = files
            .into_iter()
            .enumerate()
            .map(|(i, p)| (i as u32 + 1, p))
            .collect();

        debug!(id = %id, pages = pages.len(), "discovered document");
        documents.push(DocumentPages { id, pages });
    }

    documents.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn enumerates_documents_and_pages_in_order() {
        let root = TempDir::new().unwrap();
        let doc = root.path().join("245-Mojave HS");
        std::fs::create_dir(&doc).unwrap();
        touch(&doc.join("page_02.tiff"));
        touch(&doc.join("page_01.tiff"));
        touch(&doc.join("notes.txt"));

        let other = root.path().join("101-Bass ES");
        std::fs::create_dir(&other).unwrap();
        touch(&other.join("page_01.png"));

        let documents = discover_documents(root.path()).unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].id, "101-Bass ES");
        assert_eq!(documents[1].id, "245-Mojave HS");

        let pages = &documents[1].pages;
        assert_eq!(pages.len(), 2);
        assert!(pages[&1].ends_with("page_01.tiff"));
        assert!(pages[&2].ends_with("page_02.tiff"));
        assert!(documents[1].page(3).is_none());
    }

    #[test]
    fn skips_loose_files_at_root() {
        let root = TempDir::new().unwrap();
        touch(&root.path().join("stray.tiff"));
        let documents = discover_documents(root.path()).unwrap();
        assert!(documents.is_empty());
    }
}
