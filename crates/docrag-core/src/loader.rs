use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::traits::DocumentLoader;
use crate::types::{DocumentMetadata, SourceDocument};

/// Extensions accepted by [`TextFileLoader`].
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// Form feed; splits a text file into pages.
const PAGE_BREAK: char = '\u{000C}';

/// Loads plain-text and markdown files, or every such file under a directory.
///
/// Each form-feed separated page becomes one [`SourceDocument`] with a
/// zero-based `page` and `source` set to the file path.
#[derive(Debug, Clone, Default)]
pub struct TextFileLoader;

impl TextFileLoader {
    pub fn new() -> Self { Self }

    pub fn is_supported(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    fn collect_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(err) => {
                    warn!(error = %err, "skipping unreadable entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && Self::is_supported(e.path()))
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }

    fn load_file(path: &Path) -> Result<Vec<SourceDocument>> {
        let bytes = fs::read(path).map_err(|e| Error::NotFound(format!("{}: {e}", path.display())))?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %path.display(), "file is not valid UTF-8, decoding lossily");
                String::from_utf8_lossy(err.as_bytes()).into_owned()
            }
        };

        let source = path.display().to_string();
        let docs: Vec<SourceDocument> = text
            .split(PAGE_BREAK)
            .enumerate()
            .filter(|(_, page)| !page.trim().is_empty())
            .map(|(page, content)| {
                let metadata = DocumentMetadata {
                    page: u32::try_from(page).unwrap_or(u32::MAX),
                    source: Some(source.clone()),
                    ..Default::default()
                };
                SourceDocument::new(content, metadata)
            })
            .collect();
        debug!(path = %path.display(), pages = docs.len(), "loaded file");
        Ok(docs)
    }
}

impl DocumentLoader for TextFileLoader {
    fn load(&self, path: &Path) -> Result<Vec<SourceDocument>> {
        if !path.exists() {
            return Err(Error::NotFound(path.display().to_string()));
        }

        let docs = if path.is_dir() {
            let files = Self::collect_files(path);
            info!(dir = %path.display(), files = files.len(), "loading directory");
            let mut docs = Vec::new();
            for file in &files {
                docs.extend(Self::load_file(file)?);
            }
            docs
        } else {
            if !Self::is_supported(path) {
                return Err(Error::UnsupportedType(path.display().to_string()));
            }
            Self::load_file(path)?
        };

        if docs.is_empty() {
            return Err(Error::EmptyContent(path.display().to_string()));
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(TextFileLoader::is_supported(Path::new("notes.TXT")));
        assert!(TextFileLoader::is_supported(Path::new("readme.md")));
        assert!(!TextFileLoader::is_supported(Path::new("slides.pdf")));
        assert!(!TextFileLoader::is_supported(Path::new("Makefile")));
    }

    #[test]
    fn form_feed_splits_pages() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("book.txt");
        fs::write(&path, "first page\u{000C}   \u{000C}third page")?;

        let docs = TextFileLoader::new().load(&path)?;
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].metadata.page, 0);
        assert_eq!(docs[1].metadata.page, 2);
        assert_eq!(docs[1].content, "third page");
        assert_eq!(docs[0].metadata.source.as_deref(), Some(path.display().to_string().as_str()));
        Ok(())
    }

    #[test]
    fn distinguishable_failures() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let loader = TextFileLoader::new();

        let missing = loader.load(&dir.path().join("missing.txt"));
        assert!(matches!(missing, Err(Error::NotFound(_))));

        let pdf = dir.path().join("slides.pdf");
        fs::write(&pdf, "%PDF-1.4")?;
        assert!(matches!(loader.load(&pdf), Err(Error::UnsupportedType(_))));

        let blank = dir.path().join("blank.txt");
        fs::write(&blank, "  \n\n ")?;
        assert!(matches!(loader.load(&blank), Err(Error::EmptyContent(_))));
        Ok(())
    }
}
