//! Document loading capability.

use std::path::Path;

use async_trait::async_trait;
use tokio::fs;

use crate::types::{Document, Page, RagError};

/// Turns a file path into an ordered sequence of pages.
///
/// Parsing rich formats (PDF and friends) is an external concern; the
/// engine only requires that something can produce pages of text with a
/// source name.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<Document, RagError>;
}

/// Loader for plain-text files.
///
/// Pages are separated by form feeds (the page-break convention of
/// text-extracted documents); a file without form feeds is a single page.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextLoader;

#[async_trait]
impl DocumentLoader for TextLoader {
    async fn load(&self, path: &Path) -> Result<Document, RagError> {
        let text = fs::read_to_string(path).await?;
        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let pages = text
            .split('\u{c}')
            .enumerate()
            .map(|(i, page)| Page::new(page, i as u32 + 1))
            .collect();

        Ok(Document::new(source, pages))
    }
}
