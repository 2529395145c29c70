//! Conversion of source files into a page- and heading-aware document model.
//!
//! Plain text and Markdown are read as-is; HTML is converted to Markdown through `htmd` first.
//! Form feeds (`\x0c`) mark page breaks and Markdown headings open new sections, so downstream
//! chunks can carry page numbers and a title.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

const PAGE_BREAK: char = '\u{000C}';

/// Errors raised while converting a source file.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The file could not be read.
    #[error("Failed to read document {path}: {source}")]
    Unreadable {
        /// File we attempted to read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The file was read but produced no text.
    #[error("Conversion of {path} produced an empty document")]
    Empty {
        /// File that converted to nothing.
        path: PathBuf,
    },
    /// The file is not in a format the converter understands.
    #[error("Unsupported document format for {path}: {reason}")]
    Unsupported {
        /// Offending file.
        path: PathBuf,
        /// Why the format was rejected.
        reason: String,
    },
    /// HTML to Markdown conversion failed.
    #[error("HTML conversion failed for {path}: {message}")]
    Html {
        /// Offending file.
        path: PathBuf,
        /// Converter error message.
        message: String,
    },
}

/// A contiguous block of text under one heading on one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSection {
    /// Closest heading above this block, if any.
    pub heading: Option<String>,
    /// Body text of the block.
    pub text: String,
    /// One-based page number.
    pub page: u32,
}

/// Converted document handed from extraction to chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredDocument {
    /// First heading found in the document.
    pub title: Option<String>,
    /// Sections in reading order.
    pub sections: Vec<DocumentSection>,
    /// Number of pages in the source.
    pub page_count: usize,
}

impl StructuredDocument {
    /// Parse Markdown-flavoured text into sections.
    ///
    /// Returns `None` when the text holds no non-whitespace content.
    pub fn from_markdown(text: &str) -> Option<Self> {
        let mut pages: Vec<&str> = text.split(PAGE_BREAK).collect();
        while pages.len() > 1 && pages.last().is_some_and(|page| page.trim().is_empty()) {
            pages.pop();
        }

        let mut sections = Vec::new();
        let mut title = None;
        let mut heading: Option<String> = None;

        for (index, page) in pages.iter().enumerate() {
            let page_no = u32::try_from(index + 1).unwrap_or(u32::MAX);
            let mut buffer = String::new();

            for line in page.lines() {
                if let Some(text) = parse_heading(line) {
                    flush_section(&mut sections, &heading, &mut buffer, page_no);
                    if title.is_none() {
                        title = Some(text.clone());
                    }
                    heading = Some(text);
                } else {
                    buffer.push_str(line);
                    buffer.push('\n');
                }
            }
            flush_section(&mut sections, &heading, &mut buffer, page_no);
        }

        if sections.is_empty() {
            return None;
        }

        Some(Self {
            title,
            sections,
            page_count: pages.len(),
        })
    }

    /// Full text of the document with sections separated by blank lines.
    pub fn text(&self) -> String {
        self.sections
            .iter()
            .map(|section| section.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn parse_heading(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.starts_with(' ') {
        return None;
    }
    let text = rest.trim().trim_end_matches('#').trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn flush_section(
    sections: &mut Vec<DocumentSection>,
    heading: &Option<String>,
    buffer: &mut String,
    page: u32,
) {
    let text = buffer.trim();
    if !text.is_empty() {
        sections.push(DocumentSection {
            heading: heading.clone(),
            text: text.to_string(),
            page,
        });
    }
    buffer.clear();
}

/// Turns a file on disk into a [`StructuredDocument`].
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert the file at `path`.
    async fn convert(&self, path: &Path) -> Result<StructuredDocument, ConversionError>;
}

/// Converter for text, Markdown and HTML files on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalDocumentConverter;

impl LocalDocumentConverter {
    /// Construct a converter.
    pub const fn new() -> Self {
        Self
    }

    fn html_to_markdown(path: &Path, html: &str) -> Result<String, ConversionError> {
        let converter = htmd::HtmlToMarkdown::builder()
            .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
            .build();
        converter
            .convert(html)
            .map_err(|error| ConversionError::Html {
                path: path.to_path_buf(),
                message: error.to_string(),
            })
    }
}

#[async_trait]
impl DocumentConverter for LocalDocumentConverter {
    async fn convert(&self, path: &Path) -> Result<StructuredDocument, ConversionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ConversionError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;

        if bytes.contains(&0) {
            return Err(ConversionError::Unsupported {
                path: path.to_path_buf(),
                reason: "binary content".to_string(),
            });
        }

        let text = String::from_utf8(bytes).map_err(|_| ConversionError::Unsupported {
            path: path.to_path_buf(),
            reason: "content is not valid UTF-8".to_string(),
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let markdown = match extension.as_str() {
            "html" | "htm" | "xhtml" => Self::html_to_markdown(path, &text)?,
            _ => text,
        };

        let document =
            StructuredDocument::from_markdown(&markdown).ok_or_else(|| ConversionError::Empty {
                path: path.to_path_buf(),
            })?;

        tracing::debug!(
            path = %path.display(),
            sections = document.sections.len(),
            pages = document.page_count,
            "Converted document"
        );
        Ok(document)
    }
}
