//! File → text extraction for the supported document types
//!
//! PDF goes through `pdf-extract`, DOCX is read straight out of the zip
//! container (`word/document.xml`), TXT must be UTF-8. Parsing runs on the
//! blocking pool.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::errors::{RagError, Result};

/// Document formats accepted by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Txt,
}

impl FileType {
    /// Resolve a file-type tag (`pdf`, `docx`, `doc`, `txt`, `md`), case-insensitive
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Ok(FileType::Pdf),
            // Word files are all routed through the OOXML reader
            "docx" | "doc" => Ok(FileType::Docx),
            "txt" | "md" => Ok(FileType::Txt),
            other => Err(RagError::UnsupportedFileType(other.to_string())),
        }
    }

    /// Resolve from a path's extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| RagError::UnsupportedFileType(path.display().to_string()))?;
        Self::from_tag(ext)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Txt => "txt",
        }
    }
}

/// Check whether a path has a loadable extension
pub fn is_supported(path: &Path) -> bool {
    FileType::from_path(path).is_ok()
}

/// Extracted document text
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub path: PathBuf,
    pub file_type: FileType,
    pub text: String,
}

impl LoadedDocument {
    /// Identifier chunks of this document are tagged with
    pub fn source_id(&self) -> String {
        self.path.display().to_string()
    }
}

/// Load a document, detecting its type from the extension
pub async fn load_document(path: &Path) -> Result<LoadedDocument> {
    let file_type = FileType::from_path(path)?;
    load_document_as(path, file_type).await
}

/// Load a document with an explicit type tag
pub async fn load_document_as(path: &Path, file_type: FileType) -> Result<LoadedDocument> {
    if !path.exists() {
        return Err(RagError::NotFound(path.display().to_string()));
    }

    let bytes = tokio::fs::read(path).await?;
    let path_str = path.display().to_string();

    let text = match file_type {
        FileType::Txt => String::from_utf8(bytes).map_err(|e| RagError::DocumentLoad {
            path: path_str.clone(),
            message: format!("not valid UTF-8: {}", e),
        })?,
        FileType::Pdf => {
            let extracted = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
                .await
                .map_err(|e| RagError::Generic(format!("Task join error: {}", e)))?;
            extracted.map_err(|e| RagError::DocumentLoad {
                path: path_str.clone(),
                message: format!("PDF extraction error: {}", e),
            })?
        }
        FileType::Docx => {
            let extracted = tokio::task::spawn_blocking(move || read_docx(&bytes))
                .await
                .map_err(|e| RagError::Generic(format!("Task join error: {}", e)))?;
            extracted.map_err(|message| RagError::DocumentLoad {
                path: path_str.clone(),
                message,
            })?
        }
    };

    Ok(LoadedDocument {
        path: path.to_path_buf(),
        file_type,
        text,
    })
}

/// Pull the body text out of an OOXML word-processing archive
fn read_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| format!("not a DOCX archive: {}", e))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| format!("missing word/document.xml: {}", e))?;

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| format!("unreadable document.xml: {}", e))?;

    Ok(docx_xml_to_text(&xml))
}

/// Keep `<w:t>` runs, turn paragraph ends and breaks into newlines
pub fn docx_xml_to_text(xml: &str) -> String {
    let mut out = String::new();
    let mut in_text = false;
    let mut pos = 0;

    while let Some(rel) = xml[pos..].find('<') {
        let start = pos + rel;
        if in_text {
            out.push_str(&unescape_xml(&xml[pos..start]));
        }

        let Some(rel_end) = xml[start..].find('>') else {
            break;
        };
        let end = start + rel_end;
        let tag = &xml[start + 1..end];
        let closing = tag.starts_with('/');
        let self_closing = tag.ends_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("");

        match name {
            "w:t" => in_text = !closing && !self_closing,
            "w:p" if closing => out.push('\n'),
            "w:tab" => out.push('\t'),
            "w:br" | "w:cr" => out.push('\n'),
            _ => {}
        }

        pos = end + 1;
    }

    out
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
