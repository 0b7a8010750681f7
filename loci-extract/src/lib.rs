//! Content extraction for the loci index.
//!
//! Given an absolute path, [`extract`] produces an [`ExtractedBody`]: the text
//! of the file plus zero or more trailing metadata blocks (OCR text, EXIF
//! summary, git history). Dispatch is by extension with a content sniff for
//! binary data. Every per-file failure is reported as
//! [`ExtractError::Skipped`] so a batch is never aborted by one bad file.
//!
//! Extraction is synchronous and CPU/IO bound; callers are expected to run it
//! on a blocking worker.

mod error;
mod git;
mod image;
mod pdf;
mod text;

use std::path::Path;

pub use error::ExtractError;
pub use git::recent_commit_subjects;
pub use text::{is_text_extension, sniff_is_binary};

/// Files larger than this are skipped outright.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// How many commit subjects the git history block carries.
pub const GIT_HISTORY_LIMIT: usize = 50;

/// How a path will be handled by [`extract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    Text,
    Pdf,
    ImageOcr,
    /// Binary or excluded content; not indexed.
    Skip,
}

/// Extraction options, taken from the indexing configuration.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Extensions to index in addition to the built-in text table.
    pub extra_extensions: Vec<String>,
    /// Extensions to refuse even if the built-in table allows them.
    pub excluded_extensions: Vec<String>,
    /// Append a git-history block when the file is in a working tree.
    pub git_history: bool,
}

/// Kind of a trailing metadata block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// OCR output or EXIF summary derived from an image.
    Ocr,
    /// Recent commit subjects touching the file.
    Gitlog,
}

/// A trailing block emitted as its own fragment downstream.
#[derive(Debug, Clone)]
pub struct MetadataBlock {
    pub kind: BlockKind,
    pub text: String,
}

/// The result of extracting one file.
#[derive(Debug, Clone, Default)]
pub struct ExtractedBody {
    /// Main body text; empty for image files.
    pub text: String,
    /// Lowercased extension, used as the language hint downstream.
    pub language: Option<String>,
    pub blocks: Vec<MetadataBlock>,
}

impl ExtractedBody {
    /// True when neither the body nor any block carries text.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.blocks.iter().all(|b| b.text.trim().is_empty())
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Dotfiles and extensionless build files that are always treated as text.
fn is_known_text_filename(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    matches!(
        name.as_str(),
        "dockerfile" | "makefile" | ".gitignore" | ".env" | ".editorconfig"
    )
}

/// Decide how a path will be extracted, honoring the option lists.
pub fn classify(path: &Path, options: &ExtractOptions) -> ExtractorKind {
    let ext = extension_of(path);

    if options.excluded_extensions.iter().any(|e| e == &ext) {
        return ExtractorKind::Skip;
    }
    if image::is_image_extension(&ext) {
        return ExtractorKind::ImageOcr;
    }
    if ext == "pdf" {
        return ExtractorKind::Pdf;
    }
    if is_text_extension(&ext)
        || is_known_text_filename(path)
        || options.extra_extensions.iter().any(|e| e == &ext)
    {
        return ExtractorKind::Text;
    }
    ExtractorKind::Skip
}

/// Extract `path` into a body plus metadata blocks.
///
/// Runs to completion on the calling thread; see the module docs.
pub fn extract(path: &Path, options: &ExtractOptions) -> Result<ExtractedBody, ExtractError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ExtractError::skipped(path, format!("stat failed: {e}")))?;
    if metadata.len() > MAX_FILE_SIZE {
        return Err(ExtractError::skipped(
            path,
            format!("file exceeds {} bytes", MAX_FILE_SIZE),
        ));
    }

    let ext = extension_of(path);
    let mut body = match classify(path, options) {
        ExtractorKind::Text => ExtractedBody {
            text: text::read_text(path)?,
            language: Some(ext.clone()),
            blocks: Vec::new(),
        },
        ExtractorKind::Pdf => ExtractedBody {
            text: pdf::read_pdf(path)?,
            language: Some(ext.clone()),
            blocks: Vec::new(),
        },
        ExtractorKind::ImageOcr => {
            let blocks = image::read_image(path)?;
            ExtractedBody {
                text: String::new(),
                language: Some(ext.clone()),
                blocks,
            }
        }
        ExtractorKind::Skip => {
            return Err(ExtractError::skipped(path, "binary or excluded extension"));
        }
    };

    if options.git_history {
        if let Some(subjects) = git::recent_commit_subjects(path, GIT_HISTORY_LIMIT) {
            body.blocks.push(MetadataBlock {
                kind: BlockKind::Gitlog,
                text: subjects,
            });
        }
    }

    if body.is_empty() {
        return Err(ExtractError::skipped(path, "no extractable text"));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn classify_by_extension() {
        let options = ExtractOptions::default();
        assert_eq!(
            classify(Path::new("/x/a.rs"), &options),
            ExtractorKind::Text
        );
        assert_eq!(classify(Path::new("/x/a.pdf"), &options), ExtractorKind::Pdf);
        assert_eq!(
            classify(Path::new("/x/a.png"), &options),
            ExtractorKind::ImageOcr
        );
        assert_eq!(classify(Path::new("/x/a.exe"), &options), ExtractorKind::Skip);
        assert_eq!(
            classify(Path::new("/x/Dockerfile"), &options),
            ExtractorKind::Text
        );
    }

    #[test]
    fn excluded_extensions_win() {
        let options = ExtractOptions {
            excluded_extensions: vec!["rs".into()],
            ..Default::default()
        };
        assert_eq!(classify(Path::new("/x/a.rs"), &options), ExtractorKind::Skip);
    }

    #[test]
    fn extra_extensions_extend_the_table() {
        let options = ExtractOptions {
            extra_extensions: vec!["weird".into()],
            ..Default::default()
        };
        assert_eq!(
            classify(Path::new("/x/a.weird"), &options),
            ExtractorKind::Text
        );
    }

    #[test]
    fn extract_reads_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.md");
        std::fs::write(&file, "# Notes\n\nhello world\n").unwrap();

        let body = extract(&file, &ExtractOptions::default()).unwrap();
        assert!(body.text.contains("hello world"));
        assert_eq!(body.language.as_deref(), Some("md"));
        assert!(body.blocks.is_empty());
    }

    #[test]
    fn extract_skips_binary_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blob.txt");
        let mut f = std::fs::File::create(&file).unwrap();
        f.write_all(&[0u8; 4096]).unwrap();
        drop(f);

        let err = extract(&file, &ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, ExtractError::Skipped { .. }));
    }

    #[test]
    fn extract_skips_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("empty.txt");
        std::fs::write(&file, "").unwrap();

        let err = extract(&file, &ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, ExtractError::Skipped { .. }));
    }
}
