use std::path::Path;

use crate::ExtractError;

/// Separator inserted between pages of a PDF body.
pub const PAGE_BREAK: &str = "\u{c}\n";

/// Linearized text of a PDF, page by page, joined with [`PAGE_BREAK`].
pub fn read_pdf(path: &Path) -> Result<String, ExtractError> {
    let pages = pdf_extract::extract_text_by_pages(path)
        .map_err(|e| ExtractError::skipped(path, format!("pdf extraction failed: {e}")))?;
    Ok(pages.join(PAGE_BREAK))
}
