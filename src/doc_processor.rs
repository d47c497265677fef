use thiserror::Error;

/// Slice width for stored chunks, in characters.
pub const CHUNK_SIZE: usize = 500;

/// Page-break marker the extractor leaves between pages.
const PAGE_BREAK: char = '\u{c}';

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF parse error: {0}")]
    Pdf(#[from] pdf_extract::OutputError),
}

/// Extract plain text from an in-memory PDF, with extraction artifacts
/// stripped.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let text = pdf_extract::extract_text_from_mem(bytes)?;
    Ok(strip_page_markers(&text))
}

fn strip_page_markers(text: &str) -> String {
    text.replace(PAGE_BREAK, "\n")
}

/// Split text into fixed-size slices, preserving order. The final slice may
/// be shorter; empty input yields no slices.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.chars()
        .collect::<Vec<_>>()
        .chunks(chunk_size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
