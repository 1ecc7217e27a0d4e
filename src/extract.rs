//! Document text extraction contract.
//!
//! Binary-format extraction (PDF, DOCX) is an external collaborator;
//! the engine only depends on this trait. The built-in extractor covers
//! plain text and JSON so uploads never hard-fail: unsupported formats
//! store a notice instead of content.

use crate::error::EngineError;

/// Extracts text content from fetched document bytes.
pub trait TextExtractor: Send + Sync {
    /// Extracts text for the given file type tag.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] for bytes that cannot be
    /// decoded at all.
    fn extract(&self, file_type: &str, bytes: &[u8]) -> Result<String, EngineError>;
}

/// Built-in extractor for text-like formats.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, file_type: &str, bytes: &[u8]) -> Result<String, EngineError> {
        match file_type.to_lowercase().as_str() {
            "txt" | "text" | "md" | "markdown" | "csv" => {
                String::from_utf8(bytes.to_vec()).map_err(|_| EngineError::InvalidInput {
                    message: "document is not valid UTF-8".to_string(),
                })
            }
            "json" => {
                let text =
                    String::from_utf8(bytes.to_vec()).map_err(|_| EngineError::InvalidInput {
                        message: "document is not valid UTF-8".to_string(),
                    })?;
                // Pretty-print so chunking sees line structure.
                match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(value) => Ok(serde_json::to_string_pretty(&value).unwrap_or(text)),
                    Err(_) => Ok(text),
                }
            }
            other => Ok(format!(
                "[Extraction for '{other}' files is not available in this build.]"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        let extractor = PlainTextExtractor;
        let text = extractor.extract("txt", b"hello world").unwrap_or_default();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn test_json_pretty_printed() {
        let extractor = PlainTextExtractor;
        let text = extractor
            .extract("json", br#"{"a":{"b":1}}"#)
            .unwrap_or_default();
        assert!(text.contains('\n'));
        assert!(text.contains("\"b\": 1"));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let extractor = PlainTextExtractor;
        let result = extractor.extract("txt", &[0xff, 0xfe, 0xfd]);
        assert!(matches!(result, Err(EngineError::InvalidInput { .. })));
    }

    #[test]
    fn test_binary_format_stores_notice() {
        let extractor = PlainTextExtractor;
        let text = extractor.extract("pdf", &[0x25, 0x50]).unwrap_or_default();
        assert!(text.contains("not available"));
    }
}
