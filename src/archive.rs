//! Archive reading: pull the export document out of uploaded bytes.
//!
//! Chat archives ship as a zip with a `conversations.json` entry at the
//! root; a bare `.json` export is accepted as-is. Decompression itself is
//! the `zip` crate's job — this module only locates and bounds the one
//! entry we consume.

use std::io::Read;

use crate::transform::TransformError;

const EXPORT_ENTRY: &str = "conversations.json";

/// Maximum decompressed bytes read from the export entry (zip-bomb guard).
const MAX_EXPORT_BYTES: u64 = 256 * 1024 * 1024;

/// Extract the export document text from archive bytes.
///
/// Zip input (detected by magic) must contain a `conversations.json` entry;
/// anything else is treated as the export document itself.
pub fn read_export(bytes: &[u8]) -> Result<String, TransformError> {
    if bytes.starts_with(b"PK") {
        read_zip_export(bytes)
    } else {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| TransformError::Archive(format!("export is not UTF-8: {e}")))
    }
}

fn read_zip_export(bytes: &[u8]) -> Result<String, TransformError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| TransformError::Archive(e.to_string()))?;

    let entry = archive
        .by_name(EXPORT_ENTRY)
        .map_err(|e| TransformError::Archive(format!("{EXPORT_ENTRY}: {e}")))?;

    let mut out = Vec::new();
    entry
        .take(MAX_EXPORT_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| TransformError::Archive(e.to_string()))?;
    if out.len() as u64 >= MAX_EXPORT_BYTES {
        return Err(TransformError::Archive(format!(
            "{EXPORT_ENTRY} exceeds size limit ({MAX_EXPORT_BYTES} bytes)"
        )));
    }

    String::from_utf8(out)
        .map_err(|e| TransformError::Archive(format!("{EXPORT_ENTRY} is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(name: &str, content: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file(name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_reads_export_entry_from_zip() {
        let bytes = zip_with("conversations.json", "[]");
        assert_eq!(read_export(&bytes).unwrap(), "[]");
    }

    #[test]
    fn test_zip_without_export_entry_fails() {
        let bytes = zip_with("other.json", "[]");
        let err = read_export(&bytes).unwrap_err();
        assert!(matches!(err, TransformError::Archive(_)));
    }

    #[test]
    fn test_plain_json_passthrough() {
        assert_eq!(read_export(b"[{\"title\": \"x\"}]").unwrap(), "[{\"title\": \"x\"}]");
    }

    #[test]
    fn test_garbage_zip_fails() {
        // Valid magic, truncated body.
        let err = read_export(b"PK\x03\x04 nope").unwrap_err();
        assert!(matches!(err, TransformError::Archive(_)));
    }
}
