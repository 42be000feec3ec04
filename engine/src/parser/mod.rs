//! CSV import with encoding and delimiter auto-detection.
//!
//! Turns a delimited key/value export into a partitioned, string-typed
//! [`Dataset`]. No pipeline logic here.
//!
//! Header handling mirrors what columnar engines do on import:
//! - an empty header becomes `_c<index>`
//! - a header appearing more than once is suffixed with its column index
//!   (`name_` at positions 3 and 7 → `name_3`, `name_7`), which is the shape
//!   [`crate::normalize::dedup_columns`] repairs.
//!
//! Empty fields and missing trailing fields are imported as null.

use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::dataset::{Dataset, Row, Schema};
use crate::error::{ImportError, ImportResult};

/// Options controlling the import.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Field delimiter (auto-detect if `None`)
    pub delimiter: Option<char>,
    /// Number of partitions to split the rows into
    pub partitions: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            partitions: 4,
        }
    }
}

/// Result of an import with metadata
#[derive(Debug, Clone)]
pub struct ImportedCsv {
    /// Imported rows
    pub dataset: Dataset,
    /// Detected encoding
    pub encoding: String,
    /// Detected or used delimiter
    pub delimiter: char,
    /// Headers as they appeared in the file
    pub raw_headers: Vec<String>,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let charset = chardet::detect(bytes).0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to a string using the given encoding.
///
/// Unknown encodings and invalid UTF-8 fall back to lossy UTF-8.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::ISO_8859_15.decode(bytes).0.into_owned()
        }
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let mut best_sep = ',';
    let mut best_count = 0;

    for sep in [',', ';', '\t', '|'] {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Make header names unique: empty headers become `_c<i>`, duplicated
/// headers get their column index appended (`name_` at 6 → `name_6`).
pub fn disambiguate_headers(raw: &[String]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for h in raw {
        *counts.entry(h.as_str()).or_default() += 1;
    }

    raw.iter()
        .enumerate()
        .map(|(i, h)| {
            if h.is_empty() {
                format!("_c{}", i)
            } else if counts[h.as_str()] > 1 {
                format!("{}{}", h, i)
            } else {
                h.clone()
            }
        })
        .collect()
}

/// Parse decoded CSV text with an explicit delimiter.
pub fn parse_str(content: &str, delimiter: char, partitions: usize) -> ImportResult<(Dataset, Vec<String>)> {
    if content.trim().is_empty() {
        return Err(ImportError::EmptyFile);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let raw_headers: Vec<String> = reader
        .headers()
        .map_err(|e| csv_error(&e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let headers = disambiguate_headers(&raw_headers);
    let schema = Schema::from_names(headers.iter().cloned())
        .map_err(|e| ImportError::Parse { line: 1, message: e.to_string() })?;
    let width = schema.len();

    let mut rows: Vec<Row> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(&e))?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let row: Row = (0..width)
            .map(|i| match record.get(i) {
                Some(v) if !v.is_empty() => Some(v.to_string()),
                _ => None,
            })
            .collect();
        rows.push(row);
    }

    let dataset = Dataset::from_rows(schema, rows, partitions)
        .map_err(|e| ImportError::Parse { line: 0, message: e.to_string() })?;
    Ok((dataset, raw_headers))
}

fn csv_error(e: &csv::Error) -> ImportError {
    let line = e.position().map(|p| p.line()).unwrap_or(0);
    ImportError::Parse {
        line,
        message: e.to_string(),
    }
}

/// Import raw bytes with auto-detection of encoding and delimiter.
pub fn import_bytes(bytes: &[u8], options: &ImportOptions) -> ImportResult<ImportedCsv> {
    if bytes.is_empty() {
        return Err(ImportError::EmptyFile);
    }

    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = options.delimiter.unwrap_or_else(|| detect_delimiter(&content));
    debug!(%encoding, delimiter = %delimiter.escape_default(), "detected csv format");

    let (dataset, raw_headers) = parse_str(&content, delimiter, options.partitions)?;

    Ok(ImportedCsv {
        dataset,
        encoding,
        delimiter,
        raw_headers,
    })
}

/// Import a CSV file with auto-detection of encoding and delimiter.
pub fn import_file<P: AsRef<Path>>(path: P, options: &ImportOptions) -> ImportResult<ImportedCsv> {
    let bytes = std::fs::read(path.as_ref())?;
    let imported = import_bytes(&bytes, options)?;
    info!(
        path = %path.as_ref().display(),
        rows = imported.dataset.row_count(),
        columns = imported.dataset.schema().len(),
        partitions = imported.dataset.num_partitions(),
        "imported csv"
    );
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import(csv: &str) -> ImportedCsv {
        import_bytes(csv.as_bytes(), &ImportOptions::default()).unwrap()
    }

    #[test]
    fn test_simple_csv() {
        let result = import("id;name_\n1;a\n2;b");
        assert_eq!(result.delimiter, ';');
        assert_eq!(result.dataset.row_count(), 2);
        assert_eq!(
            result.dataset.column("name_").unwrap(),
            vec![Some("a".to_string()), Some("b".to_string())]
        );
    }

    #[test]
    fn test_quoted_values_keep_delimiters() {
        let result = import("id,text_\n1,\"{\"\"a\"\":\"\"x,y\"\"}\"");
        assert_eq!(
            result.dataset.column("text_").unwrap(),
            vec![Some(r#"{"a":"x,y"}"#.to_string())]
        );
    }

    #[test]
    fn test_empty_and_missing_fields_are_null() {
        let result = import("a;b;c\n1;;\n2");
        assert_eq!(result.dataset.column("b").unwrap(), vec![None, None]);
        assert_eq!(result.dataset.column("c").unwrap(), vec![None, None]);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let result = import("a;b\n1;2\n\n3;4\n");
        assert_eq!(result.dataset.row_count(), 2);
    }

    #[test]
    fn test_duplicate_headers_suffixed_with_index() {
        let headers: Vec<String> = ["id", "name_", "x", "name_", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            disambiguate_headers(&headers),
            vec!["id", "name_1", "x", "name_3", "_c4"]
        );
    }

    #[test]
    fn test_empty_input_error() {
        let err = import_bytes(b"", &ImportOptions::default()).unwrap_err();
        assert!(matches!(err, ImportError::EmptyFile));
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c"), ',');
        assert_eq!(detect_delimiter("a\tb\tc"), '\t');
        assert_eq!(detect_delimiter("a|b|c"), '|');
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let decoded = decode_content(bytes, "iso-8859-1");
        assert_eq!(decoded, "Société");
    }

    #[test]
    fn test_partitions_respected() {
        let options = ImportOptions {
            delimiter: Some(','),
            partitions: 2,
        };
        let result = import_bytes(b"a\n1\n2\n3\n4", &options).unwrap();
        assert_eq!(result.dataset.num_partitions(), 2);
        assert_eq!(result.dataset.row_count(), 4);
    }
}
