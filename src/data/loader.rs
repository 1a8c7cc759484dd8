//! Dataset file loading.
//!
//! Dispatches on the file extension (CSV or spreadsheet workbook), decodes
//! the file into a [`Table`] and normalizes its column names.

use crate::data::table::Table;
use crate::error::DataError;
use calamine::{open_workbook_auto, Data, Reader};
use encoding_rs::{UTF_8, WINDOWS_1252};
use std::path::Path;
use tracing::{debug, warn};

/// Supported dataset file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Csv,
    Spreadsheet,
}

impl DatasetFormat {
    /// Pick the format from the path's extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, DataError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Ok(DatasetFormat::Csv),
            "xls" | "xlsx" | "xlsm" | "xlsb" | "ods" => Ok(DatasetFormat::Spreadsheet),
            _ => Err(DataError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: if extension.is_empty() {
                    "<none>".to_string()
                } else {
                    format!(".{}", extension)
                },
            }),
        }
    }
}

/// Load a dataset file into a table with normalized column names.
pub fn load_table(path: &Path) -> Result<Table, DataError> {
    if !path.exists() {
        return Err(DataError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut table = match DatasetFormat::from_path(path)? {
        DatasetFormat::Csv => read_csv(path)?,
        DatasetFormat::Spreadsheet => read_spreadsheet(path)?,
    };

    table.normalize_column_names();
    Ok(table)
}

fn read_csv(path: &Path) -> Result<Table, DataError> {
    let bytes = std::fs::read(path).map_err(|e| decode_error(path, e))?;
    parse_csv_bytes(path, &bytes)
}

/// Decode CSV bytes as UTF-8, retrying once as Windows-1252.
pub fn parse_csv_bytes(path: &Path, bytes: &[u8]) -> Result<Table, DataError> {
    if let Some(text) = UTF_8.decode_without_bom_handling_and_without_replacement(bytes) {
        let text = text.trim_start_matches('\u{feff}');
        return parse_csv_text(text).map_err(|e| decode_error(path, e));
    }

    warn!(
        "UTF-8 decoding failed for {}. Trying windows-1252.",
        path.display()
    );

    let (text, _, had_errors) = WINDOWS_1252.decode(bytes);
    if had_errors {
        return Err(decode_error(path, "not valid UTF-8 or windows-1252"));
    }
    parse_csv_text(&text).map_err(|e| decode_error(path, e))
}

fn parse_csv_text(text: &str) -> Result<Table, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .map(String::from)
        .collect();

    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err("missing header row".to_string());
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        rows.push(record.iter().map(String::from).collect::<Vec<_>>());
    }

    debug!("Parsed CSV with {} columns, {} rows", headers.len(), rows.len());
    Ok(Table::from_raw_rows(&headers, &rows))
}

fn read_spreadsheet(path: &Path) -> Result<Table, DataError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| decode_error(path, e))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| decode_error(path, "workbook has no worksheets"))?
        .map_err(|e| decode_error(path, e))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(cell_text).collect(),
        None => return Err(decode_error(path, "worksheet is empty")),
    };

    let body: Vec<Vec<String>> = rows
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    Ok(Table::from_raw_rows(&headers, &body))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn decode_error(path: &Path, reason: impl ToString) -> DataError {
    DataError::DecodeError {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::Value;
    use tempfile::TempDir;

    #[test]
    fn test_format_dispatch() {
        assert_eq!(
            DatasetFormat::from_path(Path::new("a/b.CSV")).unwrap(),
            DatasetFormat::Csv
        );
        assert_eq!(
            DatasetFormat::from_path(Path::new("b.xlsx")).unwrap(),
            DatasetFormat::Spreadsheet
        );
        assert!(matches!(
            DatasetFormat::from_path(Path::new("notes.txt")),
            Err(DataError::UnsupportedFormat { extension, .. }) if extension == ".txt"
        ));
    }

    #[test]
    fn test_load_csv_normalizes_headers() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sales.csv");
        std::fs::write(&path, "Sale Price, Country \n10,Canada\n20,France\n").unwrap();

        let table = load_table(&path).unwrap();
        assert_eq!(table.column_names(), vec!["sale_price", "country"]);
        assert_eq!(
            table.column("sale_price").unwrap().values,
            vec![Value::Number(10.0), Value::Number(20.0)]
        );
    }

    #[test]
    fn test_load_workbook_reads_first_sheet() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/sales.xlsx");

        let table = load_table(&path).unwrap();
        assert_eq!(table.column_names(), vec!["sale_price", "country", "units_sold"]);
        assert_eq!(table.n_rows(), 2);
        assert_eq!(
            table.column("sale_price").unwrap().values,
            vec![Value::Number(10.5), Value::Number(200.0)]
        );
        assert_eq!(
            table.column("country").unwrap().values,
            vec![Value::from("Canada"), Value::from("France")]
        );
        assert_eq!(
            table.column("units_sold").unwrap().values,
            vec![Value::Number(3.0), Value::Null]
        );
    }

    #[test]
    fn test_missing_file() {
        let err = load_table(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, DataError::FileNotFound { .. }));
    }

    #[test]
    fn test_unsupported_extension_checked_after_existence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.txt");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();

        let err = load_table(&path).unwrap_err();
        assert!(matches!(err, DataError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_windows_1252_fallback() {
        // "Café" with a latin-1 encoded é (0xE9), invalid as UTF-8.
        let bytes = b"Name,Score\nCaf\xE9,3\n";
        let table = parse_csv_bytes(Path::new("x.csv"), bytes).unwrap();
        assert_eq!(
            table.column("Name").unwrap().values,
            vec![Value::Text("Café".to_string())]
        );
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let bytes = "\u{feff}Id,Value\n1,2\n".as_bytes();
        let table = parse_csv_bytes(Path::new("x.csv"), bytes).unwrap();
        assert_eq!(table.column_names(), vec!["Id", "Value"]);
    }

    #[test]
    fn test_empty_csv_is_a_decode_error() {
        let err = parse_csv_bytes(Path::new("x.csv"), b"").unwrap_err();
        assert!(matches!(err, DataError::DecodeError { .. }));
    }
}
