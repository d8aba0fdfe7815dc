//! Tab-separated text file loading.
//!
//! Exports handed over by auditees are usually TSV files saved from whatever
//! tool produced them, so a single file may mix UTF-8 lines with lines in the
//! Windows-1252 legacy encoding. Each line is decoded on its own.
//!
//! Unlike the [bulk loader](crate::transfer), every cell is written as a quoted
//! string: no numeric rewriting happens here. The whole file is loaded in one
//! transaction and any rejected insert aborts the load, rolling back the rows
//! written so far.

use std::path::Path;

use encoding_rs::WINDOWS_1252;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::identifier::validate_table_name;
use crate::core::schema::SourceColumn;
use crate::error::{EtlError, Result};
use crate::target::StatementGateway;

/// Bytes trimmed from both ends of every line.
const TRIMMED: [u8; 3] = [b' ', b'\r', b'\n'];

/// Outcome of one text load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextLoadReport {
    /// Target table.
    pub table: String,
    /// Lines in the file, header and blank lines included.
    pub lines_total: u64,
    /// Whether a header line was discarded.
    pub header_skipped: bool,
    /// Lines that were empty after trimming.
    pub blank_lines_skipped: u64,
    /// Rows inserted.
    pub rows_inserted: u64,
    /// Lines decoded from Windows-1252.
    pub legacy_lines: u64,
}

/// A line decoded to UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLine {
    pub text: String,
    /// True when the raw bytes were not valid UTF-8.
    pub transcoded: bool,
}

fn trim_line(mut line: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = line {
        if TRIMMED.contains(first) {
            line = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = line {
        if TRIMMED.contains(last) {
            line = rest;
        } else {
            break;
        }
    }
    line
}

/// Decode one raw line: UTF-8 when valid, Windows-1252 otherwise.
pub fn decode_line(raw: &[u8]) -> DecodedLine {
    match std::str::from_utf8(raw) {
        Ok(text) => DecodedLine {
            text: text.to_string(),
            transcoded: false,
        },
        Err(_) => {
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(raw);
            DecodedLine {
                text: text.into_owned(),
                transcoded: true,
            }
        }
    }
}

/// Build the INSERT statement for one decoded line.
pub fn insert_statement(gateway: &StatementGateway, table: &str, line: &str) -> String {
    let cells: Vec<String> = line.split('\t').map(|cell| gateway.quote(cell)).collect();
    format!("INSERT INTO {} VALUES ({})", table, cells.join(", "))
}

/// Parse a catalog export into source columns.
///
/// Each line holds `system_type_name<TAB>name`, the column order of
/// [`mssql_catalog_query`](crate::core::schema::mssql_catalog_query). A first
/// line starting with `system_type_name` is a header and is skipped.
pub fn parse_catalog(bytes: &[u8]) -> Result<Vec<SourceColumn>> {
    let mut columns = Vec::new();
    for (idx, raw) in bytes.split(|b| *b == b'\n').enumerate() {
        let raw = trim_line(raw);
        if raw.is_empty() {
            continue;
        }
        let line = decode_line(raw).text;
        if idx == 0 && line.to_lowercase().starts_with("system_type_name") {
            continue;
        }
        match line.split_once('\t') {
            Some((type_name, name)) if !name.is_empty() => {
                columns.push(SourceColumn::with_name(name, type_name.trim()));
            }
            _ => {
                return Err(EtlError::Config(format!(
                    "catalog line {}: expected type name and column name separated by a tab",
                    idx + 1
                )))
            }
        }
    }
    Ok(columns)
}

/// Read and parse a catalog export file.
pub fn read_catalog(path: impl AsRef<Path>) -> Result<Vec<SourceColumn>> {
    parse_catalog(&std::fs::read(path)?)
}

/// Loads tab-separated files into existing tables.
pub struct DelimitedTextLoader<'g> {
    gateway: &'g StatementGateway,
}

impl<'g> DelimitedTextLoader<'g> {
    pub fn new(gateway: &'g StatementGateway) -> Self {
        Self { gateway }
    }

    /// Load every non-blank line of the file at `path` into `table`.
    ///
    /// When `has_header` is set the first line is dropped without looking at
    /// it. The target table must already exist with one column per field.
    pub fn load_from_text(
        &self,
        path: impl AsRef<Path>,
        table: &str,
        has_header: bool,
    ) -> Result<TextLoadReport> {
        validate_table_name(table)?;
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        info!("Loading {:?} into {}", path, table);
        self.load_bytes(&bytes, table, has_header)
    }

    /// Load already-read file contents into `table`.
    pub fn load_bytes(&self, bytes: &[u8], table: &str, has_header: bool) -> Result<TextLoadReport> {
        validate_table_name(table)?;
        let mut report = TextLoadReport {
            table: table.to_string(),
            ..Default::default()
        };

        let mut lines = bytes.split(|b| *b == b'\n');
        if has_header && lines.next().is_some() {
            report.header_skipped = true;
            report.lines_total += 1;
        }

        self.gateway.begin()?;
        self.insert_lines(lines, table, &mut report)
            .map_err(|e| self.gateway.abort_with(e))?;

        debug!(
            "{}: {} lines, {} blank, {} transcoded",
            table, report.lines_total, report.blank_lines_skipped, report.legacy_lines
        );
        info!("Loaded {} rows into {}", report.rows_inserted, table);
        Ok(report)
    }

    fn insert_lines<'a>(
        &self,
        lines: impl Iterator<Item = &'a [u8]>,
        table: &str,
        report: &mut TextLoadReport,
    ) -> Result<()> {
        for raw in lines {
            report.lines_total += 1;
            let raw = trim_line(raw);
            if raw.is_empty() {
                report.blank_lines_skipped += 1;
                continue;
            }

            let line = decode_line(raw);
            if line.transcoded {
                report.legacy_lines += 1;
            }
            let sql = insert_statement(self.gateway, table, &line.text);
            self.gateway.execute(&sql, false)?;
            report.rows_inserted += 1;
        }
        self.gateway.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn gateway() -> StatementGateway {
        let gw = StatementGateway::open_in_memory().unwrap();
        gw.execute("CREATE TABLE t (a TEXT, b TEXT);", false).unwrap();
        gw
    }

    fn write_file(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_trim_line() {
        assert_eq!(trim_line(b"  a\tb \r"), b"a\tb");
        assert_eq!(trim_line(b" \r\n"), b"");
        assert_eq!(trim_line(b"\ta\t"), b"\ta\t");
    }

    #[test]
    fn test_decode_line_keeps_utf8() {
        let line = decode_line("São Paulo".as_bytes());
        assert_eq!(line.text, "São Paulo");
        assert!(!line.transcoded);
    }

    #[test]
    fn test_decode_line_transcodes_legacy() {
        let line = decode_line(b"S\xe3o Paulo \x80");
        assert_eq!(line.text, "São Paulo €");
        assert!(line.transcoded);
    }

    #[test]
    fn test_insert_statement_quotes_every_cell() {
        let gw = gateway();
        assert_eq!(
            insert_statement(&gw, "t", "1.234,56\tO'Neil"),
            "INSERT INTO t VALUES ('1.234,56', 'O''Neil')"
        );
    }

    #[test]
    fn test_header_data_and_trailing_blank() {
        let gw = gateway();
        let file = write_file(b"A\tB\n1\t2\n\n");
        let report = DelimitedTextLoader::new(&gw)
            .load_from_text(file.path(), "t", true)
            .unwrap();
        assert_eq!(report.rows_inserted, 1);
        assert!(report.header_skipped);
        assert_eq!(gw.query_i64("SELECT count(*) FROM t", false).unwrap(), Some(1));
        let row: Vec<(String, String)> = gw
            .query("SELECT a, b FROM t", false, |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(row, vec![("1".to_string(), "2".to_string())]);
    }

    #[test]
    fn test_without_header_first_line_is_data() {
        let gw = gateway();
        let report = DelimitedTextLoader::new(&gw)
            .load_bytes(b"A\tB\r\n1\t2\r\n", "t", false)
            .unwrap();
        assert_eq!(report.rows_inserted, 2);
        assert!(!report.header_skipped);
    }

    #[test]
    fn test_mixed_encodings_in_one_file() {
        let gw = gateway();
        let mut bytes = "José\tUTF\n".as_bytes().to_vec();
        bytes.extend_from_slice(b"Jos\xe9\tLEGACY\n");
        let report = DelimitedTextLoader::new(&gw)
            .load_bytes(&bytes, "t", false)
            .unwrap();
        assert_eq!(report.legacy_lines, 1);
        let names: Vec<String> = gw
            .query("SELECT a FROM t ORDER BY b DESC", false, |r| r.get(0))
            .unwrap();
        assert_eq!(names, vec!["José", "José"]);
    }

    #[test]
    fn test_numbers_stay_text() {
        let gw = gateway();
        DelimitedTextLoader::new(&gw)
            .load_bytes(b"1.234,56\tx", "t", false)
            .unwrap();
        let values: Vec<String> = gw.query("SELECT a FROM t", false, |r| r.get(0)).unwrap();
        assert_eq!(values, vec!["1.234,56"]);
    }

    #[test]
    fn test_rejected_line_is_fatal() {
        let gw = gateway();
        let err = DelimitedTextLoader::new(&gw)
            .load_bytes(b"1\t2\t3\n", "t", false)
            .unwrap_err();
        assert!(matches!(err, EtlError::Statement { .. }));
    }

    #[test]
    fn test_failed_load_rolls_back_and_gateway_stays_usable() {
        let gw = gateway();
        let loader = DelimitedTextLoader::new(&gw);

        // second line has one field too many
        let err = loader.load_bytes(b"1\t2\n3\t4\t5\n", "t", false).unwrap_err();
        assert!(matches!(err, EtlError::Statement { .. }));
        assert!(!gw.in_transaction());
        assert_eq!(gw.query_i64("SELECT count(*) FROM t", false).unwrap(), Some(0));

        let report = loader.load_bytes(b"1\t2\n", "t", false).unwrap();
        assert_eq!(report.rows_inserted, 1);
        assert_eq!(gw.query_i64("SELECT count(*) FROM t", false).unwrap(), Some(1));
    }

    #[test]
    fn test_parse_catalog() {
        let cols = parse_catalog(b"system_type_name\tname\nint\tid\r\nnvarchar\tNome Fantasia\n\n").unwrap();
        assert_eq!(
            cols,
            vec![
                SourceColumn::with_name("id", "int"),
                SourceColumn::with_name("Nome Fantasia", "nvarchar"),
            ]
        );
    }

    #[test]
    fn test_parse_catalog_rejects_malformed_line() {
        let err = parse_catalog(b"int\tid\nbroken\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let gw = gateway();
        let err = DelimitedTextLoader::new(&gw)
            .load_from_text("/nonexistent/file.tsv", "t", true)
            .unwrap_err();
        assert!(matches!(err, EtlError::Io(_)));
    }
}
