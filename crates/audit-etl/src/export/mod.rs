//! Query results written out as tab-separated text.
//!
//! The output is meant for spreadsheets and for loading back with the
//! [text loader](crate::text): a header line with the column names, then one
//! line per row. Cells are rendered by storage class:
//!
//! | cell                          | written as                          |
//! |-------------------------------|-------------------------------------|
//! | integer (or integer-looking text) | digits, `#`-prefixed past 15 digits |
//! | real                          | decimal comma, at least 2 decimals  |
//! | text                          | as is, CR and LF removed            |
//! | blob                          | `#Bytes#`                           |
//! | NULL                          | `#NaN#`                             |
//!
//! Spreadsheets silently round integers longer than 15 digits (access keys,
//! document numbers), hence the `#` prefix.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::value::CellValue;
use crate::error::Result;
use crate::target::StatementGateway;

/// Marker written for NULL cells.
pub const NULL_MARKER: &str = "#NaN#";

/// Marker written for binary cells.
pub const BYTES_MARKER: &str = "#Bytes#";

/// Largest integer written without the `#` prefix.
pub const MAX_PLAIN_INTEGER: i64 = 999_999_999_999_999;

/// Outcome of one query export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExportReport {
    /// File written.
    pub path: PathBuf,
    /// Column names, in header order.
    pub columns: Vec<String>,
    /// Data rows written (header excluded).
    pub rows_written: u64,
    /// Cells written.
    pub cells: u64,
    /// Whether the cell cap stopped the export.
    pub capped: bool,
    /// Wall time.
    #[serde(with = "crate::transfer::duration_ms")]
    pub duration: Duration,
}

fn strip_line_breaks(text: &str) -> String {
    text.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Canonical digits of integer-looking text (`-` then ASCII digits).
///
/// Leading zeros are dropped, so `007` gives `7` and `-0` gives `0`.
fn integer_text(text: &str) -> Option<(bool, &str)> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        Some((false, "0"))
    } else {
        Some((negative, digits))
    }
}

fn format_real(value: f64) -> String {
    let text = value.to_string().replace('.', ",");
    match text.split_once(',') {
        Some((_, decimals)) if decimals.len() == 1 => format!("{}0", text),
        Some(_) => text,
        None => format!("{},00", text),
    }
}

/// Render one cell for a TSV line.
pub fn tsv_cell(value: &CellValue) -> String {
    match value {
        CellValue::Null => NULL_MARKER.to_string(),
        CellValue::Blob(_) => BYTES_MARKER.to_string(),
        CellValue::Integer(v) if *v > MAX_PLAIN_INTEGER => format!("#{}", v),
        CellValue::Integer(v) => v.to_string(),
        CellValue::Real(v) if v.is_finite() => format_real(*v),
        CellValue::Real(_) => NULL_MARKER.to_string(),
        CellValue::Text(text) => match integer_text(text) {
            Some((false, digits)) if digits.len() > 15 => format!("#{}", digits),
            Some((negative, digits)) => {
                format!("{}{}", if negative { "-" } else { "" }, digits)
            }
            None => strip_line_breaks(text),
        },
    }
}

/// Header line for `columns`, newline included.
pub fn tsv_header(columns: &[String]) -> String {
    let names: Vec<String> = columns.iter().map(|c| strip_line_breaks(c)).collect();
    format!("{}\n", names.join("\t"))
}

/// Data line for `row`, newline included.
pub fn tsv_line(row: &[CellValue]) -> String {
    let cells: Vec<String> = row.iter().map(tsv_cell).collect();
    format!("{}\n", cells.join("\t"))
}

/// Run `sql` and write its result to `path` as UTF-8 TSV.
///
/// An existing file is replaced. With `max_cells` set, the export stops after
/// the row that brings the cell count to the cap.
pub fn query_to_tsv(
    gateway: &StatementGateway,
    sql: &str,
    path: impl AsRef<Path>,
    max_cells: Option<u64>,
) -> Result<QueryExportReport> {
    let path = path.as_ref();
    let start = Instant::now();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let columns = gateway.column_names(sql)?;
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(tsv_header(&columns).as_bytes())?;

    let mut cells = 0u64;
    let mut capped = false;
    let rows_written = gateway.query_cells(sql, true, |row| {
        out.write_all(tsv_line(&row).as_bytes())?;
        cells += row.len() as u64;
        if max_cells.is_some_and(|max| cells >= max) {
            capped = true;
            return Ok(false);
        }
        Ok(true)
    })?;
    out.flush()?;

    let report = QueryExportReport {
        path: path.to_path_buf(),
        columns,
        rows_written,
        cells,
        capped,
        duration: start.elapsed(),
    };
    info!(
        "Wrote {} rows to {:?}{}",
        report.rows_written,
        report.path,
        if report.capped { " (cell cap reached)" } else { "" }
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::DelimitedTextLoader;

    fn gateway() -> StatementGateway {
        let gw = StatementGateway::open_in_memory().unwrap();
        gw.execute(
            "CREATE TABLE nfe (chave TEXT, numero INT, valor REAL, obs TEXT, anexo BLOB);",
            false,
        )
        .unwrap();
        gw
    }

    #[test]
    fn test_integers_past_fifteen_digits_are_marked() {
        assert_eq!(tsv_cell(&CellValue::Integer(999_999_999_999_999)), "999999999999999");
        assert_eq!(tsv_cell(&CellValue::Integer(1_000_000_000_000_000)), "#1000000000000000");
        assert_eq!(tsv_cell(&CellValue::Integer(-5)), "-5");

        let key = "35240112345678000199550010000012341000012345";
        assert_eq!(tsv_cell(&CellValue::Text(key.into())), format!("#{}", key));
        assert_eq!(tsv_cell(&CellValue::Text("007".into())), "7");
        assert_eq!(tsv_cell(&CellValue::Text("-0".into())), "0");
    }

    #[test]
    fn test_reals_use_decimal_comma() {
        assert_eq!(tsv_cell(&CellValue::Real(222588.85)), "222588,85");
        assert_eq!(tsv_cell(&CellValue::Real(60328.8)), "60328,80");
        assert_eq!(tsv_cell(&CellValue::Real(0.0)), "0,00");
        assert_eq!(tsv_cell(&CellValue::Real(-1.125)), "-1,125");
        assert_eq!(tsv_cell(&CellValue::Real(f64::NAN)), NULL_MARKER);
    }

    #[test]
    fn test_markers_and_text() {
        assert_eq!(tsv_cell(&CellValue::Null), "#NaN#");
        assert_eq!(tsv_cell(&CellValue::Blob(vec![1, 2])), "#Bytes#");
        assert_eq!(tsv_cell(&CellValue::Text("linha\r\nquebrada".into())), "linhaquebrada");
        assert_eq!(tsv_cell(&CellValue::Text("12a".into())), "12a");
        assert_eq!(tsv_cell(&CellValue::Text("-".into())), "-");
    }

    #[test]
    fn test_header_strips_line_breaks() {
        assert_eq!(
            tsv_header(&["Valor\nTotal".to_string(), "id".to_string()]),
            "ValorTotal\tid\n"
        );
    }

    #[test]
    fn test_query_to_tsv_writes_header_and_rows() {
        let gw = gateway();
        gw.execute(
            "INSERT INTO nfe VALUES ('35240112345678000199550010000012341000012345', 1, 10.5, 'a', X'00');
             INSERT INTO nfe VALUES ('x', 2, NULL, 'b\nc', NULL);",
            false,
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("nfe.txt");
        let report = query_to_tsv(&gw, "SELECT * FROM nfe ORDER BY numero", &path, None).unwrap();

        assert_eq!(report.rows_written, 2);
        assert_eq!(report.cells, 10);
        assert!(!report.capped);
        assert_eq!(report.columns, vec!["chave", "numero", "valor", "obs", "anexo"]);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "chave\tnumero\tvalor\tobs\tanexo\n\
             #35240112345678000199550010000012341000012345\t1\t10,50\ta\t#Bytes#\n\
             x\t2\t#NaN#\tbc\t#NaN#\n"
        );
    }

    #[test]
    fn test_empty_result_still_writes_header() {
        let gw = gateway();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "stale contents\n").unwrap();

        let report = query_to_tsv(&gw, "SELECT chave, numero FROM nfe", &path, None).unwrap();
        assert_eq!(report.rows_written, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "chave\tnumero\n");
    }

    #[test]
    fn test_cell_cap_stops_export() {
        let gw = gateway();
        gw.execute(
            "INSERT INTO nfe (chave, numero) VALUES ('a', 1), ('b', 2), ('c', 3);",
            false,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cap.txt");

        // two cells per row: the cap of 3 is reached on the second row
        let report =
            query_to_tsv(&gw, "SELECT chave, numero FROM nfe ORDER BY numero", &path, Some(3))
                .unwrap();
        assert!(report.capped);
        assert_eq!(report.rows_written, 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_bad_query_is_fatal() {
        let gw = gateway();
        let dir = tempfile::tempdir().unwrap();
        let err = query_to_tsv(&gw, "SELECT nope FROM nfe", dir.path().join("x.txt"), None)
            .unwrap_err();
        assert!(matches!(err, crate::error::EtlError::Statement { .. }));
    }

    #[test]
    fn test_export_loads_back_with_text_loader() {
        let gw = gateway();
        gw.execute(
            "INSERT INTO nfe (chave, obs) VALUES ('1', 'São Paulo'), ('2', 'd''água');
             CREATE TABLE copia (chave TEXT, obs TEXT);",
            false,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nfe.txt");
        query_to_tsv(&gw, "SELECT chave, obs FROM nfe ORDER BY chave", &path, None).unwrap();

        let report = DelimitedTextLoader::new(&gw)
            .load_from_text(&path, "copia", true)
            .unwrap();
        assert_eq!(report.rows_inserted, 2);
        let obs: Vec<String> = gw
            .query("SELECT obs FROM copia ORDER BY chave", false, |r| r.get(0))
            .unwrap();
        assert_eq!(obs, vec!["São Paulo", "d'água"]);
    }
}
