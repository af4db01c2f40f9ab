//! JSON report output

use super::{ComparisonRow, Summary};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Serialize)]
struct JsonReport<'a> {
    generated: String,
    summary: Summary,
    comparisons: &'a [ComparisonRow],
}

pub fn write<W: Write>(writer: &mut W, rows: &[ComparisonRow]) -> io::Result<()> {
    let report = JsonReport {
        generated: chrono::Local::now().to_rfc3339(),
        summary: Summary::from_rows(rows),
        comparisons: rows,
    };
    serde_json::to_writer_pretty(&mut *writer, &report)?;
    writeln!(writer)
}
