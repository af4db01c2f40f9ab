//! CSV report output

use super::ComparisonRow;
use std::io::{self, Write};

const HEADER: &str = "reference,candidate,similarity_percent,risk,cosine_mfcc,cosine_chroma,\
cosine_spectral,dtw_mfcc_norm,dtw_chroma_norm,raw_score,fallback_used,error";

pub fn write<W: Write>(writer: &mut W, rows: &[ComparisonRow]) -> io::Result<()> {
    writeln!(writer, "{}", HEADER)?;

    for row in rows {
        match &row.record {
            Some(r) => writeln!(
                writer,
                "{},{},{:.2},{:?},{:.6},{:.6},{:.6},{:.6},{:.6},{:.4},{},",
                escape(&row.reference),
                escape(&row.candidate),
                r.similarity_percent,
                r.risk,
                r.cosine_mfcc,
                r.cosine_chroma,
                r.cosine_spectral,
                r.dtw_mfcc_norm,
                r.dtw_chroma_norm,
                r.raw_score,
                r.fallback_used,
            )?,
            None => writeln!(
                writer,
                "{},{},,,,,,,,,,{}",
                escape(&row.reference),
                escape(&row.candidate),
                escape(row.error.as_deref().unwrap_or("")),
            )?,
        }
    }

    Ok(())
}

/// Quote a field if it contains a delimiter, quote or newline.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
