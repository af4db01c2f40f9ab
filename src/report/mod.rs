//! Report generation for comparison results
//!
//! - **JSON**: machine-readable, with a generation timestamp and risk summary
//! - **CSV**: one row per compared pair, every metric in its own column
//!
//! # Usage
//!
//! ```ignore
//! use soundalike::report;
//!
//! // Picks the format from the extension
//! report::generate("matches.json", &rows)?;  // JSON
//! report::generate("matches.csv", &rows)?;   // CSV
//! ```

pub mod csv;
pub mod json;

use crate::analyzer::fusion::Risk;
use crate::analyzer::ScoreRecord;
use serde::Serialize;
use std::io;
use std::path::Path;

/// One reference/candidate comparison, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRow {
    pub reference: String,
    pub candidate: String,
    pub candidate_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<ScoreRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComparisonRow {
    pub fn risk(&self) -> Option<Risk> {
        self.record.as_ref().map(|r| r.risk)
    }

    /// Score used for ordering; failed rows sort last.
    pub fn sort_key(&self) -> f64 {
        self.record
            .as_ref()
            .map(|r| r.similarity_percent)
            .unwrap_or(f64::NEG_INFINITY)
    }
}

/// Generate a report in the appropriate format based on file extension
pub fn generate<P: AsRef<Path>>(path: P, rows: &[ComparisonRow]) -> io::Result<()> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let mut file = std::fs::File::create(path)?;

    match ext.as_str() {
        "json" => json::write(&mut file, rows),
        _ => csv::write(&mut file, rows),
    }
}

/// Risk counts for a batch of comparisons
#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub total: usize,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub error: usize,
    /// Comparisons where an input fell back to silence
    pub low_confidence: usize,
}

impl Summary {
    pub fn from_rows(rows: &[ComparisonRow]) -> Self {
        let mut summary = Self {
            total: rows.len(),
            ..Self::default()
        };

        for row in rows {
            match &row.record {
                Some(record) => {
                    match record.risk {
                        Risk::Low => summary.low += 1,
                        Risk::Medium => summary.medium += 1,
                        Risk::High => summary.high += 1,
                    }
                    if record.fallback_used {
                        summary.low_confidence += 1;
                    }
                }
                None => summary.error += 1,
            }
        }

        summary
    }
}
