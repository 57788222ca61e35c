//! Export surface for readings and summaries
//!
//! Serializes a session's raw reading sequence to a flat tabular form
//! (timestamp, dB, classification category) and the full session to a
//! structured JSON document. Exact column naming and presentation are a
//! consumer concern; the contract here is that every field of a reading
//! and a summary is representable losslessly.

use crate::audio::meter::Reading;
use crate::exposure::aggregator::ExposureSummary;
use crate::exposure::classifier::classify;
use serde::Serialize;
use serde_json::json;
use std::io::{self, Write};

/// One flat row of exported session data
#[derive(Debug, Clone, Serialize)]
pub struct ExportRow {
    pub timestamp_ms: i64,
    pub value_db: f64,
    pub category: &'static str,
}

/// Build flat rows from a reading sequence, classifying each level
pub fn rows(readings: &[Reading]) -> Vec<ExportRow> {
    readings
        .iter()
        .map(|r| ExportRow {
            timestamp_ms: r.timestamp_ms,
            value_db: r.value_db,
            category: classify(r.value_db).category,
        })
        .collect()
}

/// Column header line for the flat tabular form
pub fn csv_header() -> &'static str {
    "timestamp_ms,value_db,category"
}

/// One data line of the flat tabular form
pub fn csv_line(row: &ExportRow) -> String {
    format!("{},{:.2},{}", row.timestamp_ms, row.value_db, row.category)
}

/// Write the full flat tabular form to `writer`
pub fn write_csv<W: Write>(writer: &mut W, readings: &[Reading]) -> io::Result<()> {
    writeln!(writer, "{}", csv_header())?;
    for row in rows(readings) {
        writeln!(writer, "{}", csv_line(&row))?;
    }
    Ok(())
}

/// Structured document carrying the summary and the raw reading sequence
pub fn session_document(summary: &ExposureSummary, readings: &[Reading]) -> serde_json::Value {
    json!({
        "version": crate::VERSION,
        "summary": summary,
        "readings": readings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::aggregator::ExposureAggregator;

    fn readings() -> Vec<Reading> {
        vec![
            Reading {
                value_db: 45.0,
                timestamp_ms: 0,
            },
            Reading {
                value_db: 92.5,
                timestamp_ms: 1000,
            },
        ]
    }

    #[test]
    fn test_rows_carry_classification() {
        let rows = rows(&readings());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].category, "Comfortable");
        assert_eq!(rows[1].category, "Dangerous");
    }

    #[test]
    fn test_csv_output() {
        let mut buffer = Vec::new();
        write_csv(&mut buffer, &readings()).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("timestamp_ms,value_db,category"));
        assert_eq!(lines.next(), Some("0,45.00,Comfortable"));
        assert_eq!(lines.next(), Some("1000,92.50,Dangerous"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_document_is_lossless() {
        let readings = readings();
        let summary = ExposureAggregator::from_readings(readings.clone()).finalize();
        let doc = session_document(&summary, &readings);

        assert_eq!(doc["readings"].as_array().unwrap().len(), 2);
        assert_eq!(doc["readings"][1]["value_db"], 92.5);
        assert_eq!(doc["summary"]["sample_count"], 2);
        // Every summary field survives the document round trip
        let parsed: ExposureSummary =
            serde_json::from_value(doc["summary"].clone()).unwrap();
        assert_eq!(parsed, summary);
    }
}
