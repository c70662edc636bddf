//! CSV row parsing for the one-time dataset ingestion
//!
//! Rows look like `label,f1,f2,...,fn` where every feature is a quantized
//! code in 0..=3. Malformed rows are counted and skipped, never fatal.

use crate::sample::Sample;
use serde::Serialize;

/// Hard cap on ingested samples
pub const MAX_SAMPLES: usize = 50_000;

/// Outcome of parsing one CSV line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Empty,
    Valid(Sample),
    Invalid(String),
}

/// Counters reported after an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CsvReport {
    pub valid: usize,
    pub invalid: usize,
    pub empty: usize,
    /// Rows ignored after the store's sample limit was reached
    pub truncated: usize,
}

impl CsvReport {
    pub fn total_lines(&self) -> usize {
        self.valid + self.invalid + self.empty + self.truncated
    }
}

/// Parse a single CSV line against the expected feature count
pub fn parse_row(line: &str, num_features: u16) -> RowOutcome {
    let line = line.trim();
    if line.is_empty() {
        return RowOutcome::Empty;
    }

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != num_features as usize + 1 {
        return RowOutcome::Invalid(format!(
            "expected {} fields, got {}",
            num_features as usize + 1,
            fields.len()
        ));
    }

    let label = match fields[0].parse::<u8>() {
        Ok(label) => label,
        Err(_) => return RowOutcome::Invalid(format!("bad label '{}'", fields[0])),
    };

    let mut values = Vec::with_capacity(num_features as usize);
    for (column, field) in fields[1..].iter().enumerate() {
        match field.parse::<u8>() {
            Ok(value) => values.push(value),
            Err(_) => {
                return RowOutcome::Invalid(format!("column {}: bad value '{}'", column + 1, field))
            }
        }
    }

    match Sample::from_values(label, &values) {
        Some(sample) => RowOutcome::Valid(sample),
        None => RowOutcome::Invalid("feature value above 3".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_row() {
        match parse_row(" 2, 0,1 ,3 ", 3) {
            RowOutcome::Valid(sample) => {
                assert_eq!(sample.label, 2);
                assert_eq!(sample.values(), vec![0, 1, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_field_count() {
        assert!(matches!(parse_row("1,0,1", 3), RowOutcome::Invalid(_)));
        assert!(matches!(parse_row("1,0,1,2,3", 3), RowOutcome::Invalid(_)));
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(matches!(parse_row("1,0,9", 2), RowOutcome::Invalid(_)));
        assert!(matches!(parse_row("x,0,1", 2), RowOutcome::Invalid(_)));
        assert!(matches!(parse_row("1,a,1", 2), RowOutcome::Invalid(_)));
    }

    #[test]
    fn test_parse_empty_line() {
        assert_eq!(parse_row("   ", 2), RowOutcome::Empty);
    }
}
