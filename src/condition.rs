//! Condition table artifact.
//!
//! Tab-separated file the tool consumes to group its inputs. Columns are
//! fixed, in fixed order: sequence number, reference flag, run label,
//! condition, fraction, replicate, label (mirrors condition), source file
//! stem. Blank fraction/condition fields become "NA"; replicate numbers are
//! auto-assigned within each (fraction, condition) group only when the whole
//! replicate column is blank.

use std::collections::HashMap;
use std::path::Path;

use crate::datafiles::{file_stem, DataFileEntry};
use crate::error::WorkflowError;
use crate::progress::EventSinks;

/// Placeholder written for blank fraction/condition fields.
pub const BLANK_PLACEHOLDER: &str = "NA";

const HEADER: [&str; 8] = [
    "#",
    "Reference",
    "Run Label",
    "Condition",
    "Fraction",
    "Replicate",
    "Label",
    "File Name",
];

/// A replicate cell counts as blank when empty or a textual null.
fn is_blank(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "" | "none" | "nan")
}

/// Derive the condition table from a (normalized) filetable and write it to
/// `output_path`. A partially filled replicate column is accepted with a
/// warning, never auto-filled.
pub fn write_condition_file(
    entries: &[DataFileEntry],
    output_path: &Path,
    sinks: &EventSinks,
) -> Result<(), WorkflowError> {
    struct Row {
        reference: bool,
        run_label: String,
        condition: String,
        fraction: String,
        replicate: String,
        file_name: String,
    }

    let mut rows: Vec<Row> = entries
        .iter()
        .map(|entry| Row {
            reference: entry.reference,
            run_label: entry.name.clone(),
            condition: if entry.condition.is_empty() {
                BLANK_PLACEHOLDER.to_string()
            } else {
                entry.condition.clone()
            },
            fraction: if entry.fraction.is_empty() {
                BLANK_PLACEHOLDER.to_string()
            } else {
                entry.fraction.clone()
            },
            replicate: entry.replicate.clone(),
            file_name: file_stem(&entry.name),
        })
        .collect();

    // Auto-number replicates 1..k per (fraction, condition) group, but only
    // when no replicate was assigned anywhere in the batch.
    if rows.iter().all(|r| is_blank(&r.replicate)) {
        let mut counters: HashMap<(String, String), u32> = HashMap::new();
        for row in &mut rows {
            let next = counters
                .entry((row.fraction.clone(), row.condition.clone()))
                .or_insert(0);
            *next += 1;
            row.replicate = next.to_string();
        }
    }

    if rows.iter().any(|r| is_blank(&r.replicate)) {
        sinks.warn("Only some replicates were assigned, check your input");
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(output_path)?;
    writer.write_record(HEADER)?;
    for (seq, row) in rows.iter().enumerate() {
        writer.write_record([
            (seq + 1).to_string().as_str(),
            if row.reference { "True" } else { "False" },
            &row.run_label,
            &row.condition,
            &row.fraction,
            &row.replicate,
            // Label mirrors Condition
            &row.condition,
            &row.file_name,
        ])?;
    }
    writer.flush().map_err(WorkflowError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datafiles::FileType;
    use crate::progress::test_support::collecting;
    use crate::progress::LogLevel;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn entry(name: &str, condition: &str, fraction: &str, replicate: &str) -> DataFileEntry {
        DataFileEntry {
            name: name.to_string(),
            file_type: FileType::ThermoRaw,
            path: PathBuf::from(format!("/data/{}", name)),
            replicate: replicate.to_string(),
            condition: condition.to_string(),
            fraction: fraction.to_string(),
            reference: false,
        }
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn writes_fixed_columns_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cond.tsv");
        let entries = vec![entry("a.raw", "ctrl", "1", "2")];

        write_condition_file(&entries, &path, &EventSinks::disabled()).unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows[0], HEADER.to_vec());
        assert_eq!(
            rows[1],
            vec!["1", "False", "a.raw", "ctrl", "1", "2", "ctrl", "a"]
        );
    }

    #[test]
    fn blank_fields_become_na() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cond.tsv");
        let entries = vec![entry("a.raw", "", "", "1")];

        write_condition_file(&entries, &path, &EventSinks::disabled()).unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows[1][3], "NA");
        assert_eq!(rows[1][4], "NA");
        assert_eq!(rows[1][6], "NA"); // Label mirrors Condition
    }

    #[test]
    fn replicates_autoassigned_per_group_when_all_blank() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cond.tsv");
        let entries = vec![
            entry("a.raw", "ctrl", "1", ""),
            entry("b.raw", "ctrl", "1", ""),
            entry("c.raw", "treat", "1", ""),
            entry("d.raw", "ctrl", "1", ""),
        ];

        let (sinks, lines, _) = collecting();
        write_condition_file(&entries, &path, &sinks).unwrap();

        let rows = read_rows(&path);
        // contiguous 1..k per (fraction, condition) group, in row order
        assert_eq!(rows[1][5], "1");
        assert_eq!(rows[2][5], "2");
        assert_eq!(rows[3][5], "1");
        assert_eq!(rows[4][5], "3");
        // fully assigned: no warning
        assert!(!lines
            .lock()
            .unwrap()
            .iter()
            .any(|(level, _)| *level == LogLevel::Warn));
    }

    #[test]
    fn partial_replicates_warn_and_stay_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cond.tsv");
        let entries = vec![
            entry("a.raw", "ctrl", "1", "5"),
            entry("b.raw", "ctrl", "1", ""),
        ];

        let (sinks, lines, _) = collecting();
        write_condition_file(&entries, &path, &sinks).unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows[1][5], "5");
        assert_eq!(rows[2][5], "");
        assert!(lines
            .lock()
            .unwrap()
            .iter()
            .any(|(level, msg)| *level == LogLevel::Warn && msg.contains("replicates")));
    }

    #[test]
    fn reference_flag_serializes_like_the_tool_expects() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cond.tsv");
        let mut reference = entry("a.raw", "c", "f", "1");
        reference.reference = true;
        let entries = vec![reference, entry("b.raw", "c", "f", "2")];

        write_condition_file(&entries, &path, &EventSinks::disabled()).unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows[1][1], "True");
        assert_eq!(rows[2][1], "False");
    }
}
