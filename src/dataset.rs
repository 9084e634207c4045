//! Study tables: delimited stimulus files and the Dataset Updater
//!
//! A study table is kept as plain strings (header + rows) so that columns the
//! pipeline does not understand survive a read/write cycle untouched.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::model::SurprisalModel;

/// Delimiter of the study tables
pub const STUDY_DELIMITER: u8 = b';';
/// Column holding the stimulus up to and including the target word
pub const STIMULUS_COLUMN: &str = "Stimulus_tf";
/// Column holding the target word
pub const TARGET_COLUMN: &str = "Target";
/// Column holding the experimental condition label
pub const CONDITION_COLUMN: &str = "Condition";
/// Column holding the item number
pub const ITEM_COLUMN: &str = "Item";

/// Path of a study's stimulus table: `<data_dir>/<study>/<study>.csv`
pub fn study_path(data_dir: &Path, study: &str) -> PathBuf {
    data_dir.join(study).join(format!("{study}.csv"))
}

/// An in-memory delimited table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl StudyTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Read a delimited file with a header row
    pub fn read(path: &Path, delimiter: u8) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .from_path(path)
            .with_context(|| format!("Failed to open table {}", path.display()))?;

        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read header of {}", path.display()))?
            .iter()
            .map(str::to_string)
            .collect();

        let rows = reader
            .records()
            .enumerate()
            .map(|(i, record)| {
                record
                    .map(|r| r.iter().map(str::to_string).collect())
                    .with_context(|| format!("Malformed row {} in {}", i + 1, path.display()))
            })
            .collect::<Result<Vec<Vec<String>>>>()?;

        debug!("Read {} rows from {}", rows.len(), path.display());
        Ok(Self { headers, rows })
    }

    /// Write the table (header first), creating parent directories
    pub fn write(&self, path: &Path, delimiter: u8) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .with_context(|| format!("Missing column '{name}' (have: {})", self.headers.join(", ")))
    }

    /// All values of a column as strings
    pub fn column(&self, name: &str) -> Result<Vec<&str>> {
        let idx = self.require_column(name)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.get(idx)
                    .map(String::as_str)
                    .with_context(|| format!("Row {} has no '{name}' cell", i + 1))
            })
            .collect()
    }

    /// Numeric view of a column; empty cells and `NaN` become `None`
    pub fn column_f64(&self, name: &str) -> Result<Vec<Option<f64>>> {
        self.column(name)?
            .into_iter()
            .enumerate()
            .map(|(i, cell)| parse_cell(cell).with_context(|| format!("Row {}, column '{name}'", i + 1)))
            .collect()
    }

    /// Replace a column in place, or append it when absent
    pub fn set_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.rows.len() {
            anyhow::bail!(
                "Column '{name}' has {} values for {} rows",
                values.len(),
                self.rows.len()
            );
        }
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.headers.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }
}

/// Parse a numeric cell; blank and `NaN` cells are missing values
pub fn parse_cell(cell: &str) -> Result<Option<f64>> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let value: f64 = cell
        .parse()
        .with_context(|| format!("'{cell}' is not a number"))?;
    Ok((!value.is_nan()).then_some(value))
}

/// Round to `decimals` places, ties to even (`0.125` -> `0.12`)
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

/// Score every row of a study table and overwrite it in place.
///
/// Adds (or replaces) `<prefix>_surp` from the stimulus column and
/// `<prefix>_bpe_split` from the target column. The file is rewritten
/// directly, without a temporary copy.
pub fn update_study(path: &Path, model: &SurprisalModel) -> Result<StudyTable> {
    let spec = model.spec();
    let mut table = StudyTable::read(path, STUDY_DELIMITER)?;
    info!(
        "Scoring {} stimuli from {} with {}",
        table.len(),
        path.display(),
        spec.name
    );

    let stimuli = table.column(STIMULUS_COLUMN)?;
    let targets = table.column(TARGET_COLUMN)?;

    let mut surprisals = Vec::with_capacity(table.len());
    let mut splits = Vec::with_capacity(table.len());
    for (i, (stimulus, target)) in stimuli.iter().zip(&targets).enumerate() {
        let surprisal = model
            .last_word_surprisal(stimulus)
            .with_context(|| format!("Row {} of {}", i + 1, path.display()))?;
        let split = model.bpe_split(target)?;
        debug!("{:>4} {:<20} {:>8.3} bits, split={}", i + 1, target, surprisal, split);

        surprisals.push(surprisal.to_string());
        splits.push(split.to_string());
        if (i + 1) % 50 == 0 {
            info!("  {}/{} rows", i + 1, table.len());
        }
    }

    table.set_column(&spec.surprisal_column(), surprisals)?;
    table.set_column(&spec.bpe_column(), splits)?;
    table.write(path, STUDY_DELIMITER)?;

    info!("Wrote {} and {} to {}", spec.surprisal_column(), spec.bpe_column(), path.display());
    Ok(table)
}

/// Distinct target words in first-seen order
pub fn unique_targets(table: &StudyTable) -> Result<Vec<String>> {
    let mut seen = std::collections::HashSet::new();
    Ok(table
        .column(TARGET_COLUMN)?
        .into_iter()
        .filter(|t| seen.insert(*t))
        .map(str::to_string)
        .collect())
}

/// Write the distinct targets to `<data_dir>/<study>/<study>_target_words.txt`
pub fn write_target_words(data_dir: &Path, study: &str) -> Result<PathBuf> {
    let table = StudyTable::read(&study_path(data_dir, study), STUDY_DELIMITER)?;
    let targets = unique_targets(&table)?;
    let out = data_dir.join(study).join(format!("{study}_target_words.txt"));
    fs::write(&out, targets.join("\n"))
        .with_context(|| format!("Failed to write {}", out.display()))?;
    info!("{}: {} target words", study, targets.len());
    Ok(out)
}

/// Position of the target word in its sentence (1-based word count).
///
/// The target sentence is the text after the last `.`; punctuation is not
/// counted.
pub fn target_position(stimulus: &str) -> usize {
    let sentence = stimulus.rsplit('.').next().unwrap_or(stimulus).trim();
    let cleaned: String = sentence
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().count()
}

/// Add or replace the `Tw_position` column
pub fn add_target_positions(table: &mut StudyTable) -> Result<()> {
    let positions = table
        .column(STIMULUS_COLUMN)?
        .into_iter()
        .map(|s| target_position(s).to_string())
        .collect();
    table.set_column("Tw_position", positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> StudyTable {
        StudyTable {
            headers: vec!["Item".into(), "Condition".into(), "Target".into(), "Cloze".into()],
            rows: vec![
                vec!["1".into(), "A".into(), "Apfel".into(), "0.8".into()],
                vec!["1".into(), "B".into(), "Axt".into(), "".into()],
                vec!["2".into(), "A".into(), "Apfel".into(), "NaN".into()],
            ],
        }
    }

    #[test]
    fn test_round_trip_preserves_columns_and_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        let mut table = sample();
        table.write(&path, STUDY_DELIMITER).unwrap();

        let mut back = StudyTable::read(&path, STUDY_DELIMITER).unwrap();
        assert_eq!(back, table);

        back.set_column("x_surp", vec!["1.5".into(), "2".into(), "3".into()]).unwrap();
        back.write(&path, STUDY_DELIMITER).unwrap();
        let again = StudyTable::read(&path, STUDY_DELIMITER).unwrap();
        assert_eq!(again.headers.len(), 5);
        assert_eq!(&again.headers[..4], &table.headers[..]);
        for (new, old) in again.rows.iter().zip(&table.rows) {
            assert_eq!(&new[..4], &old[..]);
        }

        table.set_column("Cloze", vec!["a".into(), "b".into(), "c".into()]).unwrap();
        assert_eq!(table.headers.len(), 4);
        assert_eq!(table.rows[2][3], "c");
    }

    #[test]
    fn test_semicolon_cells_with_commas() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.csv");
        fs::write(&path, "Stimulus_tf;Target\nJa, er schärfte die Axt;Axt\n").unwrap();
        let table = StudyTable::read(&path, STUDY_DELIMITER).unwrap();
        assert_eq!(table.column(STIMULUS_COLUMN).unwrap(), ["Ja, er schärfte die Axt"]);
    }

    #[test]
    fn test_numeric_column_missing_values() {
        let values = sample().column_f64("Cloze").unwrap();
        assert_eq!(values, vec![Some(0.8), None, None]);
        assert!(sample().column_f64("Target").is_err());
    }

    #[test]
    fn test_missing_column_and_length_mismatch() {
        let mut table = sample();
        let err = table.column("Stimulus_tf").unwrap_err().to_string();
        assert!(err.contains("Stimulus_tf"));
        assert!(table.set_column("x", vec!["1".into()]).is_err());
    }

    #[test]
    fn test_unique_targets_first_seen_order() {
        assert_eq!(unique_targets(&sample()).unwrap(), ["Apfel", "Axt"]);
    }

    #[test]
    fn test_round_to_ties_to_even() {
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(0.375, 2), 0.38);
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(-0.125, 2), -0.12);
        assert_eq!(round_to(1.0 / 3.0, 3), 0.333);
    }

    #[test]
    fn test_target_position() {
        assert_eq!(
            target_position("Johann wollte Holz hacken. Dann schärfte er die Axt"),
            5
        );
        assert_eq!(target_position("Am Ende, sagte er, kam der Zug"), 7);
        assert_eq!(target_position("Ein Satz - mit Strich"), 4);
        assert_eq!(target_position("Fertig."), 0);
    }
}
