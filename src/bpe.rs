//! BPE-split Detector and per-study split proportions

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::dataset::{round_to, StudyTable};
use crate::model::SubwordTokenizer;

/// 1 if `word` is segmented into more than one sub-word unit, else 0.
///
/// The word is encoded with special tokens, so a BOS the tokenizer prepends
/// on its own is discounted before comparing.
pub fn bpe_split(tokenizer: &dyn SubwordTokenizer, word: &str) -> Result<u8> {
    let n_units = tokenizer.encode_word(word, true)?.len();
    let bos = usize::from(tokenizer.adds_bos());
    Ok(u8::from(n_units > 1 + bos))
}

/// Share of flagged rows whose split flag is 1, rounded to three decimals.
///
/// Rows with a missing flag are left out of the denominator.
pub fn bpe_proportion(table: &StudyTable, column: &str) -> Result<f64> {
    let flags: Vec<f64> = table.column_f64(column)?.into_iter().flatten().collect();
    if flags.is_empty() {
        anyhow::bail!("No flagged rows to compute '{column}' proportion from");
    }
    let split = flags.iter().filter(|f| **f == 1.0).count();
    Ok(round_to(split as f64 / flags.len() as f64, 3))
}

/// One line of `bpe_splits.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BpeSummaryRow {
    pub study_id: String,
    pub model_id: String,
    pub bpe_prop: f64,
}

/// Write the summary as a semicolon-delimited table
pub fn write_bpe_summary(path: &Path, rows: &[BpeSummaryRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new().delimiter(b';').from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
