//! Merge of surprisal columns into ERP time-series exports

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::dataset::{StudyTable, CONDITION_COLUMN, ITEM_COLUMN};
use crate::model::ModelSpec;
use crate::study::StudyProfile;

/// Item column name used by some ERP exports
pub const ERP_ITEM_ALIAS: &str = "ItemNum";

/// Join key; numeric cells compare by value so `3` matches `3.0`
fn join_key(item: &str, condition: &str) -> (String, String) {
    let item = item.trim();
    let item = match item.parse::<f64>() {
        Ok(v) => v.to_string(),
        Err(_) => item.to_string(),
    };
    (item, condition.trim().to_string())
}

/// Merged table plus what the join could not resolve cleanly
#[derive(Debug, Clone)]
pub struct ErpMerge {
    pub table: StudyTable,
    /// ERP rows with no stimulus for their key
    pub unmatched: usize,
    /// Stimulus rows ignored because an earlier row had the same key
    pub duplicates: usize,
}

/// Left-join `surprisal_columns` of `stimuli` onto every ERP row by
/// (`Item`, `Condition`).
///
/// Output columns are `Item`, `Condition`, the remaining ERP columns in
/// their original order, then the joined columns. ERP rows without a match
/// get empty cells; for duplicated stimulus keys the first row wins and the
/// rest are counted in [`ErpMerge::duplicates`].
pub fn merge_erp(erp: &StudyTable, stimuli: &StudyTable, surprisal_columns: &[String]) -> Result<ErpMerge> {
    let mut erp = erp.clone();
    if erp.column_index(ITEM_COLUMN).is_none() {
        if let Some(idx) = erp.column_index(ERP_ITEM_ALIAS) {
            erp.headers[idx] = ITEM_COLUMN.to_string();
        }
    }

    let erp_items = erp.column(ITEM_COLUMN)?;
    let erp_conditions = erp.column(CONDITION_COLUMN)?;

    let stim_items = stimuli.column(ITEM_COLUMN)?;
    let stim_conditions = stimuli.column(CONDITION_COLUMN)?;
    let joined = surprisal_columns
        .iter()
        .map(|c| stimuli.column(c))
        .collect::<Result<Vec<_>>>()?;

    let mut lookup: HashMap<(String, String), usize> = HashMap::new();
    let mut duplicates = 0usize;
    for (row, (item, cond)) in stim_items.iter().zip(&stim_conditions).enumerate() {
        let key = join_key(item, cond);
        if lookup.contains_key(&key) {
            debug!("Duplicate stimulus key (Item {}, Condition {})", key.0, key.1);
            duplicates += 1;
        } else {
            lookup.insert(key, row);
        }
    }

    let item_idx = erp.column_index(ITEM_COLUMN).context("ERP table has no item column")?;
    let cond_idx = erp
        .column_index(CONDITION_COLUMN)
        .context("ERP table has no condition column")?;
    let rest: Vec<usize> = (0..erp.headers.len())
        .filter(|&i| i != item_idx && i != cond_idx)
        .collect();

    let mut headers = vec![ITEM_COLUMN.to_string(), CONDITION_COLUMN.to_string()];
    headers.extend(rest.iter().map(|&i| erp.headers[i].clone()));
    headers.extend(surprisal_columns.iter().cloned());
    let mut merged = StudyTable::new(headers);

    let mut unmatched = 0usize;
    for (r, row) in erp.rows.iter().enumerate() {
        let mut out = vec![erp_items[r].to_string(), erp_conditions[r].to_string()];
        out.extend(rest.iter().map(|&i| row[i].clone()));
        match lookup.get(&join_key(erp_items[r], erp_conditions[r])) {
            Some(&s) => out.extend(joined.iter().map(|col| col[s].to_string())),
            None => {
                unmatched += 1;
                out.extend(std::iter::repeat(String::new()).take(joined.len()));
            }
        }
        merged.rows.push(out);
    }

    if duplicates > 0 {
        warn!(
            "{} duplicated stimulus keys; each ERP row takes the first matching stimulus",
            duplicates
        );
    }
    if unmatched > 0 {
        warn!("{} ERP rows have no stimulus match", unmatched);
    }
    Ok(ErpMerge {
        table: merged,
        unmatched,
        duplicates,
    })
}

/// Columns carried from the stimulus table into the ERP export
pub fn erp_join_columns(profile: &StudyProfile, models: &[&ModelSpec]) -> Vec<String> {
    let cloze = profile.erp_needs_cloze.then(|| "Cloze".to_string());
    cloze
        .into_iter()
        .chain(models.iter().map(|m| m.surprisal_column()))
        .collect()
}

/// Read `<data>/<study>/<study>_erp.csv`, merge, and write
/// `<data>/<study>/<study>_surp_erp.csv` (comma-delimited)
pub fn prepare_erp_data(
    data_dir: &Path,
    stimuli: &StudyTable,
    profile: &StudyProfile,
    models: &[&ModelSpec],
) -> Result<PathBuf> {
    let study_dir = data_dir.join(profile.id);
    let erp = StudyTable::read(&study_dir.join(format!("{}_erp.csv", profile.id)), b',')?;
    info!("ERP data: {} rows x {} columns", erp.len(), erp.headers.len());

    let merged = merge_erp(&erp, stimuli, &erp_join_columns(profile, models))?.table;
    info!("Merged data: {} rows x {} columns", merged.len(), merged.headers.len());

    let out = study_dir.join(format!("{}_surp_erp.csv", profile.id));
    merged.write(&out, b',')?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: &[&[&str]]) -> StudyTable {
        StudyTable {
            headers: headers.iter().map(|h| (*h).to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| (*c).to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn test_left_join_with_item_alias() {
        let erp = table(
            &["Subject", "ItemNum", "Condition", "Timestamp", "Pz"],
            &[
                &["s1", "1", "a", "0", "0.5"],
                &["s1", "1", "b", "0", "-1.2"],
                &["s1", "7", "a", "0", "3.0"],
            ],
        );
        let stimuli = table(
            &["Item", "Condition", "Cloze", "m_surp"],
            &[&["1", "a", "0.9", "2.5"], &["1", "b", "0.1", "9.75"]],
        );
        let columns = vec!["Cloze".to_string(), "m_surp".to_string()];
        let result = merge_erp(&erp, &stimuli, &columns).unwrap();
        assert_eq!(result.unmatched, 1);
        assert_eq!(result.duplicates, 0);
        let merged = result.table;

        assert_eq!(
            merged.headers,
            ["Item", "Condition", "Subject", "Timestamp", "Pz", "Cloze", "m_surp"]
        );
        assert_eq!(merged.rows[0], ["1", "a", "s1", "0", "0.5", "0.9", "2.5"]);
        assert_eq!(merged.rows[1][6], "9.75");
        assert_eq!(merged.rows[2][5], "");
        assert_eq!(merged.len(), erp.len());
    }

    #[test]
    fn test_numeric_keys_match_by_value() {
        let erp = table(&["Item", "Condition"], &[&["3.0", "A"]]);
        let stimuli = table(&["Item", "Condition", "m_surp"], &[&["3", "A", "1.5"]]);
        let merged = merge_erp(&erp, &stimuli, &["m_surp".to_string()]).unwrap().table;
        assert_eq!(merged.rows[0][2], "1.5");
    }

    #[test]
    fn test_first_duplicate_wins() {
        let erp = table(&["Item", "Condition"], &[&["1", "A"]]);
        let stimuli = table(
            &["Item", "Condition", "m_surp"],
            &[&["1", "A", "first"], &["1.0", "A", "second"], &["2", "A", "other"]],
        );
        let result = merge_erp(&erp, &stimuli, &["m_surp".to_string()]).unwrap();
        assert_eq!(result.duplicates, 1);
        assert_eq!(result.table.len(), 1);
        assert_eq!(result.table.rows[0][2], "first");
    }

    #[test]
    fn test_join_columns_follow_profile() {
        let gerpt2 = ModelSpec::by_name("gerpt2").unwrap();
        let dbc19 = StudyProfile::lookup("dbc19").unwrap();
        let adbc23 = StudyProfile::lookup("adbc23").unwrap();
        assert_eq!(erp_join_columns(dbc19, &[gerpt2]), ["Cloze", "gerpt2_surp"]);
        assert_eq!(erp_join_columns(adbc23, &[gerpt2]), ["gerpt2_surp"]);
    }
}
