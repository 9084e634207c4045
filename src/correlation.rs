//! Kendall rank correlation between surprisal and behavioral measures

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::dataset::StudyTable;
use crate::model::ModelSpec;
use crate::study::StudyProfile;

/// Kendall's tau-b over the rows where both values are present.
///
/// Returns `NaN` with fewer than two complete pairs or when either variable
/// is constant.
pub fn kendall_tau_b(x: &[Option<f64>], y: &[Option<f64>]) -> f64 {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .collect();
    let n = pairs.len();
    if n < 2 {
        return f64::NAN;
    }

    let (mut concordant, mut discordant) = (0i64, 0i64);
    let (mut ties_x, mut ties_y) = (0i64, 0i64);
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = pairs[i].0 - pairs[j].0;
            let dy = pairs[i].1 - pairs[j].1;
            if dx == 0.0 {
                ties_x += 1;
            }
            if dy == 0.0 {
                ties_y += 1;
            }
            if dx == 0.0 || dy == 0.0 {
                continue;
            }
            if (dx > 0.0) == (dy > 0.0) {
                concordant += 1;
            } else {
                discordant += 1;
            }
        }
    }

    let n0 = (n * (n - 1) / 2) as i64;
    let denom = (((n0 - ties_x) * (n0 - ties_y)) as f64).sqrt();
    if denom == 0.0 {
        return f64::NAN;
    }
    (concordant - discordant) as f64 / denom
}

/// Square correlation matrix with labelled rows and columns
#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    /// Pairwise Kendall tau-b between the named columns (diagonal is 1)
    pub fn kendall(table: &StudyTable, columns: &[String]) -> Result<Self> {
        let data = columns
            .iter()
            .map(|c| table.column_f64(c))
            .collect::<Result<Vec<_>>>()?;

        let k = columns.len();
        let mut values = vec![vec![f64::NAN; k]; k];
        for i in 0..k {
            values[i][i] = 1.0;
            for j in (i + 1)..k {
                let tau = kendall_tau_b(&data[i], &data[j]);
                values[i][j] = tau;
                values[j][i] = tau;
            }
        }
        Ok(Self {
            columns: columns.to_vec(),
            values,
        })
    }

    pub fn get(&self, row: &str, col: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == row)?;
        let j = self.columns.iter().position(|c| c == col)?;
        Some(self.values[i][j])
    }

    /// Semicolon-delimited, with an unnamed leading index column
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let mut header = vec![String::new()];
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header)?;

        for (name, row) in self.columns.iter().zip(&self.values) {
            let mut record = vec![name.clone()];
            record.extend(row.iter().map(f64::to_string));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Behavioral columns of the study followed by one surprisal column per model
pub fn correlation_columns(profile: &StudyProfile, models: &[&ModelSpec]) -> Vec<String> {
    profile
        .behavioral_columns
        .iter()
        .map(|c| (*c).to_string())
        .chain(models.iter().map(|m| m.surprisal_column()))
        .collect()
}

/// Write `<results>/<study>/<study>_corr.csv`
pub fn study_correlations(
    table: &StudyTable,
    profile: &StudyProfile,
    models: &[&ModelSpec],
    results_dir: &Path,
) -> Result<PathBuf> {
    let columns = correlation_columns(profile, models);
    let matrix = CorrelationMatrix::kendall(table, &columns)
        .with_context(|| format!("Correlations for {}", profile.id))?;

    let path = results_dir
        .join(profile.id)
        .join(format!("{}_corr.csv", profile.id));
    matrix.write(&path)?;
    info!("Correlations: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().map(|v| Some(*v)).collect()
    }

    #[test]
    fn test_perfect_agreement_and_reversal() {
        let x = some(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(kendall_tau_b(&x, &some(&[10.0, 20.0, 30.0, 40.0])), 1.0);
        assert_eq!(kendall_tau_b(&x, &some(&[4.0, 3.0, 2.0, 1.0])), -1.0);
    }

    #[test]
    fn test_tau_b_with_ties() {
        // C=4, D=1, ties_x=1, ties_y=0, n0=6 -> 3 / sqrt(5 * 6)
        let x = some(&[1.0, 2.0, 2.0, 3.0]);
        let y = some(&[1.0, 3.0, 2.0, 2.5]);
        let expected = 3.0 / 30f64.sqrt();
        assert!((kendall_tau_b(&x, &y) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_pairwise_complete_and_undefined() {
        let x = vec![Some(1.0), None, Some(2.0), Some(3.0)];
        let y = vec![Some(1.0), Some(9.0), None, Some(2.0)];
        // Only rows 0 and 3 are complete
        assert_eq!(kendall_tau_b(&x, &y), 1.0);
        assert!(kendall_tau_b(&some(&[1.0]), &some(&[2.0])).is_nan());
        assert!(kendall_tau_b(&some(&[1.0, 1.0, 1.0]), &some(&[1.0, 2.0, 3.0])).is_nan());
    }

    #[test]
    fn test_matrix_file_layout() {
        let mut table = StudyTable::new(vec!["Cloze".into(), "m_surp".into()]);
        for (c, s) in [("0.9", "2"), ("0.5", "6"), ("0.1", "11"), ("", "3")] {
            table.rows.push(vec![c.into(), s.into()]);
        }
        let columns = vec!["Cloze".to_string(), "m_surp".to_string()];
        let matrix = CorrelationMatrix::kendall(&table, &columns).unwrap();
        assert_eq!(matrix.get("Cloze", "m_surp"), Some(-1.0));
        assert_eq!(matrix.get("m_surp", "m_surp"), Some(1.0));

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("corr.csv");
        matrix.write(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, ";Cloze;m_surp\nCloze;1;-1\nm_surp;-1;1\n");
    }

    #[test]
    fn test_correlation_columns() {
        let profile = StudyProfile::lookup("adbc23").unwrap();
        let leo = ModelSpec::by_name("leo13b").unwrap();
        let gerpt2 = ModelSpec::by_name("gerpt2").unwrap();
        assert_eq!(
            correlation_columns(profile, &[leo, gerpt2]),
            ["Cloze", "Plausibility", "leo13b_surp", "gerpt2_surp"]
        );
    }
}
