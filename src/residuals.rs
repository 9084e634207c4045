//! Mean absolute rERP residuals per condition and time window

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::round_to;
use crate::study::{StudyProfile, TimeWindow};

/// Surprisal predictors whose regressions are summarised by default
pub const DEFAULT_SURPRISAL_IDS: &[&str] = &["leo13b_surp", "gerpt2large_surp", "gerpt2_surp"];

/// One row of a regression-ERP export (other columns are ignored)
#[derive(Debug, Clone, Deserialize)]
pub struct RerpRecord {
    #[serde(rename = "Timestamp")]
    pub timestamp: f64,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Spec")]
    pub spec: String,
    #[serde(rename = "Condition")]
    pub condition: String,
    #[serde(rename = "Pz")]
    pub pz: Option<f64>,
}

/// One line of `mean_resids.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualRow {
    pub study_id: String,
    pub time_window: String,
    pub surp_id: String,
    pub condition: String,
    #[serde(rename = "Pz")]
    pub pz: f64,
    #[serde(rename = "Pz_across_cond")]
    pub pz_across_cond: f64,
}

/// `<data>/<study>/<study>_<surp_id>_rERP_data.csv`
pub fn rerp_path(data_dir: &Path, study: &str, surp_id: &str) -> PathBuf {
    data_dir
        .join(study)
        .join(format!("{study}_{surp_id}_rERP_data.csv"))
}

pub fn read_rerp(path: &Path) -> Result<Vec<RerpRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    reader
        .deserialize()
        .enumerate()
        .map(|(i, r)| r.with_context(|| format!("Row {} of {}", i + 1, path.display())))
        .collect()
}

/// Numeric condition codes 1..4 become A..D; anything else is kept
pub fn recode_condition(condition: &str) -> String {
    let letter = match condition.trim().parse::<f64>() {
        Ok(v) if v == 1.0 => "A",
        Ok(v) if v == 2.0 => "B",
        Ok(v) if v == 3.0 => "C",
        Ok(v) if v == 4.0 => "D",
        _ => return condition.to_string(),
    };
    letter.to_string()
}

/// Spec string of the residual rows for a single-predictor regression
pub fn residual_spec(surp_id: &str) -> String {
    format!("[:Intercept, :{surp_id}]")
}

/// Average `|Pz|` of the residual rows in `window`, per condition.
///
/// Only integer timestamps inside the inclusive window count. Conditions are
/// sorted; means are rounded to two decimals and `Pz_across_cond` is the
/// rounded mean of the unrounded condition means.
pub fn mean_residuals(
    records: &[RerpRecord],
    study_id: &str,
    window: &TimeWindow,
    surp_id: &str,
) -> Vec<ResidualRow> {
    let spec = residual_spec(surp_id);
    let mut sums: Vec<(String, f64, usize)> = Vec::new();

    for record in records {
        let in_window = record.timestamp.fract() == 0.0 && window.contains(record.timestamp as i64);
        if !in_window || record.kind != "res" || record.spec != spec {
            continue;
        }
        let Some(pz) = record.pz.filter(|v| !v.is_nan()) else {
            continue;
        };
        let condition = recode_condition(&record.condition);
        match sums.iter_mut().find(|(c, _, _)| *c == condition) {
            Some(entry) => {
                entry.1 += pz.abs();
                entry.2 += 1;
            }
            None => sums.push((condition, pz.abs(), 1)),
        }
    }
    sums.sort_by(|a, b| a.0.cmp(&b.0));

    let means: Vec<(String, f64)> = sums
        .into_iter()
        .map(|(c, sum, n)| (c, sum / n as f64))
        .collect();
    if means.is_empty() {
        return Vec::new();
    }
    let across = round_to(
        means.iter().map(|(_, m)| m).sum::<f64>() / means.len() as f64,
        2,
    );

    means
        .into_iter()
        .map(|(condition, mean)| ResidualRow {
            study_id: study_id.to_string(),
            time_window: window.name.to_string(),
            surp_id: surp_id.to_string(),
            condition,
            pz: round_to(mean, 2),
            pz_across_cond: across,
        })
        .collect()
}

/// Summaries for every study, predictor and time window
pub fn collect_mean_residuals(
    data_dir: &Path,
    studies: &[&StudyProfile],
    surp_ids: &[String],
) -> Result<Vec<ResidualRow>> {
    let mut rows = Vec::new();
    for study in studies {
        info!("{}", study.id);
        for surp_id in surp_ids {
            let records = read_rerp(&rerp_path(data_dir, study.id, surp_id))?;
            for window in &study.windows {
                info!(
                    "  {} {}: {}-{} ms",
                    surp_id, window.name, window.start_ms, window.end_ms
                );
                let summary = mean_residuals(&records, study.id, window, surp_id);
                if summary.is_empty() {
                    warn!("No residual rows for {} / {} / {}", study.id, surp_id, window.name);
                }
                rows.extend(summary);
            }
        }
    }
    Ok(rows)
}

/// Comma-delimited summary table
pub fn write_mean_residuals(path: &Path, rows: &[ResidualRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: f64, kind: &str, spec: &str, cond: &str, pz: f64) -> RerpRecord {
        RerpRecord {
            timestamp: ts,
            kind: kind.into(),
            spec: spec.into(),
            condition: cond.into(),
            pz: Some(pz),
        }
    }

    const WINDOW: TimeWindow = TimeWindow {
        name: "N400",
        start_ms: 300,
        end_ms: 500,
    };

    #[test]
    fn test_filters_window_type_and_spec() {
        let spec = "[:Intercept, :m_surp]";
        let records = vec![
            record(300.0, "res", spec, "1.0", -1.0),
            record(500.0, "res", spec, "1.0", 2.0),
            record(501.0, "res", spec, "1.0", 100.0),
            record(400.5, "res", spec, "1.0", 100.0),
            record(400.0, "est", spec, "1.0", 100.0),
            record(400.0, "res", "[:Intercept, :other]", "1.0", 100.0),
            record(400.0, "res", spec, "2", 0.333),
        ];
        let rows = mean_residuals(&records, "s", &WINDOW, "m_surp");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].condition, "A");
        assert_eq!(rows[0].pz, 1.5);
        assert_eq!(rows[1].condition, "B");
        assert_eq!(rows[1].pz, 0.33);
        // mean(1.5, 0.333) = 0.9165
        assert_eq!(rows[0].pz_across_cond, 0.92);
        assert_eq!(rows[1].time_window, "N400");
    }

    #[test]
    fn test_conditions_sorted_and_recoded() {
        let spec = residual_spec("x");
        let records = vec![
            record(350.0, "res", &spec, "4", 1.0),
            record(350.0, "res", &spec, "3", 1.0),
            record(350.0, "res", &spec, "1", 1.0),
        ];
        let conds: Vec<String> = mean_residuals(&records, "s", &WINDOW, "x")
            .into_iter()
            .map(|r| r.condition)
            .collect();
        assert_eq!(conds, ["A", "C", "D"]);
        assert_eq!(recode_condition("b"), "b");
    }

    #[test]
    fn test_empty_selection() {
        assert!(mean_residuals(&[], "s", &WINDOW, "x").is_empty());
    }

    #[test]
    fn test_read_and_write_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = rerp_path(dir.path(), "adbc23", "gerpt2_surp");
        std::fs::create_dir_all(input.parent().unwrap()).unwrap();
        std::fs::write(
            &input,
            "Timestamp,Type,Spec,Condition,Fz,Pz\n\
             300,res,\"[:Intercept, :gerpt2_surp]\",1.0,0.1,-0.5\n\
             310,res,\"[:Intercept, :gerpt2_surp]\",1.0,0.1,\n",
        )
        .unwrap();

        let records = read_rerp(&input).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].pz, None);

        let rows = mean_residuals(&records, "adbc23", &WINDOW, "gerpt2_surp");
        let out = dir.path().join("mean_resids.csv");
        write_mean_residuals(&out, &rows).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert_eq!(
            text,
            "study_id,time_window,surp_id,condition,Pz,Pz_across_cond\n\
             adbc23,N400,gerpt2_surp,A,0.5,0.5\n"
        );
    }
}
