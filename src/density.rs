//! Surprisal density per experimental condition
//!
//! Gaussian kernel density estimates with Scott's bandwidth, one curve per
//! condition, scaled by the condition's share of the data so that the areas
//! of all curves sum to one. Curves are rendered to SVG with a dashed line at
//! each condition mean.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use plotters::prelude::*;
use statrs::distribution::{Continuous, Normal};
use tracing::{info, warn};

use crate::dataset::{StudyTable, CONDITION_COLUMN};
use crate::model::ModelSpec;
use crate::study::StudyProfile;

/// Evaluation points per curve
pub const GRID_SIZE: usize = 200;
/// Bandwidths the grid extends beyond the data
pub const CUT: f64 = 3.0;

/// A density curve for one condition
#[derive(Debug, Clone, PartialEq)]
pub struct DensityCurve {
    pub condition: String,
    pub label: String,
    pub color: String,
    pub n: usize,
    pub mean: f64,
    /// `(x, density)` pairs over the evaluation grid
    pub points: Vec<(f64, f64)>,
}

/// Scott's rule: `std(ddof=1) * n^(-1/5)`; `None` when undefined
pub fn scott_bandwidth(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let std = var.sqrt();
    (std > 0.0 && std.is_finite()).then(|| std * (n as f64).powf(-0.2))
}

/// `n` evenly spaced points from `lo` to `hi` inclusive
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            (0..n).map(|i| lo + step * i as f64).collect()
        }
    }
}

/// Gaussian KDE of `values` evaluated at each grid point
pub fn gaussian_kde(values: &[f64], bandwidth: f64, grid: &[f64]) -> Result<Vec<f64>> {
    let kernel = Normal::new(0.0, 1.0)?;
    let norm = values.len() as f64 * bandwidth;
    Ok(grid
        .iter()
        .map(|x| {
            values
                .iter()
                .map(|v| kernel.pdf((x - v) / bandwidth))
                .sum::<f64>()
                / norm
        })
        .collect())
}

/// One density curve per condition (first-seen order), clipped to
/// `[0, profile.x_max]`.
///
/// Rows with a missing value are dropped. Conditions with fewer than two
/// values or zero variance get no curve.
pub fn condition_densities(
    profile: &StudyProfile,
    conditions: &[&str],
    values: &[Option<f64>],
) -> Result<Vec<DensityCurve>> {
    let mut groups: Vec<(&str, Vec<f64>)> = Vec::new();
    for (cond, value) in conditions.iter().zip(values) {
        let idx = match groups.iter().position(|(c, _)| c == cond) {
            Some(idx) => idx,
            None => {
                groups.push((*cond, Vec::new()));
                groups.len() - 1
            }
        };
        if let Some(v) = value {
            groups[idx].1.push(*v);
        }
    }

    let total: usize = groups.iter().map(|(_, v)| v.len()).sum();
    if total == 0 {
        anyhow::bail!("No surprisal values to estimate densities from");
    }

    let mut curves = Vec::with_capacity(groups.len());
    for (i, (cond, data)) in groups.iter().enumerate() {
        let Some(bw) = scott_bandwidth(data) else {
            warn!("Condition '{}' has a degenerate sample (n={}), no density", cond, data.len());
            continue;
        };

        let min = data.iter().copied().fold(f64::INFINITY, f64::min);
        let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let lo = (min - CUT * bw).max(0.0);
        let hi = (max + CUT * bw).min(profile.x_max);
        if lo >= hi {
            warn!("Condition '{}' lies outside [0, {}]", cond, profile.x_max);
            continue;
        }

        let grid = linspace(lo, hi, GRID_SIZE);
        let share = data.len() as f64 / total as f64;
        let density = gaussian_kde(data, bw, &grid)?;

        curves.push(DensityCurve {
            condition: (*cond).to_string(),
            label: profile.relabel(cond).to_string(),
            color: profile.color(i).to_string(),
            n: data.len(),
            mean: data.iter().sum::<f64>() / data.len() as f64,
            points: grid
                .into_iter()
                .zip(density)
                .map(|(x, d)| (x, d * share))
                .collect(),
        });
    }
    Ok(curves)
}

/// Parse `#rrggbb` or one of the basic colour names
pub fn parse_color(color: &str) -> Result<RGBColor> {
    if let Some(hex) = color.strip_prefix('#') {
        if hex.len() != 6 {
            anyhow::bail!("Bad colour '{color}'");
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).with_context(|| format!("Bad colour '{color}'"))
        };
        return Ok(RGBColor(channel(0)?, channel(2)?, channel(4)?));
    }
    match color {
        "black" => Ok(BLACK),
        "red" => Ok(RED),
        "blue" => Ok(BLUE),
        "green" => Ok(RGBColor(0, 128, 0)),
        "white" => Ok(WHITE),
        _ => anyhow::bail!("Unknown colour '{color}'"),
    }
}

/// `<results>/<study>/plots/<study>_<model>_conditions.svg`
pub fn density_plot_path(results_dir: &Path, study: &str, model_prefix: &str) -> PathBuf {
    results_dir
        .join(study)
        .join("plots")
        .join(format!("{study}_{model_prefix}_conditions.svg"))
}

/// Draw the curves (filled, with dashed mean lines) to an SVG file
pub fn render_density_plot(
    path: &Path,
    profile: &StudyProfile,
    x_label: &str,
    curves: &[DensityCurve],
    with_title: bool,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let root = SVGBackend::new(path, (400, 400)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut builder = ChartBuilder::on(&root);
    builder
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50);
    if with_title {
        builder.caption(profile.title, ("sans-serif", 16));
    }
    let mut chart = builder.build_cartesian_2d(0.0..profile.x_max, 0.0..profile.y_max)?;

    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc("Density")
        .draw()?;

    for curve in curves {
        let color = parse_color(&curve.color)?;
        chart.draw_series(
            AreaSeries::new(curve.points.iter().copied(), 0.0, color.mix(0.25))
                .border_style(color.stroke_width(1)),
        )?;
    }
    for curve in curves {
        let color = parse_color(&curve.color)?;
        chart.draw_series(DashedLineSeries::new(
            [(curve.mean, 0.0), (curve.mean, profile.y_max)],
            5,
            3,
            color.stroke_width(1),
        ))?;
    }

    root.present()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Density plot of one model's surprisal in one study
pub fn plot_study_density(
    table: &StudyTable,
    profile: &StudyProfile,
    model: &ModelSpec,
    results_dir: &Path,
    with_title: bool,
) -> Result<PathBuf> {
    let conditions = table.column(CONDITION_COLUMN)?;
    let values = table.column_f64(&model.surprisal_column())?;
    let curves = condition_densities(profile, &conditions, &values)
        .with_context(|| format!("{} / {}", profile.id, model.column_prefix))?;

    let path = density_plot_path(results_dir, profile.id, model.column_prefix);
    render_density_plot(&path, profile, model.label, &curves, with_title)?;
    info!("Density plot: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trapezoid(points: &[(f64, f64)]) -> f64 {
        points
            .windows(2)
            .map(|w| (w[1].0 - w[0].0) * (w[0].1 + w[1].1) / 2.0)
            .sum()
    }

    #[test]
    fn test_scott_bandwidth() {
        // std(ddof=1) of 1..=5 is sqrt(2.5)
        let bw = scott_bandwidth(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert!((bw - 2.5f64.sqrt() * 5f64.powf(-0.2)).abs() < 1e-12);
        assert!(scott_bandwidth(&[1.0]).is_none());
        assert!(scott_bandwidth(&[2.0, 2.0]).is_none());
    }

    #[test]
    fn test_linspace_endpoints() {
        let grid = linspace(0.0, 1.0, 5);
        assert_eq!(grid, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_kde_integrates_to_one() {
        let data = [4.0, 5.0, 5.5, 7.0, 9.0];
        let bw = scott_bandwidth(&data).unwrap();
        let grid = linspace(-20.0, 40.0, 2000);
        let density = gaussian_kde(&data, bw, &grid).unwrap();
        let points: Vec<(f64, f64)> = grid.into_iter().zip(density).collect();
        assert!((trapezoid(&points) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_conditions_share_common_normalization() {
        let profile = StudyProfile::lookup("adsbc21").unwrap();
        let conditions = ["A", "A", "A", "B", "B", "B", "B", "B", "B", "A"];
        let values: Vec<Option<f64>> = [10.0, 11.0, 12.5, 14.0, 15.0, 13.0, 16.5, 14.5, 15.5, 11.5]
            .iter()
            .map(|v| Some(*v))
            .collect();
        let curves = condition_densities(profile, &conditions, &values).unwrap();

        assert_eq!(curves.len(), 2);
        assert_eq!(curves[0].label, "A: A+E+");
        assert_eq!(curves[1].color, "#BB5566");
        assert_eq!(curves[0].points.len(), GRID_SIZE);
        assert!((curves[0].mean - 11.25).abs() < 1e-12);
        // Grids span 3 bandwidths past the data, so nearly all mass is kept
        assert!((trapezoid(&curves[0].points) - 0.4).abs() < 0.01);
        assert!((trapezoid(&curves[1].points) - 0.6).abs() < 0.01);
    }

    #[test]
    fn test_clipping_and_missing_values() {
        let profile = StudyProfile::lookup("adbc23").unwrap();
        let conditions = ["A", "A", "A", "B", "C"];
        let values = [Some(0.1), Some(0.4), Some(1.0), None, Some(3.0)];
        let curves = condition_densities(profile, &conditions, &values).unwrap();

        // B has no values, C a single one
        assert_eq!(curves.len(), 1);
        let first = curves[0].points[0].0;
        let last = curves[0].points[GRID_SIZE - 1].0;
        assert_eq!(first, 0.0);
        assert!(last <= profile.x_max);
        assert!(condition_densities(profile, &["A"], &[None]).is_err());
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#BB5566").unwrap(), RGBColor(0xBB, 0x55, 0x66));
        assert_eq!(parse_color("red").unwrap(), RED);
        assert!(parse_color("#12").is_err());
        assert!(parse_color("mauve").is_err());
    }

    #[test]
    fn test_render_writes_svg() {
        let dir = tempfile::TempDir::new().unwrap();
        let profile = StudyProfile::lookup("dbc19").unwrap();
        let conditions = ["a", "a", "a", "b", "b", "b"];
        let values = [Some(5.0), Some(6.0), Some(8.0), Some(20.0), Some(22.0), Some(25.0)];
        let curves = condition_densities(profile, &conditions, &values).unwrap();

        let path = density_plot_path(dir.path(), "dbc19", "gerpt2");
        render_density_plot(&path, profile, "GerPT-2 surprisal", &curves, true).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(path.ends_with("dbc19/plots/dbc19_gerpt2_conditions.svg"));
    }
}
