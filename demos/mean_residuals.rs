//! Mean absolute rERP residuals per study, predictor, time window and condition
//!
//! Run with: cargo run --example mean_residuals

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use surprisal_rs::residuals::{write_mean_residuals, DEFAULT_SURPRISAL_IDS};
use surprisal_rs::study::ANALYSED_STUDIES;
use surprisal_rs::{collect_mean_residuals, StudyProfile};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "mean_residuals")]
#[command(about = "Average absolute regression-ERP residuals by condition")]
struct Args {
    /// Directory holding `<study>/<study>_<surp_id>_rERP_data.csv`
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Output directory
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    #[arg(long, value_delimiter = ',', default_values = ANALYSED_STUDIES)]
    studies: Vec<String>,

    /// Surprisal predictors (`<prefix>_surp`)
    #[arg(long, value_delimiter = ',', default_values = DEFAULT_SURPRISAL_IDS)]
    surp_ids: Vec<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let studies = args
        .studies
        .iter()
        .map(|s| StudyProfile::lookup(s))
        .collect::<Result<Vec<_>>>()?;

    let rows = collect_mean_residuals(&args.data_dir, &studies, &args.surp_ids)?;

    println!("=== Mean |Pz| residuals ===");
    for row in &rows {
        println!(
            "{:<16} {} {:<18} {} {:>6.2} (across: {:.2})",
            row.study_id, row.time_window, row.surp_id, row.condition, row.pz, row.pz_across_cond
        );
    }

    let out = args.results_dir.join("mean_resids.csv");
    write_mean_residuals(&out, &rows)?;
    info!("Saved {} rows to {}", rows.len(), out.display());
    Ok(())
}
