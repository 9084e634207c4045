//! Evaluate collected surprisal: density plots, BPE-split proportions,
//! Kendall correlations and (optionally) the surprisal + ERP merge
//!
//! Run with: cargo run --example eval_surprisal -- --erp

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use surprisal_rs::dataset::{study_path, STUDY_DELIMITER};
use surprisal_rs::study::ANALYSED_STUDIES;
use surprisal_rs::{
    bpe_proportion, plot_study_density, prepare_erp_data, study_correlations, write_bpe_summary,
    BpeSummaryRow, ModelSpec, StudyProfile, StudyTable,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "eval_surprisal")]
#[command(about = "Density plots, BPE splits and correlations for collected surprisal")]
struct Args {
    /// Directory holding the augmented study tables
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Output directory for plots and tables
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Studies to evaluate
    #[arg(long, value_delimiter = ',', default_values = ANALYSED_STUDIES)]
    studies: Vec<String>,

    /// Models whose surprisal columns are evaluated (names or column prefixes)
    #[arg(long, value_delimiter = ',', default_values = ["leo13b", "secretgpt2", "gerpt2", "gerpt2large"])]
    models: Vec<String>,

    /// Put the study title on each plot
    #[arg(long)]
    titles: bool,

    /// Also merge surprisal into `<study>_erp.csv`
    #[arg(long)]
    erp: bool,

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

    let models = args
        .models
        .iter()
        .map(|m| ModelSpec::resolve(m))
        .collect::<Result<Vec<_>>>()?;

    let mut studies = Vec::new();
    for id in &args.studies {
        let profile = StudyProfile::lookup(id)?;
        let table = StudyTable::read(&study_path(&args.data_dir, profile.source_id), STUDY_DELIMITER)
            .with_context(|| format!("Study {id}"))?;
        studies.push((profile, table));
    }

    println!("=== Density plots ===");
    let mut bpe_rows = Vec::new();
    for (profile, table) in &studies {
        for model in &models {
            plot_study_density(table, profile, model, &args.results_dir, args.titles)?;
            bpe_rows.push(BpeSummaryRow {
                study_id: profile.id.to_string(),
                model_id: model.column_prefix.to_string(),
                bpe_prop: bpe_proportion(table, &model.bpe_column())?,
            });
        }
    }

    let bpe_path = args.results_dir.join("bpe_splits.csv");
    write_bpe_summary(&bpe_path, &bpe_rows)?;
    println!("\n=== BPE splits ===");
    for row in &bpe_rows {
        println!("{:<16} {:<12} {:.3}", row.study_id, row.model_id, row.bpe_prop);
    }
    info!("BPE summary saved to {}", bpe_path.display());

    println!("\n=== Correlations ===");
    for (profile, table) in &studies {
        let path = study_correlations(table, profile, &models, &args.results_dir)?;
        println!("{:<16} {}", profile.id, path.display());
    }

    if args.erp {
        println!("\n=== ERP merge ===");
        for (profile, table) in &studies {
            let path = prepare_erp_data(&args.data_dir, table, profile, &models)?;
            println!("{:<16} {}", profile.id, path.display());
        }
    }

    Ok(())
}
