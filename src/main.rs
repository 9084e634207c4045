//! surprisal-rs CLI: collect target-word surprisal for the study tables

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use surprisal_rs::dataset::{study_path, update_study};
use surprisal_rs::study::COLLECTED_STUDIES;
use surprisal_rs::{bpe_proportion, ModelSpec, SurprisalModel};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "surprisal-rs")]
#[command(about = "Collect language model surprisal for psycholinguistic stimuli")]
#[command(version)]
struct Cli {
    /// Model to score with (leo13b, secret-gpt-2, gerpt2, gerpt2-large)
    #[arg(short, long)]
    model: String,

    /// Directory holding `<study>/<study>.csv`
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Studies to update
    #[arg(long, value_delimiter = ',', default_values = COLLECTED_STUDIES)]
    studies: Vec<String>,

    /// Verbose output (per-stimulus word surprisal)
    #[arg(short, long)]
    verbose: bool,

    /// Force CPU mode (slower but avoids CUDA issues)
    #[arg(long)]
    cpu: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let spec = ModelSpec::by_name(&cli.model)?;

    println!("=== surprisal-rs: target word surprisal ===");
    println!("Model:   {} ({})", spec.name, spec.hub_id);
    println!("Data:    {}", cli.data_dir.display());
    println!("Studies: {}", cli.studies.join(", "));
    if cli.cpu {
        println!("Mode:    CPU (forced)");
    }

    info!("Loading model...");
    let model = SurprisalModel::from_spec(spec, cli.cpu)?;
    info!(
        "Context window: {} tokens, {} words per chunk, vocabulary {}",
        model.context_window(),
        model.chunk_size(),
        model.language_model().vocab_size()
    );

    println!("\n=== Results ===");
    for study in &cli.studies {
        let path = study_path(&cli.data_dir, study);
        let table = update_study(&path, &model).with_context(|| format!("Study {study}"))?;
        let surprisals: Vec<f64> = table
            .column_f64(&spec.surprisal_column())?
            .into_iter()
            .flatten()
            .collect();
        let mean = surprisals.iter().sum::<f64>() / surprisals.len().max(1) as f64;
        let split = bpe_proportion(&table, &spec.bpe_column())?;
        println!(
            "{:<10} {:>4} rows, mean surprisal {:>6.2} bits, BPE split {:.3}",
            study,
            table.len(),
            mean,
            split
        );
    }

    Ok(())
}
