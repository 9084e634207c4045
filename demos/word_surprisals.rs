//! Example: surprisal of every word in a passage
//!
//! Run with: cargo run --example word_surprisals -- -m gerpt2 "Der Mann aß den Apfel"

use anyhow::Result;
use clap::Parser;
use surprisal_rs::{ModelSpec, SurprisalModel};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "word_surprisals")]
#[command(about = "Print per-word surprisal for a passage")]
struct Args {
    /// Model name from the registry
    #[arg(short, long, default_value = "gerpt2")]
    model: String,

    /// Text to score
    text: String,

    /// Use CPU instead of CUDA
    #[arg(long)]
    cpu: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let spec = ModelSpec::by_name(&args.model)?;
    let model = SurprisalModel::from_spec(spec, args.cpu)?;

    println!("\n=== {} ===", spec.label);
    println!("Chunk size: {} words", model.chunk_size());
    println!("Tokens: {:?}", model.tokenize(&args.text)?);
    let words = model.word_surprisals(&args.text)?;
    for (i, w) in words.iter().enumerate() {
        println!("{:>4}  {:<24} {:>8.3}", i + 1, w.word, w.surprisal);
    }
    let total: f64 = words.iter().map(|w| w.surprisal).sum();
    println!("\n{} words, {:.3} bits total", words.len(), total);

    Ok(())
}
