//! Example: show how a model's tokenizer segments stimuli and targets
//!
//! Only the tokenizer is downloaded, not the weights.
//!
//! Run with: cargo run --example tokenize -- -m leo13b

use anyhow::Result;
use clap::Parser;
use surprisal_rs::bpe::bpe_split;
use surprisal_rs::{HfTokenizer, ModelSpec, SubwordTokenizer};

#[derive(Parser)]
#[command(name = "tokenize")]
#[command(about = "Show sub-word segmentation and BPE-split flags")]
struct Args {
    #[arg(short, long, default_value = "gerpt2")]
    model: String,

    /// Text to segment
    #[arg(default_value = "Johann wollte Holz hacken. Dann schärfte er die Axt")]
    text: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let spec = ModelSpec::by_name(&args.model)?;

    println!("Loading {} tokenizer...", spec.hub_id);
    let tokenizer = HfTokenizer::from_hub(spec)?;

    let words: Vec<&str> = args.text.split_whitespace().collect();
    let ids = tokenizer.encode_words(&words)?;
    let tokens: Vec<String> = ids
        .iter()
        .map(|&id| tokenizer.id_to_token(id).unwrap_or_else(|| format!("<{id}>")))
        .collect();

    println!("\n=== Tokens ===");
    println!("{tokens:?}");
    println!("Length: {} tokens for {} words", ids.len(), words.len());

    println!("\n=== BPE split per word ===");
    for word in &words {
        let pieces = tokenizer.encode_word(word, false)?.len();
        let split = bpe_split(&tokenizer, word)?;
        println!("{word:<20} {pieces} piece(s)  split={split}");
    }

    Ok(())
}
