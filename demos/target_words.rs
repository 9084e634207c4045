//! Example: target word lists and target-word positions per study
//!
//! Writes `<study>_target_words.txt` next to each table; with `--positions`
//! also adds a `Tw_position` column to the table itself.
//!
//! Run with: cargo run --example target_words -- --positions

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use surprisal_rs::dataset::{add_target_positions, study_path, write_target_words, STUDY_DELIMITER};
use surprisal_rs::study::COLLECTED_STUDIES;
use surprisal_rs::StudyTable;

#[derive(Parser)]
#[command(name = "target_words")]
#[command(about = "Extract target words and their sentence positions")]
struct Args {
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[arg(long, value_delimiter = ',', default_values = COLLECTED_STUDIES)]
    studies: Vec<String>,

    /// Add `Tw_position` to each study table (overwrites it)
    #[arg(long)]
    positions: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    for study in &args.studies {
        println!("{study}");
        let out = write_target_words(&args.data_dir, study)?;
        println!("  target words -> {}", out.display());

        if args.positions {
            let path = study_path(&args.data_dir, study);
            let mut table = StudyTable::read(&path, STUDY_DELIMITER)?;
            add_target_positions(&mut table)?;
            table.write(&path, STUDY_DELIMITER)?;
            println!("  Tw_position  -> {}", path.display());
        }
    }

    Ok(())
}
