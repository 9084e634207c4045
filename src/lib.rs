// Pedantic clippy configuration for ML/math codebase
// These are acceptable in numerical/ML code:
#![allow(clippy::cast_precision_loss)] // usize→f64/f32 intentional in ML
#![allow(clippy::cast_possible_truncation)] // usize→u32 in tensor indexing
#![allow(clippy::cast_possible_wrap)] // usize→i64 in counts and timestamps
#![allow(clippy::many_single_char_names)] // x, y, i, j standard in math
#![allow(clippy::similar_names)] // related variables like `item`/`items`
#![allow(clippy::module_name_repetitions)] // SurprisalModel in model.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
#![allow(clippy::missing_panics_doc)] // # Panics section for every panic
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::return_self_not_must_use)] // #[must_use] on Self returns
#![allow(clippy::unused_self)] // &self for API consistency
#![allow(clippy::struct_field_names)] // field postfix patterns
#![allow(clippy::needless_pass_by_value)] // value params for API flexibility
#![allow(clippy::unnecessary_wraps)] // Result for future error handling
#![allow(clippy::cast_sign_loss)] // f64→usize when value is known positive
#![allow(clippy::float_cmp)] // exact comparisons on rounded/parsed values

//! surprisal-rs: word-level language model surprisal for psycholinguistic stimuli
//!
//! Scores German reading/ERP stimuli with causal language models, writes the
//! surprisal of each target word back into the study tables, and compares it
//! with human measures.
//!
//! ## Architecture
//!
//! - `model`: Model registry, `LanguageModel`/`SubwordTokenizer` seams and the `SurprisalModel` wrapper
//! - `forward_llama`: LLaMA forward pass returning next-token logits (Leo-13b)
//! - `forward_gpt2`: GPT-2 forward pass returning next-token logits (GerPT-2, secret GPT-2)
//! - `masks`: Cached causal attention masks
//! - `surprisal`: Chunking and sub-word to word surprisal aggregation
//! - `charmap`: Repair table for byte-level mis-decoded characters
//! - `bpe`: Detection of target words split into several sub-word units
//! - `dataset`: Semicolon-delimited study tables and the in-place updater
//! - `study`: Per-study labels, palettes, plot bounds and ERP time windows
//! - `density`: Per-condition kernel density estimates rendered to SVG
//! - `correlation`: Kendall rank correlations with behavioral measures
//! - `erp`: Merge of surprisal columns into ERP exports
//! - `residuals`: Mean absolute regression-ERP residuals per condition

pub mod bpe;
pub mod charmap;
pub mod correlation;
pub mod dataset;
pub mod density;
pub mod erp;
pub mod forward_gpt2;
pub mod forward_llama;
pub mod masks;
pub mod model;
pub mod residuals;
pub mod study;
pub mod surprisal;

pub use bpe::{bpe_proportion, bpe_split, write_bpe_summary, BpeSummaryRow};
pub use charmap::repair_word;
pub use correlation::{kendall_tau_b, study_correlations, CorrelationMatrix};
pub use dataset::{update_study, StudyTable};
pub use density::{condition_densities, plot_study_density, DensityCurve};
pub use erp::{merge_erp, prepare_erp_data, ErpMerge};
pub use forward_gpt2::{Gpt2Config, Gpt2Lm};
pub use forward_llama::{LlamaConfig, LlamaLm};
pub use masks::{clear_mask_caches, create_causal_mask};
pub use model::{
    HfTokenizer, LanguageModel, ModelArchitecture, ModelSpec, SubwordTokenizer, SurprisalModel,
    MODELS,
};
pub use residuals::{collect_mean_residuals, mean_residuals, ResidualRow};
pub use study::{StudyProfile, TimeWindow, STUDIES};
pub use surprisal::{aggregate_words, chunk_size, last_word_surprisal, word_surprisals, WordSurprisal};
