//! Surprisal Aggregator: word-level surprisal from sub-word log-probabilities
//!
//! A stimulus is split on whitespace, regrouped into chunks of at most
//! `floor(0.75 * context_window)` words, and each chunk is scored with one
//! forward pass. Token surprisal is `-log2 p(token | preceding tokens in the
//! chunk)`; consecutive tokens are summed into a word until the next token
//! starts with the model's whitespace marker.
//!
//! ## Chunk boundaries
//!
//! Context does not carry over from one chunk to the next, so the chain-rule
//! identity (word surprisal = joint negative log-probability of its tokens
//! given everything before) only holds within a chunk. Chunk length is
//! counted in words, not tokens; a chunk whose tokens overflow the context
//! window is reported as an error rather than re-split.

use std::f64::consts::LN_2;

use anyhow::{Context, Result};
use candle_core::{DType, Tensor, D};
use tracing::debug;

use crate::charmap::repair_word;
use crate::model::SurprisalModel;

/// Share of the context window (counted in words) one chunk may span
pub const CHUNK_FRACTION: f64 = 0.75;

/// Surprisal of one reconstructed word
#[derive(Debug, Clone, PartialEq)]
pub struct WordSurprisal {
    /// Surface form rebuilt from the word's sub-word tokens
    pub word: String,
    /// Sum of the tokens' surprisal, in bits
    pub surprisal: f64,
}

/// Maximum number of words per chunk for a given context window
pub fn chunk_size(context_window: usize) -> usize {
    (CHUNK_FRACTION * context_window as f64) as usize
}

/// Split whitespace-delimited words into consecutive chunks of at most `size`
/// words. Boundaries depend only on word count.
pub fn chunk_words(text: &str, size: usize) -> Result<Vec<Vec<&str>>> {
    if size == 0 {
        anyhow::bail!("Chunk size must be at least one word");
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    Ok(words.chunks(size).map(<[&str]>::to_vec).collect())
}

/// Per-token surprisal (bits) from logits of shape `[1, seq, vocab]`.
///
/// Element `i` of the result is the surprisal of `ids[i + 1]` under the
/// distribution predicted at position `i`; the first token is never scored.
pub fn token_surprisals(logits: &Tensor, ids: &[u32]) -> Result<Vec<f64>> {
    let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
    let (seq_len, _) = logits.dims2()?;
    if seq_len != ids.len() {
        anyhow::bail!(
            "Logits cover {seq_len} positions but {} token ids were given",
            ids.len()
        );
    }
    if seq_len < 2 {
        return Ok(Vec::new());
    }

    let log_probs = candle_nn::ops::log_softmax(&logits.narrow(0, 0, seq_len - 1)?, D::Minus1)?;
    let targets = Tensor::new(&ids[1..], logits.device())?.unsqueeze(1)?;
    let observed: Vec<f32> = log_probs.gather(&targets, 1)?.squeeze(1)?.to_vec1()?;

    Ok(observed.into_iter().map(|lp| -f64::from(lp) / LN_2).collect())
}

/// Group sub-word tokens into words.
///
/// A word ends after token `i` when `i` is the last token or token `i + 1`
/// starts with `ws_indicator`. The indicator is stripped from the word form.
pub fn aggregate_words(
    tokens: &[String],
    surprisals: &[f64],
    ws_indicator: &str,
) -> Vec<WordSurprisal> {
    debug_assert_eq!(tokens.len(), surprisals.len());

    let mut words = Vec::new();
    let mut form = String::new();
    let mut total = 0.0;

    for (i, (token, surprisal)) in tokens.iter().zip(surprisals).enumerate() {
        form.push_str(token);
        total += surprisal;

        let ends_word = tokens
            .get(i + 1)
            .map_or(true, |next| next.starts_with(ws_indicator));
        if ends_word {
            let word = form.strip_prefix(ws_indicator).unwrap_or(&form).to_string();
            words.push(WordSurprisal {
                word,
                surprisal: total,
            });
            form.clear();
            total = 0.0;
        }
    }

    words
}

/// Score one chunk of words with a single forward pass
fn score_chunk(model: &SurprisalModel, words: &[&str]) -> Result<Vec<WordSurprisal>> {
    let spec = model.spec();
    let tokenizer = model.tokenizer();

    let mut ids = tokenizer.encode_words(words)?;
    if spec.bos_pad {
        let bos = tokenizer
            .bos_token_id()
            .with_context(|| format!("No '{}' token for BOS padding", spec.bos_token))?;
        ids.insert(0, bos);
    }
    if ids.len() > model.context_window() {
        anyhow::bail!(
            "Chunk of {} words encodes to {} tokens, beyond the context window of {}",
            words.len(),
            ids.len(),
            model.context_window()
        );
    }

    let input = Tensor::new(ids.as_slice(), model.device())?.unsqueeze(0)?;
    let logits = model.language_model().forward(&input)?;
    let surprisals = token_surprisals(&logits, &ids)?;

    let tokens = ids
        .iter()
        .skip(1)
        .map(|&id| {
            tokenizer
                .id_to_token(id)
                .with_context(|| format!("Token id {id} is not in the vocabulary"))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut records = aggregate_words(&tokens, &surprisals, spec.ws_indicator);
    if spec.repair_chars {
        for record in &mut records {
            record.word = repair_word(&record.word);
        }
    }
    Ok(records)
}

/// Surprisal of every word of `text`, chunk by chunk, in one pass
pub fn word_surprisals(model: &SurprisalModel, text: &str) -> Result<Vec<WordSurprisal>> {
    let chunks = chunk_words(text, model.chunk_size())?;
    if chunks.is_empty() {
        anyhow::bail!("Stimulus is empty");
    }

    let mut records = Vec::new();
    for chunk in &chunks {
        records.extend(score_chunk(model, chunk)?);
    }

    debug!(
        "{} chunk(s), {} word(s): {:?}",
        chunks.len(),
        records.len(),
        records
            .iter()
            .map(|r| format!("{}={:.2}", r.word, r.surprisal))
            .collect::<Vec<_>>()
    );
    Ok(records)
}

/// Surprisal (bits) of the last word of `text`
pub fn last_word_surprisal(model: &SurprisalModel, text: &str) -> Result<f64> {
    word_surprisals(model, text)?
        .last()
        .map(|r| r.surprisal)
        .with_context(|| format!("No scorable tokens in stimulus '{text}'"))
}
