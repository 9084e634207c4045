//! Language model adapter for surprisal collection
//!
//! The pretrained causal LM and its tokenizer are external collaborators.
//! This module puts two narrow traits at that seam ([`LanguageModel`] and
//! [`SubwordTokenizer`]) and bundles one of each with its [`ModelSpec`] into
//! a [`SurprisalModel`], the explicitly constructed object every scoring
//! operation receives.

use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use hf_hub::api::sync::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use serde::de::DeserializeOwned;
use tokenizers::Tokenizer;
use tracing::info;

use crate::bpe;
use crate::forward_gpt2::Gpt2Lm;
use crate::forward_llama::LlamaLm;
use crate::surprisal::{self, WordSurprisal};

/// Supported model architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelArchitecture {
    /// LLaMA / LLaMA-2 derivatives (LeoLM)
    Llama,
    /// GPT-2 derivatives (GerPT-2, secret GPT-2)
    Gpt2,
}

/// Everything that differs between the supported models
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// Name accepted by `--model`
    pub name: &'static str,
    /// HuggingFace hub repository
    pub hub_id: &'static str,
    /// Prefix of the `<prefix>_surp` / `<prefix>_bpe_split` columns
    pub column_prefix: &'static str,
    /// Axis label used in density plots
    pub label: &'static str,
    pub architecture: ModelArchitecture,
    /// Marker a token's surface form starts with when it begins a new word
    pub ws_indicator: &'static str,
    /// Repair byte-level mis-decoded German characters in word forms
    pub repair_chars: bool,
    /// Prepend the BOS token to every chunk before scoring
    pub bos_pad: bool,
    /// The tokenizer itself prepends BOS when adding special tokens
    pub auto_bos: bool,
    /// Words are encoded with a leading space (byte-level BPE)
    pub prefix_space: bool,
    pub bos_token: &'static str,
}

/// Registry of the models used in the studies
pub const MODELS: &[ModelSpec] = &[
    ModelSpec {
        name: "leo13b",
        hub_id: "LeoLM/leo-hessianai-13b",
        column_prefix: "leo13b",
        label: "Leo-13b surprisal",
        architecture: ModelArchitecture::Llama,
        ws_indicator: "\u{2581}",
        repair_chars: false,
        bos_pad: false,
        auto_bos: true,
        prefix_space: false,
        bos_token: "<s>",
    },
    ModelSpec {
        name: "secret-gpt-2",
        hub_id: "stefan-it/secret-gpt2",
        column_prefix: "secretgpt2",
        label: "secret GPT-2 surprisal",
        architecture: ModelArchitecture::Gpt2,
        ws_indicator: "\u{120}",
        repair_chars: true,
        bos_pad: false,
        auto_bos: false,
        prefix_space: true,
        bos_token: "<|endoftext|>",
    },
    ModelSpec {
        name: "gerpt2",
        hub_id: "benjamin/gerpt2",
        column_prefix: "gerpt2",
        label: "GerPT-2 surprisal",
        architecture: ModelArchitecture::Gpt2,
        ws_indicator: "\u{120}",
        repair_chars: true,
        bos_pad: true,
        auto_bos: false,
        prefix_space: true,
        bos_token: "<|endoftext|>",
    },
    ModelSpec {
        name: "gerpt2-large",
        hub_id: "benjamin/gerpt2-large",
        column_prefix: "gerpt2large",
        label: "GerPT-2 large surprisal",
        architecture: ModelArchitecture::Gpt2,
        ws_indicator: "\u{120}",
        repair_chars: true,
        bos_pad: true,
        auto_bos: false,
        prefix_space: true,
        bos_token: "<|endoftext|>",
    },
];

impl ModelSpec {
    /// Look up a model by its CLI name
    pub fn by_name(name: &str) -> Result<&'static ModelSpec> {
        MODELS.iter().find(|m| m.name == name).with_context(|| {
            let names: Vec<&str> = MODELS.iter().map(|m| m.name).collect();
            format!("Unknown model '{name}', expected one of {names:?}")
        })
    }

    /// Look up a model by its column prefix (e.g. `gerpt2large`)
    pub fn by_prefix(prefix: &str) -> Option<&'static ModelSpec> {
        MODELS.iter().find(|m| m.column_prefix == prefix)
    }

    /// Look up by CLI name, falling back to the column prefix
    pub fn resolve(name: &str) -> Result<&'static ModelSpec> {
        Self::by_name(name).or_else(|e| Self::by_prefix(name).ok_or(e))
    }

    pub fn surprisal_column(&self) -> String {
        format!("{}_surp", self.column_prefix)
    }

    pub fn bpe_column(&self) -> String {
        format!("{}_bpe_split", self.column_prefix)
    }
}

/// A causal language model that maps token ids to next-token logits.
pub trait LanguageModel {
    /// Maximum number of positions the model accepts in one pass
    fn context_window(&self) -> usize;
    fn vocab_size(&self) -> usize;
    /// `input_ids` is `[1, seq]`; returns logits `[1, seq, vocab]` where row
    /// `i` predicts token `i + 1`.
    fn forward(&self, input_ids: &Tensor) -> Result<Tensor>;
}

/// Sub-word tokenizer as seen by the aggregator.
pub trait SubwordTokenizer {
    /// Encode a single word. With `add_special_tokens` the tokenizer's own
    /// post-processing (e.g. an automatic BOS) is applied.
    fn encode_word(&self, word: &str, add_special_tokens: bool) -> Result<Vec<u32>>;

    /// Raw vocabulary surface form, whitespace marker included
    fn id_to_token(&self, id: u32) -> Option<String>;

    fn bos_token_id(&self) -> Option<u32>;

    /// Whether special-token encoding starts with an automatic BOS
    fn adds_bos(&self) -> bool;

    /// Encode pre-split words, each word independently, so every sub-word
    /// token belongs to exactly one input word. Mirrors encoding with
    /// special tokens: an automatic BOS is prepended when the tokenizer
    /// adds one.
    fn encode_words(&self, words: &[&str]) -> Result<Vec<u32>> {
        let mut ids = Vec::with_capacity(words.len() * 2 + 1);
        if self.adds_bos() {
            ids.extend(self.bos_token_id());
        }
        for word in words {
            ids.extend(self.encode_word(word, false)?);
        }
        Ok(ids)
    }
}

/// [`SubwordTokenizer`] over a HuggingFace `tokenizer.json`
pub struct HfTokenizer {
    inner: Tokenizer,
    prefix_space: bool,
    auto_bos: bool,
    bos_id: Option<u32>,
}

impl HfTokenizer {
    pub fn new(inner: Tokenizer, spec: &ModelSpec) -> Self {
        let bos_id = inner.token_to_id(spec.bos_token);
        Self {
            inner,
            prefix_space: spec.prefix_space,
            auto_bos: spec.auto_bos,
            bos_id,
        }
    }

    /// Download `tokenizer.json` from the model's hub repository
    pub fn from_hub(spec: &ModelSpec) -> Result<Self> {
        let repo = hub_repo(spec.hub_id)?;
        let path = repo
            .get("tokenizer.json")
            .context("Failed to download tokenizer.json")?;
        let inner =
            Tokenizer::from_file(&path).map_err(|e| anyhow::anyhow!("Tokenizer error: {e}"))?;
        Ok(Self::new(inner, spec))
    }
}

impl SubwordTokenizer for HfTokenizer {
    fn encode_word(&self, word: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        let text = if self.prefix_space {
            format!(" {word}")
        } else {
            word.to_string()
        };
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| anyhow::anyhow!("Tokenization error for '{word}': {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn id_to_token(&self, id: u32) -> Option<String> {
        self.inner.id_to_token(id)
    }

    fn bos_token_id(&self) -> Option<u32> {
        self.bos_id
    }

    fn adds_bos(&self) -> bool {
        self.auto_bos
    }
}

pub(crate) fn hub_repo(model_id: &str) -> Result<ApiRepo> {
    let api = Api::new()?;
    Ok(api.repo(Repo::new(model_id.to_string(), RepoType::Model)))
}

pub(crate) fn hub_config<T: DeserializeOwned>(repo: &ApiRepo) -> Result<T> {
    let config_path = repo
        .get("config.json")
        .context("Failed to download config.json")?;
    let config_str = std::fs::read_to_string(&config_path).context("Failed to read config")?;
    serde_json::from_str(&config_str).context("Failed to parse config.json")
}

/// Safetensors index for sharded models
#[derive(Debug, serde::Deserialize)]
struct SafetensorsIndex {
    weight_map: std::collections::HashMap<String, String>,
}

/// Resolve the safetensors weight files of a repository, sharded or not.
pub(crate) fn hub_safetensors(repo: &ApiRepo) -> Result<Vec<PathBuf>> {
    if let Ok(index_path) = repo.get("model.safetensors.index.json") {
        info!("Model is sharded, loading index...");
        let index_str = std::fs::read_to_string(&index_path).context("Failed to read index")?;
        let index: SafetensorsIndex = serde_json::from_str(&index_str)?;

        let mut shard_names: Vec<String> = index.weight_map.values().cloned().collect();
        shard_names.sort();
        shard_names.dedup();

        info!("Downloading {} shard files...", shard_names.len());
        shard_names
            .iter()
            .map(|name| {
                repo.get(name)
                    .with_context(|| format!("Failed to download {name}"))
            })
            .collect()
    } else {
        let path = repo
            .get("model.safetensors")
            .context("Failed to download model.safetensors")?;
        Ok(vec![path])
    }
}

/// A loaded model/tokenizer pair plus the settings that govern scoring
pub struct SurprisalModel {
    model: Box<dyn LanguageModel>,
    tokenizer: Box<dyn SubwordTokenizer>,
    spec: ModelSpec,
    device: Device,
}

impl SurprisalModel {
    /// Assemble from already constructed parts
    pub fn new(
        model: Box<dyn LanguageModel>,
        tokenizer: Box<dyn SubwordTokenizer>,
        spec: ModelSpec,
        device: Device,
    ) -> Self {
        Self {
            model,
            tokenizer,
            spec,
            device,
        }
    }

    /// Download and load the model described by `spec` (tries CUDA unless
    /// `force_cpu`)
    pub fn from_spec(spec: &ModelSpec, force_cpu: bool) -> Result<Self> {
        let (device, dtype) = if force_cpu {
            info!("Forcing CPU mode");
            (Device::Cpu, DType::F32)
        } else {
            match Device::cuda_if_available(0) {
                Ok(dev) if dev.is_cuda() => {
                    info!("Using CUDA device");
                    // GPT-2 activations overflow in half precision
                    let dtype = match spec.architecture {
                        ModelArchitecture::Llama => DType::BF16,
                        ModelArchitecture::Gpt2 => DType::F32,
                    };
                    (dev, dtype)
                }
                _ => {
                    info!("CUDA not available, using CPU");
                    (Device::Cpu, DType::F32)
                }
            }
        };

        info!("Loading model: {}", spec.hub_id);
        info!("Architecture: {:?}", spec.architecture);
        info!("Device: {:?}, dtype: {:?}", device, dtype);

        let tokenizer = HfTokenizer::from_hub(spec)?;
        if spec.bos_pad && tokenizer.bos_token_id().is_none() {
            anyhow::bail!(
                "Model '{}' needs BOS padding but the tokenizer has no '{}' token",
                spec.name,
                spec.bos_token
            );
        }

        let model: Box<dyn LanguageModel> = match spec.architecture {
            ModelArchitecture::Llama => Box::new(LlamaLm::load(spec.hub_id, &device, dtype)?),
            ModelArchitecture::Gpt2 => Box::new(Gpt2Lm::load(spec.hub_id, &device, dtype)?),
        };

        Ok(Self::new(model, Box::new(tokenizer), spec.clone(), device))
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn language_model(&self) -> &dyn LanguageModel {
        self.model.as_ref()
    }

    pub fn tokenizer(&self) -> &dyn SubwordTokenizer {
        self.tokenizer.as_ref()
    }

    /// Context window of the underlying model, in tokens
    pub fn context_window(&self) -> usize {
        self.model.context_window()
    }

    /// Maximum words per scoring chunk
    pub fn chunk_size(&self) -> usize {
        surprisal::chunk_size(self.context_window())
    }

    /// Surprisal (bits) of every word in `text`, in order
    pub fn word_surprisals(&self, text: &str) -> Result<Vec<WordSurprisal>> {
        surprisal::word_surprisals(self, text)
    }

    /// Surprisal (bits) of the last word of `text`
    pub fn last_word_surprisal(&self, text: &str) -> Result<f64> {
        surprisal::last_word_surprisal(self, text)
    }

    /// 1 if the tokenizer splits `word` into several sub-word units, else 0
    pub fn bpe_split(&self, word: &str) -> Result<u8> {
        bpe::bpe_split(self.tokenizer(), word)
    }

    /// Sub-word surface forms of `text` as the aggregator sees them
    pub fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let ids = self.tokenizer.encode_words(&words)?;
        Ok(ids
            .iter()
            .map(|&id| {
                self.tokenizer
                    .id_to_token(id)
                    .unwrap_or_else(|| format!("<{id}>"))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let leo = ModelSpec::by_name("leo13b").unwrap();
        assert_eq!(leo.architecture, ModelArchitecture::Llama);
        assert_eq!(leo.ws_indicator, "▁");
        assert_eq!(leo.surprisal_column(), "leo13b_surp");

        let large = ModelSpec::by_name("gerpt2-large").unwrap();
        assert_eq!(large.bpe_column(), "gerpt2large_bpe_split");
        assert_eq!(ModelSpec::by_prefix("gerpt2large"), Some(large));
        assert_eq!(ModelSpec::resolve("secretgpt2").unwrap().name, "secret-gpt-2");
        assert!(ModelSpec::resolve("gpt4").is_err());
    }

    #[test]
    fn test_unknown_model_lists_choices() {
        let err = ModelSpec::by_name("gpt4").unwrap_err().to_string();
        assert!(err.contains("gpt4"));
        assert!(err.contains("gerpt2"));
    }

    #[test]
    fn test_gpt2_family_uses_byte_level_marker() {
        for spec in MODELS
            .iter()
            .filter(|m| m.architecture == ModelArchitecture::Gpt2)
        {
            assert_eq!(spec.ws_indicator, "Ġ");
            assert!(spec.repair_chars);
            assert!(spec.prefix_space);
            assert!(!spec.auto_bos);
        }
    }
}
