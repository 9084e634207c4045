//! GPT-2 forward pass producing next-token logits
//!
//! Used for the GerPT-2 and secret GPT-2 checkpoints. Differences from the
//! LLaMA backend:
//! - Learned absolute position embeddings (`wpe`), no RoPE
//! - LayerNorm with bias, pre-norm blocks
//! - `Conv1D` projections stored as `[in, out]` (transposed vs. `Linear`)
//! - GELU (tanh approximation) MLP
//! - LM head tied to the token embedding

use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{embedding, Embedding, LayerNorm, Linear, VarBuilder};
use tracing::{info, warn};

use crate::masks::create_causal_mask;
use crate::model::{hub_config, hub_repo, hub_safetensors, LanguageModel};

/// Model configuration (matches HuggingFace config.json for GPT-2)
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Gpt2Config {
    pub vocab_size: usize,
    pub n_positions: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default)]
    pub n_inner: Option<usize>,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

/// Load a `Conv1D` weight (`[d_in, d_out]`) as a regular `Linear`
fn conv1d(d_in: usize, d_out: usize, vb: VarBuilder) -> Result<Linear> {
    let weight = vb
        .get_with_hints((d_in, d_out), "weight", candle_nn::init::DEFAULT_KAIMING_NORMAL)?
        .t()?
        .contiguous()?;
    let bias = vb.get(d_out, "bias")?;
    Ok(Linear::new(weight, Some(bias)))
}

fn split_heads(x: &Tensor, n_head: usize, head_dim: usize) -> Result<Tensor> {
    let (b, seq_len, _) = x.dims3()?;
    Ok(x.reshape((b, seq_len, n_head, head_dim))?
        .transpose(1, 2)?
        .contiguous()?)
}

struct Attention {
    c_attn: Linear,
    c_proj: Linear,
    n_head: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &Gpt2Config) -> Result<Self> {
        let d = config.n_embd;
        Ok(Self {
            c_attn: conv1d(d, 3 * d, vb.pp("c_attn"))?,
            c_proj: conv1d(d, d, vb.pp("c_proj"))?,
            n_head: config.n_head,
            head_dim: d / config.n_head,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, seq_len, d) = x.dims3()?;
        let qkv = self.c_attn.forward(x)?;
        let q = split_heads(&qkv.narrow(2, 0, d)?, self.n_head, self.head_dim)?;
        let k = split_heads(&qkv.narrow(2, d, d)?, self.n_head, self.head_dim)?;
        let v = split_heads(&qkv.narrow(2, 2 * d, d)?, self.n_head, self.head_dim)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? * scale)?;
        let mask = create_causal_mask(seq_len, x.device(), x.dtype())?;
        let scores = scores.broadcast_add(&mask)?;

        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let out = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, seq_len, d))?;
        Ok(self.c_proj.forward(&out)?)
    }
}

struct Mlp {
    c_fc: Linear,
    c_proj: Linear,
}

impl Mlp {
    fn load(vb: VarBuilder, config: &Gpt2Config) -> Result<Self> {
        let inner = config.n_inner.unwrap_or(4 * config.n_embd);
        Ok(Self {
            c_fc: conv1d(config.n_embd, inner, vb.pp("c_fc"))?,
            c_proj: conv1d(inner, config.n_embd, vb.pp("c_proj"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.c_fc.forward(x)?.gelu()?;
        Ok(self.c_proj.forward(&h)?)
    }
}

struct Block {
    ln_1: LayerNorm,
    attn: Attention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn load(vb: VarBuilder, config: &Gpt2Config) -> Result<Self> {
        let eps = config.layer_norm_epsilon;
        Ok(Self {
            ln_1: candle_nn::layer_norm(config.n_embd, eps, vb.pp("ln_1"))?,
            attn: Attention::load(vb.pp("attn"), config)?,
            ln_2: candle_nn::layer_norm(config.n_embd, eps, vb.pp("ln_2"))?,
            mlp: Mlp::load(vb.pp("mlp"), config)?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = (x + self.attn.forward(&self.ln_1.forward(x)?)?)?;
        let h = self.mlp.forward(&self.ln_2.forward(&x)?)?;
        Ok((x + h)?)
    }
}

/// GPT-2 causal language model
pub struct Gpt2Lm {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    lm_head: Linear,
    context_window: usize,
    vocab_size: usize,
}

impl Gpt2Lm {
    /// Load model from HuggingFace
    ///
    /// Prefers safetensors; older checkpoints only ship `pytorch_model.bin`.
    pub fn load(model_id: &str, device: &Device, dtype: DType) -> Result<Self> {
        info!("Loading GPT-2 from: {}", model_id);
        let repo = hub_repo(model_id)?;
        let config: Gpt2Config = hub_config(&repo)?;

        info!(
            "Model config: {} layers, {} hidden, {} vocab, {} positions",
            config.n_layer, config.n_embd, config.vocab_size, config.n_positions
        );

        let vb = match hub_safetensors(&repo) {
            Ok(paths) => {
                info!("Loading weights from {} safetensors file(s)...", paths.len());
                // SAFETY: the weight files are not modified while mapped.
                unsafe { VarBuilder::from_mmaped_safetensors(&paths, dtype, device)? }
            }
            Err(e) => {
                warn!("No safetensors weights ({e:#}), falling back to pytorch_model.bin");
                let path = repo
                    .get("pytorch_model.bin")
                    .context("Failed to download pytorch_model.bin")?;
                VarBuilder::from_pth(&path, dtype, device)?
            }
        };

        // Checkpoints saved from the LM-head model nest weights under `transformer.`
        let vb = if vb.contains_tensor("transformer.wte.weight") {
            vb.pp("transformer")
        } else {
            vb
        };
        Self::from_var_builder(&config, vb)
    }

    /// Build the model from an already opened weight store (no prefix)
    pub fn from_var_builder(config: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        if config.n_embd % config.n_head != 0 {
            anyhow::bail!(
                "n_embd ({}) is not divisible by n_head ({})",
                config.n_embd,
                config.n_head
            );
        }

        let wte = embedding(config.vocab_size, config.n_embd, vb.pp("wte"))?;
        let wpe = embedding(config.n_positions, config.n_embd, vb.pp("wpe"))?;

        let mut blocks = Vec::with_capacity(config.n_layer);
        for i in 0..config.n_layer {
            if (i + 1) % 10 == 0 || i == 0 {
                info!("Loading layer {}/{}", i + 1, config.n_layer);
            }
            blocks.push(Block::load(vb.pp(format!("h.{i}")), config)?);
        }

        let ln_f = candle_nn::layer_norm(config.n_embd, config.layer_norm_epsilon, vb.pp("ln_f"))?;
        let lm_head = Linear::new(wte.embeddings().clone(), None);

        Ok(Self {
            wte,
            wpe,
            blocks,
            ln_f,
            lm_head,
            context_window: config.n_positions,
            vocab_size: config.vocab_size,
        })
    }
}

impl LanguageModel for Gpt2Lm {
    fn context_window(&self) -> usize {
        self.context_window
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        if seq_len > self.context_window {
            anyhow::bail!(
                "Sequence of {seq_len} tokens exceeds the {} position embeddings",
                self.context_window
            );
        }
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?.unsqueeze(0)?;
        let mut hidden = (self.wte.forward(input_ids)? + self.wpe.forward(&positions)?)?;
        for block in &self.blocks {
            hidden = block.forward(&hidden)?;
        }
        let hidden = self.ln_f.forward(&hidden)?;
        Ok(self.lm_head.forward(&hidden)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::IndexOp;
    use candle_nn::VarMap;
    use serial_test::serial;

    fn tiny_model() -> Gpt2Lm {
        let config: Gpt2Config = serde_json::from_str(
            r#"{"vocab_size": 13, "n_positions": 6, "n_embd": 8, "n_layer": 2, "n_head": 2}"#,
        )
        .unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Gpt2Lm::from_var_builder(&config, vb).unwrap()
    }

    #[test]
    #[serial]
    fn test_logits_shape() {
        let model = tiny_model();
        let ids = Tensor::new(&[[0u32, 5, 12]], &Device::Cpu).unwrap();
        let logits = model.forward(&ids).unwrap();
        assert_eq!(logits.dims(), &[1, 3, 13]);
    }

    #[test]
    #[serial]
    fn test_prefix_logits_unchanged_by_suffix() {
        let model = tiny_model();
        let short = Tensor::new(&[[3u32, 1, 4]], &Device::Cpu).unwrap();
        let long = Tensor::new(&[[3u32, 1, 4, 1, 5]], &Device::Cpu).unwrap();
        let a: Vec<f32> = model.forward(&short).unwrap().i((0, 1)).unwrap().to_vec1().unwrap();
        let b: Vec<f32> = model.forward(&long).unwrap().i((0, 1)).unwrap().to_vec1().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-4);
        }
    }

    #[test]
    fn test_rejects_sequences_beyond_context() {
        let model = tiny_model();
        let ids = Tensor::new(&[[1u32; 7]], &Device::Cpu).unwrap();
        let err = model.forward(&ids).unwrap_err().to_string();
        assert!(err.contains("exceeds"));
    }
}
