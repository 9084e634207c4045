//! LLaMA forward pass producing next-token logits
//!
//! Covers the LLaMA-2 layout used by the LeoLM checkpoints:
//! - No bias on any projection (Q, K, V, O, MLP)
//! - SwiGLU MLP and RMSNorm
//! - Grouped-query attention when `num_key_value_heads < num_attention_heads`
//! - Linear RoPE scaling for the extended-context checkpoints

use anyhow::Result;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{embedding, linear_no_bias, Embedding, Linear, RmsNorm, VarBuilder};
use tracing::{info, warn};

use crate::masks::create_causal_mask;
use crate::model::{hub_config, hub_repo, hub_safetensors, LanguageModel};

/// Model configuration (matches HuggingFace config.json for LLaMA-2)
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LlamaConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    pub num_hidden_layers: usize,
    pub vocab_size: usize,
    pub max_position_embeddings: usize,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,
    #[serde(default)]
    pub rope_scaling: Option<RopeScaling>,
    #[serde(default)]
    pub tie_word_embeddings: bool,
}

/// `rope_scaling` entry of config.json
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RopeScaling {
    #[serde(rename = "type", alias = "rope_type")]
    pub kind: String,
    pub factor: f64,
}

fn default_rope_theta() -> f64 {
    10_000.0
}

fn default_rms_norm_eps() -> f64 {
    1e-5
}

impl LlamaConfig {
    fn kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Divisor applied to positions before computing rotary angles
    fn position_scale(&self) -> f64 {
        match &self.rope_scaling {
            Some(scaling) if scaling.kind == "linear" => scaling.factor,
            Some(scaling) => {
                warn!(
                    "Unsupported rope_scaling type '{}', using unscaled positions",
                    scaling.kind
                );
                1.0
            }
            None => 1.0,
        }
    }
}

/// Rotary Position Embeddings (RoPE), half-rotation layout
struct RotaryEmbedding {
    cos: Tensor,
    sin: Tensor,
}

impl RotaryEmbedding {
    fn new(config: &LlamaConfig, device: &Device, dtype: DType) -> Result<Self> {
        let dim = config.head_dim();
        let scale = config.position_scale();
        let inv_freq: Vec<f32> = (0..dim)
            .step_by(2)
            .map(|i| (1.0 / config.rope_theta.powf(i as f64 / dim as f64)) as f32)
            .collect();
        let inv_freq = Tensor::new(inv_freq, device)?;

        let positions: Vec<f32> = (0..config.max_position_embeddings)
            .map(|i| (i as f64 / scale) as f32)
            .collect();
        let positions = Tensor::new(positions, device)?;

        // [max_seq_len, dim/2]
        let freqs = positions.unsqueeze(1)?.matmul(&inv_freq.unsqueeze(0)?)?;
        Ok(Self {
            cos: freqs.cos()?.to_dtype(dtype)?,
            sin: freqs.sin()?.to_dtype(dtype)?,
        })
    }

    fn apply(&self, q: &Tensor, k: &Tensor) -> Result<(Tensor, Tensor)> {
        let seq_len = q.dim(2)?;
        let cos = self.cos.narrow(0, 0, seq_len)?;
        let sin = self.sin.narrow(0, 0, seq_len)?;
        let q = candle_nn::rotary_emb::rope(&q.contiguous()?, &cos, &sin)?;
        let k = candle_nn::rotary_emb::rope(&k.contiguous()?, &cos, &sin)?;
        Ok((q, k))
    }
}

struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &LlamaConfig) -> Result<Self> {
        let head_dim = config.head_dim();
        let kv_dim = config.kv_heads() * head_dim;
        Ok(Self {
            q_proj: linear_no_bias(config.hidden_size, config.hidden_size, vb.pp("q_proj"))?,
            k_proj: linear_no_bias(config.hidden_size, kv_dim, vb.pp("k_proj"))?,
            v_proj: linear_no_bias(config.hidden_size, kv_dim, vb.pp("v_proj"))?,
            o_proj: linear_no_bias(config.hidden_size, config.hidden_size, vb.pp("o_proj"))?,
            num_heads: config.num_attention_heads,
            num_kv_heads: config.kv_heads(),
            head_dim,
        })
    }

    fn forward(&self, x: &Tensor, rotary: &RotaryEmbedding) -> Result<Tensor> {
        let (b, seq_len, _) = x.dims3()?;

        let q = self
            .q_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = self
            .k_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = self
            .v_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;

        let (q, k) = rotary.apply(&q, &k)?;

        let n_rep = self.num_heads / self.num_kv_heads;
        let k = repeat_kv(k, n_rep)?.contiguous()?;
        let v = repeat_kv(v, n_rep)?.contiguous()?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? * scale)?;
        let mask = create_causal_mask(seq_len, x.device(), x.dtype())?;
        let scores = scores.broadcast_add(&mask)?;

        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let out = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, seq_len, ()))?;
        Ok(self.o_proj.forward(&out)?)
    }
}

fn repeat_kv(x: Tensor, n_rep: usize) -> Result<Tensor> {
    if n_rep == 1 {
        return Ok(x);
    }
    let (b, num_kv_heads, seq_len, head_dim) = x.dims4()?;
    let x = x
        .unsqueeze(2)?
        .expand((b, num_kv_heads, n_rep, seq_len, head_dim))?;
    Ok(x.reshape((b, num_kv_heads * n_rep, seq_len, head_dim))?)
}

/// SwiGLU feed-forward block
struct Mlp {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
}

impl Mlp {
    fn load(vb: VarBuilder, config: &LlamaConfig) -> Result<Self> {
        let (h, i) = (config.hidden_size, config.intermediate_size);
        Ok(Self {
            gate_proj: linear_no_bias(h, i, vb.pp("gate_proj"))?,
            up_proj: linear_no_bias(h, i, vb.pp("up_proj"))?,
            down_proj: linear_no_bias(i, h, vb.pp("down_proj"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gate = candle_nn::ops::silu(&self.gate_proj.forward(x)?)?;
        let up = self.up_proj.forward(x)?;
        Ok(self.down_proj.forward(&(gate * up)?)?)
    }
}

struct DecoderLayer {
    self_attn: Attention,
    mlp: Mlp,
    input_layernorm: RmsNorm,
    post_attention_layernorm: RmsNorm,
}

impl DecoderLayer {
    fn load(vb: VarBuilder, config: &LlamaConfig) -> Result<Self> {
        Ok(Self {
            self_attn: Attention::load(vb.pp("self_attn"), config)?,
            mlp: Mlp::load(vb.pp("mlp"), config)?,
            input_layernorm: candle_nn::rms_norm(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("input_layernorm"),
            )?,
            post_attention_layernorm: candle_nn::rms_norm(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )?,
        })
    }

    fn forward(&self, x: &Tensor, rotary: &RotaryEmbedding) -> Result<Tensor> {
        let residual = x;
        let h = self
            .self_attn
            .forward(&self.input_layernorm.forward(x)?, rotary)?;
        let x = (residual + h)?;

        let residual = &x;
        let h = self
            .mlp
            .forward(&self.post_attention_layernorm.forward(&x)?)?;
        Ok((residual + h)?)
    }
}

/// LLaMA causal language model
pub struct LlamaLm {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    lm_head: Linear,
    rotary: RotaryEmbedding,
    context_window: usize,
    vocab_size: usize,
}

impl LlamaLm {
    /// Load model from HuggingFace
    pub fn load(model_id: &str, device: &Device, dtype: DType) -> Result<Self> {
        info!("Loading LLaMA from: {}", model_id);
        let repo = hub_repo(model_id)?;
        let config: LlamaConfig = hub_config(&repo)?;

        info!(
            "Model config: {} layers, {} hidden, {} vocab, {} positions",
            config.num_hidden_layers,
            config.hidden_size,
            config.vocab_size,
            config.max_position_embeddings
        );

        let weights_paths = hub_safetensors(&repo)?;
        info!("Loading weights from {} file(s)...", weights_paths.len());

        // SAFETY: the weight files are not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights_paths, dtype, device)? };
        Self::from_var_builder(&config, vb, device, dtype)
    }

    /// Build the model from an already opened weight store
    pub fn from_var_builder(
        config: &LlamaConfig,
        vb: VarBuilder,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let vb_model = vb.pp("model");
        let embed_tokens = embedding(
            config.vocab_size,
            config.hidden_size,
            vb_model.pp("embed_tokens"),
        )?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            if (i + 1) % 10 == 0 || i == 0 {
                info!("Loading layer {}/{}", i + 1, config.num_hidden_layers);
            }
            layers.push(DecoderLayer::load(
                vb_model.pp(format!("layers.{i}")),
                config,
            )?);
        }

        let norm =
            candle_nn::rms_norm(config.hidden_size, config.rms_norm_eps, vb_model.pp("norm"))?;

        let lm_head = if config.tie_word_embeddings {
            Linear::new(embed_tokens.embeddings().clone(), None)
        } else {
            linear_no_bias(config.hidden_size, config.vocab_size, vb.pp("lm_head"))?
        };

        let rotary = RotaryEmbedding::new(config, device, dtype)?;

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
            rotary,
            context_window: config.max_position_embeddings,
            vocab_size: config.vocab_size,
        })
    }
}

impl LanguageModel for LlamaLm {
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
                "Sequence of {seq_len} tokens exceeds the {} rotary positions",
                self.context_window
            );
        }
        let mut hidden = self.embed_tokens.forward(input_ids)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &self.rotary)?;
        }
        let hidden = self.norm.forward(&hidden)?;
        Ok(self.lm_head.forward(&hidden)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::IndexOp;
    use candle_nn::VarMap;
    use serial_test::serial;

    fn tiny_config() -> LlamaConfig {
        serde_json::from_str(
            r#"{
                "hidden_size": 8,
                "intermediate_size": 16,
                "num_attention_heads": 2,
                "num_key_value_heads": 1,
                "num_hidden_layers": 2,
                "vocab_size": 11,
                "max_position_embeddings": 32,
                "rope_scaling": {"type": "linear", "factor": 2.0}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_config_defaults_and_scaling() {
        let config = tiny_config();
        assert_eq!(config.kv_heads(), 1);
        assert_eq!(config.head_dim(), 4);
        assert_eq!(config.rope_theta, 10_000.0);
        assert_eq!(config.position_scale(), 2.0);
        assert!(!config.tie_word_embeddings);
    }

    #[test]
    #[serial]
    fn test_logits_shape_and_causality() {
        let device = Device::Cpu;
        let config = tiny_config();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = LlamaLm::from_var_builder(&config, vb, &device, DType::F32).unwrap();

        assert_eq!(model.context_window(), 32);
        assert_eq!(model.vocab_size(), 11);

        let ids = Tensor::new(&[[1u32, 4, 7, 2]], &device).unwrap();
        let logits = model.forward(&ids).unwrap();
        assert_eq!(logits.dims(), &[1, 4, 11]);

        // Appending a token must not change earlier predictions
        let longer = Tensor::new(&[[1u32, 4, 7, 2, 9]], &device).unwrap();
        let longer_logits = model.forward(&longer).unwrap();
        let a: Vec<f32> = logits.i((0, 2)).unwrap().to_vec1().unwrap();
        let b: Vec<f32> = longer_logits.i((0, 2)).unwrap().to_vec1().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-4);
        }
    }
}
