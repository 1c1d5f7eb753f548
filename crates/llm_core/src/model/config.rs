//! CausalLmConfig - Hugging Face `config.json` for Llama-family decoders

use candle_core::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Architectures whose parameter layout matches [`crate::CausalLm`].
pub const SUPPORTED_MODEL_TYPES: &[&str] = &["llama", "mistral", "qwen2"];

/// `eos_token_id` is an integer in most configs and a list in Llama-3 style ones.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum TokenIds {
    One(u32),
    Many(Vec<u32>),
}

impl TokenIds {
    pub fn first(&self) -> Option<u32> {
        match self {
            Self::One(id) => Some(*id),
            Self::Many(ids) => ids.first().copied(),
        }
    }
}

/// `rope_scaling` block. Newer configs name the kind `rope_type`, older ones `type`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RopeScaling {
    #[serde(default)]
    pub rope_type: Option<String>,
    #[serde(default, rename = "type")]
    pub legacy_type: Option<String>,
    #[serde(default = "default_rope_factor")]
    pub factor: f64,
    #[serde(default)]
    pub low_freq_factor: Option<f64>,
    #[serde(default)]
    pub high_freq_factor: Option<f64>,
    #[serde(default)]
    pub original_max_position_embeddings: Option<usize>,
}

/// RoPE frequency schemes the attention layer implements.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RopeScalingKind {
    /// Plain `theta^(-2i/d)` frequencies
    Default,
    /// Every frequency divided by `factor`
    Linear { factor: f64 },
    /// Llama 3.x wavelength-banded rescale
    Llama3 {
        factor: f64,
        low_freq_factor: f64,
        high_freq_factor: f64,
        original_max_position_embeddings: usize,
    },
}

impl RopeScaling {
    pub fn kind(&self) -> Result<RopeScalingKind> {
        let name = self
            .rope_type
            .as_deref()
            .or(self.legacy_type.as_deref())
            .unwrap_or("default");
        if !(self.factor > 0.0) {
            candle_core::bail!("rope_scaling factor must be positive, got {}", self.factor);
        }
        match name {
            "default" => Ok(RopeScalingKind::Default),
            "linear" => Ok(RopeScalingKind::Linear {
                factor: self.factor,
            }),
            "llama3" => {
                let (Some(low), Some(high), Some(original)) = (
                    self.low_freq_factor,
                    self.high_freq_factor,
                    self.original_max_position_embeddings,
                ) else {
                    candle_core::bail!(
                        "llama3 rope_scaling needs low_freq_factor, high_freq_factor and original_max_position_embeddings"
                    );
                };
                if !(high > low && low > 0.0) || original == 0 {
                    candle_core::bail!(
                        "invalid llama3 rope_scaling (low {low}, high {high}, original context {original})"
                    );
                }
                Ok(RopeScalingKind::Llama3 {
                    factor: self.factor,
                    low_freq_factor: low,
                    high_freq_factor: high,
                    original_max_position_embeddings: original,
                })
            }
            other => candle_core::bail!(
                "unsupported rope_scaling type '{other}' (supported: default, linear, llama3)"
            ),
        }
    }
}

/// Model configuration, field names as written by `transformers`
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CausalLmConfig {
    #[serde(default = "default_model_type")]
    pub model_type: String,
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    /// Set explicitly by configs whose heads are not `hidden_size / num_attention_heads` wide
    #[serde(default)]
    pub head_dim: Option<usize>,
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,
    #[serde(default)]
    pub rope_scaling: Option<RopeScaling>,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub tie_word_embeddings: bool,
    #[serde(default)]
    pub attention_bias: bool,
    #[serde(default)]
    pub bos_token_id: Option<u32>,
    #[serde(default)]
    pub eos_token_id: Option<TokenIds>,
}

fn default_model_type() -> String {
    "llama".to_string()
}

fn default_rms_norm_eps() -> f64 {
    1e-6
}

fn default_rope_theta() -> f64 {
    10_000.0
}

fn default_rope_factor() -> f64 {
    1.0
}

fn default_max_position_embeddings() -> usize {
    2048
}

impl CausalLmConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            candle_core::Error::Msg(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(candle_core::Error::wrap)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_MODEL_TYPES.contains(&self.model_type.as_str()) {
            candle_core::bail!(
                "unsupported model_type '{}' (supported: {})",
                self.model_type,
                SUPPORTED_MODEL_TYPES.join(", ")
            );
        }
        if self.num_attention_heads == 0 {
            candle_core::bail!("num_attention_heads must be positive");
        }
        match self.head_dim {
            Some(0) => candle_core::bail!("head_dim must be positive"),
            Some(_) => {}
            None if self.hidden_size % self.num_attention_heads != 0 => candle_core::bail!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size,
                self.num_attention_heads
            ),
            None => {}
        }
        if self.head_dim() % 2 != 0 {
            candle_core::bail!("head_dim {} must be even for rotary embeddings", self.head_dim());
        }
        self.rope_scaling_kind()?;
        let kv = self.kv_heads();
        if kv == 0 || self.num_attention_heads % kv != 0 {
            candle_core::bail!(
                "num_attention_heads {} is not a multiple of num_key_value_heads {}",
                self.num_attention_heads,
                kv
            );
        }
        Ok(())
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
            .unwrap_or(self.hidden_size / self.num_attention_heads)
    }

    pub fn rope_scaling_kind(&self) -> Result<RopeScalingKind> {
        match &self.rope_scaling {
            Some(scaling) => scaling.kind(),
            None => Ok(RopeScalingKind::Default),
        }
    }

    pub fn kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    /// Qwen2 always carries q/k/v biases; Llama only when `attention_bias` is set.
    pub fn qkv_bias(&self) -> bool {
        self.model_type == "qwen2" || self.attention_bias
    }

    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id.as_ref().and_then(TokenIds::first)
    }

    /// Rough parameter count (embeddings + decoder layers + head).
    pub fn param_count(&self) -> usize {
        let h = self.hidden_size;
        let q_dim = self.num_attention_heads * self.head_dim();
        let kv_dim = self.kv_heads() * self.head_dim();
        let attn = 2 * h * q_dim + 2 * h * kv_dim;
        let mlp = 3 * h * self.intermediate_size;
        let embed = self.vocab_size * h;
        let head = if self.tie_word_embeddings { 0 } else { embed };
        embed + head + self.num_hidden_layers * (attn + mlp + 2 * h) + h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINYLLAMA: &str = r#"{
        "architectures": ["LlamaForCausalLM"],
        "model_type": "llama",
        "vocab_size": 32000,
        "hidden_size": 2048,
        "intermediate_size": 5632,
        "num_hidden_layers": 22,
        "num_attention_heads": 32,
        "num_key_value_heads": 4,
        "rms_norm_eps": 1e-05,
        "max_position_embeddings": 2048,
        "tie_word_embeddings": false,
        "bos_token_id": 1,
        "eos_token_id": 2,
        "torch_dtype": "bfloat16"
    }"#;

    #[test]
    fn parses_hf_llama_config() {
        let cfg: CausalLmConfig = serde_json::from_str(TINYLLAMA).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.head_dim(), 64);
        assert_eq!(cfg.kv_heads(), 4);
        assert_eq!(cfg.eos_token_id(), Some(2));
        assert_eq!(cfg.rope_theta, 10_000.0);
        assert!(!cfg.qkv_bias());
    }

    #[test]
    fn eos_list_takes_first() {
        let json = TINYLLAMA.replace("\"eos_token_id\": 2", "\"eos_token_id\": [128001, 128009]");
        let cfg: CausalLmConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.eos_token_id(), Some(128001));
    }

    #[test]
    fn rejects_unknown_architecture() {
        let json = TINYLLAMA.replace("\"llama\"", "\"bloom\"");
        let cfg: CausalLmConfig = serde_json::from_str(&json).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_bad_gqa_ratio() {
        let json = TINYLLAMA.replace("\"num_key_value_heads\": 4", "\"num_key_value_heads\": 5");
        let cfg: CausalLmConfig = serde_json::from_str(&json).unwrap();
        assert!(cfg.validate().is_err());
    }

    const LLAMA32: &str = r#"{
        "model_type": "llama",
        "vocab_size": 128256,
        "hidden_size": 2048,
        "intermediate_size": 8192,
        "num_hidden_layers": 16,
        "num_attention_heads": 32,
        "num_key_value_heads": 8,
        "head_dim": 64,
        "max_position_embeddings": 131072,
        "rope_theta": 500000.0,
        "rope_scaling": {
            "factor": 32.0,
            "high_freq_factor": 4.0,
            "low_freq_factor": 1.0,
            "original_max_position_embeddings": 8192,
            "rope_type": "llama3"
        },
        "tie_word_embeddings": true,
        "eos_token_id": [128001, 128008, 128009]
    }"#;

    #[test]
    fn parses_llama3_rope_scaling() {
        let cfg: CausalLmConfig = serde_json::from_str(LLAMA32).unwrap();
        cfg.validate().unwrap();
        assert_eq!(
            cfg.rope_scaling_kind().unwrap(),
            RopeScalingKind::Llama3 {
                factor: 32.0,
                low_freq_factor: 1.0,
                high_freq_factor: 4.0,
                original_max_position_embeddings: 8192,
            }
        );
    }

    #[test]
    fn null_rope_scaling_is_default() {
        let json = TINYLLAMA.replace("\"tie_word_embeddings\"", "\"rope_scaling\": null, \"tie_word_embeddings\"");
        let cfg: CausalLmConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.rope_scaling_kind().unwrap(), RopeScalingKind::Default);
    }

    #[test]
    fn rejects_unimplemented_rope_scaling() {
        let json = LLAMA32.replace("\"llama3\"", "\"yarn\"");
        let cfg: CausalLmConfig = serde_json::from_str(&json).unwrap();
        assert!(cfg.validate().is_err());

        let legacy = TINYLLAMA.replace(
            "\"tie_word_embeddings\"",
            "\"rope_scaling\": {\"type\": \"dynamic\", \"factor\": 2.0}, \"tie_word_embeddings\"",
        );
        let cfg: CausalLmConfig = serde_json::from_str(&legacy).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn llama3_scaling_needs_its_factors() {
        let json = LLAMA32.replace("\"low_freq_factor\": 1.0,", "");
        let cfg: CausalLmConfig = serde_json::from_str(&json).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn explicit_head_dim_wins() {
        let json = TINYLLAMA.replace("\"num_key_value_heads\": 4", "\"num_key_value_heads\": 4, \"head_dim\": 128");
        let cfg: CausalLmConfig = serde_json::from_str(&json).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.head_dim(), 128);

        let odd = TINYLLAMA.replace("\"num_key_value_heads\": 4", "\"num_key_value_heads\": 4, \"head_dim\": 63");
        let cfg: CausalLmConfig = serde_json::from_str(&odd).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn qwen2_implies_bias() {
        let json = TINYLLAMA.replace("\"llama\"", "\"qwen2\"");
        let cfg: CausalLmConfig = serde_json::from_str(&json).unwrap();
        assert!(cfg.qkv_bias());
    }
}
