//! CausalLm - full decoder-only language model

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use std::path::PathBuf;

use crate::layers::RMSNorm;
use crate::model::{CausalLmConfig, DecoderBlock};
use crate::weights;

/// Llama-family causal LM (embedding, decoder layers, final norm, LM head)
pub struct CausalLm {
    pub embed_tokens: candle_nn::Embedding,
    pub layers: Vec<DecoderBlock>,
    pub norm: RMSNorm,
    pub lm_head: candle_nn::Linear,
    pub config: CausalLmConfig,
}

impl CausalLm {
    /// Builds the model from `vb`. Parameter names follow the Hugging Face
    /// checkpoint layout so pretrained shards load without renaming.
    pub fn new(cfg: &CausalLmConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;

        let embed_tokens = candle_nn::embedding(
            cfg.vocab_size,
            cfg.hidden_size,
            vb.pp("model.embed_tokens"),
        )?;

        let layers = (0..cfg.num_hidden_layers)
            .map(|i| DecoderBlock::load(cfg, vb.pp(format!("model.layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;

        let norm = RMSNorm::load(cfg.hidden_size, cfg.rms_norm_eps, vb.pp("model.norm"))?;

        let lm_head = if cfg.tie_word_embeddings {
            candle_nn::Linear::new(embed_tokens.embeddings().clone(), None)
        } else {
            candle_nn::linear_no_bias(cfg.hidden_size, cfg.vocab_size, vb.pp("lm_head"))?
        };

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
            config: cfg.clone(),
        })
    }

    /// Creates trainable variables and overwrites them from the safetensors
    /// shards. Returns the model together with the `VarMap` owning its weights.
    pub fn load_pretrained(
        cfg: &CausalLmConfig,
        weight_files: &[PathBuf],
        dtype: DType,
        device: &Device,
    ) -> Result<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, dtype, device);
        let model = Self::new(cfg, vb)?;

        let loaded = weights::load_into_varmap(&varmap, weight_files)?;
        tracing::info!(
            "Loaded {} tensors from {} shard(s) as {:?} on {:?}",
            loaded,
            weight_files.len(),
            dtype,
            device
        );
        Ok((model, varmap))
    }

    /// input_ids: [batch, seq] (u32) -> logits: [batch, seq, vocab]
    pub fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let mut h = self.embed_tokens.forward(input_ids)?;
        for layer in &self.layers {
            h = layer.forward(&h)?;
        }
        let h = self.norm.forward(&h)?;
        self.lm_head.forward(&h)
    }

    pub fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }
}
