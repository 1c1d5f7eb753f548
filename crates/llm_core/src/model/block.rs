//! DecoderBlock - pre-norm attention + MLP with residual connections

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use crate::layers::{CausalSelfAttention, RMSNorm, SwiGLU};
use crate::model::CausalLmConfig;

pub struct DecoderBlock {
    pub input_layernorm: RMSNorm,
    pub self_attn: CausalSelfAttention,
    pub post_attention_layernorm: RMSNorm,
    pub mlp: SwiGLU,
}

impl DecoderBlock {
    pub fn load(cfg: &CausalLmConfig, vb: VarBuilder) -> Result<Self> {
        let input_layernorm =
            RMSNorm::load(cfg.hidden_size, cfg.rms_norm_eps, vb.pp("input_layernorm"))?;
        let self_attn = CausalSelfAttention::load(cfg, vb.pp("self_attn"))?;
        let post_attention_layernorm = RMSNorm::load(
            cfg.hidden_size,
            cfg.rms_norm_eps,
            vb.pp("post_attention_layernorm"),
        )?;
        let mlp = SwiGLU::load(cfg.hidden_size, cfg.intermediate_size, vb.pp("mlp"))?;

        Ok(Self {
            input_layernorm,
            self_attn,
            post_attention_layernorm,
            mlp,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let residual = x;
        let h = self.self_attn.forward(&self.input_layernorm.forward(x)?)?;
        let x_mid = (residual + h)?;

        let residual = &x_mid;
        let h = self.mlp.forward(&self.post_attention_layernorm.forward(&x_mid)?)?;
        residual + h
    }
}
