use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::{linear_b, ops::softmax, Linear, VarBuilder};

use crate::model::{CausalLmConfig, RopeScalingKind};

/// Rotary Position Embedding (LLaMA half-split formulation)
#[derive(Clone)]
pub struct RotaryEmbedding {
    pub cos_cache: Tensor,
    pub sin_cache: Tensor,
    pub head_dim: usize,
}

impl RotaryEmbedding {
    pub fn new(
        head_dim: usize,
        max_seq_len: usize,
        theta: f64,
        scaling: RopeScalingKind,
        device: &Device,
    ) -> Result<Self> {
        // 1 / (theta^(2i/dim)) for i in 0..dim/2
        let half_dim = head_dim / 2;
        let inv_freq: Vec<f32> = (0..half_dim)
            .map(|i| 1.0 / theta.powf((2 * i) as f64 / head_dim as f64))
            .map(|freq| scale_frequency(freq, scaling) as f32)
            .collect();
        let inv_freq = Tensor::from_vec(inv_freq, (1, half_dim), device)?;

        let positions: Vec<f32> = (0..max_seq_len).map(|p| p as f32).collect();
        let positions = Tensor::from_vec(positions, (max_seq_len, 1), device)?;

        // [max_seq_len, half_dim]
        let freqs = positions.matmul(&inv_freq)?;

        Ok(Self {
            cos_cache: freqs.cos()?,
            sin_cache: freqs.sin()?,
            head_dim,
        })
    }

    /// Rotate `x` of shape [batch, heads, seq_len, head_dim] starting at position `pos`.
    pub fn apply(&self, x: &Tensor, pos: usize) -> Result<Tensor> {
        let half_dim = self.head_dim / 2;
        let (batch, heads, seq_len, _) = x.dims4()?;
        let dtype = x.dtype();

        let cos = self.cos_cache.narrow(0, pos, seq_len)?;
        let sin = self.sin_cache.narrow(0, pos, seq_len)?;

        let x = x.to_dtype(DType::F32)?;
        let x1 = x.narrow(3, 0, half_dim)?;
        let x2 = x.narrow(3, half_dim, half_dim)?;

        let cos = cos
            .unsqueeze(0)?
            .unsqueeze(0)?
            .broadcast_as((batch, heads, seq_len, half_dim))?;
        let sin = sin
            .unsqueeze(0)?
            .unsqueeze(0)?
            .broadcast_as((batch, heads, seq_len, half_dim))?;

        // [x1*cos - x2*sin, x1*sin + x2*cos]
        let out1 = ((&x1 * &cos)? - (&x2 * &sin)?)?;
        let out2 = ((&x1 * &sin)? + (&x2 * &cos)?)?;

        Tensor::cat(&[&out1, &out2], 3)?.to_dtype(dtype)
    }
}

fn scale_frequency(freq: f64, scaling: RopeScalingKind) -> f64 {
    match scaling {
        RopeScalingKind::Default => freq,
        RopeScalingKind::Linear { factor } => freq / factor,
        RopeScalingKind::Llama3 {
            factor,
            low_freq_factor,
            high_freq_factor,
            original_max_position_embeddings,
        } => {
            let context = original_max_position_embeddings as f64;
            let wavelen = 2.0 * std::f64::consts::PI / freq;
            if wavelen < context / high_freq_factor {
                freq
            } else if wavelen > context / low_freq_factor {
                freq / factor
            } else {
                // interpolate between the two bands
                let smooth =
                    (context / wavelen - low_freq_factor) / (high_freq_factor - low_freq_factor);
                (1.0 - smooth) * freq / factor + smooth * freq
            }
        }
    }
}

/// Multi-head causal self-attention with grouped-query key/value heads.
pub struct CausalSelfAttention {
    pub q_proj: Linear,
    pub k_proj: Linear,
    pub v_proj: Linear,
    pub o_proj: Linear,
    pub n_heads: usize,
    pub n_kv_heads: usize,
    pub head_dim: usize,
    pub scaling: f64,
    pub rotary_emb: RotaryEmbedding,
}

impl CausalSelfAttention {
    pub fn load(cfg: &CausalLmConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = cfg.hidden_size;
        let n_heads = cfg.num_attention_heads;
        let n_kv_heads = cfg.kv_heads();
        let head_dim = cfg.head_dim();
        let bias = cfg.qkv_bias();

        let q_proj = linear_b(hidden, n_heads * head_dim, bias, vb.pp("q_proj"))?;
        let k_proj = linear_b(hidden, n_kv_heads * head_dim, bias, vb.pp("k_proj"))?;
        let v_proj = linear_b(hidden, n_kv_heads * head_dim, bias, vb.pp("v_proj"))?;
        let o_proj = linear_b(n_heads * head_dim, hidden, false, vb.pp("o_proj"))?;

        let rotary_emb = RotaryEmbedding::new(
            head_dim,
            cfg.max_position_embeddings,
            cfg.rope_theta,
            cfg.rope_scaling_kind()?,
            vb.device(),
        )?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            n_heads,
            n_kv_heads,
            head_dim,
            scaling: 1.0 / (head_dim as f64).sqrt(),
            rotary_emb,
        })
    }

    /// Full-sequence forward pass, x: [batch, seq, hidden]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b_sz, seq_len, _) = x.dims3()?;
        let max_len = self.rotary_emb.cos_cache.dim(0)?;
        if seq_len > max_len {
            candle_core::bail!("sequence length {seq_len} exceeds max_position_embeddings {max_len}");
        }

        // [Batch, Seq, Heads * Dim] -> [Batch, Heads, Seq, Dim]
        let q = self
            .q_proj
            .forward(x)?
            .reshape((b_sz, seq_len, self.n_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = self
            .k_proj
            .forward(x)?
            .reshape((b_sz, seq_len, self.n_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self
            .v_proj
            .forward(x)?
            .reshape((b_sz, seq_len, self.n_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let q = self.rotary_emb.apply(&q, 0)?;
        let k = self.rotary_emb.apply(&k, 0)?;

        let k = self.repeat_kv(k)?;
        let v = self.repeat_kv(v)?;

        let att = (q.matmul(&k.t()?)? * self.scaling)?;
        let att = self.apply_causal_mask(&att.to_dtype(DType::F32)?, seq_len)?;
        let att = softmax(&att, D::Minus1)?.to_dtype(v.dtype())?;

        let y = att.matmul(&v)?;

        // [Batch, Heads, Seq, Dim] -> [Batch, Seq, Hidden]
        let y = y
            .transpose(1, 2)?
            .reshape((b_sz, seq_len, self.n_heads * self.head_dim))?;
        self.o_proj.forward(&y)
    }

    // GQA: [B, N_KV, S, D] -> [B, N_KV*Rep, S, D]
    fn repeat_kv(&self, x: Tensor) -> Result<Tensor> {
        let n_rep = self.n_heads / self.n_kv_heads;
        if n_rep == 1 {
            return Ok(x);
        }
        let (b, n_kv, s, d) = x.dims4()?;
        x.unsqueeze(2)?
            .expand((b, n_kv, n_rep, s, d))?
            .reshape((b, n_kv * n_rep, s, d))
    }

    fn apply_causal_mask(&self, att: &Tensor, seq_len: usize) -> Result<Tensor> {
        if seq_len == 1 {
            return Ok(att.clone());
        }
        let mask: Vec<f32> = (0..seq_len)
            .flat_map(|i| {
                (0..seq_len).map(move |j| if j <= i { 0.0 } else { f32::NEG_INFINITY })
            })
            .collect();
        let mask = Tensor::from_vec(mask, (1, 1, seq_len, seq_len), &Device::Cpu)?
            .to_device(att.device())?;
        att.broadcast_add(&mask)
    }
}
