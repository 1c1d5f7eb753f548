//! RMSNorm - Root Mean Square Layer Normalization

use candle_core::{DType, Result, Tensor};
use candle_nn::VarBuilder;

/// Root Mean Square Normalization layer. Computes in f32 regardless of the
/// activation dtype and casts back.
pub struct RMSNorm {
    pub weight: Tensor,
    pub eps: f64,
}

impl RMSNorm {
    pub fn load(dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints((dim,), "weight", candle_nn::init::ONE)?;
        Ok(Self { weight, eps })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x_dtype = x.dtype();
        let x_f32 = x.to_dtype(DType::F32)?;
        let dim = x_f32.rank() - 1;
        let hidden_size = x_f32.dim(dim)?;

        let norm_x = (x_f32.sqr()?.sum_keepdim(dim)? / (hidden_size as f64))?;
        let x_normed = x_f32.broadcast_div(&(norm_x + self.eps)?.sqrt()?)?;

        let weight = self.weight.to_dtype(DType::F32)?;
        x_normed.broadcast_mul(&weight)?.to_dtype(x_dtype)
    }
}
