//! SwiGLU - Gated MLP with SiLU activation

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

/// SwiGLU MLP block (Gate, Up, Down projections)
pub struct SwiGLU {
    pub gate_proj: Linear,
    pub up_proj: Linear,
    pub down_proj: Linear,
}

impl SwiGLU {
    pub fn load(hidden_dim: usize, intermediate_dim: usize, vb: VarBuilder) -> Result<Self> {
        let gate_proj = linear_no_bias(hidden_dim, intermediate_dim, vb.pp("gate_proj"))?;
        let up_proj = linear_no_bias(hidden_dim, intermediate_dim, vb.pp("up_proj"))?;
        let down_proj = linear_no_bias(intermediate_dim, hidden_dim, vb.pp("down_proj"))?;
        Ok(Self {
            gate_proj,
            up_proj,
            down_proj,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gate = candle_nn::ops::silu(&self.gate_proj.forward(x)?)?;
        let up = self.up_proj.forward(x)?;
        self.down_proj.forward(&(gate * up)?)
    }
}
