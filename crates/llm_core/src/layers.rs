//! Layers Module - building blocks of the Llama-family decoder
//!
//! - RMSNorm: Root Mean Square Layer Normalization
//! - SwiGLU: Gated MLP with SiLU activation
//! - CausalSelfAttention: rotary multi-head attention with GQA

pub mod attention;
pub mod rms_norm;
pub mod swiglu;

pub use attention::{CausalSelfAttention, RotaryEmbedding};
pub use rms_norm::RMSNorm;
pub use swiglu::SwiGLU;
