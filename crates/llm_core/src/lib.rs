//! LLM Core Engine
//!
//! Trainable Llama-family causal language model on candle: layers, the
//! decoder, Hugging Face checkpoint loading and the causal LM loss.

pub mod device_utils;
pub mod layers;
pub mod loss;
pub mod model;
pub mod weights;

pub use loss::causal_lm_loss;
pub use model::{CausalLm, CausalLmConfig, DecoderBlock, TokenIds};
