//! Model Module - causal language model architecture
//!
//! - DecoderBlock: single transformer block (attention + MLP)
//! - CausalLm: embedding, decoder stack, final norm and LM head
//! - CausalLmConfig: Hugging Face `config.json`

pub mod block;
pub mod causal_lm;
pub mod config;

pub use block::DecoderBlock;
pub use causal_lm::CausalLm;
pub use config::{CausalLmConfig, RopeScaling, RopeScalingKind, TokenIds};
