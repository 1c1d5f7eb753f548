//! Supervised fine-tuning of Llama-family causal LMs on translation pairs.

pub mod cli;
pub mod config;
pub mod data;
pub mod model_files;
pub mod pipeline;
pub mod tokenize;
pub mod train;
