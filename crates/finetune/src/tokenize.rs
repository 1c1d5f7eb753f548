//! Tokenizer adapter: formatted text -> truncated token ids + loss mask

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::Path;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info, warn};

use crate::data::FormattedExample;

/// Tokens tried, in order, when the tokenizer declares no padding.
const PAD_TOKEN_CANDIDATES: &[&str] = &["<pad>", "[PAD]", "<|pad|>", "<|padding|>"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedExample {
    pub input_ids: Vec<u32>,
    /// 1 = token contributes to the loss
    pub loss_mask: Vec<u8>,
}

impl TokenizedExample {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

pub struct TokenizerAdapter {
    tokenizer: Tokenizer,
    max_length: usize,
    mask_prompt: bool,
}

impl TokenizerAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P, max_length: usize, mask_prompt: bool) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading Tokenizer from: {:?}", path);
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        Self::new(tokenizer, max_length, mask_prompt)
    }

    pub fn new(mut tokenizer: Tokenizer, max_length: usize, mask_prompt: bool) -> Result<Self> {
        if max_length == 0 {
            anyhow::bail!("max_length must be at least 1");
        }
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;
        Ok(Self {
            tokenizer,
            max_length,
            mask_prompt,
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn inner(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn encode(&self, example: &FormattedExample) -> Result<TokenizedExample> {
        let encoding = self
            .tokenizer
            .encode(example.text.as_str(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let input_ids = encoding.get_ids().to_vec();
        let loss_mask = if self.mask_prompt {
            encoding
                .get_offsets()
                .iter()
                .map(|(start, end)| {
                    // special tokens carry an empty (0, 0) span
                    if start == end && *start == 0 {
                        0
                    } else {
                        u8::from(*start >= example.response_start)
                    }
                })
                .collect()
        } else {
            vec![1; input_ids.len()]
        };

        Ok(TokenizedExample {
            input_ids,
            loss_mask,
        })
    }

    /// Encodes every example in parallel.
    pub fn encode_all(&self, examples: &[FormattedExample]) -> Result<Vec<TokenizedExample>> {
        let pb = ProgressBar::new(examples.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tokenized ({eta})")?
                .progress_chars("#>-"),
        );

        let encoded = examples
            .par_iter()
            .map(|ex| {
                let out = self.encode(ex);
                pb.inc(1);
                out
            })
            .collect::<Result<Vec<_>>>()?;
        pb.finish_and_clear();

        let total: usize = encoded.iter().map(TokenizedExample::len).sum();
        let truncated = encoded.iter().filter(|e| e.len() == self.max_length).count();
        info!(
            "✅ Tokenized {} examples ({} tokens, {} at max length {})",
            encoded.len(),
            total,
            truncated,
            self.max_length
        );
        Ok(encoded)
    }

    /// Padding id: the tokenizer's own padding, then well-known pad tokens,
    /// then the model's end-of-sequence token.
    pub fn pad_id(&self, eos_token_id: Option<u32>) -> Result<u32> {
        if let Some(padding) = self.tokenizer.get_padding() {
            debug!("pad id {} from tokenizer padding params", padding.pad_id);
            return Ok(padding.pad_id);
        }
        for token in PAD_TOKEN_CANDIDATES {
            if let Some(id) = self.tokenizer.token_to_id(token) {
                debug!("pad id {} from token {}", id, token);
                return Ok(id);
            }
        }
        let eos = eos_token_id.context("tokenizer has no pad token and the model has no eos_token_id")?;
        warn!("⚠️ No pad token found, padding with eos id {}", eos);
        Ok(eos)
    }
}
