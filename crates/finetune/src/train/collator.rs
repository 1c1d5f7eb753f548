use anyhow::Result;
use candle_core::{Device, Tensor};

use crate::tokenize::TokenizedExample;

/// One padded mini-batch.
pub struct Batch {
    /// [batch, seq] u32
    pub input_ids: Tensor,
    /// [batch, seq] f32, 0.0 on padding and masked tokens
    pub loss_mask: Tensor,
    pub examples: usize,
}

/// Causal LM collation: right-pad to the longest example in the batch.
#[derive(Debug, Clone, Copy)]
pub struct CausalLmCollator {
    pad_id: u32,
}

impl CausalLmCollator {
    pub fn new(pad_id: u32) -> Self {
        Self { pad_id }
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn collate(&self, examples: &[&TokenizedExample], device: &Device) -> Result<Batch> {
        if examples.is_empty() {
            anyhow::bail!("cannot collate an empty batch");
        }
        let seq_len = examples.iter().map(|e| e.len()).max().unwrap_or(0).max(1);
        let b = examples.len();

        let mut ids = Vec::with_capacity(b * seq_len);
        let mut mask = Vec::with_capacity(b * seq_len);
        for ex in examples {
            let pad = seq_len - ex.len();
            ids.extend_from_slice(&ex.input_ids);
            ids.extend(std::iter::repeat(self.pad_id).take(pad));
            mask.extend(ex.loss_mask.iter().map(|&m| f32::from(m)));
            mask.extend(std::iter::repeat(0f32).take(pad));
        }

        Ok(Batch {
            input_ids: Tensor::from_vec(ids, (b, seq_len), device)?,
            loss_mask: Tensor::from_vec(mask, (b, seq_len), device)?,
            examples: b,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ex(ids: &[u32], mask: &[u8]) -> TokenizedExample {
        TokenizedExample {
            input_ids: ids.to_vec(),
            loss_mask: mask.to_vec(),
        }
    }

    #[test]
    fn right_pads_and_masks_padding() -> Result<()> {
        let a = ex(&[5, 6, 7], &[1, 1, 1]);
        let b = ex(&[8], &[1]);
        let batch = CausalLmCollator::new(0).collate(&[&a, &b], &Device::Cpu)?;

        assert_eq!(batch.examples, 2);
        assert_eq!(
            batch.input_ids.to_vec2::<u32>()?,
            vec![vec![5, 6, 7], vec![8, 0, 0]]
        );
        assert_eq!(
            batch.loss_mask.to_vec2::<f32>()?,
            vec![vec![1., 1., 1.], vec![1., 0., 0.]]
        );
        Ok(())
    }

    #[test]
    fn keeps_prompt_mask() -> Result<()> {
        let a = ex(&[1, 2, 3, 4], &[0, 0, 1, 1]);
        let batch = CausalLmCollator::new(9).collate(&[&a], &Device::Cpu)?;
        assert_eq!(batch.loss_mask.to_vec2::<f32>()?, vec![vec![0., 0., 1., 1.]]);
        Ok(())
    }

    #[test]
    fn pad_valued_tokens_still_count() -> Result<()> {
        // eos doubles as pad for many models; real eos tokens keep their mask
        let a = ex(&[4, 2], &[1, 1]);
        let b = ex(&[4], &[1]);
        let batch = CausalLmCollator::new(2).collate(&[&a, &b], &Device::Cpu)?;
        assert_eq!(batch.loss_mask.to_vec2::<f32>()?, vec![vec![1., 1.], vec![1., 0.]]);
        Ok(())
    }

    #[test]
    fn empty_batch_is_an_error() {
        assert!(CausalLmCollator::new(0).collate(&[], &Device::Cpu).is_err());
    }
}
