//! Next-token cross-entropy for causal language modelling

use candle_core::{DType, Result, Tensor, D};
use candle_nn::ops;

/// Shifted causal LM loss.
///
/// `logits`: [batch, seq, vocab], `input_ids`: [batch, seq] (u32),
/// `loss_mask`: [batch, seq] with 1.0 where the token is a training target.
///
/// Position `t` predicts token `t + 1`; the mask of the *target* token
/// decides whether the prediction counts. Returns the mean loss over counted
/// targets (a zero scalar when nothing counts) and the number of targets.
pub fn causal_lm_loss(
    logits: &Tensor,
    input_ids: &Tensor,
    loss_mask: &Tensor,
) -> Result<(Tensor, usize)> {
    let (b, t, v) = logits.dims3()?;
    if t < 2 {
        let zero = Tensor::zeros((), DType::F32, logits.device())?;
        return Ok((zero, 0));
    }

    let logits = logits
        .narrow(1, 0, t - 1)?
        .to_dtype(DType::F32)?
        .contiguous()?
        .reshape((b * (t - 1), v))?;
    let targets = input_ids
        .narrow(1, 1, t - 1)?
        .contiguous()?
        .reshape(b * (t - 1))?;
    let mask = loss_mask
        .narrow(1, 1, t - 1)?
        .to_dtype(DType::F32)?
        .contiguous()?
        .reshape(b * (t - 1))?;

    let n_targets = mask.sum_all()?.to_scalar::<f32>()?.round() as usize;
    if n_targets == 0 {
        let zero = Tensor::zeros((), DType::F32, logits.device())?;
        return Ok((zero, 0));
    }

    let log_sm = ops::log_softmax(&logits, D::Minus1)?;
    let nll = log_sm
        .gather(&targets.unsqueeze(1)?, D::Minus1)?
        .squeeze(D::Minus1)?
        .neg()?;

    let loss = ((nll * mask)?.sum_all()? / n_targets as f64)?;
    Ok((loss, n_targets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn uniform_logits(b: usize, t: usize, v: usize) -> Result<Tensor> {
        Tensor::zeros((b, t, v), DType::F32, &Device::Cpu)
    }

    #[test]
    fn uniform_logits_give_log_vocab() -> Result<()> {
        let logits = uniform_logits(1, 4, 8)?;
        let ids = Tensor::new(&[[1u32, 2, 3, 4]], &Device::Cpu)?;
        let mask = Tensor::ones((1, 4), DType::F32, &Device::Cpu)?;
        let (loss, n) = causal_lm_loss(&logits, &ids, &mask)?;
        assert_eq!(n, 3);
        let loss = loss.to_scalar::<f32>()?;
        assert!((loss - (8f32).ln()).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn masked_targets_are_ignored() -> Result<()> {
        // Only the prediction of the token at position 1 is counted, and the
        // logits strongly favour it, so the loss is near zero.
        let mut data = vec![0f32; 3 * 4];
        data[2] = 50.0; // position 0 -> token 2
        let logits = Tensor::from_vec(data, (1, 3, 4), &Device::Cpu)?;
        let ids = Tensor::new(&[[0u32, 2, 1]], &Device::Cpu)?;
        let mask = Tensor::new(&[[1f32, 1., 0.]], &Device::Cpu)?;
        let (loss, n) = causal_lm_loss(&logits, &ids, &mask)?;
        assert_eq!(n, 1);
        assert!(loss.to_scalar::<f32>()? < 1e-3);
        Ok(())
    }

    #[test]
    fn fully_masked_batch_is_zero() -> Result<()> {
        let logits = uniform_logits(2, 3, 5)?;
        let ids = Tensor::zeros((2, 3), DType::U32, &Device::Cpu)?;
        let mask = Tensor::zeros((2, 3), DType::F32, &Device::Cpu)?;
        let (loss, n) = causal_lm_loss(&logits, &ids, &mask)?;
        assert_eq!(n, 0);
        assert_eq!(loss.to_scalar::<f32>()?, 0.0);
        Ok(())
    }
}
