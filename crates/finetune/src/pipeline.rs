//! End-to-end run: data -> tokens -> model -> evaluate / train / evaluate

use anyhow::{Context, Result};
use llm_core::device_utils::{resolve_dtype, select_device};
use llm_core::{CausalLm, CausalLmConfig};
use tracing::{info, warn};

use crate::config::FinetuneConfig;
use crate::data::{self, PromptTemplate};
use crate::model_files::ModelFiles;
use crate::tokenize::{TokenizedExample, TokenizerAdapter};
use crate::train::{stop_flag, CausalLmCollator, TrainOutput, Trainer};

pub const TRAINING_ARGS_NAME: &str = "training_args.json";

#[derive(Debug, Clone, Copy)]
pub struct FinetuneReport {
    pub loss_before: f64,
    pub loss_after: f64,
    pub train: TrainOutput,
}

pub fn run(config: &FinetuneConfig) -> Result<FinetuneReport> {
    config.validate()?;

    // 1. Data
    let template = PromptTemplate::new(&config.prompt_template)?;
    let source = data::source_for(&config.data);
    let split = data::prepare(source.as_ref(), &config.data, &template)?;

    // 2. Model files + tokenizer
    let files = ModelFiles::resolve(&config.model, &config.revision)?;
    let model_config = CausalLmConfig::from_file(&files.config)
        .with_context(|| format!("Unsupported model config '{}'", files.config.display()))?;
    info!(
        "📊 Model: {} ({:.1}M params, {} layers, vocab {})",
        model_config.model_type,
        model_config.param_count() as f64 / 1e6,
        model_config.num_hidden_layers,
        model_config.vocab_size
    );

    let mut max_length = config.max_length;
    if max_length > model_config.max_position_embeddings {
        warn!(
            "⚠️ --max-length {} exceeds max_position_embeddings {}, truncating to the latter",
            max_length, model_config.max_position_embeddings
        );
        max_length = model_config.max_position_embeddings;
    }
    let tokenizer = TokenizerAdapter::from_file(&files.tokenizer, max_length, config.mask_prompt)?;
    let train_set = tokenizer.encode_all(&split.train)?;
    let eval_set = tokenizer.encode_all(&split.test)?;
    check_vocab(&train_set, model_config.vocab_size)?;
    check_vocab(&eval_set, model_config.vocab_size)?;
    let pad_id = tokenizer.pad_id(model_config.eos_token_id())?;

    // 3. Device + weights
    let device = select_device(config.force_cpu)?;
    let dtype = resolve_dtype(&device, config.training.precision.bf16());
    info!("Device initialized: {:?} ({:?})", device, dtype);
    let (model, varmap) = CausalLm::load_pretrained(&model_config, &files.weights, dtype, &device)?;

    // 4. Trainer
    let args = &config.training;
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create '{}'", args.output_dir.display()))?;
    args.save(args.output_dir.join(TRAINING_ARGS_NAME))?;
    info!("📁 Output directory: {}", args.output_dir.display());

    let mut trainer = Trainer::new(
        model,
        varmap,
        args.clone(),
        CausalLmCollator::new(pad_id),
        train_set,
        eval_set,
        device,
    )?
    .with_checkpoint_companions(vec![files.config.clone(), files.tokenizer.clone()])
    .with_stop_flag(stop_flag());

    let before = trainer.evaluate()?;
    info!("Loss before training: {:.4}", before.eval_loss);

    let train = trainer.train()?;

    let after = trainer.evaluate()?;
    info!("Loss after training: {:.4}", after.eval_loss);

    Ok(FinetuneReport {
        loss_before: before.eval_loss,
        loss_after: after.eval_loss,
        train,
    })
}

/// Token ids beyond the embedding table mean the tokenizer does not belong to the model.
fn check_vocab(examples: &[TokenizedExample], vocab_size: usize) -> Result<()> {
    let max_id = examples
        .iter()
        .flat_map(|e| e.input_ids.iter().copied())
        .max();
    if let Some(id) = max_id {
        if id as usize >= vocab_size {
            anyhow::bail!("token id {id} is outside the model vocabulary of {vocab_size}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocab_check() {
        let ex = TokenizedExample {
            input_ids: vec![1, 31],
            loss_mask: vec![1, 1],
        };
        assert!(check_vocab(std::slice::from_ref(&ex), 32).is_ok());
        assert!(check_vocab(&[ex], 31).is_err());
    }
}
