use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::{
    DataConfig, FinetuneConfig, IntervalStrategy, LrSchedulerKind, Precision, TrainingArguments,
    DEFAULT_DATASET, DEFAULT_DATASET_CONFIG, DEFAULT_DATA_SEED, DEFAULT_PROMPT_TEMPLATE,
    DEFAULT_SAMPLE_SIZE,
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Fine-tune a causal LM on English-Finnish translation pairs", long_about = None)]
pub struct Cli {
    /// Record field name, accepted for compatibility (unused)
    #[arg(long, default_value = "text")]
    pub key: String,

    /// Debug-level logging
    #[arg(long, action)]
    pub verbose: bool,

    /// Truncate tokenized examples to this many tokens
    #[arg(long, default_value_t = 1024)]
    pub max_length: usize,

    /// Local model directory or Hugging Face hub repo id
    #[arg(long, required = true)]
    pub model: String,

    /// Local JSONL training pairs (replaces the hub dataset)
    #[arg(long = "train_data")]
    pub train_data: Option<PathBuf>,

    /// Local JSONL evaluation pairs (requires --train_data, disables the split)
    #[arg(long = "eval_data")]
    pub eval_data: Option<PathBuf>,

    /// Hub revision of --model
    #[arg(long, default_value = "main")]
    pub revision: String,

    #[arg(long, default_value = DEFAULT_DATASET)]
    pub dataset: String,

    #[arg(long, default_value = DEFAULT_DATASET_CONFIG)]
    pub dataset_config: String,

    #[arg(long, default_value = "train")]
    pub dataset_split: String,

    #[arg(long, default_value = "en")]
    pub source_lang: String,

    #[arg(long, default_value = "fi")]
    pub target_lang: String,

    /// Pairs sampled before the train/test split
    #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
    pub sample_size: usize,

    #[arg(long, default_value_t = 0.2)]
    pub test_fraction: f64,

    /// Seed for sampling and splitting the data
    #[arg(long, default_value_t = DEFAULT_DATA_SEED)]
    pub data_seed: u64,

    /// Cache directory for downloaded samples
    #[arg(long, default_value = "data/cache")]
    pub cache_dir: PathBuf,

    /// Prompt prefix (minijinja, receives `source`); the target is appended
    #[arg(long, default_value = DEFAULT_PROMPT_TEMPLATE)]
    pub prompt_template: String,

    /// Compute the loss on the translation only
    #[arg(long, action)]
    pub mask_prompt: bool,

    #[arg(long, default_value = "train_output")]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = 10)]
    pub num_train_epochs: usize,

    /// Total optimizer steps (overrides --num-train-epochs)
    #[arg(long)]
    pub max_steps: Option<usize>,

    #[arg(long, default_value_t = 8)]
    pub per_device_train_batch_size: usize,

    #[arg(long, default_value_t = 8)]
    pub per_device_eval_batch_size: usize,

    #[arg(long, default_value_t = 1)]
    pub gradient_accumulation_steps: usize,

    #[arg(long, default_value_t = 5e-5)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 0.0)]
    pub weight_decay: f64,

    #[arg(long, default_value_t = 0)]
    pub warmup_steps: usize,

    #[arg(long, value_enum, default_value_t = LrSchedulerKind::Linear)]
    pub lr_scheduler: LrSchedulerKind,

    /// Global gradient-norm clip (0 disables)
    #[arg(long, default_value_t = 1.0)]
    pub max_grad_norm: f64,

    #[arg(long, value_enum, default_value_t = IntervalStrategy::Steps)]
    pub evaluation_strategy: IntervalStrategy,

    #[arg(long, default_value_t = 100)]
    pub eval_steps: usize,

    #[arg(long, default_value_t = 500)]
    pub logging_steps: usize,

    #[arg(long, value_enum, default_value_t = IntervalStrategy::No)]
    pub save_strategy: IntervalStrategy,

    #[arg(long, default_value_t = 500)]
    pub save_steps: usize,

    #[arg(long, default_value_t = 3)]
    pub save_total_limit: usize,

    /// Seed for epoch shuffling
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, value_enum, default_value_t = Precision::Auto)]
    pub precision: Precision,

    /// Force CPU even when CUDA is available
    #[arg(long, action)]
    pub cpu: bool,

    /// JSON file with all training arguments (replaces the training flags)
    #[arg(long)]
    pub training_config: Option<PathBuf>,
}

impl Cli {
    pub fn training_arguments(&self) -> Result<TrainingArguments> {
        if let Some(path) = &self.training_config {
            return TrainingArguments::from_file(path);
        }
        Ok(TrainingArguments {
            output_dir: self.output_dir.clone(),
            evaluation_strategy: self.evaluation_strategy,
            eval_steps: self.eval_steps,
            save_strategy: self.save_strategy,
            save_steps: self.save_steps,
            save_total_limit: self.save_total_limit,
            num_train_epochs: self.num_train_epochs,
            max_steps: self.max_steps,
            per_device_train_batch_size: self.per_device_train_batch_size,
            per_device_eval_batch_size: self.per_device_eval_batch_size,
            gradient_accumulation_steps: self.gradient_accumulation_steps,
            learning_rate: self.learning_rate,
            weight_decay: self.weight_decay,
            max_grad_norm: self.max_grad_norm,
            lr_scheduler_type: self.lr_scheduler,
            warmup_steps: self.warmup_steps,
            logging_steps: self.logging_steps,
            seed: self.seed,
            precision: self.precision,
            ..TrainingArguments::default()
        })
    }

    pub fn data_config(&self) -> DataConfig {
        DataConfig {
            dataset: self.dataset.clone(),
            dataset_config: self.dataset_config.clone(),
            dataset_split: self.dataset_split.clone(),
            source_lang: self.source_lang.clone(),
            target_lang: self.target_lang.clone(),
            train_data: self.train_data.clone(),
            eval_data: self.eval_data.clone(),
            sample_size: self.sample_size,
            test_fraction: self.test_fraction,
            seed: self.data_seed,
            cache_dir: self.cache_dir.clone(),
        }
    }

    pub fn finetune_config(&self) -> Result<FinetuneConfig> {
        let config = FinetuneConfig {
            model: self.model.clone(),
            revision: self.revision.clone(),
            max_length: self.max_length,
            prompt_template: self.prompt_template.clone(),
            mask_prompt: self.mask_prompt,
            force_cpu: self.cpu,
            data: self.data_config(),
            training: self.training_arguments()?,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_invocation() -> Result<()> {
        let cli = Cli::try_parse_from(["finetune", "--model", "TinyLlama/TinyLlama-1.1B-Chat-v1.0"])?;
        let config = cli.finetune_config()?;
        assert_eq!(config.max_length, 1024);
        assert_eq!(config.data.dataset, "Helsinki-NLP/europarl");
        assert_eq!(config.data.seed, 5834);
        assert_eq!(config.training.num_train_epochs, 10);
        assert_eq!(config.training.save_strategy, IntervalStrategy::No);
        assert!(!cli.verbose);
        Ok(())
    }

    #[test]
    fn underscore_data_flags() -> Result<()> {
        let cli = Cli::try_parse_from([
            "finetune",
            "--model",
            "m",
            "--train_data",
            "train.jsonl",
            "--eval_data",
            "eval.jsonl",
            "--max-length",
            "256",
            "--verbose",
        ])?;
        assert_eq!(cli.train_data, Some(PathBuf::from("train.jsonl")));
        assert_eq!(cli.eval_data, Some(PathBuf::from("eval.jsonl")));
        assert_eq!(cli.max_length, 256);
        assert!(cli.verbose);
        Ok(())
    }

    #[test]
    fn model_is_required() {
        assert!(Cli::try_parse_from(["finetune"]).is_err());
    }

    #[test]
    fn training_config_file_wins() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("args.json");
        std::fs::write(&path, r#"{"num_train_epochs": 1, "save_strategy": "epoch"}"#)?;
        let cli = Cli::try_parse_from([
            "finetune",
            "--model",
            "m",
            "--num-train-epochs",
            "4",
            "--training-config",
            path.to_str().unwrap_or_default(),
        ])?;
        let args = cli.training_arguments()?;
        assert_eq!(args.num_train_epochs, 1);
        assert_eq!(args.save_strategy, IntervalStrategy::Epoch);
        Ok(())
    }
}
