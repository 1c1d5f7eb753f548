//! Fine-tuning configuration
//!
//! `TrainingArguments` mirrors the knobs of a Hugging Face trainer run and is
//! (de)serializable so a run can be reproduced from `training_args.json`.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub const DEFAULT_DATASET: &str = "Helsinki-NLP/europarl";
pub const DEFAULT_DATASET_CONFIG: &str = "en-fi";
pub const DEFAULT_DATA_SEED: u64 = 5834;
pub const DEFAULT_SAMPLE_SIZE: usize = 10_000;
pub const DEFAULT_PROMPT_TEMPLATE: &str = "<|user|>Käännä suomeksi: {{ source }} <|assistant|>";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// bf16 on accelerators, f32 on CPU
    Auto,
    F32,
    Bf16,
}

impl Precision {
    pub fn bf16(self) -> Option<bool> {
        match self {
            Self::Auto => None,
            Self::F32 => Some(false),
            Self::Bf16 => Some(true),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IntervalStrategy {
    No,
    Steps,
    Epoch,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LrSchedulerKind {
    Linear,
    Cosine,
    Constant,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct TrainingArguments {
    pub output_dir: PathBuf,
    pub evaluation_strategy: IntervalStrategy,
    pub eval_steps: usize,
    pub save_strategy: IntervalStrategy,
    pub save_steps: usize,
    pub save_total_limit: usize,
    pub num_train_epochs: usize,
    /// Overrides `num_train_epochs` when set
    pub max_steps: Option<usize>,
    pub per_device_train_batch_size: usize,
    pub per_device_eval_batch_size: usize,
    pub gradient_accumulation_steps: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub adam_beta1: f64,
    pub adam_beta2: f64,
    pub adam_epsilon: f64,
    pub max_grad_norm: f64,
    pub lr_scheduler_type: LrSchedulerKind,
    pub warmup_steps: usize,
    pub logging_steps: usize,
    pub seed: u64,
    pub precision: Precision,
}

impl Default for TrainingArguments {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("train_output"),
            evaluation_strategy: IntervalStrategy::Steps,
            eval_steps: 100,
            save_strategy: IntervalStrategy::No,
            save_steps: 500,
            save_total_limit: 3,
            num_train_epochs: 10,
            max_steps: None,
            per_device_train_batch_size: 8,
            per_device_eval_batch_size: 8,
            gradient_accumulation_steps: 1,
            learning_rate: 5e-5,
            weight_decay: 0.0,
            adam_beta1: 0.9,
            adam_beta2: 0.999,
            adam_epsilon: 1e-8,
            max_grad_norm: 1.0,
            lr_scheduler_type: LrSchedulerKind::Linear,
            warmup_steps: 0,
            logging_steps: 500,
            seed: 42,
            precision: Precision::Auto,
        }
    }
}

impl TrainingArguments {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Cannot open training config '{}'", path.display()))?;
        let args: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Invalid training config '{}'", path.display()))?;
        args.validate()?;
        Ok(args)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.per_device_train_batch_size == 0 || self.per_device_eval_batch_size == 0 {
            anyhow::bail!("batch sizes must be at least 1");
        }
        if self.gradient_accumulation_steps == 0 {
            anyhow::bail!("gradient_accumulation_steps must be at least 1");
        }
        if self.evaluation_strategy == IntervalStrategy::Steps && self.eval_steps == 0 {
            anyhow::bail!("eval_steps must be at least 1 with the 'steps' evaluation strategy");
        }
        if self.save_strategy == IntervalStrategy::Steps && self.save_steps == 0 {
            anyhow::bail!("save_steps must be at least 1 with the 'steps' save strategy");
        }
        if self.learning_rate <= 0.0 {
            anyhow::bail!("learning_rate must be positive");
        }
        if self.max_steps.is_none() && self.num_train_epochs == 0 {
            anyhow::bail!("either num_train_epochs or max_steps must be non-zero");
        }
        Ok(())
    }
}

/// Where translation pairs come from and how they are sampled.
#[derive(Clone, Debug)]
pub struct DataConfig {
    pub dataset: String,
    pub dataset_config: String,
    pub dataset_split: String,
    pub source_lang: String,
    pub target_lang: String,
    pub train_data: Option<PathBuf>,
    pub eval_data: Option<PathBuf>,
    pub sample_size: usize,
    pub test_fraction: f64,
    pub seed: u64,
    pub cache_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            dataset_config: DEFAULT_DATASET_CONFIG.to_string(),
            dataset_split: "train".to_string(),
            source_lang: "en".to_string(),
            target_lang: "fi".to_string(),
            train_data: None,
            eval_data: None,
            sample_size: DEFAULT_SAMPLE_SIZE,
            test_fraction: 0.2,
            seed: DEFAULT_DATA_SEED,
            cache_dir: PathBuf::from("data/cache"),
        }
    }
}

/// Everything one fine-tuning run needs.
#[derive(Clone, Debug)]
pub struct FinetuneConfig {
    pub model: String,
    pub revision: String,
    pub max_length: usize,
    pub prompt_template: String,
    pub mask_prompt: bool,
    pub force_cpu: bool,
    pub data: DataConfig,
    pub training: TrainingArguments,
}

impl FinetuneConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_length == 0 {
            anyhow::bail!("--max-length must be at least 1");
        }
        if self.data.eval_data.is_some() && self.data.train_data.is_none() {
            anyhow::bail!("--eval_data requires --train_data");
        }
        if self.data.sample_size == 0 {
            anyhow::bail!("--sample-size must be at least 1");
        }
        self.training.validate()
    }
}
